//! Core configuration loading, template expansion, and variable resolution
//! for a command-runner's config subsystem.
//!
//! A caller supplies a [`collab::Filesystem`], [`collab::IntegrityVerifier`],
//! and [`collab::ProcessEnv`] (the hardened, production-grade
//! implementations live in the embedding application, not here) and drives
//! everything through [`pipeline::ConfigPipeline`]:
//!
//! ```ignore
//! let pipeline = ConfigPipeline::new(&fs, &verifier, &process_env, options);
//! let plan = pipeline.run(&config_bytes)?;
//! for group in &plan.groups {
//!     for command in &group.commands {
//!         // hand `command.expanded_cmd` / `expanded_args` / `expanded_env`
//!         // to the actual process launcher.
//!     }
//! }
//! ```
//!
//! The pipeline is split into independently testable stages — parsing
//! ([`parser`]), cross-file merge ([`merge`]), schema validation
//! ([`validate`]), template expansion ([`template_expand`]), and variable
//! expansion ([`var_expand`]) — each grounded on its own module here and
//! exercised by its own unit tests; [`pipeline`] only sequences them.

pub mod allowlist;
pub mod collab;
pub mod defaults;
pub mod error;
pub mod escape;
pub mod ident;
pub mod merge;
pub mod parser;
pub mod path_resolver;
pub mod pipeline;
pub mod placeholder;
pub mod runtime;
pub mod spec;
pub mod template_expand;
pub mod validate;
pub mod value;
pub mod var_expand;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use collab::{Filesystem, IntegrityVerifier, ProcessEnv, VerifyError};
pub use error::Error;
pub use pipeline::{ConfigPipeline, GroupPlan, LoadedConfig, PipelineOptions, Plan};
pub use runtime::{GlobalRuntime, GroupRuntime, RuntimeCommand};
pub use spec::{
    CommandForm, CommandSpec, CommandTemplate, ConfigSpec, EnvBinding, EnvImportBinding, GlobalSpec, GroupSpec,
    RiskLevel, VerifyFileEntry,
};
pub use value::Value;
