//! Post-expansion runtime entities (spec.md §3).
//!
//! Built in strict dependency order — global, then group, then command —
//! and immutable once constructed. Each later stage only ever reads the
//! finished output of the stage before it; there are no back-edges.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::spec::RiskLevel;

/// Fully resolved global-level state: imported process-env variables and
/// `vars`/`env` expanded against each other and the automatic-variable
/// table.
#[derive(Clone, Debug)]
pub struct GlobalRuntime {
    pub expanded_vars: IndexMap<String, String>,
    pub expanded_env: IndexMap<String, String>,
    pub env_allowed: Vec<String>,
    /// Local names that originated from `env_import` at the global level,
    /// carried down so descendant scopes can detect a `vars` conflict.
    pub env_import_vars: HashSet<String>,
}

/// A group's runtime state, layered on top of [`GlobalRuntime`].
#[derive(Clone, Debug)]
pub struct GroupRuntime {
    pub name: String,
    pub expanded_vars: IndexMap<String, String>,
    pub expanded_env: IndexMap<String, String>,
    /// The *effective* allowlist, after inheritance/override against the
    /// global one.
    pub env_allowed: Vec<String>,
    /// The union of every ancestor's `env_import_vars` with this group's
    /// own, for conflict detection in descendant commands (commands don't
    /// have their own `vars`, so in practice this only matters at the
    /// group level itself, but it is carried for completeness).
    pub env_import_vars: HashSet<String>,
    pub cmd_allowed: Option<Vec<String>>,
}

/// The final, ready-to-execute plan for a single command.
#[derive(Clone, Debug)]
pub struct RuntimeCommand {
    pub name: String,
    pub expanded_cmd: String,
    pub expanded_args: Vec<String>,
    pub expanded_env: IndexMap<String, String>,
    pub expanded_workdir: Option<String>,
    pub expanded_output_file: Option<String>,
    pub effective_timeout: Option<i64>,
    pub effective_output_size_limit: Option<i64>,
    pub effective_risk_level: RiskLevel,
}
