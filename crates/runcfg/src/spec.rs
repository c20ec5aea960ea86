//! The pre-expansion spec tree: entities constructed once by the parser and
//! immutable thereafter.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;

use crate::value::Value;

/// An `env_import` binding: `local=SOURCE`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvImportBinding {
    pub local: String,
    pub source: String,
}

/// A raw `KEY=VALUE` environment entry. `value` may still contain `%{...}`
/// references awaiting expansion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvBinding {
    pub key: String,
    pub value: String,
}

/// Splits `text` on the first `=`, returning `(before, after)`.
///
/// Returns `None` if there is no `=` at all.
pub fn split_key_value(text: &str) -> Option<(&str, &str)> {
    text.split_once('=')
}

/// The closed vocabulary of risk levels a command may carry.
///
/// Not stated as a closed set in the distilled spec, but the original
/// system enforces a fixed vocabulary at load time rather than accepting
/// an arbitrary string (see SPEC_FULL.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const DEFAULT: RiskLevel = RiskLevel::Low;
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RiskLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            _ => Err(()),
        }
    }
}

/// A file whose content is attested against a previously recorded SHA-256
/// digest by the external integrity verifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyFileEntry {
    pub path: String,
    /// Recorded digest, hex-encoded. `None` means "no digest recorded",
    /// which the verifier collaborator should treat as unverifiable.
    pub hash: Option<String>,
}

/// Top-level global declarations.
#[derive(Clone, Debug, Default)]
pub struct GlobalSpec {
    pub env_allowed: Vec<String>,
    pub env_import: Vec<EnvImportBinding>,
    pub vars: IndexMap<String, Value>,
    pub env: Vec<EnvBinding>,
    /// Tri-state: absent defaults to `true` (applied by the default applier).
    pub verify_standard_paths: Option<bool>,
    pub verify_files: Vec<VerifyFileEntry>,
    pub default_timeout: Option<i64>,
    pub default_output_size_limit: Option<i64>,
    pub default_risk_level: Option<RiskLevel>,
}

/// A group of related commands.
#[derive(Clone, Debug)]
pub struct GroupSpec {
    pub name: String,
    /// `None` means "inherit the global allowlist"; `Some(vec![])` means
    /// "reject all imports"; `Some(list)` overrides the global list.
    pub env_allowed: Option<Vec<String>>,
    pub env_import: Vec<EnvImportBinding>,
    pub vars: IndexMap<String, Value>,
    pub env: Vec<EnvBinding>,
    pub cmd_allowed: Option<Vec<String>>,
    pub commands: Vec<CommandSpec>,
}

/// A single command, in either direct or templated form.
///
/// The two forms are mutually exclusive (`CommandForm`), but the raw
/// document may present both sets of fields at once; [`crate::validate`]
/// is what turns that ambiguity into a `TemplateFieldConflict` error and
/// settles which form is actually in play.
#[derive(Clone, Debug, Default)]
pub struct CommandSpec {
    pub name: String,

    // Direct form.
    pub cmd: Option<String>,
    pub args: Vec<String>,
    pub env_vars: Vec<EnvBinding>,

    // Templated form.
    pub template: Option<String>,
    pub params: IndexMap<String, Value>,

    // Common overrides (valid in either form).
    pub workdir: Option<String>,
    pub output_file: Option<String>,
    pub timeout: Option<i64>,
    pub risk_level: Option<RiskLevel>,
    pub output_size_limit: Option<i64>,
}

/// The resolved, exclusive shape of a [`CommandSpec`] once validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandForm {
    Direct,
    Templated,
}

impl CommandSpec {
    /// Determines which form this command uses, without validating.
    /// Templated takes precedence only when `template` is set; ambiguous or
    /// underspecified commands are caught separately by [`crate::validate`].
    pub fn form(&self) -> CommandForm {
        if self.template.is_some() {
            CommandForm::Templated
        } else {
            CommandForm::Direct
        }
    }
}

/// A named, reusable command skeleton with `${...}` placeholders.
#[derive(Clone, Debug, Default)]
pub struct CommandTemplate {
    /// Raw template string; may contain `${...}` placeholders.
    pub cmd: String,
    /// Raw template strings; each may contain `${...}` placeholders.
    pub args: Vec<String>,
    /// Raw `KEY=VALUE`-shaped template strings (unsplit: the key portion is
    /// validated against placeholders before any splitting occurs).
    pub env: Vec<String>,
    pub workdir: Option<String>,
    pub timeout: Option<i64>,
    pub output_size_limit: Option<i64>,
    pub risk_level: Option<RiskLevel>,
}

/// The fully parsed, pre-expansion document.
#[derive(Clone, Debug, Default)]
pub struct ConfigSpec {
    pub version: Option<String>,
    pub global: GlobalSpec,
    pub groups: Vec<GroupSpec>,
    pub command_templates: IndexMap<String, CommandTemplate>,
    pub includes: Vec<String>,
}
