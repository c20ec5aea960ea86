//! The full error taxonomy for the configuration pipeline.
//!
//! Every fallible stage returns `Result<T, Error>`. Each variant carries a
//! stable `miette` diagnostic code and enough context (group name, command
//! index, field name, offending value) for a caller to build an actionable
//! message without re-deriving it. Nothing here is retried internally: a
//! load either produces a fully validated plan, or one of these errors.

use miette::Diagnostic;
use thiserror::Error;

use crate::collab::VerifyError;

/// Errors produced while loading, validating, or expanding a configuration.
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    // ---------------------------------------------------------------
    // Loading / structure
    // ---------------------------------------------------------------
    #[error("invalid config path: {path}")]
    #[diagnostic(code(runcfg::invalid_config_path))]
    InvalidConfigPath { path: String },

    #[error("included file not found: {include_path} (resolved to {resolved_path}), referenced from {referenced_from}")]
    #[diagnostic(
        code(runcfg::included_file_not_found),
        help("check that the include path is correct relative to {referenced_from}")
    )]
    IncludedFileNotFound {
        include_path: String,
        resolved_path: String,
        referenced_from: String,
    },

    #[error("circular include detected at {path}: {}", chain.join(" -> "))]
    #[diagnostic(code(runcfg::circular_include))]
    CircularInclude { path: String, chain: Vec<String> },

    #[error("template file {template_file} has an invalid format: {parse_error}")]
    #[diagnostic(
        code(runcfg::template_file_invalid_format),
        help("template files may only contain `version` and `command_templates`")
    )]
    TemplateFileInvalidFormat {
        template_file: String,
        parse_error: String,
    },

    #[error("failed to parse main document: {message}")]
    #[diagnostic(code(runcfg::main_document_parse))]
    MainDocumentParse { message: String },

    #[error("integrity verification failed for {path}: {source}")]
    #[diagnostic(code(runcfg::integrity))]
    Integrity {
        path: String,
        #[source]
        source: VerifyError,
    },

    // ---------------------------------------------------------------
    // Schema
    // ---------------------------------------------------------------
    #[error("invalid template name: {name}")]
    #[diagnostic(code(runcfg::invalid_template_name))]
    InvalidTemplateName { name: String },

    #[error("template name {name} uses the reserved `__` prefix")]
    #[diagnostic(code(runcfg::reserved_template_name))]
    ReservedTemplateName { name: String },

    #[error("duplicate template name {name}, defined in: {}", locations.join(", "))]
    #[diagnostic(code(runcfg::duplicate_template_name))]
    DuplicateTemplateName {
        name: String,
        locations: Vec<String>,
    },

    #[error("template {template_name} contains a `name` field, but templates are anonymous")]
    #[diagnostic(code(runcfg::template_contains_name_field))]
    TemplateContainsNameField { template_name: String },

    #[error("missing required field `{field}` in {context}")]
    #[diagnostic(code(runcfg::missing_required_field))]
    MissingRequiredField { context: String, field: String },

    #[error("command {command} sets both `{field}` and a template reference, which is not allowed")]
    #[diagnostic(
        code(runcfg::template_field_conflict),
        help("a templated command may not also set `cmd`, `args`, or `env_vars`")
    )]
    TemplateFieldConflict { command: String, field: String },

    #[error("invalid group name: {name}")]
    #[diagnostic(code(runcfg::invalid_group_name))]
    InvalidGroupName { name: String },

    #[error("duplicate group name: {name}")]
    #[diagnostic(code(runcfg::duplicate_group_name))]
    DuplicateGroupName { name: String },

    #[error("invalid parameter name `{param}` on template {template}")]
    #[diagnostic(code(runcfg::invalid_param_name))]
    InvalidParamName { template: String, param: String },

    #[error("unsupported value type for `{param}` in {context} (expected a string or array of strings)")]
    #[diagnostic(code(runcfg::unsupported_param_type))]
    UnsupportedParamType { context: String, param: String },

    #[error("invalid identifier `{value}` in {context}")]
    #[diagnostic(code(runcfg::invalid_identifier))]
    InvalidIdentifier { context: String, value: String },

    #[error("{context}.{field} must be non-negative, got {value}")]
    #[diagnostic(code(runcfg::negative_value))]
    NegativeValue {
        context: String,
        field: String,
        value: i64,
    },

    #[error("malformed environment entry `{entry}` in {context} (expected KEY=VALUE)")]
    #[diagnostic(code(runcfg::env_var_invalid_format))]
    EnvVarInvalidFormat { context: String, entry: String },

    #[error("duplicate environment key `{key}` in {context}")]
    #[diagnostic(code(runcfg::env_var_duplicate_key))]
    EnvVarDuplicateKey { context: String, key: String },

    #[error("duplicate env_import local name `{local}` in {context}")]
    #[diagnostic(code(runcfg::duplicate_env_import_local))]
    DuplicateEnvImportLocal { context: String, local: String },

    #[error("invalid risk level `{value}` in {context}")]
    #[diagnostic(
        code(runcfg::invalid_risk_level),
        help("valid risk levels are: low, medium, high, critical")
    )]
    InvalidRiskLevel { context: String, value: String },

    // ---------------------------------------------------------------
    // Placeholders (`${...}`)
    // ---------------------------------------------------------------
    #[error("unclosed placeholder in {context}: {text}")]
    #[diagnostic(code(runcfg::placeholder::unclosed))]
    UnclosedPlaceholder { context: String, text: String },

    #[error("empty placeholder `${{}}` in {context}: {text}")]
    #[diagnostic(code(runcfg::placeholder::empty))]
    EmptyPlaceholder { context: String, text: String },

    #[error("placeholder with empty name in {context}: {text}")]
    #[diagnostic(code(runcfg::placeholder::empty_name))]
    EmptyPlaceholderName { context: String, text: String },

    #[error("invalid placeholder name `{name}` in {context}")]
    #[diagnostic(code(runcfg::placeholder::invalid_name))]
    InvalidPlaceholderName { context: String, name: String },

    // ---------------------------------------------------------------
    // Template expansion
    // ---------------------------------------------------------------
    #[error("command {command} references unknown template {template}")]
    #[diagnostic(code(runcfg::template::not_found))]
    TemplateNotFound { command: String, template: String },

    #[error("command {command} is missing required param `{param}` for template {template}")]
    #[diagnostic(code(runcfg::template::required_param_missing))]
    RequiredParamMissing {
        command: String,
        template: String,
        param: String,
    },

    #[error("command {command} param `{param}` for template {template} must be a {expected}")]
    #[diagnostic(code(runcfg::template::type_mismatch))]
    TemplateTypeMismatch {
        command: String,
        template: String,
        param: String,
        expected: &'static str,
    },

    #[error("template {template} field `{field}` contains a forbidden `%{{` variable reference")]
    #[diagnostic(
        code(runcfg::template::forbidden_pattern),
        help("templates may not contain `%{{...}}` variable references (NF-006)")
    )]
    ForbiddenPatternInTemplate { template: String, field: String },

    #[error("template {template} field `{field}` uses array parameter `{param}` in a mixed context")]
    #[diagnostic(code(runcfg::template::array_in_mixed_context))]
    ArrayInMixedContext {
        template: String,
        field: String,
        param: String,
    },

    #[error("template {template} param `{param}[{index}]` is not a string")]
    #[diagnostic(code(runcfg::template::invalid_array_element))]
    TemplateInvalidArrayElement {
        template: String,
        param: String,
        index: usize,
    },

    #[error("template {template} field `{field}` produced multiple values in a single-value context")]
    #[diagnostic(code(runcfg::template::multiple_values_in_string_context))]
    MultipleValuesInStringContext { template: String, field: String },

    #[error("command {command} cmd expanded to {produced} values from template {template}, expected exactly one")]
    #[diagnostic(code(runcfg::template::cmd_not_single_value))]
    TemplateCmdNotSingleValue {
        command: String,
        template: String,
        produced: usize,
    },

    #[error("template {template} env entry `{entry}` has a placeholder in its key")]
    #[diagnostic(
        code(runcfg::template::placeholder_in_env_key),
        help("the KEY portion of an env entry cannot contain `${{...}}`")
    )]
    PlaceholderInEnvKey { template: String, entry: String },

    #[error("template {template} produced invalid env entry `{entry}` (expected KEY=VALUE)")]
    #[diagnostic(code(runcfg::template::invalid_env_format))]
    TemplateInvalidEnvFormat { template: String, entry: String },

    #[error("duplicate environment variable `{key}` after expansion in {context}")]
    #[diagnostic(code(runcfg::template::duplicate_env_variable))]
    DuplicateEnvVariableDetail { context: String, key: String },

    // ---------------------------------------------------------------
    // Variable expansion (`%{...}`)
    // ---------------------------------------------------------------
    #[error("unresolved variable reference %{{{name}}} in {context}")]
    #[diagnostic(code(runcfg::var::unresolved))]
    UnresolvedVariable { context: String, name: String },

    #[error("variable reference %{{{name}}} in {context} forms a cycle")]
    #[diagnostic(code(runcfg::var::cycle))]
    VariableCycle { context: String, name: String },

    #[error("`{name}` is imported via env_import and also defined in `vars` in {context}")]
    #[diagnostic(
        code(runcfg::var::env_import_conflict),
        help("a name bound by env_import cannot also appear in vars at the same or a descendant scope")
    )]
    EnvImportVarsConflict { context: String, name: String },

    #[error("env_import source `{source_var}` in {context} is not in the effective allowlist")]
    #[diagnostic(code(runcfg::var::env_import_not_allowed))]
    EnvImportNotAllowed { context: String, source_var: String },
}
