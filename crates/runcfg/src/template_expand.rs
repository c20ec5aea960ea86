//! Expands a [`CommandTemplate`] against a command's `params`, per
//! spec.md §4.6: resolves every `${...}` placeholder field-by-field and
//! materializes the result into the same shape a direct command would have.
//!
//! `%{...}` variable references are untouched here; that is
//! [`crate::var_expand`]'s job, run afterwards over the materialized result.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::error::Error;
use crate::placeholder::{parse_placeholders, Placeholder, PlaceholderKind};
use crate::spec::{split_key_value, CommandSpec, CommandTemplate, EnvBinding, RiskLevel};
use crate::value::Value;

/// A command materialized from a template: `${...}` placeholders resolved,
/// `%{...}` variable references still present.
#[derive(Clone, Debug)]
pub struct ExpandedCommand {
    pub cmd: String,
    pub args: Vec<String>,
    pub env: Vec<EnvBinding>,
    pub workdir: Option<String>,
    pub timeout: Option<i64>,
    pub output_size_limit: Option<i64>,
    pub risk_level: Option<RiskLevel>,
}

struct FieldCtx<'a> {
    command: &'a str,
    template: &'a str,
    field: String,
}

/// Expands `template` against `command.params`, applying execution-setting
/// overrides (a command-level value always wins over the template's).
pub fn expand_template(
    command: &CommandSpec,
    template_name: &str,
    template: &CommandTemplate,
) -> Result<ExpandedCommand, Error> {
    let params = &command.params;

    let cmd_ctx = FieldCtx {
        command: &command.name,
        template: template_name,
        field: "cmd".to_string(),
    };
    let cmd = expand_scalar(&template.cmd, params, &cmd_ctx)?;
    if cmd.is_empty() {
        return Err(Error::TemplateCmdNotSingleValue {
            command: command.name.clone(),
            template: template_name.to_string(),
            produced: 0,
        });
    }

    let mut args = Vec::new();
    for (i, raw) in template.args.iter().enumerate() {
        let ctx = FieldCtx {
            command: &command.name,
            template: template_name,
            field: format!("args[{i}]"),
        };
        args.extend(expand_field(raw, params, true, &ctx)?);
    }

    let env = expand_env_entries(&template.env, params, &command.name, template_name)?;

    let template_workdir = match &template.workdir {
        Some(raw) => {
            let ctx = FieldCtx {
                command: &command.name,
                template: template_name,
                field: "workdir".to_string(),
            };
            let expanded = expand_scalar(raw, params, &ctx)?;
            if expanded.is_empty() {
                None
            } else {
                Some(expanded)
            }
        }
        None => None,
    };
    let workdir = command.workdir.clone().or(template_workdir);

    Ok(ExpandedCommand {
        cmd,
        args,
        env,
        workdir,
        timeout: command.timeout.or(template.timeout),
        output_size_limit: command.output_size_limit.or(template.output_size_limit),
        risk_level: command.risk_level.or(template.risk_level),
    })
}

fn lookup<'v>(params: &'v IndexMap<String, Value>, name: &str) -> Option<&'v Value> {
    params.get(name)
}

/// Expands one raw field string, returning zero or more output elements.
///
/// A pure `${@name}` element (the placeholder spans the whole string)
/// expands to each bound array entry, or zero if the param is absent. A
/// pure `${?name}` element expands to one element if non-empty, otherwise
/// zero. Everything else — plain text, a single `${name}`, or any mix of
/// literal text and placeholders — expands to exactly one element.
fn expand_field(
    text: &str,
    params: &IndexMap<String, Value>,
    allow_array: bool,
    ctx: &FieldCtx,
) -> Result<Vec<String>, Error> {
    let context = format!("template {}, field {}", ctx.template, ctx.field);
    let placeholders = parse_placeholders(text, &context)?;

    if placeholders.is_empty() {
        return Ok(vec![crate::escape::unescape(text, '$')]);
    }

    if !allow_array {
        if let Some(p) = placeholders.iter().find(|p| p.kind == PlaceholderKind::Array) {
            return Err(Error::ArrayInMixedContext {
                template: ctx.template.to_string(),
                field: ctx.field.clone(),
                param: p.name.clone(),
            });
        }
    }

    if placeholders.len() == 1 && placeholders[0].spans_whole(text) {
        let p = &placeholders[0];
        match p.kind {
            PlaceholderKind::Array => {
                return match lookup(params, &p.name) {
                    None => Ok(Vec::new()),
                    Some(Value::Array(items)) => Ok(items.clone()),
                    Some(Value::String(_)) => Err(Error::TemplateTypeMismatch {
                        command: ctx.command.to_string(),
                        template: ctx.template.to_string(),
                        param: p.name.clone(),
                        expected: "array",
                    }),
                };
            }
            PlaceholderKind::Optional => {
                let value = optional_string(params, p, ctx)?;
                return Ok(if value.is_empty() { Vec::new() } else { vec![value] });
            }
            PlaceholderKind::Required => {
                // Falls through to the general, single-element path below.
            }
        }
    }

    let mut out = String::new();
    let mut cursor = 0;
    for p in &placeholders {
        out.push_str(&crate::escape::unescape(&text[cursor..p.start], '$'));
        match p.kind {
            PlaceholderKind::Array => {
                return Err(Error::ArrayInMixedContext {
                    template: ctx.template.to_string(),
                    field: ctx.field.clone(),
                    param: p.name.clone(),
                })
            }
            PlaceholderKind::Required => out.push_str(&required_string(params, p, ctx)?),
            PlaceholderKind::Optional => out.push_str(&optional_string(params, p, ctx)?),
        }
        cursor = p.end;
    }
    out.push_str(&crate::escape::unescape(&text[cursor..], '$'));
    Ok(vec![out])
}

/// Expands a field that must yield a single scalar (`cmd`, `workdir`, an
/// env value): an absent pure `${?name}` collapses to `""` instead of zero
/// elements, since there is no array-like context here to drop the element
/// from. More than one resulting element is always an error.
fn expand_scalar(
    text: &str,
    params: &IndexMap<String, Value>,
    ctx: &FieldCtx,
) -> Result<String, Error> {
    let mut results = expand_field(text, params, false, ctx)?;
    match results.len() {
        0 => Ok(String::new()),
        1 => Ok(results.remove(0)),
        _ => Err(Error::MultipleValuesInStringContext {
            template: ctx.template.to_string(),
            field: ctx.field.clone(),
        }),
    }
}

fn required_string(
    params: &IndexMap<String, Value>,
    p: &Placeholder,
    ctx: &FieldCtx,
) -> Result<String, Error> {
    match lookup(params, &p.name) {
        None => Err(Error::RequiredParamMissing {
            command: ctx.command.to_string(),
            template: ctx.template.to_string(),
            param: p.name.clone(),
        }),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Array(_)) => Err(Error::TemplateTypeMismatch {
            command: ctx.command.to_string(),
            template: ctx.template.to_string(),
            param: p.name.clone(),
            expected: "string",
        }),
    }
}

fn optional_string(
    params: &IndexMap<String, Value>,
    p: &Placeholder,
    ctx: &FieldCtx,
) -> Result<String, Error> {
    match lookup(params, &p.name) {
        None => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Array(_)) => Err(Error::TemplateTypeMismatch {
            command: ctx.command.to_string(),
            template: ctx.template.to_string(),
            param: p.name.clone(),
            expected: "string",
        }),
    }
}

/// Expands every raw `env` template string, handling the env-specific rules:
/// a placeholder may never appear in the `KEY=` portion, and `${@name}` is
/// only legal when it is the entire entry (each bound array item must
/// itself already be a complete `KEY=VALUE` string).
fn expand_env_entries(
    raw_entries: &[String],
    params: &IndexMap<String, Value>,
    command: &str,
    template_name: &str,
) -> Result<Vec<EnvBinding>, Error> {
    let mut out = Vec::new();

    for (i, raw) in raw_entries.iter().enumerate() {
        let field = format!("env[{i}]");
        let context = format!("template {template_name}, field {field}");
        let placeholders = parse_placeholders(raw, &context)?;

        if placeholders.len() == 1
            && placeholders[0].kind == PlaceholderKind::Array
            && placeholders[0].spans_whole(raw)
        {
            let p = &placeholders[0];
            let items = match lookup(params, &p.name) {
                None => Vec::new(),
                Some(Value::Array(items)) => items.clone(),
                Some(Value::String(_)) => {
                    return Err(Error::TemplateTypeMismatch {
                        command: command.to_string(),
                        template: template_name.to_string(),
                        param: p.name.clone(),
                        expected: "array",
                    })
                }
            };
            for item in items {
                let (k, v) = split_key_value(&item).ok_or_else(|| Error::TemplateInvalidEnvFormat {
                    template: template_name.to_string(),
                    entry: item.clone(),
                })?;
                out.push(EnvBinding {
                    key: k.to_string(),
                    value: v.to_string(),
                });
            }
            continue;
        }

        if let Some(p) = placeholders.iter().find(|p| p.kind == PlaceholderKind::Array) {
            return Err(Error::ArrayInMixedContext {
                template: template_name.to_string(),
                field,
                param: p.name.clone(),
            });
        }

        let Some((raw_key, _)) = split_key_value(raw) else {
            return Err(Error::TemplateInvalidEnvFormat {
                template: template_name.to_string(),
                entry: raw.clone(),
            });
        };
        let key_end = raw_key.len();
        if placeholders.iter().any(|p| p.start < key_end) {
            return Err(Error::PlaceholderInEnvKey {
                template: template_name.to_string(),
                entry: raw.clone(),
            });
        }

        let value_ctx = FieldCtx {
            command,
            template: template_name,
            field,
        };
        let value_text = &raw[key_end + 1..];
        let value = expand_scalar(value_text, params, &value_ctx)?;
        out.push(EnvBinding {
            key: raw_key.to_string(),
            value,
        });
    }

    let mut seen = HashSet::new();
    for binding in &out {
        if !seen.insert(binding.key.clone()) {
            return Err(Error::DuplicateEnvVariableDetail {
                context: format!("template {template_name}"),
                key: binding.key.clone(),
            });
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    fn command(name: &str, params: IndexMap<String, Value>) -> CommandSpec {
        CommandSpec {
            name: name.to_string(),
            template: Some("tpl".to_string()),
            params,
            ..Default::default()
        }
    }

    #[test]
    fn expands_required_in_cmd_and_args() {
        let template = CommandTemplate {
            cmd: "${binary}".to_string(),
            args: vec!["--path".to_string(), "${path}".to_string()],
            ..Default::default()
        };
        let cmd_spec = command(
            "c",
            params(&[
                ("binary", Value::String("restic".into())),
                ("path", Value::String("/data".into())),
            ]),
        );
        let expanded = expand_template(&cmd_spec, "tpl", &template).unwrap();
        assert_eq!(expanded.cmd, "restic");
        assert_eq!(expanded.args, vec!["--path".to_string(), "/data".to_string()]);
    }

    #[test]
    fn missing_required_param_is_an_error() {
        let template = CommandTemplate {
            cmd: "${binary}".to_string(),
            ..Default::default()
        };
        let cmd_spec = command("c", IndexMap::new());
        let err = expand_template(&cmd_spec, "tpl", &template).unwrap_err();
        assert!(matches!(err, Error::RequiredParamMissing { .. }));
    }

    #[test]
    fn pure_array_param_absent_yields_no_args() {
        let template = CommandTemplate {
            cmd: "echo".to_string(),
            args: vec!["${@flags}".to_string()],
            ..Default::default()
        };
        let cmd_spec = command("c", IndexMap::new());
        let expanded = expand_template(&cmd_spec, "tpl", &template).unwrap();
        assert!(expanded.args.is_empty());
    }

    #[test]
    fn pure_array_param_present_expands_to_each_item() {
        let template = CommandTemplate {
            cmd: "echo".to_string(),
            args: vec!["${@flags}".to_string()],
            ..Default::default()
        };
        let cmd_spec = command(
            "c",
            params(&[("flags", Value::Array(vec!["-v".into(), "-x".into()]))]),
        );
        let expanded = expand_template(&cmd_spec, "tpl", &template).unwrap();
        assert_eq!(expanded.args, vec!["-v".to_string(), "-x".to_string()]);
    }

    #[test]
    fn array_placeholder_in_cmd_is_rejected() {
        let template = CommandTemplate {
            cmd: "${@flags}".to_string(),
            ..Default::default()
        };
        let cmd_spec = command("c", IndexMap::new());
        let err = expand_template(&cmd_spec, "tpl", &template).unwrap_err();
        assert!(matches!(err, Error::ArrayInMixedContext { .. }));
    }

    #[test]
    fn array_placeholder_mixed_into_args_is_rejected() {
        let template = CommandTemplate {
            cmd: "echo".to_string(),
            args: vec!["prefix-${@flags}".to_string()],
            ..Default::default()
        };
        let cmd_spec = command(
            "c",
            params(&[("flags", Value::Array(vec!["-v".into()]))]),
        );
        let err = expand_template(&cmd_spec, "tpl", &template).unwrap_err();
        assert!(matches!(err, Error::ArrayInMixedContext { .. }));
    }

    #[test]
    fn optional_missing_substitutes_empty_in_mixed_text() {
        let template = CommandTemplate {
            cmd: "echo".to_string(),
            args: vec!["--tag=${?tag}".to_string()],
            ..Default::default()
        };
        let cmd_spec = command("c", IndexMap::new());
        let expanded = expand_template(&cmd_spec, "tpl", &template).unwrap();
        assert_eq!(expanded.args, vec!["--tag=".to_string()]);
    }

    #[test]
    fn env_key_placeholder_is_rejected() {
        let template = CommandTemplate {
            cmd: "echo".to_string(),
            env: vec!["${name}=value".to_string()],
            ..Default::default()
        };
        let cmd_spec = command("c", params(&[("name", Value::String("X".into()))]));
        let err = expand_template(&cmd_spec, "tpl", &template).unwrap_err();
        assert!(matches!(err, Error::PlaceholderInEnvKey { .. }));
    }

    #[test]
    fn whole_entry_array_env_expands_to_multiple_bindings() {
        let template = CommandTemplate {
            cmd: "echo".to_string(),
            env: vec!["${@extra_env}".to_string()],
            ..Default::default()
        };
        let cmd_spec = command(
            "c",
            params(&[(
                "extra_env",
                Value::Array(vec!["A=1".into(), "B=2".into()]),
            )]),
        );
        let expanded = expand_template(&cmd_spec, "tpl", &template).unwrap();
        assert_eq!(expanded.env.len(), 2);
        assert_eq!(expanded.env[0].key, "A");
        assert_eq!(expanded.env[1].key, "B");
    }

    #[test]
    fn duplicate_env_key_after_expansion_is_an_error() {
        let template = CommandTemplate {
            cmd: "echo".to_string(),
            env: vec!["A=1".to_string(), "A=${v}".to_string()],
            ..Default::default()
        };
        let cmd_spec = command("c", params(&[("v", Value::String("2".into()))]));
        let err = expand_template(&cmd_spec, "tpl", &template).unwrap_err();
        assert!(matches!(err, Error::DuplicateEnvVariableDetail { .. }));
    }

    #[test]
    fn command_workdir_override_wins_over_template() {
        let template = CommandTemplate {
            cmd: "echo".to_string(),
            workdir: Some("${dir}".to_string()),
            ..Default::default()
        };
        let mut cmd_spec = command("c", params(&[("dir", Value::String("/tpl".into()))]));
        cmd_spec.workdir = Some("/override".to_string());
        let expanded = expand_template(&cmd_spec, "tpl", &template).unwrap();
        assert_eq!(expanded.workdir.as_deref(), Some("/override"));
    }

    #[test]
    fn type_mismatch_when_array_param_used_as_string() {
        let template = CommandTemplate {
            cmd: "${binary}".to_string(),
            ..Default::default()
        };
        let cmd_spec = command(
            "c",
            params(&[("binary", Value::Array(vec!["restic".into()]))]),
        );
        let err = expand_template(&cmd_spec, "tpl", &template).unwrap_err();
        assert!(matches!(err, Error::TemplateTypeMismatch { .. }));
    }

    #[test]
    fn escapes_are_applied_only_to_literal_text() {
        let template = CommandTemplate {
            cmd: "echo".to_string(),
            args: vec!["\\${literal}-${name}".to_string()],
            ..Default::default()
        };
        let cmd_spec = command("c", params(&[("name", Value::String("x".into()))]));
        let expanded = expand_template(&cmd_spec, "tpl", &template).unwrap();
        assert_eq!(expanded.args, vec!["${literal}-x".to_string()]);
    }
}
