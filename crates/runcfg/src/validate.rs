//! Enforces the structural invariants from spec.md §4.4: name grammar,
//! mutual exclusivity between the direct and templated command forms,
//! required fields, reserved prefixes, and the `%{` ban inside templates.
//!
//! Runs after [`crate::defaults::apply_defaults`] and before any
//! expansion stage.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::error::Error;
use crate::ident::{has_reserved_prefix, is_valid_identifier};
use crate::spec::{CommandForm, CommandSpec, CommandTemplate, ConfigSpec, EnvBinding, GroupSpec};
use crate::value::Value;

/// Validates an entire parsed, defaulted [`ConfigSpec`].
pub fn validate_spec(spec: &ConfigSpec) -> Result<(), Error> {
    validate_vars_keys(&spec.global.vars, "global.vars")?;
    validate_env_entries(&spec.global.env, "global.env")?;
    validate_identifier_list(
        spec.global.env_import.iter().map(|b| b.local.as_str()),
        "global.env_import",
    )?;
    if let Some(t) = spec.global.default_timeout {
        check_non_negative(t, "global", "default_timeout")?;
    }
    if let Some(t) = spec.global.default_output_size_limit {
        check_non_negative(t, "global", "default_output_size_limit")?;
    }

    validate_templates(&spec.command_templates)?;

    let mut seen_group_names = HashSet::new();
    for group in &spec.groups {
        validate_group(group, &mut seen_group_names)?;
    }

    Ok(())
}

fn validate_templates(
    templates: &IndexMap<String, CommandTemplate>,
) -> Result<(), Error> {
    for (name, template) in templates {
        if !is_valid_identifier(name) {
            return Err(Error::InvalidTemplateName { name: name.clone() });
        }
        if has_reserved_prefix(name) {
            return Err(Error::ReservedTemplateName { name: name.clone() });
        }
        if template.cmd.trim().is_empty() {
            return Err(Error::MissingRequiredField {
                context: format!("command_templates.{name}"),
                field: "cmd".to_string(),
            });
        }

        let mut fields: Vec<(&str, &str)> = vec![("cmd", template.cmd.as_str())];
        if let Some(workdir) = &template.workdir {
            fields.push(("workdir", workdir.as_str()));
        }
        for arg in &template.args {
            fields.push(("args", arg.as_str()));
        }
        for entry in &template.env {
            fields.push(("env", entry.as_str()));
        }

        for (field, text) in fields {
            if text.contains("%{") {
                return Err(Error::ForbiddenPatternInTemplate {
                    template: name.clone(),
                    field: field.to_string(),
                });
            }
        }

        let ctx = format!("command_templates.{name}");
        if let Some(t) = template.timeout {
            check_non_negative(t, &ctx, "timeout")?;
        }
        if let Some(t) = template.output_size_limit {
            check_non_negative(t, &ctx, "output_size_limit")?;
        }
    }
    Ok(())
}

fn validate_group(group: &GroupSpec, seen_names: &mut HashSet<String>) -> Result<(), Error> {
    if !is_valid_identifier(&group.name) {
        return Err(Error::InvalidGroupName {
            name: group.name.clone(),
        });
    }
    if !seen_names.insert(group.name.clone()) {
        return Err(Error::DuplicateGroupName {
            name: group.name.clone(),
        });
    }

    let ctx = format!("group `{}`", group.name);
    validate_vars_keys(&group.vars, &format!("{ctx}.vars"))?;
    validate_env_entries(&group.env, &format!("{ctx}.env"))?;
    validate_identifier_list(
        group.env_import.iter().map(|b| b.local.as_str()),
        &format!("{ctx}.env_import"),
    )?;

    for command in &group.commands {
        validate_command(&ctx, command)?;
    }

    Ok(())
}

fn validate_command(group_ctx: &str, command: &CommandSpec) -> Result<(), Error> {
    let ctx = format!("{group_ctx} command `{}`", command.name);

    match command.form() {
        CommandForm::Templated => {
            if command.cmd.is_some() {
                return Err(Error::TemplateFieldConflict {
                    command: ctx,
                    field: "cmd".to_string(),
                });
            }
            if !command.args.is_empty() {
                return Err(Error::TemplateFieldConflict {
                    command: ctx,
                    field: "args".to_string(),
                });
            }
            if !command.env_vars.is_empty() {
                return Err(Error::TemplateFieldConflict {
                    command: ctx,
                    field: "env_vars".to_string(),
                });
            }

            let template_name = command.template.clone().unwrap_or_default();
            for key in command.params.keys() {
                if !is_valid_identifier(key) {
                    return Err(Error::InvalidParamName {
                        template: template_name.clone(),
                        param: key.clone(),
                    });
                }
            }
        }
        CommandForm::Direct => {
            match &command.cmd {
                None => {
                    return Err(Error::MissingRequiredField {
                        context: ctx,
                        field: "cmd".to_string(),
                    })
                }
                Some(c) if c.trim().is_empty() => {
                    return Err(Error::MissingRequiredField {
                        context: ctx,
                        field: "cmd".to_string(),
                    })
                }
                Some(_) => {}
            }
            validate_env_entries(&command.env_vars, &format!("{ctx}.env_vars"))?;
        }
    }

    if let Some(t) = command.timeout {
        check_non_negative(t, &ctx, "timeout")?;
    }
    if let Some(t) = command.output_size_limit {
        check_non_negative(t, &ctx, "output_size_limit")?;
    }

    Ok(())
}

fn validate_vars_keys(vars: &IndexMap<String, Value>, context: &str) -> Result<(), Error> {
    validate_identifier_list(vars.keys().map(String::as_str), context)
}

fn validate_identifier_list<'a>(
    names: impl Iterator<Item = &'a str>,
    context: &str,
) -> Result<(), Error> {
    for name in names {
        if !is_valid_identifier(name) {
            return Err(Error::InvalidIdentifier {
                context: context.to_string(),
                value: name.to_string(),
            });
        }
    }
    Ok(())
}

fn validate_env_entries(entries: &[EnvBinding], context: &str) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for entry in entries {
        if !is_valid_identifier(&entry.key) {
            return Err(Error::InvalidIdentifier {
                context: context.to_string(),
                value: entry.key.clone(),
            });
        }
        if !seen.insert(entry.key.clone()) {
            return Err(Error::EnvVarDuplicateKey {
                context: context.to_string(),
                key: entry.key.clone(),
            });
        }
    }
    Ok(())
}

fn check_non_negative(value: i64, context: &str, field: &str) -> Result<(), Error> {
    if value < 0 {
        return Err(Error::NegativeValue {
            context: context.to_string(),
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}
