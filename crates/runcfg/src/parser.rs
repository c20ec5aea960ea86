//! Turns raw document bytes into a [`ConfigSpec`] (main document) or a
//! registry of templates (included template files, strict mode).
//!
//! Both document shapes are parsed as TOML. The `toml` crate rejects
//! duplicate keys at every nesting level as part of ordinary parsing, which
//! satisfies the load-time "duplicate keys anywhere cause load to fail"
//! invariant without a bespoke pass. The one thing the generic TOML grammar
//! cannot catch — a `name` key sitting inside a `command_templates.<x>`
//! table, which is syntactically legal TOML — gets its own dedicated check
//! in [`reject_template_name_field`].

use indexmap::IndexMap;
use toml::Value as Toml;

use crate::error::Error;
use crate::spec::{
    split_key_value, CommandSpec, CommandTemplate, ConfigSpec, EnvBinding, EnvImportBinding,
    GlobalSpec, GroupSpec, RiskLevel, VerifyFileEntry,
};
use crate::value::Value;

fn table(v: &Toml) -> Option<&toml::map::Map<String, Toml>> {
    v.as_table()
}

fn get_str<'a>(t: &'a toml::map::Map<String, Toml>, key: &str) -> Option<&'a str> {
    t.get(key).and_then(Toml::as_str)
}

fn get_string(t: &toml::map::Map<String, Toml>, key: &str) -> Option<String> {
    get_str(t, key).map(str::to_owned)
}

fn get_bool(t: &toml::map::Map<String, Toml>, key: &str) -> Option<bool> {
    t.get(key).and_then(Toml::as_bool)
}

fn get_int(t: &toml::map::Map<String, Toml>, key: &str) -> Option<i64> {
    t.get(key).and_then(Toml::as_integer)
}

fn get_string_array(
    t: &toml::map::Map<String, Toml>,
    key: &str,
    context: &str,
) -> Result<Vec<String>, Error> {
    match t.get(key) {
        None => Ok(Vec::new()),
        Some(Toml::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| Error::InvalidIdentifier {
                        context: context.to_string(),
                        value: item.to_string(),
                    })
            })
            .collect(),
        Some(other) => Err(Error::InvalidIdentifier {
            context: context.to_string(),
            value: other.to_string(),
        }),
    }
}

fn toml_to_runcfg_value(t: &Toml, context: &str, param: &str) -> Result<Value, Error> {
    match t {
        Toml::String(s) => Ok(Value::String(s.clone())),
        Toml::Array(items) => {
            let strings = items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    item.as_str()
                        .map(str::to_owned)
                        .ok_or_else(|| Error::TemplateInvalidArrayElement {
                            template: context.to_string(),
                            param: param.to_string(),
                            index,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(strings))
        }
        _ => Err(Error::UnsupportedParamType {
            context: context.to_string(),
            param: param.to_string(),
        }),
    }
}

fn get_value_map(
    t: &toml::map::Map<String, Toml>,
    key: &str,
    context: &str,
) -> Result<IndexMap<String, Value>, Error> {
    let mut out = IndexMap::new();
    let Some(sub) = t.get(key).and_then(table) else {
        return Ok(out);
    };
    for (k, v) in sub {
        out.insert(k.clone(), toml_to_runcfg_value(v, context, k)?);
    }
    Ok(out)
}

fn parse_env_entries(
    t: &toml::map::Map<String, Toml>,
    key: &str,
    context: &str,
) -> Result<Vec<EnvBinding>, Error> {
    get_string_array(t, key, context)?
        .into_iter()
        .map(|entry| {
            let (k, v) = split_key_value(&entry).ok_or_else(|| Error::EnvVarInvalidFormat {
                context: context.to_string(),
                entry: entry.clone(),
            })?;
            Ok(EnvBinding {
                key: k.to_string(),
                value: v.to_string(),
            })
        })
        .collect()
}

fn parse_env_import(
    t: &toml::map::Map<String, Toml>,
    context: &str,
) -> Result<Vec<EnvImportBinding>, Error> {
    let bindings: Vec<EnvImportBinding> = get_string_array(t, "env_import", context)?
        .into_iter()
        .map(|entry| {
            let (local, source) =
                split_key_value(&entry).ok_or_else(|| Error::EnvVarInvalidFormat {
                    context: context.to_string(),
                    entry: entry.clone(),
                })?;
            Ok(EnvImportBinding {
                local: local.to_string(),
                source: source.to_string(),
            })
        })
        .collect::<Result<_, Error>>()?;

    // `env_import` is parsed from a TOML array of `"local=SOURCE"` strings
    // rather than a table, so the generic duplicate-key rejection the `toml`
    // parser gives every other table never applies here; it needs its own
    // scan (spec.md §3: "Within any single `vars` / `env_import` /
    // `command_templates` table, keys are unique").
    let mut seen = std::collections::HashSet::new();
    for binding in &bindings {
        if !seen.insert(binding.local.as_str()) {
            return Err(Error::DuplicateEnvImportLocal {
                context: context.to_string(),
                local: binding.local.clone(),
            });
        }
    }

    Ok(bindings)
}

fn parse_risk_level(
    t: &toml::map::Map<String, Toml>,
    key: &str,
    context: &str,
) -> Result<Option<RiskLevel>, Error> {
    match get_str(t, key) {
        None => Ok(None),
        Some(s) => s
            .parse::<RiskLevel>()
            .map(Some)
            .map_err(|()| Error::InvalidRiskLevel {
                context: context.to_string(),
                value: s.to_string(),
            }),
    }
}

/// Parses the primary document into a [`ConfigSpec`].
///
/// Duplicate keys anywhere in `bytes` fail the parse (enforced by the
/// underlying `toml` parser).
pub fn parse_main_document(bytes: &[u8]) -> Result<ConfigSpec, Error> {
    let text = std::str::from_utf8(bytes).map_err(|e| Error::MainDocumentParse {
        message: format!("document is not valid UTF-8: {e}"),
    })?;

    let root: Toml = toml::from_str(text).map_err(|e| Error::MainDocumentParse {
        message: e.to_string(),
    })?;

    let root_table = table(&root).ok_or_else(|| Error::MainDocumentParse {
        message: "top-level document must be a table".to_string(),
    })?;

    let version = get_string(root_table, "version");

    let global = match root_table.get("global").and_then(table) {
        Some(g) => parse_global(g)?,
        None => GlobalSpec::default(),
    };

    let groups = match root_table.get("groups") {
        Some(Toml::Array(items)) => items.iter().map(parse_group).collect::<Result<_, _>>()?,
        Some(_) | None => Vec::new(),
    };

    let command_templates = match root_table.get("command_templates").and_then(table) {
        Some(t) => parse_command_templates(t)?,
        None => IndexMap::new(),
    };

    let includes = match root_table.get("includes") {
        Some(Toml::Array(items)) => items
            .iter()
            .filter_map(Toml::as_str)
            .map(str::to_owned)
            .collect(),
        Some(_) | None => Vec::new(),
    };

    Ok(ConfigSpec {
        version,
        global,
        groups,
        command_templates,
        includes,
    })
}

fn parse_global(t: &toml::map::Map<String, Toml>) -> Result<GlobalSpec, Error> {
    let env_allowed = get_string_array(t, "env_allowed", "global")?;
    let env_import = parse_env_import(t, "global")?;
    let vars = get_value_map(t, "vars", "global.vars")?;
    let env = parse_env_entries(t, "env", "global.env")?;
    let verify_standard_paths = get_bool(t, "verify_standard_paths");

    let verify_files = match t.get("verify_files") {
        Some(Toml::Array(items)) => items
            .iter()
            .map(|item| match item {
                Toml::String(path) => Ok(VerifyFileEntry {
                    path: path.clone(),
                    hash: None,
                }),
                Toml::Table(tbl) => {
                    let path =
                        get_string(tbl, "path").ok_or_else(|| Error::MissingRequiredField {
                            context: "global.verify_files".to_string(),
                            field: "path".to_string(),
                        })?;
                    let hash = get_string(tbl, "hash");
                    Ok(VerifyFileEntry { path, hash })
                }
                other => Err(Error::InvalidIdentifier {
                    context: "global.verify_files".to_string(),
                    value: other.to_string(),
                }),
            })
            .collect::<Result<_, _>>()?,
        Some(_) | None => Vec::new(),
    };

    let default_timeout = get_int(t, "default_timeout");
    let default_output_size_limit = get_int(t, "default_output_size_limit");
    let default_risk_level = parse_risk_level(t, "default_risk_level", "global")?;

    Ok(GlobalSpec {
        env_allowed,
        env_import,
        vars,
        env,
        verify_standard_paths,
        verify_files,
        default_timeout,
        default_output_size_limit,
        default_risk_level,
    })
}

fn parse_group(v: &Toml) -> Result<GroupSpec, Error> {
    let t = table(v).ok_or_else(|| Error::MainDocumentParse {
        message: "each entry in `groups` must be a table".to_string(),
    })?;

    let name = get_string(t, "name").ok_or_else(|| Error::MissingRequiredField {
        context: "group".to_string(),
        field: "name".to_string(),
    })?;

    let context = format!("group `{name}`");

    let env_allowed = match t.get("env_allowed") {
        None => None,
        Some(_) => Some(get_string_array(t, "env_allowed", &context)?),
    };

    let env_import = parse_env_import(t, &context)?;
    let vars = get_value_map(t, "vars", &format!("{context}.vars"))?;
    let env = parse_env_entries(t, "env", &format!("{context}.env"))?;

    let cmd_allowed = match t.get("cmd_allowed") {
        None => None,
        Some(_) => Some(get_string_array(t, "cmd_allowed", &context)?),
    };

    let commands = match t.get("commands") {
        Some(Toml::Array(items)) => items
            .iter()
            .map(parse_command)
            .collect::<Result<_, _>>()?,
        Some(_) | None => Vec::new(),
    };

    Ok(GroupSpec {
        name,
        env_allowed,
        env_import,
        vars,
        env,
        cmd_allowed,
        commands,
    })
}

fn parse_command(v: &Toml) -> Result<CommandSpec, Error> {
    let t = table(v).ok_or_else(|| Error::MainDocumentParse {
        message: "each entry in `commands` must be a table".to_string(),
    })?;

    let name = get_string(t, "name").ok_or_else(|| Error::MissingRequiredField {
        context: "command".to_string(),
        field: "name".to_string(),
    })?;

    let context = format!("command `{name}`");

    let cmd = get_string(t, "cmd");
    let args = get_string_array(t, "args", &context)?;
    let env_vars = parse_env_entries(t, "env_vars", &format!("{context}.env_vars"))?;

    let template = get_string(t, "template");
    let params = get_value_map(t, "params", &format!("{context}.params"))?;

    let workdir = get_string(t, "workdir");
    let output_file = get_string(t, "output_file");
    let timeout = get_int(t, "timeout");
    let risk_level = parse_risk_level(t, "risk_level", &context)?;
    let output_size_limit = get_int(t, "output_size_limit");

    Ok(CommandSpec {
        name,
        cmd,
        args,
        env_vars,
        template,
        params,
        workdir,
        output_file,
        timeout,
        risk_level,
        output_size_limit,
    })
}

fn parse_command_templates(
    t: &toml::map::Map<String, Toml>,
) -> Result<IndexMap<String, CommandTemplate>, Error> {
    let mut out = IndexMap::new();
    for (name, v) in t {
        let tt = table(v).ok_or_else(|| Error::MainDocumentParse {
            message: format!("command_templates.{name} must be a table"),
        })?;

        if tt.contains_key("name") {
            return Err(Error::TemplateContainsNameField {
                template_name: name.clone(),
            });
        }

        let context = format!("command_templates.{name}");
        let cmd = get_string(tt, "cmd").unwrap_or_default();
        let args = get_string_array(tt, "args", &context)?;
        let env = get_string_array(tt, "env", &context)?;
        let workdir = get_string(tt, "workdir");
        let timeout = get_int(tt, "timeout");
        let output_size_limit = get_int(tt, "output_size_limit");
        let risk_level = parse_risk_level(tt, "risk_level", &context)?;

        out.insert(
            name.clone(),
            CommandTemplate {
                cmd,
                args,
                env,
                workdir,
                timeout,
                output_size_limit,
                risk_level,
            },
        );
    }
    Ok(out)
}

/// Parses an included file in strict mode: only `version` and
/// `command_templates` are accepted.
pub fn parse_template_file(
    bytes: &[u8],
    template_file: &str,
) -> Result<(Option<String>, IndexMap<String, CommandTemplate>), Error> {
    let text = std::str::from_utf8(bytes).map_err(|e| Error::TemplateFileInvalidFormat {
        template_file: template_file.to_string(),
        parse_error: format!("not valid UTF-8: {e}"),
    })?;

    let root: Toml = toml::from_str(text).map_err(|e| Error::TemplateFileInvalidFormat {
        template_file: template_file.to_string(),
        parse_error: e.to_string(),
    })?;

    let root_table = table(&root).ok_or_else(|| Error::TemplateFileInvalidFormat {
        template_file: template_file.to_string(),
        parse_error: "top-level document must be a table".to_string(),
    })?;

    for key in root_table.keys() {
        if key != "version" && key != "command_templates" {
            return Err(Error::TemplateFileInvalidFormat {
                template_file: template_file.to_string(),
                parse_error: format!("unexpected key `{key}`; only `version` and `command_templates` are allowed"),
            });
        }
    }

    let version = get_string(root_table, "version");
    let command_templates = match root_table.get("command_templates").and_then(table) {
        Some(t) => parse_command_templates(t).map_err(|e| Error::TemplateFileInvalidFormat {
            template_file: template_file.to_string(),
            parse_error: e.to_string(),
        })?,
        None => IndexMap::new(),
    };

    Ok((version, command_templates))
}
