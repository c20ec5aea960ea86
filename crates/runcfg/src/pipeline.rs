//! The orchestrator: sequences parse → merge → validate →
//! expand-global → expand-group → expand-command (spec.md §4.10).
//!
//! [`ConfigPipeline`] is the single entry point an embedding binary talks
//! to. It owns no state of its own beyond the injected collaborators and a
//! [`PipelineOptions`] bag; every stage function it calls is a pure
//! function over its inputs, so the pipeline itself can be constructed
//! fresh per call, or reused across many calls as long as the collaborators
//! are `Sync`.

use std::collections::HashSet;
use std::path::PathBuf;

use indexmap::IndexMap;

use crate::allowlist;
use crate::collab::{Filesystem, IntegrityVerifier, ProcessEnv};
use crate::defaults;
use crate::error::Error;
use crate::merge::{self, TemplateRegistry};
use crate::parser;
use crate::path_resolver;
use crate::runtime::{GlobalRuntime, GroupRuntime, RuntimeCommand};
use crate::spec::{CommandForm, CommandSpec, ConfigSpec, GlobalSpec, GroupSpec, RiskLevel};
use crate::template_expand;
use crate::validate;
use crate::var_expand;

/// Configuration for a single [`ConfigPipeline`] run.
///
/// `default_timeout` and `default_output_size_limit` are the embedding
/// application's own fallbacks, used only when neither the document's
/// `global` defaults nor a command/template set a value. `automatic_vars`
/// are the runtime-injected variables mentioned in spec.md §4.7 (e.g.
/// `__RUNNER_PID`) available to every `%{...}` expansion at every level.
#[derive(Clone, Debug, Default)]
pub struct PipelineOptions {
    pub base_dir: PathBuf,
    pub default_timeout: Option<i64>,
    pub default_output_size_limit: Option<i64>,
    pub automatic_vars: IndexMap<String, String>,
}

/// The result of [`ConfigPipeline::load`]: a validated spec tree plus its
/// merged, read-only template registry.
#[derive(Clone, Debug)]
pub struct LoadedConfig {
    pub spec: ConfigSpec,
    pub templates: TemplateRegistry,
}

/// One group's fully expanded runtime plus its commands, in document order.
#[derive(Clone, Debug)]
pub struct GroupPlan {
    pub runtime: GroupRuntime,
    pub commands: Vec<RuntimeCommand>,
}

/// The complete, ready-to-execute output of [`ConfigPipeline::run`].
#[derive(Clone, Debug)]
pub struct Plan {
    pub global: GlobalRuntime,
    pub groups: Vec<GroupPlan>,
}

/// Sequences every stage of spec.md §4.10 over a set of injected
/// collaborators.
pub struct ConfigPipeline<'a> {
    fs: &'a dyn Filesystem,
    verifier: &'a dyn IntegrityVerifier,
    process_env: &'a dyn ProcessEnv,
    options: PipelineOptions,
}

impl<'a> ConfigPipeline<'a> {
    pub fn new(
        fs: &'a dyn Filesystem,
        verifier: &'a dyn IntegrityVerifier,
        process_env: &'a dyn ProcessEnv,
        options: PipelineOptions,
    ) -> Self {
        ConfigPipeline {
            fs,
            verifier,
            process_env,
            options,
        }
    }

    /// Steps 1–5: parse, resolve includes, merge templates, apply defaults,
    /// schema-validate. Returns a [`LoadedConfig`] ready for expansion.
    #[tracing::instrument(skip(self, config_bytes), fields(base_dir = %self.options.base_dir.display()))]
    pub fn load(&self, config_bytes: &[u8]) -> Result<LoadedConfig, Error> {
        tracing::debug!("parsing main document");
        let mut spec = parser::parse_main_document(config_bytes)?;

        let mut sources = Vec::with_capacity(spec.includes.len() + 1);
        let mut visited: HashSet<PathBuf> = HashSet::new();
        for include_path in &spec.includes {
            self.load_include(include_path, "<main>", &mut sources, &mut visited)?;
        }
        // The main document's own templates are appended last, so every
        // source is checked against the same merge pass (spec.md §4.9).
        sources.push(merge::TemplateSource {
            file_path: "<main>".to_string(),
            templates: spec.command_templates.clone(),
        });

        tracing::debug!(sources = sources.len(), "merging template sources");
        let templates = merge::merge_templates(&sources)?;

        defaults::apply_defaults(&mut spec);

        self.verify_attested_files(&spec.global)?;

        tracing::debug!("validating spec");
        validate::validate_spec(&spec)?;

        Ok(LoadedConfig { spec, templates })
    }

    /// Resolves, reads, and parses a single include in strict mode.
    ///
    /// `visited` guards against re-entering a path already seen along this
    /// load's include walk. Template files are parsed only for `version`
    /// and `command_templates` (spec.md §4.2), so a file cannot itself
    /// declare further includes; the only cycle the data model can produce
    /// is the same path appearing twice, which this guards against
    /// uniformly regardless of how the repetition arises.
    fn load_include(
        &self,
        include_path: &str,
        referenced_from: &str,
        sources: &mut Vec<merge::TemplateSource>,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<(), Error> {
        let resolved =
            path_resolver::resolve_include(include_path, &self.options.base_dir, referenced_from, self.fs)?;

        if !visited.insert(resolved.clone()) {
            return Err(Error::CircularInclude {
                path: resolved.display().to_string(),
                chain: vec![referenced_from.to_string(), resolved.display().to_string()],
            });
        }

        let bytes = self
            .verifier
            .verify_and_read(&resolved)
            .map_err(|source| Error::Integrity {
                path: resolved.display().to_string(),
                source,
            })?;

        let (_, file_templates) = parser::parse_template_file(&bytes, &resolved.display().to_string())?;

        sources.push(merge::TemplateSource {
            file_path: resolved.display().to_string(),
            templates: file_templates,
        });

        Ok(())
    }

    /// Attests every `global.verify_files` entry via the integrity
    /// verifier. `verify_standard_paths` is a hook for the embedding
    /// application's own standard-location policy; the core has no
    /// standard-location list of its own, so it only honors the explicit
    /// `verify_files` list here.
    fn verify_attested_files(&self, global: &GlobalSpec) -> Result<(), Error> {
        for entry in &global.verify_files {
            let path = PathBuf::from(&entry.path);
            self.verifier
                .verify_and_read(&path)
                .map_err(|source| Error::Integrity {
                    path: entry.path.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Runs the full pipeline: [`Self::load`] followed by steps 6–8
    /// (expand-global, expand-group, expand-command).
    #[tracing::instrument(skip(self, config_bytes))]
    pub fn run(&self, config_bytes: &[u8]) -> Result<Plan, Error> {
        let loaded = self.load(config_bytes)?;

        tracing::debug!("expanding global scope");
        let global_runtime = expand_global(&loaded.spec.global, &self.options.automatic_vars, self.process_env)?;

        let default_risk_level = loaded.spec.global.default_risk_level.unwrap_or(RiskLevel::DEFAULT);
        let default_timeout = loaded.spec.global.default_timeout.or(self.options.default_timeout);
        let default_output_size_limit = loaded
            .spec
            .global
            .default_output_size_limit
            .or(self.options.default_output_size_limit);

        let mut groups = Vec::with_capacity(loaded.spec.groups.len());
        for group_spec in &loaded.spec.groups {
            tracing::debug!(group = %group_spec.name, "expanding group scope");
            let group_runtime =
                expand_group(group_spec, &global_runtime, &self.options.automatic_vars, self.process_env)?;

            let mut commands = Vec::with_capacity(group_spec.commands.len());
            for command_spec in &group_spec.commands {
                tracing::trace!(command = %command_spec.name, "expanding command");
                let runtime_command = expand_command(
                    command_spec,
                    &loaded.templates,
                    &group_runtime,
                    self.process_env,
                    default_timeout,
                    default_output_size_limit,
                    default_risk_level,
                )?;
                commands.push(runtime_command);
            }

            groups.push(GroupPlan {
                runtime: group_runtime,
                commands,
            });
        }

        Ok(Plan {
            global: global_runtime,
            groups,
        })
    }
}

/// Step 6: import allowed process-env variables, then expand `%{...}` in
/// `vars` and `env` at the global level (spec.md §4.10).
pub fn expand_global(
    global: &GlobalSpec,
    automatic: &IndexMap<String, String>,
    process_env: &dyn ProcessEnv,
) -> Result<GlobalRuntime, Error> {
    let effective_allowed = global.env_allowed.clone();

    let import = allowlist::import_env(&global.env_import, &effective_allowed, process_env, "global")?;
    allowlist::check_no_conflict(&import.imported_names, &keys_only(&global.vars), "global.vars")?;

    let no_parent_vars = IndexMap::new();
    let parent = var_expand::ParentScope::new(&no_parent_vars, automatic);
    let mut expanded_vars = var_expand::expand_vars(
        &global.vars,
        &import.vars,
        &parent,
        &effective_allowed,
        process_env,
        "global.vars",
    )?;

    // Automatic variables (e.g. `__RUNNER_PID`) are the third link in the
    // `%{...}` scope chain (spec.md §4.7) and must be directly resolvable
    // by any string at any level, not just from inside another `vars`
    // binding — fold them in here so `expand_string`'s flat lookup finds
    // them too. An explicit `vars` entry of the same name wins.
    for (name, value) in automatic {
        expanded_vars.entry(name.clone()).or_insert_with(|| value.clone());
    }

    let no_parent_env = IndexMap::new();
    let expanded_env = var_expand::expand_env(
        &global.env,
        &expanded_vars,
        &no_parent_env,
        &effective_allowed,
        process_env,
        "global.env",
    )?;

    Ok(GlobalRuntime {
        expanded_vars,
        expanded_env,
        env_allowed: effective_allowed,
        env_import_vars: import.imported_names,
    })
}

/// Step 7: compute the effective allowlist, inherit and extend
/// `env_import_vars`, then expand `%{...}` in the group's own `vars` and
/// `env` on top of the global runtime (spec.md §4.10).
///
/// `expanded_vars` on the returned [`GroupRuntime`] is the *full visible
/// chain* — the global runtime's vars with this group's own overlaid — not
/// just this level's local bindings, because commands resolve `%{...}`
/// against the group runtime alone (spec.md §4.10 step 8 names only "the
/// group runtime", not "global runtime and group runtime").
pub fn expand_group(
    group: &GroupSpec,
    global: &GlobalRuntime,
    automatic: &IndexMap<String, String>,
    process_env: &dyn ProcessEnv,
) -> Result<GroupRuntime, Error> {
    let ctx = format!("group `{}`", group.name);
    let effective_allowed = allowlist::effective_allowlist(&global.env_allowed, group.env_allowed.as_deref());

    let import = allowlist::import_env(&group.env_import, &effective_allowed, process_env, &ctx)?;

    let mut env_import_vars = global.env_import_vars.clone();
    env_import_vars.extend(import.imported_names.iter().cloned());
    allowlist::check_no_conflict(&env_import_vars, &keys_only(&group.vars), &format!("{ctx}.vars"))?;

    let parent = var_expand::ParentScope::new(&global.expanded_vars, automatic);
    let local_vars = var_expand::expand_vars(
        &group.vars,
        &import.vars,
        &parent,
        &effective_allowed,
        process_env,
        &format!("{ctx}.vars"),
    )?;

    let mut expanded_vars = global.expanded_vars.clone();
    expanded_vars.extend(local_vars);

    let expanded_env = var_expand::expand_env(
        &group.env,
        &expanded_vars,
        &global.expanded_env,
        &effective_allowed,
        process_env,
        &format!("{ctx}.env"),
    )?;

    Ok(GroupRuntime {
        name: group.name.clone(),
        expanded_vars,
        expanded_env,
        env_allowed: effective_allowed,
        env_import_vars,
        cmd_allowed: group.cmd_allowed.clone(),
    })
}

/// Step 8: resolve a command's template (if any), expand its `${...}`
/// placeholders, then expand `%{...}` variable references in the resulting
/// `cmd`, `args`, `env_vars`, and `workdir` against the group runtime.
///
/// `default_timeout`, `default_output_size_limit`, and `default_risk_level`
/// are applied only when neither the command nor its template set a value
/// — the last materializes the "low" default spec.md §4.3 describes.
#[allow(clippy::too_many_arguments)]
pub fn expand_command(
    command: &CommandSpec,
    templates: &TemplateRegistry,
    group: &GroupRuntime,
    process_env: &dyn ProcessEnv,
    default_timeout: Option<i64>,
    default_output_size_limit: Option<i64>,
    default_risk_level: RiskLevel,
) -> Result<RuntimeCommand, Error> {
    let ctx = format!("group `{}` command `{}`", group.name, command.name);

    struct Materialized {
        cmd: String,
        args: Vec<String>,
        env: Vec<crate::spec::EnvBinding>,
        workdir: Option<String>,
        timeout: Option<i64>,
        output_size_limit: Option<i64>,
        risk_level: Option<RiskLevel>,
        template_name: String,
    }

    let materialized = match command.form() {
        CommandForm::Templated => {
            let template_name = command.template.clone().unwrap_or_default();
            let template = templates
                .get(&template_name)
                .ok_or_else(|| Error::TemplateNotFound {
                    command: command.name.clone(),
                    template: template_name.clone(),
                })?;
            let expanded = template_expand::expand_template(command, &template_name, template)?;
            Materialized {
                cmd: expanded.cmd,
                args: expanded.args,
                env: expanded.env,
                workdir: expanded.workdir,
                timeout: expanded.timeout,
                output_size_limit: expanded.output_size_limit,
                risk_level: expanded.risk_level,
                template_name,
            }
        }
        CommandForm::Direct => Materialized {
            cmd: command.cmd.clone().unwrap_or_default(),
            args: command.args.clone(),
            env: command.env_vars.clone(),
            workdir: command.workdir.clone(),
            timeout: command.timeout,
            output_size_limit: command.output_size_limit,
            risk_level: command.risk_level,
            template_name: String::new(),
        },
    };

    let expanded_cmd = var_expand::expand_string(&materialized.cmd, &group.expanded_vars, &ctx)?;
    if expanded_cmd.trim().is_empty() {
        return Err(Error::TemplateCmdNotSingleValue {
            command: command.name.clone(),
            template: materialized.template_name,
            produced: 0,
        });
    }

    let mut expanded_args = Vec::with_capacity(materialized.args.len());
    for (i, raw) in materialized.args.iter().enumerate() {
        let arg_ctx = format!("{ctx} args[{i}]");
        expanded_args.push(var_expand::expand_string(raw, &group.expanded_vars, &arg_ctx)?);
    }

    let expanded_workdir = materialized
        .workdir
        .as_deref()
        .map(|w| var_expand::expand_string(w, &group.expanded_vars, &format!("{ctx} workdir")))
        .transpose()?;

    let expanded_output_file = command
        .output_file
        .as_deref()
        .map(|o| var_expand::expand_string(o, &group.expanded_vars, &format!("{ctx} output_file")))
        .transpose()?;

    let expanded_env = var_expand::expand_env(
        &materialized.env,
        &group.expanded_vars,
        &group.expanded_env,
        &group.env_allowed,
        process_env,
        &format!("{ctx} env_vars"),
    )?;

    Ok(RuntimeCommand {
        name: command.name.clone(),
        expanded_cmd,
        expanded_args,
        expanded_env,
        expanded_workdir,
        expanded_output_file,
        effective_timeout: materialized.timeout.or(default_timeout),
        effective_output_size_limit: materialized.output_size_limit.or(default_output_size_limit),
        effective_risk_level: materialized.risk_level.unwrap_or(default_risk_level),
    })
}

/// Adapts a `vars`-shaped map's keys into the `IndexMap<String, String>`
/// shape [`allowlist::check_no_conflict`] expects (it only ever reads the
/// keys; the values are irrelevant to the conflict check).
fn keys_only(vars: &IndexMap<String, crate::value::Value>) -> IndexMap<String, String> {
    vars.keys().map(|k| (k.clone(), String::new())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{CommandSpec, EnvBinding, GroupSpec};
    use crate::value::Value;
    use std::path::Path;

    struct FakeEnv(IndexMap<String, String>);

    impl ProcessEnv for FakeEnv {
        fn get(&self, name: &str) -> Option<String> {
            self.0.get(name).cloned()
        }
    }

    fn no_automatic() -> IndexMap<String, String> {
        IndexMap::new()
    }

    #[test]
    fn expand_global_imports_and_expands_vars() {
        let mut process = IndexMap::new();
        process.insert("PATH".to_string(), "/usr/bin".to_string());
        let env = FakeEnv(process);

        let mut global = GlobalSpec::default();
        global.env_allowed = vec!["PATH".to_string()];
        global
            .vars
            .insert("greeting".to_string(), Value::String("hello".to_string()));

        let runtime = expand_global(&global, &no_automatic(), &env).unwrap();
        assert_eq!(runtime.expanded_vars.get("greeting").unwrap(), "hello");
    }

    #[test]
    fn expand_global_folds_in_automatic_vars() {
        let env = FakeEnv(IndexMap::new());
        let global = GlobalSpec::default();
        let automatic = IndexMap::from([("__RUNNER_PID".to_string(), "4242".to_string())]);

        let runtime = expand_global(&global, &automatic, &env).unwrap();
        assert_eq!(runtime.expanded_vars.get("__RUNNER_PID").unwrap(), "4242");
    }

    #[test]
    fn expand_command_resolves_automatic_var_directly_in_args() {
        let env = FakeEnv(IndexMap::new());
        let global = GlobalSpec::default();
        let automatic = IndexMap::from([("__RUNNER_PID".to_string(), "4242".to_string())]);
        let global_runtime = expand_global(&global, &automatic, &env).unwrap();

        let group_spec = GroupSpec {
            name: "g".to_string(),
            env_allowed: None,
            env_import: vec![],
            vars: IndexMap::new(),
            env: vec![],
            cmd_allowed: None,
            commands: vec![],
        };
        let group_runtime = expand_group(&group_spec, &global_runtime, &automatic, &env).unwrap();

        let command = CommandSpec {
            name: "c".to_string(),
            cmd: Some("runner".to_string()),
            args: vec!["--pid=%{__RUNNER_PID}".to_string()],
            ..Default::default()
        };

        let templates = TemplateRegistry::default();
        let runtime = expand_command(&command, &templates, &group_runtime, &env, None, None, RiskLevel::Low).unwrap();
        assert_eq!(runtime.expanded_args, vec!["--pid=4242".to_string()]);
    }

    #[test]
    fn expand_group_inherits_global_vars() {
        let env = FakeEnv(IndexMap::new());
        let global = GlobalRuntime {
            expanded_vars: IndexMap::from([("base".to_string(), "/srv".to_string())]),
            expanded_env: IndexMap::new(),
            env_allowed: vec![],
            env_import_vars: HashSet::new(),
        };

        let mut group = GroupSpec {
            name: "g".to_string(),
            env_allowed: None,
            env_import: vec![],
            vars: IndexMap::new(),
            env: vec![],
            cmd_allowed: None,
            commands: vec![],
        };
        group
            .vars
            .insert("full".to_string(), Value::String("%{base}/data".to_string()));

        let runtime = expand_group(&group, &global, &no_automatic(), &env).unwrap();
        assert_eq!(runtime.expanded_vars.get("base").unwrap(), "/srv");
        assert_eq!(runtime.expanded_vars.get("full").unwrap(), "/srv/data");
    }

    #[test]
    fn expand_command_direct_form_resolves_vars() {
        let env = FakeEnv(IndexMap::new());
        let group = GroupRuntime {
            name: "g".to_string(),
            expanded_vars: IndexMap::from([("target".to_string(), "/data".to_string())]),
            expanded_env: IndexMap::new(),
            env_allowed: vec![],
            env_import_vars: HashSet::new(),
            cmd_allowed: None,
        };

        let command = CommandSpec {
            name: "c".to_string(),
            cmd: Some("restic".to_string()),
            args: vec!["backup".to_string(), "%{target}".to_string()],
            env_vars: vec![EnvBinding {
                key: "RESTIC_REPOSITORY".to_string(),
                value: "%{target}/repo".to_string(),
            }],
            ..Default::default()
        };

        let templates = TemplateRegistry::default();
        let runtime = expand_command(&command, &templates, &group, &env, None, None, RiskLevel::Low).unwrap();

        assert_eq!(runtime.expanded_cmd, "restic");
        assert_eq!(runtime.expanded_args, vec!["backup".to_string(), "/data".to_string()]);
        assert_eq!(
            runtime.expanded_env.get("RESTIC_REPOSITORY").unwrap(),
            "/data/repo"
        );
        assert_eq!(runtime.effective_risk_level, RiskLevel::Low);
    }

    #[test]
    fn expand_command_missing_template_is_an_error() {
        let env = FakeEnv(IndexMap::new());
        let group = GroupRuntime {
            name: "g".to_string(),
            expanded_vars: IndexMap::new(),
            expanded_env: IndexMap::new(),
            env_allowed: vec![],
            env_import_vars: HashSet::new(),
            cmd_allowed: None,
        };

        let command = CommandSpec {
            name: "c".to_string(),
            template: Some("missing".to_string()),
            ..Default::default()
        };

        let templates = TemplateRegistry::default();
        let err = expand_command(&command, &templates, &group, &env, None, None, RiskLevel::Low).unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound { .. }));
    }

    struct NoFiles;
    impl Filesystem for NoFiles {
        fn file_exists(&self, _path: &Path) -> bool {
            false
        }
        fn temp_dir(&self) -> PathBuf {
            PathBuf::from("/tmp")
        }
    }

    struct NoVerify;
    impl IntegrityVerifier for NoVerify {
        fn verify_and_read(&self, path: &Path) -> Result<Vec<u8>, crate::collab::VerifyError> {
            Err(crate::collab::VerifyError::HashMissing {
                path: path.display().to_string(),
            })
        }
    }

    #[test]
    fn load_rejects_missing_include() {
        let fs = NoFiles;
        let verifier = NoVerify;
        let env = FakeEnv(IndexMap::new());
        let options = PipelineOptions {
            base_dir: PathBuf::from("/etc/runner"),
            ..Default::default()
        };
        let pipeline = ConfigPipeline::new(&fs, &verifier, &env, options);

        let doc = br#"
            includes = ["templates.toml"]
        "#;
        let err = pipeline.load(doc).unwrap_err();
        assert!(matches!(err, Error::IncludedFileNotFound { .. }));
    }

    #[test]
    fn run_produces_a_plan_for_a_direct_command() {
        let fs = NoFiles;
        let verifier = NoVerify;
        let env = FakeEnv(IndexMap::new());
        let options = PipelineOptions {
            base_dir: PathBuf::from("/etc/runner"),
            ..Default::default()
        };
        let pipeline = ConfigPipeline::new(&fs, &verifier, &env, options);

        let doc = br#"
            version = "1"

            [[groups]]
            name = "backups"

            [[groups.commands]]
            name = "nightly"
            cmd = "restic"
            args = ["backup", "/data"]
        "#;

        let plan = pipeline.run(doc).unwrap();
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].commands.len(), 1);
        assert_eq!(plan.groups[0].commands[0].expanded_cmd, "restic");
    }
}
