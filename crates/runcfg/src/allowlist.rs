//! Allowlist resolution and process-environment import (spec.md §4.8).
//!
//! Two small, pure computations live here:
//!
//! - [`effective_allowlist`]: a group's allowlist either inherits the
//!   global one (`None`), rejects everything (`Some(vec![])`), or overrides
//!   it outright (`Some(populated)`).
//! - [`import_env`]: turns `local=SOURCE` bindings into local variables
//!   sourced from the process environment, and tracks which local names
//!   came from an import so [`crate::validate`]'s sibling conflict check —
//!   run by the caller against `vars` — has something to check against.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::collab::ProcessEnv;
use crate::error::Error;
use crate::spec::EnvImportBinding;

/// Computes the effective allowlist for a group given the global one.
///
/// `group_allowed` is `None` when the group declares no `env_allowed` key
/// at all (inherit), `Some(vec![])` when it declares an empty list (reject
/// all imports), or `Some(populated)` to override.
pub fn effective_allowlist(global_allowed: &[String], group_allowed: Option<&[String]>) -> Vec<String> {
    match group_allowed {
        None => global_allowed.to_vec(),
        Some(list) => list.to_vec(),
    }
}

/// The result of importing a level's `env_import` bindings: the local
/// variables they bind, plus the set of local names that originated from
/// an import (for conflict detection against `vars`, see spec.md §3).
pub struct ImportResult {
    pub vars: IndexMap<String, String>,
    pub imported_names: HashSet<String>,
}

/// Imports `bindings` from the process environment, checking each source
/// name against `effective_allowlist`.
///
/// A source not in the allowlist is `EnvImportNotAllowed`; a source not
/// set in the process environment binds the empty string (spec.md §4.8).
pub fn import_env(
    bindings: &[EnvImportBinding],
    effective_allowlist: &[String],
    process_env: &dyn ProcessEnv,
    context: &str,
) -> Result<ImportResult, Error> {
    let mut vars = IndexMap::new();
    let mut imported_names = HashSet::new();

    for binding in bindings {
        if !effective_allowlist.iter().any(|allowed| allowed == &binding.source) {
            return Err(Error::EnvImportNotAllowed {
                context: context.to_string(),
                source_var: binding.source.clone(),
            });
        }

        let value = process_env.get(&binding.source).unwrap_or_default();
        vars.insert(binding.local.clone(), value);
        imported_names.insert(binding.local.clone());
    }

    Ok(ImportResult { vars, imported_names })
}

/// Checks that no name in `imported_names` (this level's own plus every
/// ancestor's) also appears in `vars` at this level, per spec.md §3: a
/// name bound by `env_import` anywhere at or above a level may not also be
/// defined in `vars` at that level or any descendant.
pub fn check_no_conflict(
    imported_names: &HashSet<String>,
    vars: &IndexMap<String, String>,
    context: &str,
) -> Result<(), Error> {
    for name in vars.keys() {
        if imported_names.contains(name) {
            return Err(Error::EnvImportVarsConflict {
                context: context.to_string(),
                name: name.clone(),
            });
        }
    }
    Ok(())
}
