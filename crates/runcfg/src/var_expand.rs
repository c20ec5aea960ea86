//! The `%{name}` variable expansion engine (spec.md §4.7).
//!
//! Two passes run over a level's raw text, always after [`crate::template_expand`]
//! has already resolved every `${...}` placeholder:
//!
//! 1. `vars` are resolved against each other by iterative substitution to a
//!    fixpoint (an open question in spec.md §9, settled here), then against
//!    the enclosing scope and the automatic-variable table.
//! 2. `env` entries are resolved the same way, but never reference each
//!    other — only `vars` at the current or an enclosing level.
//!
//! Self-reference (`NAME=...%{NAME}...`) is the one place where a binding's
//! own name resolves to something other than itself: the *next* enclosing
//! level's value for that name, or the process environment if the name is
//! in the effective allowlist and no enclosing level defines it. This is
//! what lets a group prepend a directory to an inherited `PATH`.

use indexmap::{IndexMap, IndexSet};

use crate::collab::ProcessEnv;
use crate::error::Error;
use crate::ident::is_valid_identifier;
use crate::spec::EnvBinding;
use crate::value::Value;

/// A single `%{name}` occurrence found in a string.
struct VarRef {
    name: String,
    start: usize,
    end: usize,
}

/// Parses every `%{...}` occurrence in `text`, in input order.
///
/// Unlike [`crate::placeholder`], there is no modifier grammar here — just
/// a bare identifier. `\%` and `\\` are skipped as escape units up front so
/// an escaped `\%{` is never mistaken for a reference.
fn parse_var_refs(text: &str, context: &str) -> Result<Vec<VarRef>, Error> {
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && matches!(bytes.get(i + 1), Some(&b'%') | Some(&b'\\')) {
            i += 2;
            continue;
        }

        if bytes[i] == b'%' && bytes.get(i + 1) == Some(&b'{') {
            let body_start = i + 2;
            let Some(rel_close) = text[body_start..].find('}') else {
                return Err(Error::UnresolvedVariable {
                    context: context.to_string(),
                    name: text[body_start..].to_string(),
                });
            };
            let body_end = body_start + rel_close;
            let name = &text[body_start..body_end];

            if name.is_empty() || !is_valid_identifier(name) {
                return Err(Error::UnresolvedVariable {
                    context: context.to_string(),
                    name: name.to_string(),
                });
            }

            out.push(VarRef {
                name: name.to_string(),
                start: i,
                end: body_end + 1,
            });
            i = body_end + 1;
        } else {
            i += 1;
        }
    }

    Ok(out)
}

/// Substitutes every `%{name}` in `text` using `resolve`, then unescapes
/// `\%` / `\\` in the literal remainder.
fn substitute(
    text: &str,
    context: &str,
    resolve: &mut dyn FnMut(&str) -> Result<String, Error>,
) -> Result<String, Error> {
    let refs = parse_var_refs(text, context)?;
    if refs.is_empty() {
        return Ok(crate::escape::unescape(text, '%'));
    }

    let mut out = String::new();
    let mut cursor = 0;
    for r in &refs {
        out.push_str(&crate::escape::unescape(&text[cursor..r.start], '%'));
        out.push_str(&resolve(&r.name)?);
        cursor = r.end;
    }
    out.push_str(&crate::escape::unescape(&text[cursor..], '%'));
    Ok(out)
}

/// The scope chain a single level's expansion resolves against: already
/// fully-resolved parent vars, and the automatic variables injected by the
/// runtime (e.g. `__RUNNER_PID`).
pub struct ParentScope<'a> {
    pub vars: &'a IndexMap<String, String>,
    pub automatic: &'a IndexMap<String, String>,
}

impl<'a> ParentScope<'a> {
    /// A scope chain with no enclosing vars at all (used for the global
    /// level, which has no level above it but process env).
    pub fn new(vars: &'a IndexMap<String, String>, automatic: &'a IndexMap<String, String>) -> Self {
        ParentScope { vars, automatic }
    }

    fn lookup(&self, name: &str) -> Option<&String> {
        self.vars.get(name)
    }
}

/// Resolves `%{name}` against the process environment if `name` is in the
/// effective allowlist, per the self-reference fallback in spec.md §4.7.
fn process_env_fallback(
    name: &str,
    effective_allowlist: &[String],
    process_env: &dyn ProcessEnv,
) -> Option<String> {
    if effective_allowlist.iter().any(|allowed| allowed == name) {
        Some(process_env.get(name).unwrap_or_default())
    } else {
        None
    }
}

/// Expands `vars` against each other to a fixpoint, then against `parent`
/// and the process environment (for self-reference only). Returns the
/// fully-resolved local-level map (not merged with the parent).
///
/// `seed` carries names already resolved at this same level before `vars`
/// expansion begins — in practice, the level's `env_import` bindings,
/// which are plain process-environment values and never contain `%{...}`
/// themselves. [`crate::validate`]'s conflict check guarantees `seed` and
/// `raw` never share a name, so there is no ambiguity seeding `resolved`
/// with it up front.
pub fn expand_vars(
    raw: &IndexMap<String, Value>,
    seed: &IndexMap<String, String>,
    parent: &ParentScope<'_>,
    effective_allowlist: &[String],
    process_env: &dyn ProcessEnv,
    context: &str,
) -> Result<IndexMap<String, String>, Error> {
    // Flatten array-valued vars to a single string (space-joined) before
    // `%{...}` expansion; the document format only allows vars to be a
    // plain string or string array, and expansion operates on text.
    let raw_text: IndexMap<String, String> = raw
        .iter()
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s.clone(),
                Value::Array(items) => items.join(" "),
            };
            (k.clone(), text)
        })
        .collect();

    let mut resolved: IndexMap<String, String> = seed.clone();
    let mut pending: IndexSet<String> = raw_text.keys().cloned().collect();

    loop {
        let before = pending.len();
        let round: Vec<String> = pending.iter().cloned().collect();
        for name in round {
            let text = &raw_text[&name];
            let mut blocked_on_unresolved_local = false;

            let result = substitute(text, context, &mut |ref_name: &str| {
                if ref_name == name {
                    // Self-reference: next enclosing level, else process env.
                    if let Some(v) = parent.lookup(ref_name) {
                        return Ok(v.clone());
                    }
                    if let Some(v) = process_env_fallback(ref_name, effective_allowlist, process_env) {
                        return Ok(v);
                    }
                    return Err(Error::UnresolvedVariable {
                        context: context.to_string(),
                        name: ref_name.to_string(),
                    });
                }

                if let Some(v) = resolved.get(ref_name) {
                    return Ok(v.clone());
                }
                if raw_text.contains_key(ref_name) {
                    // Another local var not yet resolved this round; retry later.
                    blocked_on_unresolved_local = true;
                    return Ok(String::new());
                }
                if let Some(v) = parent.lookup(ref_name) {
                    return Ok(v.clone());
                }
                if let Some(v) = parent.automatic.get(ref_name) {
                    return Ok(v.clone());
                }
                Err(Error::UnresolvedVariable {
                    context: context.to_string(),
                    name: ref_name.to_string(),
                })
            });

            if blocked_on_unresolved_local {
                continue;
            }

            resolved.insert(name.clone(), result?);
            pending.shift_remove(&name);
        }

        if pending.is_empty() {
            break;
        }
        if pending.len() == before {
            let name = pending.iter().next().cloned().unwrap_or_default();
            return Err(Error::VariableCycle {
                context: context.to_string(),
                name,
            });
        }
    }

    Ok(resolved)
}

/// Expands `env` entries against `current_vars` (this level's fully
/// resolved `vars`, parent's vars are reachable transitively since
/// `current_vars` already folds them in) and `parent_env` (for
/// self-reference only, mirroring [`expand_vars`]).
///
/// Unlike `vars`, env entries never reference each other — only `vars`.
pub fn expand_env(
    raw: &[EnvBinding],
    current_vars: &IndexMap<String, String>,
    parent_env: &IndexMap<String, String>,
    effective_allowlist: &[String],
    process_env: &dyn ProcessEnv,
    context: &str,
) -> Result<IndexMap<String, String>, Error> {
    let mut out = IndexMap::new();

    for binding in raw {
        let key = binding.key.clone();
        let value = substitute(&binding.value, context, &mut |ref_name: &str| {
            if ref_name == key {
                if let Some(v) = parent_env.get(ref_name) {
                    return Ok(v.clone());
                }
                if let Some(v) = process_env_fallback(ref_name, effective_allowlist, process_env) {
                    return Ok(v);
                }
                return Err(Error::UnresolvedVariable {
                    context: context.to_string(),
                    name: ref_name.to_string(),
                });
            }
            if let Some(v) = current_vars.get(ref_name) {
                return Ok(v.clone());
            }
            if let Some(v) = parent_env.get(ref_name) {
                return Ok(v.clone());
            }
            Err(Error::UnresolvedVariable {
                context: context.to_string(),
                name: ref_name.to_string(),
            })
        })?;

        if out.insert(key.clone(), value).is_some() {
            return Err(Error::EnvVarDuplicateKey { context: context.to_string(), key });
        }
    }

    Ok(out)
}

/// Expands a single plain string (e.g. a command's `cmd`, `args[i]`,
/// `workdir`) against a level's resolved `vars`. No self-reference applies
/// here since the string is not itself a named binding.
pub fn expand_string(
    text: &str,
    vars: &IndexMap<String, String>,
    context: &str,
) -> Result<String, Error> {
    substitute(text, context, &mut |name: &str| {
        vars.get(name).cloned().ok_or_else(|| Error::UnresolvedVariable {
            context: context.to_string(),
            name: name.to_string(),
        })
    })
}
