//! Resolves an `includes` entry (relative or absolute) against a base
//! directory into a canonical absolute path.

use std::path::{Path, PathBuf};

use crate::collab::Filesystem;
use crate::error::Error;

/// Resolves `include_path` against `base_dir`, erroring if the result does
/// not exist according to `fs`.
///
/// Absolute paths are used as-is; relative paths are joined to `base_dir`
/// and lexically normalized (`.`/`..` are resolved without touching the
/// filesystem beyond the final existence check). No symlink-traversal
/// policy is enforced here — the integrity verifier owns safe-read
/// semantics.
pub fn resolve_include(
    include_path: &str,
    base_dir: &Path,
    referenced_from: &str,
    fs: &dyn Filesystem,
) -> Result<PathBuf, Error> {
    let joined = if Path::new(include_path).is_absolute() {
        PathBuf::from(include_path)
    } else {
        base_dir.join(include_path)
    };

    let resolved = lexically_normalize(&joined);

    if !fs.file_exists(&resolved) {
        return Err(Error::IncludedFileNotFound {
            include_path: include_path.to_string(),
            resolved_path: resolved.display().to_string(),
            referenced_from: referenced_from.to_string(),
        });
    }

    Ok(resolved)
}

/// Resolves `.` and `..` components without touching the filesystem.
fn lexically_normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct FakeFs(HashSet<PathBuf>);

    impl Filesystem for FakeFs {
        fn file_exists(&self, path: &Path) -> bool {
            self.0.contains(path)
        }

        fn temp_dir(&self) -> PathBuf {
            PathBuf::from("/tmp")
        }
    }

    #[test]
    fn resolves_relative_path_against_base() {
        let base = PathBuf::from("/etc/runner");
        let fs = FakeFs(HashSet::from([PathBuf::from("/etc/runner/templates.toml")]));
        let resolved = resolve_include("templates.toml", &base, "main.toml", &fs).unwrap();
        assert_eq!(resolved, PathBuf::from("/etc/runner/templates.toml"));
    }

    #[test]
    fn normalizes_dot_dot_components() {
        let base = PathBuf::from("/etc/runner/sub");
        let fs = FakeFs(HashSet::from([PathBuf::from("/etc/runner/templates.toml")]));
        let resolved = resolve_include("../templates.toml", &base, "main.toml", &fs).unwrap();
        assert_eq!(resolved, PathBuf::from("/etc/runner/templates.toml"));
    }

    #[test]
    fn absolute_path_is_used_as_is() {
        let base = PathBuf::from("/etc/runner");
        let fs = FakeFs(HashSet::from([PathBuf::from("/opt/templates.toml")]));
        let resolved = resolve_include("/opt/templates.toml", &base, "main.toml", &fs).unwrap();
        assert_eq!(resolved, PathBuf::from("/opt/templates.toml"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let base = PathBuf::from("/etc/runner");
        let fs = FakeFs(HashSet::new());
        let err = resolve_include("templates.toml", &base, "main.toml", &fs).unwrap_err();
        assert!(matches!(err, Error::IncludedFileNotFound { .. }));
    }
}
