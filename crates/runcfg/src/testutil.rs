//! Plain, in-memory/real-filesystem collaborator implementations for tests.
//!
//! These are deliberately unhardened: [`RealFilesystem`] does no symlink or
//! traversal checks, and [`Sha256Verifier`] trusts whatever hash is recorded
//! rather than pinning to a known-good digest source. An embedding
//! application's production collaborators are expected to do more; this
//! module exists only so the pipeline's own tests (and downstream
//! integration tests, via the `testutil` feature) have something real to
//! drive it with.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::collab::{Filesystem, IntegrityVerifier, ProcessEnv, VerifyError};

/// Delegates straight to `std::fs` and `std::env::temp_dir`.
#[derive(Debug, Default)]
pub struct RealFilesystem;

impl Filesystem for RealFilesystem {
    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn temp_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }
}

/// Reads a file and checks its SHA-256 digest against a caller-supplied
/// table of `path -> expected hex digest`. A path absent from the table is
/// read without verification, matching `VerifyFileEntry { hash: None }`'s
/// documented "unverifiable" semantics.
#[derive(Debug, Default)]
pub struct Sha256Verifier {
    expected: HashMap<PathBuf, String>,
}

impl Sha256Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expected_hash(mut self, path: impl Into<PathBuf>, hex_digest: impl Into<String>) -> Self {
        self.expected.insert(path.into(), hex_digest.into());
        self
    }
}

impl IntegrityVerifier for Sha256Verifier {
    fn verify_and_read(&self, path: &Path) -> Result<Vec<u8>, VerifyError> {
        let bytes = fs::read(path).map_err(|e| VerifyError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        if let Some(expected) = self.expected.get(path) {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            let actual = hex_encode(&hasher.finalize());
            if &actual != expected {
                return Err(VerifyError::HashMismatch {
                    path: path.display().to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(bytes)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// An in-memory process environment, for tests that want deterministic
/// `env_import`/self-reference-fallback behavior without touching the real
/// process environment.
#[derive(Debug, Default)]
pub struct MapProcessEnv {
    vars: Mutex<HashMap<String, String>>,
}

impl MapProcessEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars
            .lock()
            .expect("testutil MapProcessEnv mutex poisoned")
            .insert(key.into(), value.into());
        self
    }
}

impl ProcessEnv for MapProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        self.vars
            .lock()
            .expect("testutil MapProcessEnv mutex poisoned")
            .get(name)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn real_filesystem_reports_existing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hello").unwrap();
        let fs = RealFilesystem;
        assert!(fs.file_exists(file.path()));
        assert!(!fs.file_exists(Path::new("/no/such/path/here")));
    }

    #[test]
    fn sha256_verifier_accepts_matching_digest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"payload").unwrap();

        let mut hasher = Sha256::new();
        hasher.update(b"payload");
        let digest = hex_encode(&hasher.finalize());

        let verifier = Sha256Verifier::new().with_expected_hash(file.path(), digest);
        let bytes = verifier.verify_and_read(file.path()).unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[test]
    fn sha256_verifier_rejects_mismatched_digest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"payload").unwrap();

        let verifier = Sha256Verifier::new().with_expected_hash(file.path(), "deadbeef");
        let err = verifier.verify_and_read(file.path()).unwrap_err();
        assert!(matches!(err, VerifyError::HashMismatch { .. }));
    }

    #[test]
    fn map_process_env_returns_configured_values() {
        let env = MapProcessEnv::new().with_var("PATH", "/usr/bin");
        assert_eq!(env.get("PATH").unwrap(), "/usr/bin");
        assert!(env.get("MISSING").is_none());
    }
}
