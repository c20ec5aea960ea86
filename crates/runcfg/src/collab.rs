//! External collaborators consumed by the pipeline as trait objects.
//!
//! The pipeline never touches the filesystem, a hash store, or the process
//! environment directly except through these seams. Production callers
//! supply hardened implementations (symlink/TOCTOU-safe reads, a real
//! SHA-256 attestation store); [`crate::testutil`] supplies plain ones for
//! tests.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

/// Errors from the integrity verifier collaborator.
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum VerifyError {
    #[error("no recorded hash for {path}")]
    #[diagnostic(code(runcfg::verify::hash_missing))]
    HashMissing { path: String },

    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    #[diagnostic(code(runcfg::verify::hash_mismatch))]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("failed to read {path}: {message}")]
    #[diagnostic(code(runcfg::verify::io))]
    Io { path: String, message: String },
}

/// Minimal filesystem abstraction. The actual safe-read primitive lives on
/// [`IntegrityVerifier`]; this trait only answers existence/location
/// questions the path resolver needs.
pub trait Filesystem {
    /// Returns `true` if `path` exists and is readable as a regular file.
    fn file_exists(&self, path: &Path) -> bool;

    /// A directory suitable for scratch files, if the caller needs one.
    fn temp_dir(&self) -> PathBuf;
}

/// Reads a file and attests that its content matches a previously recorded
/// SHA-256 digest, atomically with respect to concurrent writers (i.e. the
/// digest is computed over the exact bytes returned).
pub trait IntegrityVerifier {
    /// Reads and verifies `path`, returning its bytes on success.
    fn verify_and_read(&self, path: &Path) -> Result<Vec<u8>, VerifyError>;
}

/// Accessor for the host process environment, injected so the pipeline
/// stays pure and testable.
pub trait ProcessEnv {
    /// Returns the value of the named process-environment variable, if set.
    fn get(&self, name: &str) -> Option<String>;
}
