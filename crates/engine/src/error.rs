//! The engine's error taxonomy.

use std::fmt;
use std::path::PathBuf;

use cowsync_btrfs::{CowError, ParseError};
use cowsync_transport::TransportError;
use thiserror::Error;

/// Kinds of pre-flight filesystem failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsErrorKind {
    /// The target file already exists and will not be overwritten.
    FileExists,
    /// The target does not exist.
    NotFound,
    /// The target exists but is not a directory.
    NotADirectory,
}

impl fmt::Display for FsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FileExists => "file already exists",
            Self::NotFound => "no such file or directory",
            Self::NotADirectory => "not a directory",
        })
    }
}

/// Errors surfaced by roots, the planner, and the executor.
///
/// Everything except a per-plan stage failure is fatal: the executor
/// aborts before starting another flow. Stage failures live in
/// [`TransferResult`](crate::TransferResult) instead, because one broken
/// transfer must not take the remaining plans down with it.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid endpoint or unsupported operation combination.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `btrfs` produced output this tool cannot interpret.
    #[error("unparseable btrfs output: {0}")]
    Protocol(#[from] ParseError),

    /// The reported subvolume relationships contradict themselves.
    #[error("inconsistent subvolume data: {0}")]
    Consistency(#[from] CowError),

    /// A helper command (listing, mkdir) exited nonzero.
    #[error("`{command}` failed: {stderr}")]
    CommandFailed {
        /// The rendered command line.
        command: String,
        /// Trimmed stderr of the failed command.
        stderr: String,
    },

    /// Process or pipeline plumbing failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A pre-flight filesystem check failed.
    #[error("{kind}: `{path}`")]
    Filesystem {
        /// What the check found.
        kind: FsErrorKind,
        /// The offending path.
        path: PathBuf,
    },

    /// The run was interrupted.
    #[error("interrupted")]
    Cancelled,
}
