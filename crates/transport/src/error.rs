//! Error type shared by the transport crate.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while composing or running command pipelines.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A pipeline was constructed with no stages.
    #[error("pipeline must contain at least one command")]
    EmptyPipeline,

    /// A multi-stage local pipeline was handed to SSH wrapping.
    ///
    /// Local pipelines are wired with OS pipes on this machine; a remote
    /// pipeline is a single quoted shell command. Wrap each stage
    /// individually, or compose the stages with
    /// [`SshTarget::wrap_shell_stages`](crate::SshTarget::wrap_shell_stages).
    #[error("cannot wrap a locally piped pipeline for ssh; wrap stages individually")]
    PipelineOverSsh,

    /// Starting a child process failed.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// Program of the stage that failed to start.
        program: String,
        /// Underlying OS error.
        source: io::Error,
    },

    /// A flow sink refused to overwrite an existing file.
    #[error("refusing to overwrite existing file `{0}`")]
    SinkExists(PathBuf),

    /// Any other I/O failure during pipeline execution.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
