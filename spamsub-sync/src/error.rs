//! Error types for spamsub-sync.

use std::path::PathBuf;

use thiserror::Error;

use spamsub_core::{Address, ConfigError, ValidationError};
use spamsub_renderer::RenderError;

/// All errors that can arise from sync and publication operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local working copy could not be brought to a known state.
    #[error("repository mirror unavailable: `git {command}` failed: {detail}")]
    MirrorUnavailable { command: String, detail: String },

    /// The artifact could not be written into the working copy.
    #[error("failed to write artifact at {path}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Staging, committing or pushing an integration branch failed.
    #[error("failed to push {branch}: {detail}")]
    Push { branch: String, detail: String },

    /// The hosting API refused or never answered the pull-request call.
    #[error("pull request gateway error: {message}")]
    Gateway { status: Option<u16>, message: String },

    /// Store invariant: normalized addresses are unique.
    #[error("address {0} is already recorded")]
    DuplicateAddress(Address),

    #[error("invalid address: {0}")]
    Validation(#[from] ValidationError),

    #[error("record store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
