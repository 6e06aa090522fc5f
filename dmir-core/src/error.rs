//! Error taxonomy shared by every stage of a mirror run.

use std::path::PathBuf;

/// Errors produced while resolving, listing or transferring remote entries.
///
/// Whether an error aborts the whole run or is recorded against a single
/// entry is decided by [`MirrorError::is_fatal`].
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("not a folder: {0}")]
    NotAFolder(String),

    #[error("invalid folder reference: {0:?}")]
    InvalidReference(String),

    #[error("authorization failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {message}")]
    Transport { message: String, fatal: bool },

    #[error("page token {token:?} was not issued for folder {parent}")]
    InvalidPageToken { parent: String, token: String },

    #[error("path conflict: {0:?} exists and is not a regular file")]
    PathConflict(PathBuf),

    #[error("filesystem error at {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transfer of {id} failed after {bytes_written} bytes: {source}")]
    Transfer {
        id: String,
        bytes_written: u64,
        #[source]
        source: Box<MirrorError>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MirrorError {
    /// Recoverable transport failure (one request, one folder or one file).
    pub fn transport(message: impl Into<String>) -> Self {
        MirrorError::Transport { message: message.into(), fatal: false }
    }

    /// Transport failure the store gave up on; aborts the run.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        MirrorError::Transport { message: message.into(), fatal: true }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MirrorError::Filesystem { path: path.into(), source }
    }

    /// True when the run must unwind instead of recording the failure.
    pub fn is_fatal(&self) -> bool {
        match self {
            MirrorError::NotAFolder(_)
            | MirrorError::InvalidReference(_)
            | MirrorError::Auth(_)
            | MirrorError::Config(_)
            | MirrorError::Cancelled => true,
            MirrorError::Transport { fatal, .. } => *fatal,
            MirrorError::Transfer { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Bytes already on disk when a transfer failed, zero otherwise.
    pub fn bytes_written(&self) -> u64 {
        match self {
            MirrorError::Transfer { bytes_written, .. } => *bytes_written,
            _ => 0,
        }
    }
}
