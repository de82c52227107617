//! Centralized error types for coapps.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by a [`DocumentStore`](crate::store::DocumentStore).
#[derive(Error, Debug)]
pub enum StoreError {
    /// The document (or database) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The supplied revision is not the document's current revision.
    #[error("Revision conflict on '{0}'")]
    Conflict(String),

    /// The store answered with an unexpected HTTP status.
    #[error("Store returned {status}: {reason}")]
    Http { status: u16, reason: String },

    /// The request never produced a response (DNS, TLS, timeout...).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reading the attachment body failed while streaming it.
    #[error("I/O error while streaming: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// All errors produced by the coapps library.
///
/// The first group aborts a whole batch, the second is scoped to one job.
#[derive(Error, Debug)]
pub enum DeployError {
    /// The deployment manifest could not be read or parsed.
    #[error("Cannot read config '{path}': {reason}")]
    ConfigRead { path: PathBuf, reason: String },

    /// The document store could not be reached.
    #[error("Cannot connect to '{server}': {reason}")]
    Connection { server: String, reason: String },

    /// The server address is not a usable URL.
    #[error("Invalid server URL: {0}")]
    InvalidServerUrl(String),

    /// The starting revision of the target document could not be read.
    #[error("Cannot read revision of '{document}': {source}")]
    RevisionRead {
        document: String,
        source: StoreError,
    },

    /// Content sniffing failed; the file is uploaded with the default type.
    #[error("Could not sniff content type of '{path}': {reason}")]
    ClassificationDegraded { path: PathBuf, reason: String },

    /// The store rejected or failed the attachment write.
    #[error("Failed to upload '{path}': {source}")]
    AttachmentWrite { path: PathBuf, source: StoreError },

    /// The path has no attachment name that maps back to itself (empty, or
    /// climbing above the listed tree with `..`).
    #[error("No usable attachment name for '{path}' (got '{name}')")]
    InvalidAttachmentName { path: PathBuf, name: String },

    /// The local file could not be opened for streaming.
    #[error("Failed to read '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The upload task panicked or was cancelled before reporting.
    #[error("Upload of '{path}' aborted: {reason}")]
    WorkerAborted { path: PathBuf, reason: String },
}

/// Convenience alias for `Result<T, DeployError>`.
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// Create a `FileRead` variant from a path and an `io::Error`.
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// `true` for kinds that terminate the whole batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigRead { .. }
                | Self::Connection { .. }
                | Self::InvalidServerUrl(_)
                | Self::RevisionRead { .. }
        )
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigRead { .. } => "ConfigReadError",
            Self::Connection { .. } | Self::InvalidServerUrl(_) => "ConnectionError",
            Self::RevisionRead { .. } => "RevisionReadError",
            Self::ClassificationDegraded { .. } => "ClassificationDegraded",
            Self::AttachmentWrite { .. } => "AttachmentWriteError",
            Self::InvalidAttachmentName { .. } => "InvalidAttachmentName",
            Self::FileRead { .. } => "FileReadError",
            Self::WorkerAborted { .. } => "WorkerAborted",
        }
    }
}
