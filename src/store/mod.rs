//! Document store abstraction.
//!
//! The upload pipeline only needs two operations from the store: read the
//! current revision of a document, and write one attachment against a
//! revision. [`CouchStore`] talks to CouchDB over HTTP; [`MemoryStore`]
//! keeps everything in process.

pub mod couch;
pub mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::StoreError;

pub use couch::CouchStore;
pub use memory::{MemoryStore, RecordedWrite, StoredAttachment};

/// Opaque document version. Empty means the document does not exist yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RevisionToken(String);

impl RevisionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token for a document that has not been created.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RevisionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            f.write_str("<none>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Streaming attachment body.
pub type AttachmentBody = Pin<Box<dyn AsyncRead + Send + Sync>>;

/// One attachment write, scoped to a document revision.
pub struct AttachmentWrite {
    pub document_id: String,
    /// Empty token means "create the document with this write".
    pub revision: RevisionToken,
    pub attachment_name: String,
    pub content_type: String,
    /// Size of `content` when known.
    pub content_length: Option<u64>,
    pub content: AttachmentBody,
}

impl std::fmt::Debug for AttachmentWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentWrite")
            .field("document_id", &self.document_id)
            .field("revision", &self.revision)
            .field("attachment_name", &self.attachment_name)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Storage backend for the target document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current revision of `document_id`, or `None` if it does not exist.
    async fn read_revision(&self, document_id: &str) -> Result<Option<RevisionToken>, StoreError>;

    /// Write one attachment and return the document's new revision.
    ///
    /// Fails with [`StoreError::Conflict`] when `write.revision` is stale.
    async fn write_attachment(&self, write: AttachmentWrite) -> Result<RevisionToken, StoreError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}
