//! In-process document store.
//!
//! Behaves like CouchDB for the two operations the pipeline uses: every
//! write must carry the document's current revision, and each accepted
//! write produces a new `N-<hash>` revision. Used by `--dry-run` and by
//! tests, which can also inject latency and per-attachment failures.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use super::{AttachmentWrite, DocumentStore, RevisionToken};
use crate::error::StoreError;

/// One stored attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct Document {
    generation: u64,
    revision: RevisionToken,
    attachments: BTreeMap<String, StoredAttachment>,
}

/// A write the store received, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub document_id: String,
    pub attachment_name: String,
    pub content_type: String,
    /// Revision the caller supplied.
    pub base_revision: RevisionToken,
    /// Revision produced, `None` if the write was rejected.
    pub new_revision: Option<RevisionToken>,
    pub size: u64,
}

#[derive(Debug, Default)]
struct State {
    documents: HashMap<String, Document>,
    writes: Vec<RecordedWrite>,
    reads: usize,
}

/// Decrements the in-flight counter when a write finishes.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory [`DocumentStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    conflicts: HashSet<String>,
    read_failure: bool,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing document at `revision`.
    pub fn with_document(self, document_id: &str, revision: &str) -> Self {
        let generation = revision
            .split_once('-')
            .and_then(|(n, _)| n.parse().ok())
            .unwrap_or(1);
        self.lock().documents.insert(
            document_id.to_string(),
            Document {
                generation,
                revision: RevisionToken::new(revision),
                attachments: BTreeMap::new(),
            },
        );
        self
    }

    /// Reject every write of `attachment_name` with a conflict.
    pub fn with_conflict_on(mut self, attachment_name: &str) -> Self {
        self.conflicts.insert(attachment_name.to_string());
        self
    }

    /// Fail every revision read with a server error.
    pub fn with_read_failure(mut self) -> Self {
        self.read_failure = true;
        self
    }

    /// Delay each write by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// All writes received, in arrival order.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    /// Number of revision reads served.
    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    /// Current revision of a document, if it exists.
    pub fn revision(&self, document_id: &str) -> Option<RevisionToken> {
        self.lock()
            .documents
            .get(document_id)
            .map(|d| d.revision.clone())
    }

    pub fn attachment(&self, document_id: &str, name: &str) -> Option<StoredAttachment> {
        self.lock()
            .documents
            .get(document_id)
            .and_then(|d| d.attachments.get(name).cloned())
    }

    /// Highest number of writes that were in progress at the same time.
    pub fn peak_concurrent_writes(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    fn apply(&self, record: &RecordedWrite, data: Vec<u8>) -> Result<RevisionToken, StoreError> {
        if self.conflicts.contains(&record.attachment_name) {
            return Err(StoreError::Conflict(record.document_id.clone()));
        }

        let mut state = self.lock();
        let current = state
            .documents
            .get(&record.document_id)
            .map(|d| d.revision.clone())
            .unwrap_or_default();
        if current != record.base_revision {
            return Err(StoreError::Conflict(record.document_id.clone()));
        }

        let doc = state.documents.entry(record.document_id.clone()).or_default();

        let mut hasher = Sha256::new();
        hasher.update(doc.revision.as_str().as_bytes());
        hasher.update(record.attachment_name.as_bytes());
        hasher.update(&data);
        let digest = hasher.finalize();
        let hash: String = digest[..16].iter().map(|b| format!("{b:02x}")).collect();

        doc.generation += 1;
        doc.revision = RevisionToken::new(format!("{}-{}", doc.generation, hash));
        doc.attachments.insert(
            record.attachment_name.clone(),
            StoredAttachment {
                content_type: record.content_type.clone(),
                data,
            },
        );
        Ok(doc.revision.clone())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read_revision(&self, document_id: &str) -> Result<Option<RevisionToken>, StoreError> {
        if self.read_failure {
            return Err(StoreError::Http {
                status: 500,
                reason: "injected read failure".to_string(),
            });
        }
        let mut state = self.lock();
        state.reads += 1;
        Ok(state
            .documents
            .get(document_id)
            .map(|d| d.revision.clone()))
    }

    async fn write_attachment(&self, write: AttachmentWrite) -> Result<RevisionToken, StoreError> {
        let _guard = self.enter();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let AttachmentWrite {
            document_id,
            revision,
            attachment_name,
            content_type,
            mut content,
            ..
        } = write;

        let mut data = Vec::new();
        content.read_to_end(&mut data).await?;

        let mut record = RecordedWrite {
            document_id,
            attachment_name,
            content_type,
            base_revision: revision,
            new_revision: None,
            size: data.len() as u64,
        };
        let result = self.apply(&record, data);
        if let Ok(rev) = &result {
            record.new_revision = Some(rev.clone());
        }
        self.lock().writes.push(record);
        result
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}
