//! Single-file upload.
//!
//! A worker runs one [`UploadJob`] end to end: skip editor artifacts,
//! classify, open the file, then, once the job's write turn comes up, read
//! the current revision, stream the attachment and advance the revision.
//! Exactly one write is attempted per job; nothing is retried here.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::classify::ContentClassifier;
use crate::error::DeployError;
use crate::queue::WriteTicket;
use crate::revision::RevisionTracker;
use crate::store::{AttachmentWrite, DocumentStore, RevisionToken};

/// A file waiting to be attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadJob {
    path: PathBuf,
}

impl UploadJob {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attachment name: the path as listed, `/`-separated, without `./`.
    pub fn attachment_name(&self) -> String {
        attachment_name(&self.path)
    }

    /// `None` when the path has no usable attachment name.
    pub fn valid_attachment_name(&self) -> Option<String> {
        let name = self.attachment_name();
        is_valid_attachment_name(&name).then_some(name)
    }
}

/// Where in the upload a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStep {
    NameAttachment,
    OpenFile,
    WriteAttachment,
    Aborted,
}

impl fmt::Display for UploadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::NameAttachment => "name",
            Self::OpenFile => "open",
            Self::WriteAttachment => "write",
            Self::Aborted => "aborted",
        })
    }
}

/// A job that did not make it into the store.
#[derive(Debug)]
pub struct UploadFailure {
    pub job: UploadJob,
    pub step: UploadStep,
    pub error: DeployError,
}

impl fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed at {}: {}",
            self.job.path.display(),
            self.step,
            self.error
        )
    }
}

/// Result of a job that counts as completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded {
        attachment_name: String,
        content_type: String,
        size: u64,
        revision: RevisionToken,
    },
    /// Editor artifact; nothing was sent.
    Skipped,
}

/// Uploads single files to one document.
pub struct UploadWorker {
    store: Arc<dyn DocumentStore>,
    tracker: Arc<RevisionTracker>,
    classifier: Arc<ContentClassifier>,
}

impl fmt::Debug for UploadWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadWorker")
            .field("store", &self.store.describe())
            .field("document", &self.tracker.document_id())
            .finish()
    }
}

impl UploadWorker {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        tracker: Arc<RevisionTracker>,
        classifier: Arc<ContentClassifier>,
    ) -> Self {
        Self {
            store,
            tracker,
            classifier,
        }
    }

    pub fn tracker(&self) -> &Arc<RevisionTracker> {
        &self.tracker
    }

    /// Upload one file.
    ///
    /// `ticket` is this job's place in the document's write order. It is
    /// released when this call returns, whatever the outcome.
    pub async fn run(
        &self,
        job: &UploadJob,
        ticket: WriteTicket,
    ) -> Result<UploadOutcome, UploadFailure> {
        let path = job.path();
        if is_editor_artifact(path) {
            tracing::debug!(path = %path.display(), "Skipping editor artifact");
            return Ok(UploadOutcome::Skipped);
        }

        let fail = |step, error| UploadFailure {
            job: job.clone(),
            step,
            error,
        };
        let attachment_name = job.valid_attachment_name().ok_or_else(|| {
            fail(
                UploadStep::NameAttachment,
                DeployError::InvalidAttachmentName {
                    path: path.to_path_buf(),
                    name: job.attachment_name(),
                },
            )
        })?;

        let content_type = self.classifier.classify(path).await;

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| fail(UploadStep::OpenFile, DeployError::file_read(path, e)))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| fail(UploadStep::OpenFile, DeployError::file_read(path, e)))?
            .len();

        ticket.wait_turn().await;
        let revision = self.tracker.current().await;
        tracing::debug!(
            path = %path.display(),
            attachment = %attachment_name,
            content_type = %content_type,
            revision = %revision,
            "Writing attachment"
        );

        let write = AttachmentWrite {
            document_id: self.tracker.document_id().to_string(),
            revision,
            attachment_name: attachment_name.clone(),
            content_type: content_type.clone(),
            content_length: Some(size),
            content: Box::pin(file),
        };
        let new_revision = self.store.write_attachment(write).await.map_err(|source| {
            fail(
                UploadStep::WriteAttachment,
                DeployError::AttachmentWrite {
                    path: path.to_path_buf(),
                    source,
                },
            )
        })?;

        // The next writer must observe the new token, so advance before
        // giving up the turn.
        self.tracker.advance(new_revision.clone());
        drop(ticket);

        tracing::info!(
            attachment = %attachment_name,
            content_type = %content_type,
            size,
            revision = %new_revision,
            "Uploaded"
        );
        Ok(UploadOutcome::Uploaded {
            attachment_name,
            content_type,
            size,
            revision: new_revision,
        })
    }
}

/// Swap, backup and lock files left behind by editors.
pub fn is_editor_artifact(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let lower = name.to_ascii_lowercase();

    lower.ends_with(".swp")
        || lower.ends_with(".swo")
        || lower.ends_with(".swx")
        || name.ends_with('~')
        || name.starts_with(".#")
        || (name.len() > 1 && name.starts_with('#') && name.ends_with('#'))
}

/// Attachment name for a path: normal components joined with `/`.
///
/// `..` cancels the component before it. A `..` with nothing left to cancel
/// is kept, which makes the name invalid (see [`is_valid_attachment_name`]).
pub fn attachment_name(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => match parts.last() {
                Some(last) if last != ".." => {
                    parts.pop();
                }
                _ => parts.push("..".to_string()),
            },
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    parts.join("/")
}

/// A name CouchDB stores under the same path it is reported as: non-empty
/// and free of `.`/`..` segments.
pub fn is_valid_attachment_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}
