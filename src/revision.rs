//! Revision tracking for the target document.
//!
//! The tracker only stores the latest token. It does not serialize writers:
//! the upload queue guarantees that a single worker at a time reads the
//! token, writes, and advances it (see [`crate::queue::WriteTurnstile`]).

use tokio::sync::watch;

use crate::error::{DeployError, Result};
use crate::store::{DocumentStore, RevisionToken};

/// Latest known revision of one document.
#[derive(Debug)]
pub struct RevisionTracker {
    document_id: String,
    token: watch::Sender<Option<RevisionToken>>,
}

impl RevisionTracker {
    /// An uninitialized tracker; [`current`](Self::current) waits until
    /// [`initialize`](Self::initialize) or [`advance`](Self::advance) runs.
    pub fn new(document_id: impl Into<String>) -> Self {
        let (token, _) = watch::channel(None);
        Self {
            document_id: document_id.into(),
            token,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Read the document's revision from the store.
    ///
    /// A missing document yields the empty token (the first write creates
    /// it). Any other failure is fatal to the batch.
    pub async fn initialize(&self, store: &dyn DocumentStore) -> Result<RevisionToken> {
        let token = match store.read_revision(&self.document_id).await {
            Ok(Some(rev)) => rev,
            Ok(None) => {
                tracing::info!(
                    document = %self.document_id,
                    "Document does not exist yet, first write creates it"
                );
                RevisionToken::empty()
            }
            Err(source) => {
                return Err(DeployError::RevisionRead {
                    document: self.document_id.clone(),
                    source,
                })
            }
        };

        tracing::info!(document = %self.document_id, revision = %token, "Starting revision");
        self.token.send_replace(Some(token.clone()));
        Ok(token)
    }

    pub fn is_initialized(&self) -> bool {
        self.token.borrow().is_some()
    }

    /// The latest token, waiting for initialization if needed.
    pub async fn current(&self) -> RevisionToken {
        let mut rx = self.token.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let token = match rx.wait_for(Option::is_some).await {
            Ok(token) => (*token).clone().unwrap_or_default(),
            Err(_) => RevisionToken::empty(),
        };
        token
    }

    /// Install the token returned by a successful write.
    pub fn advance(&self, token: RevisionToken) {
        tracing::debug!(document = %self.document_id, revision = %token, "Revision advanced");
        self.token.send_replace(Some(token));
    }
}
