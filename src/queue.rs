//! Bounded-concurrency upload scheduler.
//!
//! Jobs move `Pending -> InFlight -> {Completed | Failed}`. At most
//! `max_concurrency` jobs are in flight; pending jobs are admitted strictly
//! first-in first-out. All state transitions happen on `&mut self`, so
//! admission and retirement never interleave.
//!
//! Every job targets the same document, and each write must carry the token
//! produced by the previous write. Workers therefore overlap only the
//! preparation of an upload (classification, file open). The write itself is
//! gated by a [`WriteTurnstile`]: tickets are handed out at admission, and a
//! worker may write only once every earlier ticket has been released.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio::task::{Id, JoinError, JoinSet};

use crate::error::DeployError;
use crate::store::RevisionToken;
use crate::worker::{UploadFailure, UploadJob, UploadOutcome, UploadStep, UploadWorker};

/// Default number of uploads in flight.
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

// ── Write turnstile ─────────────────────────────────────────────

#[derive(Debug, Default)]
struct Turns {
    /// Lowest ticket not yet released.
    next: u64,
    /// Released tickets above `next`.
    released: BTreeSet<u64>,
}

/// Hands out write turns in admission order.
#[derive(Debug)]
pub struct WriteTurnstile {
    turns: Arc<watch::Sender<Turns>>,
    issued: u64,
}

impl Default for WriteTurnstile {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteTurnstile {
    pub fn new() -> Self {
        let (turns, _) = watch::channel(Turns::default());
        Self {
            turns: Arc::new(turns),
            issued: 0,
        }
    }

    /// Take the next place in line.
    pub fn issue(&mut self) -> WriteTicket {
        let number = self.issued;
        self.issued += 1;
        WriteTicket {
            number,
            turns: self.turns.clone(),
        }
    }
}

/// A place in the write order. Released on drop.
#[derive(Debug)]
pub struct WriteTicket {
    number: u64,
    turns: Arc<watch::Sender<Turns>>,
}

impl WriteTicket {
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Wait until every earlier ticket has been released.
    pub async fn wait_turn(&self) {
        let mut rx = self.turns.subscribe();
        let number = self.number;
        // The sender is kept alive by `self.turns`.
        let _ = rx.wait_for(|t| t.next == number).await;
    }
}

impl Drop for WriteTicket {
    fn drop(&mut self) {
        let number = self.number;
        self.turns.send_modify(|t| {
            t.released.insert(number);
            while t.released.remove(&t.next) {
                t.next += 1;
            }
        });
    }
}

// ── Results ─────────────────────────────────────────────────────

/// Per-job failure summary delivered to the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailed {
    pub step: UploadStep,
    pub kind: &'static str,
    pub message: String,
}

/// What a submitter receives once its job retires.
pub type JobResult = Result<UploadOutcome, JobFailed>;

/// Final tally of a drained queue.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub submitted: usize,
    /// Uploaded plus skipped.
    pub completed: usize,
    pub skipped: usize,
    pub failed: Vec<UploadFailure>,
    pub bytes_uploaded: u64,
    /// Highest number of jobs in flight at once.
    pub peak_in_flight: usize,
    /// Paths in the order their results were recorded.
    pub retirement_order: Vec<PathBuf>,
    /// Revision of the document after the batch, if known.
    pub final_revision: Option<RevisionToken>,
}

impl BatchReport {
    pub fn uploaded(&self) -> usize {
        self.completed - self.skipped
    }

    /// Jobs with a recorded outcome.
    pub fn retired(&self) -> usize {
        self.completed + self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

// ── Queue ───────────────────────────────────────────────────────

struct Waiting {
    job: UploadJob,
    reply: oneshot::Sender<JobResult>,
}

/// Schedules uploads for one document.
///
/// Must be used from within a Tokio runtime: admission spawns tasks.
pub struct UploadQueue {
    worker: Arc<UploadWorker>,
    max_concurrency: usize,
    turnstile: WriteTurnstile,
    pending: VecDeque<Waiting>,
    in_flight: HashMap<Id, Waiting>,
    tasks: JoinSet<Result<UploadOutcome, UploadFailure>>,
    report: BatchReport,
}

impl std::fmt::Debug for UploadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadQueue")
            .field("max_concurrency", &self.max_concurrency)
            .field("pending", &self.pending.len())
            .field("in_flight", &self.in_flight.len())
            .field("completed", &self.report.completed)
            .field("failed", &self.report.failed.len())
            .finish()
    }
}

impl UploadQueue {
    /// A queue running at most `max_concurrency` uploads (minimum 1).
    pub fn new(worker: Arc<UploadWorker>, max_concurrency: usize) -> Self {
        Self {
            worker,
            max_concurrency: max_concurrency.max(1),
            turnstile: WriteTurnstile::new(),
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            tasks: JoinSet::new(),
            report: BatchReport::default(),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Enqueue a job and admit as many jobs as the bound allows.
    ///
    /// The returned receiver resolves when the job retires. Dropping it is
    /// fine; the outcome still lands in the batch report.
    pub fn submit(&mut self, job: UploadJob) -> oneshot::Receiver<JobResult> {
        let (reply, rx) = oneshot::channel();
        tracing::trace!(path = %job.path().display(), "Job submitted");
        self.report.submitted += 1;
        self.pending.push_back(Waiting { job, reply });
        self.admit();
        rx
    }

    /// Run every submitted job to completion and return the tally.
    ///
    /// `progress` is called with `(retired, submitted)` after each
    /// retirement.
    pub async fn drain(mut self, progress: Option<&(dyn Fn(usize, usize) + Sync)>) -> BatchReport {
        while let Some(joined) = self.tasks.join_next_with_id().await {
            match joined {
                Ok((id, result)) => self.retire(id, Ok(result)),
                Err(e) => self.retire(e.id(), Err(e)),
            }
            if let Some(cb) = progress {
                cb(self.report.retired(), self.report.submitted);
            }
        }

        debug_assert!(self.pending.is_empty() && self.in_flight.is_empty());
        tracing::info!(
            submitted = self.report.submitted,
            completed = self.report.completed,
            skipped = self.report.skipped,
            failed = self.report.failed.len(),
            peak_in_flight = self.report.peak_in_flight,
            "Upload queue drained"
        );
        self.report
    }

    /// Move pending jobs into flight while there is room.
    fn admit(&mut self) {
        while self.in_flight.len() < self.max_concurrency {
            let Some(waiting) = self.pending.pop_front() else {
                break;
            };

            let ticket = self.turnstile.issue();
            tracing::debug!(
                path = %waiting.job.path().display(),
                ticket = ticket.number(),
                in_flight = self.in_flight.len() + 1,
                "Job admitted"
            );

            let worker = self.worker.clone();
            let job = waiting.job.clone();
            let handle = self
                .tasks
                .spawn(async move { worker.run(&job, ticket).await });
            self.in_flight.insert(handle.id(), waiting);
            self.report.peak_in_flight = self.report.peak_in_flight.max(self.in_flight.len());
        }
    }

    /// Record a finished job and refill the in-flight set.
    fn retire(
        &mut self,
        id: Id,
        result: Result<Result<UploadOutcome, UploadFailure>, JoinError>,
    ) {
        let Some(Waiting { job, reply }) = self.in_flight.remove(&id) else {
            tracing::warn!(task = %id, "Result for unknown upload task");
            return;
        };
        self.report.retirement_order.push(job.path().to_path_buf());

        let result = result.unwrap_or_else(|e| {
            Err(UploadFailure {
                error: DeployError::WorkerAborted {
                    path: job.path().to_path_buf(),
                    reason: e.to_string(),
                },
                job: job.clone(),
                step: UploadStep::Aborted,
            })
        });

        let delivered = match result {
            Ok(outcome) => {
                self.report.completed += 1;
                match &outcome {
                    UploadOutcome::Uploaded { size, .. } => self.report.bytes_uploaded += size,
                    UploadOutcome::Skipped => self.report.skipped += 1,
                }
                Ok(outcome)
            }
            Err(failure) => {
                tracing::warn!(
                    path = %job.path().display(),
                    step = %failure.step,
                    kind = failure.error.kind(),
                    error = %failure.error,
                    "Upload failed"
                );
                let summary = JobFailed {
                    step: failure.step,
                    kind: failure.error.kind(),
                    message: failure.error.to_string(),
                };
                self.report.failed.push(failure);
                Err(summary)
            }
        };
        // The submitter may have dropped its receiver.
        let _ = reply.send(delivered);

        self.admit();
    }
}
