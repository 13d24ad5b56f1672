//! Admission, the bounded worker pool, and per-submitter event fan-out.

pub mod events;
pub mod job;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};

use crate::collab::QueueEntry;
use crate::error::{GraderError, Result};
use crate::model::Phase;
use crate::pipeline::{GradingPipeline, PipelineDeps};

use events::{EventSink, JobEvent};
use job::SubmissionJob;

const JOB_QUEUE_CAPACITY: usize = 256;

/// Lightweight "who's in the queue / who's grading now" view.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queued: Vec<String>,
    pub grading: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubmitterStatus {
    Queued,
    Grading,
    Idle,
}

#[derive(Default)]
struct SchedulerState {
    queued: HashSet<String>,
    grading: HashSet<String>,
    channels: HashMap<String, EventSink>,
}

impl SchedulerState {
    fn has_active_job(&self, submitter_id: &str) -> bool {
        self.queued.contains(submitter_id) || self.grading.contains(submitter_id)
    }
}

/// Admits submissions, runs them on a bounded worker pool, and multiplexes
/// lifecycle events to subscribers. One owned instance per process; inject it
/// where needed.
pub struct Scheduler {
    deps: Arc<PipelineDeps>,
    state: Arc<RwLock<SchedulerState>>,
    job_tx: mpsc::Sender<SubmissionJob>,
}

impl Scheduler {
    /// Create the scheduler and spawn its worker pool.
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        let (job_tx, job_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let state = Arc::new(RwLock::new(SchedulerState::default()));

        for worker_id in 0..deps.config.worker_count.max(1) {
            let rx = job_rx.clone();
            let worker_state = state.clone();
            let worker_deps = deps.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, rx, worker_state, worker_deps).await;
            });
        }

        Self {
            deps,
            state,
            job_tx,
        }
    }

    /// Admit a submission. Synchronous admission, asynchronous execution:
    /// on success the job is queued and this returns immediately.
    pub async fn submit(&self, submitter_id: &str, phase: Phase, repo_url: &str) -> Result<()> {
        if self.state.read().await.has_active_job(submitter_id) {
            return Err(GraderError::AlreadyQueued);
        }

        // Duplicate-resubmission check keys on the remote HEAD at admission.
        let head_hash = self.deps.vcs.remote_head(repo_url).await?;
        let graded = self
            .deps
            .dao
            .get_submissions_for_phase(submitter_id, phase)
            .await?;
        if graded.iter().any(|s| s.head_hash == head_hash) {
            return Err(GraderError::DuplicateSubmission);
        }

        let job = SubmissionJob::new(submitter_id, repo_url, phase, head_hash);
        {
            let mut state = self.state.write().await;
            // Re-check under the write lock; two admissions may race.
            if state.has_active_job(submitter_id) {
                return Err(GraderError::AlreadyQueued);
            }
            state.queued.insert(submitter_id.to_string());
            state
                .channels
                .entry(submitter_id.to_string())
                .or_default();
        }

        // Only the admission winner writes the queue entry, so a racing
        // loser can never overwrite the active job's hand-in time.
        if let Err(e) = self
            .deps
            .dao
            .put_queue_entry(
                submitter_id,
                QueueEntry {
                    time_added: job.enqueue_time,
                },
            )
            .await
        {
            self.discard_admission(submitter_id).await;
            return Err(e);
        }

        if self.job_tx.send(job).await.is_err() {
            self.discard_admission(submitter_id).await;
            let _ = self.deps.dao.remove_queue_entry(submitter_id).await;
            return Err(GraderError::Internal("job queue is closed".to_string()));
        }

        tracing::info!(submitter = %submitter_id, %phase, repo_url, "submission admitted");
        Ok(())
    }

    /// Attach to a submitter's event stream. Returns None when the submitter
    /// has no active job.
    pub async fn subscribe(&self, submitter_id: &str) -> Option<broadcast::Receiver<JobEvent>> {
        self.state
            .read()
            .await
            .channels
            .get(submitter_id)
            .map(EventSink::subscribe)
    }

    pub async fn status(&self) -> QueueStatus {
        let state = self.state.read().await;
        let mut queued: Vec<String> = state.queued.iter().cloned().collect();
        let mut grading: Vec<String> = state.grading.iter().cloned().collect();
        queued.sort();
        grading.sort();
        QueueStatus { queued, grading }
    }

    async fn discard_admission(&self, submitter_id: &str) {
        let mut state = self.state.write().await;
        state.queued.remove(submitter_id);
        state.channels.remove(submitter_id);
    }

    pub async fn submitter_status(&self, submitter_id: &str) -> SubmitterStatus {
        let state = self.state.read().await;
        if state.grading.contains(submitter_id) {
            SubmitterStatus::Grading
        } else if state.queued.contains(submitter_id) {
            SubmitterStatus::Queued
        } else {
            SubmitterStatus::Idle
        }
    }
}

/// One worker: pull a job, run its pipeline in a task of its own, then tear
/// down the job's bookkeeping. A panicking job surfaces as a join error and
/// never takes the worker (or other jobs) down with it.
async fn worker_loop(
    worker_id: usize,
    job_rx: Arc<Mutex<mpsc::Receiver<SubmissionJob>>>,
    state: Arc<RwLock<SchedulerState>>,
    deps: Arc<PipelineDeps>,
) {
    loop {
        let job = { job_rx.lock().await.recv().await };
        let Some(job) = job else {
            // Channel closed; the scheduler is gone.
            break;
        };
        let submitter_id = job.submitter_id.clone();

        let events = {
            let mut locked = state.write().await;
            locked.queued.remove(&submitter_id);
            locked.grading.insert(submitter_id.clone());
            locked
                .channels
                .entry(submitter_id.clone())
                .or_default()
                .clone()
        };

        tracing::info!(worker_id, submitter = %submitter_id, phase = %job.phase, "grading started");
        events.started();

        let pipeline = GradingPipeline::new(deps.clone(), job, events.clone());
        if let Err(join_error) = tokio::spawn(pipeline.run()).await {
            tracing::error!(
                worker_id,
                submitter = %submitter_id,
                error = %join_error,
                "grading job panicked"
            );
            events.error(
                "Something went wrong while grading. Please contact a TA.",
                None,
            );
        }

        // Terminal event fired. The queue entry goes first: the submitter
        // must stay active until every piece of bookkeeping is gone, or a
        // resubmission admitted mid-teardown would have its fresh queue
        // entry deleted out from under it.
        if let Err(e) = deps.dao.remove_queue_entry(&submitter_id).await {
            tracing::warn!(submitter = %submitter_id, error = %e, "failed to remove queue entry");
        }
        {
            let mut locked = state.write().await;
            locked.grading.remove(&submitter_id);
            locked.channels.remove(&submitter_id);
        }
    }
}
