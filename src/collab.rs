//! External collaborators, expressed as async capabilities. The grader core
//! never talks to git, the build tool, the evaluation harness, the grade
//! ledger, or storage directly; it goes through these traits.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Phase, RawTest, RubricItemKind, Submission};

/// One commit as seen by the verifier.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub hash: String,
    pub author_time: DateTime<Utc>,
    pub lines_changed: u32,
}

/// Outcome of the opaque build subprocess.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub exit_code: i32,
    pub diagnostic_text: String,
}

impl BuildOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A submitter's entry in the grading queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub time_added: DateTime<Utc>,
}

/// Read access to version control.
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Clone `url` into `dest`.
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;

    /// Resolve the remote HEAD hash without cloning.
    async fn remote_head(&self, url: &str) -> Result<String>;

    /// HEAD hash of a local snapshot.
    async fn head_hash(&self, repo: &Path) -> Result<String>;

    /// Commits reachable from HEAD but not from `since_hash` (when given),
    /// oldest first, with author time and lines changed.
    async fn list_commits(&self, repo: &Path, since_hash: Option<&str>)
        -> Result<Vec<CommitInfo>>;

    /// Commit metadata by hash, or None if the object no longer resolves
    /// (rebased away, garbage collected).
    async fn resolve(&self, repo: &Path, hash: &str) -> Result<Option<CommitInfo>>;
}

/// The external build tool, treated as an opaque subprocess.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn build(&self, repo: &Path) -> Result<BuildOutput>;
}

/// The evaluation harness. Only the abstract pass/fail/extra-credit signal
/// per test crosses this boundary.
#[async_trait]
pub trait EvalHarness: Send + Sync {
    async fn run_suite(
        &self,
        repo: &Path,
        phase: Phase,
        item: RubricItemKind,
        namespace: &str,
    ) -> Result<Vec<RawTest>>;
}

/// The external system of record for course grades.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Currently recorded score as a 0..1 fraction of possible points, or
    /// None when nothing has been recorded yet.
    async fn get_score(&self, submitter_id: &str, phase: Phase) -> Result<Option<f32>>;

    async fn submit_score(
        &self,
        submitter_id: &str,
        phase: Phase,
        item_points: &[(String, f32)],
        item_comments: &[(String, String)],
        overall_comment: &str,
    ) -> Result<()>;

    async fn get_due_date(&self, submitter_id: &str, phase: Phase) -> Result<DateTime<Utc>>;
}

/// Persistence for submissions and queue bookkeeping.
#[async_trait]
pub trait SubmissionDao: Send + Sync {
    async fn insert_submission(&self, submission: Submission) -> Result<()>;

    /// The earliest passing submission for this submitter and phase.
    async fn get_first_passing_submission(
        &self,
        submitter_id: &str,
        phase: Phase,
    ) -> Result<Option<Submission>>;

    /// Every passing submission for this submitter, all phases.
    async fn get_all_passing_submissions(&self, submitter_id: &str) -> Result<Vec<Submission>>;

    async fn get_submissions_for_phase(
        &self,
        submitter_id: &str,
        phase: Phase,
    ) -> Result<Vec<Submission>>;

    /// Queue-admission record; its `time_added` is the hand-in time.
    async fn get_queue_entry(&self, submitter_id: &str) -> Result<Option<QueueEntry>>;

    async fn put_queue_entry(&self, submitter_id: &str, entry: QueueEntry) -> Result<()>;

    async fn remove_queue_entry(&self, submitter_id: &str) -> Result<()>;
}

/// The shared data store in which each job creates its own salted namespace
/// for the evaluation step.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn list_namespaces(&self) -> Result<BTreeSet<String>>;

    async fn create_namespace(&self, name: &str) -> Result<()>;

    async fn drop_namespace(&self, name: &str) -> Result<()>;
}
