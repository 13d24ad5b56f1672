use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Phase;

/// An admitted grading request. Immutable; destroyed when its terminal event
/// fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionJob {
    pub submitter_id: String,
    pub repo_url: String,
    pub phase: Phase,
    /// Remote HEAD at admission time; duplicate submissions are keyed on it.
    pub head_hash: String,
    pub enqueue_time: DateTime<Utc>,
}

impl SubmissionJob {
    pub fn new(
        submitter_id: impl Into<String>,
        repo_url: impl Into<String>,
        phase: Phase,
        head_hash: impl Into<String>,
    ) -> Self {
        Self {
            submitter_id: submitter_id.into(),
            repo_url: repo_url.into(),
            phase,
            head_hash: head_hash.into(),
            enqueue_time: Utc::now(),
        }
    }
}
