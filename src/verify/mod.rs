//! Commit-history authenticity verification.

pub mod analytics;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::collab::{SubmissionDao, VcsClient};
use crate::config::GradingConfig;
use crate::error::{GraderError, Result};
use crate::model::{
    CommitHistogram, CommitWindow, Phase, Submission, VerificationVerdict, VerifiedStatus,
};

/// Computes the commit-history authenticity verdict for one submission.
pub struct CommitVerifier {
    config: Arc<GradingConfig>,
    dao: Arc<dyn SubmissionDao>,
    vcs: Arc<dyn VcsClient>,
}

impl CommitVerifier {
    pub fn new(
        config: Arc<GradingConfig>,
        dao: Arc<dyn SubmissionDao>,
        vcs: Arc<dyn VcsClient>,
    ) -> Self {
        Self { config, dao, vcs }
    }

    /// Verify the submitter's commit history over the window between their
    /// most recent verified submission and now. Failure here never blocks
    /// grading; it only affects scoring.
    pub async fn verify(
        &self,
        submitter_id: &str,
        phase: Phase,
        repo: &Path,
    ) -> Result<VerificationVerdict> {
        if !self.config.phase(phase)?.graded {
            return self.skip_verification(repo).await;
        }

        if let Some(verdict) = self.preserve_original_verification(submitter_id, phase).await? {
            return Ok(verdict);
        }

        // This could be the first passing submission; compute from scratch.
        self.verify_regular_commits(submitter_id, repo).await
    }

    /// Ungraded phases get a trivially verified verdict carrying only HEAD.
    async fn skip_verification(&self, repo: &Path) -> Result<VerificationVerdict> {
        tracing::debug!("skipping commit verification for ungraded phase");
        let head_hash = self.vcs.head_hash(repo).await?;
        Ok(VerificationVerdict {
            verified: true,
            reused_prior_decision: false,
            total_commits: 0,
            days_with_commits: 0,
            message: None,
            window_start: Some(DateTime::<Utc>::MIN_UTC),
            window_end: Some(DateTime::<Utc>::MAX_UTC),
            head_hash,
            tail_hash: None,
        })
    }

    /// Once the first passing submission for a phase carries a verdict, that
    /// decision is authoritative and reused verbatim. The only thing that can
    /// flip it is a human reviewer marking the submitter unapproved.
    async fn preserve_original_verification(
        &self,
        submitter_id: &str,
        phase: Phase,
    ) -> Result<Option<VerificationVerdict>> {
        let Some(first_passing) = self
            .dao
            .get_first_passing_submission(submitter_id, phase)
            .await?
        else {
            return Ok(None);
        };
        if first_passing.rubric.verification.is_none() {
            return Ok(None);
        }

        let verified = first_passing.verified_status != Some(VerifiedStatus::Unapproved);
        let message = if verified {
            "You passed the commit verification on your first passing submission! You're good to go!"
        } else {
            "You have previously failed commit verification.\nYou still need to meet with a TA or a professor to gain credit for this phase."
        };
        tracing::debug!(
            submitter = %submitter_id,
            %phase,
            verified,
            "reusing prior commit verification decision"
        );
        Ok(Some(VerificationVerdict {
            verified,
            reused_prior_decision: true,
            total_commits: 0,
            days_with_commits: 0,
            message: Some(message.to_string()),
            window_start: None,
            window_end: None,
            head_hash: first_passing.head_hash,
            tail_hash: None,
        }))
    }

    async fn verify_regular_commits(
        &self,
        submitter_id: &str,
        repo: &Path,
    ) -> Result<VerificationVerdict> {
        let passing = self.dao.get_all_passing_submissions(submitter_id).await?;
        let lower = self.most_recent_passing_window(repo, &passing).await?;
        let upper = self.current_window(submitter_id, repo).await?;

        let commits = self
            .vcs
            .list_commits(repo, lower.commit_hash.as_deref())
            .await?;
        let histogram = analytics::build_histogram(
            &commits,
            lower,
            upper,
            self.config.local_offset,
        );
        Ok(self.check_requirements(&histogram))
    }

    /// Lower window bound: the effective timestamp and hash of the most
    /// recent previously graded passing submission, any phase. The commit's
    /// authored time is preferred; when the hash no longer resolves (rebased
    /// away), the submission's recorded timestamp stands in.
    async fn most_recent_passing_window(
        &self,
        repo: &Path,
        passing: &[Submission],
    ) -> Result<CommitWindow> {
        let mut latest: Option<(DateTime<Utc>, String)> = None;
        for submission in passing {
            if !self.config.phase(submission.phase)?.graded {
                continue;
            }
            let effective = match self.vcs.resolve(repo, &submission.head_hash).await? {
                Some(commit) => commit.author_time,
                None => submission.hand_in_time,
            };
            if latest.as_ref().map_or(true, |(time, _)| effective > *time) {
                latest = Some((effective, submission.head_hash.clone()));
            }
        }
        Ok(match latest {
            Some((timestamp, hash)) => CommitWindow::new(timestamp, Some(hash)),
            None => CommitWindow::beginning_of_time(),
        })
    }

    /// Upper window bound: this submission's hand-in time and current HEAD.
    /// Both must resolve; anything else is a deployment bug.
    async fn current_window(&self, submitter_id: &str, repo: &Path) -> Result<CommitWindow> {
        let entry = self
            .dao
            .get_queue_entry(submitter_id)
            .await?
            .ok_or_else(|| {
                GraderError::Configuration(format!("no queue entry for {submitter_id}"))
            })?;
        let head_hash = self.vcs.head_hash(repo).await?;
        Ok(CommitWindow::new(entry.time_added, Some(head_hash)))
    }

    /// Evaluate every requirement; a submitter sees all of their problems at
    /// once rather than one per submission.
    fn check_requirements(&self, histogram: &CommitHistogram) -> VerificationVerdict {
        let thresholds = &self.config.verification;
        let total = histogram.total_commits;
        let days = histogram.days_with_commits();
        let significant = histogram
            .per_commit_lines_changed
            .iter()
            .filter(|&&lines| lines >= thresholds.min_lines_changed)
            .count() as u32;

        let conditions = [
            (
                total < thresholds.required_commits,
                format!(
                    "Not enough commits to pass off ({total}/{}).",
                    thresholds.required_commits
                ),
            ),
            (
                total >= thresholds.required_commits && significant < thresholds.required_commits,
                format!(
                    "Have some commits, but some of them are too insignificant for credit ({significant}/{}).",
                    thresholds.required_commits
                ),
            ),
            (
                days < thresholds.required_days,
                format!(
                    "Did not commit on enough days to pass off ({days}/{}).",
                    thresholds.required_days
                ),
            ),
            (
                histogram.has_future_commit,
                "Suspicious commit history. Some commits are authored after the hand in date."
                    .to_string(),
            ),
            (
                histogram.has_past_commit,
                "Suspicious commit history. Some commits are authored before the previous phase hash."
                    .to_string(),
            ),
            (
                !histogram.is_chronological,
                "Suspicious commit history. Not all commits are in order.".to_string(),
            ),
        ];

        let mut messages: Vec<String> = conditions
            .into_iter()
            .filter_map(|(fails, message)| fails.then_some(message))
            .collect();
        let verified = messages.is_empty();
        if !verified {
            messages.push(
                "Since you did not meet the prerequisites for commit frequency, you will need to talk to a TA to receive a score."
                    .to_string(),
            );
            messages.push(format!(
                "It will come with a {}% penalty.",
                thresholds.penalty_pct
            ));
        }

        VerificationVerdict {
            verified,
            reused_prior_decision: false,
            total_commits: total,
            days_with_commits: days,
            message: (!verified).then(|| messages.join("\n")),
            window_start: Some(histogram.lower_window.timestamp),
            window_end: Some(histogram.upper_window.timestamp),
            head_hash: histogram
                .upper_window
                .commit_hash
                .clone()
                .unwrap_or_default(),
            tail_hash: histogram.lower_window.commit_hash.clone(),
        }
    }
}
