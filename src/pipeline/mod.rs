//! The per-job grading pipeline: fetch, verify, build, evaluate, score,
//! persist, sync, with guaranteed cleanup on every exit path.

pub mod staging;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::collab::{BuildRunner, DataStore, EvalHarness, Ledger, SubmissionDao, VcsClient};
use crate::config::{GradingConfig, PhaseConfig, RubricConfig};
use crate::error::{GraderError, Result};
use crate::model::{Rubric, RubricItem, RubricItemKind, Submission, VerifiedStatus};
use crate::scheduler::events::EventSink;
use crate::scheduler::job::SubmissionJob;
use crate::score;
use crate::verify::CommitVerifier;

use staging::StagingArea;

/// Build-tool diagnostic line markers, used to surface only the error lines.
const DIAGNOSTIC_MARKER: &str = "[ERROR]";
const DIAGNOSTIC_TRAILER: &str = "[ERROR] -> [Help 1]";

/// Shared collaborators injected into every pipeline run.
pub struct PipelineDeps {
    pub config: Arc<GradingConfig>,
    pub vcs: Arc<dyn VcsClient>,
    pub builder: Arc<dyn BuildRunner>,
    pub harness: Arc<dyn EvalHarness>,
    pub ledger: Arc<dyn Ledger>,
    pub dao: Arc<dyn SubmissionDao>,
    pub store: Arc<dyn DataStore>,
}

/// Grades one submission end to end. One instance per job; the job's staging
/// area and data namespace are exclusively owned by this run.
pub struct GradingPipeline {
    deps: Arc<PipelineDeps>,
    job: SubmissionJob,
    events: EventSink,
}

impl GradingPipeline {
    pub fn new(deps: Arc<PipelineDeps>, job: SubmissionJob, events: EventSink) -> Self {
        Self { deps, job, events }
    }

    /// Run the pipeline to completion. The submitter always sees exactly one
    /// terminal event: `done` with their submission, or `error` with a
    /// human-readable message.
    pub async fn run(self) {
        match self.grade().await {
            Ok(submission) => {
                tracing::info!(
                    submitter = %self.job.submitter_id,
                    phase = %self.job.phase,
                    score = submission.final_score,
                    passed = submission.passed,
                    "grading finished"
                );
                self.events.done(submission);
            }
            Err(e) => {
                tracing::error!(
                    submitter = %self.job.submitter_id,
                    repo_url = %self.job.repo_url,
                    error = %e,
                    "grading failed"
                );
                self.events.error(e.user_message(), e.details());
            }
        }
    }

    async fn grade(&self) -> Result<Submission> {
        let staging = StagingArea::create(&self.deps.config.staging_root, &self.job.repo_url)?;
        let namespace = staging.namespace();

        let inventory = self.deps.store.list_namespaces().await?;
        self.deps.store.create_namespace(&namespace).await?;

        let result = self.grade_in(&staging, &namespace).await;

        // Cleanup runs on success, graded failure, and fatal error alike.
        self.cleanup(&staging, &namespace, &inventory).await;
        result
    }

    /// Release the data namespace and verify nothing leaked by diffing the
    /// inventory against the pre-fetch snapshot. Only namespaces carrying
    /// this job's salt are reaped; concurrent jobs own their own.
    async fn cleanup(&self, staging: &StagingArea, namespace: &str, before: &BTreeSet<String>) {
        if let Err(e) = self.deps.store.drop_namespace(namespace).await {
            tracing::warn!(namespace, error = %e, "failed to drop data namespace");
        }
        match self.deps.store.list_namespaces().await {
            Ok(after) => {
                for leaked in after.difference(before) {
                    if !staging.owns_namespace(leaked) {
                        continue;
                    }
                    tracing::warn!(namespace = %leaked, "removing leaked data namespace");
                    if let Err(e) = self.deps.store.drop_namespace(leaked).await {
                        tracing::warn!(namespace = %leaked, error = %e, "failed to remove leaked namespace");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not take post-cleanup namespace inventory");
            }
        }
        // The staging directory itself is removed when `staging` drops.
    }

    async fn grade_in(&self, staging: &StagingArea, namespace: &str) -> Result<Submission> {
        let config = &self.deps.config;
        let phase_config = config.phase(self.job.phase)?.clone();
        let repo = staging.repo_dir();
        let mut notes = String::new();

        // Fetch
        self.events.update("Fetching repo...");
        self.deps.vcs.clone_repo(&self.job.repo_url, &repo).await?;
        self.events.update("Successfully fetched repo");

        // Verify
        self.events.update("Verifying commits...");
        let verifier = CommitVerifier::new(
            config.clone(),
            self.deps.dao.clone(),
            self.deps.vcs.clone(),
        );
        let verdict = verifier
            .verify(&self.job.submitter_id, self.job.phase, &repo)
            .await?;
        self.events.update(if verdict.verified {
            "Passed commit verification."
        } else {
            "Failed commit verification. Continuing with grading anyways."
        });

        // Structure check: the project must sit at the repository root.
        for required in &config.required_files {
            if !repo.join(required).exists() {
                return Err(GraderError::ProjectStructure {
                    missing: required.clone(),
                });
            }
        }

        // Build
        self.events.update("Building project...");
        let build = tokio::time::timeout(config.build_timeout, self.deps.builder.build(&repo))
            .await
            .map_err(|_| GraderError::BuildFailure {
                message: format!(
                    "Build timed out after {} seconds",
                    config.build_timeout.as_secs()
                ),
                diagnostics: None,
            })??;
        if !build.success() {
            return Err(GraderError::BuildFailure {
                message: "Build exited with a non-zero status".to_string(),
                diagnostics: Some(extract_diagnostics(&build.diagnostic_text, staging)),
            });
        }
        self.events.update("Successfully built project");

        // Regression check against the previous phase, when configured.
        if let Some(previous) = phase_config.previous_phase {
            self.events
                .update(format!("Re-running {previous} tests..."));
            match self
                .deps
                .harness
                .run_suite(&repo, previous, RubricItemKind::PassoffTests, namespace)
                .await
            {
                Ok(raw) => {
                    let failed = raw
                        .iter()
                        .filter(|t| !t.passed && t.ec_category.is_none())
                        .count();
                    if failed > 0 {
                        notes.push_str(&format!(
                            "{failed} {previous} tests failed after your changes.\n"
                        ));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        submitter = %self.job.submitter_id,
                        error = %e,
                        "previous-phase regression check failed to run"
                    );
                    notes.push_str(&format!("Could not re-run {previous} tests.\n"));
                }
            }
        }

        // Evaluate each configured rubric item.
        let quality = self
            .evaluate_item(&phase_config, RubricItemKind::Quality, &repo, namespace)
            .await?;
        let passoff = self
            .evaluate_item(&phase_config, RubricItemKind::PassoffTests, &repo, namespace)
            .await?;
        let unit_tests = self
            .evaluate_item(&phase_config, RubricItemKind::UnitTests, &repo, namespace)
            .await?;

        // Score
        let mut rubric = Rubric {
            passoff,
            unit_tests,
            quality,
            verification: Some(verdict.clone()),
            passed: false,
            notes: String::new(),
        };
        rubric.passed = phase_config.pass_rule.evaluate(&rubric);

        let raw_score = score::rubric_score(&rubric, self.job.phase, config)?;
        let due_date = self
            .deps
            .ledger
            .get_due_date(&self.job.submitter_id, self.job.phase)
            .await
            .map_err(|e| {
                GraderError::Configuration(format!(
                    "failed to get due date for {}: {e}",
                    self.job.phase
                ))
            })?;
        let days_late = score::days_late(
            self.job.enqueue_time,
            due_date,
            config.local_offset,
            &config.holidays,
            config.max_late_days,
        );
        let mut final_score = score::final_score(raw_score, days_late, config.late_penalty_per_day);
        if days_late > 0 {
            notes.push_str(&format!(
                "{days_late} days late. -{}%\n",
                (days_late as f32 * config.late_penalty_per_day * 100.0).round()
            ));
        }
        if !verdict.verified {
            final_score =
                score::apply_verification_penalty(final_score, config.verification.penalty_pct);
            notes.push_str(&format!(
                "Commit verification failed. -{}%\n",
                config.verification.penalty_pct
            ));
        }

        // Non-regression gate against the ledger's recorded score.
        let mut push = false;
        if rubric.passed {
            let recorded = self
                .deps
                .ledger
                .get_score(&self.job.submitter_id, self.job.phase)
                .await?;
            push = score::should_sync(true, final_score, recorded, self.job.phase, config);
            if !push {
                notes.push_str(&format!(
                    "Submission did not improve current score. ({}%) Score not recorded to the grade ledger.\n",
                    recorded.unwrap_or(0.0) * 100.0
                ));
            }
        }

        // Persist
        self.events.update("Saving results...");
        let verified_status = rubric.passed.then(|| match (verdict.reused_prior_decision, verdict.verified) {
            (true, true) => VerifiedStatus::PreviouslyApproved,
            (false, true) => VerifiedStatus::ApprovedAutomatically,
            (_, false) => VerifiedStatus::Unapproved,
        });
        let submission = Submission {
            submitter_id: self.job.submitter_id.clone(),
            repo_url: self.job.repo_url.clone(),
            head_hash: verdict.head_hash.clone(),
            hand_in_time: self.job.enqueue_time,
            phase: self.job.phase,
            passed: rubric.passed,
            final_score,
            commit_count: verdict.total_commits,
            notes,
            rubric,
            verified_status,
        };
        self.deps.dao.insert_submission(submission.clone()).await?;

        // Sync (conditional). The submission is already persisted; a ledger
        // failure here is reported but never rolled back or retried inline.
        if push {
            self.events.update("Recording score on the ledger...");
            let late_adjustment = 1.0 - days_late as f32 * config.late_penalty_per_day;
            self.send_to_ledger(&submission, &phase_config, late_adjustment)
                .await?;
        }

        Ok(submission)
    }

    async fn evaluate_item(
        &self,
        phase_config: &PhaseConfig,
        kind: RubricItemKind,
        repo: &std::path::Path,
        namespace: &str,
    ) -> Result<Option<RubricItem>> {
        let Some(item_config) = item_config(&phase_config.rubric, kind) else {
            return Ok(None);
        };
        self.events.update(match kind {
            RubricItemKind::Quality => "Running quality checks...",
            RubricItemKind::PassoffTests => "Running passoff tests...",
            RubricItemKind::UnitTests => "Running custom tests...",
        });
        let raw = self
            .deps
            .harness
            .run_suite(repo, self.job.phase, kind, namespace)
            .await?;
        let results = score::item_results(
            &kind.to_string(),
            &raw,
            phase_config.extra_credit_value,
            item_config.possible_points,
        );
        Ok(Some(score::rubric_item(item_config, results)))
    }

    async fn send_to_ledger(
        &self,
        submission: &Submission,
        phase_config: &PhaseConfig,
        late_adjustment: f32,
    ) -> Result<()> {
        let mut item_points = Vec::new();
        let mut item_comments = Vec::new();
        for (kind, item) in submission.rubric.items() {
            let Some(config) = item_config(&phase_config.rubric, kind) else {
                continue;
            };
            if config.possible_points <= 0.0 {
                continue;
            }
            item_points.push((
                config.ledger_item_id.clone(),
                item.results.score * config.possible_points * late_adjustment,
            ));
            item_comments.push((config.ledger_item_id.clone(), item.results.notes.clone()));
        }

        self.deps
            .ledger
            .submit_score(
                &submission.submitter_id,
                submission.phase,
                &item_points,
                &item_comments,
                &submission.notes,
            )
            .await
    }
}

fn item_config(
    rubric: &RubricConfig,
    kind: RubricItemKind,
) -> Option<&crate::config::RubricConfigItem> {
    match kind {
        RubricItemKind::PassoffTests => rubric.passoff.as_ref(),
        RubricItemKind::UnitTests => rubric.unit_tests.as_ref(),
        RubricItemKind::Quality => rubric.quality.as_ref(),
    }
}

/// Surface only the diagnostic lines relevant to the failure, stopping at the
/// build tool's help trailer and stripping local path prefixes.
fn extract_diagnostics(output: &str, staging: &StagingArea) -> String {
    let repo_prefix = staging.repo_dir().display().to_string();
    let staging_prefix = staging.path().display().to_string();
    let mut lines = Vec::new();
    for line in output.lines() {
        if line.contains(DIAGNOSTIC_TRAILER) {
            break;
        }
        if line.contains(DIAGNOSTIC_MARKER) {
            lines.push(line.replace(&repo_prefix, "").replace(&staging_prefix, ""));
        }
    }
    lines.join("\n")
}
