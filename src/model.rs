use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A named project milestone with its own rubric configuration and due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Phase(pub u8);

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "phase {}", self.0)
    }
}

/// How a submission's commit history was approved, if at all. `Unapproved` is
/// set by a human reviewer and overrides a reused verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifiedStatus {
    ApprovedAutomatically,
    ApprovedManually,
    PreviouslyApproved,
    Unapproved,
}

/// A (timestamp, commit-hash) pair bounding a range of commit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitWindow {
    pub timestamp: DateTime<Utc>,
    pub commit_hash: Option<String>,
}

impl CommitWindow {
    pub fn new(timestamp: DateTime<Utc>, commit_hash: Option<String>) -> Self {
        Self {
            timestamp,
            commit_hash,
        }
    }

    /// Window bound at the beginning of time, used when no prior passing
    /// submission exists.
    pub fn beginning_of_time() -> Self {
        Self {
            timestamp: DateTime::<Utc>::MIN_UTC,
            commit_hash: None,
        }
    }
}

/// Commit activity between two windows, bucketed by civil calendar day.
/// Derived and transient; computed once per verification.
#[derive(Debug, Clone)]
pub struct CommitHistogram {
    pub per_day_counts: BTreeMap<NaiveDate, u32>,
    pub total_commits: u32,
    pub per_commit_lines_changed: Vec<u32>,
    pub has_future_commit: bool,
    pub has_past_commit: bool,
    pub is_chronological: bool,
    pub lower_window: CommitWindow,
    pub upper_window: CommitWindow,
}

impl CommitHistogram {
    pub fn days_with_commits(&self) -> u32 {
        self.per_day_counts.len() as u32
    }
}

/// Outcome of commit-history verification, persisted as part of a Submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub verified: bool,
    pub reused_prior_decision: bool,
    pub total_commits: u32,
    pub days_with_commits: u32,
    pub message: Option<String>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub head_hash: String,
    pub tail_hash: Option<String>,
}

/// One test outcome from the evaluation harness. Only the pass/fail flag and
/// the optional extra-credit tag matter to the grader; the name is a
/// dot-separated path used to build the result tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTest {
    pub name: String,
    pub passed: bool,
    pub ec_category: Option<String>,
}

impl RawTest {
    pub fn standard(name: impl Into<String>, passed: bool) -> Self {
        Self {
            name: name.into(),
            passed,
            ec_category: None,
        }
    }

    pub fn extra_credit(name: impl Into<String>, passed: bool, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            ec_category: Some(category.into()),
        }
    }
}

/// A node in the hierarchical test-result tree. Aggregate counts at any node
/// equal its direct counts plus the recursive sum over its children; the tree
/// is fully aggregated at construction and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestNode {
    pub name: String,
    pub direct_passed: u32,
    pub direct_failed: u32,
    pub ec_category: Option<String>,
    pub direct_ec_passed: u32,
    pub direct_ec_failed: u32,
    pub passed: u32,
    pub failed: u32,
    pub ec_passed: u32,
    pub ec_failed: u32,
    pub children: BTreeMap<String, TestNode>,
}

/// Normalized results for one rubric item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResults {
    /// This item's own pass ratio, 0..1 (extra credit may push it above 1).
    pub score: f32,
    pub possible_points: f32,
    pub notes: String,
    pub test_tree: Option<TestNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RubricItemKind {
    PassoffTests,
    UnitTests,
    Quality,
}

impl std::fmt::Display for RubricItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RubricItemKind::PassoffTests => write!(f, "Passoff Tests"),
            RubricItemKind::UnitTests => write!(f, "Custom Tests"),
            RubricItemKind::Quality => write!(f, "Code Quality"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricItem {
    pub category: String,
    pub criteria: String,
    pub results: ItemResults,
}

/// The graded rubric for one submission. Items not configured for the phase
/// are absent, never zero-scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rubric {
    pub passoff: Option<RubricItem>,
    pub unit_tests: Option<RubricItem>,
    pub quality: Option<RubricItem>,
    pub verification: Option<VerificationVerdict>,
    pub passed: bool,
    pub notes: String,
}

impl Rubric {
    /// Present items, in a fixed order.
    pub fn items(&self) -> impl Iterator<Item = (RubricItemKind, &RubricItem)> {
        [
            (RubricItemKind::PassoffTests, self.passoff.as_ref()),
            (RubricItemKind::UnitTests, self.unit_tests.as_ref()),
            (RubricItemKind::Quality, self.quality.as_ref()),
        ]
        .into_iter()
        .filter_map(|(kind, item)| item.map(|i| (kind, i)))
    }
}

/// One completed grading run. Append-only: never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub submitter_id: String,
    pub repo_url: String,
    pub head_hash: String,
    pub hand_in_time: DateTime<Utc>,
    pub phase: Phase,
    pub passed: bool,
    pub final_score: f32,
    pub commit_count: u32,
    pub notes: String,
    pub rubric: Rubric,
    pub verified_status: Option<VerifiedStatus>,
}
