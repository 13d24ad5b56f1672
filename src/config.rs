use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate};

use crate::error::{GraderError, Result};
use crate::model::Phase;

/// Commit-history verification thresholds.
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    /// Commits required since the last verified window.
    pub required_commits: u32,
    /// Distinct calendar days with commits required.
    pub required_days: u32,
    /// A commit changing at least this many lines counts as significant.
    pub min_lines_changed: u32,
    /// Percentage penalty applied when verification fails.
    pub penalty_pct: u32,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            required_commits: 10,
            required_days: 3,
            min_lines_changed: 5,
            penalty_pct: 10,
        }
    }
}

/// Configuration for a single rubric item within a phase.
#[derive(Debug, Clone)]
pub struct RubricConfigItem {
    pub category: String,
    pub criteria: String,
    pub possible_points: f32,
    /// Rubric item id in the external grade ledger.
    pub ledger_item_id: String,
}

/// Which rubric items exist for a phase. Any subset may be absent.
#[derive(Debug, Clone, Default)]
pub struct RubricConfig {
    pub passoff: Option<RubricConfigItem>,
    pub unit_tests: Option<RubricConfigItem>,
    pub quality: Option<RubricConfigItem>,
}

impl RubricConfig {
    pub fn total_possible(&self) -> f32 {
        [&self.passoff, &self.unit_tests, &self.quality]
            .into_iter()
            .flatten()
            .map(|item| item.possible_points)
            .sum()
    }
}

/// The phase's pass predicate over the present items' scores.
#[derive(Debug, Clone, Copy)]
pub enum PassRule {
    /// The passoff item's score must be at least this ratio.
    PassoffAtLeast(f32),
    /// Every present item's score must be at least this ratio.
    AllItemsAtLeast(f32),
}

impl PassRule {
    pub fn evaluate(&self, rubric: &crate::model::Rubric) -> bool {
        match self {
            PassRule::PassoffAtLeast(threshold) => rubric
                .passoff
                .as_ref()
                .is_some_and(|item| item.results.score >= *threshold),
            PassRule::AllItemsAtLeast(threshold) => rubric
                .items()
                .all(|(_, item)| item.results.score >= *threshold),
        }
    }
}

/// Per-phase configuration record. One record per phase replaces a grader
/// type per phase; the pipeline looks the record up by phase key.
#[derive(Debug, Clone)]
pub struct PhaseConfig {
    /// Whether this phase counts for commit verification.
    pub graded: bool,
    pub rubric: RubricConfig,
    /// Bonus added to an item's score for each fully passing extra-credit
    /// category, once every standard test passes.
    pub extra_credit_value: f32,
    /// When set, the previous phase's passoff suite is re-run first as a
    /// regression check. Failures are recorded but never abort.
    pub previous_phase: Option<Phase>,
    pub pass_rule: PassRule,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            graded: true,
            rubric: RubricConfig::default(),
            extra_credit_value: 0.0,
            previous_phase: None,
            pass_rule: PassRule::PassoffAtLeast(1.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GradingConfig {
    /// Size of the worker pool.
    pub worker_count: usize,
    /// Root under which per-job staging directories are created.
    pub staging_root: PathBuf,
    /// Timeout for the external build step.
    pub build_timeout: Duration,
    /// Files that must exist at the repository root for the project to be
    /// structured correctly (e.g. the build manifest). Checked before the
    /// build so a misplaced project fails with a readable message.
    pub required_files: Vec<PathBuf>,
    /// Score deduction per late day, out of 1.
    pub late_penalty_per_day: f32,
    /// Late days are capped here before the penalty applies.
    pub max_late_days: u32,
    /// Submitters' civil timezone offset.
    pub local_offset: FixedOffset,
    /// Holidays skipped when counting late days.
    pub holidays: HashSet<NaiveDate>,
    pub verification: VerificationConfig,
    /// Terminal phases whose scores are always pushed to the ledger when
    /// passed, regardless of the non-regression rule.
    pub always_push_phases: HashSet<Phase>,
    pub phases: HashMap<Phase, PhaseConfig>,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            staging_root: PathBuf::from("."),
            build_timeout: Duration::from_secs(90),
            required_files: Vec::new(),
            late_penalty_per_day: 0.1,
            max_late_days: 5,
            local_offset: FixedOffset::west_opt(7 * 3600).expect("valid offset"),
            holidays: HashSet::new(),
            verification: VerificationConfig::default(),
            always_push_phases: HashSet::new(),
            phases: HashMap::new(),
        }
    }
}

impl GradingConfig {
    pub fn with_phase(mut self, phase: Phase, config: PhaseConfig) -> Self {
        self.phases.insert(phase, config);
        self
    }

    /// Look up the configuration for a phase. An unknown phase is a
    /// deployment bug, not a submitter problem.
    pub fn phase(&self, phase: Phase) -> Result<&PhaseConfig> {
        self.phases
            .get(&phase)
            .ok_or_else(|| GraderError::Configuration(format!("no configuration for {phase}")))
    }
}
