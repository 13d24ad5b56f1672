//! Hierarchical result aggregation, rubric scoring, late penalty, and the
//! ledger non-regression gate.

pub mod tree;

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc, Weekday};

use crate::config::{GradingConfig, RubricConfigItem};
use crate::error::{GraderError, Result};
use crate::model::{ItemResults, Phase, RawTest, Rubric, RubricItem, TestNode};

/// Aggregate one rubric item's raw harness output into normalized results.
pub fn item_results(
    root_name: &str,
    raw: &[RawTest],
    extra_credit_value: f32,
    possible_points: f32,
) -> ItemResults {
    let tree = tree::build_tree(root_name, raw);
    let score = item_score(&tree, extra_credit_value);
    let notes = item_notes(&tree, extra_credit_value);
    ItemResults {
        score,
        possible_points,
        notes,
        test_tree: Some(tree),
    }
}

/// Standard score is the aggregated pass ratio at the root. Extra credit only
/// applies on a perfect standard score: each fully passing category adds one
/// unit of the configured value. The sum is deliberately not capped at 1.0.
fn item_score(tree: &TestNode, extra_credit_value: f32) -> f32 {
    let total_standard = tree.passed + tree.failed;
    if total_standard == 0 {
        return 0.0;
    }
    let mut score = tree.passed as f32 / total_standard as f32;
    if score < 1.0 {
        return score;
    }
    for ratio in tree::extra_credit_scores(tree).values() {
        if *ratio == 1.0 {
            score += extra_credit_value;
        }
    }
    score
}

fn item_notes(tree: &TestNode, extra_credit_value: f32) -> String {
    let mut notes = if tree.failed == 0 {
        "All required tests passed".to_string()
    } else {
        "Some required tests failed".to_string()
    };

    let total_ec: f32 =
        tree::extra_credit_scores(tree).values().sum::<f32>() * extra_credit_value;
    if total_ec > 0.0 {
        notes.push_str(&format!("\nExtra credit tests: +{}%", total_ec * 100.0));
    }
    notes
}

/// Rubric-level normalization over the present items:
/// Σ(score × possible) / Σ(possible).
pub fn rubric_score(rubric: &Rubric, phase: Phase, config: &GradingConfig) -> Result<f32> {
    let total_possible = config.phase(phase)?.rubric.total_possible();
    if total_possible == 0.0 {
        return Err(GraderError::Configuration(format!(
            "total possible points for {phase} is 0"
        )));
    }

    let earned: f32 = rubric
        .items()
        .map(|(_, item)| item.results.score * item.results.possible_points)
        .sum();
    Ok(earned / total_possible)
}

/// Business days late in the submitter's civil timezone, skipping weekends
/// and the configured holidays, clamped to `cap`. Never negative.
pub fn days_late(
    hand_in: DateTime<Utc>,
    due: DateTime<Utc>,
    offset: FixedOffset,
    holidays: &HashSet<NaiveDate>,
    cap: u32,
) -> u32 {
    let mut days = 0;
    let mut cursor = due;
    while cursor < hand_in && days < cap {
        cursor += Duration::days(1);
        let civil = cursor.with_timezone(&offset).date_naive();
        let weekend = matches!(civil.weekday(), Weekday::Sat | Weekday::Sun);
        if !weekend && !holidays.contains(&civil) {
            days += 1;
        }
    }
    days
}

/// Apply the late penalty to the normalized rubric score, flooring at 0.
pub fn final_score(rubric_score: f32, days_late: u32, penalty_per_day: f32) -> f32 {
    (rubric_score - days_late as f32 * penalty_per_day).max(0.0)
}

/// Deduction applied when commit verification failed.
pub fn apply_verification_penalty(score: f32, penalty_pct: u32) -> f32 {
    score * (1.0 - penalty_pct as f32 / 100.0)
}

/// Non-regression gate: push to the ledger only when the submission passed
/// and strictly improves the recorded score, except for the always-push
/// (terminal) phases.
pub fn should_sync(
    passed: bool,
    final_score: f32,
    ledger_score: Option<f32>,
    phase: Phase,
    config: &GradingConfig,
) -> bool {
    if !passed {
        return false;
    }
    if config.always_push_phases.contains(&phase) {
        return true;
    }
    final_score > ledger_score.unwrap_or(0.0)
}

/// Build a rubric item from aggregated results and its configuration entry.
pub fn rubric_item(config: &RubricConfigItem, results: ItemResults) -> RubricItem {
    RubricItem {
        category: config.category.clone(),
        criteria: config.criteria.clone(),
        results,
    }
}
