use std::collections::BTreeMap;

use chrono::FixedOffset;

use crate::collab::CommitInfo;
use crate::model::{CommitHistogram, CommitWindow};

/// Bucket the walked commits by civil calendar day and flag anomalies.
///
/// `commits` is the hash-bounded walk between the windows, oldest first.
/// A commit authored after the upper bound is a "future" commit; one authored
/// before the lower bound sits inside the hash range but claims an earlier
/// time, which is just as suspicious.
pub fn build_histogram(
    commits: &[CommitInfo],
    lower_window: CommitWindow,
    upper_window: CommitWindow,
    offset: FixedOffset,
) -> CommitHistogram {
    let mut per_day_counts: BTreeMap<chrono::NaiveDate, u32> = BTreeMap::new();
    let mut per_commit_lines_changed = Vec::with_capacity(commits.len());
    let mut has_future_commit = false;
    let mut has_past_commit = false;
    let mut is_chronological = true;

    let mut previous_time = None;
    for commit in commits {
        let day = commit.author_time.with_timezone(&offset).date_naive();
        *per_day_counts.entry(day).or_insert(0) += 1;
        per_commit_lines_changed.push(commit.lines_changed);

        if commit.author_time > upper_window.timestamp {
            has_future_commit = true;
        }
        if commit.author_time < lower_window.timestamp {
            has_past_commit = true;
        }
        if let Some(previous) = previous_time {
            if commit.author_time < previous {
                is_chronological = false;
            }
        }
        previous_time = Some(commit.author_time);
    }

    CommitHistogram {
        per_day_counts,
        total_commits: commits.len() as u32,
        per_commit_lines_changed,
        has_future_commit,
        has_past_commit,
        is_chronological,
        lower_window,
        upper_window,
    }
}
