use std::collections::BTreeMap;

use crate::model::{RawTest, TestNode};

/// Build a fully aggregated result tree from the harness's raw output.
///
/// Test names are dot-separated paths; each leaf carries one pass/fail count,
/// with extra-credit-tagged leaves counted separately from standard tests.
/// All leaves are inserted first and aggregates are computed bottom-up once,
/// so the returned tree is read-only.
pub fn build_tree(root_name: &str, raw: &[RawTest]) -> TestNode {
    let mut root = TestNode {
        name: root_name.to_string(),
        ..TestNode::default()
    };

    for test in raw {
        let mut node = &mut root;
        for segment in test.name.split('.') {
            node = node
                .children
                .entry(segment.to_string())
                .or_insert_with(|| TestNode {
                    name: segment.to_string(),
                    ..TestNode::default()
                });
        }
        match &test.ec_category {
            Some(category) => {
                node.ec_category = Some(category.clone());
                if test.passed {
                    node.direct_ec_passed += 1;
                } else {
                    node.direct_ec_failed += 1;
                }
            }
            None => {
                if test.passed {
                    node.direct_passed += 1;
                } else {
                    node.direct_failed += 1;
                }
            }
        }
    }

    aggregate(&mut root);
    root
}

/// Post-order aggregation: each node's counts are its direct counts plus the
/// recursive sum over its children.
fn aggregate(node: &mut TestNode) {
    node.passed = node.direct_passed;
    node.failed = node.direct_failed;
    node.ec_passed = node.direct_ec_passed;
    node.ec_failed = node.direct_ec_failed;
    for child in node.children.values_mut() {
        aggregate(child);
        node.passed += child.passed;
        node.failed += child.failed;
        node.ec_passed += child.ec_passed;
        node.ec_failed += child.ec_failed;
    }
}

/// Per-category extra-credit pass ratios across all tagged leaves.
///
/// One-pass depth-first visit of every node exactly once, accumulating direct
/// counts per category.
pub fn extra_credit_scores(root: &TestNode) -> BTreeMap<String, f32> {
    let mut counts: BTreeMap<String, (u32, u32)> = BTreeMap::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if let Some(category) = &node.ec_category {
            let entry = counts.entry(category.clone()).or_insert((0, 0));
            entry.0 += node.direct_ec_passed;
            entry.1 += node.direct_ec_failed;
        }
        stack.extend(node.children.values());
    }

    counts
        .into_iter()
        .filter(|(_, (passed, failed))| passed + failed > 0)
        .map(|(category, (passed, failed))| {
            (category, passed as f32 / (passed + failed) as f32)
        })
        .collect()
}
