
use std::collections::BTreeMap;

use serde::Serialize;

use crate::churn::CommitChurn;
use crate::prefetch::PrefetchPlan;
use crate::svn::{Action, Commit};

/// Per-author totals over the analyzed range.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommitterTotals {
    pub author: String,
    pub commit_count: u64,
    pub added: u64,
    pub deleted: u64,
    pub churn: u64,
    pub action_a: u64,
    pub action_m: u64,
    pub action_d: u64,
    pub action_r: u64,
}

/// Group commits by author and sum counts, churn, and per-action tallies.
/// Action counters come from the filtered path set, so excluded files and
/// directories never contribute. Authors resolve through the planner's
/// revision index, covering action-only commits that fetched no diff.
/// Rows come back sorted by author, code-point order.
pub fn aggregate(
    commits: &[Commit],
    churns: &BTreeMap<u64, CommitChurn>,
    plan: &PrefetchPlan,
) -> Vec<CommitterTotals> {
    let mut totals: BTreeMap<String, CommitterTotals> = BTreeMap::new();

    for commit in commits {
        let author = plan
            .rev_to_author
            .get(&commit.revision)
            .cloned()
            .unwrap_or_else(|| commit.author.clone());

        let entry = totals
            .entry(author.clone())
            .or_insert_with(|| CommitterTotals {
                author: author.clone(),
                ..CommitterTotals::default()
            });

        entry.commit_count += 1;
        if let Some(churn) = churns.get(&commit.revision) {
            entry.added += churn.added;
            entry.deleted += churn.deleted;
            entry.churn += churn.churn;
        }
        for changed in &commit.changed_paths_filtered {
            match changed.action {
                Action::Add => entry.action_a += 1,
                Action::Modify => entry.action_m += 1,
                Action::Delete => entry.action_d += 1,
                Action::Replace => entry.action_r += 1,
            }
        }
    }

    totals.into_values().collect()
}
