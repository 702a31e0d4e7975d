
use crate::svn::Commit;

/// Derived line metrics of one commit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CommitChurn {
    pub added: u64,
    pub deleted: u64,
    pub churn: u64,
    pub entropy: f64,
    pub file_count: usize,
}

/// Sum the corrected per-file stats of a commit and fill its
/// `files_changed` set (content-bearing, non-binary files only).
pub fn derive(commit: &mut Commit) -> CommitChurn {
    let mut added = 0;
    let mut deleted = 0;
    let mut file_churns = Vec::with_capacity(commit.file_diff_stats.len());

    for (path, stat) in &commit.file_diff_stats {
        added += stat.added_lines;
        deleted += stat.deleted_lines;
        if stat.churn() > 0 {
            file_churns.push(stat.churn() as f64);
            if !stat.is_binary {
                commit.files_changed.insert(path.clone());
            }
        }
    }

    CommitChurn {
        added,
        deleted,
        churn: added + deleted,
        entropy: entropy(&file_churns),
        file_count: commit.changed_paths_filtered.len(),
    }
}

/// Normalized Shannon entropy of the churn distribution across files.
/// `0` when fewer than two files changed; `1` for a perfectly uniform
/// spread over any `n >= 2`.
pub fn entropy(churns: &[f64]) -> f64 {
    let n = churns.len();
    if n < 2 {
        return 0.0;
    }
    let total: f64 = churns.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let mut h = 0.0;
    for churn in churns {
        let p = churn / total;
        if p > 0.0 {
            h -= p * p.log2();
        }
    }
    h / (n as f64).log2()
}
