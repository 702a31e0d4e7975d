
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::cache::{digest_args, DiffCache};
use crate::error::ChurnError;
use crate::svn::{diff_revision_args, Commit, SvnClient};

//  Backoff slept before each retry of a failed diff fetch.
const RETRY_DELAYS: [Duration; 2] = [Duration::from_millis(250), Duration::from_secs(1)];

#[derive(Debug, Clone)]
pub struct PrefetchItem {
    pub revision: u64,
    pub args_digest: String,
}

/// Work list for the diff prefetch plus the author index used later by
/// the committer aggregation. `rev_to_author` covers every commit, even
/// ones that yield no prefetch item.
#[derive(Debug, Default)]
pub struct PrefetchPlan {
    pub items: Vec<PrefetchItem>,
    pub rev_to_author: BTreeMap<u64, String>,
}

/// Cooperative cancellation shared between the driver and the workers.
/// Checked before each dispatch; in-flight fetches run to completion so
/// no half-written cache entries appear.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct PrefetchOutcome {
    pub cache_hits: usize,
    pub fetched: usize,
    pub unavailable: Vec<u64>,
}

/// Enumerate the revisions that need a diff fetch. A revision qualifies
/// iff any of its changed paths survived the path filter; the planner
/// never fetches anything itself.
pub fn build_plan(commits: &[Commit], repo_url: &str) -> PrefetchPlan {
    let mut plan = PrefetchPlan::default();
    for commit in commits {
        plan.rev_to_author
            .insert(commit.revision, commit.author.clone());
        if !commit.changed_paths_filtered.is_empty() {
            plan.items.push(PrefetchItem {
                revision: commit.revision,
                args_digest: digest_args(
                    repo_url,
                    commit.revision,
                    &diff_revision_args(repo_url, commit.revision),
                ),
            });
        }
    }
    plan
}

/// Fetch every planned diff into the cache with a bounded worker pool.
/// Failed revisions are demoted to "diff unavailable" instead of aborting
/// the run; cache write failures degrade the cache to best-effort.
pub fn execute(
    client: &SvnClient,
    cache: &DiffCache,
    repo_url: &str,
    plan: &PrefetchPlan,
    parallelism: usize,
    cancel: &CancelToken,
    show_progress: bool,
) -> Result<PrefetchOutcome> {
    let total = plan.items.len();
    if total == 0 {
        return Ok(PrefetchOutcome::default());
    }

    let workers = parallelism.max(1).min(total);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| anyhow::anyhow!("cannot build worker pool: {}", e))?;

    let done = AtomicUsize::new(0);
    let hits = AtomicUsize::new(0);
    let unavailable: Mutex<Vec<u64>> = Mutex::new(Vec::new());

    pool.install(|| {
        plan.items.par_iter().for_each(|item| {
            if cancel.is_cancelled() {
                return;
            }
            if cache.read(&item.args_digest).is_some() {
                hits.fetch_add(1, Ordering::Relaxed);
            } else {
                match fetch_with_retry(client, repo_url, item.revision) {
                    Ok(bytes) => {
                        if let Err(err) = cache.write(&item.args_digest, &bytes) {
                            warn!(revision = item.revision, "cache write failed: {err:#}");
                        }
                    }
                    Err(err) => {
                        let demoted = ChurnError::DiffUnavailable(item.revision);
                        warn!("{demoted}: {err:#}");
                        unavailable
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push(item.revision);
                    }
                }
            }
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            if show_progress {
                eprint!("\rfetching diffs {}/{}", finished, total);
            }
        });
    });
    if show_progress {
        eprintln!();
    }

    let mut unavailable = unavailable.into_inner().unwrap_or_else(|e| e.into_inner());
    unavailable.sort_unstable();
    let hits = hits.load(Ordering::Relaxed);
    Ok(PrefetchOutcome {
        cache_hits: hits,
        fetched: done.load(Ordering::Relaxed) - hits - unavailable.len(),
        unavailable,
    })
}

/// One fetch plus the documented retry schedule.
pub fn fetch_with_retry(client: &SvnClient, repo_url: &str, revision: u64) -> Result<Vec<u8>> {
    let mut attempt = 0;
    loop {
        match client.diff_for_revision(repo_url, revision) {
            Ok(bytes) => return Ok(bytes),
            Err(err) if attempt < RETRY_DELAYS.len() => {
                debug!(revision, attempt, "diff fetch failed, will retry: {err:#}");
                std::thread::sleep(RETRY_DELAYS[attempt]);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svn::{Action, ChangedPath, NodeKind, UNKNOWN_AUTHOR};
    use chrono::Local;
    use std::collections::{BTreeMap, BTreeSet};

    fn commit(revision: u64, author: &str, filtered: usize) -> Commit {
        let path = ChangedPath {
            path: "/trunk/a.txt".to_string(),
            action: Action::Modify,
            kind: NodeKind::File,
            copy_from_path: None,
            copy_from_rev: None,
        };
        Commit {
            revision,
            author: author.to_string(),
            date: Local::now(),
            message: String::new(),
            changed_paths: vec![path.clone()],
            changed_paths_filtered: vec![path; filtered],
            files_changed: BTreeSet::new(),
            file_diff_stats: BTreeMap::new(),
            diff_unavailable: false,
        }
    }

    #[test]
    fn every_commit_lands_in_the_author_index() {
        let commits = vec![
            commit(1, "alice", 1),
            commit(2, UNKNOWN_AUTHOR, 0),
            commit(3, "bob", 2),
        ];
        let plan = build_plan(&commits, "http://svn/repo");
        assert_eq!(plan.rev_to_author.len(), 3);
        assert_eq!(plan.rev_to_author[&2], UNKNOWN_AUTHOR);
    }

    #[test]
    fn only_commits_with_filtered_paths_need_fetches() {
        let commits = vec![commit(1, "alice", 1), commit(2, "bob", 0)];
        let plan = build_plan(&commits, "http://svn/repo");
        let revs: Vec<u64> = plan.items.iter().map(|i| i.revision).collect();
        assert_eq!(revs, vec![1]);
    }

    #[test]
    fn plan_digests_match_the_fetch_arguments() {
        let commits = vec![commit(5, "alice", 1)];
        let plan = build_plan(&commits, "http://svn/repo");
        let expected = digest_args(
            "http://svn/repo",
            5,
            &diff_revision_args("http://svn/repo", 5),
        );
        assert_eq!(plan.items[0].args_digest, expected);
    }

    #[test]
    fn cancel_token_trips_exactly_once_set() {
        let token = CancelToken::default();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }
}
