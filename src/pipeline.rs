
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use anyhow::Result;
use chrono::Local;
use tracing::{info, warn};

use crate::aggregate;
use crate::cache::{digest_args, DiffCache};
use crate::churn::{self, CommitChurn};
use crate::cli::{Config, RevisionSpec};
use crate::diff::{parse_unified_diff, DiffOptions, FileDiffStat};
use crate::error::ChurnError;
use crate::message;
use crate::prefetch::{self, CancelToken};
use crate::rename::{self, RealDiffSource, RenamePair, RenameTransition};
use crate::report::{self, CommitRow, RunMeta, RunTiming, RunVersions};
use crate::svn::{diff_between_args, Commit, SvnClient};
use crate::util::{display_svn_datetime, join_repo_path};

const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the whole analysis: log, filter, plan, prefetch, per-revision
/// diff accounting, rename correction, aggregation, report writing.
pub fn run(config: &Config, cancel: &CancelToken) -> Result<()> {
    let client = SvnClient::new(&config.svn_executable, config.svn_timeout);
    let svn_version = client.version()?;
    let started_at = Local::now();
    let run_start = Instant::now();

    let repo_info = client.repo_info(&config.repo_url)?;
    let from = resolve_revision(config.from_revision, repo_info.head_revision);
    let to = resolve_revision(config.to_revision, repo_info.head_revision);
    if from > to {
        return Err(ChurnError::Usage(format!(
            "--from-revision {} exceeds --to-revision {}",
            from, to
        ))
        .into());
    }

    info!("reading log of {} for r{}:{}", config.repo_url, from, to);
    let log_start = Instant::now();
    let mut commits = client.log(&config.repo_url, from, to)?;
    let log_ms = log_start.elapsed().as_millis();
    info!("log yielded {} commits", commits.len());

    for commit in &mut commits {
        commit.changed_paths_filtered = config.filter.apply(&commit.changed_paths);
    }

    let plan = prefetch::build_plan(&commits, &config.repo_url);

    if config.dry_run {
        println!(
            "dry run: {} commits, {} revisions need a diff fetch",
            commits.len(),
            plan.items.len()
        );
        return Ok(());
    }

    let cache = DiffCache::new(&config.cache_dir);
    let prefetch_start = Instant::now();
    let outcome = prefetch::execute(
        &client,
        &cache,
        &config.repo_url,
        &plan,
        config.parallelism,
        cancel,
        config.show_progress,
    )?;
    let prefetch_ms = prefetch_start.elapsed().as_millis();
    info!(
        "prefetch done: {} fetched, {} cache hits, {} unavailable",
        outcome.fetched,
        outcome.cache_hits,
        outcome.unavailable.len()
    );

    let analyze_start = Instant::now();
    let unavailable: BTreeSet<u64> = outcome.unavailable.iter().copied().collect();
    let real_diffs = SvnRealDiff {
        client: &client,
        cache: &cache,
        repo_url: &config.repo_url,
        root_url: &repo_info.root_url,
        options: config.diff_options,
    };

    let mut churns: BTreeMap<u64, CommitChurn> = BTreeMap::new();
    let mut commit_rows: Vec<CommitRow> = Vec::with_capacity(commits.len());
    let mut transitions: Vec<RenameTransition> = vec![];
    let mut seen_transitions: BTreeSet<(u64, Option<String>, Option<String>)> = BTreeSet::new();

    for commit in &mut commits {
        if unavailable.contains(&commit.revision) {
            commit.diff_unavailable = true;
        }
        let pairs = analyze_commit(
            commit,
            &client,
            &cache,
            &config.repo_url,
            &repo_info.rel_path,
            config.diff_options,
            &real_diffs,
        );
        transitions.extend(rename::emit_transitions(commit, &pairs, &mut seen_transitions));
        let commit_churn = churn::derive(commit);
        churns.insert(commit.revision, commit_churn);
        commit_rows.push(CommitRow {
            revision: commit.revision,
            author: commit.author.clone(),
            date: display_svn_datetime(&commit.date),
            file_count: commit_churn.file_count,
            added: commit_churn.added,
            deleted: commit_churn.deleted,
            churn: commit_churn.churn,
            entropy: commit_churn.entropy,
            message: message::summarize(&commit.message, config.max_message_length),
        });
    }

    let committer_rows = aggregate::aggregate(&commits, &churns, &plan);
    let analyze_ms = analyze_start.elapsed().as_millis();

    report::write_commits_csv(&config.out_directory, &commit_rows)?;
    report::write_committers_csv(&config.out_directory, &committer_rows)?;
    report::write_transitions_csv(&config.out_directory, &transitions)?;
    report::write_run_meta(
        &config.out_directory,
        &RunMeta {
            parameters: config.parameters.clone(),
            timing: RunTiming {
                started_at: started_at.to_rfc3339(),
                finished_at: Local::now().to_rfc3339(),
                elapsed_ms: run_start.elapsed().as_millis(),
                log_ms,
                prefetch_ms,
                analyze_ms,
            },
            versions: RunVersions {
                svn: svn_version,
                tool: TOOL_VERSION.to_string(),
            },
        },
    )?;
    info!(
        "wrote {} commit rows, {} committer rows, {} transitions to {}",
        commit_rows.len(),
        committer_rows.len(),
        transitions.len(),
        config.out_directory.display()
    );

    if cancel.is_cancelled() {
        //  The log phase completed, so partial outputs were flushed; the
        //  run itself still counts as aborted.
        return Err(ChurnError::Cancelled.into());
    }
    Ok(())
}

fn resolve_revision(spec: RevisionSpec, head: u64) -> u64 {
    match spec {
        RevisionSpec::Number(n) => n,
        RevisionSpec::Head => head,
    }
}

/// Fill `file_diff_stats` for one commit: read (or re-fetch) its diff,
/// parse it, qualify the diff paths to log form, keep filtered paths
/// only, zero-fill property-only files, then apply rename correction.
/// Returns the detected rename pairs for transition emission.
fn analyze_commit(
    commit: &mut Commit,
    client: &SvnClient,
    cache: &DiffCache,
    repo_url: &str,
    repo_prefix: &str,
    options: DiffOptions,
    real_diffs: &SvnRealDiff,
) -> Vec<RenamePair> {
    if commit.changed_paths_filtered.is_empty() {
        return vec![];
    }

    let raw = if commit.diff_unavailable {
        BTreeMap::new()
    } else {
        match load_revision_diff(commit.revision, client, cache, repo_url) {
            Ok(bytes) => parse_unified_diff(&String::from_utf8_lossy(&bytes), options),
            Err(err) => {
                let demoted = ChurnError::DiffUnavailable(commit.revision);
                warn!("{demoted}, commit counts actions only: {err:#}");
                commit.diff_unavailable = true;
                BTreeMap::new()
            }
        }
    };

    let mut qualified: BTreeMap<String, FileDiffStat> = raw
        .into_iter()
        .map(|(path, stat)| (join_repo_path(repo_prefix, &path), stat))
        .collect();

    for changed in &commit.changed_paths_filtered {
        let stat = qualified.remove(&changed.path).unwrap_or_default();
        commit.file_diff_stats.insert(changed.path.clone(), stat);
    }

    //  Renames can only be corrected when the revision's diff arrived;
    //  an unavailable diff leaves the raw action rows in place.
    if commit.diff_unavailable {
        return vec![];
    }
    let pairs = rename::detect_renames(commit);
    rename::correct_stats(commit, &pairs, real_diffs);
    pairs
}

fn load_revision_diff(
    revision: u64,
    client: &SvnClient,
    cache: &DiffCache,
    repo_url: &str,
) -> Result<Vec<u8>> {
    let key = digest_args(
        repo_url,
        revision,
        &crate::svn::diff_revision_args(repo_url, revision),
    );
    if let Some(bytes) = cache.read(&key) {
        return Ok(bytes);
    }
    //  Miss: either the prefetch was cancelled or the cache write failed.
    let bytes = prefetch::fetch_with_retry(client, repo_url, revision)?;
    if let Err(err) = cache.write(&key, &bytes) {
        warn!(revision, "cache write failed: {err:#}");
    }
    Ok(bytes)
}

/// True rename deltas via `svn diff --old=A@R1 --new=B@R2`, routed
/// through the same cache as the per-revision fetches.
struct SvnRealDiff<'a> {
    client: &'a SvnClient,
    cache: &'a DiffCache,
    repo_url: &'a str,
    root_url: &'a str,
    options: DiffOptions,
}

impl RealDiffSource for SvnRealDiff<'_> {
    fn real_stat(&self, pair: &RenamePair, revision: u64) -> Result<FileDiffStat> {
        let old_target = format!("{}{}", self.root_url, pair.old_path);
        let new_target = format!("{}{}", self.root_url, pair.new_path);
        let args = diff_between_args(&old_target, pair.copy_revision, &new_target, revision);
        let key = digest_args(self.repo_url, revision, &args);

        let bytes = match self.cache.read(&key) {
            Some(bytes) => bytes,
            None => {
                let bytes = self.client.diff_between(
                    &old_target,
                    pair.copy_revision,
                    &new_target,
                    revision,
                )?;
                if let Err(err) = self.cache.write(&key, &bytes) {
                    warn!(revision, "cache write failed: {err:#}");
                }
                bytes
            }
        };

        //  The diff covers exactly one file; fold whatever Index blocks
        //  appear into a single stat.
        let parsed = parse_unified_diff(&String::from_utf8_lossy(&bytes), self.options);
        let mut merged = FileDiffStat::default();
        for (_, stat) in parsed {
            merged.added_lines += stat.added_lines;
            merged.deleted_lines += stat.deleted_lines;
            merged.hunks.extend(stat.hunks);
            merged.is_binary |= stat.is_binary;
            merged.added_line_hashes.extend(stat.added_line_hashes);
            merged.deleted_line_hashes.extend(stat.deleted_line_hashes);
        }
        Ok(merged)
    }
}
