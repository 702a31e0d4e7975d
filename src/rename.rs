
use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use tracing::{debug, warn};

use crate::diff::FileDiffStat;
use crate::svn::{Action, Commit};

/// One path's fate in one revision: `(old, new)` for a rename,
/// `(old, None)` for a delete, `(None, new)` for an add.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RenameTransition {
    pub revision: u64,
    pub before_path: Option<String>,
    pub after_path: Option<String>,
}

/// A delete of `old_path` paired with an add of `new_path` carrying
/// `copyfrom=old_path`, all inside one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamePair {
    pub old_path: String,
    pub new_path: String,
    pub copy_revision: u64,
}

/// Provides the true delta between `old@copy_revision` and
/// `new@revision` for a rename pair. The pipeline backs this with
/// cached `svn diff --old/--new` calls; tests substitute fixtures.
pub trait RealDiffSource {
    fn real_stat(&self, pair: &RenamePair, revision: u64) -> Result<FileDiffStat>;
}

/// Find the rename pairs of a commit. Copies whose source was not also
/// deleted in the same revision are plain copies, not renames.
pub fn detect_renames(commit: &Commit) -> Vec<RenamePair> {
    let deleted: BTreeSet<&str> = commit
        .changed_paths_filtered
        .iter()
        .filter(|p| p.action == Action::Delete)
        .map(|p| p.path.as_str())
        .collect();

    let mut pairs = vec![];
    for changed in &commit.changed_paths_filtered {
        if !matches!(changed.action, Action::Add | Action::Replace) {
            continue;
        }
        let Some(from) = changed.copy_from_path.as_ref() else {
            continue;
        };
        if deleted.contains(from.as_str()) {
            pairs.push(RenamePair {
                old_path: from.clone(),
                new_path: changed.path.clone(),
                copy_revision: changed
                    .copy_from_rev
                    .unwrap_or_else(|| commit.revision.saturating_sub(1)),
            });
        }
    }
    pairs
}

/// Replace the inflated delete+add stats of each rename pair with the
/// real delta: the new path gets the true diff against the copy source,
/// the old path drops to zero so the move itself contributes no churn.
pub fn correct_stats(commit: &mut Commit, pairs: &[RenamePair], source: &dyn RealDiffSource) {
    for pair in pairs {
        match source.real_stat(pair, commit.revision) {
            Ok(real) => {
                if let Some(parsed) = commit.file_diff_stats.get(&pair.new_path) {
                    if carries_edits(&real, parsed) {
                        debug!(
                            revision = commit.revision,
                            path = %pair.new_path,
                            "rename also edits the file"
                        );
                    }
                }
                commit.file_diff_stats.insert(pair.new_path.clone(), real);
            }
            Err(err) => {
                //  The old path is still zeroed below; double counting a
                //  move is worse than keeping the parsed stat for the new
                //  path.
                warn!(
                    revision = commit.revision,
                    old = %pair.old_path,
                    new = %pair.new_path,
                    "real diff unavailable, keeping parsed stat: {err:#}"
                );
            }
        }
        commit
            .file_diff_stats
            .insert(pair.old_path.clone(), FileDiffStat::default());
    }
}

//  A rename carries edits when its real hunks touch line ranges the
//  per-revision diff also reported, or when it has churn at all while
//  the per-revision diff saw none.
fn carries_edits(real: &FileDiffStat, parsed: &FileDiffStat) -> bool {
    if real.churn() == 0 {
        return false;
    }
    parsed.hunks.is_empty()
        || real
            .hunks
            .iter()
            .any(|r| parsed.hunks.iter().any(|p| r.overlaps_old(p)))
}

/// Emit the transition rows of one commit, in filtered-path order.
/// `seen` is the run-wide dedup set over (revision, before, after).
pub fn emit_transitions(
    commit: &Commit,
    pairs: &[RenamePair],
    seen: &mut BTreeSet<(u64, Option<String>, Option<String>)>,
) -> Vec<RenameTransition> {
    let by_new: BTreeMap<&str, &RenamePair> =
        pairs.iter().map(|p| (p.new_path.as_str(), p)).collect();
    let consumed: BTreeSet<&str> = pairs.iter().map(|p| p.old_path.as_str()).collect();

    let mut transitions = vec![];
    let mut push = |before: Option<String>, after: Option<String>| {
        if seen.insert((commit.revision, before.clone(), after.clone())) {
            transitions.push(RenameTransition {
                revision: commit.revision,
                before_path: before,
                after_path: after,
            });
        }
    };

    for changed in &commit.changed_paths_filtered {
        match changed.action {
            Action::Add | Action::Replace => match by_new.get(changed.path.as_str()) {
                Some(pair) => push(Some(pair.old_path.clone()), Some(pair.new_path.clone())),
                None => push(None, Some(changed.path.clone())),
            },
            Action::Delete => {
                if !consumed.contains(changed.path.as_str()) {
                    push(Some(changed.path.clone()), None);
                }
            }
            Action::Modify => {}
        }
    }
    transitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Hunk;
    use crate::svn::{ChangedPath, NodeKind};
    use chrono::Local;

    fn changed(path: &str, action: Action, from: Option<(&str, u64)>) -> ChangedPath {
        ChangedPath {
            path: path.to_string(),
            action,
            kind: NodeKind::File,
            copy_from_path: from.map(|(p, _)| p.to_string()),
            copy_from_rev: from.map(|(_, r)| r),
        }
    }

    fn commit_with(revision: u64, paths: Vec<ChangedPath>) -> Commit {
        Commit {
            revision,
            author: "alice".to_string(),
            date: Local::now(),
            message: String::new(),
            changed_paths: paths.clone(),
            changed_paths_filtered: paths,
            files_changed: BTreeSet::new(),
            file_diff_stats: BTreeMap::new(),
            diff_unavailable: false,
        }
    }

    fn stat(added: u64, deleted: u64) -> FileDiffStat {
        FileDiffStat {
            added_lines: added,
            deleted_lines: deleted,
            added_line_hashes: (0..added).map(|i| format!("a{i}")).collect(),
            deleted_line_hashes: (0..deleted).map(|i| format!("d{i}")).collect(),
            ..FileDiffStat::default()
        }
    }

    struct FixedReal(FileDiffStat);

    impl RealDiffSource for FixedReal {
        fn real_stat(&self, _pair: &RenamePair, _revision: u64) -> Result<FileDiffStat> {
            Ok(self.0.clone())
        }
    }

    struct FailingReal;

    impl RealDiffSource for FailingReal {
        fn real_stat(&self, _pair: &RenamePair, _revision: u64) -> Result<FileDiffStat> {
            anyhow::bail!("no diff")
        }
    }

    #[test]
    fn delete_plus_copyfrom_add_is_a_rename() {
        let commit = commit_with(
            3,
            vec![
                changed("/trunk/b.txt", Action::Add, Some(("/trunk/a.txt", 2))),
                changed("/trunk/a.txt", Action::Delete, None),
            ],
        );
        let pairs = detect_renames(&commit);
        assert_eq!(
            pairs,
            vec![RenamePair {
                old_path: "/trunk/a.txt".to_string(),
                new_path: "/trunk/b.txt".to_string(),
                copy_revision: 2,
            }]
        );
    }

    #[test]
    fn copy_without_delete_is_not_a_rename() {
        let commit = commit_with(
            7,
            vec![changed("/trunk/c.txt", Action::Add, Some(("/trunk/b.txt", 6)))],
        );
        assert!(detect_renames(&commit).is_empty());
    }

    #[test]
    fn missing_copyfrom_rev_defaults_to_previous_revision() {
        let mut add = changed("/trunk/b.txt", Action::Add, Some(("/trunk/a.txt", 0)));
        add.copy_from_rev = None;
        let commit = commit_with(
            9,
            vec![add, changed("/trunk/a.txt", Action::Delete, None)],
        );
        assert_eq!(detect_renames(&commit)[0].copy_revision, 8);
    }

    #[test]
    fn replace_with_copyfrom_also_detects() {
        let commit = commit_with(
            4,
            vec![
                changed("/trunk/b.txt", Action::Replace, Some(("/trunk/a.txt", 3))),
                changed("/trunk/a.txt", Action::Delete, None),
            ],
        );
        assert_eq!(detect_renames(&commit).len(), 1);
    }

    #[test]
    fn correction_zeroes_old_and_installs_real_stat() {
        let mut commit = commit_with(
            3,
            vec![
                changed("/trunk/b.txt", Action::Add, Some(("/trunk/a.txt", 2))),
                changed("/trunk/a.txt", Action::Delete, None),
            ],
        );
        commit
            .file_diff_stats
            .insert("/trunk/b.txt".to_string(), stat(10, 0));
        commit
            .file_diff_stats
            .insert("/trunk/a.txt".to_string(), stat(0, 10));

        let pairs = detect_renames(&commit);
        correct_stats(&mut commit, &pairs, &FixedReal(stat(0, 0)));

        let old = &commit.file_diff_stats["/trunk/a.txt"];
        assert_eq!((old.added_lines, old.deleted_lines), (0, 0));
        assert!(old.added_line_hashes.is_empty());
        assert_eq!(commit.file_diff_stats["/trunk/b.txt"], stat(0, 0));
    }

    #[test]
    fn correction_survives_an_unavailable_real_diff() {
        let mut commit = commit_with(
            3,
            vec![
                changed("/trunk/b.txt", Action::Add, Some(("/trunk/a.txt", 2))),
                changed("/trunk/a.txt", Action::Delete, None),
            ],
        );
        commit
            .file_diff_stats
            .insert("/trunk/b.txt".to_string(), stat(10, 0));
        commit
            .file_diff_stats
            .insert("/trunk/a.txt".to_string(), stat(0, 10));

        let pairs = detect_renames(&commit);
        correct_stats(&mut commit, &pairs, &FailingReal);

        //  Old side must still be zeroed, new side keeps the parsed stat.
        assert_eq!(commit.file_diff_stats["/trunk/a.txt"], FileDiffStat::default());
        assert_eq!(commit.file_diff_stats["/trunk/b.txt"].added_lines, 10);
    }

    #[test]
    fn edit_classification_uses_hunk_overlap() {
        let real = FileDiffStat {
            added_lines: 1,
            hunks: vec![Hunk { old_start: 4, old_count: 2, new_start: 4, new_count: 3 }],
            ..FileDiffStat::default()
        };
        let parsed = FileDiffStat {
            hunks: vec![Hunk { old_start: 5, old_count: 1, new_start: 5, new_count: 1 }],
            ..FileDiffStat::default()
        };
        assert!(carries_edits(&real, &parsed));
        assert!(!carries_edits(&FileDiffStat::default(), &parsed));
    }

    #[test]
    fn transitions_cover_rename_add_and_delete() {
        let commit = commit_with(
            3,
            vec![
                changed("/trunk/b.txt", Action::Add, Some(("/trunk/a.txt", 2))),
                changed("/trunk/a.txt", Action::Delete, None),
                changed("/trunk/new.txt", Action::Add, None),
                changed("/trunk/gone.txt", Action::Delete, None),
                changed("/trunk/kept.txt", Action::Modify, None),
            ],
        );
        let pairs = detect_renames(&commit);
        let mut seen = BTreeSet::new();
        let transitions = emit_transitions(&commit, &pairs, &mut seen);

        assert_eq!(
            transitions,
            vec![
                RenameTransition {
                    revision: 3,
                    before_path: Some("/trunk/a.txt".to_string()),
                    after_path: Some("/trunk/b.txt".to_string()),
                },
                RenameTransition {
                    revision: 3,
                    before_path: None,
                    after_path: Some("/trunk/new.txt".to_string()),
                },
                RenameTransition {
                    revision: 3,
                    before_path: Some("/trunk/gone.txt".to_string()),
                    after_path: None,
                },
            ]
        );
    }

    #[test]
    fn duplicate_transitions_are_suppressed_across_calls() {
        let commit = commit_with(
            3,
            vec![
                changed("/trunk/b.txt", Action::Add, Some(("/trunk/a.txt", 2))),
                changed("/trunk/a.txt", Action::Delete, None),
            ],
        );
        let pairs = detect_renames(&commit);
        let mut seen = BTreeSet::new();
        assert_eq!(emit_transitions(&commit, &pairs, &mut seen).len(), 1);
        assert!(emit_transitions(&commit, &pairs, &mut seen).is_empty());
    }

    #[test]
    fn replace_without_copyfrom_emits_an_add_transition() {
        let commit = commit_with(
            4,
            vec![changed("/trunk/b.txt", Action::Replace, None)],
        );
        let mut seen = BTreeSet::new();
        let transitions = emit_transitions(&commit, &detect_renames(&commit), &mut seen);
        assert_eq!(
            transitions,
            vec![RenameTransition {
                revision: 4,
                before_path: None,
                after_path: Some("/trunk/b.txt".to_string()),
            }]
        );
    }
}
