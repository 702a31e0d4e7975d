
use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// One `@@` block of a unified diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: u64,
    pub old_count: u64,
    pub new_start: u64,
    pub new_count: u64,
}

impl Hunk {
    pub fn old_range(&self) -> (u64, u64) {
        (self.old_start, self.old_start + self.old_count.saturating_sub(1))
    }

    pub fn overlaps_old(&self, other: &Hunk) -> bool {
        let (a0, a1) = self.old_range();
        let (b0, b1) = other.old_range();
        ranges_overlap(a0, a1, b0, b1)
    }
}

/// Line-level result of the diff for one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileDiffStat {
    pub added_lines: u64,
    pub deleted_lines: u64,
    pub hunks: Vec<Hunk>,
    pub is_binary: bool,
    pub added_line_hashes: Vec<String>,
    pub deleted_line_hashes: Vec<String>,
}

impl FileDiffStat {
    pub fn churn(&self) -> u64 {
        self.added_lines + self.deleted_lines
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOptions {
    pub exclude_comment_only_lines: bool,
}

//  Inclusive range intersection; touching endpoints overlap.
pub fn ranges_overlap(a0: u64, a1: u64, b0: u64, b1: u64) -> bool {
    !(a1 < b0 || b1 < a0)
}

fn hunk_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@")
            .expect("Error parsing hunk header regular expression")
    })
}

//  Non-content lines emitted by `svn diff` that must never count as churn.
const SKIP_PREFIXES: [&str; 7] = [
    "--- ",
    "+++ ",
    "@@ ",
    "===",
    "\\ No newline at end of file",
    "Cannot display:",
    "svn:mime-type = ",
];

/// Parse `svn diff` output into per-file stats, keyed by the path printed
/// on each `Index:` line. Property sections are skipped wholesale; binary
/// files keep zero counts and empty hunks.
pub fn parse_unified_diff(text: &str, options: DiffOptions) -> BTreeMap<String, FileDiffStat> {
    let mut stats: BTreeMap<String, FileDiffStat> = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut in_property_section = false;

    for line in text.lines() {
        if let Some(path) = line.strip_prefix("Index: ") {
            let path = path.trim().to_string();
            stats.entry(path.clone()).or_default();
            current = Some(path);
            in_property_section = false;
            continue;
        }
        if line.starts_with("Property changes on:") {
            in_property_section = true;
            continue;
        }
        if in_property_section {
            continue;
        }
        let Some(path) = current.as_ref() else {
            continue;
        };
        //  Blank lines are neither context nor change.
        if line.is_empty() {
            continue;
        }
        let Some(stat) = stats.get_mut(path) else {
            continue;
        };

        if let Some(caps) = hunk_re().captures(line) {
            stat.hunks.push(Hunk {
                old_start: capture_number(&caps, 1, 0),
                old_count: capture_number(&caps, 2, 1),
                new_start: capture_number(&caps, 3, 0),
                new_count: capture_number(&caps, 4, 1),
            });
            continue;
        }
        if line.starts_with("Binary files ") || line.starts_with("Cannot display:") {
            stat.is_binary = true;
            continue;
        }
        if SKIP_PREFIXES.iter().any(|p| line.starts_with(p)) {
            continue;
        }

        match line.as_bytes()[0] {
            b'+' => record_line(stat, &line[1..], true, options),
            b'-' => record_line(stat, &line[1..], false, options),
            _ => {}
        }
    }
    stats
}

fn capture_number(caps: &regex::Captures, index: usize, default: u64) -> u64 {
    caps.get(index)
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .unwrap_or(default)
}

fn record_line(stat: &mut FileDiffStat, body: &str, added: bool, options: DiffOptions) {
    if options.exclude_comment_only_lines && is_comment_only(body) {
        return;
    }
    let digest = line_digest(body);
    if added {
        stat.added_lines += 1;
        stat.added_line_hashes.push(digest);
    } else {
        stat.deleted_lines += 1;
        stat.deleted_line_hashes.push(digest);
    }
}

//  Language-agnostic single-line comment heuristic.
fn is_comment_only(body: &str) -> bool {
    let trimmed = body.trim();
    trimmed.is_empty()
        || ["//", "#", "--", "/*", "*", "*/"]
            .iter()
            .any(|marker| trimmed.starts_with(marker))
}

pub fn line_digest(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}
