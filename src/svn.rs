
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Local};
use roxmltree::{Document, Node};

use crate::diff::FileDiffStat;
use crate::error::ChurnError;
use crate::util::parse_svn_date_opt;

pub const UNKNOWN_AUTHOR: &str = "(unknown)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Modify,
    Delete,
    Replace,
}

impl Action {
    //  The log reports a single upper-case letter per path.
    fn from_code(code: &str) -> Action {
        match code.chars().next() {
            Some('A') => Action::Add,
            Some('D') => Action::Delete,
            Some('R') => Action::Replace,
            _ => Action::Modify,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "A",
            Action::Modify => "M",
            Action::Delete => "D",
            Action::Replace => "R",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
    Unknown,
}

impl NodeKind {
    fn from_attr(kind: &str) -> NodeKind {
        match kind {
            "file" => NodeKind::File,
            "dir" => NodeKind::Dir,
            _ => NodeKind::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangedPath {
    pub path: String,
    pub action: Action,
    pub kind: NodeKind,
    pub copy_from_path: Option<String>,
    pub copy_from_rev: Option<u64>,
}

/// One revision as reported by `svn log --xml --verbose`, enriched by the
/// later pipeline stages: the path filter fills `changed_paths_filtered`,
/// the diff parser fills `file_diff_stats`, the rename resolver corrects
/// them, and the churn deriver fills `files_changed`.
#[derive(Debug, Clone)]
pub struct Commit {
    pub revision: u64,
    pub author: String,
    pub date: DateTime<Local>,
    pub message: String,
    pub changed_paths: Vec<ChangedPath>,
    pub changed_paths_filtered: Vec<ChangedPath>,
    pub files_changed: BTreeSet<String>,
    pub file_diff_stats: BTreeMap<String, FileDiffStat>,
    pub diff_unavailable: bool,
}

/// Root URL and repository-relative location of the analyzed URL,
/// from `svn info --xml`.
#[derive(Debug, Clone)]
pub struct RepoInfo {
    pub root_url: String,
    pub rel_path: String,
    pub head_revision: u64,
}

/// Wrapper around the `svn` executable. All invocations run with a
/// per-call timeout; stdout/stderr are drained on reader threads so a
/// chatty child never blocks on a full pipe.
#[derive(Debug, Clone)]
pub struct SvnClient {
    executable: String,
    timeout: Duration,
}

impl SvnClient {
    pub fn new(executable: &str, timeout: Duration) -> SvnClient {
        SvnClient {
            executable: executable.to_string(),
            timeout,
        }
    }

    //  `svn --version --quiet` doubles as the availability probe.
    pub fn version(&self) -> Result<String> {
        let output = self.run(&["--version".to_string(), "--quiet".to_string()])?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(ChurnError::SvnUnavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )
            .into())
        }
    }

    pub fn log(&self, url: &str, from: u64, to: u64) -> Result<Vec<Commit>> {
        let args = vec![
            "log".to_string(),
            "--xml".to_string(),
            "--verbose".to_string(),
            format!("--revision={}:{}", from, to),
            url.to_string(),
        ];
        let output = self.run(&args)?;
        if output.status.success() {
            let text = String::from_utf8_lossy(&output.stdout);
            parse_svn_log(&text)
        } else {
            Err(ChurnError::SvnCallFailed {
                command: "log".to_string(),
                output,
            }
            .into())
        }
    }

    pub fn repo_info(&self, url: &str) -> Result<RepoInfo> {
        let args = vec!["info".to_string(), "--xml".to_string(), url.to_string()];
        let output = self.run(&args)?;
        if output.status.success() {
            let text = String::from_utf8_lossy(&output.stdout);
            parse_svn_info(&text)
        } else {
            Err(ChurnError::SvnCallFailed {
                command: "info".to_string(),
                output,
            }
            .into())
        }
    }

    /// Unified diff of a single revision, `svn diff -c REV URL`.
    pub fn diff_for_revision(&self, url: &str, revision: u64) -> Result<Vec<u8>> {
        self.diff(diff_revision_args(url, revision), revision)
    }

    /// Unified diff between two arbitrary pegged targets,
    /// `svn diff --old=A@R1 --new=B@R2`.
    pub fn diff_between(
        &self,
        old_target: &str,
        old_rev: u64,
        new_target: &str,
        new_rev: u64,
    ) -> Result<Vec<u8>> {
        self.diff(
            diff_between_args(old_target, old_rev, new_target, new_rev),
            new_rev,
        )
    }

    fn diff(&self, args: Vec<String>, revision: u64) -> Result<Vec<u8>> {
        let output = self.run(&args)?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(ChurnError::SvnCallFailed {
                command: format!("diff (r{})", revision),
                output,
            }
            .into())
        }
    }

    fn run(&self, args: &[String]) -> Result<Output> {
        let mut child = Command::new(&self.executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ChurnError::SvnUnavailable(format!("cannot run '{}': {}", self.executable, e))
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_reader = thread::spawn(move || drain(stdout));
        let err_reader = thread::spawn(move || drain(stderr));

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        let _ = out_reader.join();
                        let _ = err_reader.join();
                        return Err(ChurnError::SvnCallTimeout {
                            command: args.join(" "),
                            seconds: self.timeout.as_secs(),
                        }
                        .into());
                    }
                    thread::sleep(Duration::from_millis(25));
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ChurnError::io(format!("waiting for {}", self.executable), e).into());
                }
            }
        };

        let stdout = out_reader.join().unwrap_or_default();
        let stderr = err_reader.join().unwrap_or_default();
        Ok(Output {
            status,
            stdout,
            stderr,
        })
    }
}

/// Argument vector for a per-revision diff fetch. Also the cache identity
/// of that fetch, so planner, executor, and resolver must all build it here.
pub fn diff_revision_args(url: &str, revision: u64) -> Vec<String> {
    vec![
        "diff".to_string(),
        "-c".to_string(),
        revision.to_string(),
        url.to_string(),
    ]
}

pub fn diff_between_args(old_target: &str, old_rev: u64, new_target: &str, new_rev: u64) -> Vec<String> {
    vec![
        "diff".to_string(),
        format!("--old={}@{}", old_target, old_rev),
        format!("--new={}@{}", new_target, new_rev),
    ]
}

fn drain<R>(reader: Option<R>) -> Vec<u8>
where
    R: Read,
{
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf);
    }
    buf
}

fn get_attr(n: &Node, name: &str) -> String {
    n.attribute(name).unwrap_or("").to_owned()
}

fn get_text(n: &Node) -> String {
    match n.first_child() {
        Some(node) => node.text().unwrap_or("").to_owned(),
        None => "".to_owned(),
    }
}

fn get_child_text(parent: &Node, name: &str) -> Option<String> {
    parent
        .children()
        .find(|n| n.has_tag_name(name))
        .map(|n| get_text(&n))
}

fn get_child_text_or(parent: &Node, name: &str, default: &str) -> String {
    get_child_text(parent, name).unwrap_or_else(|| default.to_owned())
}

fn get_log_entry_paths(log_entry: &Node) -> Vec<ChangedPath> {
    let mut paths: Vec<ChangedPath> = vec![];
    for path_node in log_entry.descendants().filter(|n| n.has_tag_name("path")) {
        let copy_from_path = if path_node.has_attribute("copyfrom-path") {
            Some(get_attr(&path_node, "copyfrom-path"))
        } else {
            None
        };
        let copy_from_rev = get_attr(&path_node, "copyfrom-rev").parse::<u64>().ok();

        paths.push(ChangedPath {
            path: get_text(&path_node),
            action: Action::from_code(&get_attr(&path_node, "action")),
            kind: NodeKind::from_attr(&get_attr(&path_node, "kind")),
            copy_from_path,
            copy_from_rev,
        });
    }
    paths
}

pub fn parse_svn_log(text: &str) -> Result<Vec<Commit>> {
    let doc =
        Document::parse(text).map_err(|e| ChurnError::Parse(format!("svn log xml: {}", e)))?;

    let mut commits = vec![];
    for log_entry in doc.descendants().filter(|n| n.has_tag_name("logentry")) {
        let rev_attr = get_attr(&log_entry, "revision");
        let revision = rev_attr
            .parse::<u64>()
            .map_err(|_| ChurnError::Parse(format!("bad revision attribute '{}'", rev_attr)))?;

        let author = match get_child_text_or(&log_entry, "author", "") {
            a if a.is_empty() => UNKNOWN_AUTHOR.to_string(),
            a => a,
        };

        commits.push(Commit {
            revision,
            author,
            date: parse_svn_date_opt(get_child_text(&log_entry, "date")),
            message: get_child_text_or(&log_entry, "msg", ""),
            changed_paths: get_log_entry_paths(&log_entry),
            changed_paths_filtered: vec![],
            files_changed: BTreeSet::new(),
            file_diff_stats: BTreeMap::new(),
            diff_unavailable: false,
        });
    }
    commits.sort_by_key(|c| c.revision);
    Ok(commits)
}

fn parse_svn_info(text: &str) -> Result<RepoInfo> {
    let doc =
        Document::parse(text).map_err(|e| ChurnError::Parse(format!("svn info xml: {}", e)))?;

    let entry = doc
        .descendants()
        .find(|n| n.has_tag_name("entry"))
        .ok_or_else(|| ChurnError::Parse("svn info: no entry element".to_string()))?;

    let head_attr = get_attr(&entry, "revision");
    let head_revision = head_attr
        .parse::<u64>()
        .map_err(|_| ChurnError::Parse(format!("bad head revision '{}'", head_attr)))?;

    let repo = entry
        .children()
        .find(|n| n.has_tag_name("repository"))
        .ok_or_else(|| ChurnError::Parse("svn info: no repository element".to_string()))?;
    let root_url = get_child_text_or(&repo, "root", "");

    //  relative-url looks like "^/trunk"; the log reports paths below "/".
    let rel_url = get_child_text_or(&entry, "relative-url", "^/");
    let rel_path = rel_url
        .trim_start_matches('^')
        .trim_end_matches('/')
        .to_string();

    Ok(RepoInfo {
        root_url,
        rel_path,
        head_revision,
    })
}
