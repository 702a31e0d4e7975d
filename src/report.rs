
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use crate::aggregate::CommitterTotals;
use crate::error::ChurnError;
use crate::rename::RenameTransition;

//  Excel needs the BOM to pick UTF-8 for CSV files.
const UTF8_BOM: &str = "\u{feff}";

pub const COMMITS_CSV: &str = "commits.csv";
pub const COMMITTERS_CSV: &str = "committers.csv";
pub const TRANSITIONS_CSV: &str = "rename_transitions.csv";
pub const RUN_META_JSON: &str = "run_meta.json";

/// One row of `commits.csv`, fully formatted except for CSV quoting.
#[derive(Debug, Clone)]
pub struct CommitRow {
    pub revision: u64,
    pub author: String,
    pub date: String,
    pub file_count: usize,
    pub added: u64,
    pub deleted: u64,
    pub churn: u64,
    pub entropy: f64,
    pub message: String,
}

/// The flag values of this run, echoed verbatim into `run_meta.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunParameters {
    pub repo_url: String,
    pub from_revision: String,
    pub to_revision: String,
    pub out_directory: PathBuf,
    pub svn_executable: String,
    pub encoding: String,
    pub no_progress: bool,
    pub exclude_comment_only_lines: bool,
    pub include_extensions: Vec<String>,
    pub exclude_extensions: Vec<String>,
    pub include_path_patterns: Vec<String>,
    pub exclude_path_patterns: Vec<String>,
    pub parallelism: usize,
    pub cache_dir: PathBuf,
    pub max_message_length: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunTiming {
    pub started_at: String,
    pub finished_at: String,
    pub elapsed_ms: u128,
    pub log_ms: u128,
    pub prefetch_ms: u128,
    pub analyze_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunVersions {
    pub svn: String,
    pub tool: String,
}

#[derive(Debug, Serialize)]
pub struct RunMeta {
    pub parameters: RunParameters,
    pub timing: RunTiming,
    pub versions: RunVersions,
}

pub fn write_commits_csv(out_dir: &Path, rows: &[CommitRow]) -> Result<()> {
    let mut out = String::from(UTF8_BOM);
    out.push_str("revision,author,date,file_count,added_lines,deleted_lines,churn,entropy,message\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{:.4},{}\n",
            row.revision,
            csv_field(&row.author),
            csv_field(&row.date),
            row.file_count,
            row.added,
            row.deleted,
            row.churn,
            row.entropy,
            csv_field(&row.message),
        ));
    }
    write_file(&out_dir.join(COMMITS_CSV), out.as_bytes())
}

pub fn write_committers_csv(out_dir: &Path, rows: &[CommitterTotals]) -> Result<()> {
    let mut out = String::from(UTF8_BOM);
    out.push_str("author,commit_count,added_lines,deleted_lines,churn,action_a,action_m,action_d,action_r\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{}\n",
            csv_field(&row.author),
            row.commit_count,
            row.added,
            row.deleted,
            row.churn,
            row.action_a,
            row.action_m,
            row.action_d,
            row.action_r,
        ));
    }
    write_file(&out_dir.join(COMMITTERS_CSV), out.as_bytes())
}

pub fn write_transitions_csv(out_dir: &Path, rows: &[RenameTransition]) -> Result<()> {
    let mut out = String::from(UTF8_BOM);
    out.push_str("revision,before_path,after_path\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{}\n",
            row.revision,
            csv_field(row.before_path.as_deref().unwrap_or("")),
            csv_field(row.after_path.as_deref().unwrap_or("")),
        ));
    }
    write_file(&out_dir.join(TRANSITIONS_CSV), out.as_bytes())
}

pub fn write_run_meta(out_dir: &Path, meta: &RunMeta) -> Result<()> {
    let json = serde_json::to_string_pretty(meta)
        .map_err(|e| ChurnError::Parse(format!("encoding run meta: {}", e)))?;
    write_file(&out_dir.join(RUN_META_JSON), json.as_bytes())
}

//  Quote a field when it contains a separator, quote, or line break.
fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ChurnError::io(format!("creating {}", parent.display()), e))?;
    }
    fs::write(path, bytes)
        .map_err(|e| ChurnError::io(format!("writing {}", path.display()), e).into())
}
