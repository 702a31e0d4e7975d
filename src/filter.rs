
use std::collections::BTreeSet;

use anyhow::Result;
use glob::{MatchOptions, Pattern};

use crate::error::ChurnError;
use crate::svn::{ChangedPath, NodeKind};

//  Globs never cross '/' and compare case-insensitively.
const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Include/exclude rules applied to every changed path before any diff
/// work happens. Directories never pass; extensions are compared
/// lowercased and dot-free.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include_extensions: BTreeSet<String>,
    exclude_extensions: BTreeSet<String>,
    include_patterns: Vec<Pattern>,
    exclude_patterns: Vec<Pattern>,
}

impl PathFilter {
    pub fn new(
        include_extensions: &[String],
        exclude_extensions: &[String],
        include_patterns: &[String],
        exclude_patterns: &[String],
    ) -> Result<PathFilter> {
        Ok(PathFilter {
            include_extensions: normalize_extensions(include_extensions),
            exclude_extensions: normalize_extensions(exclude_extensions),
            include_patterns: compile_patterns(include_patterns)?,
            exclude_patterns: compile_patterns(exclude_patterns)?,
        })
    }

    pub fn matches(&self, changed: &ChangedPath) -> bool {
        if changed.kind == NodeKind::Dir {
            return false;
        }
        let ext = extension_of(&changed.path);
        if !self.include_extensions.is_empty() && !self.include_extensions.contains(&ext) {
            return false;
        }
        if self.exclude_extensions.contains(&ext) {
            return false;
        }
        if !self.include_patterns.is_empty()
            && !self
                .include_patterns
                .iter()
                .any(|p| p.matches_with(&changed.path, GLOB_OPTIONS))
        {
            return false;
        }
        !self
            .exclude_patterns
            .iter()
            .any(|p| p.matches_with(&changed.path, GLOB_OPTIONS))
    }

    pub fn apply(&self, paths: &[ChangedPath]) -> Vec<ChangedPath> {
        paths.iter().filter(|p| self.matches(p)).cloned().collect()
    }
}

fn normalize_extensions(extensions: &[String]) -> BTreeSet<String> {
    extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p)
                .map_err(|e| ChurnError::Usage(format!("invalid path pattern '{}': {}", p, e)).into())
        })
        .collect()
}

fn extension_of(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx + 1..].to_ascii_lowercase(),
        _ => String::new(),
    }
}
