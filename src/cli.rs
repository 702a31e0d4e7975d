
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use crate::diff::DiffOptions;
use crate::error::ChurnError;
use crate::filter::PathFilter;
use crate::report::RunParameters;

/// Analyze an SVN repository over a revision range and write per-revision
/// and per-committer code-churn tables.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about,
    after_help = "\
    Reads history with 'svn log --xml --verbose', prefetches one diff per\n\
    revision in parallel, and writes commits.csv, committers.csv,\n\
    rename_transitions.csv and run_meta.json into the output directory."
)]
pub struct Cli {
    /// Repository URL to analyze
    #[arg(long, value_name = "URL")]
    pub repo_url: String,

    /// First revision of the range (a number, or HEAD)
    #[arg(long, value_name = "REV")]
    pub from_revision: String,

    /// Last revision of the range (a number, or HEAD)
    #[arg(long, value_name = "REV")]
    pub to_revision: String,

    /// Directory the reports are written to
    #[arg(long, value_name = "DIR", default_value = "churn-out")]
    pub out_directory: PathBuf,

    /// svn executable to invoke
    #[arg(long, value_name = "PATH", default_value = "svn")]
    pub svn_executable: String,

    /// Output encoding recorded in the run metadata
    #[arg(long, value_name = "NAME", default_value = "UTF-8")]
    pub encoding: String,

    /// Do not print prefetch progress
    #[arg(long)]
    pub no_progress: bool,

    /// Do not count lines whose body is only a comment or whitespace
    #[arg(long)]
    pub exclude_comment_only_lines: bool,

    /// Only count files with one of these extensions
    #[arg(long, value_name = "EXT", num_args = 1.., value_delimiter = ',')]
    pub include_extensions: Vec<String>,

    /// Never count files with one of these extensions
    #[arg(long, value_name = "EXT", num_args = 1.., value_delimiter = ',')]
    pub exclude_extensions: Vec<String>,

    /// Only count paths matching at least one of these globs
    #[arg(long, value_name = "GLOB", num_args = 1..)]
    pub include_path_patterns: Vec<String>,

    /// Never count paths matching one of these globs
    #[arg(long, value_name = "GLOB", num_args = 1..)]
    pub exclude_path_patterns: Vec<String>,

    /// Number of parallel diff fetches
    #[arg(long, value_name = "N", default_value_t = 4)]
    pub parallelism: usize,

    /// Directory for the on-disk diff cache [default: <out-directory>/cache]
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Maximum length of the summarized commit message
    #[arg(long, value_name = "CHARS", default_value_t = 120)]
    pub max_message_length: usize,

    /// Seconds allowed for a single svn invocation
    #[arg(long, value_name = "SECS", default_value_t = 120)]
    pub svn_timeout: u64,

    /// Plan the run and report counts without fetching or writing
    #[arg(long)]
    pub dry_run: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// A revision bound as entered on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionSpec {
    Number(u64),
    Head,
}

impl FromStr for RevisionSpec {
    type Err = ChurnError;

    fn from_str(s: &str) -> Result<RevisionSpec, ChurnError> {
        if s.eq_ignore_ascii_case("HEAD") {
            return Ok(RevisionSpec::Head);
        }
        match s.parse::<u64>() {
            Ok(n) if n >= 1 => Ok(RevisionSpec::Number(n)),
            _ => Err(ChurnError::Usage(format!(
                "'{}' is not a revision (expected a number >= 1, or HEAD)",
                s
            ))),
        }
    }
}

/// Everything the pipeline needs, resolved from the CLI once. Threaded
/// through constructors; nothing here is process-global.
#[derive(Debug, Clone)]
pub struct Config {
    pub repo_url: String,
    pub from_revision: RevisionSpec,
    pub to_revision: RevisionSpec,
    pub out_directory: PathBuf,
    pub svn_executable: String,
    pub show_progress: bool,
    pub diff_options: DiffOptions,
    pub filter: PathFilter,
    pub parallelism: usize,
    pub cache_dir: PathBuf,
    pub max_message_length: usize,
    pub svn_timeout: Duration,
    pub dry_run: bool,
    pub parameters: RunParameters,
}

impl Cli {
    pub fn into_config(self) -> Result<Config> {
        if self.parallelism < 1 {
            return Err(ChurnError::Usage("--parallelism must be at least 1".to_string()).into());
        }

        let from_revision: RevisionSpec = self.from_revision.parse()?;
        let to_revision: RevisionSpec = self.to_revision.parse()?;
        if let (RevisionSpec::Number(f), RevisionSpec::Number(t)) = (from_revision, to_revision) {
            if f > t {
                return Err(ChurnError::Usage(format!(
                    "--from-revision {} exceeds --to-revision {}",
                    f, t
                ))
                .into());
            }
        }

        let filter = PathFilter::new(
            &self.include_extensions,
            &self.exclude_extensions,
            &self.include_path_patterns,
            &self.exclude_path_patterns,
        )?;

        let cache_dir = self
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.out_directory.join("cache"));

        let parameters = RunParameters {
            repo_url: self.repo_url.clone(),
            from_revision: self.from_revision.clone(),
            to_revision: self.to_revision.clone(),
            out_directory: self.out_directory.clone(),
            svn_executable: self.svn_executable.clone(),
            encoding: self.encoding.clone(),
            no_progress: self.no_progress,
            exclude_comment_only_lines: self.exclude_comment_only_lines,
            include_extensions: self.include_extensions.clone(),
            exclude_extensions: self.exclude_extensions.clone(),
            include_path_patterns: self.include_path_patterns.clone(),
            exclude_path_patterns: self.exclude_path_patterns.clone(),
            parallelism: self.parallelism,
            cache_dir: cache_dir.clone(),
            max_message_length: self.max_message_length,
        };

        Ok(Config {
            repo_url: self.repo_url,
            from_revision,
            to_revision,
            out_directory: self.out_directory,
            svn_executable: self.svn_executable,
            show_progress: !self.no_progress,
            diff_options: DiffOptions {
                exclude_comment_only_lines: self.exclude_comment_only_lines,
            },
            filter,
            parallelism: self.parallelism,
            cache_dir,
            max_message_length: self.max_message_length,
            svn_timeout: Duration::from_secs(self.svn_timeout),
            dry_run: self.dry_run,
            parameters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with(from: &str, to: &str, extra: &[&str]) -> Cli {
        let mut args = vec![
            "svnchurn",
            "--repo-url",
            "http://svn/repo",
            "--from-revision",
            from,
            "--to-revision",
            to,
        ];
        args.extend_from_slice(extra);
        Cli::parse_from(args)
    }

    fn cli(extra: &[&str]) -> Cli {
        cli_with("1", "10", extra)
    }

    #[test]
    fn revision_specs_parse_numbers_and_head() {
        assert_eq!("7".parse::<RevisionSpec>().unwrap(), RevisionSpec::Number(7));
        assert_eq!("head".parse::<RevisionSpec>().unwrap(), RevisionSpec::Head);
        assert!("0".parse::<RevisionSpec>().is_err());
        assert!("abc".parse::<RevisionSpec>().is_err());
    }

    #[test]
    fn defaults_follow_the_documented_contract() {
        let config = cli(&[]).into_config().unwrap();
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.svn_timeout, Duration::from_secs(120));
        assert_eq!(config.max_message_length, 120);
        assert!(config.show_progress);
        assert!(!config.diff_options.exclude_comment_only_lines);
        assert_eq!(config.cache_dir, PathBuf::from("churn-out").join("cache"));
    }

    #[test]
    fn inverted_range_is_a_usage_error() {
        let err = cli_with("9", "3", &[]).into_config().unwrap_err();
        let churn = err.downcast_ref::<ChurnError>().unwrap();
        assert!(matches!(churn, ChurnError::Usage(_)));
    }

    #[test]
    fn head_bounds_skip_the_range_check() {
        let config = cli_with("9", "HEAD", &[]).into_config().unwrap();
        assert_eq!(config.to_revision, RevisionSpec::Head);
    }

    #[test]
    fn extension_lists_accept_commas() {
        let config = cli(&["--include-extensions", "cs,java"]).into_config().unwrap();
        assert_eq!(
            config.parameters.include_extensions,
            vec!["cs".to_string(), "java".to_string()]
        );
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let err = cli(&["--parallelism", "0"]).into_config().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChurnError>().unwrap(),
            ChurnError::Usage(_)
        ));
    }

    #[test]
    fn parameters_echo_the_raw_flag_values() {
        let config = cli_with("1", "HEAD", &["--exclude-comment-only-lines"])
            .into_config()
            .unwrap();
        assert_eq!(config.parameters.to_revision, "HEAD");
        assert!(config.parameters.exclude_comment_only_lines);
    }
}
