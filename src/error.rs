
use std::process::Output;
use thiserror::Error;

/// Everything that can stop or degrade an analysis run.
///
/// Fatal kinds map onto the documented exit codes; the degradable kinds
/// (`CacheIo`, `DiffUnavailable`) are normally logged and recovered from
/// before they reach `main`.
#[derive(Error, Debug)]
pub enum ChurnError {
    #[error("{0}")]
    Usage(String),

    #[error("svn is not available: {0}")]
    SvnUnavailable(String),

    #[error("svn {command} failed: {}", String::from_utf8_lossy(&.output.stderr).trim())]
    SvnCallFailed { command: String, output: Output },

    #[error("svn {command} did not finish within {seconds}s")]
    SvnCallTimeout { command: String, seconds: u64 },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("cache I/O error: {context}")]
    CacheIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no diff available for revision {0}")]
    DiffUnavailable(u64),

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ChurnError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn cache_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::CacheIo {
            context: context.into(),
            source,
        }
    }

    /// Process exit code for this error when it aborts the run.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::SvnUnavailable(_) | Self::SvnCallFailed { .. } | Self::SvnCallTimeout { .. } => 3,
            Self::Parse(_) => 4,
            Self::Io { .. } | Self::CacheIo { .. } => 5,
            Self::DiffUnavailable(_) | Self::Cancelled => 1,
        }
    }
}
