use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::StatusCode;
use serde::Serialize;

use crate::muxer::MuxStep;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("manifest error for {url}: {reason}")]
    Manifest { url: String, reason: String },

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    SegmentFetch(#[from] SegmentFetchError),

    #[error(transparent)]
    Mux(#[from] MuxError),

    #[error("I/O error while {operation} `{}`: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn manifest(url: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::Manifest {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn io(operation: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidUrl { .. } | Self::Configuration { .. } => ErrorKind::InvalidInput,
            Self::Manifest { .. } => ErrorKind::Manifest,
            Self::Selection(_) => ErrorKind::Selection,
            Self::SegmentFetch(_) => ErrorKind::SegmentFetch,
            Self::Mux(_) => ErrorKind::Mux,
            Self::Io { .. } => ErrorKind::Io,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
        }
    }
}

/// Copyable tag for a [`DownloadError`], stable enough to show to a front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Manifest,
    Selection,
    SegmentFetch,
    Mux,
    Io,
    Cancelled,
    InvalidInput,
    InvalidState,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manifest => "manifest_error",
            Self::Selection => "selection_error",
            Self::SegmentFetch => "segment_fetch_error",
            Self::Mux => "mux_error",
            Self::Io => "io_error",
            Self::Cancelled => "cancelled",
            Self::InvalidInput => "invalid_input",
            Self::InvalidState => "invalid_state",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("manifest lists no variants or no audio tracks")]
    NoCatalog,

    #[error("no variant with resolution `{requested}` (available: {})", .available.join(", "))]
    ResolutionNotFound {
        requested: String,
        available: Vec<String>,
    },

    #[error("no audio track named `{requested}` (available: {})", .available.join(", "))]
    TrackNotFound {
        requested: String,
        available: Vec<String>,
    },
}

/// Why a single segment could not be materialised on disk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchFailure {
    #[error("HTTP {0}")]
    HttpStatus(StatusCode),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("truncated body: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("invalid segment URL: {0}")]
    InvalidUrl(String),

    #[error("local write failed: {0}")]
    Io(String),

    #[error("cancelled")]
    Cancelled,
}

impl FetchFailure {
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::HttpStatus(status)
        } else {
            Self::Network(err.to_string())
        }
    }

    /// Transient failures worth another attempt when the caller opted into retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Timeout | Self::Network(_) | Self::Truncated { .. } => true,
            Self::InvalidUrl(_) | Self::Io(_) | Self::Cancelled => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFailure {
    pub sequence_index: usize,
    pub url: String,
    pub reason: FetchFailure,
}

/// Aggregate failure of one track fetch. Failures are sorted by sequence index.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} of {total} segments failed (indices {:?}){}",
    .failures.len(),
    indices_of(.failures),
    describe_first(.failures))]
pub struct SegmentFetchError {
    pub total: usize,
    pub failures: Vec<SegmentFailure>,
}

impl SegmentFetchError {
    pub fn new(total: usize, mut failures: Vec<SegmentFailure>) -> Self {
        failures.sort_by_key(|f| f.sequence_index);
        Self { total, failures }
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        indices_of(&self.failures)
    }
}

fn indices_of(failures: &[SegmentFailure]) -> Vec<usize> {
    failures.iter().map(|f| f.sequence_index).collect()
}

fn describe_first(failures: &[SegmentFailure]) -> String {
    failures
        .first()
        .map(|f| format!("; first: #{} {}: {}", f.sequence_index, f.url, f.reason))
        .unwrap_or_default()
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map(|c| format!(" with exit code {c}"))
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mux step `{step}` failed{}: {diagnostic}", describe_exit(.exit_code))]
pub struct MuxError {
    pub step: MuxStep,
    pub exit_code: Option<i32>,
    pub diagnostic: String,
}
