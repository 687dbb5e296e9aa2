use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::DownloadError;
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Default width of the segment worker pool.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Upper bound for a caller-supplied concurrency.
pub const MAX_CONCURRENCY: usize = 64;

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct HlsmuxConfig {
    pub http: HttpConfig,
    pub fetcher: FetcherConfig,
    pub muxer: MuxerConfig,
    pub session: SessionConfig,
}

// --- HTTP Configuration ---
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Timeout for the top-level manifest and each sub-manifest GET
    pub manifest_timeout: Duration,

    /// Timeout for each segment GET
    pub segment_timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Headers sent with every request, merged over the defaults
    pub headers: HeaderMap,

    pub proxy: ProxyConfig,

    pub danger_accept_invalid_certs: bool,

    /// Maximum idle connections to keep per host.
    /// Segment fetches hit one CDN host, so this should be at least the pool width.
    pub pool_max_idle_per_host: usize,

    /// Duration to keep idle connections alive before closing
    pub pool_idle_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            manifest_timeout: Duration::from_secs(15),
            segment_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HttpConfig::default_headers(),
            proxy: ProxyConfig::default(),
            danger_accept_invalid_certs: false,
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl HttpConfig {
    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        headers
    }

    /// Merge `extra` over the current headers; later values win.
    pub fn with_headers(mut self, extra: HeaderMap) -> Self {
        for (name, value) in extra.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Merge `Name: Value` lines, as given on a command line, over the current headers.
    pub fn with_header_lines<S: AsRef<str>>(self, lines: &[S]) -> Result<Self, DownloadError> {
        let mut extra = HeaderMap::new();
        for line in lines {
            let line = line.as_ref();
            let (name, value) = line.split_once(':').ok_or_else(|| {
                DownloadError::configuration(format!("header `{line}` is not `Name: Value`"))
            })?;
            let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| {
                DownloadError::configuration(format!("invalid header name in `{line}`: {e}"))
            })?;
            let value = HeaderValue::from_str(value.trim()).map_err(|e| {
                DownloadError::configuration(format!("invalid header value in `{line}`: {e}"))
            })?;
            extra.insert(name, value);
        }
        Ok(self.with_headers(extra))
    }
}

/// Proxy settings.
///
/// - `enabled = false` disables every proxy, including env/system ones
/// - `url = Some(..)` uses that proxy for all schemes
/// - `url = None` falls back to system proxies when `use_system_proxy` is set
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_system_proxy: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            username: None,
            password: None,
            use_system_proxy: true,
        }
    }
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Default worker pool width, used when a request does not name one
    pub concurrency: usize,
    /// Per-segment retry of transient failures (disabled by default)
    pub retry: RetryPolicy,
    /// Fetch the video and audio tracks at the same time
    pub parallel_tracks: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            parallel_tracks: false,
        }
    }
}

/// Clamp a requested pool width into `1..=MAX_CONCURRENCY`.
pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(1, MAX_CONCURRENCY)
}

// --- Muxer Configuration ---
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    /// ffmpeg binary; `FFMPEG_PATH` overrides the default `ffmpeg`
    pub ffmpeg_path: PathBuf,
    /// Container of the final output file (e.g. "mp4", "mkv")
    pub container: String,
    /// Container used for the concatenated video intermediate
    pub video_intermediate: String,
    /// Container used for the concatenated audio intermediate
    pub audio_intermediate: String,
    /// Move the moov atom to the front for MP4-family outputs
    pub faststart: bool,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: std::env::var_os("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            container: "mp4".to_string(),
            video_intermediate: "mp4".to_string(),
            audio_intermediate: "m4a".to_string(),
            faststart: true,
        }
    }
}

// --- Session Configuration ---
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep the working directory after the output has been consumed
    #[default]
    Retain,
    /// Remove the working directory once the output has been consumed
    Purge,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Parent of every session working directory
    pub downloads_root: PathBuf,
    pub retention: RetentionPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            downloads_root: PathBuf::from("downloads"),
            retention: RetentionPolicy::Retain,
        }
    }
}
