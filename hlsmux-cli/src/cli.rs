use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use hlsmux_engine::{HlsmuxConfig, HttpConfig, ProxyConfig};

use crate::error::{AppError, Result};

#[derive(Parser, Debug)]
#[command(
    name = "hlsmux",
    author,
    version,
    about = "Download one resolution and one audio track of an HLS stream into a single file"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to a daily-rolling file in this directory
    #[arg(long, global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Parent directory of session working directories
    #[arg(short, long, global = true, default_value = "downloads")]
    pub output_dir: PathBuf,

    /// ffmpeg binary (defaults to FFMPEG_PATH, then `ffmpeg` on PATH)
    #[arg(long, global = true, value_name = "PATH")]
    pub ffmpeg: Option<PathBuf>,

    /// Container of the final output file
    #[arg(long, global = true, default_value = "mp4")]
    pub container: String,

    /// Proxy URL (http, https or socks5)
    #[arg(long, global = true)]
    pub proxy: Option<String>,

    /// Proxy username
    #[arg(long, global = true, requires = "proxy")]
    pub proxy_username: Option<String>,

    /// Proxy password
    #[arg(long, global = true, requires = "proxy")]
    pub proxy_password: Option<String>,

    /// Ignore system and environment proxies
    #[arg(long, global = true, conflicts_with = "proxy")]
    pub no_proxy: bool,

    /// Extra request header, `Name: Value`; may be repeated
    #[arg(short = 'H', long = "header", global = true, value_name = "HEADER")]
    pub headers: Vec<String>,

    /// User-Agent sent with every request
    #[arg(long, global = true)]
    pub user_agent: Option<String>,

    /// Manifest request timeout in seconds
    #[arg(long, global = true, default_value_t = 15)]
    pub manifest_timeout: u64,

    /// Per-segment request timeout in seconds
    #[arg(long, global = true, default_value_t = 10)]
    pub segment_timeout: u64,

    /// Accept invalid TLS certificates
    #[arg(long, global = true)]
    pub insecure: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the resolutions and audio tracks a master playlist offers
    List {
        /// Master playlist URL
        manifest_url: String,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download one variant and one audio track and mux them into one file
    Download {
        /// Master playlist URL
        manifest_url: String,

        /// Resolution label, e.g. 1280x720 (default: first variant)
        #[arg(short, long)]
        resolution: Option<String>,

        /// Audio track name, e.g. English (default: first track)
        #[arg(short, long)]
        language: Option<String>,

        /// Concurrent segment downloads (1-64)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Re-attach to an earlier session and skip its completed segments
        #[arg(long, value_name = "SESSION_ID")]
        resume: Option<String>,

        /// Retries per segment for transient failures
        #[arg(long, default_value_t = 0)]
        retries: u32,

        /// Fetch the video and audio tracks at the same time
        #[arg(long)]
        parallel_tracks: bool,
    },

    /// Serve the catalog and download endpoints over HTTP
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,

        /// Upper bound on one download request in seconds
        #[arg(long, default_value_t = 600)]
        request_timeout: u64,

        /// Keep session directories after the response has been sent
        #[arg(long)]
        retain: bool,
    },
}

impl Args {
    /// Engine configuration from the global flags.
    pub fn engine_config(&self) -> Result<HlsmuxConfig> {
        let mut config = HlsmuxConfig::default();

        let proxy = ProxyConfig {
            enabled: !self.no_proxy,
            url: self.proxy.clone(),
            username: self.proxy_username.clone(),
            password: self.proxy_password.clone(),
            ..ProxyConfig::default()
        };

        let mut http = HttpConfig {
            manifest_timeout: Duration::from_secs(self.manifest_timeout),
            segment_timeout: Duration::from_secs(self.segment_timeout),
            danger_accept_invalid_certs: self.insecure,
            proxy,
            ..HttpConfig::default()
        };
        if let Some(user_agent) = &self.user_agent {
            http.user_agent = user_agent.clone();
        }
        config.http = http.with_header_lines(&self.headers)?;

        if let Some(ffmpeg) = &self.ffmpeg {
            config.muxer.ffmpeg_path = ffmpeg.clone();
        }
        let container = self.container.trim().trim_start_matches('.');
        if container.is_empty() {
            return Err(AppError::InvalidInput("container must not be empty".to_string()));
        }
        config.muxer.container = container.to_string();

        config.session.downloads_root = self.output_dir.clone();
        Ok(config)
    }
}
