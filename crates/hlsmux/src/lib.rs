//! HLS download engine.
//!
//! Resolves a master playlist into a catalog of variants and audio tracks,
//! fetches the selected pair of tracks through a bounded concurrent pool and
//! remuxes them losslessly with ffmpeg. [`DownloadSession`] ties it together.

pub mod client;
pub mod concat;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod filename;
pub mod manifest;
pub mod muxer;
pub mod resolve;
pub mod retry;
pub mod selection;
pub mod session;
pub mod transport;

pub use client::create_client;
pub use concat::ConcatList;
pub use config::{
    DEFAULT_CONCURRENCY, FetcherConfig, HlsmuxConfig, HttpConfig, MAX_CONCURRENCY, MuxerConfig,
    ProxyConfig, RetentionPolicy, SessionConfig,
};
pub use error::{
    DownloadError, ErrorKind, FetchFailure, MuxError, SegmentFailure, SegmentFetchError,
    SelectionError,
};
pub use fetcher::{ConcurrentSegmentFetcher, SegmentFile, TrackFetch, TrackKind};
pub use manifest::{
    AudioTrack, ByteRange, CatalogListing, HttpManifestSource, ManifestCatalog, ManifestSource,
    SegmentList, SegmentRef, Variant,
};
pub use muxer::{FfmpegBackend, MuxBackend, MuxJob, MuxOutcome, MuxStep, StreamMuxer};
pub use retry::RetryPolicy;
pub use selection::select_tracks;
pub use session::{Collaborators, DownloadRequest, DownloadSession, SessionId, SessionState};
pub use transport::{HttpTransport, SegmentTransport};
