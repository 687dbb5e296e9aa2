//! The download session: resolve a manifest, select tracks, fetch, remux.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::client::create_client;
use crate::config::{HlsmuxConfig, RetentionPolicy, clamp_concurrency};
use crate::error::{DownloadError, ErrorKind};
use crate::fetcher::{ConcurrentSegmentFetcher, TrackFetch, TrackKind};
use crate::filename::output_file_name;
use crate::manifest::{
    AudioTrack, CatalogListing, HttpManifestSource, ManifestCatalog, ManifestSource, SegmentList,
    Variant,
};
use crate::muxer::{FfmpegBackend, MuxBackend, MuxJob, StreamMuxer};
use crate::resolve::{manifest_base, parse_absolute, resolve};
use crate::selection::select_tracks;
use crate::transport::{HttpTransport, SegmentTransport};

/// Opaque per-session token; also the name of the working directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept only UUIDs so an id can never name a path outside the downloads root.
    pub fn parse(input: &str) -> Result<Self, DownloadError> {
        Uuid::parse_str(input.trim())
            .map(|id| Self(id.to_string()))
            .map_err(|e| DownloadError::configuration(format!("invalid session id `{input}`: {e}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Created,
    CatalogFetched,
    Selected,
    VideoFetched,
    AudioFetched,
    Muxed,
    Complete,
    Failed { kind: ErrorKind, message: String },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::CatalogFetched => "catalog_fetched",
            Self::Selected => "selected",
            Self::VideoFetched => "video_fetched",
            Self::AudioFetched => "audio_fetched",
            Self::Muxed => "muxed",
            Self::Complete => "complete",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed { .. })
    }
}

/// What the caller wants downloaded. Empty strings mean "first in manifest order".
#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    pub resolution: Option<String>,
    pub language: Option<String>,
    pub concurrency: Option<usize>,
}

/// The external collaborators a session drives.
#[derive(Clone)]
pub struct Collaborators {
    pub manifests: Arc<dyn ManifestSource>,
    pub transport: Arc<dyn SegmentTransport>,
    pub mux_backend: Arc<dyn MuxBackend>,
}

impl Collaborators {
    /// HTTP manifests and segments on one shared client, ffmpeg for muxing.
    pub fn from_config(config: &HlsmuxConfig) -> Result<Self, DownloadError> {
        let client = create_client(&config.http)?;
        Ok(Self {
            manifests: Arc::new(HttpManifestSource::new(
                client.clone(),
                config.http.manifest_timeout,
            )),
            transport: Arc::new(HttpTransport::new(client)),
            mux_backend: Arc::new(FfmpegBackend::new(config.muxer.ffmpeg_path.clone())),
        })
    }
}

pub struct DownloadSession {
    id: SessionId,
    config: HlsmuxConfig,
    collaborators: Collaborators,
    working_dir: PathBuf,
    state: SessionState,
    manifest_url: Option<Url>,
    catalog: Option<ManifestCatalog>,
    token: CancellationToken,
}

impl DownloadSession {
    /// A fresh session with a new id and an unused working directory.
    pub fn new(config: HlsmuxConfig, collaborators: Collaborators) -> Self {
        Self::with_id(config, collaborators, SessionId::new())
    }

    /// Re-attach to the working directory of an earlier session so segments it
    /// already completed are not fetched again.
    pub fn resume(config: HlsmuxConfig, collaborators: Collaborators, id: SessionId) -> Self {
        Self::with_id(config, collaborators, id)
    }

    fn with_id(config: HlsmuxConfig, collaborators: Collaborators, id: SessionId) -> Self {
        let dir = config.session.downloads_root.join(id.as_str());
        // Concat lists carry absolute paths.
        let working_dir = std::path::absolute(&dir).unwrap_or(dir);
        Self {
            id,
            config,
            collaborators,
            working_dir,
            state: SessionState::Created,
            manifest_url: None,
            catalog: None,
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.config.session.retention
    }

    /// Token that aborts the session when cancelled. Cancelling it stops new
    /// segment jobs, aborts in-flight ones and kills a running muxer.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Fetch and parse the top-level manifest.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn resolve(&mut self, manifest_url: &str) -> Result<&ManifestCatalog, DownloadError> {
        self.expect_state(&SessionState::Created, "resolve")?;

        let result = async {
            let url = parse_absolute(manifest_url)?;
            let manifests = self.collaborators.manifests.clone();
            cancellable(&self.token, manifests.load_catalog(&url)).await
        }
        .await;

        match result {
            Ok((catalog, final_url)) => {
                info!(
                    url = %final_url,
                    variants = catalog.variants.len(),
                    audio_tracks = catalog.audio_tracks.len(),
                    "Manifest resolved"
                );
                self.manifest_url = Some(final_url);
                self.state = SessionState::CatalogFetched;
                Ok(self.catalog.insert(catalog))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Resolutions and track names for a front end. Empty before `resolve` or
    /// for a manifest without entries.
    pub fn list_catalog(&self) -> CatalogListing {
        self.catalog
            .as_ref()
            .map(ManifestCatalog::listing)
            .unwrap_or_default()
    }

    pub fn catalog(&self) -> Option<&ManifestCatalog> {
        self.catalog.as_ref()
    }

    /// Select tracks, fetch both, remux, and return the output path.
    #[instrument(skip(self, request), fields(session = %self.id))]
    pub async fn download(&mut self, request: DownloadRequest) -> Result<PathBuf, DownloadError> {
        self.expect_state(&SessionState::CatalogFetched, "download")?;

        match self.run_download(&request).await {
            Ok(output) => {
                self.state = SessionState::Complete;
                info!(output = %output.display(), "Download complete");
                Ok(output)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn run_download(&mut self, request: &DownloadRequest) -> Result<PathBuf, DownloadError> {
        let (catalog, manifest_url) = match (&self.catalog, &self.manifest_url) {
            (Some(catalog), Some(url)) => (catalog, url),
            _ => {
                return Err(DownloadError::InvalidState {
                    operation: "download",
                    state: "without a catalog",
                });
            }
        };

        let (variant, track) = select_tracks(
            catalog,
            request.resolution.as_deref(),
            request.language.as_deref(),
        )?;
        let (variant, track): (Variant, AudioTrack) = (variant.clone(), track.clone());
        info!(resolution = %variant.resolution, track = %track.name, "Tracks selected");
        self.state = SessionState::Selected;

        let base = manifest_base(manifest_url);
        let video_url = sub_manifest_url(&base, &variant.uri)?;
        let audio_url = sub_manifest_url(&base, &track.uri)?;

        let manifests = self.collaborators.manifests.clone();
        let (video_list, audio_list) = cancellable(&self.token, async {
            tokio::try_join!(
                manifests.load_segments(&video_url),
                manifests.load_segments(&audio_url)
            )
        })
        .await?;
        debug!(
            video_segments = video_list.segments.len(),
            audio_segments = audio_list.segments.len(),
            "Sub-manifests loaded"
        );

        tokio::fs::create_dir_all(&self.working_dir)
            .await
            .map_err(|e| DownloadError::io("creating session directory", &self.working_dir, e))?;

        let concurrency = clamp_concurrency(
            request
                .concurrency
                .unwrap_or(self.config.fetcher.concurrency),
        );
        let fetcher = ConcurrentSegmentFetcher::new(
            self.collaborators.transport.clone(),
            self.config.http.segment_timeout,
            concurrency,
            self.config.fetcher.retry.clone(),
        );

        let (video, audio) = if self.config.fetcher.parallel_tracks {
            let (video, audio) = tokio::try_join!(
                self.fetch(&fetcher, TrackKind::Video, &variant.resolution, &video_list),
                self.fetch(&fetcher, TrackKind::Audio, &track.name, &audio_list)
            )?;
            self.state = SessionState::VideoFetched;
            (video, audio)
        } else {
            let video = self
                .fetch(&fetcher, TrackKind::Video, &variant.resolution, &video_list)
                .await?;
            self.state = SessionState::VideoFetched;
            let audio = self
                .fetch(&fetcher, TrackKind::Audio, &track.name, &audio_list)
                .await?;
            (video, audio)
        };
        self.state = SessionState::AudioFetched;

        let muxer = StreamMuxer::new(
            self.collaborators.mux_backend.clone(),
            self.config.muxer.clone(),
        );
        let output = self.working_dir.join(output_file_name(
            &variant.resolution,
            &track.name,
            &self.config.muxer.container,
        ));
        let job = MuxJob::new(
            muxer.config(),
            &self.working_dir,
            self.id.as_str(),
            &video,
            &audio,
            output,
        );
        let output = muxer.mux(&job, &self.token).await?;
        self.state = SessionState::Muxed;

        Ok(output)
    }

    async fn fetch(
        &self,
        fetcher: &ConcurrentSegmentFetcher,
        kind: TrackKind,
        label: &str,
        list: &SegmentList,
    ) -> Result<TrackFetch, DownloadError> {
        let base = manifest_base(&list.playlist_url);
        fetcher
            .fetch_track(
                kind,
                label,
                &base,
                &list.segments,
                &self.working_dir,
                &self.token,
            )
            .await
    }

    /// Remove the working directory and everything in it.
    pub async fn purge(&self) -> Result<(), DownloadError> {
        match tokio::fs::remove_dir_all(&self.working_dir).await {
            Ok(()) => {
                debug!(dir = %self.working_dir.display(), "Session directory purged");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::io(
                "removing session directory",
                &self.working_dir,
                e,
            )),
        }
    }

    fn expect_state(
        &mut self,
        expected: &SessionState,
        operation: &'static str,
    ) -> Result<(), DownloadError> {
        if &self.state == expected {
            return Ok(());
        }
        let err = DownloadError::InvalidState {
            operation,
            state: self.state.name(),
        };
        // A terminal state stays as it was; misuse of a live session fails it.
        if self.state.is_terminal() {
            Err(err)
        } else {
            Err(self.fail(err))
        }
    }

    fn fail(&mut self, err: DownloadError) -> DownloadError {
        match err.kind() {
            ErrorKind::Cancelled => warn!(session = %self.id, "Session cancelled"),
            kind => error!(session = %self.id, kind = %kind, error = %err, "Session failed"),
        }
        self.state = SessionState::Failed {
            kind: err.kind(),
            message: err.to_string(),
        };
        err
    }
}

fn sub_manifest_url(base: &Url, uri: &str) -> Result<Url, DownloadError> {
    resolve(base, uri)
        .map_err(|e| DownloadError::manifest(base, format!("bad sub-manifest URI `{uri}`: {e}")))
}

async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T, DownloadError>
where
    F: Future<Output = Result<T, DownloadError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(DownloadError::Cancelled),
        result = fut => result,
    }
}
