//! Manifest catalog types and the m3u8 parsing collaborator.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use m3u8_rs::{AlternativeMediaType, KeyMethod, MasterPlaylist, MediaPlaylist, Playlist};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::DownloadError;

/// One video rendition listed by a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    /// `WIDTHxHEIGHT`, matched by exact string comparison.
    pub resolution: String,
    pub uri: String,
    pub bandwidth: u64,
}

/// One `EXT-X-MEDIA` audio rendition with its own playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    /// Display name, matched by exact string comparison.
    pub name: String,
    pub language: Option<String>,
    pub uri: String,
}

/// Byte range within a segment resource, with the offset already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    /// Value for an HTTP `Range` header. The end is inclusive.
    pub fn header_value(&self) -> String {
        let end = self.offset + self.length.saturating_sub(1);
        format!("bytes={}-{end}", self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    /// 0-based position in the media playlist.
    pub sequence_index: usize,
    pub uri: String,
    pub byte_range: Option<ByteRange>,
}

impl SegmentRef {
    pub fn new(sequence_index: usize, uri: impl Into<String>) -> Self {
        Self {
            sequence_index,
            uri: uri.into(),
            byte_range: None,
        }
    }
}

/// Variants and audio tracks of a top-level manifest, in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestCatalog {
    pub variants: Vec<Variant>,
    pub audio_tracks: Vec<AudioTrack>,
}

impl ManifestCatalog {
    pub fn resolutions(&self) -> Vec<String> {
        self.variants.iter().map(|v| v.resolution.clone()).collect()
    }

    pub fn track_names(&self) -> Vec<String> {
        self.audio_tracks.iter().map(|t| t.name.clone()).collect()
    }

    pub fn listing(&self) -> CatalogListing {
        CatalogListing {
            resolutions: self.resolutions(),
            languages: self.track_names(),
        }
    }
}

/// What a front end shows a user to choose from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogListing {
    pub resolutions: Vec<String>,
    pub languages: Vec<String>,
}

/// A fetched media playlist: its final location (after redirects) and its segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentList {
    pub playlist_url: Url,
    pub segments: Vec<SegmentRef>,
}

/// Build a catalog from a master playlist body.
pub fn parse_catalog(body: &[u8], manifest_url: &Url) -> Result<ManifestCatalog, DownloadError> {
    match m3u8_rs::parse_playlist_res(body) {
        Ok(Playlist::MasterPlaylist(master)) => Ok(catalog_from_master(master)),
        Ok(Playlist::MediaPlaylist(_)) => Err(DownloadError::manifest(
            manifest_url,
            "expected a master playlist with variants, got a media playlist",
        )),
        Err(e) => Err(DownloadError::manifest(
            manifest_url,
            format!("failed to parse playlist: {e}"),
        )),
    }
}

fn catalog_from_master(master: MasterPlaylist) -> ManifestCatalog {
    let variants = master
        .variants
        .into_iter()
        .filter(|v| !v.is_i_frame)
        .filter_map(|v| match v.resolution {
            Some(r) => Some(Variant {
                resolution: format!("{}x{}", r.width, r.height),
                uri: v.uri,
                bandwidth: v.bandwidth,
            }),
            None => {
                debug!(uri = %v.uri, "Skipping variant without RESOLUTION");
                None
            }
        })
        .collect();

    let audio_tracks = master
        .alternatives
        .into_iter()
        .filter(|m| m.media_type == AlternativeMediaType::Audio)
        .filter_map(|m| match m.uri {
            Some(uri) => Some(AudioTrack {
                name: m.name,
                language: m.language,
                uri,
            }),
            None => {
                debug!(name = %m.name, "Skipping audio rendition muxed into the variant");
                None
            }
        })
        .collect();

    ManifestCatalog {
        variants,
        audio_tracks,
    }
}

/// Extract the ordered segment list from a media playlist body.
pub fn parse_segments(body: &[u8], playlist_url: &Url) -> Result<Vec<SegmentRef>, DownloadError> {
    match m3u8_rs::parse_playlist_res(body) {
        Ok(Playlist::MediaPlaylist(media)) => segments_from_media(media, playlist_url),
        Ok(Playlist::MasterPlaylist(_)) => Err(DownloadError::manifest(
            playlist_url,
            "expected a media playlist, got a nested master playlist",
        )),
        Err(e) => Err(DownloadError::manifest(
            playlist_url,
            format!("failed to parse playlist: {e}"),
        )),
    }
}

fn segments_from_media(
    media: MediaPlaylist,
    playlist_url: &Url,
) -> Result<Vec<SegmentRef>, DownloadError> {
    if !media.end_list {
        warn!(url = %playlist_url, "Media playlist has no EXT-X-ENDLIST; fetching listed segments only");
    }

    let mut segments = Vec::with_capacity(media.segments.len());
    // Byte ranges without an explicit offset continue where the previous
    // range of the same resource ended.
    let mut last_range_end: Option<(String, u64)> = None;

    for (index, segment) in media.segments.into_iter().enumerate() {
        if let Some(key) = &segment.key
            && key.method != KeyMethod::None
        {
            return Err(DownloadError::manifest(
                playlist_url,
                format!("segment {index} is encrypted ({:?}); encrypted streams are not supported", key.method),
            ));
        }
        if segment.map.is_some() {
            return Err(DownloadError::manifest(
                playlist_url,
                "EXT-X-MAP initialization sections are not supported",
            ));
        }

        let byte_range = segment.byte_range.as_ref().map(|range| {
            let offset = range.offset.unwrap_or_else(|| match &last_range_end {
                Some((uri, end)) if *uri == segment.uri => *end,
                _ => 0,
            });
            ByteRange {
                offset,
                length: range.length,
            }
        });
        last_range_end = byte_range.map(|r| (segment.uri.clone(), r.offset + r.length));

        segments.push(SegmentRef {
            sequence_index: index,
            uri: segment.uri,
            byte_range,
        });
    }

    Ok(segments)
}

/// Fetches and parses manifests.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Fetch the top-level manifest. Returns the catalog together with the
    /// final manifest URL, which is the base for sub-manifest URIs.
    async fn load_catalog(&self, url: &Url) -> Result<(ManifestCatalog, Url), DownloadError>;

    /// Fetch one variant or audio-track playlist.
    async fn load_segments(&self, url: &Url) -> Result<SegmentList, DownloadError>;
}

pub struct HttpManifestSource {
    client: Client,
    timeout: Duration,
}

impl HttpManifestSource {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn fetch(&self, url: &Url) -> Result<(Bytes, Url), DownloadError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DownloadError::manifest(url, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::manifest(url, format!("HTTP {status}")));
        }

        let final_url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| DownloadError::manifest(url, format!("failed to read body: {e}")))?;
        debug!(url = %final_url, bytes = body.len(), "Fetched manifest");
        Ok((body, final_url))
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn load_catalog(&self, url: &Url) -> Result<(ManifestCatalog, Url), DownloadError> {
        let (body, final_url) = self.fetch(url).await?;
        let catalog = parse_catalog(&body, &final_url)?;
        Ok((catalog, final_url))
    }

    async fn load_segments(&self, url: &Url) -> Result<SegmentList, DownloadError> {
        let (body, final_url) = self.fetch(url).await?;
        let segments = parse_segments(&body, &final_url)?;
        Ok(SegmentList {
            playlist_url: final_url,
            segments,
        })
    }
}
