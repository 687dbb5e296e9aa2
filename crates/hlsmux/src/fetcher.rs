//! Bounded-width concurrent segment fetcher.
//!
//! Jobs complete in any order. Each result lands in the slot of its position
//! in the input list and the concat list is only built once every job has
//! finished, so list order always equals manifest order.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use indicatif::ProgressStyle;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, info, info_span, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use url::Url;

use crate::concat::ConcatList;
use crate::error::{DownloadError, FetchFailure, SegmentFailure, SegmentFetchError};
use crate::filename::{sanitize_filename, segment_file_names};
use crate::manifest::{ByteRange, SegmentRef};
use crate::resolve::resolve;
use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};
use crate::transport::SegmentTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    /// Directory holding the segments of the rendition named `label`.
    ///
    /// Renditions often reuse segment names (`seg0.ts`), so each selected
    /// variant or audio track gets its own directory under the track kind.
    pub fn segment_dir(&self, session_dir: &Path, label: &str) -> PathBuf {
        session_dir
            .join(self.as_str())
            .join(sanitize_filename(label))
    }

    /// Concat list file for this track.
    pub fn list_path(&self, session_dir: &Path) -> PathBuf {
        session_dir.join(format!("{}_segments.txt", self.as_str()))
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A segment materialised on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFile {
    pub sequence_index: usize,
    pub local_path: PathBuf,
}

/// Result of one track fetch.
#[derive(Debug, Clone)]
pub struct TrackFetch {
    pub kind: TrackKind,
    pub concat: ConcatList,
    pub list_path: PathBuf,
    /// Segments downloaded by this run.
    pub fetched: usize,
    /// Segments already complete on disk.
    pub skipped: usize,
}

struct SegmentJob {
    position: usize,
    sequence_index: usize,
    url: Url,
    range: Option<ByteRange>,
    path: PathBuf,
}

enum JobOutcome {
    Fetched(SegmentFile),
    AlreadyComplete(SegmentFile),
}

pub struct ConcurrentSegmentFetcher {
    transport: Arc<dyn SegmentTransport>,
    timeout: Duration,
    concurrency: usize,
    retry: RetryPolicy,
}

impl ConcurrentSegmentFetcher {
    pub fn new(
        transport: Arc<dyn SegmentTransport>,
        timeout: Duration,
        concurrency: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            timeout,
            concurrency: concurrency.max(1),
            retry,
        }
    }

    /// Fetch every segment of one track into `session_dir` and write its concat list.
    ///
    /// `label` names the selected rendition and keys its segment directory.
    /// `base_url` is the directory of the playlist that listed `segments`.
    /// Failed segments are collected and reported together; completed ones
    /// stay on disk and are skipped by the next run.
    pub async fn fetch_track(
        &self,
        kind: TrackKind,
        label: &str,
        base_url: &Url,
        segments: &[SegmentRef],
        session_dir: &Path,
        token: &CancellationToken,
    ) -> Result<TrackFetch, DownloadError> {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let track_dir = kind.segment_dir(session_dir, label);
        tokio::fs::create_dir_all(&track_dir)
            .await
            .map_err(|e| DownloadError::io("creating segment directory", &track_dir, e))?;

        let total = segments.len();
        let mut failures = Vec::new();
        let jobs: Vec<SegmentJob> = segments
            .iter()
            .zip(segment_file_names(segments))
            .enumerate()
            .filter_map(|(position, (segment, name))| {
                match resolve(base_url, &segment.uri) {
                    Ok(url) => Some(SegmentJob {
                        position,
                        sequence_index: segment.sequence_index,
                        url,
                        range: segment.byte_range,
                        path: track_dir.join(name),
                    }),
                    Err(e) => {
                        failures.push(SegmentFailure {
                            sequence_index: segment.sequence_index,
                            url: segment.uri.clone(),
                            reason: FetchFailure::InvalidUrl(e.to_string()),
                        });
                        None
                    }
                }
            })
            .collect();

        let track_span = info_span!("track", kind = %kind, label, segments = total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{span_child_prefix}{spinner:.green} {msg} [{bar:30.green/white}] {pos}/{len}")
        {
            track_span.pb_set_style(&style.progress_chars("=> "));
        }
        track_span.pb_set_message(&format!("{kind} segments"));
        track_span.pb_set_length(total as u64);

        let (slots, fetched, skipped) = self
            .run_jobs(jobs, total, &mut failures, &track_span, token)
            .instrument(track_span.clone())
            .await?;

        if !failures.is_empty() {
            let err = SegmentFetchError::new(total, failures);
            warn!(track = %kind, failed = ?err.failed_indices(), "Track fetch incomplete");
            return Err(err.into());
        }

        let concat = ConcatList::from_slots(slots).ok_or(DownloadError::InvalidState {
            operation: "assemble concat list",
            state: "missing segment results",
        })?;
        let list_path = kind.list_path(session_dir);
        concat.write_to(&list_path).await?;

        info!(
            track = %kind,
            segments = total,
            fetched,
            skipped,
            list = %list_path.display(),
            "Track fetched"
        );

        Ok(TrackFetch {
            kind,
            concat,
            list_path,
            fetched,
            skipped,
        })
    }

    async fn run_jobs(
        &self,
        jobs: Vec<SegmentJob>,
        total: usize,
        failures: &mut Vec<SegmentFailure>,
        progress: &tracing::Span,
        token: &CancellationToken,
    ) -> Result<(Vec<Option<PathBuf>>, usize, usize), DownloadError> {
        let mut slots: Vec<Option<PathBuf>> = vec![None; total];
        let mut fetched = 0;
        let mut skipped = 0;

        let mut pending = jobs.into_iter();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < self.concurrency {
                let Some(job) = pending.next() else { break };
                in_flight.push(self.run_job(job, token));
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                // Dropping `in_flight` aborts the outstanding requests.
                _ = token.cancelled() => {
                    info!(in_flight = in_flight.len(), "Cancellation requested, abandoning segment fetch");
                    return Err(DownloadError::Cancelled);
                }

                Some((position, result)) = in_flight.next() => {
                    progress.pb_inc(1);
                    match result {
                        Ok(JobOutcome::Fetched(file)) => {
                            fetched += 1;
                            slots[position] = Some(file.local_path);
                        }
                        Ok(JobOutcome::AlreadyComplete(file)) => {
                            skipped += 1;
                            slots[position] = Some(file.local_path);
                        }
                        Err(failure) if failure.reason == FetchFailure::Cancelled => {
                            return Err(DownloadError::Cancelled);
                        }
                        Err(failure) => {
                            debug!(index = failure.sequence_index, error = %failure.reason, "Segment failed");
                            failures.push(failure);
                        }
                    }
                }
            }
        }

        Ok((slots, fetched, skipped))
    }

    async fn run_job(
        &self,
        job: SegmentJob,
        token: &CancellationToken,
    ) -> (usize, Result<JobOutcome, SegmentFailure>) {
        let span = debug_span!("segment", index = job.sequence_index);
        let result = self.materialise(&job, token).instrument(span).await;
        let result = result.map_err(|reason| SegmentFailure {
            sequence_index: job.sequence_index,
            url: job.url.to_string(),
            reason,
        });
        (job.position, result)
    }

    async fn materialise(
        &self,
        job: &SegmentJob,
        token: &CancellationToken,
    ) -> Result<JobOutcome, FetchFailure> {
        let file = SegmentFile {
            sequence_index: job.sequence_index,
            local_path: job.path.clone(),
        };

        // The final name only ever appears through a completed rename.
        if tokio::fs::try_exists(&job.path).await.unwrap_or(false) {
            debug!(path = %job.path.display(), "Segment already complete, skipping");
            return Ok(JobOutcome::AlreadyComplete(file));
        }

        let body = retry_with_backoff(&self.retry, token, |_| async {
            RetryAction::classify(self.transport.get(&job.url, job.range, self.timeout).await)
        })
        .await?;

        write_atomically(&job.path, &body)
            .await
            .map_err(|e| FetchFailure::Io(e.to_string()))?;

        debug!(path = %job.path.display(), bytes = body.len(), "Segment written");
        Ok(JobOutcome::Fetched(file))
    }
}

/// Sibling temporary path used while a segment is being written.
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

async fn write_atomically(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let part = part_path(path);
    let mut file = tokio::fs::File::create(&part).await?;
    file.write_all(body).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&part, path).await
}
