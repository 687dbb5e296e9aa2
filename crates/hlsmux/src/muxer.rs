//! Three-step lossless remux: concat video, concat audio, merge.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use process_utils::{run_captured, tokio_command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MuxerConfig;
use crate::error::{DownloadError, MuxError};
use crate::fetcher::TrackFetch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MuxStep {
    ConcatVideo,
    ConcatAudio,
    Merge,
}

impl MuxStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConcatVideo => "concat_video",
            Self::ConcatAudio => "concat_audio",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for MuxStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one invocation of the muxing tool ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub diagnostic: String,
}

/// The external muxing collaborator.
#[async_trait]
pub trait MuxBackend: Send + Sync {
    /// Run one step to completion. `Err` means the tool could not be started.
    async fn run(&self, step: MuxStep, args: &[OsString]) -> std::io::Result<MuxOutcome>;
}

/// Runs `ffmpeg` as a child process.
pub struct FfmpegBackend {
    ffmpeg_path: PathBuf,
}

impl FfmpegBackend {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

#[async_trait]
impl MuxBackend for FfmpegBackend {
    async fn run(&self, step: MuxStep, args: &[OsString]) -> std::io::Result<MuxOutcome> {
        debug!(step = %step, ffmpeg = %self.ffmpeg_path.display(), ?args, "Running ffmpeg");

        let mut cmd = tokio_command(&self.ffmpeg_path);
        cmd.args(args).env("LC_ALL", "C");
        let output = run_captured(&mut cmd).await?;

        debug!(
            step = %step,
            exit_code = ?output.status.code(),
            elapsed_ms = output.elapsed.as_millis() as u64,
            "ffmpeg exited"
        );
        Ok(MuxOutcome {
            success: output.success(),
            exit_code: output.status.code(),
            diagnostic: output.diagnostic(),
        })
    }
}

/// Paths of one mux run.
#[derive(Debug, Clone)]
pub struct MuxJob {
    pub video_list: PathBuf,
    pub video_segments: usize,
    pub audio_list: PathBuf,
    pub audio_segments: usize,
    pub video_intermediate: PathBuf,
    pub audio_intermediate: PathBuf,
    pub output: PathBuf,
}

impl MuxJob {
    /// Intermediates live in `work_dir` and carry `unique` in their names so
    /// concurrent sessions never share them.
    pub fn new(
        config: &MuxerConfig,
        work_dir: &Path,
        unique: &str,
        video: &TrackFetch,
        audio: &TrackFetch,
        output: PathBuf,
    ) -> Self {
        Self {
            video_list: video.list_path.clone(),
            video_segments: video.concat.len(),
            audio_list: audio.list_path.clone(),
            audio_segments: audio.concat.len(),
            video_intermediate: work_dir.join(format!(
                "intermediate_video_{unique}.{}",
                config.video_intermediate
            )),
            audio_intermediate: work_dir.join(format!(
                "intermediate_audio_{unique}.{}",
                config.audio_intermediate
            )),
            output,
        }
    }
}

/// Removes both intermediates when dropped, and the final output too unless
/// the run was committed.
pub struct IntermediateFiles {
    paths: [PathBuf; 2],
    output: PathBuf,
    committed: bool,
}

impl IntermediateFiles {
    pub fn new(job: &MuxJob) -> Self {
        Self {
            paths: [job.video_intermediate.clone(), job.audio_intermediate.clone()],
            output: job.output.clone(),
            committed: false,
        }
    }

    /// Keep the final output on drop.
    pub fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for IntermediateFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            remove_quietly(path);
        }
        if !self.committed {
            remove_quietly(&self.output);
        }
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed mux artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove mux artifact"),
    }
}

pub struct StreamMuxer {
    backend: Arc<dyn MuxBackend>,
    config: MuxerConfig,
}

impl StreamMuxer {
    pub fn new(backend: Arc<dyn MuxBackend>, config: MuxerConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &MuxerConfig {
        &self.config
    }

    fn common_args() -> Vec<OsString> {
        ["-y", "-hide_banner", "-nostats", "-loglevel", "error"]
            .into_iter()
            .map(OsString::from)
            .collect()
    }

    /// `ffmpeg -f concat -safe 0 -i <list> -c copy <out>`
    pub fn concat_args(list: &Path, output: &Path) -> Vec<OsString> {
        let mut args = Self::common_args();
        args.extend(["-f", "concat", "-safe", "0", "-i"].map(OsString::from));
        args.push(list.as_os_str().to_owned());
        args.extend(["-c", "copy"].map(OsString::from));
        args.push(output.as_os_str().to_owned());
        args
    }

    /// `ffmpeg -i <video> -i <audio> -map 0:v:0 -map 1:a:0 -c copy [-movflags +faststart] <out>`
    pub fn merge_args(&self, video: &Path, audio: &Path, output: &Path) -> Vec<OsString> {
        let mut args = Self::common_args();
        args.push("-i".into());
        args.push(video.as_os_str().to_owned());
        args.push("-i".into());
        args.push(audio.as_os_str().to_owned());
        args.extend(["-map", "0:v:0", "-map", "1:a:0", "-c", "copy"].map(OsString::from));

        // movflags is only valid for MP4-family muxers.
        let output_ext = output
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        let faststart_supported = matches!(output_ext.as_deref(), Some("mp4" | "mov" | "m4v"));
        if self.config.faststart && faststart_supported {
            args.extend(["-movflags", "+faststart"].map(OsString::from));
        }

        args.push(output.as_os_str().to_owned());
        args
    }

    /// Run all three steps. On any failure both intermediates and any
    /// partial output are removed; on success only the output remains.
    pub async fn mux(&self, job: &MuxJob, token: &CancellationToken) -> Result<PathBuf, DownloadError> {
        if job.video_segments == 0 {
            return Err(empty_list(MuxStep::ConcatVideo, &job.video_list));
        }
        if job.audio_segments == 0 {
            return Err(empty_list(MuxStep::ConcatAudio, &job.audio_list));
        }

        let mut guard = IntermediateFiles::new(job);

        self.run_step(
            MuxStep::ConcatVideo,
            Self::concat_args(&job.video_list, &job.video_intermediate),
            &job.video_intermediate,
            token,
        )
        .await?;

        self.run_step(
            MuxStep::ConcatAudio,
            Self::concat_args(&job.audio_list, &job.audio_intermediate),
            &job.audio_intermediate,
            token,
        )
        .await?;

        self.run_step(
            MuxStep::Merge,
            self.merge_args(&job.video_intermediate, &job.audio_intermediate, &job.output),
            &job.output,
            token,
        )
        .await?;

        guard.commit();
        drop(guard);

        info!(output = %job.output.display(), "Mux complete");
        Ok(job.output.clone())
    }

    async fn run_step(
        &self,
        step: MuxStep,
        args: Vec<OsString>,
        produces: &Path,
        token: &CancellationToken,
    ) -> Result<(), DownloadError> {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        info!(step = %step, output = %produces.display(), "Mux step started");
        let outcome = tokio::select! {
            biased;
            // Dropping the backend future kills the child.
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            outcome = self.backend.run(step, &args) => outcome,
        };

        let outcome = outcome.map_err(|e| MuxError {
            step,
            exit_code: None,
            diagnostic: format!("failed to start muxer: {e}"),
        })?;

        if !outcome.success {
            let diagnostic = if outcome.diagnostic.trim().is_empty() {
                "muxer reported failure without diagnostics".to_string()
            } else {
                outcome.diagnostic
            };
            return Err(MuxError {
                step,
                exit_code: outcome.exit_code,
                diagnostic,
            }
            .into());
        }

        let produced = tokio::fs::metadata(produces)
            .await
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        if !produced {
            return Err(MuxError {
                step,
                exit_code: outcome.exit_code,
                diagnostic: format!("muxer exited cleanly but {} is missing or empty", produces.display()),
            }
            .into());
        }

        Ok(())
    }
}

fn empty_list(step: MuxStep, list: &Path) -> DownloadError {
    MuxError {
        step,
        exit_code: None,
        diagnostic: format!("concat list {} has no entries", list.display()),
    }
    .into()
}
