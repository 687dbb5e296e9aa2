#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use hlsmux_engine::{
    Collaborators, HlsmuxConfig, HttpConfig, HttpManifestSource, HttpTransport, MuxBackend,
    MuxOutcome, MuxStep, ProxyConfig, create_client,
};

#[derive(Clone)]
pub struct Resource {
    pub status: StatusCode,
    pub body: Bytes,
    pub delay: Duration,
}

/// In-process HTTP origin serving playlists and segments by path.
#[derive(Default)]
pub struct FakeCdn {
    resources: Mutex<HashMap<String, Resource>>,
    hits: Mutex<HashMap<String, usize>>,
}

impl FakeCdn {
    pub fn put(&self, path: &str, body: impl Into<Bytes>) {
        self.put_resource(
            path,
            Resource {
                status: StatusCode::OK,
                body: body.into(),
                delay: Duration::ZERO,
            },
        );
    }

    pub fn put_resource(&self, path: &str, resource: Resource) {
        self.resources
            .lock()
            .unwrap()
            .insert(path.to_string(), resource);
    }

    pub fn set_status(&self, path: &str, status: StatusCode) {
        if let Some(resource) = self.resources.lock().unwrap().get_mut(path) {
            resource.status = status;
        }
    }

    pub fn set_delay(&self, path: &str, delay: Duration) {
        if let Some(resource) = self.resources.lock().unwrap().get_mut(path) {
            resource.delay = delay;
        }
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    /// Requests for `.ts` segments across all tracks.
    pub fn segment_hits(&self) -> usize {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|(path, _)| path.ends_with(".ts"))
            .map(|(_, n)| n)
            .sum()
    }

    /// Publish a media playlist at `<dir>/index.m3u8` with `count` segments
    /// whose bodies are `<label>-<i>;`.
    pub fn publish_track(&self, dir: &str, label: &str, count: usize) {
        let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n");
        for i in 0..count {
            playlist.push_str(&format!("#EXTINF:4.0,\nseg{i}.ts\n"));
            self.put(&format!("{dir}/seg{i}.ts"), format!("{label}-{i};"));
        }
        playlist.push_str("#EXT-X-ENDLIST\n");
        self.put(&format!("{dir}/index.m3u8"), playlist);
    }

    /// Expected concatenation of a track published by `publish_track`.
    pub fn track_bytes(label: &str, count: usize) -> String {
        (0..count).map(|i| format!("{label}-{i};")).collect()
    }
}

async fn serve(State(cdn): State<Arc<FakeCdn>>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    *cdn.hits.lock().unwrap().entry(path.clone()).or_default() += 1;

    let resource = cdn.resources.lock().unwrap().get(&path).cloned();
    match resource {
        Some(resource) => {
            if !resource.delay.is_zero() {
                tokio::time::sleep(resource.delay).await;
            }
            (resource.status, resource.body).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn spawn_cdn(cdn: Arc<FakeCdn>) -> SocketAddr {
    let app = Router::new().fallback(serve).with_state(cdn);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Standard two-variant, two-track show under `/show/`.
pub fn publish_show(cdn: &FakeCdn, video_segments: usize, audio_segments: usize) {
    cdn.put(
        "/show/master.m3u8",
        "#EXTM3U
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"English\",LANGUAGE=\"en\",DEFAULT=YES,URI=\"audio/en/index.m3u8\"
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"Hindi\",LANGUAGE=\"hi\",URI=\"audio/hi/index.m3u8\"
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,AUDIO=\"aud\"
video/360/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720,AUDIO=\"aud\"
video/720/index.m3u8
",
    );
    cdn.publish_track("/show/video/360", "v360", video_segments);
    cdn.publish_track("/show/video/720", "v720", video_segments);
    cdn.publish_track("/show/audio/en", "en", audio_segments);
    cdn.publish_track("/show/audio/hi", "hi", audio_segments);
}

/// Stands in for ffmpeg: concat steps append the listed files, merge joins
/// video and audio around a separator.
#[derive(Default)]
pub struct ConcatMuxBackend {
    pub steps: Mutex<Vec<MuxStep>>,
}

pub const MERGE_SEPARATOR: &str = "|";

fn inputs(args: &[OsString]) -> Vec<PathBuf> {
    args.windows(2)
        .filter(|w| w[0] == "-i")
        .map(|w| PathBuf::from(&w[1]))
        .collect()
}

fn read_concat_list(list: &Path) -> std::io::Result<Vec<u8>> {
    let text = std::fs::read_to_string(list)?;
    let mut out = Vec::new();
    for line in text.lines().skip(1) {
        let quoted = line
            .strip_prefix("file '")
            .and_then(|rest| rest.strip_suffix('\''))
            .expect("well-formed concat entry");
        out.extend(std::fs::read(quoted.replace(r"'\''", "'"))?);
    }
    Ok(out)
}

#[async_trait]
impl MuxBackend for ConcatMuxBackend {
    async fn run(&self, step: MuxStep, args: &[OsString]) -> std::io::Result<MuxOutcome> {
        self.steps.lock().unwrap().push(step);
        let output = PathBuf::from(args.last().expect("output argument"));
        let inputs = inputs(args);

        let bytes = match step {
            MuxStep::ConcatVideo | MuxStep::ConcatAudio => read_concat_list(&inputs[0])?,
            MuxStep::Merge => {
                let mut merged = std::fs::read(&inputs[0])?;
                merged.extend(MERGE_SEPARATOR.as_bytes());
                merged.extend(std::fs::read(&inputs[1])?);
                merged
            }
        };
        std::fs::write(output, bytes)?;
        Ok(MuxOutcome {
            success: true,
            exit_code: Some(0),
            diagnostic: String::new(),
        })
    }
}

pub struct Harness {
    pub cdn: Arc<FakeCdn>,
    pub addr: SocketAddr,
    pub root: tempfile::TempDir,
    pub mux: Arc<ConcatMuxBackend>,
}

impl Harness {
    pub async fn start() -> Self {
        let cdn = Arc::new(FakeCdn::default());
        let addr = spawn_cdn(cdn.clone()).await;
        Self {
            cdn,
            addr,
            root: tempfile::tempdir().unwrap(),
            mux: Arc::new(ConcatMuxBackend::default()),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn config(&self) -> HlsmuxConfig {
        let mut config = HlsmuxConfig::default();
        config.http = HttpConfig {
            proxy: ProxyConfig {
                enabled: false,
                ..ProxyConfig::default()
            },
            segment_timeout: Duration::from_secs(5),
            ..HttpConfig::default()
        };
        config.session.downloads_root = self.root.path().to_path_buf();
        config
    }

    pub fn collaborators(&self, config: &HlsmuxConfig) -> Collaborators {
        let client = create_client(&config.http).unwrap();
        Collaborators {
            manifests: Arc::new(HttpManifestSource::new(
                client.clone(),
                config.http.manifest_timeout,
            )),
            transport: Arc::new(HttpTransport::new(client)),
            mux_backend: self.mux.clone(),
        }
    }

    /// Number of entries directly under the downloads root.
    pub fn sessions_on_disk(&self) -> usize {
        std::fs::read_dir(self.root.path()).unwrap().count()
    }
}
