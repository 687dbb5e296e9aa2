#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use hlsmux::api::AppState;
use hlsmux::hlsmux_engine::{
    Collaborators, HlsmuxConfig, HttpConfig, HttpManifestSource, HttpTransport, MuxBackend,
    MuxOutcome, MuxStep, ProxyConfig, RetentionPolicy, create_client,
};

#[derive(Default)]
pub struct FakeCdn {
    bodies: Mutex<HashMap<String, Bytes>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl FakeCdn {
    pub fn put(&self, path: &str, body: impl Into<Bytes>) {
        self.bodies.lock().unwrap().insert(path.to_string(), body.into());
    }

    pub fn delay(&self, path: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(path.to_string(), delay);
    }

    fn publish_track(&self, dir: &str, label: &str, count: usize) {
        let mut playlist = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:4\n");
        for i in 0..count {
            playlist.push_str(&format!("#EXTINF:4.0,\nseg{i}.ts\n"));
            self.put(&format!("{dir}/seg{i}.ts"), format!("{label}-{i};"));
        }
        playlist.push_str("#EXT-X-ENDLIST\n");
        self.put(&format!("{dir}/index.m3u8"), playlist);
    }
}

async fn serve(State(cdn): State<Arc<FakeCdn>>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    let delay = cdn.delays.lock().unwrap().get(&path).copied();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    match cdn.bodies.lock().unwrap().get(&path).cloned() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Two variants, two audio tracks, three segments per track under `/show/`.
pub fn publish_show(cdn: &FakeCdn) {
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
    cdn.publish_track("/show/video/360", "v360", 3);
    cdn.publish_track("/show/video/720", "v720", 3);
    cdn.publish_track("/show/audio/en", "en", 3);
    cdn.publish_track("/show/audio/hi", "hi", 3);
}

/// Stands in for ffmpeg: concat steps append the listed files, merge writes
/// `video|audio`.
#[derive(Default)]
pub struct ConcatMuxBackend;

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
        let output = PathBuf::from(args.last().expect("output argument"));
        let inputs = inputs(args);
        let bytes = match step {
            MuxStep::ConcatVideo | MuxStep::ConcatAudio => read_concat_list(&inputs[0])?,
            MuxStep::Merge => {
                let mut merged = std::fs::read(&inputs[0])?;
                merged.push(b'|');
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
}

impl Harness {
    pub async fn start() -> Self {
        let cdn = Arc::new(FakeCdn::default());
        publish_show(&cdn);
        let app = Router::new().fallback(serve).with_state(cdn.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            cdn,
            addr,
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn state(&self, retention: RetentionPolicy, request_timeout: Duration) -> AppState {
        let mut config = HlsmuxConfig::default();
        config.http = HttpConfig {
            proxy: ProxyConfig {
                enabled: false,
                ..ProxyConfig::default()
            },
            ..HttpConfig::default()
        };
        config.session.downloads_root = self.root.path().to_path_buf();
        config.session.retention = retention;

        let client = create_client(&config.http).unwrap();
        let collaborators = Collaborators {
            manifests: Arc::new(HttpManifestSource::new(
                client.clone(),
                config.http.manifest_timeout,
            )),
            transport: Arc::new(HttpTransport::new(client)),
            mux_backend: Arc::new(ConcatMuxBackend),
        };
        AppState::new(config, collaborators, request_timeout)
    }

    /// Number of session directories under the downloads root.
    pub fn sessions_on_disk(&self) -> usize {
        std::fs::read_dir(self.root.path()).unwrap().count()
    }
}
