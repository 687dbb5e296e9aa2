mod common;

use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use common::Harness;
use hlsmux::api::routes::create_router;
use hlsmux::hlsmux_engine::RetentionPolicy;
use tower::ServiceExt;

const LONG: Duration = Duration::from_secs(30);

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

fn get(uri: String) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn wait_until_empty(harness: &Harness) {
    for _ in 0..50 {
        if harness.sessions_on_disk() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let harness = Harness::start().await;
    let app = create_router(harness.state(RetentionPolicy::Retain, LONG));

    let response = app.oneshot(get("/api/health".to_string())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
}

#[tokio::test]
async fn catalog_lists_resolutions_and_languages() {
    let harness = Harness::start().await;
    let app = create_router(harness.state(RetentionPolicy::Retain, LONG));

    let uri = format!(
        "/api/catalog?manifest_url={}",
        harness.url("/show/master.m3u8")
    );
    let response = app.oneshot(get(uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["resolutions"], serde_json::json!(["640x360", "1280x720"]));
    assert_eq!(json["languages"], serde_json::json!(["English", "Hindi"]));
    assert_eq!(harness.sessions_on_disk(), 0);
}

#[tokio::test]
async fn catalog_without_manifest_url_is_bad_request() {
    let harness = Harness::start().await;
    let app = create_router(harness.state(RetentionPolicy::Retain, LONG));

    let response = app.oneshot(get("/api/catalog".to_string())).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "bad_request");
}

#[tokio::test]
async fn missing_manifest_is_bad_gateway() {
    let harness = Harness::start().await;
    let app = create_router(harness.state(RetentionPolicy::Retain, LONG));

    let uri = format!(
        "/api/catalog?manifest_url={}",
        harness.url("/nowhere/master.m3u8")
    );
    let response = app.oneshot(get(uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["code"], "manifest_error");
}

#[tokio::test]
async fn download_streams_attachment_and_purges() {
    let harness = Harness::start().await;
    let app = create_router(harness.state(RetentionPolicy::Purge, LONG));

    let uri = format!(
        "/api/download?manifest_url={}&resolution=1280x720&language=Hindi&concurrency=2",
        harness.url("/show/master.m3u8")
    );
    let response = app.oneshot(get(uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"output_1280x720_Hindi.mp4\""
    );
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(
        body_text(response).await,
        "v720-0;v720-1;v720-2;|hi-0;hi-1;hi-2;"
    );

    wait_until_empty(&harness).await;
    assert_eq!(harness.sessions_on_disk(), 0);
}

#[tokio::test]
async fn download_accepts_json_body_and_retains() {
    let harness = Harness::start().await;
    let app = create_router(harness.state(RetentionPolicy::Retain, LONG));

    let body = serde_json::json!({ "manifest_url": harness.url("/show/master.m3u8") });
    let request = Request::builder()
        .method("POST")
        .uri("/api/download")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"output_640x360_English.mp4\""
    );
    assert_eq!(
        body_text(response).await,
        "v360-0;v360-1;v360-2;|en-0;en-1;en-2;"
    );
    assert_eq!(harness.sessions_on_disk(), 1);
}

#[tokio::test]
async fn unknown_resolution_is_bad_request_without_files() {
    let harness = Harness::start().await;
    let app = create_router(harness.state(RetentionPolicy::Retain, LONG));

    let uri = format!(
        "/api/download?manifest_url={}&resolution=3840x2160",
        harness.url("/show/master.m3u8")
    );
    let response = app.oneshot(get(uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "selection_error");
    assert!(json["message"].as_str().unwrap().contains("3840x2160"));
    assert_eq!(harness.sessions_on_disk(), 0);
}

#[tokio::test]
async fn invalid_concurrency_is_bad_request() {
    let harness = Harness::start().await;
    let app = create_router(harness.state(RetentionPolicy::Retain, LONG));

    let uri = format!(
        "/api/download?manifest_url={}&concurrency=many",
        harness.url("/show/master.m3u8")
    );
    let response = app.oneshot(get(uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "bad_request");
}

#[tokio::test]
async fn request_timeout_cancels_and_purges() {
    let harness = Harness::start().await;
    harness
        .cdn
        .delay("/show/video/360/seg1.ts", Duration::from_secs(5));
    let app = create_router(harness.state(RetentionPolicy::Purge, Duration::from_millis(500)));

    let uri = format!(
        "/api/download?manifest_url={}",
        harness.url("/show/master.m3u8")
    );
    let response = app.oneshot(get(uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body_json(response).await["code"], "timeout");
    assert_eq!(harness.sessions_on_disk(), 0);
}

#[tokio::test]
async fn client_disconnect_cancels_and_purges() {
    let harness = Harness::start().await;
    harness
        .cdn
        .delay("/show/video/360/seg1.ts", Duration::from_secs(10));
    let app = create_router(harness.state(RetentionPolicy::Purge, LONG));

    let uri = format!(
        "/api/download?manifest_url={}",
        harness.url("/show/master.m3u8")
    );
    let in_flight = tokio::spawn(app.oneshot(get(uri)));

    // The session directory appears once both sub-manifests are loaded.
    for _ in 0..100 {
        if harness.sessions_on_disk() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(harness.sessions_on_disk(), 1);

    // Aborting the task drops the handler future, as a vanished client does.
    in_flight.abort();
    assert!(in_flight.await.unwrap_err().is_cancelled());

    wait_until_empty(&harness).await;
    assert_eq!(harness.sessions_on_disk(), 0);
}
