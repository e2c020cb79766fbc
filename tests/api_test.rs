//! HTTP surface, exercised in-process through the router.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use eikon::api::{self, AppState, JobView};
use eikon::prelude::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

struct TestApp {
    harness: Harness<InMemoryJobStore>,
    router: Router,
    queue: mpsc::Receiver<JobId>,
}

fn app() -> TestApp {
    app_with(in_memory(ScriptedGateway::default()))
}

fn app_with(harness: Harness<InMemoryJobStore>) -> TestApp {
    let (sender, queue) = mpsc::channel(16);
    let state = AppState {
        scheduler: JobScheduler::new(
            harness.store.clone(),
            harness.admission.clone(),
            sender,
        ),
        correlator: harness.correlator.clone(),
        assets: harness.assets.clone(),
        upload_url_ttl: Duration::from_secs(600),
    };

    TestApp {
        router: api::router(state),
        harness,
        queue,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let response = app.router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_submit_job_accepts_and_enqueues() {
    let mut app = app();

    let (status, body) = send(
        &app.router,
        post_json(
            "/jobs",
            json!({
                "owner_id": "user-1",
                "photo_key": "ptv/face.png",
                "script": "Hello there",
                "voice_key": "samples/voices/jeff.mp3",
                "mode": "experimental"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let view: JobView = serde_json::from_value(body).unwrap();
    assert_eq!(view.status, JobStatus::Queued);
    assert_eq!(view.mode, Mode::Experimental);
    assert_eq!(view.output_key, None);
    assert_eq!(app.queue.recv().await, Some(view.id));

    let (status, body) = send(&app.router, get(&format!("/jobs/{}", view.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["owner_id"], "user-1");
}

#[tokio::test]
async fn test_submit_rejects_two_driving_sources() {
    let app = app();

    let (status, body) = send(
        &app.router,
        post_json(
            "/jobs",
            json!({
                "owner_id": "user-1",
                "photo_key": "ptv/face.png",
                "script": "Hello",
                "audio_key": "ptv/voice.wav"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_undecodable_body_gets_json_error() {
    let app = app();

    let request = Request::post("/jobs")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    // Well-formed JSON missing a required field.
    let (status, body) = send(&app.router, post_json("/jobs", json!({"script": "Hi"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("owner_id"));

    let (status, body) = send(&app.router, post_json("/uploads", json!({"file_name": 3}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let app = app();
    let (status, _) = send(&app.router, get(&format!("/jobs/{}", uuid::Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_owner_jobs_are_listed_newest_first() {
    let app = app();
    let older = app.harness.insert(script_request("user-2")).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let newer = app.harness.insert(script_request("user-2")).await;
    app.harness.insert(script_request("someone-else")).await;

    let (status, body) = send(&app.router, get("/owners/user-2/jobs")).await;
    assert_eq!(status, StatusCode::OK);

    let views: Vec<JobView> = serde_json::from_value(body).unwrap();
    let ids: Vec<JobId> = views.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![newer.id(), older.id()]);
}

#[tokio::test]
async fn test_upload_ticket() {
    let app = app();

    let (status, body) = send(
        &app.router,
        post_json(
            "/uploads",
            json!({"file_name": "Me.PNG", "content_type": "image/png", "purpose": "photo"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let key = body["key"].as_str().unwrap();
    assert!(key.starts_with("ptv/"));
    assert!(key.ends_with(".png"));
    assert!(body["url"].as_str().unwrap().contains(key));

    let (status, _) = send(
        &app.router,
        post_json(
            "/uploads",
            json!({"file_name": "clip.wav", "content_type": " ", "purpose": "audio"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Webhook
// =============================================================================

fn webhook(payload: Vec<u8>) -> Request<Body> {
    Request::post("/webhooks/portrait-avatar")
        .header("content-type", "application/json")
        .body(Body::from(payload))
        .unwrap()
}

#[tokio::test]
async fn test_webhook_completes_submitted_job() {
    let app = app();
    let h = &app.harness;
    h.store.grant(&"user-3".into(), 1).await.unwrap();
    let job = h.insert(audio_request("user-3", Mode::Experimental)).await;
    h.engine.execute(job.id()).await.unwrap();

    let (status, body) = send(
        &app.router,
        webhook(finished_payload("h1", Some("https://cdn.example/v.mp4"))),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["output_key"], "sieve/imported.mp4");
    assert_eq!(body["job_id"], job.id().to_string());

    let (status, body) = send(
        &app.router,
        webhook(finished_payload("h1", Some("https://cdn.example/v.mp4"))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Already processed");
    assert_eq!(h.balance("user-3").await, 0);
}

#[tokio::test]
async fn test_webhook_rejects_unknown_handle() {
    let app = app();
    let (status, body) = send(
        &app.router,
        webhook(finished_payload("nobody", Some("https://cdn.example/v.mp4"))),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("nobody"));
}

#[tokio::test]
async fn test_webhook_rejects_malformed_envelope() {
    let app = app();
    let (status, _) = send(&app.router, webhook(b"{\"nope\": true}".to_vec())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_without_url_fails_job_with_bad_request() {
    let app = app();
    let h = &app.harness;
    h.store.grant(&"user-4".into(), 1).await.unwrap();
    let job = h.insert(audio_request("user-4", Mode::Experimental)).await;
    h.engine.execute(job.id()).await.unwrap();

    let (status, _) = send(&app.router, webhook(finished_payload("h1", None))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app.router, get(&format!("/jobs/{}", job.id()))).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["failure"], "malformed_response");
}

#[tokio::test]
async fn test_webhook_import_failure_is_internal_error() {
    let app = app_with(Harness::new(
        InMemoryJobStore::new(),
        ScriptedGateway::default(),
        FakeAssets::failing_imports(),
    ));
    let h = &app.harness;
    h.store.grant(&"user-5".into(), 1).await.unwrap();
    let job = h.insert(audio_request("user-5", Mode::Experimental)).await;
    h.engine.execute(job.id()).await.unwrap();

    let (status, body) = send(
        &app.router,
        webhook(finished_payload("h1", Some("https://cdn.example/v.mp4"))),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "internal server error");

    // The job is failed, not left processing, and nothing was charged.
    let (_, body) = send(&app.router, get(&format!("/jobs/{}", job.id()))).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["failure"], "import_failed");
    assert_eq!(h.balance("user-5").await, 1);
}

#[tokio::test]
async fn test_duplicate_webhook_during_import_is_conflict() {
    let app = app_with(Harness::new(
        InMemoryJobStore::new(),
        ScriptedGateway::default(),
        FakeAssets::default().import_delay(Duration::from_millis(60)),
    ));
    let h = &app.harness;
    h.store.grant(&"user-6".into(), 1).await.unwrap();
    let job = h.insert(audio_request("user-6", Mode::Experimental)).await;
    h.engine.execute(job.id()).await.unwrap();

    let first = {
        let router = app.router.clone();
        tokio::spawn(async move {
            send(
                &router,
                webhook(finished_payload("h1", Some("https://cdn.example/v.mp4"))),
            )
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (status, body) = send(
        &app.router,
        webhook(finished_payload("h1", Some("https://cdn.example/v.mp4"))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "Already being processed");

    let (status, body) = first.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(h.assets.imports(), 1);
    assert_eq!(h.balance("user-6").await, 0);
}
