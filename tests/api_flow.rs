use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tower::ServiceExt;

use crosspost::config::{FacebookConfig, TikTokConfig, YouTubeConfig};
use crosspost::domain::{MemoryConnectionRepository, MemoryPostRepository};
use crosspost::models::Platform;
use crosspost::platforms::oauth::OAuthClient;
use crosspost::platforms::{AdapterRegistry, PlatformAdapter, PlatformError, UploadRequest, UploadedVideo};
use crosspost::services::publisher::Publisher;
use crosspost::services::session::create_access_token;
use crosspost::storage::MemoryBlobStore;
use crosspost::{AppState, build_app};

const SECRET: &[u8] = b"test-secret";

struct FakeAdapter {
    platform: Platform,
    fail: AtomicBool,
    uploads: AtomicUsize,
}

impl FakeAdapter {
    fn new(platform: Platform, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            platform,
            fail: AtomicBool::new(fail),
            uploads: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PlatformAdapter for FakeAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn upload_video(&self, _user_id: i64, request: &UploadRequest) -> Result<UploadedVideo, PlatformError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PlatformError::Permanent("Status 400: video too short".into()));
        }
        assert!(!request.video.is_empty());
        Ok(UploadedVideo {
            video_id: format!("{}-1", self.platform.as_str()),
            thumbnail_url: None,
        })
    }
}

struct TestApp {
    router: Router,
    blobs: Arc<MemoryBlobStore>,
}

fn oauth_client() -> OAuthClient {
    OAuthClient::new(
        YouTubeConfig {
            client_id: String::new(),
            client_secret: String::new(),
            oauth_url: "http://127.0.0.1:9".into(),
            api_url: "http://127.0.0.1:9".into(),
        },
        FacebookConfig {
            app_id: String::new(),
            app_secret: String::new(),
            graph_version: "v19.0".into(),
            graph_url: "http://127.0.0.1:9".into(),
            rupload_url: "http://127.0.0.1:9".into(),
        },
        TikTokConfig {
            client_key: String::new(),
            client_secret: String::new(),
            api_url: "http://127.0.0.1:9".into(),
        },
    )
}

fn test_app(adapters: Vec<Arc<FakeAdapter>>) -> TestApp {
    let posts = Arc::new(MemoryPostRepository::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let mut registry = AdapterRegistry::new();
    for adapter in adapters {
        registry = registry.register(adapter);
    }

    let state = Arc::new(AppState {
        jwt_secret: SECRET.to_vec(),
        connections: Arc::new(MemoryConnectionRepository::new()),
        oauth: Arc::new(oauth_client()),
        publisher: Arc::new(Publisher::new(posts, blobs.clone(), registry)),
    });

    TestApp {
        router: build_app(state),
        blobs,
    }
}

fn cookie(user_id: i64) -> String {
    format!("access_token={}", create_access_token(user_id, SECRET).unwrap())
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn json_request(method: &str, uri: &str, user_id: i64, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, cookie(user_id))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn create_post(app: &TestApp, platforms: &[&str]) -> i64 {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/posts",
            1,
            json!({
                "title": "Launch",
                "description": "Launch day",
                "tags": ["launch"],
                "scheduled_at": (Utc::now() + Duration::hours(2)).to_rfc3339(),
                "timezone": "America/New_York",
                "platforms": platforms,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["post_id"].as_i64().unwrap()
}

async fn upload(app: &TestApp) -> String {
    let request = Request::builder()
        .method("POST")
        .uri("/uploads")
        .header(header::COOKIE, cookie(1))
        .header(header::CONTENT_TYPE, "video/mp4")
        .body(Body::from(vec![7u8; 2048]))
        .unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    body["blob_path"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_is_public_and_posts_require_auth() {
    let app = test_app(vec![]);

    let (status, _) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, Request::get("/posts").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let bearer = Request::get("/posts")
        .header(
            header::AUTHORIZATION,
            format!("Bearer {}", create_access_token(1, SECRET).unwrap()),
        )
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, bearer).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_publish_partial_failure_then_retry() {
    let youtube = FakeAdapter::new(Platform::Youtube, false);
    let tiktok = FakeAdapter::new(Platform::Tiktok, true);
    let app = test_app(vec![youtube.clone(), tiktok.clone()]);

    let post_id = create_post(&app, &["youtube", "tiktok"]).await;
    let blob_path = upload(&app).await;

    let (status, report) = send(
        &app,
        json_request(
            "POST",
            &format!("/posts/{}/publish", post_id),
            1,
            json!({ "blob_path": blob_path }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"], "failed");
    assert_eq!(report["blob_deleted"], false);
    assert_eq!(report["warnings"][0], "TikTok: Status 400: video too short");
    assert_eq!(app.blobs.delete_count(&blob_path), 0);

    tiktok.fail.store(false, Ordering::SeqCst);
    let retry_uri = format!("/posts/{}/platforms/tiktok/retry", post_id);
    let (status, report) = send(&app, json_request("POST", &retry_uri, 1, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"], "pending");
    assert_eq!(report["blob_deleted"], true);
    assert_eq!(app.blobs.delete_count(&blob_path), 1);

    let (status, body) = send(&app, json_request("POST", &retry_uri, 1, json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["requires_video"], false);

    let request = Request::get(format!("/posts/{}", post_id))
        .header(header::COOKIE, cookie(1))
        .body(Body::empty())
        .unwrap();
    let (status, post) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(post["status"], "pending");
    assert!(post["video_file_path"].is_null());
    assert_eq!(post["platforms"].as_array().unwrap().len(), 2);

    assert_eq!(youtube.uploads.load(Ordering::SeqCst), 1);
    assert_eq!(tiktok.uploads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_retry_after_blob_removed_requires_video() {
    let app = test_app(vec![FakeAdapter::new(Platform::Facebook, true)]);
    let post_id = create_post(&app, &["facebook"]).await;
    let blob_path = upload(&app).await;

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &format!("/posts/{}/publish", post_id),
            1,
            json!({ "blob_path": blob_path }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let delete = Request::delete(format!("/uploads?path={}", blob_path))
        .header(header::COOKIE, cookie(1))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &format!("/posts/{}/platforms/facebook/retry", post_id),
            1,
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["requires_video"], true);
}

#[tokio::test]
async fn test_other_users_cannot_touch_a_post_or_blob() {
    let app = test_app(vec![FakeAdapter::new(Platform::Youtube, false)]);
    let post_id = create_post(&app, &["youtube"]).await;
    let blob_path = upload(&app).await;

    let request = Request::get(format!("/posts/{}", post_id))
        .header(header::COOKIE, cookie(2))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &format!("/posts/{}/publish", post_id),
            2,
            json!({ "blob_path": blob_path }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let delete = Request::delete(format!("/uploads?path={}", blob_path))
        .header(header::COOKIE, cookie(2))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_create_post_validation() {
    let app = test_app(vec![]);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/posts",
            1,
            json!({
                "title": "Launch",
                "scheduled_at": "2030-03-10T02:30",
                "timezone": "Nowhere/Land",
                "platforms": ["youtube"],
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Nowhere/Land"));

    let not_video = Request::builder()
        .method("POST")
        .uri("/uploads")
        .header(header::COOKIE, cookie(1))
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from(vec![1u8; 16]))
        .unwrap();
    let (status, _) = send(&app, not_video).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
