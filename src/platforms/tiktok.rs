//! TikTok Content Posting API (direct post, FILE_UPLOAD source)

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::chunked::{
    Chunk, ChunkPlan, ChunkedProtocol, ChunkedUploader, UploadSession, UploadedVideo, chunk_size_for,
};
use super::error::PlatformError;
use super::{PlatformAdapter, UploadRequest};
use crate::config::TikTokConfig;
use crate::constants::API_TIMEOUT;
use crate::models::Platform;
use crate::services::tokens::TokenManager;

const MIN_CHUNK_BYTES: usize = 5 * 1024 * 1024;
const CAPTION_MAX_CHARS: usize = 2200;
const DEFAULT_PRIVACY_LEVEL: &str = "SELF_ONLY";
const TRANSIENT_CODES: &[&str] = &["rate_limit_exceeded", "internal_error"];

/// TikTok shows the title as the post caption
fn post_title(title: &str) -> String {
    title.chars().take(CAPTION_MAX_CHARS).collect()
}

/// TikTok wants chunks of at least 5 MB with the remainder folded into the
/// last one; anything smaller goes up whole.
fn upload_plan(total_bytes: usize) -> ChunkPlan {
    if total_bytes <= MIN_CHUNK_BYTES {
        return ChunkPlan::with_chunk_size(total_bytes, total_bytes.max(1));
    }
    ChunkPlan::with_chunk_size(total_bytes, chunk_size_for(total_bytes).max(MIN_CHUNK_BYTES)).merge_remainder()
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct InitData {
    publish_id: String,
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    #[serde(default)]
    status: String,
    #[serde(default)]
    fail_reason: Option<String>,
}

fn tiktok_error(status: StatusCode, error: ApiError) -> PlatformError {
    let transient = TRANSIENT_CODES.contains(&error.code.as_str());
    let message = if error.message.is_empty() { error.code } else { error.message };
    PlatformError::classify(status, message, transient)
}

async fn read_envelope<T: DeserializeOwned>(resp: reqwest::Response, context: &str) -> Result<T, PlatformError> {
    let status = resp.status();
    let text = resp.text().await?;

    let envelope: Envelope<T> = match serde_json::from_str(&text) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => return Err(PlatformError::classify(status, text, false)),
        Err(e) => return Err(super::decode_error(context, e, &text)),
    };

    let error = envelope.error.unwrap_or_default();
    if !status.is_success() || (!error.code.is_empty() && error.code != "ok") {
        return Err(tiktok_error(status, error));
    }

    envelope
        .data
        .ok_or_else(|| PlatformError::Permanent(format!("TikTok {} response has no data", context)))
}

pub struct TikTokAdapter {
    http: Client,
    config: TikTokConfig,
    tokens: Arc<TokenManager>,
    uploader: ChunkedUploader,
}

impl TikTokAdapter {
    pub fn new(config: TikTokConfig, tokens: Arc<TokenManager>) -> Self {
        Self {
            http: Client::new(),
            config,
            tokens,
            uploader: ChunkedUploader::default(),
        }
    }

    pub fn with_uploader(mut self, uploader: ChunkedUploader) -> Self {
        self.uploader = uploader;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }
}

struct FileUpload<'a> {
    adapter: &'a TikTokAdapter,
    token: String,
    request: &'a UploadRequest,
}

#[async_trait]
impl<'a> ChunkedProtocol for FileUpload<'a> {
    fn name(&self) -> &'static str {
        "tiktok"
    }

    fn plan(&self, total_bytes: usize) -> ChunkPlan {
        upload_plan(total_bytes)
    }

    async fn start(&self, plan: &ChunkPlan) -> Result<UploadSession, PlatformError> {
        let caption = post_title(&self.request.title);
        let privacy_level = self
            .request
            .options
            .tiktok_privacy_level
            .as_deref()
            .unwrap_or(DEFAULT_PRIVACY_LEVEL);

        let body = json!({
            "post_info": {
                "title": caption,
                "privacy_level": privacy_level,
                "disable_duet": false,
                "disable_comment": false,
                "disable_stitch": false,
            },
            "source_info": {
                "source": "FILE_UPLOAD",
                "video_size": plan.total_bytes,
                "chunk_size": plan.chunk_size,
                "total_chunk_count": plan.chunk_count(),
            }
        });

        let resp = self
            .adapter
            .http
            .post(self.adapter.url("v2/post/publish/video/init/"))
            .timeout(API_TIMEOUT)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let init: InitData = read_envelope(resp, "init").await?;

        Ok(UploadSession {
            session_id: init.publish_id.clone(),
            upload_url: Some(init.upload_url),
            video_id: Some(init.publish_id),
        })
    }

    async fn transfer(&self, session: &UploadSession, chunk: &Chunk<'_>) -> Result<(), PlatformError> {
        let upload_url = session
            .upload_url
            .as_deref()
            .ok_or_else(|| PlatformError::Permanent("TikTok did not return an upload URL".to_string()))?;

        let resp = self
            .adapter
            .http
            .put(upload_url)
            .header("Content-Type", self.request.content_type.as_str())
            .header(
                "Content-Range",
                format!("bytes {}-{}/{}", chunk.offset, chunk.last_byte(), chunk.total_bytes),
            )
            .body(chunk.data.to_vec())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await?;
            return Err(PlatformError::classify(status, text, false));
        }
        Ok(())
    }

    /// TikTok publishes on its own once the bytes land; confirm it has not
    /// already rejected the file.
    async fn finish(&self, session: &UploadSession) -> Result<UploadedVideo, PlatformError> {
        let resp = self
            .adapter
            .http
            .post(self.adapter.url("v2/post/publish/status/fetch/"))
            .timeout(API_TIMEOUT)
            .bearer_auth(&self.token)
            .json(&json!({ "publish_id": session.session_id }))
            .send()
            .await?;
        let status: StatusData = read_envelope(resp, "status").await?;

        if status.status == "FAILED" {
            return Err(PlatformError::Permanent(format!(
                "TikTok rejected the video: {}",
                status.fail_reason.unwrap_or_else(|| "unknown reason".to_string())
            )));
        }

        Ok(UploadedVideo {
            video_id: session.session_id.clone(),
            thumbnail_url: None,
        })
    }
}

#[async_trait]
impl PlatformAdapter for TikTokAdapter {
    fn platform(&self) -> Platform {
        Platform::Tiktok
    }

    async fn upload_video(&self, user_id: i64, request: &UploadRequest) -> Result<UploadedVideo, PlatformError> {
        let token = self.tokens.get_valid_access_token(user_id, Platform::Tiktok).await?;

        if request.scheduled_at > chrono::Utc::now() {
            warn!(user_id, scheduled_at = %request.scheduled_at, "TikTok cannot schedule; posting on upload");
        }

        let protocol = FileUpload {
            adapter: self,
            token,
            request,
        };
        let video = self.uploader.upload(&protocol, &request.video).await?;

        info!(user_id, publish_id = %video.video_id, "Uploaded video to TikTok");
        Ok(video)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::retry::RetryPolicy;
    use crate::platforms::{MetadataChanges, PlatformOptions};
    use crate::test_support::{TEST_USER, tiktok_config, token_manager};
    use bytes::Bytes;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MB: usize = 1024 * 1024;

    fn request(video: Vec<u8>) -> UploadRequest {
        UploadRequest {
            video: Bytes::from(video),
            content_type: "video/mp4".into(),
            title: "Launch".into(),
            description: String::new(),
            tags: vec![],
            scheduled_at: Utc::now(),
            category_id: None,
            options: PlatformOptions::default(),
        }
    }

    async fn adapter(server: &MockServer) -> TikTokAdapter {
        let tokens = token_manager(&[(Platform::Tiktok, "tt-token")]).await;
        TikTokAdapter::new(tiktok_config(&server.uri()), tokens).with_uploader(
            ChunkedUploader::default()
                .with_phase_policy(RetryPolicy::none())
                .with_chunk_policy(RetryPolicy::none()),
        )
    }

    #[test]
    fn test_small_files_upload_whole() {
        let plan = upload_plan(3 * MB);
        assert_eq!(plan.chunk_count(), 1);
        assert_eq!(plan.ranges(), vec![0..3 * MB]);
    }

    #[test]
    fn test_chunks_respect_minimum_and_merge_remainder() {
        // 12 MB: tier says 2 MB, TikTok needs 5 MB; 2 MB tail folds into chunk 2
        let plan = upload_plan(12 * MB);
        assert_eq!(plan.chunk_size, 5 * MB);
        assert_eq!(plan.ranges(), vec![0..5 * MB, 5 * MB..12 * MB]);
    }

    #[tokio::test]
    async fn test_upload_inits_and_puts_chunk() {
        let server = MockServer::start().await;
        let upload_url = format!("{}/upload/abc", server.uri());

        Mock::given(method("POST"))
            .and(path("/v2/post/publish/video/init/"))
            .and(header("authorization", "Bearer tt-token"))
            .and(body_partial_json(serde_json::json!({
                "post_info": {"title": "Launch", "privacy_level": "SELF_ONLY"},
                "source_info": {"source": "FILE_UPLOAD", "video_size": 8, "total_chunk_count": 1}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"publish_id": "v_pub_1", "upload_url": upload_url},
                "error": {"code": "ok", "message": ""}
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/upload/abc"))
            .and(header("content-range", "bytes 0-7/8"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v2/post/publish/status/fetch/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"status": "PROCESSING_UPLOAD"},
                "error": {"code": "ok", "message": ""}
            })))
            .mount(&server)
            .await;

        let video = adapter(&server).await.upload_video(TEST_USER, &request(vec![1; 8])).await.unwrap();
        assert_eq!(video.video_id, "v_pub_1");
        assert!(video.thumbnail_url.is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/post/publish/video/init/"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"code": "rate_limit_exceeded", "message": "Too many requests"}
            })))
            .mount(&server)
            .await;

        let err = adapter(&server).await.upload_video(TEST_USER, &request(vec![1; 8])).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_scope_error_asks_for_reconnect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/post/publish/video/init/"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"code": "scope_not_authorized", "message": "The user did not authorize the scope video.publish"}
            })))
            .mount(&server)
            .await;

        let err = adapter(&server).await.upload_video(TEST_USER, &request(vec![1; 8])).await.unwrap_err();
        assert!(matches!(err, PlatformError::ScopeInsufficient(_)));
        assert!(err.user_message().contains("reconnect"));
    }

    #[test]
    fn test_post_title_caps_length_and_is_idempotent() {
        assert_eq!(post_title("Launch"), "Launch");

        let long = "é".repeat(CAPTION_MAX_CHARS + 10);
        let title = post_title(&long);
        assert_eq!(title.chars().count(), CAPTION_MAX_CHARS);
        assert_eq!(post_title(&title), title);
    }

    #[tokio::test]
    async fn test_metadata_update_is_unsupported() {
        let server = MockServer::start().await;
        let err = adapter(&server)
            .await
            .update_metadata(TEST_USER, "v_pub_1", &MetadataChanges::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Unsupported { platform: Platform::Tiktok, .. }));
        assert_eq!(err.to_string(), "TikTok does not support metadata updates");
    }
}
