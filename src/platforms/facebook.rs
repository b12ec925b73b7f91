//! Facebook Page videos and Reels

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::chunked::{Chunk, ChunkPlan, ChunkedProtocol, ChunkedUploader, UploadSession, UploadedVideo};
use super::error::PlatformError;
use super::graph::{GraphClient, GraphId, Page, read_json};
use super::{FacebookVideoType, MetadataChanges, PlatformAdapter, UploadRequest};
use crate::config::FacebookConfig;
use crate::constants::{FACEBOOK_MIN_SCHEDULE_LEAD_SECS, FACEBOOK_REELS_MAX_BYTES, FACEBOOK_VIDEO_MAX_BYTES};
use crate::models::Platform;
use crate::services::tokens::TokenManager;

/// How a finished upload goes live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Publication {
    Now,
    At(i64),
}

/// Facebook needs at least ten minutes of lead time to schedule; anything
/// sooner is published right away.
fn publication_for(scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> Publication {
    if scheduled_at - now >= Duration::seconds(FACEBOOK_MIN_SCHEDULE_LEAD_SECS) {
        Publication::At(scheduled_at.timestamp())
    } else {
        Publication::Now
    }
}

const TITLE_MAX_CHARS: usize = 255;

/// Video titles are a single line
fn video_title(title: &str) -> String {
    let line = title.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = line.chars().take(TITLE_MAX_CHARS).collect();
    capped.trim_end().to_string()
}

fn check_size(len: usize, video_type: FacebookVideoType) -> Result<(), PlatformError> {
    let cap = match video_type {
        FacebookVideoType::Video => FACEBOOK_VIDEO_MAX_BYTES,
        FacebookVideoType::Reels => FACEBOOK_REELS_MAX_BYTES,
    };
    if len > cap {
        return Err(PlatformError::Validation(format!(
            "Video is {} MB; Facebook {:?} uploads are limited to {} MB",
            len / (1024 * 1024),
            video_type,
            cap / (1024 * 1024)
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    video_id: String,
    #[serde(default)]
    upload_session_id: Option<String>,
    #[serde(default)]
    upload_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SuccessResponse {
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct PictureResponse {
    #[serde(default)]
    picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoOwner {
    from: Option<GraphId>,
}

pub struct FacebookAdapter {
    graph: GraphClient,
    tokens: Arc<TokenManager>,
    uploader: ChunkedUploader,
}

impl FacebookAdapter {
    pub fn new(config: FacebookConfig, tokens: Arc<TokenManager>) -> Self {
        Self {
            graph: GraphClient::new(config),
            tokens,
            uploader: ChunkedUploader::default(),
        }
    }

    pub fn with_uploader(mut self, uploader: ChunkedUploader) -> Self {
        self.uploader = uploader;
        self
    }

    /// Best-effort thumbnail lookup; processing may not have produced one yet
    async fn fetch_thumbnail(&self, page_token: &str, video_id: &str) -> Option<String> {
        match self
            .graph
            .get_json::<PictureResponse>(video_id, page_token, &[("fields", "picture")])
            .await
        {
            Ok(resp) => resp.picture,
            Err(e) => {
                debug!(video_id, error = %e, "Facebook thumbnail not available");
                None
            }
        }
    }

    fn reels_upload_url(&self, video_id: &str) -> String {
        let config = self.graph.config();
        format!(
            "{}/video-upload/{}/{}",
            config.rupload_url.trim_end_matches('/'),
            config.graph_version,
            video_id
        )
    }
}

/// Chunked page video upload (`upload_phase` start/transfer/finish)
struct PageVideoUpload<'a> {
    graph: &'a GraphClient,
    page: &'a Page,
    request: &'a UploadRequest,
    publication: Publication,
}

#[async_trait]
impl<'a> ChunkedProtocol for PageVideoUpload<'a> {
    fn name(&self) -> &'static str {
        "facebook"
    }

    async fn start(&self, plan: &ChunkPlan) -> Result<UploadSession, PlatformError> {
        let file_size = plan.total_bytes.to_string();
        let resp: StartResponse = self
            .graph
            .post_form(
                &format!("{}/videos", self.page.id),
                &self.page.access_token,
                &[("upload_phase", "start"), ("file_size", file_size.as_str())],
            )
            .await?;

        let session_id = resp
            .upload_session_id
            .ok_or_else(|| PlatformError::Permanent("No upload session in Facebook response".to_string()))?;

        Ok(UploadSession {
            session_id,
            upload_url: None,
            video_id: Some(resp.video_id),
        })
    }

    async fn transfer(&self, session: &UploadSession, chunk: &Chunk<'_>) -> Result<(), PlatformError> {
        let part = Part::bytes(chunk.data.to_vec()).file_name(format!("chunk-{}", chunk.index));
        let form = Form::new()
            .text("upload_phase", "transfer")
            .text("upload_session_id", session.session_id.clone())
            .text("start_offset", chunk.offset.to_string())
            .part("video_file_chunk", part);

        let resp = self
            .graph
            .http()
            .post(self.graph.url(&format!("{}/videos", self.page.id)))
            .query(&self.graph.auth_params(&self.page.access_token))
            .multipart(form)
            .send()
            .await?;

        read_json::<serde_json::Value>(resp, "transfer").await?;
        Ok(())
    }

    async fn finish(&self, session: &UploadSession) -> Result<UploadedVideo, PlatformError> {
        let title = video_title(&self.request.title);
        let scheduled_time;
        let mut params = vec![
            ("upload_phase", "finish"),
            ("upload_session_id", session.session_id.as_str()),
            ("title", title.as_str()),
            ("description", self.request.description.as_str()),
        ];
        match self.publication {
            Publication::Now => params.push(("published", "true")),
            Publication::At(ts) => {
                scheduled_time = ts.to_string();
                params.push(("published", "false"));
                params.push(("scheduled_publish_time", scheduled_time.as_str()));
            }
        }

        let resp: SuccessResponse = self
            .graph
            .post_form(&format!("{}/videos", self.page.id), &self.page.access_token, &params)
            .await?;
        if !resp.success {
            return Err(PlatformError::Transient("Facebook did not confirm the upload".to_string()));
        }

        let video_id = session
            .video_id
            .clone()
            .ok_or_else(|| PlatformError::Permanent("Facebook upload has no video id".to_string()))?;
        Ok(UploadedVideo {
            video_id,
            thumbnail_url: None,
        })
    }
}

/// Reels: register, byte upload to rupload with offsets, then publish
struct ReelsUpload<'a> {
    adapter: &'a FacebookAdapter,
    page: &'a Page,
    request: &'a UploadRequest,
    publication: Publication,
}

#[async_trait]
impl<'a> ChunkedProtocol for ReelsUpload<'a> {
    fn name(&self) -> &'static str {
        "facebook_reels"
    }

    async fn start(&self, _plan: &ChunkPlan) -> Result<UploadSession, PlatformError> {
        let resp: StartResponse = self
            .adapter
            .graph
            .post_form(
                &format!("{}/video_reels", self.page.id),
                &self.page.access_token,
                &[("upload_phase", "start")],
            )
            .await?;

        Ok(UploadSession {
            session_id: resp.video_id.clone(),
            upload_url: Some(
                resp.upload_url
                    .unwrap_or_else(|| self.adapter.reels_upload_url(&resp.video_id)),
            ),
            video_id: Some(resp.video_id),
        })
    }

    async fn transfer(&self, session: &UploadSession, chunk: &Chunk<'_>) -> Result<(), PlatformError> {
        let url = session
            .upload_url
            .clone()
            .unwrap_or_else(|| self.adapter.reels_upload_url(&session.session_id));

        let resp = self
            .adapter
            .graph
            .http()
            .post(url)
            .header("Authorization", format!("OAuth {}", self.page.access_token))
            .header("offset", chunk.offset.to_string())
            .header("file_size", chunk.total_bytes.to_string())
            .header("Content-Type", "application/octet-stream")
            .body(chunk.data.to_vec())
            .send()
            .await?;

        read_json::<serde_json::Value>(resp, "reels transfer").await?;
        Ok(())
    }

    async fn finish(&self, session: &UploadSession) -> Result<UploadedVideo, PlatformError> {
        let video_id = session.video_id.clone().unwrap_or_else(|| session.session_id.clone());

        let title = video_title(&self.request.title);
        let scheduled_time;
        let mut params = vec![
            ("upload_phase", "finish"),
            ("video_id", video_id.as_str()),
            ("title", title.as_str()),
            ("description", self.request.description.as_str()),
        ];
        match self.publication {
            Publication::Now => params.push(("video_state", "PUBLISHED")),
            Publication::At(ts) => {
                scheduled_time = ts.to_string();
                params.push(("video_state", "SCHEDULED"));
                params.push(("scheduled_publish_time", scheduled_time.as_str()));
            }
        }

        let resp: SuccessResponse = self
            .adapter
            .graph
            .post_form(&format!("{}/video_reels", self.page.id), &self.page.access_token, &params)
            .await?;
        if !resp.success {
            return Err(PlatformError::Transient("Facebook did not confirm the reel".to_string()));
        }

        Ok(UploadedVideo {
            video_id,
            thumbnail_url: None,
        })
    }
}

#[async_trait]
impl PlatformAdapter for FacebookAdapter {
    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    async fn upload_video(&self, user_id: i64, request: &UploadRequest) -> Result<UploadedVideo, PlatformError> {
        let video_type = request.options.facebook_video_type;
        check_size(request.video.len(), video_type)?;

        let user_token = self.tokens.get_valid_access_token(user_id, Platform::Facebook).await?;
        let page = self
            .graph
            .resolve_page(&user_token, request.options.facebook_page_id.as_deref())
            .await?;
        let publication = publication_for(request.scheduled_at, Utc::now());

        let mut video = match video_type {
            FacebookVideoType::Video => {
                let protocol = PageVideoUpload {
                    graph: &self.graph,
                    page: &page,
                    request,
                    publication,
                };
                self.uploader.upload(&protocol, &request.video).await?
            }
            FacebookVideoType::Reels => {
                let protocol = ReelsUpload {
                    adapter: self,
                    page: &page,
                    request,
                    publication,
                };
                self.uploader.upload(&protocol, &request.video).await?
            }
        };

        video.thumbnail_url = self.fetch_thumbnail(&page.access_token, &video.video_id).await;
        info!(user_id, page_id = %page.id, video_id = %video.video_id, ?publication, "Uploaded video to Facebook");
        Ok(video)
    }

    /// Only title and description can change after upload
    async fn update_metadata(
        &self,
        user_id: i64,
        video_id: &str,
        changes: &MetadataChanges,
    ) -> Result<(), PlatformError> {
        if changes.title.is_none() && changes.description.is_none() {
            return Err(PlatformError::Unsupported {
                platform: Platform::Facebook,
                operation: "tag updates",
            });
        }

        let user_token = self.tokens.get_valid_access_token(user_id, Platform::Facebook).await?;

        let page_id = match &changes.options.facebook_page_id {
            Some(id) => Some(id.clone()),
            None => {
                let owner: VideoOwner = self
                    .graph
                    .get_json(video_id, &user_token, &[("fields", "from")])
                    .await?;
                owner.from.map(|f| f.id)
            }
        };
        let page = self.graph.resolve_page(&user_token, page_id.as_deref()).await?;

        let title = changes.title.as_deref().map(video_title);
        let mut params = Vec::new();
        if let Some(title) = &title {
            params.push(("name", title.as_str()));
        }
        if let Some(description) = &changes.description {
            params.push(("description", description.as_str()));
        }

        let resp: SuccessResponse = self
            .graph
            .post_form(video_id, &page.access_token, &params)
            .await?;
        if !resp.success {
            return Err(PlatformError::Permanent("Facebook rejected the metadata update".to_string()));
        }

        debug!(user_id, video_id, "Updated Facebook metadata");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::PlatformOptions;
    use crate::platforms::retry::RetryPolicy;
    use crate::test_support::{TEST_USER, facebook_config, token_manager};
    use bytes::Bytes;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(video_type: FacebookVideoType, scheduled_at: DateTime<Utc>) -> UploadRequest {
        UploadRequest {
            video: Bytes::from(vec![7u8; 4096]),
            content_type: "video/mp4".into(),
            title: "Launch".into(),
            description: "Launch day".into(),
            tags: vec![],
            scheduled_at,
            category_id: None,
            options: PlatformOptions {
                facebook_video_type: video_type,
                ..Default::default()
            },
        }
    }

    async fn adapter(server: &MockServer) -> FacebookAdapter {
        let tokens = token_manager(&[(Platform::Facebook, "user-token")]).await;
        FacebookAdapter::new(facebook_config(&server.uri()), tokens).with_uploader(
            ChunkedUploader::default()
                .with_phase_policy(RetryPolicy::none())
                .with_chunk_policy(RetryPolicy::none()),
        )
    }

    async fn mount_pages(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v19.0/me/accounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "page1", "name": "Page", "access_token": "page-token"}]
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_schedule_needs_ten_minutes_of_lead() {
        let now = Utc::now();
        assert_eq!(publication_for(now + Duration::minutes(5), now), Publication::Now);
        let later = now + Duration::hours(2);
        assert_eq!(publication_for(later, now), Publication::At(later.timestamp()));
    }

    #[test]
    fn test_size_caps_depend_on_video_type() {
        let mb = 1024 * 1024;
        assert!(check_size(2000 * mb, FacebookVideoType::Video).is_ok());
        assert!(matches!(
            check_size(1001 * mb, FacebookVideoType::Reels),
            Err(PlatformError::Validation(_))
        ));
        assert!(check_size(1000 * mb, FacebookVideoType::Reels).is_ok());
    }

    #[tokio::test]
    async fn test_page_video_upload_schedules_in_finish_phase() {
        let server = MockServer::start().await;
        mount_pages(&server).await;

        Mock::given(method("POST"))
            .and(path("/v19.0/page1/videos"))
            .and(body_string_contains("upload_phase=start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "video_id": "fbv1", "upload_session_id": "sess1", "start_offset": "0", "end_offset": "4096"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v19.0/page1/videos"))
            .and(body_string_contains("transfer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "start_offset": "4096", "end_offset": "4096"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v19.0/page1/videos"))
            .and(body_string_contains("upload_phase=finish"))
            .and(body_string_contains("published=false"))
            .and(body_string_contains("scheduled_publish_time="))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v19.0/fbv1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "picture": "https://fb.example/thumb.jpg", "id": "fbv1"
            })))
            .mount(&server)
            .await;

        let video = adapter(&server)
            .await
            .upload_video(TEST_USER, &request(FacebookVideoType::Video, Utc::now() + Duration::hours(3)))
            .await
            .unwrap();

        assert_eq!(video.video_id, "fbv1");
        assert_eq!(video.thumbnail_url.as_deref(), Some("https://fb.example/thumb.jpg"));
    }

    #[tokio::test]
    async fn test_reels_upload_sends_offset_headers() {
        let server = MockServer::start().await;
        mount_pages(&server).await;
        let upload_url = format!("{}/video-upload/v19.0/reel1", server.uri());

        Mock::given(method("POST"))
            .and(path("/v19.0/page1/video_reels"))
            .and(body_string_contains("upload_phase=start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "video_id": "reel1", "upload_url": upload_url
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/video-upload/v19.0/reel1"))
            .and(header("offset", "0"))
            .and(header("file_size", "4096"))
            .and(header("authorization", "OAuth page-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v19.0/page1/video_reels"))
            .and(body_string_contains("video_state=PUBLISHED"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let video = adapter(&server)
            .await
            .upload_video(TEST_USER, &request(FacebookVideoType::Reels, Utc::now()))
            .await
            .unwrap();

        assert_eq!(video.video_id, "reel1");
        assert!(video.thumbnail_url.is_none());
    }

    #[test]
    fn test_video_title_is_one_capped_line_and_idempotent() {
        assert_eq!(video_title("  Launch\n day  "), "Launch day");
        assert_eq!(video_title("Launch day"), "Launch day");

        let long = format!("{} tail", "word ".repeat(60));
        let title = video_title(&long);
        assert!(title.chars().count() <= TITLE_MAX_CHARS);
        assert!(!title.ends_with(' '));
        assert_eq!(video_title(&title), title);
    }

    #[tokio::test]
    async fn test_tags_only_edit_is_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v19.0/fbv1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(0)
            .mount(&server)
            .await;

        let changes = MetadataChanges {
            tags: Some(vec!["launch".into()]),
            ..Default::default()
        };
        let err = adapter(&server)
            .await
            .update_metadata(TEST_USER, "fbv1", &changes)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Facebook does not support tag updates");
    }

    #[tokio::test]
    async fn test_reschedule_is_unsupported() {
        let server = MockServer::start().await;
        let err = adapter(&server)
            .await
            .update_schedule(TEST_USER, "fbv1", Utc::now() + Duration::hours(1))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Facebook does not support rescheduling");
    }
}
