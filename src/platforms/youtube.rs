//! YouTube Data API v3: resumable upload, metadata and schedule edits

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::chunked::{Chunk, ChunkPlan, ChunkedProtocol, ChunkedUploader, UploadSession, UploadedVideo};
use super::error::PlatformError;
use super::{MetadataChanges, PlatformAdapter, UploadRequest};
use crate::config::YouTubeConfig;
use crate::constants::{
    API_TIMEOUT, YOUTUBE_DEFAULT_CATEGORY_ID, YOUTUBE_TAG_MAX_CHARS, YOUTUBE_TAGS_MAX_TOTAL_CHARS,
};
use crate::models::Platform;
use crate::services::tokens::TokenManager;

const TITLE_MAX_CHARS: usize = 100;
const DESCRIPTION_MAX_CHARS: usize = 5000;

/// Google error reasons worth retrying
const TRANSIENT_REASONS: &[&str] = &["backendError", "internalError", "rateLimitExceeded", "userRateLimitExceeded"];

/// Serialized size of one tag: multi-word tags are sent quoted
fn serialized_len(tag: &str) -> usize {
    let len = tag.chars().count();
    if tag.contains(' ') { len + 2 } else { len }
}

/// Normalize tags to what YouTube accepts.
///
/// Punctuation is stripped to alphanumerics, spaces, `-` and `_`; each tag is
/// capped at 30 characters; duplicates are dropped case-insensitively; tags
/// that would push the comma-joined, quoted total past 500 characters are
/// skipped. Already-valid input comes back unchanged.
pub fn sanitize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out: Vec<String> = Vec::new();
    let mut total = 0;

    for raw in tags {
        let stripped: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
            .collect();
        let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        let tag: String = collapsed.chars().take(YOUTUBE_TAG_MAX_CHARS).collect();
        let tag = tag.trim_end().to_string();

        if tag.is_empty() || !seen.insert(tag.to_lowercase()) {
            continue;
        }

        let separator = usize::from(!out.is_empty());
        let cost = serialized_len(&tag) + separator;
        if total + cost > YOUTUBE_TAGS_MAX_TOTAL_CHARS {
            continue;
        }

        total += cost;
        out.push(tag);
    }

    out
}

/// YouTube rejects angle brackets in titles and descriptions
fn clean_text(text: &str, max_chars: usize) -> String {
    text.chars()
        .filter(|c| *c != '<' && *c != '>')
        .take(max_chars)
        .collect()
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    message: String,
    #[serde(default)]
    errors: Vec<GoogleErrorItem>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorItem {
    #[serde(default)]
    reason: String,
}

fn youtube_error(status: StatusCode, body: &str) -> PlatformError {
    match serde_json::from_str::<GoogleErrorBody>(body) {
        Ok(parsed) => {
            let transient = parsed
                .error
                .errors
                .iter()
                .any(|e| TRANSIENT_REASONS.contains(&e.reason.as_str()));
            PlatformError::classify(status, parsed.error.message, transient)
        }
        Err(_) => PlatformError::classify(status, body.to_string(), false),
    }
}

#[derive(Debug, Deserialize)]
struct VideoResource {
    id: String,
    #[serde(default)]
    snippet: Option<Value>,
}

impl VideoResource {
    fn into_uploaded(self) -> UploadedVideo {
        let thumbnail_url = self.snippet.as_ref().and_then(|s| {
            let thumbs = s.get("thumbnails")?;
            ["high", "medium", "default"]
                .iter()
                .find_map(|size| thumbs.get(size)?.get("url")?.as_str())
                .map(str::to_string)
        });
        UploadedVideo {
            video_id: self.id,
            thumbnail_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VideoList {
    #[serde(default)]
    items: Vec<Value>,
}

pub struct YouTubeAdapter {
    http: Client,
    config: YouTubeConfig,
    tokens: Arc<TokenManager>,
    uploader: ChunkedUploader,
}

impl YouTubeAdapter {
    pub fn new(config: YouTubeConfig, tokens: Arc<TokenManager>) -> Self {
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

    fn api(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Snippet and status sections for a new upload
    fn video_metadata(request: &UploadRequest, now: DateTime<Utc>) -> Value {
        let category = request
            .category_id
            .clone()
            .unwrap_or_else(|| YOUTUBE_DEFAULT_CATEGORY_ID.to_string());

        // publishAt only works on private videos
        let status = if request.scheduled_at > now {
            json!({
                "privacyStatus": "private",
                "publishAt": request.scheduled_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                "selfDeclaredMadeForKids": false,
            })
        } else {
            json!({
                "privacyStatus": request.options.youtube_privacy_status.as_deref().unwrap_or("public"),
                "selfDeclaredMadeForKids": false,
            })
        };

        json!({
            "snippet": {
                "title": clean_text(&request.title, TITLE_MAX_CHARS),
                "description": clean_text(&request.description, DESCRIPTION_MAX_CHARS),
                "tags": sanitize_tags(&request.tags),
                "categoryId": category,
            },
            "status": status,
        })
    }

    async fn fetch_snippet(&self, token: &str, video_id: &str) -> Result<Value, PlatformError> {
        let resp = self
            .http
            .get(self.api("youtube/v3/videos"))
            .timeout(API_TIMEOUT)
            .bearer_auth(token)
            .query(&[("part", "snippet"), ("id", video_id)])
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(youtube_error(status, &text));
        }

        let list: VideoList = serde_json::from_str(&text).map_err(|e| super::decode_error("videos.list", e, &text))?;
        list.items
            .into_iter()
            .next()
            .and_then(|item| item.get("snippet").cloned())
            .ok_or_else(|| PlatformError::Permanent(format!("YouTube video {} not found", video_id)))
    }

    async fn put_video(&self, token: &str, part: &str, body: &Value) -> Result<(), PlatformError> {
        let resp = self
            .http
            .put(self.api("youtube/v3/videos"))
            .timeout(API_TIMEOUT)
            .bearer_auth(token)
            .query(&[("part", part)])
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await?;
            return Err(youtube_error(status, &text));
        }
        Ok(())
    }
}

/// One resumable upload session
struct ResumableUpload<'a> {
    adapter: &'a YouTubeAdapter,
    token: String,
    metadata: Value,
    content_type: &'a str,
    total_bytes: usize,
    result: Mutex<Option<UploadedVideo>>,
}

impl ResumableUpload<'_> {
    fn store(&self, video: UploadedVideo) {
        if let Ok(mut slot) = self.result.lock() {
            *slot = Some(video);
        }
    }

    fn take(&self) -> Option<UploadedVideo> {
        self.result.lock().ok().and_then(|mut slot| slot.take())
    }

    async fn read_video(resp: reqwest::Response) -> Result<UploadedVideo, PlatformError> {
        let text = resp.text().await?;
        let video: VideoResource =
            serde_json::from_str(&text).map_err(|e| super::decode_error("upload", e, &text))?;
        Ok(video.into_uploaded())
    }
}

#[async_trait]
impl<'a> ChunkedProtocol for ResumableUpload<'a> {
    fn name(&self) -> &'static str {
        "youtube"
    }

    /// The whole file goes up in one PUT
    fn plan(&self, total_bytes: usize) -> ChunkPlan {
        ChunkPlan::with_chunk_size(total_bytes, total_bytes)
    }

    async fn start(&self, plan: &ChunkPlan) -> Result<UploadSession, PlatformError> {
        let resp = self
            .adapter
            .http
            .post(self.adapter.api("upload/youtube/v3/videos"))
            .bearer_auth(&self.token)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .header("X-Upload-Content-Length", plan.total_bytes.to_string())
            .header("X-Upload-Content-Type", self.content_type)
            .json(&self.metadata)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await?;
            return Err(youtube_error(status, &text));
        }

        let location = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| PlatformError::Permanent("No upload URL in YouTube response".to_string()))?;

        Ok(UploadSession {
            session_id: location.clone(),
            upload_url: Some(location),
            video_id: None,
        })
    }

    async fn transfer(&self, session: &UploadSession, chunk: &Chunk<'_>) -> Result<(), PlatformError> {
        let url = session.upload_url.as_deref().unwrap_or(&session.session_id);
        let resp = self
            .adapter
            .http
            .put(url)
            .bearer_auth(&self.token)
            .header("Content-Type", self.content_type)
            .header(
                "Content-Range",
                format!("bytes {}-{}/{}", chunk.offset, chunk.last_byte(), chunk.total_bytes),
            )
            .body(chunk.data.to_vec())
            .send()
            .await?;

        let status = resp.status();
        match status.as_u16() {
            200 | 201 => {
                self.store(Self::read_video(resp).await?);
                Ok(())
            }
            // Resume Incomplete: more chunks expected
            308 => Ok(()),
            _ => {
                let text = resp.text().await?;
                Err(youtube_error(status, &text))
            }
        }
    }

    async fn finish(&self, session: &UploadSession) -> Result<UploadedVideo, PlatformError> {
        if let Some(video) = self.take() {
            return Ok(video);
        }

        // Ask the session for its final state
        let url = session.upload_url.as_deref().unwrap_or(&session.session_id);
        let resp = self
            .adapter
            .http
            .put(url)
            .bearer_auth(&self.token)
            .header("Content-Range", format!("bytes */{}", self.total_bytes))
            .send()
            .await?;

        let status = resp.status();
        match status.as_u16() {
            200 | 201 => Self::read_video(resp).await,
            308 => Err(PlatformError::Transient("YouTube upload is incomplete".to_string())),
            _ => {
                let text = resp.text().await?;
                Err(youtube_error(status, &text))
            }
        }
    }
}

#[async_trait]
impl PlatformAdapter for YouTubeAdapter {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    fn supports_tags(&self) -> bool {
        true
    }

    async fn upload_video(&self, user_id: i64, request: &UploadRequest) -> Result<UploadedVideo, PlatformError> {
        let token = self.tokens.get_valid_access_token(user_id, Platform::Youtube).await?;

        let upload = ResumableUpload {
            adapter: self,
            token,
            metadata: Self::video_metadata(request, Utc::now()),
            content_type: &request.content_type,
            total_bytes: request.video.len(),
            result: Mutex::new(None),
        };

        let video = self.uploader.upload(&upload, &request.video).await?;
        info!(user_id, video_id = %video.video_id, "Uploaded video to YouTube");
        Ok(video)
    }

    async fn update_metadata(
        &self,
        user_id: i64,
        video_id: &str,
        changes: &MetadataChanges,
    ) -> Result<(), PlatformError> {
        let token = self.tokens.get_valid_access_token(user_id, Platform::Youtube).await?;
        let mut snippet = match self.fetch_snippet(&token, video_id).await? {
            Value::Object(fields) => fields,
            other => {
                return Err(PlatformError::Permanent(format!(
                    "YouTube returned a malformed snippet for video {}: {}",
                    video_id, other
                )));
            }
        };

        if let Some(title) = &changes.title {
            snippet.insert("title".to_string(), json!(clean_text(title, TITLE_MAX_CHARS)));
        }
        if let Some(description) = &changes.description {
            snippet.insert(
                "description".to_string(),
                json!(clean_text(description, DESCRIPTION_MAX_CHARS)),
            );
        }
        if let Some(category) = &changes.category_id {
            snippet.insert("categoryId".to_string(), json!(category));
        }
        snippet
            .entry("categoryId")
            .or_insert_with(|| json!(YOUTUBE_DEFAULT_CATEGORY_ID));
        if !changes.skip_tags {
            if let Some(tags) = &changes.tags {
                snippet.insert("tags".to_string(), json!(sanitize_tags(tags)));
            }
        }

        // Read-only snippet fields are rejected on update
        for key in ["thumbnails", "channelId", "channelTitle", "publishedAt", "liveBroadcastContent", "localized"] {
            snippet.remove(key);
        }

        self.put_video(&token, "snippet", &json!({ "id": video_id, "snippet": snippet }))
            .await?;
        debug!(user_id, video_id, skip_tags = changes.skip_tags, "Updated YouTube metadata");
        Ok(())
    }

    async fn update_schedule(
        &self,
        user_id: i64,
        video_id: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<(), PlatformError> {
        if scheduled_at <= Utc::now() {
            return Err(PlatformError::Validation(
                "Scheduled time must be in the future".to_string(),
            ));
        }

        let token = self.tokens.get_valid_access_token(user_id, Platform::Youtube).await?;
        let body = json!({
            "id": video_id,
            "status": {
                "privacyStatus": "private",
                "publishAt": scheduled_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            }
        });
        self.put_video(&token, "status", &body).await?;
        debug!(user_id, video_id, %scheduled_at, "Rescheduled YouTube video");
        Ok(())
    }
}
