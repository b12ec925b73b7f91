//! Instagram Reels through the Instagram Graph API.
//!
//! Page -> linked Business account -> media container -> single byte upload
//! -> wait for processing -> publish. The API cannot schedule, so posts go
//! live on upload.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::chunked::UploadedVideo;
use super::error::PlatformError;
use super::graph::{GraphClient, GraphId, read_json};
use super::retry::{RetryPolicy, with_timeout};
use super::{MetadataChanges, PlatformAdapter, UploadRequest};
use crate::config::FacebookConfig;
use crate::constants::{
    CHUNK_TIMEOUT, FINISH_TIMEOUT, INSTAGRAM_STATUS_MAX_POLLS, INSTAGRAM_STATUS_POLL_INTERVAL, START_TIMEOUT,
};
use crate::models::Platform;
use crate::services::tokens::TokenManager;

const CAPTION_MAX_CHARS: usize = 2200;
const MAX_HASHTAGS: usize = 30;

/// Description followed by tags rendered as hashtags
pub fn build_caption(description: &str, tags: &[String]) -> String {
    let hashtags: Vec<String> = tags
        .iter()
        .map(|t| t.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect::<String>())
        .filter(|t| !t.is_empty())
        .take(MAX_HASHTAGS)
        .map(|t| format!("#{}", t))
        .collect();

    let caption = if hashtags.is_empty() {
        description.to_string()
    } else if description.is_empty() {
        hashtags.join(" ")
    } else {
        format!("{}\n\n{}", description, hashtags.join(" "))
    };
    caption.chars().take(CAPTION_MAX_CHARS).collect()
}

#[derive(Debug, serde::Deserialize)]
struct ContainerStatus {
    #[serde(default)]
    status_code: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ThumbnailResponse {
    #[serde(default)]
    thumbnail_url: Option<String>,
}

pub struct InstagramAdapter {
    graph: GraphClient,
    tokens: Arc<TokenManager>,
    policy: Option<RetryPolicy>,
    poll_interval: Duration,
    max_polls: u32,
}

impl InstagramAdapter {
    pub fn new(config: FacebookConfig, tokens: Arc<TokenManager>) -> Self {
        Self {
            graph: GraphClient::new(config),
            tokens,
            policy: None,
            poll_interval: INSTAGRAM_STATUS_POLL_INTERVAL,
            max_polls: INSTAGRAM_STATUS_MAX_POLLS,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    fn rupload_url(&self, container_id: &str) -> String {
        let config = self.graph.config();
        format!(
            "{}/ig-api-upload/{}/{}",
            config.rupload_url.trim_end_matches('/'),
            config.graph_version,
            container_id
        )
    }

    /// Business account id and the page token used to act on it
    async fn resolve_account(&self, user_id: i64, page_id: Option<&str>) -> Result<(String, String), PlatformError> {
        let user_token = self.tokens.get_valid_access_token(user_id, Platform::Instagram).await?;
        let page = self.graph.resolve_page(&user_token, page_id).await?;
        let account = page.instagram_business_account.ok_or_else(|| {
            PlatformError::Permanent(format!(
                "No Instagram Business account is linked to Facebook page {}",
                page.id
            ))
        })?;
        Ok((account.id, page.access_token))
    }

    async fn create_container(&self, account_id: &str, token: &str, caption: &str) -> Result<String, PlatformError> {
        let container: GraphId = self
            .graph
            .post_form(
                &format!("{}/media", account_id),
                token,
                &[
                    ("media_type", "REELS"),
                    ("upload_type", "resumable"),
                    ("caption", caption),
                ],
            )
            .await?;
        Ok(container.id)
    }

    async fn upload_bytes(&self, container_id: &str, token: &str, request: &UploadRequest) -> Result<(), PlatformError> {
        let resp = self
            .graph
            .http()
            .post(self.rupload_url(container_id))
            .header("Authorization", format!("OAuth {}", token))
            .header("offset", "0")
            .header("file_size", request.video.len().to_string())
            .body(request.video.clone())
            .send()
            .await?;
        read_json::<serde_json::Value>(resp, "instagram upload").await?;
        Ok(())
    }

    /// Poll until the container finishes processing
    async fn wait_for_container(&self, container_id: &str, token: &str) -> Result<(), PlatformError> {
        for attempt in 0..self.max_polls {
            let status: ContainerStatus = self
                .graph
                .get_json(container_id, token, &[("fields", "status_code,status")])
                .await?;

            match status.status_code.as_deref() {
                Some("FINISHED") | Some("PUBLISHED") => return Ok(()),
                Some("ERROR") | Some("EXPIRED") => {
                    return Err(PlatformError::Permanent(format!(
                        "Instagram could not process the video: {}",
                        status.status.unwrap_or_else(|| "unknown error".to_string())
                    )));
                }
                other => {
                    debug!(container_id, attempt, status = ?other, "Instagram container still processing");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        Err(PlatformError::Transient(
            "Instagram is still processing the video".to_string(),
        ))
    }

    async fn publish(&self, account_id: &str, container_id: &str, token: &str) -> Result<String, PlatformError> {
        let media: GraphId = self
            .graph
            .post_form(
                &format!("{}/media_publish", account_id),
                token,
                &[("creation_id", container_id)],
            )
            .await?;
        Ok(media.id)
    }

    async fn fetch_thumbnail(&self, media_id: &str, token: &str) -> Option<String> {
        match self
            .graph
            .get_json::<ThumbnailResponse>(media_id, token, &[("fields", "thumbnail_url")])
            .await
        {
            Ok(resp) => resp.thumbnail_url,
            Err(e) => {
                debug!(media_id, error = %e, "Instagram thumbnail not available");
                None
            }
        }
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn upload_video(&self, user_id: i64, request: &UploadRequest) -> Result<UploadedVideo, PlatformError> {
        if request.video.is_empty() {
            return Err(PlatformError::Validation("Video file is empty".to_string()));
        }

        let policy = self
            .policy
            .unwrap_or_else(|| RetryPolicy::for_phase(request.video.len()));
        let (account_id, token) = self
            .resolve_account(user_id, request.options.facebook_page_id.as_deref())
            .await?;
        let caption = build_caption(&request.description, &request.tags);

        let container_id = policy
            .run("instagram container", || {
                with_timeout(
                    START_TIMEOUT,
                    "Instagram container",
                    self.create_container(&account_id, &token, &caption),
                )
            })
            .await?;

        policy
            .run("instagram upload", || {
                with_timeout(
                    CHUNK_TIMEOUT,
                    "Instagram upload",
                    self.upload_bytes(&container_id, &token, request),
                )
            })
            .await?;

        self.wait_for_container(&container_id, &token).await?;

        let media_id = policy
            .run("instagram publish", || {
                with_timeout(
                    FINISH_TIMEOUT,
                    "Instagram publish",
                    self.publish(&account_id, &container_id, &token),
                )
            })
            .await?;

        if request.scheduled_at > chrono::Utc::now() {
            warn!(user_id, media_id = %media_id, "Instagram cannot schedule; published immediately");
        }

        let thumbnail_url = self.fetch_thumbnail(&media_id, &token).await;
        info!(user_id, media_id = %media_id, "Published reel to Instagram");
        Ok(UploadedVideo {
            video_id: media_id,
            thumbnail_url,
        })
    }

    fn tags_in_caption(&self) -> bool {
        true
    }

    fn supports_title_updates(&self) -> bool {
        false
    }

    /// Only the caption can change after publishing. The caption is rebuilt
    /// whole, so `changes.tags` must hold every hashtag it should keep.
    async fn update_metadata(
        &self,
        user_id: i64,
        video_id: &str,
        changes: &MetadataChanges,
    ) -> Result<(), PlatformError> {
        let Some(description) = &changes.description else {
            return Err(PlatformError::Unsupported {
                platform: Platform::Instagram,
                operation: "title updates",
            });
        };

        let (_, token) = self
            .resolve_account(user_id, changes.options.facebook_page_id.as_deref())
            .await?;
        let caption = build_caption(description, changes.tags.as_deref().unwrap_or(&[]));

        let _: serde_json::Value = self
            .graph
            .post_form(video_id, &token, &[("caption", caption.as_str())])
            .await?;
        debug!(user_id, video_id, "Updated Instagram caption");
        Ok(())
    }
}
