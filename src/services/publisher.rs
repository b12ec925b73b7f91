//! Publish orchestration.
//!
//! A post targets several platforms; each platform is uploaded to
//! independently and its outcome recorded on its own row. The post status is
//! always re-derived from the rows, and the transient video blob is deleted
//! only once every platform holds the video.

use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::constants::MAX_VIDEO_UPLOAD_SIZE;
use crate::domain::PostRepository;
use crate::models::{
    NewScheduledPost, Platform, PlatformStatus, PostMetadataUpdate, PostPlatform, PostStatus, ScheduledPost,
};
use crate::platforms::{
    AdapterRegistry, MetadataChanges, PlatformAdapter, PlatformError, PlatformOptions, UploadRequest, UploadedVideo,
};
use crate::services::error::PublishError;
use crate::services::schedule::local_to_utc;
use crate::storage::{BlobError, BlobStore, content_type_for, is_owned_by, video_blob_path};

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePost {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Wall-clock time in `timezone`, or RFC 3339
    pub scheduled_at: String,
    pub timezone: String,
    pub platforms: Vec<Platform>,
    #[serde(default)]
    pub youtube_category_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataEdit {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub skip_tags: bool,
    /// Platforms to push the edit to; empty means all of them
    #[serde(default)]
    pub platforms: Vec<Platform>,
    #[serde(default)]
    pub options: PlatformOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostDetails {
    #[serde(flatten)]
    pub post: ScheduledPost,
    pub platforms: Vec<PostPlatform>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformOutcome {
    pub platform: Platform,
    pub status: PlatformStatus,
    pub video_id: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub post_id: i64,
    pub status: PostStatus,
    pub results: Vec<PlatformOutcome>,
    pub warnings: Vec<String>,
    pub blob_deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditReport {
    pub updated: Vec<Platform>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleReport {
    pub scheduled_at: chrono::DateTime<Utc>,
    pub timezone: String,
    pub updated: Vec<Platform>,
    pub warnings: Vec<String>,
}

fn check_owned(path: &str, user_id: i64) -> Result<(), PublishError> {
    if is_owned_by(path, user_id) {
        Ok(())
    } else {
        Err(PublishError::Forbidden("Video path does not belong to this account".to_string()))
    }
}

fn upload_request(post: &ScheduledPost, video: Bytes, path: &str, options: &PlatformOptions) -> UploadRequest {
    UploadRequest {
        video,
        content_type: content_type_for(path).to_string(),
        title: post.title.clone(),
        description: post.description.clone(),
        tags: post.tags.clone(),
        scheduled_at: post.scheduled_at,
        category_id: post.youtube_category_id.clone(),
        options: options.clone(),
    }
}

/// The edit as one adapter should see it. Caption platforms get the full
/// description and the tags to render, falling back to what the post stores.
fn metadata_changes(adapter: &dyn PlatformAdapter, post: &ScheduledPost, edit: &MetadataEdit) -> MetadataChanges {
    let mut changes = MetadataChanges {
        title: edit.title.clone(),
        description: edit.description.clone(),
        tags: None,
        skip_tags: edit.skip_tags,
        category_id: post.youtube_category_id.clone(),
        options: edit.options.clone(),
    };

    if adapter.supports_tags() {
        changes.tags = edit.tags.clone();
    } else if adapter.tags_in_caption() && (edit.description.is_some() || edit.tags.is_some()) {
        let tags = match &edit.tags {
            Some(tags) if !edit.skip_tags => tags.clone(),
            _ => post.tags.clone(),
        };
        changes.tags = Some(tags);
        changes.description = Some(edit.description.clone().unwrap_or_else(|| post.description.clone()));
    }
    changes
}

/// Requested fields the adapter applies nowhere
fn ignored_fields(adapter: &dyn PlatformAdapter, edit: &MetadataEdit) -> Vec<&'static str> {
    let mut ignored = Vec::new();
    if edit.title.is_some() && !adapter.supports_title_updates() {
        ignored.push("titles");
    }
    if edit.tags.is_some() && !edit.skip_tags && !adapter.supports_tags() && !adapter.tags_in_caption() {
        ignored.push("tags");
    }
    ignored
}

pub struct Publisher {
    posts: Arc<dyn PostRepository>,
    blobs: Arc<dyn BlobStore>,
    adapters: AdapterRegistry,
}

impl Publisher {
    pub fn new(posts: Arc<dyn PostRepository>, blobs: Arc<dyn BlobStore>, adapters: AdapterRegistry) -> Self {
        Self { posts, blobs, adapters }
    }

    // ------------------------------------------------------------------
    // Posts
    // ------------------------------------------------------------------

    pub async fn create_post(&self, user_id: i64, req: CreatePost) -> Result<PostDetails, PublishError> {
        let title = req.title.trim();
        if title.is_empty() {
            return Err(PublishError::Validation("Title is required".to_string()));
        }
        if req.platforms.is_empty() {
            return Err(PublishError::Validation("Select at least one platform".to_string()));
        }

        let mut seen = HashSet::new();
        let platforms: Vec<Platform> = req.platforms.into_iter().filter(|p| seen.insert(*p)).collect();
        let scheduled_at = local_to_utc(&req.scheduled_at, &req.timezone)?;

        let new_post = NewScheduledPost {
            user_id,
            title: title.to_string(),
            description: req.description,
            tags: req.tags,
            scheduled_at,
            timezone: req.timezone,
            youtube_category_id: req.youtube_category_id,
            platforms,
        };
        let (post, platforms) = self.posts.create_post(&new_post).await?;

        info!(
            user_id,
            post_id = post.id,
            scheduled_at = %post.scheduled_at,
            platforms = platforms.len(),
            "Created scheduled post"
        );
        Ok(PostDetails { post, platforms })
    }

    async fn load_post(&self, user_id: i64, post_id: i64) -> Result<ScheduledPost, PublishError> {
        self.posts
            .get_post(post_id, user_id)
            .await?
            .ok_or_else(|| PublishError::NotFound("Post not found".to_string()))
    }

    pub async fn get_post(&self, user_id: i64, post_id: i64) -> Result<PostDetails, PublishError> {
        let post = self.load_post(user_id, post_id).await?;
        let platforms = self.posts.list_post_platforms(post_id).await?;
        Ok(PostDetails { post, platforms })
    }

    /// Page of posts with their platform rows, plus the total count
    pub async fn list_posts(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<PostDetails>, i64), PublishError> {
        let total = self.posts.count_posts(user_id).await?;
        let posts = self.posts.list_posts(user_id, limit, offset).await?;

        let mut details = Vec::with_capacity(posts.len());
        for post in posts {
            let platforms = self.posts.list_post_platforms(post.id).await?;
            details.push(PostDetails { post, platforms });
        }
        Ok((details, total))
    }

    // ------------------------------------------------------------------
    // Blob storage
    // ------------------------------------------------------------------

    pub async fn upload_to_storage(&self, user_id: i64, content_type: &str, data: Bytes) -> Result<String, PublishError> {
        if !content_type.starts_with("video/") {
            return Err(PublishError::Validation("Only video files can be uploaded".to_string()));
        }
        if data.is_empty() {
            return Err(PublishError::Validation("Video file is empty".to_string()));
        }
        if data.len() > MAX_VIDEO_UPLOAD_SIZE {
            return Err(PublishError::Validation(format!(
                "Video exceeds the {} MB upload limit",
                MAX_VIDEO_UPLOAD_SIZE / (1024 * 1024)
            )));
        }

        let path = video_blob_path(user_id, content_type);
        let bytes = data.len();
        self.blobs.put(&path, data).await?;

        info!(user_id, path = %path, bytes, "Stored video blob");
        Ok(path)
    }

    /// Returns false when there was nothing to delete
    pub async fn delete_blob(&self, user_id: i64, path: &str) -> Result<bool, PublishError> {
        check_owned(path, user_id)?;
        match self.blobs.delete(path).await {
            Ok(()) => {
                info!(user_id, path, "Deleted video blob");
                Ok(true)
            }
            Err(BlobError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Uploads
    // ------------------------------------------------------------------

    async fn attempt(
        &self,
        user_id: i64,
        platform: Platform,
        request: &UploadRequest,
    ) -> Result<UploadedVideo, PlatformError> {
        let adapter = self.adapters.get(platform)?;
        adapter.upload_video(user_id, request).await
    }

    /// Write one adapter outcome to its platform row
    async fn record(
        &self,
        post_id: i64,
        platform: Platform,
        result: &Result<UploadedVideo, PlatformError>,
    ) -> Result<PlatformOutcome, PublishError> {
        match result {
            Ok(video) => {
                if let Err(e) = self
                    .posts
                    .mark_platform_uploaded(post_id, platform, &video.video_id, video.thumbnail_url.as_deref())
                    .await
                {
                    error!(
                        post_id,
                        platform = %platform,
                        video_id = %video.video_id,
                        error = %e,
                        "Platform holds the video but the upload was not recorded"
                    );
                    return Err(e.into());
                }
                info!(post_id, platform = %platform, video_id = %video.video_id, "Platform upload succeeded");
                Ok(PlatformOutcome {
                    platform,
                    status: PlatformStatus::Uploaded,
                    video_id: Some(video.video_id.clone()),
                    thumbnail_url: video.thumbnail_url.clone(),
                    error: None,
                })
            }
            Err(e) => {
                let message = e.user_message();
                self.posts.mark_platform_failed(post_id, platform, &message).await?;
                warn!(post_id, platform = %platform, error = %e, "Platform upload failed");
                Ok(PlatformOutcome {
                    platform,
                    status: PlatformStatus::Failed,
                    video_id: None,
                    thumbnail_url: None,
                    error: Some(message),
                })
            }
        }
    }

    /// Re-derive the post status from its rows. When every row holds the
    /// video, the retained blob is deleted by whichever caller takes its path.
    async fn settle(&self, post_id: i64) -> Result<(PostStatus, bool), PublishError> {
        let rows = self.posts.list_post_platforms(post_id).await?;
        let status = PostStatus::derive(&rows);
        self.posts.set_post_status(post_id, status).await?;

        let all_uploaded = !rows.is_empty() && rows.iter().all(|r| r.status.is_terminal_success());
        if !all_uploaded {
            return Ok((status, false));
        }

        let Some(path) = self.posts.take_video_file_path(post_id).await? else {
            return Ok((status, false));
        };

        match self.blobs.delete(&path).await {
            Ok(()) => {
                info!(post_id, path = %path, "All platforms uploaded; deleted video blob");
                Ok((status, true))
            }
            Err(BlobError::NotFound(_)) => {
                debug!(post_id, path = %path, "Video blob already gone");
                Ok((status, false))
            }
            Err(e) => {
                warn!(post_id, path = %path, error = %e, "Failed to delete video blob; keeping its path");
                self.posts.set_video_file_path(post_id, Some(&path)).await?;
                Ok((status, false))
            }
        }
    }

    async fn discard_replaced_blob(&self, post_id: i64, path: &str) {
        match self.blobs.delete(path).await {
            Ok(()) => info!(post_id, path, "Deleted replaced video blob"),
            Err(BlobError::NotFound(_)) => debug!(post_id, path, "Replaced video blob already gone"),
            Err(e) => warn!(post_id, path, error = %e, "Failed to delete replaced video blob"),
        }
    }

    /// Fan out to every platform still waiting for the video.
    ///
    /// Each platform runs to completion regardless of the others; failures
    /// are recorded on their rows and reported as warnings.
    pub async fn publish_to_all(
        &self,
        user_id: i64,
        post_id: i64,
        blob_path: &str,
        options: &PlatformOptions,
    ) -> Result<PublishReport, PublishError> {
        let post = self.load_post(user_id, post_id).await?;
        check_owned(blob_path, user_id)?;

        let targets: Vec<Platform> = self
            .posts
            .list_post_platforms(post_id)
            .await?
            .into_iter()
            .filter(|row| row.status == PlatformStatus::Pending)
            .map(|row| row.platform)
            .collect();
        if targets.is_empty() {
            return Err(PublishError::Conflict(
                "No platforms are waiting for this video; retry failed platforms individually".to_string(),
            ));
        }

        let video = self.blobs.get(blob_path).await?;
        self.posts.set_video_file_path(post_id, Some(blob_path)).await?;
        let request = upload_request(&post, video, blob_path, options);

        info!(
            user_id,
            post_id,
            platforms = ?targets,
            bytes = request.video.len(),
            "Publishing to all platforms"
        );

        let attempts = targets.iter().map(|&platform| {
            let request = &request;
            async move { (platform, self.attempt(user_id, platform, request).await) }
        });
        let settled = join_all(attempts).await;

        // Record every outcome and settle before surfacing a write error
        let mut results = Vec::with_capacity(settled.len());
        let mut warnings = Vec::new();
        let mut first_error = None;
        for (platform, result) in &settled {
            match self.record(post_id, *platform, result).await {
                Ok(outcome) => {
                    if let Some(error) = &outcome.error {
                        warnings.push(format!("{}: {}", platform.display_name(), error));
                    }
                    results.push(outcome);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        let settle_result = self.settle(post_id).await;
        if let Some(e) = first_error {
            return Err(e);
        }
        let (status, blob_deleted) = settle_result?;
        info!(
            post_id,
            status = %status,
            failed = warnings.len(),
            blob_deleted,
            "Publish fan-out complete"
        );

        Ok(PublishReport {
            post_id,
            status,
            results,
            warnings,
            blob_deleted,
        })
    }

    /// Upload to one platform and settle the post. A platform failure is
    /// recorded, then returned as the error.
    async fn upload_one(
        &self,
        user_id: i64,
        post: &ScheduledPost,
        platform: Platform,
        blob_path: &str,
        video: Bytes,
        options: &PlatformOptions,
    ) -> Result<PublishReport, PublishError> {
        let request = upload_request(post, video, blob_path, options);
        let result = self.attempt(user_id, platform, &request).await;
        let recorded = self.record(post.id, platform, &result).await;
        let settle_result = self.settle(post.id).await;
        let outcome = recorded?;
        let (status, blob_deleted) = settle_result?;

        match result {
            Ok(_) => Ok(PublishReport {
                post_id: post.id,
                status,
                results: vec![outcome],
                warnings: Vec::new(),
                blob_deleted,
            }),
            Err(e) => Err(PublishError::Platform(e)),
        }
    }

    fn find_row(rows: Vec<PostPlatform>, platform: Platform) -> Result<PostPlatform, PublishError> {
        rows.into_iter()
            .find(|row| row.platform == platform)
            .ok_or_else(|| PublishError::NotFound(format!("{} is not a target of this post", platform.display_name())))
    }

    /// Storage-mediated path: the client uploads once, then asks for each
    /// platform separately.
    pub async fn process_upload(
        &self,
        user_id: i64,
        post_id: i64,
        platform: Platform,
        blob_path: &str,
        options: &PlatformOptions,
    ) -> Result<PublishReport, PublishError> {
        let post = self.load_post(user_id, post_id).await?;
        check_owned(blob_path, user_id)?;

        let row = Self::find_row(self.posts.list_post_platforms(post_id).await?, platform)?;
        match row.status {
            PlatformStatus::Pending => {}
            PlatformStatus::Failed => {
                return Err(PublishError::Conflict(format!(
                    "{} upload failed earlier; retry it instead",
                    platform.display_name()
                )));
            }
            PlatformStatus::Uploaded | PlatformStatus::Published => {
                return Err(PublishError::Conflict(format!(
                    "{} already has this video",
                    platform.display_name()
                )));
            }
        }

        let video = self.blobs.get(blob_path).await?;
        self.posts.set_video_file_path(post_id, Some(blob_path)).await?;

        info!(user_id, post_id, platform = %platform, "Processing upload");
        self.upload_one(user_id, &post, platform, blob_path, video, options).await
    }

    /// Retry a failed platform with the retained blob or a fresh one.
    ///
    /// The row is claimed `failed -> pending` atomically, so of two
    /// concurrent retries only one uploads; the other gets `Conflict`.
    pub async fn retry(
        &self,
        user_id: i64,
        post_id: i64,
        platform: Platform,
        new_blob_path: Option<&str>,
        options: &PlatformOptions,
    ) -> Result<PublishReport, PublishError> {
        let post = self.load_post(user_id, post_id).await?;
        let row = Self::find_row(self.posts.list_post_platforms(post_id).await?, platform)?;
        if row.status != PlatformStatus::Failed {
            return Err(PublishError::Conflict(format!(
                "{} has not failed; nothing to retry",
                platform.display_name()
            )));
        }

        let path = match new_blob_path.or(post.video_file_path.as_deref()) {
            Some(path) => path.to_string(),
            None => {
                return Err(PublishError::BlobNotFound(
                    "No video is stored for this post. Please upload the video again.".to_string(),
                ));
            }
        };
        check_owned(&path, user_id)?;

        if !self.blobs.exists(&path).await? {
            return Err(BlobError::NotFound(path).into());
        }

        if !self.posts.claim_platform_retry(post_id, platform).await? {
            return Err(PublishError::Conflict(format!(
                "A retry for {} is already in progress",
                platform.display_name()
            )));
        }

        if new_blob_path.is_some() {
            let replaced = self.posts.take_video_file_path(post_id).await?;
            self.posts.set_video_file_path(post_id, Some(&path)).await?;
            if let Some(old) = replaced.filter(|old| *old != path) {
                self.discard_replaced_blob(post_id, &old).await;
            }
        }

        let video = match self.blobs.get(&path).await {
            Ok(video) => video,
            Err(e) => {
                let err = PublishError::from(e);
                self.posts.mark_platform_failed(post_id, platform, &err.user_message()).await?;
                self.settle(post_id).await?;
                return Err(err);
            }
        };

        info!(user_id, post_id, platform = %platform, fresh_video = new_blob_path.is_some(), "Retrying upload");
        self.upload_one(user_id, &post, platform, &path, video, options).await
    }

    // ------------------------------------------------------------------
    // Post-upload edits
    // ------------------------------------------------------------------

    /// Platforms an edit can be pushed to, plus warnings for the rest
    fn edit_targets(rows: &[PostPlatform], requested: &[Platform]) -> (Vec<(Platform, String)>, Vec<String>) {
        let wanted: Vec<Platform> = if requested.is_empty() {
            rows.iter().map(|r| r.platform).collect()
        } else {
            requested.to_vec()
        };

        let mut targets = Vec::new();
        let mut warnings = Vec::new();
        for platform in wanted {
            let Some(row) = rows.iter().find(|r| r.platform == platform) else {
                warnings.push(format!("{} is not part of this post", platform.display_name()));
                continue;
            };
            match (&row.platform_video_id, row.status.is_terminal_success()) {
                (Some(video_id), true) => targets.push((platform, video_id.clone())),
                _ => warnings.push(format!(
                    "{} has no uploaded video yet; the new details apply when it uploads",
                    platform.display_name()
                )),
            }
        }
        (targets, warnings)
    }

    pub async fn update_metadata(
        &self,
        user_id: i64,
        post_id: i64,
        edit: MetadataEdit,
    ) -> Result<EditReport, PublishError> {
        let post = self.load_post(user_id, post_id).await?;
        if edit.title.is_none() && edit.description.is_none() && edit.tags.is_none() {
            return Err(PublishError::Validation("Nothing to update".to_string()));
        }
        if edit.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(PublishError::Validation("Title cannot be empty".to_string()));
        }

        self.posts
            .update_post_metadata(
                post_id,
                &PostMetadataUpdate {
                    title: edit.title.clone(),
                    description: edit.description.clone(),
                    tags: edit.tags.clone(),
                },
            )
            .await?;

        let rows = self.posts.list_post_platforms(post_id).await?;
        let (targets, mut warnings) = Self::edit_targets(&rows, &edit.platforms);

        let edit = &edit;
        let post = &post;
        let attempts = targets.iter().map(|(platform, video_id)| async move {
            let adapter = match self.adapters.get(*platform) {
                Ok(adapter) => adapter,
                Err(e) => return (*platform, Err(e), Vec::new()),
            };
            let changes = metadata_changes(adapter.as_ref(), post, edit);
            let result = adapter.update_metadata(user_id, video_id, &changes).await;
            (*platform, result, ignored_fields(adapter.as_ref(), edit))
        });

        let mut updated = Vec::new();
        for (platform, result, ignored) in join_all(attempts).await {
            match result {
                Ok(()) => {
                    updated.push(platform);
                    for field in ignored {
                        warnings.push(format!(
                            "{} does not support {}; they were not changed there",
                            platform.display_name(),
                            field
                        ));
                    }
                }
                Err(e @ PlatformError::Unsupported { .. }) => {
                    debug!(post_id, platform = %platform, error = %e, "Metadata edit not applicable");
                    warnings.push(format!("{}; it keeps its current details", e));
                }
                Err(e) => {
                    warn!(post_id, platform = %platform, error = %e, "Metadata update failed");
                    warnings.push(format!("{}: {}", platform.display_name(), e.user_message()));
                }
            }
        }

        info!(post_id, updated = updated.len(), warnings = warnings.len(), "Updated post metadata");
        Ok(EditReport { updated, warnings })
    }

    pub async fn update_schedule(
        &self,
        user_id: i64,
        post_id: i64,
        scheduled_at: &str,
        timezone: &str,
    ) -> Result<ScheduleReport, PublishError> {
        self.load_post(user_id, post_id).await?;

        let new_time = local_to_utc(scheduled_at, timezone)?;
        if new_time <= Utc::now() {
            return Err(PublishError::Validation("Scheduled time must be in the future".to_string()));
        }
        self.posts.update_post_schedule(post_id, new_time, timezone).await?;

        let rows = self.posts.list_post_platforms(post_id).await?;
        let mut targets = Vec::new();
        let mut warnings = Vec::new();
        for row in &rows {
            match (row.status, &row.platform_video_id) {
                (PlatformStatus::Uploaded, Some(video_id)) => targets.push((row.platform, video_id.clone())),
                (PlatformStatus::Published, _) => warnings.push(format!(
                    "{} is already published; its publish time cannot change",
                    row.platform.display_name()
                )),
                _ => {}
            }
        }

        let attempts = targets.iter().map(|(platform, video_id)| async move {
            let result = match self.adapters.get(*platform) {
                Ok(adapter) => adapter.update_schedule(user_id, video_id, new_time).await,
                Err(e) => Err(e),
            };
            (*platform, result)
        });

        let mut updated = Vec::new();
        for (platform, result) in join_all(attempts).await {
            match result {
                Ok(()) => updated.push(platform),
                Err(PlatformError::Unsupported { .. }) => warnings.push(format!(
                    "{} does not support rescheduling; it keeps its original publish time",
                    platform.display_name()
                )),
                Err(e) => {
                    warn!(post_id, platform = %platform, error = %e, "Reschedule failed");
                    warnings.push(format!("{}: {}", platform.display_name(), e.user_message()));
                }
            }
        }

        info!(post_id, scheduled_at = %new_time, updated = updated.len(), "Rescheduled post");
        Ok(ScheduleReport {
            scheduled_at: new_time,
            timezone: timezone.to_string(),
            updated,
            warnings,
        })
    }
}
