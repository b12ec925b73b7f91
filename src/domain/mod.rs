//! Persistence for connections, posts and per-platform rows.
//!
//! Query functions use the generic Executor pattern so they work with both
//! `&PgPool` and `&mut PgConnection` (transactions). The repository traits
//! are what services depend on; `memory` provides a store with the same
//! semantics for tests and local runs.

pub mod connections;
pub mod memory;
pub mod posts;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    NewScheduledPost, Platform, PlatformConnection, PostMetadataUpdate, PostPlatform, PostStatus,
    ScheduledPost,
};

pub use connections::PgConnectionRepository;
pub use memory::{MemoryConnectionRepository, MemoryPostRepository};
pub use posts::PgPostRepository;

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn get_connection(
        &self,
        user_id: i64,
        platform: Platform,
    ) -> Result<Option<PlatformConnection>, sqlx::Error>;

    async fn list_connections(&self, user_id: i64) -> Result<Vec<PlatformConnection>, sqlx::Error>;

    async fn upsert_connection(&self, connection: &PlatformConnection) -> Result<(), sqlx::Error>;

    /// Persist refreshed credentials. A `None` refresh token keeps the stored one.
    async fn update_tokens(
        &self,
        user_id: i64,
        platform: Platform,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error>;

    async fn delete_connection(&self, user_id: i64, platform: Platform) -> Result<bool, sqlx::Error>;
}

#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Insert a post and one `pending` platform row per target, atomically
    async fn create_post(
        &self,
        new_post: &NewScheduledPost,
    ) -> Result<(ScheduledPost, Vec<PostPlatform>), sqlx::Error>;

    async fn get_post(&self, post_id: i64, user_id: i64) -> Result<Option<ScheduledPost>, sqlx::Error>;

    async fn count_posts(&self, user_id: i64) -> Result<i64, sqlx::Error>;

    async fn list_posts(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ScheduledPost>, sqlx::Error>;

    async fn list_post_platforms(&self, post_id: i64) -> Result<Vec<PostPlatform>, sqlx::Error>;

    async fn mark_platform_uploaded(
        &self,
        post_id: i64,
        platform: Platform,
        video_id: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<(), sqlx::Error>;

    async fn mark_platform_failed(
        &self,
        post_id: i64,
        platform: Platform,
        error_message: &str,
    ) -> Result<(), sqlx::Error>;

    /// Move a platform row `failed -> pending`, clearing its error.
    /// Returns false when the row was not `failed` (another retry won).
    async fn claim_platform_retry(&self, post_id: i64, platform: Platform) -> Result<bool, sqlx::Error>;

    async fn set_post_status(&self, post_id: i64, status: PostStatus) -> Result<(), sqlx::Error>;

    async fn set_video_file_path(&self, post_id: i64, path: Option<&str>) -> Result<(), sqlx::Error>;

    /// Atomically clear the retained blob path, returning it to the one
    /// caller that should delete the blob.
    async fn take_video_file_path(&self, post_id: i64) -> Result<Option<String>, sqlx::Error>;

    async fn update_post_metadata(
        &self,
        post_id: i64,
        update: &PostMetadataUpdate,
    ) -> Result<(), sqlx::Error>;

    async fn update_post_schedule(
        &self,
        post_id: i64,
        scheduled_at: DateTime<Utc>,
        timezone: &str,
    ) -> Result<(), sqlx::Error>;

    /// Mark uploaded rows of posts scheduled at or before `now` as published,
    /// returning the ids of posts that changed.
    async fn publish_due(&self, now: DateTime<Utc>) -> Result<Vec<i64>, sqlx::Error>;
}
