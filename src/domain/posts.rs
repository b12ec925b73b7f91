//! Scheduled post and per-platform row queries
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres};

use super::PostRepository;
use crate::models::{
    NewScheduledPost, Platform, PlatformStatus, PostMetadataUpdate, PostPlatform, PostStatus,
    ScheduledPost,
};

const POST_COLUMNS: &str = "id, user_id, title, description, tags, scheduled_at, timezone, status, \
                            youtube_category_id, video_file_path, created_at";

const PLATFORM_COLUMNS: &str =
    "id, post_id, platform, platform_video_id, thumbnail_url, status, error_message, uploaded_at";

pub async fn insert_post<'e, E>(executor: E, new_post: &NewScheduledPost) -> Result<ScheduledPost, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"INSERT INTO scheduled_posts
               (user_id, title, description, tags, scheduled_at, timezone, status, youtube_category_id)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
           RETURNING {}"#,
        POST_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(new_post.user_id)
        .bind(&new_post.title)
        .bind(&new_post.description)
        .bind(&new_post.tags)
        .bind(new_post.scheduled_at)
        .bind(&new_post.timezone)
        .bind(PostStatus::Uploading)
        .bind(new_post.youtube_category_id.as_deref())
        .fetch_one(executor)
        .await
}

pub async fn insert_post_platform<'e, E>(
    executor: E,
    post_id: i64,
    platform: Platform,
) -> Result<PostPlatform, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        "INSERT INTO post_platforms (post_id, platform, status) VALUES ($1, $2, $3) RETURNING {}",
        PLATFORM_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(post_id)
        .bind(platform)
        .bind(PlatformStatus::Pending)
        .fetch_one(executor)
        .await
}

pub async fn get_post<'e, E>(executor: E, post_id: i64, user_id: i64) -> Result<Option<ScheduledPost>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        "SELECT {} FROM scheduled_posts WHERE id = $1 AND user_id = $2",
        POST_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(post_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await
}

pub async fn count_posts<'e, E>(executor: E, user_id: i64) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scheduled_posts WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(executor)
        .await?;

    Ok(count)
}

pub async fn list_posts<'e, E>(
    executor: E,
    user_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<ScheduledPost>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"SELECT {}
           FROM scheduled_posts
           WHERE user_id = $1
           ORDER BY scheduled_at DESC
           LIMIT $2 OFFSET $3"#,
        POST_COLUMNS
    );

    sqlx::query_as(&query)
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await
}

pub async fn list_post_platforms<'e, E>(executor: E, post_id: i64) -> Result<Vec<PostPlatform>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        "SELECT {} FROM post_platforms WHERE post_id = $1 ORDER BY id",
        PLATFORM_COLUMNS
    );

    sqlx::query_as(&query).bind(post_id).fetch_all(executor).await
}

pub async fn mark_platform_uploaded<'e, E>(
    executor: E,
    post_id: i64,
    platform: Platform,
    video_id: &str,
    thumbnail_url: Option<&str>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE post_platforms
        SET status = 'uploaded', platform_video_id = $3, thumbnail_url = $4,
            error_message = NULL, uploaded_at = NOW()
        WHERE post_id = $1 AND platform = $2
        "#,
    )
    .bind(post_id)
    .bind(platform)
    .bind(video_id)
    .bind(thumbnail_url)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn mark_platform_failed<'e, E>(
    executor: E,
    post_id: i64,
    platform: Platform,
    error_message: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE post_platforms
        SET status = 'failed', error_message = $3
        WHERE post_id = $1 AND platform = $2
        "#,
    )
    .bind(post_id)
    .bind(platform)
    .bind(error_message)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn claim_platform_retry<'e, E>(executor: E, post_id: i64, platform: Platform) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    // Compare-and-set: only one concurrent retry can move the row out of 'failed'
    let result = sqlx::query(
        r#"
        UPDATE post_platforms
        SET status = 'pending', error_message = NULL
        WHERE post_id = $1 AND platform = $2 AND status = 'failed'
        "#,
    )
    .bind(post_id)
    .bind(platform)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_post_status<'e, E>(executor: E, post_id: i64, status: PostStatus) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE scheduled_posts SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(post_id)
        .bind(status)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn set_video_file_path<'e, E>(executor: E, post_id: i64, path: Option<&str>) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE scheduled_posts SET video_file_path = $2, updated_at = NOW() WHERE id = $1")
        .bind(post_id)
        .bind(path)
        .execute(executor)
        .await?;
    Ok(())
}

/// Clear the retained blob path and return it, at most once per path
pub async fn take_video_file_path<'e, E>(executor: E, post_id: i64) -> Result<Option<String>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        UPDATE scheduled_posts p
        SET video_file_path = NULL, updated_at = NOW()
        FROM (SELECT id, video_file_path FROM scheduled_posts WHERE id = $1 FOR UPDATE) old
        WHERE p.id = old.id AND old.video_file_path IS NOT NULL
        RETURNING old.video_file_path
        "#,
    )
    .bind(post_id)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|(path,)| path))
}

pub async fn update_post_metadata<'e, E>(
    executor: E,
    post_id: i64,
    update: &PostMetadataUpdate,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE scheduled_posts SET
            title = COALESCE($2, title),
            description = COALESCE($3, description),
            tags = COALESCE($4, tags),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(post_id)
    .bind(update.title.as_deref())
    .bind(update.description.as_deref())
    .bind(update.tags.as_ref())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn update_post_schedule<'e, E>(
    executor: E,
    post_id: i64,
    scheduled_at: DateTime<Utc>,
    timezone: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "UPDATE scheduled_posts SET scheduled_at = $2, timezone = $3, updated_at = NOW() WHERE id = $1",
    )
    .bind(post_id)
    .bind(scheduled_at)
    .bind(timezone)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn publish_due_platforms<'e, E>(executor: E, now: DateTime<Utc>) -> Result<Vec<i64>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"
        UPDATE post_platforms pp
        SET status = 'published'
        FROM scheduled_posts sp
        WHERE pp.post_id = sp.id AND pp.status = 'uploaded' AND sp.scheduled_at <= $1
        RETURNING pp.post_id
        "#,
    )
    .bind(now)
    .fetch_all(executor)
    .await?;

    let mut post_ids: Vec<i64> = rows.into_iter().map(|r| r.0).collect();
    post_ids.sort_unstable();
    post_ids.dedup();
    Ok(post_ids)
}

/// Postgres-backed [`PostRepository`]
#[derive(Clone)]
pub struct PgPostRepository {
    db: PgPool,
}

impl PgPostRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PostRepository for PgPostRepository {
    async fn create_post(
        &self,
        new_post: &NewScheduledPost,
    ) -> Result<(ScheduledPost, Vec<PostPlatform>), sqlx::Error> {
        let mut tx = self.db.begin().await?;

        let post = insert_post(&mut *tx, new_post).await?;
        let mut platforms = Vec::with_capacity(new_post.platforms.len());
        for platform in &new_post.platforms {
            platforms.push(insert_post_platform(&mut *tx, post.id, *platform).await?);
        }

        tx.commit().await?;
        Ok((post, platforms))
    }

    async fn get_post(&self, post_id: i64, user_id: i64) -> Result<Option<ScheduledPost>, sqlx::Error> {
        get_post(&self.db, post_id, user_id).await
    }

    async fn count_posts(&self, user_id: i64) -> Result<i64, sqlx::Error> {
        count_posts(&self.db, user_id).await
    }

    async fn list_posts(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ScheduledPost>, sqlx::Error> {
        list_posts(&self.db, user_id, limit, offset).await
    }

    async fn list_post_platforms(&self, post_id: i64) -> Result<Vec<PostPlatform>, sqlx::Error> {
        list_post_platforms(&self.db, post_id).await
    }

    async fn mark_platform_uploaded(
        &self,
        post_id: i64,
        platform: Platform,
        video_id: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        mark_platform_uploaded(&self.db, post_id, platform, video_id, thumbnail_url).await
    }

    async fn mark_platform_failed(
        &self,
        post_id: i64,
        platform: Platform,
        error_message: &str,
    ) -> Result<(), sqlx::Error> {
        mark_platform_failed(&self.db, post_id, platform, error_message).await
    }

    async fn claim_platform_retry(&self, post_id: i64, platform: Platform) -> Result<bool, sqlx::Error> {
        claim_platform_retry(&self.db, post_id, platform).await
    }

    async fn set_post_status(&self, post_id: i64, status: PostStatus) -> Result<(), sqlx::Error> {
        set_post_status(&self.db, post_id, status).await
    }

    async fn set_video_file_path(&self, post_id: i64, path: Option<&str>) -> Result<(), sqlx::Error> {
        set_video_file_path(&self.db, post_id, path).await
    }

    async fn take_video_file_path(&self, post_id: i64) -> Result<Option<String>, sqlx::Error> {
        take_video_file_path(&self.db, post_id).await
    }

    async fn update_post_metadata(
        &self,
        post_id: i64,
        update: &PostMetadataUpdate,
    ) -> Result<(), sqlx::Error> {
        update_post_metadata(&self.db, post_id, update).await
    }

    async fn update_post_schedule(
        &self,
        post_id: i64,
        scheduled_at: DateTime<Utc>,
        timezone: &str,
    ) -> Result<(), sqlx::Error> {
        update_post_schedule(&self.db, post_id, scheduled_at, timezone).await
    }

    async fn publish_due(&self, now: DateTime<Utc>) -> Result<Vec<i64>, sqlx::Error> {
        publish_due_platforms(&self.db, now).await
    }
}
