//! In-process repositories with the same semantics as the Postgres ones.
//!
//! Used by tests and by local runs without `DATABASE_URL`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{ConnectionRepository, PostRepository};
use crate::models::{
    NewScheduledPost, Platform, PlatformConnection, PlatformStatus, PostMetadataUpdate,
    PostPlatform, PostStatus, ScheduledPost,
};

fn poisoned() -> sqlx::Error {
    sqlx::Error::Protocol("in-memory store lock poisoned".to_string())
}

#[derive(Default)]
pub struct MemoryConnectionRepository {
    rows: Mutex<HashMap<(i64, Platform), PlatformConnection>>,
}

impl MemoryConnectionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionRepository for MemoryConnectionRepository {
    async fn get_connection(
        &self,
        user_id: i64,
        platform: Platform,
    ) -> Result<Option<PlatformConnection>, sqlx::Error> {
        let rows = self.rows.lock().map_err(|_| poisoned())?;
        Ok(rows.get(&(user_id, platform)).cloned())
    }

    async fn list_connections(&self, user_id: i64) -> Result<Vec<PlatformConnection>, sqlx::Error> {
        let rows = self.rows.lock().map_err(|_| poisoned())?;
        let mut found: Vec<_> = rows
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.platform.as_str());
        Ok(found)
    }

    async fn upsert_connection(&self, connection: &PlatformConnection) -> Result<(), sqlx::Error> {
        let mut rows = self.rows.lock().map_err(|_| poisoned())?;
        let key = (connection.user_id, connection.platform);
        let mut next = connection.clone();
        if let Some(existing) = rows.get(&key) {
            if next.refresh_token.is_none() {
                next.refresh_token = existing.refresh_token.clone();
            }
            if next.platform_user_id.is_none() {
                next.platform_user_id = existing.platform_user_id.clone();
            }
        }
        rows.insert(key, next);
        Ok(())
    }

    async fn update_tokens(
        &self,
        user_id: i64,
        platform: Platform,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        let mut rows = self.rows.lock().map_err(|_| poisoned())?;
        if let Some(row) = rows.get_mut(&(user_id, platform)) {
            row.access_token = access_token.to_string();
            if let Some(refresh) = refresh_token {
                row.refresh_token = Some(refresh.to_string());
            }
            row.expires_at = expires_at;
        }
        Ok(())
    }

    async fn delete_connection(&self, user_id: i64, platform: Platform) -> Result<bool, sqlx::Error> {
        let mut rows = self.rows.lock().map_err(|_| poisoned())?;
        Ok(rows.remove(&(user_id, platform)).is_some())
    }
}

#[derive(Default)]
struct PostTables {
    next_post_id: i64,
    next_platform_id: i64,
    posts: HashMap<i64, ScheduledPost>,
    platforms: Vec<PostPlatform>,
}

impl PostTables {
    fn platform_row(&mut self, post_id: i64, platform: Platform) -> Option<&mut PostPlatform> {
        self.platforms
            .iter_mut()
            .find(|p| p.post_id == post_id && p.platform == platform)
    }
}

#[derive(Default)]
pub struct MemoryPostRepository {
    tables: Mutex<PostTables>,
}

impl MemoryPostRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PostRepository for MemoryPostRepository {
    async fn create_post(
        &self,
        new_post: &NewScheduledPost,
    ) -> Result<(ScheduledPost, Vec<PostPlatform>), sqlx::Error> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;

        tables.next_post_id += 1;
        let post = ScheduledPost {
            id: tables.next_post_id,
            user_id: new_post.user_id,
            title: new_post.title.clone(),
            description: new_post.description.clone(),
            tags: new_post.tags.clone(),
            scheduled_at: new_post.scheduled_at,
            timezone: new_post.timezone.clone(),
            status: PostStatus::Uploading,
            youtube_category_id: new_post.youtube_category_id.clone(),
            video_file_path: None,
            created_at: Utc::now(),
        };
        tables.posts.insert(post.id, post.clone());

        let mut created = Vec::with_capacity(new_post.platforms.len());
        for platform in &new_post.platforms {
            if created.iter().any(|p: &PostPlatform| p.platform == *platform) {
                return Err(sqlx::Error::Protocol(format!(
                    "duplicate platform {} for post {}",
                    platform, post.id
                )));
            }
            tables.next_platform_id += 1;
            created.push(PostPlatform {
                id: tables.next_platform_id,
                post_id: post.id,
                platform: *platform,
                platform_video_id: None,
                thumbnail_url: None,
                status: PlatformStatus::Pending,
                error_message: None,
                uploaded_at: None,
            });
        }
        tables.platforms.extend(created.iter().cloned());

        Ok((post, created))
    }

    async fn get_post(&self, post_id: i64, user_id: i64) -> Result<Option<ScheduledPost>, sqlx::Error> {
        let tables = self.tables.lock().map_err(|_| poisoned())?;
        Ok(tables
            .posts
            .get(&post_id)
            .filter(|p| p.user_id == user_id)
            .cloned())
    }

    async fn count_posts(&self, user_id: i64) -> Result<i64, sqlx::Error> {
        let tables = self.tables.lock().map_err(|_| poisoned())?;
        Ok(tables.posts.values().filter(|p| p.user_id == user_id).count() as i64)
    }

    async fn list_posts(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ScheduledPost>, sqlx::Error> {
        let tables = self.tables.lock().map_err(|_| poisoned())?;
        let mut posts: Vec<_> = tables
            .posts
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at).then(b.id.cmp(&a.id)));
        Ok(posts
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_post_platforms(&self, post_id: i64) -> Result<Vec<PostPlatform>, sqlx::Error> {
        let tables = self.tables.lock().map_err(|_| poisoned())?;
        Ok(tables
            .platforms
            .iter()
            .filter(|p| p.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn mark_platform_uploaded(
        &self,
        post_id: i64,
        platform: Platform,
        video_id: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        if let Some(row) = tables.platform_row(post_id, platform) {
            row.status = PlatformStatus::Uploaded;
            row.platform_video_id = Some(video_id.to_string());
            row.thumbnail_url = thumbnail_url.map(str::to_string);
            row.error_message = None;
            row.uploaded_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_platform_failed(
        &self,
        post_id: i64,
        platform: Platform,
        error_message: &str,
    ) -> Result<(), sqlx::Error> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        if let Some(row) = tables.platform_row(post_id, platform) {
            row.status = PlatformStatus::Failed;
            row.error_message = Some(error_message.to_string());
        }
        Ok(())
    }

    async fn claim_platform_retry(&self, post_id: i64, platform: Platform) -> Result<bool, sqlx::Error> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        match tables.platform_row(post_id, platform) {
            Some(row) if row.status.can_transition_to(PlatformStatus::Pending) => {
                row.status = PlatformStatus::Pending;
                row.error_message = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_post_status(&self, post_id: i64, status: PostStatus) -> Result<(), sqlx::Error> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        if let Some(post) = tables.posts.get_mut(&post_id) {
            post.status = status;
        }
        Ok(())
    }

    async fn set_video_file_path(&self, post_id: i64, path: Option<&str>) -> Result<(), sqlx::Error> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        if let Some(post) = tables.posts.get_mut(&post_id) {
            post.video_file_path = path.map(str::to_string);
        }
        Ok(())
    }

    async fn take_video_file_path(&self, post_id: i64) -> Result<Option<String>, sqlx::Error> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        Ok(tables
            .posts
            .get_mut(&post_id)
            .and_then(|post| post.video_file_path.take()))
    }

    async fn update_post_metadata(
        &self,
        post_id: i64,
        update: &PostMetadataUpdate,
    ) -> Result<(), sqlx::Error> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        if let Some(post) = tables.posts.get_mut(&post_id) {
            if let Some(title) = &update.title {
                post.title = title.clone();
            }
            if let Some(description) = &update.description {
                post.description = description.clone();
            }
            if let Some(tags) = &update.tags {
                post.tags = tags.clone();
            }
        }
        Ok(())
    }

    async fn update_post_schedule(
        &self,
        post_id: i64,
        scheduled_at: DateTime<Utc>,
        timezone: &str,
    ) -> Result<(), sqlx::Error> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        if let Some(post) = tables.posts.get_mut(&post_id) {
            post.scheduled_at = scheduled_at;
            post.timezone = timezone.to_string();
        }
        Ok(())
    }

    async fn publish_due(&self, now: DateTime<Utc>) -> Result<Vec<i64>, sqlx::Error> {
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        let due: Vec<i64> = tables
            .posts
            .values()
            .filter(|p| p.scheduled_at <= now)
            .map(|p| p.id)
            .collect();

        let mut changed = Vec::new();
        for row in tables.platforms.iter_mut() {
            if row.status.can_transition_to(PlatformStatus::Published) && due.contains(&row.post_id) {
                row.status = PlatformStatus::Published;
                changed.push(row.post_id);
            }
        }
        changed.sort_unstable();
        changed.dedup();
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_post(user_id: i64, platforms: Vec<Platform>) -> NewScheduledPost {
        NewScheduledPost {
            user_id,
            title: "Launch".to_string(),
            description: "Launch day".to_string(),
            tags: vec!["launch".to_string()],
            scheduled_at: Utc::now() + Duration::hours(1),
            timezone: "UTC".to_string(),
            youtube_category_id: None,
            platforms,
        }
    }

    #[tokio::test]
    async fn test_claim_retry_only_succeeds_once() {
        let repo = MemoryPostRepository::new();
        let (post, _) = repo
            .create_post(&new_post(1, vec![Platform::Youtube]))
            .await
            .unwrap();

        repo.mark_platform_failed(post.id, Platform::Youtube, "boom")
            .await
            .unwrap();

        assert!(repo.claim_platform_retry(post.id, Platform::Youtube).await.unwrap());
        assert!(!repo.claim_platform_retry(post.id, Platform::Youtube).await.unwrap());

        let rows = repo.list_post_platforms(post.id).await.unwrap();
        assert_eq!(rows[0].status, PlatformStatus::Pending);
        assert!(rows[0].error_message.is_none());
    }

    #[tokio::test]
    async fn test_video_path_is_taken_once() {
        let repo = MemoryPostRepository::new();
        let (post, _) = repo.create_post(&new_post(1, vec![Platform::Youtube])).await.unwrap();
        repo.set_video_file_path(post.id, Some("videos/user_1/a.mp4")).await.unwrap();

        assert_eq!(
            repo.take_video_file_path(post.id).await.unwrap().as_deref(),
            Some("videos/user_1/a.mp4")
        );
        assert!(repo.take_video_file_path(post.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_posts_are_scoped_to_owner() {
        let repo = MemoryPostRepository::new();
        let (post, _) = repo.create_post(&new_post(1, vec![Platform::Tiktok])).await.unwrap();

        assert!(repo.get_post(post.id, 1).await.unwrap().is_some());
        assert!(repo.get_post(post.id, 2).await.unwrap().is_none());
        assert_eq!(repo.count_posts(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_publish_due_only_touches_uploaded_rows() {
        let repo = MemoryPostRepository::new();
        let (post, _) = repo
            .create_post(&new_post(1, vec![Platform::Youtube, Platform::Facebook]))
            .await
            .unwrap();
        repo.mark_platform_uploaded(post.id, Platform::Youtube, "yt1", None)
            .await
            .unwrap();

        let before = repo.publish_due(Utc::now()).await.unwrap();
        assert!(before.is_empty());

        let changed = repo.publish_due(Utc::now() + Duration::hours(2)).await.unwrap();
        assert_eq!(changed, vec![post.id]);

        let rows = repo.list_post_platforms(post.id).await.unwrap();
        assert_eq!(rows[0].status, PlatformStatus::Published);
        assert_eq!(rows[1].status, PlatformStatus::Pending);
    }

    #[tokio::test]
    async fn test_upsert_keeps_existing_refresh_token() {
        let repo = MemoryConnectionRepository::new();
        let mut conn = PlatformConnection {
            user_id: 7,
            platform: Platform::Youtube,
            access_token: "a1".to_string(),
            refresh_token: Some("r1".to_string()),
            expires_at: Utc::now(),
            platform_user_id: None,
        };
        repo.upsert_connection(&conn).await.unwrap();

        conn.access_token = "a2".to_string();
        conn.refresh_token = None;
        repo.upsert_connection(&conn).await.unwrap();

        let stored = repo.get_connection(7, Platform::Youtube).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "a2");
        assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
    }
}
