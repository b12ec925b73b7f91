//! Background status sweeper.
//!
//! Platforms that accept a scheduled publish time hold the video as
//! `uploaded` until then. Once a post's schedule passes, its uploaded rows
//! become `published` and the post status is re-derived.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::domain::PostRepository;
use crate::models::PostStatus;

/// One sweep. Returns the ids of posts whose rows changed.
pub async fn sweep_once(posts: &dyn PostRepository, now: DateTime<Utc>) -> Result<Vec<i64>, sqlx::Error> {
    let mut changed = posts.publish_due(now).await?;
    changed.sort_unstable();
    changed.dedup();

    for &post_id in &changed {
        let rows = posts.list_post_platforms(post_id).await?;
        let status = PostStatus::derive(&rows);
        posts.set_post_status(post_id, status).await?;
        debug!(post_id, status = %status, "Sweeper updated post status");
    }
    Ok(changed)
}

/// Run [`sweep_once`] every `interval_secs` until the process exits
pub async fn run_status_sweeper(posts: Arc<dyn PostRepository>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    info!(interval_secs, "Status sweeper starting");

    loop {
        interval.tick().await;

        match sweep_once(posts.as_ref(), Utc::now()).await {
            Ok(changed) if !changed.is_empty() => {
                info!(posts = changed.len(), "Marked scheduled uploads as published");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Status sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MemoryPostRepository;
    use crate::models::{NewScheduledPost, Platform, PlatformStatus};
    use chrono::Duration as ChronoDuration;

    fn new_post(scheduled_at: DateTime<Utc>) -> NewScheduledPost {
        NewScheduledPost {
            user_id: 1,
            title: "Launch".into(),
            description: String::new(),
            tags: vec![],
            scheduled_at,
            timezone: "UTC".into(),
            youtube_category_id: None,
            platforms: vec![Platform::Youtube, Platform::Facebook],
        }
    }

    #[tokio::test]
    async fn test_sweep_publishes_due_uploads_only() {
        let repo = MemoryPostRepository::new();
        let now = Utc::now();

        let (due, _) = repo.create_post(&new_post(now - ChronoDuration::minutes(5))).await.unwrap();
        let (later, _) = repo.create_post(&new_post(now + ChronoDuration::hours(1))).await.unwrap();
        for post_id in [due.id, later.id] {
            for platform in [Platform::Youtube, Platform::Facebook] {
                repo.mark_platform_uploaded(post_id, platform, "vid", None).await.unwrap();
            }
            repo.set_post_status(post_id, PostStatus::Pending).await.unwrap();
        }

        let changed = sweep_once(&repo, now).await.unwrap();
        assert_eq!(changed, vec![due.id]);

        let due_post = repo.get_post(due.id, 1).await.unwrap().unwrap();
        assert_eq!(due_post.status, PostStatus::Published);
        let later_post = repo.get_post(later.id, 1).await.unwrap().unwrap();
        assert_eq!(later_post.status, PostStatus::Pending);
    }

    #[tokio::test]
    async fn test_sweep_leaves_failed_rows_alone() {
        let repo = MemoryPostRepository::new();
        let now = Utc::now();
        let (post, _) = repo.create_post(&new_post(now - ChronoDuration::minutes(1))).await.unwrap();
        repo.mark_platform_uploaded(post.id, Platform::Youtube, "vid", None).await.unwrap();
        repo.mark_platform_failed(post.id, Platform::Facebook, "rejected").await.unwrap();

        sweep_once(&repo, now).await.unwrap();

        let rows = repo.list_post_platforms(post.id).await.unwrap();
        let facebook = rows.iter().find(|r| r.platform == Platform::Facebook).unwrap();
        assert_eq!(facebook.status, PlatformStatus::Failed);
        let stored = repo.get_post(post.id, 1).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
    }
}
