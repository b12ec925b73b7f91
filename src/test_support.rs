//! Shared fixtures for unit tests

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::config::{FacebookConfig, TikTokConfig, YouTubeConfig};
use crate::domain::{ConnectionRepository, MemoryConnectionRepository};
use crate::models::{Platform, PlatformConnection};
use crate::platforms::PlatformError;
use crate::platforms::oauth::{TokenGrant, TokenRefresher};
use crate::services::tokens::TokenManager;

pub const TEST_USER: i64 = 1;

pub struct NoRefresh;

#[async_trait]
impl TokenRefresher for NoRefresh {
    async fn refresh(&self, _connection: &PlatformConnection) -> Result<TokenGrant, PlatformError> {
        Err(PlatformError::TokenRefreshFailed("refresh disabled".into()))
    }
}

/// Token manager holding one long-lived connection per `(platform, token)`
pub async fn token_manager(connections: &[(Platform, &str)]) -> Arc<TokenManager> {
    let repo = Arc::new(MemoryConnectionRepository::new());
    for (platform, token) in connections {
        repo.upsert_connection(&PlatformConnection {
            user_id: TEST_USER,
            platform: *platform,
            access_token: token.to_string(),
            refresh_token: None,
            expires_at: Utc::now() + Duration::days(1),
            platform_user_id: None,
        })
        .await
        .unwrap();
    }
    Arc::new(TokenManager::new(repo, Arc::new(NoRefresh)))
}

pub fn youtube_config(base: &str) -> YouTubeConfig {
    YouTubeConfig {
        client_id: "yt-id".into(),
        client_secret: "yt-secret".into(),
        oauth_url: base.to_string(),
        api_url: base.to_string(),
    }
}

pub fn facebook_config(base: &str) -> FacebookConfig {
    FacebookConfig {
        app_id: "fb-app".into(),
        app_secret: String::new(),
        graph_version: "v19.0".into(),
        graph_url: base.to_string(),
        rupload_url: base.to_string(),
    }
}

pub fn tiktok_config(base: &str) -> TikTokConfig {
    TikTokConfig {
        client_key: "tt-key".into(),
        client_secret: "tt-secret".into(),
        api_url: base.to_string(),
    }
}
