//! Per-user platform credentials, refreshed shortly before they expire

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::constants::TOKEN_REFRESH_WINDOW_SECS;
use crate::domain::ConnectionRepository;
use crate::models::{Platform, PlatformConnection};
use crate::platforms::PlatformError;
use crate::platforms::oauth::TokenRefresher;

pub struct TokenManager {
    connections: Arc<dyn ConnectionRepository>,
    refresher: Arc<dyn TokenRefresher>,
}

impl TokenManager {
    pub fn new(connections: Arc<dyn ConnectionRepository>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            connections,
            refresher,
        }
    }

    /// Stored connection for the platform. Instagram publishes through the
    /// Facebook login, so it falls back to the Facebook row.
    async fn find_connection(&self, user_id: i64, platform: Platform) -> Result<PlatformConnection, PlatformError> {
        let lookup = |p: Platform| async move {
            self.connections.get_connection(user_id, p).await.map_err(|e| {
                PlatformError::Permanent(format!("Failed to load {} credentials: {}", p.display_name(), e))
            })
        };

        if let Some(conn) = lookup(platform).await? {
            return Ok(conn);
        }
        if platform == Platform::Instagram {
            if let Some(conn) = lookup(Platform::Facebook).await? {
                return Ok(conn);
            }
        }
        Err(PlatformError::NotConnected(platform))
    }

    /// Connection with a token that is valid for at least the refresh window,
    /// when a refresh is possible.
    ///
    /// A failed refresh is logged and the existing token returned; the
    /// upload that uses it surfaces the real failure.
    pub async fn get_valid_connection(&self, user_id: i64, platform: Platform) -> Result<PlatformConnection, PlatformError> {
        let mut conn = self.find_connection(user_id, platform).await?;

        let now = Utc::now();
        if conn.expires_at - now >= Duration::seconds(TOKEN_REFRESH_WINDOW_SECS) {
            return Ok(conn);
        }

        match self.refresher.refresh(&conn).await {
            Ok(grant) => {
                let expires_at = grant.expires_at(conn.platform, now);
                if let Err(e) = self
                    .connections
                    .update_tokens(
                        user_id,
                        conn.platform,
                        &grant.access_token,
                        grant.refresh_token.as_deref(),
                        expires_at,
                    )
                    .await
                {
                    warn!(user_id, platform = %conn.platform, error = %e, "Failed to persist refreshed token");
                }

                info!(user_id, platform = %conn.platform, "Refreshed access token");
                conn.access_token = grant.access_token;
                if grant.refresh_token.is_some() {
                    conn.refresh_token = grant.refresh_token;
                }
                conn.expires_at = expires_at;
                Ok(conn)
            }
            Err(e) => {
                warn!(
                    user_id,
                    platform = %conn.platform,
                    error = %e,
                    "Token refresh failed, using existing token"
                );
                Ok(conn)
            }
        }
    }

    pub async fn get_valid_access_token(&self, user_id: i64, platform: Platform) -> Result<String, PlatformError> {
        Ok(self.get_valid_connection(user_id, platform).await?.access_token)
    }
}
