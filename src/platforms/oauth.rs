//! OAuth token endpoints: authorization-code exchange and token refresh

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::error::PlatformError;
use super::graph::{GraphClient, GraphId};
use crate::config::{FacebookConfig, TikTokConfig, YouTubeConfig};
use crate::constants::API_TIMEOUT;
use crate::models::{Platform, PlatformConnection};

/// Facebook long-lived tokens last about 60 days
const FACEBOOK_DEFAULT_EXPIRY_DAYS: i64 = 60;
const DEFAULT_EXPIRY_SECS: i64 = 3600;

/// Credentials returned by a token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// TikTok returns the account id with every grant
    #[serde(default)]
    pub open_id: Option<String>,
}

impl TokenGrant {
    pub fn expires_at(&self, platform: Platform, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.expires_in {
            Some(secs) => now + Duration::seconds(secs),
            None if matches!(platform, Platform::Facebook | Platform::Instagram) => {
                now + Duration::days(FACEBOOK_DEFAULT_EXPIRY_DAYS)
            }
            None => now + Duration::seconds(DEFAULT_EXPIRY_SECS),
        }
    }
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Obtain fresh credentials for a stored connection
    async fn refresh(&self, connection: &PlatformConnection) -> Result<TokenGrant, PlatformError>;
}

#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    youtube: YouTubeConfig,
    facebook: FacebookConfig,
    tiktok: TikTokConfig,
}

impl OAuthClient {
    pub fn new(youtube: YouTubeConfig, facebook: FacebookConfig, tiktok: TikTokConfig) -> Self {
        Self {
            http: Client::builder()
                .timeout(API_TIMEOUT)
                .build()
                .unwrap_or_default(),
            youtube,
            facebook,
            tiktok,
        }
    }

    /// Exchange an authorization code and build the connection row to store
    pub async fn exchange_code(
        &self,
        user_id: i64,
        platform: Platform,
        code: &str,
        redirect_uri: &str,
    ) -> Result<PlatformConnection, PlatformError> {
        let now = Utc::now();

        let (grant, platform_user_id) = match platform {
            Platform::Youtube => {
                let params = [
                    ("code", code),
                    ("client_id", self.youtube.client_id.as_str()),
                    ("client_secret", self.youtube.client_secret.as_str()),
                    ("redirect_uri", redirect_uri),
                    ("grant_type", "authorization_code"),
                ];
                let grant = self.post_token(&self.google_token_url(), &params).await?;
                (grant, None)
            }
            Platform::Facebook | Platform::Instagram => {
                let resp = self
                    .http
                    .get(self.facebook.graph("oauth/access_token"))
                    .query(&[
                        ("client_id", self.facebook.app_id.as_str()),
                        ("client_secret", self.facebook.app_secret.as_str()),
                        ("redirect_uri", redirect_uri),
                        ("code", code),
                    ])
                    .send()
                    .await?;
                let short_lived = read_grant(resp, "code exchange").await?;

                // Short-lived tokens expire in hours; extend immediately
                let grant = self.extend_facebook_token(&short_lived.access_token).await?;
                let me = self.facebook_user_id(&grant.access_token).await?;
                (grant, Some(me))
            }
            Platform::Tiktok => {
                let params = [
                    ("client_key", self.tiktok.client_key.as_str()),
                    ("client_secret", self.tiktok.client_secret.as_str()),
                    ("code", code),
                    ("grant_type", "authorization_code"),
                    ("redirect_uri", redirect_uri),
                ];
                let grant = self.post_token(&self.tiktok_token_url(), &params).await?;
                let open_id = grant.open_id.clone();
                (grant, open_id)
            }
        };

        info!(user_id, platform = %platform, "Exchanged authorization code");

        Ok(PlatformConnection {
            user_id,
            platform,
            expires_at: grant.expires_at(platform, now),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            platform_user_id,
        })
    }

    fn google_token_url(&self) -> String {
        format!("{}/token", self.youtube.oauth_url.trim_end_matches('/'))
    }

    fn tiktok_token_url(&self) -> String {
        format!("{}/v2/oauth/token/", self.tiktok.api_url.trim_end_matches('/'))
    }

    async fn post_token(&self, url: &str, params: &[(&str, &str)]) -> Result<TokenGrant, PlatformError> {
        let resp = self
            .http
            .post(url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .form(params)
            .send()
            .await?;
        read_grant(resp, "token").await
    }

    async fn extend_facebook_token(&self, access_token: &str) -> Result<TokenGrant, PlatformError> {
        let resp = self
            .http
            .get(self.facebook.graph("oauth/access_token"))
            .query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", self.facebook.app_id.as_str()),
                ("client_secret", self.facebook.app_secret.as_str()),
                ("fb_exchange_token", access_token),
            ])
            .send()
            .await?;
        read_grant(resp, "token extension").await
    }

    async fn facebook_user_id(&self, access_token: &str) -> Result<String, PlatformError> {
        let me: GraphId = GraphClient::new(self.facebook.clone())
            .get_json("me", access_token, &[("fields", "id")])
            .await?;
        Ok(me.id)
    }
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh(&self, connection: &PlatformConnection) -> Result<TokenGrant, PlatformError> {
        debug!(user_id = connection.user_id, platform = %connection.platform, "Refreshing access token");

        let result = match connection.platform {
            Platform::Youtube | Platform::Tiktok => {
                let refresh_token = connection.refresh_token.as_deref().ok_or_else(|| {
                    PlatformError::TokenRefreshFailed("no refresh token stored".to_string())
                })?;

                if connection.platform == Platform::Youtube {
                    let params = [
                        ("client_id", self.youtube.client_id.as_str()),
                        ("client_secret", self.youtube.client_secret.as_str()),
                        ("refresh_token", refresh_token),
                        ("grant_type", "refresh_token"),
                    ];
                    self.post_token(&self.google_token_url(), &params).await
                } else {
                    let params = [
                        ("client_key", self.tiktok.client_key.as_str()),
                        ("client_secret", self.tiktok.client_secret.as_str()),
                        ("refresh_token", refresh_token),
                        ("grant_type", "refresh_token"),
                    ];
                    self.post_token(&self.tiktok_token_url(), &params).await
                }
            }
            // No refresh tokens on the Graph API; re-extend the long-lived token
            Platform::Facebook | Platform::Instagram => {
                self.extend_facebook_token(&connection.access_token).await
            }
        };

        result.map_err(|e| match e {
            PlatformError::TokenRefreshFailed(_) => e,
            other => PlatformError::TokenRefreshFailed(other.to_string()),
        })
    }
}

async fn read_grant(resp: reqwest::Response, context: &str) -> Result<TokenGrant, PlatformError> {
    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        return Err(PlatformError::classify(status, format!("{} failed: {}", context, text), false));
    }

    serde_json::from_str(&text).map_err(|e| super::decode_error(context, e, &text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> OAuthClient {
        OAuthClient::new(
            YouTubeConfig {
                client_id: "yt-id".into(),
                client_secret: "yt-secret".into(),
                oauth_url: base.to_string(),
                api_url: base.to_string(),
            },
            FacebookConfig {
                app_id: "fb-app".into(),
                app_secret: "fb-secret".into(),
                graph_version: "v19.0".into(),
                graph_url: base.to_string(),
                rupload_url: base.to_string(),
            },
            TikTokConfig {
                client_key: "tt-key".into(),
                client_secret: "tt-secret".into(),
                api_url: base.to_string(),
            },
        )
    }

    fn connection(platform: Platform, refresh_token: Option<&str>) -> PlatformConnection {
        PlatformConnection {
            user_id: 1,
            platform,
            access_token: "old-token".into(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at: Utc::now(),
            platform_user_id: None,
        }
    }

    #[tokio::test]
    async fn test_youtube_refresh_uses_refresh_token_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = client(&server.uri())
            .refresh(&connection(Platform::Youtube, Some("r-1")))
            .await
            .unwrap();

        assert_eq!(grant.access_token, "new-token");
        assert_eq!(grant.expires_in, Some(3599));
    }

    #[tokio::test]
    async fn test_facebook_refresh_extends_long_lived_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v19.0/oauth/access_token"))
            .and(query_param("grant_type", "fb_exchange_token"))
            .and(query_param("fb_exchange_token", "old-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "long-lived",
                "token_type": "bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let now = Utc::now();
        let grant = client(&server.uri())
            .refresh(&connection(Platform::Facebook, None))
            .await
            .unwrap();

        assert_eq!(grant.access_token, "long-lived");
        let expires = grant.expires_at(Platform::Facebook, now);
        assert_eq!((expires - now).num_days(), 60);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_fails_softly() {
        let err = client("http://127.0.0.1:9")
            .refresh(&connection(Platform::Tiktok, None))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::TokenRefreshFailed(_)));
    }

    #[tokio::test]
    async fn test_tiktok_refresh_error_maps_to_refresh_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/oauth/token/"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Refresh token is invalid or expired."
            })))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .refresh(&connection(Platform::Tiktok, Some("stale")))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::TokenRefreshFailed(_)));
    }

    #[tokio::test]
    async fn test_tiktok_code_exchange_records_open_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/oauth/token/"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "act.1",
                "refresh_token": "rft.1",
                "expires_in": 86400,
                "open_id": "tt-user",
                "scope": "video.upload"
            })))
            .mount(&server)
            .await;

        let conn = client(&server.uri())
            .exchange_code(5, Platform::Tiktok, "code-1", "https://app/callback")
            .await
            .unwrap();

        assert_eq!(conn.user_id, 5);
        assert_eq!(conn.refresh_token.as_deref(), Some("rft.1"));
        assert_eq!(conn.platform_user_id.as_deref(), Some("tt-user"));
    }
}
