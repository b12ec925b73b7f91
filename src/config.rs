//! Process configuration, read once at startup

use serde::Deserialize;
use std::path::PathBuf;

fn default_port() -> u16 {
    3000
}

fn default_bucket_name() -> String {
    "crosspost_videos".to_string()
}

fn default_graph_version() -> String {
    "v19.0".to_string()
}

fn default_google_oauth_url() -> String {
    "https://oauth2.googleapis.com".to_string()
}

fn default_youtube_api_url() -> String {
    "https://www.googleapis.com".to_string()
}

fn default_graph_api_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_rupload_url() -> String {
    "https://rupload.facebook.com".to_string()
}

fn default_tiktok_api_url() -> String {
    "https://open.tiktokapis.com".to_string()
}

/// Deserialized from the environment by `envy` (`PORT` -> `port`, ...)
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Without a database the service runs on in-memory repositories
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub local_storage_path: Option<PathBuf>,
    #[serde(default = "default_bucket_name")]
    pub bucket_name: String,

    #[serde(default)]
    pub youtube_client_id: String,
    #[serde(default)]
    pub youtube_client_secret: String,
    #[serde(default = "default_google_oauth_url")]
    pub google_oauth_url: String,
    #[serde(default = "default_youtube_api_url")]
    pub youtube_api_url: String,

    #[serde(default)]
    pub facebook_app_id: String,
    #[serde(default)]
    pub facebook_app_secret: String,
    #[serde(default = "default_graph_version")]
    pub facebook_graph_version: String,
    #[serde(default = "default_graph_api_url")]
    pub facebook_graph_url: String,
    #[serde(default = "default_rupload_url")]
    pub facebook_rupload_url: String,

    #[serde(default)]
    pub tiktok_client_key: String,
    #[serde(default)]
    pub tiktok_client_secret: String,
    #[serde(default = "default_tiktok_api_url")]
    pub tiktok_api_url: String,
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env::<AppConfig>()
    }

    pub fn youtube(&self) -> YouTubeConfig {
        YouTubeConfig {
            client_id: self.youtube_client_id.clone(),
            client_secret: self.youtube_client_secret.clone(),
            oauth_url: self.google_oauth_url.clone(),
            api_url: self.youtube_api_url.clone(),
        }
    }

    pub fn facebook(&self) -> FacebookConfig {
        FacebookConfig {
            app_id: self.facebook_app_id.clone(),
            app_secret: self.facebook_app_secret.clone(),
            graph_version: self.facebook_graph_version.clone(),
            graph_url: self.facebook_graph_url.clone(),
            rupload_url: self.facebook_rupload_url.clone(),
        }
    }

    pub fn tiktok(&self) -> TikTokConfig {
        TikTokConfig {
            client_key: self.tiktok_client_key.clone(),
            client_secret: self.tiktok_client_secret.clone(),
            api_url: self.tiktok_api_url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct YouTubeConfig {
    pub client_id: String,
    pub client_secret: String,
    pub oauth_url: String,
    /// Hosts both the Data API and the `/upload` endpoints
    pub api_url: String,
}

/// Shared by the Facebook and Instagram adapters
#[derive(Debug, Clone)]
pub struct FacebookConfig {
    pub app_id: String,
    pub app_secret: String,
    pub graph_version: String,
    pub graph_url: String,
    pub rupload_url: String,
}

impl FacebookConfig {
    /// `https://graph.facebook.com/v19.0/{path}`
    pub fn graph(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.graph_url.trim_end_matches('/'),
            self.graph_version,
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone)]
pub struct TikTokConfig {
    pub client_key: String,
    pub client_secret: String,
    pub api_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_optional_fields() {
        let vars = vec![("JWT_SECRET".to_string(), "secret".to_string())];
        let config: AppConfig = envy::from_iter(vars).unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.bucket_name, "crosspost_videos");
        assert!(config.database_url.is_none());
        assert_eq!(
            config.facebook().graph("/me/accounts"),
            "https://graph.facebook.com/v19.0/me/accounts"
        );
    }

    #[test]
    fn test_missing_jwt_secret_is_an_error() {
        let vars: Vec<(String, String)> = vec![("PORT".to_string(), "8080".to_string())];
        assert!(envy::from_iter::<_, AppConfig>(vars).is_err());
    }
}
