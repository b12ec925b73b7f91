//! Facebook Graph API plumbing shared by the Facebook and Instagram adapters

use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::debug;

use super::error::PlatformError;
use crate::config::FacebookConfig;
use crate::constants::API_TIMEOUT;

/// Graph error codes that are safe to retry: unknown, service, app/user rate limits
const TRANSIENT_GRAPH_CODES: &[i64] = &[1, 2, 4, 17, 341];

/// `appsecret_proof` = hex(HMAC-SHA256(app_secret, access_token))
pub fn appsecret_proof(app_secret: &str, access_token: &str) -> String {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return String::new();
    };
    mac.update(access_token.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    is_transient: bool,
}

/// Map a Graph API error response into the shared taxonomy
pub fn graph_error(status: StatusCode, body: &str) -> PlatformError {
    match serde_json::from_str::<GraphErrorBody>(body) {
        Ok(parsed) => {
            let transient = parsed.error.is_transient
                || parsed
                    .error
                    .code
                    .is_some_and(|c| TRANSIENT_GRAPH_CODES.contains(&c));
            PlatformError::classify(status, parsed.error.message, transient)
        }
        Err(_) => PlatformError::classify(status, body.to_string(), false),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphId {
    pub id: String,
}

/// A Facebook Page the user manages, with its page-scoped token
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub access_token: String,
    #[serde(default)]
    pub instagram_business_account: Option<GraphId>,
}

#[derive(Debug, Deserialize)]
struct PageList {
    #[serde(default)]
    data: Vec<Page>,
}

#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    config: FacebookConfig,
}

impl GraphClient {
    pub fn new(config: FacebookConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &FacebookConfig {
        &self.config
    }

    /// Shared client without a global timeout, so uploads can bound themselves
    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn url(&self, path: &str) -> String {
        self.config.graph(path)
    }

    /// Token plus proof query parameters for an authenticated call
    pub fn auth_params(&self, access_token: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![("access_token", access_token.to_string())];
        if !self.config.app_secret.is_empty() {
            params.push((
                "appsecret_proof",
                appsecret_proof(&self.config.app_secret, access_token),
            ));
        }
        params
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
        params: &[(&str, &str)],
    ) -> Result<T, PlatformError> {
        let resp = self
            .http
            .get(self.url(path))
            .timeout(API_TIMEOUT)
            .query(&self.auth_params(access_token))
            .query(params)
            .send()
            .await?;
        read_json(resp, path).await
    }

    pub async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
        params: &[(&str, &str)],
    ) -> Result<T, PlatformError> {
        let resp = self
            .http
            .post(self.url(path))
            .timeout(API_TIMEOUT)
            .query(&self.auth_params(access_token))
            .form(params)
            .send()
            .await?;
        read_json(resp, path).await
    }

    /// Pick the requested page, or the first one the user manages
    pub async fn resolve_page(&self, user_token: &str, page_id: Option<&str>) -> Result<Page, PlatformError> {
        let pages: PageList = self
            .get_json(
                "me/accounts",
                user_token,
                &[("fields", "id,name,access_token,instagram_business_account")],
            )
            .await?;

        let page = match page_id {
            Some(wanted) => pages.data.into_iter().find(|p| p.id == wanted).ok_or_else(|| {
                PlatformError::Validation(format!(
                    "Facebook page {} is not managed by this account",
                    wanted
                ))
            })?,
            None => pages.data.into_iter().next().ok_or_else(|| {
                PlatformError::Permanent("No Facebook pages found for this account".to_string())
            })?,
        };

        debug!(page_id = %page.id, page_name = ?page.name, "Resolved Facebook page");
        Ok(page)
    }
}

pub async fn read_json<T: DeserializeOwned>(resp: reqwest::Response, context: &str) -> Result<T, PlatformError> {
    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        return Err(graph_error(status, &text));
    }

    serde_json::from_str(&text).map_err(|e| super::decode_error(context, e, &text))
}
