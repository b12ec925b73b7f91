//! Normalized failure surface shared by every platform adapter

use reqwest::StatusCode;

use crate::models::Platform;

/// Substrings that identify a missing OAuth scope or revoked permission
const SCOPE_PATTERNS: &[&str] = &[
    "permission",
    "scope",
    "not authorized",
    "insufficient",
    "unauthorized_client",
    "access_token_invalid",
];

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("{} account is not connected", .0.display_name())]
    NotConnected(Platform),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),

    #[error("{0}")]
    ScopeInsufficient(String),

    #[error("{} does not support {operation}", .platform.display_name())]
    Unsupported {
        platform: Platform,
        operation: &'static str,
    },

    #[error("{0}")]
    Validation(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl PlatformError {
    /// Whether the failed call may be retried unchanged
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Transient(_) => true,
            PlatformError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().is_some_and(is_retryable_status)
            }
            _ => false,
        }
    }

    /// Map a vendor error response into the taxonomy.
    ///
    /// `vendor_transient` is the vendor's own retry hint (Graph API
    /// `is_transient`, TikTok `rate_limit_exceeded`, ...).
    pub fn classify(status: StatusCode, message: impl Into<String>, vendor_transient: bool) -> Self {
        let message = message.into();
        if is_scope_error(&message) || (status == StatusCode::FORBIDDEN && message.is_empty()) {
            return PlatformError::ScopeInsufficient(message);
        }
        if vendor_transient || is_retryable_status(status) {
            return PlatformError::Transient(format!("Status {}: {}", status, message));
        }
        PlatformError::Permanent(format!("Status {}: {}", status, message))
    }

    /// Message stored on the platform row and shown to the user
    pub fn user_message(&self) -> String {
        match self {
            PlatformError::ScopeInsufficient(msg) => format!(
                "{}. Please reconnect your account to grant the required permissions.",
                msg
            ),
            PlatformError::NotConnected(platform) => format!(
                "{} account is not connected. Connect it and try again.",
                platform.display_name()
            ),
            other => {
                let msg = other.to_string();
                if is_scope_error(&msg) {
                    format!("{}. Please reconnect your account.", msg)
                } else {
                    msg
                }
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Case-insensitive substring match against known permission failures
pub fn is_scope_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    SCOPE_PATTERNS.iter().any(|p| lower.contains(p))
}
