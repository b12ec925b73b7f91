//! Vendor adapters behind one interface.
//!
//! The orchestrator only sees [`PlatformAdapter`]; each vendor module maps
//! the shared request types onto its own wire protocol.

pub mod chunked;
pub mod error;
pub mod facebook;
pub mod graph;
pub mod instagram;
pub mod oauth;
pub mod retry;
pub mod tiktok;
pub mod youtube;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::Platform;

pub use chunked::UploadedVideo;
pub use error::PlatformError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacebookVideoType {
    #[default]
    Video,
    Reels,
}

/// Per-request platform knobs carried with publish/process/retry calls
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformOptions {
    #[serde(default)]
    pub facebook_page_id: Option<String>,
    #[serde(default)]
    pub facebook_video_type: FacebookVideoType,
    #[serde(default)]
    pub tiktok_privacy_level: Option<String>,
    #[serde(default)]
    pub youtube_privacy_status: Option<String>,
}

/// Everything an adapter needs to upload one video
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub video: Bytes,
    pub content_type: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub scheduled_at: DateTime<Utc>,
    pub category_id: Option<String>,
    pub options: PlatformOptions,
}

/// Post-upload metadata edit. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct MetadataChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    /// Keep whatever tags the platform already has
    pub skip_tags: bool,
    pub category_id: Option<String>,
    pub options: PlatformOptions,
}

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Whether tags are sent as platform keywords
    fn supports_tags(&self) -> bool {
        false
    }

    /// Whether tags are rendered as hashtags inside the description, so a
    /// description edit must carry the tags along
    fn tags_in_caption(&self) -> bool {
        false
    }

    fn supports_title_updates(&self) -> bool {
        true
    }

    async fn upload_video(&self, user_id: i64, request: &UploadRequest) -> Result<UploadedVideo, PlatformError>;

    async fn update_metadata(
        &self,
        _user_id: i64,
        _video_id: &str,
        _changes: &MetadataChanges,
    ) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported {
            platform: self.platform(),
            operation: "metadata updates",
        })
    }

    async fn update_schedule(
        &self,
        _user_id: i64,
        _video_id: &str,
        _scheduled_at: DateTime<Utc>,
    ) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported {
            platform: self.platform(),
            operation: "rescheduling",
        })
    }
}

/// Adapter lookup by platform
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapters.insert(adapter.platform(), adapter);
        self
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn PlatformAdapter>, PlatformError> {
        self.adapters
            .get(&platform)
            .cloned()
            .ok_or(PlatformError::Unsupported {
                platform,
                operation: "uploads",
            })
    }
}

/// Map a non-JSON or undecodable body into a permanent error
pub(crate) fn decode_error(context: &str, e: impl std::fmt::Display, body: &str) -> PlatformError {
    PlatformError::Permanent(format!("Failed to parse {} response: {} - body: {}", context, e, body))
}
