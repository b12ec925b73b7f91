//! Shared data models used across modules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};
use std::fmt;
use std::str::FromStr;

/// Implements TEXT-column sqlx codecs for a string-backed enum.
macro_rules! text_enum_codec {
    ($ty:ty) => {
        impl Type<Postgres> for $ty {
            fn type_info() -> PgTypeInfo {
                <String as Type<Postgres>>::type_info()
            }

            fn compatible(ty: &PgTypeInfo) -> bool {
                <String as Type<Postgres>>::compatible(ty)
            }
        }

        impl<'r> Decode<'r, Postgres> for $ty {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let s = <String as Decode<Postgres>>::decode(value)?;
                Ok(s.parse::<$ty>()?)
            }
        }

        impl Encode<'_, Postgres> for $ty {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
                <String as Encode<Postgres>>::encode_by_ref(&self.as_str().to_owned(), buf)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

/// A video platform a post can be distributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Facebook,
    Instagram,
    Tiktok,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Tiktok => "tiktok",
        }
    }

    /// Human-readable name for warnings shown to the user
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Youtube => "YouTube",
            Platform::Facebook => "Facebook",
            Platform::Instagram => "Instagram",
            Platform::Tiktok => "TikTok",
        }
    }
}

impl FromStr for Platform {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "youtube" => Ok(Platform::Youtube),
            "facebook" => Ok(Platform::Facebook),
            "instagram" => Ok(Platform::Instagram),
            "tiktok" => Ok(Platform::Tiktok),
            _ => Err(ParseEnumError {
                kind: "platform",
                value: s.to_string(),
            }),
        }
    }
}

text_enum_codec!(Platform);

/// Post-level status, derived from the per-platform rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Uploading,
    Pending,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Uploading => "uploading",
            PostStatus::Pending => "pending",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    /// Derive the post status from its platform rows.
    ///
    /// `pending` means every platform holds a video (`uploaded` or
    /// `published`); `published` once all of them are live. Any `failed`
    /// row makes the post `failed` until it is retried.
    pub fn derive(platforms: &[PostPlatform]) -> Self {
        if platforms.is_empty() {
            return PostStatus::Uploading;
        }
        if platforms.iter().any(|p| p.status == PlatformStatus::Failed) {
            return PostStatus::Failed;
        }
        if platforms.iter().all(|p| p.status == PlatformStatus::Published) {
            return PostStatus::Published;
        }
        if platforms.iter().all(|p| p.status.is_terminal_success()) {
            return PostStatus::Pending;
        }
        PostStatus::Uploading
    }
}

impl FromStr for PostStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(PostStatus::Uploading),
            "pending" => Ok(PostStatus::Pending),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            _ => Err(ParseEnumError {
                kind: "post status",
                value: s.to_string(),
            }),
        }
    }
}

text_enum_codec!(PostStatus);

/// Per-platform upload status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformStatus {
    Pending,
    Uploaded,
    Published,
    Failed,
}

impl PlatformStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformStatus::Pending => "pending",
            PlatformStatus::Uploaded => "uploaded",
            PlatformStatus::Published => "published",
            PlatformStatus::Failed => "failed",
        }
    }

    pub fn is_terminal_success(&self) -> bool {
        matches!(self, PlatformStatus::Uploaded | PlatformStatus::Published)
    }

    /// Allowed transitions: pending -> uploaded|failed, failed -> pending
    /// (retry only), uploaded -> published (schedule reached).
    pub fn can_transition_to(&self, next: PlatformStatus) -> bool {
        use PlatformStatus::*;
        matches!(
            (self, next),
            (Pending, Uploaded) | (Pending, Failed) | (Failed, Pending) | (Uploaded, Published)
        )
    }
}

impl FromStr for PlatformStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PlatformStatus::Pending),
            "uploaded" => Ok(PlatformStatus::Uploaded),
            "published" => Ok(PlatformStatus::Published),
            "failed" => Ok(PlatformStatus::Failed),
            _ => Err(ParseEnumError {
                kind: "platform status",
                value: s.to_string(),
            }),
        }
    }
}

text_enum_codec!(PlatformStatus);

/// OAuth credentials for one (user, platform) pair
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlatformConnection {
    pub user_id: i64,
    pub platform: Platform,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub platform_user_id: Option<String>,
}

/// A scheduled post record
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ScheduledPost {
    pub id: i64,
    #[serde(skip)]
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub scheduled_at: DateTime<Utc>,
    pub timezone: String,
    pub status: PostStatus,
    pub youtube_category_id: Option<String>,
    pub video_file_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-platform sub-record of a scheduled post
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PostPlatform {
    pub id: i64,
    pub post_id: i64,
    pub platform: Platform,
    pub platform_video_id: Option<String>,
    pub thumbnail_url: Option<String>,
    pub status: PlatformStatus,
    pub error_message: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Fields needed to insert a post and its platform rows
#[derive(Debug, Clone)]
pub struct NewScheduledPost {
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub scheduled_at: DateTime<Utc>,
    pub timezone: String,
    pub youtube_category_id: Option<String>,
    pub platforms: Vec<Platform>,
}

/// Post fields editable after creation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostMetadataUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(platform: Platform, status: PlatformStatus) -> PostPlatform {
        PostPlatform {
            id: 1,
            post_id: 1,
            platform,
            platform_video_id: None,
            thumbnail_url: None,
            status,
            error_message: None,
            uploaded_at: None,
        }
    }

    #[test]
    fn test_platform_parse_is_case_insensitive() {
        assert_eq!("YouTube".parse::<Platform>().unwrap(), Platform::Youtube);
        assert_eq!("tiktok".parse::<Platform>().unwrap(), Platform::Tiktok);
        assert!("myspace".parse::<Platform>().is_err());
    }

    #[test]
    fn test_post_status_derivation() {
        use PlatformStatus::*;

        let all_uploaded = [row(Platform::Youtube, Uploaded), row(Platform::Facebook, Published)];
        assert_eq!(PostStatus::derive(&all_uploaded), PostStatus::Pending);

        let one_failed = [row(Platform::Youtube, Uploaded), row(Platform::Facebook, Failed)];
        assert_eq!(PostStatus::derive(&one_failed), PostStatus::Failed);

        let in_flight = [row(Platform::Youtube, Uploaded), row(Platform::Tiktok, Pending)];
        assert_eq!(PostStatus::derive(&in_flight), PostStatus::Uploading);

        let live = [row(Platform::Youtube, Published), row(Platform::Tiktok, Published)];
        assert_eq!(PostStatus::derive(&live), PostStatus::Published);
    }

    #[test]
    fn test_platform_transitions() {
        use PlatformStatus::*;
        assert!(Pending.can_transition_to(Uploaded));
        assert!(Pending.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Uploaded));
        assert!(!Uploaded.can_transition_to(Pending));
    }
}
