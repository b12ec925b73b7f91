//! Application constants

use std::time::Duration;

const MB: usize = 1024 * 1024;

/// Largest accepted video upload (Facebook VIDEO cap)
pub const MAX_VIDEO_UPLOAD_SIZE: usize = 4096 * MB;

/// Facebook page video size cap
pub const FACEBOOK_VIDEO_MAX_BYTES: usize = 4096 * MB;

/// Facebook Reels size cap
pub const FACEBOOK_REELS_MAX_BYTES: usize = 1000 * MB;

/// Files above this size get the "large file" phase retry policy
pub const LARGE_FILE_THRESHOLD: usize = 100 * MB;

/// Refresh access tokens that expire within this window
pub const TOKEN_REFRESH_WINDOW_SECS: i64 = 5 * 60;

/// Phase-level retries (start/finish)
pub const PHASE_MAX_RETRIES: u32 = 3;
pub const PHASE_MAX_RETRIES_LARGE: u32 = 5;
pub const PHASE_BASE_DELAY: Duration = Duration::from_secs(2);
pub const PHASE_BASE_DELAY_LARGE: Duration = Duration::from_secs(5);

/// Chunk-level retries, linear backoff of (retry + 1) * step
pub const CHUNK_MAX_RETRIES: u32 = 3;
pub const CHUNK_RETRY_STEP: Duration = Duration::from_millis(2000);

/// Per-phase request timeouts
pub const START_TIMEOUT: Duration = Duration::from_secs(30);
pub const CHUNK_TIMEOUT: Duration = Duration::from_secs(180);
pub const FINISH_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for small JSON calls (token refresh, metadata updates)
pub const API_TIMEOUT: Duration = Duration::from_secs(30);

/// YouTube tag limits
pub const YOUTUBE_TAG_MAX_CHARS: usize = 30;
pub const YOUTUBE_TAGS_MAX_TOTAL_CHARS: usize = 500;
pub const YOUTUBE_DEFAULT_CATEGORY_ID: &str = "22";

/// Facebook only accepts scheduled publish times at least 10 minutes out
pub const FACEBOOK_MIN_SCHEDULE_LEAD_SECS: i64 = 10 * 60;

/// Instagram container status polling
pub const INSTAGRAM_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const INSTAGRAM_STATUS_MAX_POLLS: u32 = 60;

/// Default page size for paginated list endpoints
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Maximum page size for paginated list endpoints
pub const MAX_PAGE_SIZE: i64 = 100;

/// How often the status sweeper checks for posts whose schedule has passed
pub const SWEEP_INTERVAL_SECS: u64 = 60;
