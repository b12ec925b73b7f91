//! Three-phase chunked upload: start a session, transfer chunks, finish.
//!
//! Each platform that needs resumable transfer implements [`ChunkedProtocol`];
//! [`ChunkedUploader`] drives it with per-phase timeouts and retries.

use async_trait::async_trait;
use std::ops::Range;
use std::time::Duration;
use tracing::{debug, error, info};

use super::error::PlatformError;
use super::retry::{RetryPolicy, with_timeout};
use crate::constants::{CHUNK_TIMEOUT, FINISH_TIMEOUT, START_TIMEOUT};

const MB: usize = 1024 * 1024;

/// Tiered chunk size: bigger files get bigger chunks
pub fn chunk_size_for(total_bytes: usize) -> usize {
    if total_bytes < 20 * MB {
        2 * MB
    } else if total_bytes <= 100 * MB {
        5 * MB
    } else if total_bytes <= 500 * MB {
        10 * MB
    } else {
        20 * MB
    }
}

/// How a payload is split into byte ranges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub total_bytes: usize,
    pub chunk_size: usize,
    /// Fold a short trailing remainder into the last full chunk
    pub merge_remainder: bool,
}

impl ChunkPlan {
    pub fn tiered(total_bytes: usize) -> Self {
        Self::with_chunk_size(total_bytes, chunk_size_for(total_bytes))
    }

    pub fn with_chunk_size(total_bytes: usize, chunk_size: usize) -> Self {
        Self {
            total_bytes,
            chunk_size: chunk_size.max(1),
            merge_remainder: false,
        }
    }

    pub fn merge_remainder(mut self) -> Self {
        self.merge_remainder = true;
        self
    }

    pub fn chunk_count(&self) -> usize {
        if self.total_bytes == 0 {
            return 0;
        }
        if self.merge_remainder {
            (self.total_bytes / self.chunk_size).max(1)
        } else {
            self.total_bytes.div_ceil(self.chunk_size)
        }
    }

    pub fn ranges(&self) -> Vec<Range<usize>> {
        let count = self.chunk_count();
        (0..count)
            .map(|i| {
                let start = i * self.chunk_size;
                let end = if i + 1 == count {
                    self.total_bytes
                } else {
                    (start + self.chunk_size).min(self.total_bytes)
                };
                start..end
            })
            .collect()
    }
}

/// Server-side handle returned by the start phase
#[derive(Debug, Clone, Default)]
pub struct UploadSession {
    pub session_id: String,
    pub upload_url: Option<String>,
    pub video_id: Option<String>,
}

/// One byte range of the payload
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    pub index: usize,
    pub total_chunks: usize,
    pub offset: usize,
    pub total_bytes: usize,
    pub data: &'a [u8],
}

impl Chunk<'_> {
    /// Inclusive end offset, as used by `Content-Range`
    pub fn last_byte(&self) -> usize {
        self.offset + self.data.len().saturating_sub(1)
    }
}

/// Result of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedVideo {
    pub video_id: String,
    pub thumbnail_url: Option<String>,
}

/// Platform-specific wire protocol for a chunked upload
#[async_trait]
pub trait ChunkedProtocol: Send + Sync {
    fn name(&self) -> &'static str;

    fn plan(&self, total_bytes: usize) -> ChunkPlan {
        ChunkPlan::tiered(total_bytes)
    }

    async fn start(&self, plan: &ChunkPlan) -> Result<UploadSession, PlatformError>;

    async fn transfer(&self, session: &UploadSession, chunk: &Chunk<'_>) -> Result<(), PlatformError>;

    async fn finish(&self, session: &UploadSession) -> Result<UploadedVideo, PlatformError>;
}

#[derive(Debug, Clone, Copy)]
pub struct PhaseTimeouts {
    pub start: Duration,
    pub chunk: Duration,
    pub finish: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            start: START_TIMEOUT,
            chunk: CHUNK_TIMEOUT,
            finish: FINISH_TIMEOUT,
        }
    }
}

/// Drives a [`ChunkedProtocol`] with retries and timeouts
#[derive(Debug, Clone)]
pub struct ChunkedUploader {
    timeouts: PhaseTimeouts,
    phase_policy: Option<RetryPolicy>,
    chunk_policy: RetryPolicy,
}

impl Default for ChunkedUploader {
    fn default() -> Self {
        Self {
            timeouts: PhaseTimeouts::default(),
            phase_policy: None,
            chunk_policy: RetryPolicy::for_chunk(),
        }
    }
}

impl ChunkedUploader {
    pub fn new(timeouts: PhaseTimeouts) -> Self {
        Self {
            timeouts,
            ..Default::default()
        }
    }

    /// Fix the start/finish policy instead of deriving it from file size
    pub fn with_phase_policy(mut self, policy: RetryPolicy) -> Self {
        self.phase_policy = Some(policy);
        self
    }

    pub fn with_chunk_policy(mut self, policy: RetryPolicy) -> Self {
        self.chunk_policy = policy;
        self
    }

    pub async fn upload<P>(&self, protocol: &P, data: &[u8]) -> Result<UploadedVideo, PlatformError>
    where
        P: ChunkedProtocol + ?Sized,
    {
        self.upload_with_progress(protocol, data, |_, _| {}).await
    }

    /// Upload with a progress callback receiving (current_chunk, total_chunks)
    pub async fn upload_with_progress<P, F>(
        &self,
        protocol: &P,
        data: &[u8],
        on_progress: F,
    ) -> Result<UploadedVideo, PlatformError>
    where
        P: ChunkedProtocol + ?Sized,
        F: Fn(usize, usize) + Send + Sync,
    {
        if data.is_empty() {
            return Err(PlatformError::Validation("Video file is empty".to_string()));
        }

        let plan = protocol.plan(data.len());
        let ranges = plan.ranges();
        let total_chunks = ranges.len();
        let phase_policy = self
            .phase_policy
            .unwrap_or_else(|| RetryPolicy::for_phase(data.len()));

        info!(
            platform = protocol.name(),
            total_bytes = data.len(),
            chunk_size = plan.chunk_size,
            chunks = total_chunks,
            "Starting chunked upload"
        );

        let session = phase_policy
            .run("upload start", || {
                with_timeout(self.timeouts.start, "Upload start", protocol.start(&plan))
            })
            .await?;

        debug!(platform = protocol.name(), session_id = %session.session_id, "Upload session opened");

        for (index, range) in ranges.into_iter().enumerate() {
            on_progress(index, total_chunks);

            let chunk = Chunk {
                index,
                total_chunks,
                offset: range.start,
                total_bytes: data.len(),
                data: &data[range],
            };

            debug!(
                platform = protocol.name(),
                chunk = index + 1,
                total_chunks,
                bytes = chunk.data.len(),
                "Transferring chunk"
            );

            self.chunk_policy
                .run("chunk transfer", || {
                    with_timeout(
                        self.timeouts.chunk,
                        "Chunk transfer",
                        protocol.transfer(&session, &chunk),
                    )
                })
                .await
                .map_err(|e| {
                    error!(
                        platform = protocol.name(),
                        chunk = index + 1,
                        total_chunks,
                        error = %e,
                        "Chunk failed after retries"
                    );
                    e
                })?;
        }

        on_progress(total_chunks, total_chunks);

        let uploaded = phase_policy
            .run("upload finish", || {
                with_timeout(self.timeouts.finish, "Upload finish", protocol.finish(&session))
            })
            .await?;

        info!(platform = protocol.name(), video_id = %uploaded.video_id, "Chunked upload complete");
        Ok(uploaded)
    }
}
