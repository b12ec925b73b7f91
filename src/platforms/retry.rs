//! Retry policy shared by every adapter and the chunked uploader
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::error::PlatformError;
use crate::constants::{
    CHUNK_MAX_RETRIES, CHUNK_RETRY_STEP, LARGE_FILE_THRESHOLD, PHASE_BASE_DELAY,
    PHASE_BASE_DELAY_LARGE, PHASE_MAX_RETRIES, PHASE_MAX_RETRIES_LARGE,
};

/// Delay schedule between attempts. Not randomized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^retry`
    Exponential { base: Duration },
    /// `(retry + 1) * step`
    Linear { step: Duration },
}

impl Backoff {
    /// Delay before the retry numbered `retry` (0 = first retry)
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Exponential { base } => base.saturating_mul(2u32.saturating_pow(retry)),
            Backoff::Linear { step } => step.saturating_mul(retry + 1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Decides whether a failure is worth another attempt
    pub is_transient: fn(&PlatformError) -> bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
            is_transient: PlatformError::is_transient,
        }
    }

    /// Session start/finish policy, scaled by payload size
    pub fn for_phase(total_bytes: usize) -> Self {
        if total_bytes > LARGE_FILE_THRESHOLD {
            Self::new(
                PHASE_MAX_RETRIES_LARGE,
                Backoff::Exponential {
                    base: PHASE_BASE_DELAY_LARGE,
                },
            )
        } else {
            Self::new(
                PHASE_MAX_RETRIES,
                Backoff::Exponential {
                    base: PHASE_BASE_DELAY,
                },
            )
        }
    }

    /// Per-chunk transfer policy
    pub fn for_chunk() -> Self {
        Self::new(
            CHUNK_MAX_RETRIES,
            Backoff::Linear {
                step: CHUNK_RETRY_STEP,
            },
        )
    }

    /// A single attempt, no retries
    pub fn none() -> Self {
        Self::new(0, Backoff::Linear { step: Duration::ZERO })
    }

    pub fn with_predicate(mut self, is_transient: fn(&PlatformError) -> bool) -> Self {
        self.is_transient = is_transient;
        self
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// retry budget is spent. The last error is returned unchanged.
    pub async fn run<F, Fut, T>(&self, label: &str, mut op: F) -> Result<T, PlatformError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
    {
        let mut retry = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if retry < self.max_retries && (self.is_transient)(&e) => {
                    let delay = self.backoff.delay(retry);
                    warn!(
                        operation = label,
                        attempt = retry + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Bound a platform call; elapsing counts as a transient failure
pub async fn with_timeout<T, Fut>(duration: Duration, label: &str, fut: Fut) -> Result<T, PlatformError>
where
    Fut: Future<Output = Result<T, PlatformError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(PlatformError::Transient(format!(
            "{} timed out after {}s",
            label,
            duration.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_schedules() {
        let exp = Backoff::Exponential {
            base: Duration::from_secs(2),
        };
        assert_eq!(exp.delay(0), Duration::from_secs(2));
        assert_eq!(exp.delay(1), Duration::from_secs(4));
        assert_eq!(exp.delay(2), Duration::from_secs(8));

        let lin = Backoff::Linear {
            step: Duration::from_millis(2000),
        };
        assert_eq!(lin.delay(0), Duration::from_millis(2000));
        assert_eq!(lin.delay(1), Duration::from_millis(4000));
        assert_eq!(lin.delay(2), Duration::from_millis(6000));
    }

    #[test]
    fn test_phase_policy_scales_with_size() {
        let small = RetryPolicy::for_phase(50 * 1024 * 1024);
        assert_eq!(small.max_retries, 3);
        assert_eq!(small.backoff.delay(0), Duration::from_secs(2));

        let large = RetryPolicy::for_phase(150 * 1024 * 1024);
        assert_eq!(large.max_retries, 5);
        assert_eq!(large.backoff.delay(0), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = RetryPolicy::for_chunk()
            .run("chunk", move || {
                let count = counter_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(PlatformError::Transient("connection reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_budget() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), _> = RetryPolicy::for_chunk()
            .run("chunk", move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(PlatformError::Transient("503".into())) }
            })
            .await;

        assert!(matches!(result, Err(PlatformError::Transient(_))));
        // Initial attempt + 3 retries
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), _> = RetryPolicy::for_phase(1024)
            .run("start", move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(PlatformError::Permanent("invalid file".into())) }
            })
            .await;

        assert!(matches!(result, Err(PlatformError::Permanent(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_delays_elapse() {
        let start = tokio::time::Instant::now();

        let _: Result<(), _> = RetryPolicy::for_phase(1024)
            .run("start", || async { Err(PlatformError::Transient("busy".into())) })
            .await;

        // 2s + 4s + 8s
        assert!(start.elapsed() >= Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient() {
        let result: Result<(), _> = with_timeout(Duration::from_secs(1), "finish", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_transient());
    }
}
