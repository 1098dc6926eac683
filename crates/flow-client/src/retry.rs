use std::time::Duration;

use chrono::{DateTime, Utc};

/// Rate-limit retry settings for one run call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first request.
    pub max_retries: u32,
    /// Backoff before the first retry when the server sends no `Retry-After`.
    /// Doubles with each further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub(crate) fn start(&self) -> RetryState {
        RetryState {
            attempt: 0,
            max_retries: self.max_retries,
            base_delay: self.base_delay,
        }
    }
}

/// Retry bookkeeping for one logical call, passed by value from one physical
/// attempt to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Zero-based index of the current attempt.
    pub attempt: u32,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryState {
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_retries
    }

    /// Delay before the next attempt: the server hint when present, otherwise
    /// `base_delay * 2^attempt`.
    pub fn backoff(&self, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| {
            2u32.checked_pow(self.attempt)
                .and_then(|factor| self.base_delay.checked_mul(factor))
                .unwrap_or(Duration::MAX)
        })
    }

    pub fn next(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }
}

/// Suspends the calling task between attempts.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// `Sleeper` backed by the tokio timer; only the awaiting task is suspended.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Parses a `Retry-After` header value: delta-seconds (fractions accepted)
/// or an HTTP date. Dates in the past yield zero; values too large for a
/// `Duration` are ignored.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    Some(
        at.with_timezone(&Utc)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}
