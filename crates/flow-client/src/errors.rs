use std::time::Duration;

/// Errors surfaced by the flow client.
///
/// Malformed frames inside a response body are never reported here; the event
/// reconstructor drops them and keeps the stream alive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input (for example an empty message).
    #[error("validation error: {0}")]
    Validation(String),
    /// Upload endpoint answered with a non-2xx status.
    #[error("upload failed with status {status}: {body}")]
    Upload { status: u16, body: String },
    /// Every attempt was answered with HTTP 429.
    #[error("rate limit exceeded{}", format_retry_after(.retry_after))]
    RateLimitExceeded {
        /// Last `Retry-After` hint seen, when the server sent one.
        retry_after: Option<Duration>,
    },
    /// Run endpoint answered with a non-2xx, non-429 status.
    #[error("flow request failed with status {status}: {body}")]
    Http { status: u16, body: String },
    /// Connection-level failure (connect, reset, timeout, body read).
    #[error("transport error: {0}")]
    Transport(String),
    /// Server response had an unexpected shape.
    #[error("protocol error: {0}")]
    Protocol(String),
}

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(" (retry after {:.1}s)", delay.as_secs_f64()),
        None => String::new(),
    }
}

impl FlowError {
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns true for errors caused by rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }

    /// Returns the HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upload { status, .. } | Self::Http { status, .. } => Some(*status),
            Self::RateLimitExceeded { .. } => Some(429),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FlowError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            Self::Transport(format!("request timed out: {value}"))
        } else {
            Self::Transport(value.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_message_includes_hint_when_present() {
        let err = FlowError::RateLimitExceeded {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(err.to_string(), "rate limit exceeded (retry after 5.0s)");
        assert!(err.is_rate_limited());
        assert_eq!(err.status(), Some(429));

        let err = FlowError::RateLimitExceeded { retry_after: None };
        assert_eq!(err.to_string(), "rate limit exceeded");
    }

    #[test]
    fn status_is_exposed_for_http_failures_only() {
        let upload = FlowError::Upload {
            status: 413,
            body: "too large".into(),
        };
        assert_eq!(upload.status(), Some(413));
        assert!(!upload.is_rate_limited());
        assert_eq!(FlowError::transport("reset").status(), None);
    }
}
