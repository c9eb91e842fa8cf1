//! Retry policy and failure taxonomy
//!
//! Every failure inside the live channel ends up in one of the
//! [`ErrorCategory`] buckets, which decides how it is surfaced to the user.

use std::fmt;
use std::time::Duration;

use crate::notify::Severity;

/// Reconnect budget and backoff shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Close events tolerated before the channel is abandoned
    pub max_retries: u32,

    /// Smallest delay ever scheduled
    pub floor: Duration,

    /// Delay added per retry already spent
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            floor: Duration::from_millis(500),
            step: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Create a policy that abandons on the first close
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before the reconnect scheduled while `retries` have been spent.
    ///
    /// `max(floor, step * retries)`: 500ms, 1000ms, 2000ms with the defaults.
    pub fn delay_for(&self, retries: u32) -> Duration {
        self.step.saturating_mul(retries).max(self.floor)
    }

    pub fn is_exhausted(&self, retries: u32) -> bool {
        retries >= self.max_retries
    }
}

/// Failure classes of the live channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Inbound frame is not a well-formed event
    Decode,

    /// Event names an action/type pair nobody handles
    Routing,

    /// Low-level socket or stream fault
    Transport,

    /// The channel closed, for any reason
    ConnectionClosed,

    /// Retry budget spent; needs an explicit reconnect
    RetryExhausted,

    /// Resync after (re)connect failed
    SnapshotFetch,
}

impl ErrorCategory {
    /// Whether the failure reaches the user as a notification, and how loud
    pub fn severity(&self) -> Option<Severity> {
        match self {
            ErrorCategory::Decode | ErrorCategory::Transport => None,
            ErrorCategory::Routing | ErrorCategory::ConnectionClosed => Some(Severity::Warning),
            ErrorCategory::SnapshotFetch | ErrorCategory::RetryExhausted => Some(Severity::Error),
        }
    }
}

/// Transport fault reported by a [`Connector`](crate::transport::Connector)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: {}", self.message)
    }
}

impl std::error::Error for TransportError {}

/// Categorize an error raised while resyncing a session.
///
/// Transport and body-decoding faults keep their own category; anything else
/// (non-2xx status, bad endpoint) is a snapshot fetch failure.
pub fn categorize_error(error: &anyhow::Error) -> ErrorCategory {
    if error.downcast_ref::<TransportError>().is_some() {
        return ErrorCategory::Transport;
    }
    if error.downcast_ref::<serde_json::Error>().is_some() {
        return ErrorCategory::Decode;
    }
    match error.downcast_ref::<reqwest::Error>() {
        Some(e) if e.is_decode() => ErrorCategory::Decode,
        Some(e) if e.is_connect() || e.is_timeout() => ErrorCategory::Transport,
        _ => ErrorCategory::SnapshotFetch,
    }
}
