//! Engine-wide error kinds.
//!
//! Every failure the pipeline can observe maps onto one of these variants so
//! stages can decide locally whether to retry, skip, or surface. The HTTP
//! core only retries `RateLimited` and `ServerBusy`; strategies absorb
//! `DomainReject` / `Cooldown` / `CapacityExceeded` by skipping the market.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Network-level failure: connect error, TLS failure, or timeout.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Venue returned 429.
    #[error("rate limited by venue")]
    RateLimited,

    /// Venue returned a 5xx.
    #[error("server busy (status {0})")]
    ServerBusy(u16),

    /// Non-retryable 4xx other than 429.
    #[error("request rejected (status {status}): {message}")]
    ClientRejection { status: u16, message: String },

    /// Response body did not parse as the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Market fails a strategy precondition (missing tokens, mismatched
    /// outcome arrays, empty outcomes).
    #[error("market rejected: {0}")]
    DomainReject(String),

    /// A daily or per-order volume cap would be breached.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A recent execution blocks this (market, strategy) pair.
    #[error("cooldown active for {condition_id} ({strategy})")]
    Cooldown {
        condition_id: String,
        strategy: String,
    },

    /// No private key configured; order placement and contract calls are off.
    #[error("signing unavailable: no private key configured")]
    SigningUnavailable,

    /// The venue rejected an order that passed local checks.
    #[error("order rejected by venue: {0}")]
    Conflict(String),

    /// Task or stage was stopped while work was in flight.
    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    /// Classify an HTTP status code together with a body excerpt.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            429 => EngineError::RateLimited,
            s if s >= 500 => EngineError::ServerBusy(s),
            s => EngineError::ClientRejection {
                status: s,
                message: message.into(),
            },
        }
    }

    /// Status code carried by this error, if it originated from HTTP.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            EngineError::RateLimited => Some(429),
            EngineError::ServerBusy(s) => Some(*s),
            EngineError::ClientRejection { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the HTTP core's retry loop may re-attempt this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::RateLimited | EngineError::ServerBusy(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            EngineError::from_status(429, ""),
            EngineError::RateLimited
        ));
        assert!(matches!(
            EngineError::from_status(503, ""),
            EngineError::ServerBusy(503)
        ));
        assert!(matches!(
            EngineError::from_status(404, "not found"),
            EngineError::ClientRejection { status: 404, .. }
        ));
    }

    #[test]
    fn retryability() {
        assert!(EngineError::RateLimited.is_retryable());
        assert!(EngineError::ServerBusy(502).is_retryable());
        assert!(!EngineError::from_status(400, "bad").is_retryable());
        assert!(!EngineError::Transport("timeout".into()).is_retryable());
        assert!(!EngineError::SigningUnavailable.is_retryable());
    }
}
