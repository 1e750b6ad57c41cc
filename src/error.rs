// Error taxonomy for destination operations
// Everything here is recovered at the destination boundary inside the
// dispatcher; nothing escapes `dispatch` as an error under normal operation.

use std::time::Duration;
use thiserror::Error;

/// Destination unreachable or misconfigured at startup. The destination is
/// excluded from the current dispatch and retried on the next call.
#[derive(Debug, Error)]
#[error("initialization failed: {0}")]
pub struct InitializationError(pub String);

/// Credentials invalid or interactive auth required. The destination is
/// excluded until resolved externally.
#[derive(Debug, Error)]
#[error("authentication failed: {0}")]
pub struct AuthError(pub String);

/// Recent-history fetch failed. The destination proceeds with its stale
/// window rather than being dropped.
#[derive(Debug, Error)]
#[error("scrobble refresh failed: {0}")]
pub struct RefreshError(pub String);

/// A single submission was rejected by the destination.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// Plain rejection. The batch continues with the next play.
    #[error("scrobble rejected: {0}")]
    Rejected(String),

    /// Rate limited, optionally with a server-supplied retry-after hint.
    /// Retried a bounded number of times before being treated as a plain
    /// rejection.
    #[error("rate limited by destination")]
    RateLimited { retry_after: Option<Duration> },

    /// Hard quota/ban condition. Remaining plays in the batch are abandoned
    /// for this destination and its lifecycle is reset.
    #[error("destination signalled a hard failure: {0}")]
    Fatal(String),
}

impl SubmissionError {
    /// Whether the remaining batch should be abandoned for this destination.
    pub fn aborts_batch(&self) -> bool {
        matches!(self, SubmissionError::Fatal(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SubmissionError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fatal_aborts_batch() {
        assert!(!SubmissionError::Rejected("nope".into()).aborts_batch());
        assert!(!SubmissionError::RateLimited { retry_after: None }.aborts_batch());
        assert!(SubmissionError::Fatal("daily limit".into()).aborts_batch());
    }

    #[test]
    fn retry_after_only_on_rate_limit() {
        let hint = Duration::from_secs(3);
        let err = SubmissionError::RateLimited {
            retry_after: Some(hint),
        };
        assert_eq!(err.retry_after(), Some(hint));
        assert_eq!(SubmissionError::Rejected("nope".into()).retry_after(), None);
    }
}
