//! Failure taxonomy for chain access.
//!
//! The distinctions matter for recovery: transport failures try the next
//! peer, upstream 429s back off and penalize the trusted-node bucket, proof
//! failures cool the serving peer, and `NotFound` is surfaced immediately.

use thiserror::Error;

use ar_gateway_validator::InvalidProofError;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request canceled before a response arrived")]
    Canceled,
    #[error("request timed out waiting for a response")]
    TimedOut,
    #[error("upstream rate limited the request")]
    RateLimited,
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("resource not found")]
    NotFound,
    #[error("no peer succeeded after {attempts} attempts")]
    NoPeerSucceeded { attempts: usize },
    #[error(transparent)]
    InvalidProof(#[from] InvalidProofError),
    /// A failure observed through a shared in-flight future; every waiter
    /// sees the same terminal error.
    #[error("{0}")]
    Shared(std::sync::Arc<ChainError>),
    #[error(transparent)]
    Other(#[from] eyre::Report),
}

impl ChainError {
    /// Whether the retry wrapper should try again. Genuinely absent
    /// resources and failed proofs never benefit from a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChainError::NotFound | ChainError::InvalidProof(_) => false,
            ChainError::Shared(inner) => inner.is_retryable(),
            _ => true,
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ChainError::TimedOut;
        }
        match err.status() {
            Some(status) if status.as_u16() == 429 => ChainError::RateLimited,
            Some(status) if status.as_u16() == 404 => ChainError::NotFound,
            _ => ChainError::Transport(err.to_string()),
        }
    }

    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            429 => ChainError::RateLimited,
            404 | 410 => ChainError::NotFound,
            _ => ChainError::Transport(format!("unexpected HTTP status {status}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_and_bad_proofs_are_not_retryable() {
        assert!(!ChainError::NotFound.is_retryable());
        assert!(!ChainError::InvalidProof(InvalidProofError::LeafHashMismatch).is_retryable());
        assert!(ChainError::TimedOut.is_retryable());
        assert!(ChainError::RateLimited.is_retryable());
    }

    #[test]
    fn status_codes_map_to_kinds() {
        assert!(matches!(
            ChainError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            ChainError::RateLimited
        ));
        assert!(matches!(
            ChainError::from_status(reqwest::StatusCode::NOT_FOUND),
            ChainError::NotFound
        ));
    }
}
