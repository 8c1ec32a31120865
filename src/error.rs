//! Typed errors at the remote-service and query boundaries.
//!
//! Storage and configuration failures travel as [`anyhow::Error`]; the
//! types here exist where callers must branch on the failure kind.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single call to a generation service.
///
/// Every variant is absorbed into fallback content by the summarizer and
/// the query engine; none of them ends a run.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No provider is configured for this kind of request.
    #[error("generation provider is disabled")]
    Disabled,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("connection error: {0}")]
    Connection(String),

    /// The service answered but the payload was unusable.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// A local input (for example an image file) could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout(timeout)
        } else if err.is_decode() {
            ServiceError::Malformed(err.to_string())
        } else {
            ServiceError::Connection(err.to_string())
        }
    }

    pub(crate) fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.as_u16() == 429 {
            ServiceError::RateLimited(body)
        } else {
            ServiceError::Http {
                status: status.as_u16(),
                body,
            }
        }
    }
}

/// Retrieval failure, split by which side failed.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The query text could not be embedded. Transient for network providers.
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    /// The backing store could not be read.
    #[error("index storage failure: {0:#}")]
    Storage(anyhow::Error),
}

/// Reasons a query does not produce a [`RagResponse`](crate::models::RagResponse).
#[derive(Debug, Error)]
pub enum QueryError {
    /// Rejected before retrieval; no remote calls are made.
    #[error("question is empty")]
    EmptyQuestion,

    /// The knowledge index could not be read.
    #[error("knowledge index failure: {0:#}")]
    Index(#[source] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_maps_to_rate_limited() {
        let err = ServiceError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow".into());
        assert!(matches!(err, ServiceError::RateLimited(_)));

        let err = ServiceError::from_status(reqwest::StatusCode::BAD_GATEWAY, "down".into());
        assert_eq!(err.to_string(), "HTTP 502: down");
    }

    #[test]
    fn index_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("disk full").context("Failed to read vectors");
        let err = IndexError::Storage(inner);
        assert_eq!(
            err.to_string(),
            "index storage failure: Failed to read vectors: disk full"
        );
    }
}
