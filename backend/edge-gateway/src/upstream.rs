//! Errors and timeout wrapper shared by every call to a sibling service.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("{service} unreachable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },

    #[error("{service} timed out after {elapsed:?}")]
    Timeout {
        service: &'static str,
        elapsed: Duration,
    },

    #[error("{service} returned status {status}")]
    Status { service: &'static str, status: u16 },

    #[error("{service} response could not be decoded: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

impl UpstreamError {
    pub fn service(&self) -> &'static str {
        match self {
            UpstreamError::Unavailable { service, .. }
            | UpstreamError::Timeout { service, .. }
            | UpstreamError::Status { service, .. }
            | UpstreamError::Decode { service, .. } => service,
        }
    }
}

/// Bound a fallible upstream call so a slow sibling cannot stall the request path.
pub async fn with_timeout<F, T>(
    service: &'static str,
    duration: Duration,
    future: F,
) -> Result<T, UpstreamError>
where
    F: Future<Output = Result<T, UpstreamError>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout {
            service,
            elapsed: duration,
        }),
    }
}
