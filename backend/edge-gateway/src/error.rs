//! Caller-facing error taxonomy for the edge gateway.
//!
//! Every admission-layer failure is resolved into one of these variants before
//! a business resolver runs. HTTP surfaces render them through `ResponseError`;
//! the GraphQL executor sees them as `ServerError`s carrying an `extensions.code`.

use actix_web::{
    http::{header, StatusCode},
    HttpResponse, ResponseError,
};
use async_graphql::{ErrorExtensionValues, ServerError};
use serde::Serialize;

use crate::upstream::UpstreamError;

/// Generic message for every authentication failure. Which scheme failed is never exposed.
pub const AUTH_ERROR_MESSAGE: &str = "Authentication required";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("{}", AUTH_ERROR_MESSAGE)]
    Auth,

    #[error("Rate limit exceeded: {limit} requests per window, retry after {retry_after_secs}s")]
    RateLimitExceeded { limit: u32, retry_after_secs: u64 },

    #[error("Query complexity {value} exceeds maximum allowed complexity {ceiling}")]
    ComplexityExceeded { value: u64, ceiling: u64 },

    #[error("Query depth {value} exceeds maximum allowed depth {ceiling}")]
    DepthExceeded { value: usize, ceiling: usize },

    /// Detail is for logs only; the rendered body is generic.
    #[error("Upstream service unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable code, shared by HTTP bodies and GraphQL extensions.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Auth => "UNAUTHENTICATED",
            GatewayError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            GatewayError::ComplexityExceeded { .. } => "COMPLEXITY_EXCEEDED",
            GatewayError::DepthExceeded { .. } => "DEPTH_EXCEEDED",
            GatewayError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            GatewayError::BadRequest(_) => "BAD_REQUEST",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Auth => "authentication_error",
            GatewayError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            GatewayError::ComplexityExceeded { .. } | GatewayError::DepthExceeded { .. } => {
                "query_cost_error"
            }
            GatewayError::BadRequest(_) | GatewayError::PayloadTooLarge { .. } => {
                "validation_error"
            }
            GatewayError::NotFound(_) => "not_found_error",
            GatewayError::UpstreamUnavailable(_) | GatewayError::Internal(_) => "server_error",
        }
    }

    /// Message safe to show the caller.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::UpstreamUnavailable(_) => "Service temporarily unavailable".to_string(),
            GatewayError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Render as a GraphQL error with `extensions.code` set.
    pub fn to_server_error(&self) -> ServerError {
        let mut err = ServerError::new(self.public_message(), None);
        let mut extensions = ErrorExtensionValues::default();
        extensions.set("code", self.code());
        match self {
            GatewayError::ComplexityExceeded { value, ceiling } => {
                extensions.set("value", *value);
                extensions.set("ceiling", *ceiling);
            }
            GatewayError::DepthExceeded { value, ceiling } => {
                extensions.set("value", *value as u64);
                extensions.set("ceiling", *ceiling as u64);
            }
            GatewayError::RateLimitExceeded {
                retry_after_secs, ..
            } => {
                extensions.set("retryAfter", *retry_after_secs);
            }
            _ => {}
        }
        err.extensions = Some(extensions);
        err
    }
}

/// 404 and 400-class replies keep their meaning; everything else is an outage.
impl From<UpstreamError> for GatewayError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Status { service, status: 404 } => {
                GatewayError::NotFound(format!("{service} has no such resource"))
            }
            UpstreamError::Status {
                service,
                status: 400 | 422,
            } => GatewayError::BadRequest(format!("{service} rejected the request")),
            other => GatewayError::UpstreamUnavailable(other.service().to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Auth => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::ComplexityExceeded { .. }
            | GatewayError::DepthExceeded { .. }
            | GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (limit, retry_after) = match self {
            GatewayError::RateLimitExceeded {
                limit,
                retry_after_secs,
            } => (Some(*limit), Some(*retry_after_secs)),
            _ => (None, None),
        };

        let body = ErrorResponse {
            error: self.error_type(),
            code: self.code(),
            message: self.public_message(),
            limit,
            retry_after,
        };

        let mut builder = HttpResponse::build(self.status_code());
        if let Some(secs) = retry_after {
            builder.insert_header((header::RETRY_AFTER, secs.to_string()));
        }
        builder.json(body)
    }
}
