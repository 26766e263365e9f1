use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::OperationClass;
use crate::auth::{AuthScheme, Principal};
use crate::upstream::UpstreamError;

/// Header carrying an x402-style payment authorization from the caller.
pub const PAYMENT_HEADER: &str = "X-PAYMENT";

/// Body of `AuthorizeOverflow`. Scoped to the caller, not the tenant.
#[derive(Debug, Clone, Serialize)]
pub struct OverflowRequest {
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub auth_scheme: AuthScheme,
    pub surface: &'static str,
    pub operation: String,
    pub payment: Option<String>,
    pub client_ip: String,
}

impl OverflowRequest {
    pub fn new(principal: &Principal, operation: &OperationClass, payment: Option<String>, client_ip: String) -> Self {
        Self {
            tenant_id: principal.tenant_id().to_string(),
            user_id: principal.user_id().map(str::to_string),
            auth_scheme: principal.scheme(),
            surface: operation.surface.as_str(),
            operation: operation.name.clone(),
            payment,
            client_ip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct OverflowVerdict {
    pub authorized: bool,
    /// Per-use price charged for the admitted request, in the payment service's minor unit.
    #[serde(default)]
    pub cost: u64,
}

#[async_trait]
pub trait OverflowAuthorizer: Send + Sync {
    async fn authorize_overflow(&self, request: &OverflowRequest) -> Result<OverflowVerdict, UpstreamError>;
}
