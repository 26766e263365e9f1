use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::principal::{AuthScheme, Principal, TokenFingerprint};
use super::{FailureReason, IdentityService, ValidationOutcome};
use crate::upstream::with_timeout;

/// Opaque API tokens, checked against the identity service.
pub struct OpaqueTokenValidator {
    identity: Arc<dyn IdentityService>,
    timeout: Duration,
}

impl OpaqueTokenValidator {
    pub fn new(identity: Arc<dyn IdentityService>, timeout: Duration) -> Self {
        Self { identity, timeout }
    }

    pub async fn validate(&self, token: &str) -> ValidationOutcome {
        let info = match with_timeout(
            "identity",
            self.timeout,
            self.identity.validate_opaque_token(token),
        )
        .await
        {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "Opaque token validation unavailable");
                return ValidationOutcome::Failure(FailureReason::Unavailable(e.to_string()));
            }
        };

        if !info.valid {
            debug!("Opaque token rejected by identity service");
            return ValidationOutcome::Failure(FailureReason::Rejected);
        }
        if info
            .expires_at
            .map_or(false, |exp| exp <= chrono::Utc::now())
        {
            return ValidationOutcome::Failure(FailureReason::Expired);
        }
        if info.tenant_id.trim().is_empty() {
            return ValidationOutcome::Failure(FailureReason::Malformed(
                "identity service returned no tenant".to_string(),
            ));
        }

        let fingerprint = match info.token_id.as_deref().filter(|id| !id.is_empty()) {
            Some(token_id) => TokenFingerprint::of(token_id),
            None => TokenFingerprint::of(token),
        };

        let principal = Principal::builder(AuthScheme::OpaqueToken, info.tenant_id)
            .user_id(info.user_id)
            .role(info.role)
            .permissions(info.permissions)
            .token_fingerprint(fingerprint)
            .build();

        ValidationOutcome::success(principal)
    }
}
