use std::sync::Arc;
use std::time::Duration;

use actix_web::http::header::HeaderMap;
use serde::Serialize;
use tracing::{debug, warn};

use super::principal::{AuthScheme, Principal};
use super::{FailureReason, IdentityService, ValidationOutcome};
use crate::upstream::with_timeout;

pub const WALLET_ADDRESS_HEADER: &str = "X-Wallet-Address";
pub const WALLET_SIGNATURE_HEADER: &str = "X-Wallet-Signature";
pub const WALLET_MESSAGE_HEADER: &str = "X-Wallet-Message";

/// Signed-message proof of wallet ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletProof {
    pub address: String,
    pub signature: String,
    pub message: String,
}

impl WalletProof {
    /// All three parts must be present and non-empty.
    pub fn new(address: &str, signature: &str, message: &str) -> Option<Self> {
        let (address, signature, message) = (address.trim(), signature.trim(), message.trim());
        if address.is_empty() || signature.is_empty() || message.is_empty() {
            return None;
        }
        Some(Self {
            address: address.to_string(),
            signature: signature.to_string(),
            message: message.to_string(),
        })
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("");
        Self::new(
            get(WALLET_ADDRESS_HEADER),
            get(WALLET_SIGNATURE_HEADER),
            get(WALLET_MESSAGE_HEADER),
        )
    }
}

pub struct WalletValidator {
    identity: Arc<dyn IdentityService>,
    timeout: Duration,
}

impl WalletValidator {
    pub fn new(identity: Arc<dyn IdentityService>, timeout: Duration) -> Self {
        Self { identity, timeout }
    }

    pub async fn validate(&self, proof: &WalletProof) -> ValidationOutcome {
        let result = match with_timeout("identity", self.timeout, self.identity.wallet_login(proof))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Wallet login unavailable");
                return ValidationOutcome::Failure(FailureReason::Unavailable(e.to_string()));
            }
        };

        let user = match (result.verified, result.user) {
            (true, Some(user)) => user,
            _ => {
                debug!(address = %proof.address, "Wallet signature not verified");
                return ValidationOutcome::Failure(FailureReason::Rejected);
            }
        };

        if user.tenant_id.trim().is_empty() {
            debug!(address = %proof.address, "Wallet login returned no tenant");
            return ValidationOutcome::Failure(FailureReason::Malformed(
                "identity service returned no tenant".to_string(),
            ));
        }

        let principal = Principal::builder(AuthScheme::Wallet, user.tenant_id)
            .user_id(user.user_id)
            .email(user.email)
            .role(user.role)
            .build();

        ValidationOutcome::Success {
            principal,
            issued_token: result.issued_token.filter(|t| !t.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{OpaqueTokenInfo, WalletLoginResult, WalletUser};
    use crate::upstream::UpstreamError;
    use actix_web::http::header::{HeaderName, HeaderValue};
    use async_trait::async_trait;

    struct FixedLogin(WalletLoginResult);

    #[async_trait]
    impl IdentityService for FixedLogin {
        async fn validate_opaque_token(&self, _: &str) -> Result<OpaqueTokenInfo, UpstreamError> {
            Ok(OpaqueTokenInfo::default())
        }

        async fn wallet_login(&self, _: &WalletProof) -> Result<WalletLoginResult, UpstreamError> {
            Ok(self.0.clone())
        }
    }

    fn validator(tenant_id: &str) -> WalletValidator {
        let login = WalletLoginResult {
            verified: true,
            user: Some(WalletUser {
                user_id: "wallet:0xabc".to_string(),
                tenant_id: tenant_id.to_string(),
                ..Default::default()
            }),
            issued_token: Some("session".to_string()),
        };
        WalletValidator::new(Arc::new(FixedLogin(login)), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_verified_login_without_tenant_is_malformed() {
        let proof = WalletProof::new("0xabc", "0xsig", "sign in").unwrap();
        for tenant in ["", "  "] {
            let outcome = validator(tenant).validate(&proof).await;
            assert!(matches!(
                outcome,
                ValidationOutcome::Failure(FailureReason::Malformed(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_verified_login_with_tenant_succeeds() {
        let proof = WalletProof::new("0xabc", "0xsig", "sign in").unwrap();
        match validator("tenant-w").validate(&proof).await {
            ValidationOutcome::Success {
                principal,
                issued_token,
            } => {
                assert_eq!(principal.tenant_id(), "tenant-w");
                assert_eq!(principal.scheme(), AuthScheme::Wallet);
                assert_eq!(issued_token.as_deref(), Some("session"));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_proof_requires_all_parts() {
        assert!(WalletProof::new("0xabc", "0xsig", "hello").is_some());
        assert!(WalletProof::new("0xabc", "", "hello").is_none());
        assert!(WalletProof::new(" ", "0xsig", "hello").is_none());
    }

    #[test]
    fn test_proof_from_headers() {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("x-wallet-address", "0xabc"),
            ("x-wallet-signature", "0xsig"),
            ("x-wallet-message", "sign in"),
        ] {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }

        let proof = WalletProof::from_headers(&headers).unwrap();
        assert_eq!(proof.address, "0xabc");
        assert_eq!(proof.message, "sign in");
    }
}
