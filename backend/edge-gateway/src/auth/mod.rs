//! Credential validation and principal resolution.
//!
//! Each validator returns a closed [`ValidationOutcome`]; the resolver walks
//! them in precedence order and the first `Success` wins.

pub mod bearer;
pub mod opaque;
pub mod principal;
pub mod resolver;
pub mod wallet;

use async_trait::async_trait;
use serde::Deserialize;

use crate::upstream::UpstreamError;

pub use bearer::{BearerValidator, Claims};
pub use opaque::OpaqueTokenValidator;
pub use principal::{AuthScheme, Principal, TokenFingerprint, ANONYMOUS_TENANT_ID};
pub use resolver::{CredentialCarrier, PrincipalResolver, ResolvedPrincipal};
pub use wallet::{WalletProof, WalletValidator};

/// Result of running one validator against one credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Success {
        principal: Principal,
        /// Bearer token freshly issued by the identity service (wallet logins).
        issued_token: Option<String>,
    },
    Failure(FailureReason),
}

impl ValidationOutcome {
    pub fn success(principal: Principal) -> Self {
        ValidationOutcome::Success {
            principal,
            issued_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Expired,
    Malformed(String),
    /// Identity service answered and said no.
    Rejected,
    /// Identity service could not be reached.
    Unavailable(String),
}

/// Response of `ValidateOpaqueToken`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpaqueTokenInfo {
    pub valid: bool,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Service-side token identifier, preferred over the raw token for fingerprints.
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletUser {
    pub user_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Response of `WalletLogin`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletLoginResult {
    /// True when the signature recovers to the claimed address.
    pub verified: bool,
    #[serde(default)]
    pub user: Option<WalletUser>,
    #[serde(default)]
    pub issued_token: Option<String>,
}

/// Identity service operations the validators delegate to.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn validate_opaque_token(&self, token: &str) -> Result<OpaqueTokenInfo, UpstreamError>;

    async fn wallet_login(&self, proof: &WalletProof) -> Result<WalletLoginResult, UpstreamError>;
}
