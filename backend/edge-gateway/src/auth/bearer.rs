//! HS256 bearer token validation.

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::principal::{AuthScheme, Principal, TokenFingerprint};
use super::{FailureReason, ValidationOutcome};
use crate::config::JwtConfig;

/// Minimum accepted length of the shared signing secret.
pub const MIN_SECRET_LEN: usize = 32;

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub tenant_id: String,
    pub exp: usize,
    pub iat: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("JWT secret too short: {0} bytes, need at least {MIN_SECRET_LEN}")]
pub struct WeakSecretError(pub usize);

pub struct BearerValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl BearerValidator {
    pub fn new(config: &JwtConfig) -> Result<Self, WeakSecretError> {
        if config.secret.len() < MIN_SECRET_LEN {
            return Err(WeakSecretError(config.secret.len()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.leeway_seconds;
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if config.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&config.audience);
        }

        Ok(Self {
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        })
    }

    /// Validate signature, expiry and claims. Pure and synchronous: the same
    /// token always maps to the same principal while it is valid.
    pub fn validate(&self, token: &str) -> ValidationOutcome {
        let data = match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => data,
            Err(e) => {
                debug!(error = %e, "Bearer token rejected");
                return ValidationOutcome::Failure(match e.kind() {
                    ErrorKind::ExpiredSignature => FailureReason::Expired,
                    _ => FailureReason::Malformed(e.to_string()),
                });
            }
        };

        let claims = data.claims;
        if claims.sub.is_empty() || claims.tenant_id.trim().is_empty() {
            return ValidationOutcome::Failure(FailureReason::Malformed(
                "missing sub or tenant_id claim".to_string(),
            ));
        }

        let principal = Principal::builder(AuthScheme::Bearer, claims.tenant_id)
            .user_id(claims.sub)
            .email(claims.email)
            .role(claims.role)
            .token_fingerprint(TokenFingerprint::of(token))
            .build();

        ValidationOutcome::success(principal)
    }
}
