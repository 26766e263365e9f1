//! Principal resolution: bearer, then opaque token, then wallet, then anonymous.
//!
//! A credential that is present but invalid falls through to the next scheme.
//! Endpoints that mandate authentication call [`PrincipalResolver::resolve_required`],
//! which rejects credential-less callers before any validator runs.

use std::sync::Arc;

use actix_web::http::header::{HeaderMap, AUTHORIZATION, COOKIE};
use serde_json::Value;
use tracing::debug;

use super::bearer::BearerValidator;
use super::opaque::OpaqueTokenValidator;
use super::principal::Principal;
use super::wallet::{WalletProof, WalletValidator};
use super::ValidationOutcome;
use crate::error::GatewayError;
use crate::metrics;

/// Cookie carrying a session token for browser callers.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Credentials extracted from one transport, before any validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialCarrier {
    pub token: Option<String>,
    pub wallet: Option<WalletProof>,
}

impl CredentialCarrier {
    /// `Authorization: Bearer` first, then the `access_token` cookie.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(strip_bearer)
            .or_else(|| cookie_value(headers, ACCESS_TOKEN_COOKIE));

        Self {
            token,
            wallet: WalletProof::from_headers(headers),
        }
    }

    /// Connection-init payload of a WebSocket handshake. Anything the payload
    /// does not carry is taken from the upgrade request's headers.
    pub fn from_init_payload(payload: &Value, upgrade_headers: &HeaderMap) -> Self {
        let fallback = Self::from_headers(upgrade_headers);

        let token = ["Authorization", "authorization", "token", "access_token"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_str))
            .and_then(strip_bearer)
            .or(fallback.token);

        let field = |camel: &str, header: &str| {
            payload
                .get(camel)
                .or_else(|| payload.get(header))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        };
        let wallet = WalletProof::new(
            &field("walletAddress", super::wallet::WALLET_ADDRESS_HEADER),
            &field("walletSignature", super::wallet::WALLET_SIGNATURE_HEADER),
            &field("walletMessage", super::wallet::WALLET_MESSAGE_HEADER),
        )
        .or(fallback.wallet);

        Self { token, wallet }
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.wallet.is_none()
    }
}

fn strip_bearer(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let token = match raw.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        Some(_) => return None,
        None => raw,
    };
    (!token.is_empty()).then(|| token.to_string())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// One principal plus any session token minted while resolving it.
#[derive(Debug, Clone)]
pub struct ResolvedPrincipal {
    pub principal: Arc<Principal>,
    pub issued_token: Option<String>,
}

impl ResolvedPrincipal {
    pub fn anonymous() -> Self {
        Self {
            principal: Arc::new(Principal::anonymous()),
            issued_token: None,
        }
    }
}

pub struct PrincipalResolver {
    bearer: BearerValidator,
    opaque: OpaqueTokenValidator,
    wallet: WalletValidator,
}

impl PrincipalResolver {
    pub fn new(bearer: BearerValidator, opaque: OpaqueTokenValidator, wallet: WalletValidator) -> Self {
        Self {
            bearer,
            opaque,
            wallet,
        }
    }

    pub async fn resolve(&self, carrier: &CredentialCarrier) -> ResolvedPrincipal {
        let resolved = self.resolve_inner(carrier).await;
        metrics::PRINCIPALS_RESOLVED
            .with_label_values(&[resolved.principal.scheme().as_str()])
            .inc();
        resolved
    }

    /// For endpoints that refuse anonymous callers.
    pub async fn resolve_required(
        &self,
        carrier: &CredentialCarrier,
    ) -> Result<ResolvedPrincipal, GatewayError> {
        if carrier.is_empty() {
            return Err(GatewayError::Auth);
        }
        let resolved = self.resolve(carrier).await;
        if resolved.principal.is_anonymous() {
            return Err(GatewayError::Auth);
        }
        Ok(resolved)
    }

    async fn resolve_inner(&self, carrier: &CredentialCarrier) -> ResolvedPrincipal {
        if let Some(token) = carrier.token.as_deref() {
            match self.bearer.validate(token) {
                ValidationOutcome::Success {
                    principal,
                    issued_token,
                } => return into_resolved(principal, issued_token),
                ValidationOutcome::Failure(reason) => {
                    debug!(?reason, "Bearer scheme did not match, trying opaque token");
                }
            }

            match self.opaque.validate(token).await {
                ValidationOutcome::Success {
                    principal,
                    issued_token,
                } => return into_resolved(principal, issued_token),
                ValidationOutcome::Failure(reason) => {
                    debug!(?reason, "Opaque token scheme did not match");
                }
            }
        }

        if let Some(proof) = carrier.wallet.as_ref() {
            match self.wallet.validate(proof).await {
                ValidationOutcome::Success {
                    principal,
                    issued_token,
                } => return into_resolved(principal, issued_token),
                ValidationOutcome::Failure(reason) => {
                    debug!(?reason, "Wallet scheme did not match");
                }
            }
        }

        ResolvedPrincipal::anonymous()
    }
}

fn into_resolved(principal: Principal, issued_token: Option<String>) -> ResolvedPrincipal {
    ResolvedPrincipal {
        principal: Arc::new(principal),
        issued_token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};
    use serde_json::json;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        map
    }

    #[test]
    fn test_bearer_header_wins_over_cookie() {
        let carrier = CredentialCarrier::from_headers(&headers(&[
            ("authorization", "Bearer header-token"),
            ("cookie", "access_token=cookie-token"),
        ]));
        assert_eq!(carrier.token.as_deref(), Some("header-token"));
    }

    #[test]
    fn test_cookie_fallback() {
        let carrier = CredentialCarrier::from_headers(&headers(&[(
            "cookie",
            "theme=dark; access_token=cookie-token; lang=en",
        )]));
        assert_eq!(carrier.token.as_deref(), Some("cookie-token"));
        assert!(carrier.wallet.is_none());
    }

    #[test]
    fn test_non_bearer_authorization_is_ignored() {
        let carrier = CredentialCarrier::from_headers(&headers(&[("authorization", "Basic Zm9vOmJhcg==")]));
        assert!(carrier.is_empty());
    }

    #[test]
    fn test_init_payload_token_takes_precedence() {
        let upgrade = headers(&[("cookie", "access_token=cookie-token")]);
        let carrier =
            CredentialCarrier::from_init_payload(&json!({"Authorization": "Bearer ws-token"}), &upgrade);
        assert_eq!(carrier.token.as_deref(), Some("ws-token"));
    }

    #[test]
    fn test_init_payload_falls_back_to_upgrade_headers() {
        let upgrade = headers(&[
            ("cookie", "access_token=cookie-token"),
            ("x-wallet-address", "0xabc"),
            ("x-wallet-signature", "0xsig"),
            ("x-wallet-message", "hello"),
        ]);
        let carrier = CredentialCarrier::from_init_payload(&json!({}), &upgrade);
        assert_eq!(carrier.token.as_deref(), Some("cookie-token"));
        assert_eq!(carrier.wallet.unwrap().address, "0xabc");
    }

    #[test]
    fn test_init_payload_wallet_fields() {
        let carrier = CredentialCarrier::from_init_payload(
            &json!({"walletAddress": "0xdef", "walletSignature": "0xs", "walletMessage": "m"}),
            &HeaderMap::new(),
        );
        assert!(carrier.token.is_none());
        assert_eq!(carrier.wallet.unwrap().address, "0xdef");
    }
}
