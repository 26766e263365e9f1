use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Tenant every unauthenticated caller belongs to.
pub const ANONYMOUS_TENANT_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Which credential scheme produced a [`Principal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    Bearer,
    OpaqueToken,
    Wallet,
    Anonymous,
}

impl AuthScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::Bearer => "bearer",
            AuthScheme::OpaqueToken => "opaque_token",
            AuthScheme::Wallet => "wallet",
            AuthScheme::Anonymous => "anonymous",
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable SHA-256 fingerprint of a credential. The raw token is never retained.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TokenFingerprint(String);

impl TokenFingerprint {
    pub fn of(raw: &str) -> Self {
        let digest = Sha256::digest(raw.as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TokenFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenFingerprint({}..)", &self.0[..12.min(self.0.len())])
    }
}

impl fmt::Display for TokenFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for TokenFingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Resolved identity of one request or connection.
///
/// Built once by the resolver and never mutated afterwards; downstream code
/// only ever sees it behind a shared reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    tenant_id: String,
    user_id: Option<String>,
    email: Option<String>,
    role: Option<String>,
    permissions: Option<Vec<String>>,
    scheme: AuthScheme,
    token_fingerprint: Option<TokenFingerprint>,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self {
            tenant_id: ANONYMOUS_TENANT_ID.to_string(),
            user_id: None,
            email: None,
            role: None,
            permissions: None,
            scheme: AuthScheme::Anonymous,
            token_fingerprint: None,
        }
    }

    /// Starts an authenticated principal. An empty tenant id maps to the anonymous tenant.
    pub fn builder(scheme: AuthScheme, tenant_id: impl Into<String>) -> PrincipalBuilder {
        let tenant_id = tenant_id.into();
        let tenant_id = if tenant_id.trim().is_empty() {
            ANONYMOUS_TENANT_ID.to_string()
        } else {
            tenant_id
        };
        PrincipalBuilder {
            inner: Principal {
                tenant_id,
                user_id: None,
                email: None,
                role: None,
                permissions: None,
                scheme,
                token_fingerprint: None,
            },
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn permissions(&self) -> Option<&[String]> {
        self.permissions.as_deref()
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn token_fingerprint(&self) -> Option<&TokenFingerprint> {
        self.token_fingerprint.as_ref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.scheme == AuthScheme::Anonymous
    }
}

pub struct PrincipalBuilder {
    inner: Principal,
}

impl PrincipalBuilder {
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.inner.user_id = Some(user_id.into()).filter(|u: &String| !u.is_empty());
        self
    }

    pub fn email(mut self, email: Option<String>) -> Self {
        self.inner.email = email.filter(|e| !e.is_empty());
        self
    }

    pub fn role(mut self, role: Option<String>) -> Self {
        self.inner.role = role.filter(|r| !r.is_empty());
        self
    }

    pub fn permissions(mut self, permissions: Vec<String>) -> Self {
        self.inner.permissions = Some(permissions);
        self
    }

    pub fn token_fingerprint(mut self, fingerprint: TokenFingerprint) -> Self {
        self.inner.token_fingerprint = Some(fingerprint);
        self
    }

    pub fn build(self) -> Principal {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tenant_falls_back_to_anonymous_tenant() {
        let p = Principal::builder(AuthScheme::Bearer, "  ").build();
        assert_eq!(p.tenant_id(), ANONYMOUS_TENANT_ID);
        assert_eq!(p.scheme(), AuthScheme::Bearer);
    }

    #[test]
    fn fingerprint_is_stable_and_hides_token() {
        let a = TokenFingerprint::of("secret-token");
        let b = TokenFingerprint::of("secret-token");
        assert_eq!(a, b);
        assert!(!a.as_str().contains("secret"));
        assert_eq!(a.as_str().len(), 64);
    }
}
