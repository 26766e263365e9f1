use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::auth::{AuthScheme, Principal, TokenFingerprint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
    Webhook,
    Tool,
    Unknown,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
            OperationKind::Webhook => "webhook",
            OperationKind::Tool => "tool",
            OperationKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One billable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub tenant_id: String,
    pub auth_scheme: AuthScheme,
    pub operation_kind: OperationKind,
    pub operation_name: Option<String>,
    pub user_id: Option<String>,
    pub token_fingerprint: Option<TokenFingerprint>,
    pub duration_ms: u64,
    pub complexity: u64,
    pub error_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(
        principal: &Principal,
        operation_kind: OperationKind,
        operation_name: Option<String>,
    ) -> Self {
        Self {
            tenant_id: principal.tenant_id().to_string(),
            auth_scheme: principal.scheme(),
            operation_kind,
            operation_name,
            user_id: principal.user_id().map(str::to_string),
            token_fingerprint: principal.token_fingerprint().cloned(),
            duration_ms: 0,
            complexity: 0,
            error_count: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = elapsed.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn with_complexity(mut self, complexity: u64) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_errors(mut self, error_count: u32) -> Self {
        self.error_count = error_count;
        self
    }
}
