//! Batching of usage records before they are shipped to billing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

use super::record::{OperationKind, UsageRecord};
use crate::auth::AuthScheme;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AggregateKey {
    tenant_id: String,
    auth_scheme: AuthScheme,
    operation_kind: OperationKind,
    operation_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub tenant_id: String,
    pub auth_scheme: AuthScheme,
    pub operation_kind: OperationKind,
    pub operation_name: String,
    pub request_count: u64,
    pub error_count: u64,
    pub total_duration_ms: u64,
    pub total_complexity: u64,
    pub unique_users: usize,
    pub unique_tokens: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip)]
    user_hashes: HashSet<String>,
    #[serde(skip)]
    token_hashes: HashSet<String>,
}

/// Payload sent to the billing ingestion service.
#[derive(Debug, Clone, Serialize)]
pub struct UsageBatch {
    pub source_node: String,
    pub emitted_at: DateTime<Utc>,
    pub summaries: Vec<UsageSummary>,
}

impl UsageBatch {
    pub fn request_count(&self) -> u64 {
        self.summaries.iter().map(|s| s.request_count).sum()
    }
}

#[derive(Debug, Default)]
pub struct UsageAggregator {
    entries: HashMap<AggregateKey, UsageSummary>,
}

fn hash_user(user_id: &str) -> String {
    hex::encode(&Sha256::digest(user_id.as_bytes())[..8])
}

impl UsageAggregator {
    pub fn add(&mut self, record: UsageRecord) {
        let key = AggregateKey {
            tenant_id: record.tenant_id.clone(),
            auth_scheme: record.auth_scheme,
            operation_kind: record.operation_kind,
            operation_name: record.operation_name.clone().unwrap_or_default(),
        };

        let summary = self.entries.entry(key).or_insert_with(|| UsageSummary {
            tenant_id: record.tenant_id.clone(),
            auth_scheme: record.auth_scheme,
            operation_kind: record.operation_kind,
            operation_name: record.operation_name.clone().unwrap_or_default(),
            request_count: 0,
            error_count: 0,
            total_duration_ms: 0,
            total_complexity: 0,
            unique_users: 0,
            unique_tokens: 0,
            first_seen: record.timestamp,
            last_seen: record.timestamp,
            user_hashes: HashSet::new(),
            token_hashes: HashSet::new(),
        });

        summary.request_count += 1;
        summary.error_count += u64::from(record.error_count);
        summary.total_duration_ms = summary.total_duration_ms.saturating_add(record.duration_ms);
        summary.total_complexity = summary.total_complexity.saturating_add(record.complexity);
        summary.first_seen = summary.first_seen.min(record.timestamp);
        summary.last_seen = summary.last_seen.max(record.timestamp);
        if let Some(user) = record.user_id.as_deref() {
            summary.user_hashes.insert(hash_user(user));
            summary.unique_users = summary.user_hashes.len();
        }
        if let Some(fp) = record.token_fingerprint {
            summary.token_hashes.insert(fp.as_str().to_string());
            summary.unique_tokens = summary.token_hashes.len();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drains everything collected so far into one batch.
    pub fn take_batch(&mut self, source_node: &str) -> Option<UsageBatch> {
        if self.entries.is_empty() {
            return None;
        }
        Some(UsageBatch {
            source_node: source_node.to_string(),
            emitted_at: Utc::now(),
            summaries: self.entries.drain().map(|(_, summary)| summary).collect(),
        })
    }
}
