//! Tenant rate-limit configuration with stale-while-revalidate refresh.
//!
//! `get` never waits on the fleet service. A missing or stale entry schedules
//! a background refresh and the caller gets the last-known entry, or the
//! default when the tenant has never been fetched successfully.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::auth::ANONYMOUS_TENANT_ID;
use crate::upstream::{with_timeout, UpstreamError};

/// Minimum gap between failed refresh attempts for one tenant.
const FAILED_REFRESH_BACKOFF: Duration = Duration::from_secs(10);

/// Response of `GetTenantLimits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TenantLimits {
    pub ceiling: u32,
    #[serde(with = "window_secs", rename = "window_seconds")]
    pub window: Duration,
}

mod window_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?.max(1)))
    }
}

#[async_trait]
pub trait TenantLimitSource: Send + Sync {
    async fn get_tenant_limits(&self, tenant_id: &str) -> Result<TenantLimits, UpstreamError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitOrigin {
    Default,
    Fetched,
}

#[derive(Debug, Clone)]
pub struct LimitEntry {
    pub tenant_id: String,
    pub ceiling: u32,
    pub window: Duration,
    pub refreshed_at: Option<Instant>,
    pub origin: LimitOrigin,
}

impl LimitEntry {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.refreshed_at.map_or(true, |at| at.elapsed() >= ttl)
    }
}

pub struct TenantLimitCache {
    source: Arc<dyn TenantLimitSource>,
    entries: DashMap<String, LimitEntry>,
    in_flight: DashMap<String, ()>,
    failures: DashMap<String, Instant>,
    default: TenantLimits,
    ttl: Duration,
    timeout: Duration,
}

impl TenantLimitCache {
    pub fn new(
        source: Arc<dyn TenantLimitSource>,
        default: TenantLimits,
        ttl: Duration,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            failures: DashMap::new(),
            default,
            ttl,
            timeout,
        })
    }

    pub fn default_entry(&self, tenant_id: &str) -> LimitEntry {
        LimitEntry {
            tenant_id: tenant_id.to_string(),
            ceiling: self.default.ceiling,
            window: self.default.window,
            refreshed_at: None,
            origin: LimitOrigin::Default,
        }
    }

    /// Non-blocking lookup. Always returns a usable entry.
    pub fn get(self: &Arc<Self>, tenant_id: &str) -> LimitEntry {
        if tenant_id == ANONYMOUS_TENANT_ID {
            return self.default_entry(tenant_id);
        }

        let cached = self.entries.get(tenant_id).map(|e| e.value().clone());
        match cached {
            Some(entry) => {
                if entry.is_stale(self.ttl) {
                    self.schedule_refresh(tenant_id);
                }
                entry
            }
            None => {
                self.schedule_refresh(tenant_id);
                self.default_entry(tenant_id)
            }
        }
    }

    /// Fetch from the fleet service now. On failure the last-known entry is kept.
    pub async fn refresh_now(&self, tenant_id: &str) -> Result<LimitEntry, UpstreamError> {
        let fetched = with_timeout(
            "fleet",
            self.timeout,
            self.source.get_tenant_limits(tenant_id),
        )
        .await;

        match fetched {
            Ok(limits) => {
                let entry = LimitEntry {
                    tenant_id: tenant_id.to_string(),
                    ceiling: limits.ceiling,
                    window: limits.window.max(Duration::from_secs(1)),
                    refreshed_at: Some(Instant::now()),
                    origin: LimitOrigin::Fetched,
                };
                self.entries.insert(tenant_id.to_string(), entry.clone());
                self.failures.remove(tenant_id);
                debug!(
                    tenant_id = %tenant_id,
                    ceiling = entry.ceiling,
                    window_secs = entry.window.as_secs(),
                    "Tenant limits refreshed"
                );
                Ok(entry)
            }
            Err(e) => {
                self.failures.insert(tenant_id.to_string(), Instant::now());
                warn!(
                    tenant_id = %tenant_id,
                    error = %e,
                    has_cached = self.entries.contains_key(tenant_id),
                    "Tenant limit refresh failed, serving last known limits"
                );
                Err(e)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn schedule_refresh(self: &Arc<Self>, tenant_id: &str) {
        if self
            .failures
            .get(tenant_id)
            .map_or(false, |at| at.elapsed() < FAILED_REFRESH_BACKOFF)
        {
            return;
        }
        if self.in_flight.insert(tenant_id.to_string(), ()).is_some() {
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            self.in_flight.remove(tenant_id);
            return;
        };

        let cache = Arc::clone(self);
        let tenant_id = tenant_id.to_string();
        handle.spawn(async move {
            let _ = cache.refresh_now(&tenant_id).await;
            cache.in_flight.remove(&tenant_id);
        });
    }
}
