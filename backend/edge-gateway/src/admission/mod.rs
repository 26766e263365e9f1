//! Admission control: per-tenant window counters with a paid overflow path.
//!
//! Counters live in one `DashMap`, so increments for a key happen under that
//! key's shard lock and unrelated tenants never serialize on a global lock.
//! Overflow admissions never touch the counter.

pub mod limits;
pub mod overflow;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::Principal;
use crate::error::GatewayError;
use crate::metrics;
use crate::upstream::with_timeout;

pub use limits::{LimitEntry, LimitOrigin, TenantLimitCache, TenantLimitSource, TenantLimits};
pub use overflow::{OverflowAuthorizer, OverflowRequest, OverflowVerdict, PAYMENT_HEADER};

/// Entry point an operation arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Surface {
    Graphql,
    Subscription,
    Webhook,
    Tool,
}

impl Surface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::Graphql => "graphql",
            Surface::Subscription => "subscription",
            Surface::Webhook => "webhook",
            Surface::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationClass {
    pub surface: Surface,
    pub name: String,
}

impl OperationClass {
    pub fn new(surface: Surface, name: impl Into<String>) -> Self {
        Self {
            surface,
            name: name.into(),
        }
    }
}

/// Counter key: the tenant for authenticated callers, the client address for anonymous ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdmissionKey(String);

impl AdmissionKey {
    pub fn for_principal(principal: &Principal, client_ip: &str) -> Self {
        if principal.is_anonymous() {
            Self(format!("anonymous:{}", client_ip))
        } else {
            Self(format!("tenant:{}", principal.tenant_id()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Accept {
        limit: u32,
        remaining: u32,
        reset_after: Duration,
    },
    AcceptViaOverflow {
        cost: u64,
    },
    Reject {
        limit: u32,
        retry_after: Duration,
    },
}

impl AdmissionDecision {
    pub fn outcome(&self) -> &'static str {
        match self {
            AdmissionDecision::Accept { .. } => "accept",
            AdmissionDecision::AcceptViaOverflow { .. } => "overflow",
            AdmissionDecision::Reject { .. } => "reject",
        }
    }

    pub fn into_result(self) -> Result<AdmissionDecision, GatewayError> {
        match self {
            AdmissionDecision::Reject { limit, retry_after } => {
                Err(GatewayError::RateLimitExceeded {
                    limit,
                    retry_after_secs: retry_after.as_secs().max(1),
                })
            }
            accepted => Ok(accepted),
        }
    }
}

#[derive(Debug)]
struct WindowCounter {
    window_start: Instant,
    window: Duration,
    count: u32,
    last_seen: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUsage {
    pub count: u32,
    pub reset_after: Duration,
}

#[derive(Debug, Clone)]
pub struct AdmissionSettings {
    pub overflow_enabled: bool,
    pub overflow_timeout: Duration,
    pub idle_eviction: Duration,
}

pub struct AdmissionController {
    limits: Arc<TenantLimitCache>,
    overflow: Arc<dyn OverflowAuthorizer>,
    counters: DashMap<AdmissionKey, WindowCounter>,
    settings: AdmissionSettings,
}

impl AdmissionController {
    pub fn new(
        limits: Arc<TenantLimitCache>,
        overflow: Arc<dyn OverflowAuthorizer>,
        settings: AdmissionSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            limits,
            overflow,
            counters: DashMap::new(),
            settings,
        })
    }

    pub fn limits(&self) -> &Arc<TenantLimitCache> {
        &self.limits
    }

    /// Accept, admit via paid overflow, or reject one operation.
    pub async fn admit(
        &self,
        principal: &Principal,
        key: &AdmissionKey,
        operation: &OperationClass,
        payment: Option<String>,
        client_ip: &str,
    ) -> AdmissionDecision {
        let limits = self.limits.get(principal.tenant_id());

        let decision = match self.try_consume(key, &limits) {
            Ok(decision) => decision,
            Err(retry_after) => {
                self.try_overflow(principal, operation, payment, client_ip, limits.ceiling, retry_after)
                    .await
            }
        };

        metrics::ADMISSION_DECISIONS
            .with_label_values(&[operation.surface.as_str(), decision.outcome()])
            .inc();
        decision
    }

    /// Take one slot from the key's current window. `Err` carries the time until the window resets.
    pub fn try_consume(&self, key: &AdmissionKey, limits: &LimitEntry) -> Result<AdmissionDecision, Duration> {
        let now = Instant::now();
        let mut counter = self
            .counters
            .entry(key.clone())
            .or_insert_with(|| WindowCounter {
                window_start: now,
                window: limits.window,
                count: 0,
                last_seen: now,
            });

        counter.last_seen = now;
        counter.window = limits.window;
        if now.duration_since(counter.window_start) >= counter.window {
            counter.window_start = now;
            counter.count = 0;
        }
        let reset_after = counter
            .window
            .saturating_sub(now.duration_since(counter.window_start));

        if counter.count < limits.ceiling {
            counter.count += 1;
            Ok(AdmissionDecision::Accept {
                limit: limits.ceiling,
                remaining: limits.ceiling - counter.count,
                reset_after,
            })
        } else {
            Err(reset_after)
        }
    }

    async fn try_overflow(
        &self,
        principal: &Principal,
        operation: &OperationClass,
        payment: Option<String>,
        client_ip: &str,
        limit: u32,
        retry_after: Duration,
    ) -> AdmissionDecision {
        let reject = AdmissionDecision::Reject { limit, retry_after };
        if !self.settings.overflow_enabled {
            return reject;
        }
        if principal.is_anonymous() && payment.is_none() {
            return reject;
        }

        let request = OverflowRequest::new(principal, operation, payment, client_ip.to_string());
        match with_timeout(
            "payment",
            self.settings.overflow_timeout,
            self.overflow.authorize_overflow(&request),
        )
        .await
        {
            Ok(verdict) if verdict.authorized => {
                debug!(
                    tenant_id = %principal.tenant_id(),
                    cost = verdict.cost,
                    "Admitted via overflow"
                );
                AdmissionDecision::AcceptViaOverflow { cost: verdict.cost }
            }
            Ok(_) => reject,
            Err(e) => {
                warn!(
                    tenant_id = %principal.tenant_id(),
                    error = %e,
                    "Overflow authorization unavailable"
                );
                reject
            }
        }
    }

    /// Slots used in the key's current window, if the key has a counter.
    pub fn usage(&self, key: &AdmissionKey) -> Option<WindowUsage> {
        self.counters.get(key).map(|c| WindowUsage {
            count: c.count,
            reset_after: c.window.saturating_sub(c.window_start.elapsed()),
        })
    }

    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }

    /// Drop counters with no traffic for longer than `idle`.
    pub fn evict_idle(&self, idle: Duration) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, c| c.last_seen.elapsed() < idle);
        before.saturating_sub(self.counters.len())
    }

    pub fn spawn_eviction(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let idle = self.settings.idle_eviction;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = controller.evict_idle(idle);
                        if evicted > 0 {
                            debug!(evicted, remaining = controller.tracked_keys(), "Evicted idle rate counters");
                        }
                    }
                }
            }
            info!("Rate counter eviction stopped");
        })
    }
}
