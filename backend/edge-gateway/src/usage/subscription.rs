//! Exactly-once metering of subscriptions.
//!
//! Every WebSocket connection gets a [`ConnectionScope`] whose token is a child
//! of the supervisor's root token. Each subscription started on that connection
//! gets a grandchild token and one waiter task. The waiter sleeps until the
//! token is cancelled (client `complete`, disconnect, or shutdown) and then
//! records a single usage record.
//!
//! Waiters run on the runtime that created the supervisor, not on the HTTP
//! worker that accepted the connection, so they still observe cancellation
//! after the workers have been torn down during shutdown.

use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use async_graphql::Response;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use tokio::runtime::Handle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::meter::UsageMeter;
use super::record::UsageRecord;
use crate::auth::Principal;
use crate::cost::AssessmentSlot;
use crate::metrics;

#[derive(Clone)]
pub struct SubscriptionSupervisor {
    root: CancellationToken,
    tracker: TaskTracker,
    runtime: Handle,
    meter: UsageMeter,
}

impl SubscriptionSupervisor {
    /// `runtime` must outlive the HTTP workers; pass the main runtime's handle.
    pub fn new(meter: UsageMeter, runtime: Handle) -> Self {
        Self {
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            runtime,
            meter,
        }
    }

    pub fn open_connection(&self, principal: Arc<Principal>) -> ConnectionScope {
        let token = self.root.child_token();
        ConnectionScope {
            inner: Arc::new(ScopeInner {
                principal,
                _guard: token.clone().drop_guard(),
                token,
            }),
            supervisor: self.clone(),
        }
    }

    /// Number of live subscription waiters.
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel every connection and join every waiter.
    pub async fn shutdown(&self) {
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Subscription waiters joined");
    }

    fn watch(&self, scope: &ConnectionScope, slot: AssessmentSlot) -> SubscriptionGuard {
        let token = scope.inner.token.child_token();
        let counters = Arc::new(StreamCounters::default());
        let started = Instant::now();

        let principal = scope.inner.principal.clone();
        let meter = self.meter.clone();
        let waiter_token = token.clone();
        let waiter_counters = counters.clone();

        metrics::ACTIVE_SUBSCRIPTIONS.inc();
        let waiter = async move {
            waiter_token.cancelled().await;
            metrics::ACTIVE_SUBSCRIPTIONS.dec();

            // Rejected or unparsable subscriptions never produced an assessment.
            let Some(assessment) = slot.get() else {
                debug!("Subscription ended before admission, not metered");
                return;
            };
            let record = UsageRecord::new(
                &principal,
                assessment.operation_kind,
                assessment.operation_name.clone(),
            )
            .with_duration(started.elapsed())
            .with_complexity(assessment.complexity)
            .with_errors(waiter_counters.errors.load(Ordering::Relaxed));

            debug!(
                tenant_id = %record.tenant_id,
                messages = waiter_counters.messages.load(Ordering::Relaxed),
                duration_ms = record.duration_ms,
                "Subscription closed"
            );
            meter.record(record);
        };
        self.tracker.spawn_on(waiter, &self.runtime);

        SubscriptionGuard {
            token: token.clone(),
            _guard: token.drop_guard(),
            counters,
        }
    }
}

struct ScopeInner {
    principal: Arc<Principal>,
    token: CancellationToken,
    _guard: DropGuard,
}

/// Per-connection state, stored in the connection's session data. Dropping the
/// last clone (connection closed) cancels every subscription on it.
#[derive(Clone)]
pub struct ConnectionScope {
    inner: Arc<ScopeInner>,
    supervisor: SubscriptionSupervisor,
}

impl ConnectionScope {
    /// Wrap a subscription's response stream. The stream ends as soon as the
    /// connection is cancelled, and dropping it releases the waiter.
    pub fn meter_stream<'s>(
        &self,
        stream: BoxStream<'s, Response>,
        slot: AssessmentSlot,
    ) -> BoxStream<'s, Response> {
        let guard = self.supervisor.watch(self, slot);
        let stop = guard.token.clone().cancelled_owned();
        Metered {
            inner: stream.take_until(stop).boxed(),
            guard,
        }
        .boxed()
    }
}

#[derive(Default)]
struct StreamCounters {
    messages: AtomicU64,
    errors: AtomicU32,
}

struct SubscriptionGuard {
    token: CancellationToken,
    _guard: DropGuard,
    counters: Arc<StreamCounters>,
}

struct Metered<'s> {
    inner: BoxStream<'s, Response>,
    guard: SubscriptionGuard,
}

impl Stream for Metered<'_> {
    type Item = Response;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.poll_next_unpin(cx);
        match &polled {
            Poll::Ready(Some(response)) => {
                self.guard.counters.messages.fetch_add(1, Ordering::Relaxed);
                if response.is_err() {
                    self.guard.counters.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
            Poll::Ready(None) => self.guard.token.cancel(),
            Poll::Pending => {}
        }
        polled
    }
}
