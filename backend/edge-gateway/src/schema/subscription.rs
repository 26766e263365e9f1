//! GraphQL Subscriptions (WebSocket support)

use std::time::Duration;

use async_graphql::{Context, SimpleObject, Subscription};
use chrono::Utc;
use futures_util::stream::{self, Stream};

use crate::context::Caller;

const MIN_INTERVAL_MS: u64 = 100;

#[derive(SimpleObject, Clone, Debug)]
pub struct Heartbeat {
    pub sequence: u64,
    pub tenant_id: String,
    pub emitted_at: String,
}

#[derive(Default)]
pub struct SubscriptionRoot;

#[Subscription]
impl SubscriptionRoot {
    /// Periodic tick for connection liveness. Ends after `limit` ticks when given.
    async fn heartbeat(
        &self,
        ctx: &Context<'_>,
        #[graphql(default = 1000)] interval_ms: u64,
        limit: Option<u64>,
    ) -> impl Stream<Item = Heartbeat> {
        let tenant_id = ctx
            .data_opt::<Caller>()
            .map(|Caller(p)| p.tenant_id().to_string())
            .unwrap_or_else(|| crate::auth::ANONYMOUS_TENANT_ID.to_string());
        let interval = Duration::from_millis(interval_ms.max(MIN_INTERVAL_MS));

        stream::unfold(0u64, move |sequence| {
            let tenant_id = tenant_id.clone();
            async move {
                if limit.map_or(false, |limit| sequence >= limit) {
                    return None;
                }
                tokio::time::sleep(interval).await;
                let beat = Heartbeat {
                    sequence,
                    tenant_id,
                    emitted_at: Utc::now().to_rfc3339(),
                };
                Some((beat, sequence + 1))
            }
        })
    }
}
