//! Gateway-owned GraphQL schema.
//!
//! Business resolvers live behind the gateway; this schema carries only what the
//! admission layer itself answers, so pricing and metering can run end to end.

pub mod subscription;
pub mod viewer;

use async_graphql::{EmptyMutation, Schema};

use crate::cost::{CostGovernorExtension, QueryCostGovernor};

/// GraphQL App Schema type with WebSocket subscriptions
pub type AppSchema = Schema<viewer::QueryRoot, EmptyMutation, subscription::SubscriptionRoot>;

pub fn build_schema(governor: QueryCostGovernor) -> AppSchema {
    Schema::build(
        viewer::QueryRoot,
        EmptyMutation,
        subscription::SubscriptionRoot,
    )
    .extension(CostGovernorExtension::new(governor))
    .finish()
}
