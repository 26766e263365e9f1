//! Usage metering for billing.

pub mod aggregate;
pub mod meter;
pub mod record;
pub mod subscription;

pub use aggregate::{UsageAggregator, UsageBatch, UsageSummary};
pub use meter::{UsageMeter, UsageMeterHandle, UsageSink};
pub use record::{OperationKind, UsageRecord};
pub use subscription::{ConnectionScope, SubscriptionSupervisor};
