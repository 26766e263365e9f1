//! Fire-and-forget usage metering.
//!
//! `record` never blocks: records go into a bounded channel and a background
//! aggregator flushes batches to the billing sink on an interval. Failed
//! batches are retried on later flushes until the retry limit, then dropped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::aggregate::{UsageAggregator, UsageBatch};
use super::record::UsageRecord;
use crate::config::UsageConfig;
use crate::metrics;
use crate::upstream::{with_timeout, UpstreamError};

/// Billing ingestion endpoint.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn deliver(&self, batch: &UsageBatch) -> Result<(), UpstreamError>;
}

#[derive(Clone)]
pub struct UsageMeter {
    tx: mpsc::Sender<UsageRecord>,
}

impl UsageMeter {
    pub fn spawn(config: &UsageConfig, sink: Arc<dyn UsageSink>) -> (Self, UsageMeterHandle) {
        let (tx, rx) = mpsc::channel(config.buffer_size.max(1));
        let shutdown = CancellationToken::new();

        let worker = Aggregator {
            rx,
            sink,
            aggregator: UsageAggregator::default(),
            pending: VecDeque::new(),
            source_node: config.source_node.clone(),
            retry_limit: config.retry_limit.max(1),
            delivery_timeout: config.flush_interval.min(Duration::from_secs(10)),
        };
        let task = tokio::spawn(worker.run(config.flush_interval, shutdown.clone()));

        (Self { tx }, UsageMeterHandle { shutdown, task })
    }

    /// Hand a record to the meter. Drops it (and logs) if the buffer is full.
    pub fn record(&self, record: UsageRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                metrics::USAGE_RECORDS_DROPPED.with_label_values(&["buffer_full"]).inc();
                warn!(
                    tenant_id = %record.tenant_id,
                    operation_kind = %record.operation_kind,
                    "Usage buffer full, dropping record"
                );
            }
            Err(TrySendError::Closed(record)) => {
                metrics::USAGE_RECORDS_DROPPED.with_label_values(&["closed"]).inc();
                warn!(tenant_id = %record.tenant_id, "Usage meter stopped, dropping record");
            }
        }
    }
}

pub struct UsageMeterHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl UsageMeterHandle {
    /// Drain buffered records, run a final flush and wait for it.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Usage meter task failed");
        }
    }
}

struct Aggregator {
    rx: mpsc::Receiver<UsageRecord>,
    sink: Arc<dyn UsageSink>,
    aggregator: UsageAggregator,
    pending: VecDeque<(UsageBatch, u32)>,
    source_node: String,
    retry_limit: u32,
    delivery_timeout: Duration,
}

impl Aggregator {
    async fn run(mut self, flush_interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            flush_interval_secs = flush_interval.as_secs(),
            "Usage meter started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(record) = self.rx.recv() => self.aggregator.add(record),
                _ = ticker.tick() => self.flush().await,
            }
        }

        self.rx.close();
        while let Ok(record) = self.rx.try_recv() {
            self.aggregator.add(record);
        }
        self.flush().await;
        if !self.pending.is_empty() {
            error!(
                batches = self.pending.len(),
                "Usage batches undelivered at shutdown"
            );
        }
        info!("Usage meter stopped");
    }

    async fn flush(&mut self) {
        if let Some(batch) = self.aggregator.take_batch(&self.source_node) {
            self.pending.push_back((batch, 0));
        }

        let mut retry = VecDeque::new();
        while let Some((batch, attempts)) = self.pending.pop_front() {
            let result = with_timeout(
                "billing",
                self.delivery_timeout,
                self.sink.deliver(&batch),
            )
            .await;

            match result {
                Ok(()) => {
                    metrics::USAGE_BATCHES.with_label_values(&["delivered"]).inc();
                    debug!(
                        summaries = batch.summaries.len(),
                        requests = batch.request_count(),
                        "Usage batch delivered"
                    );
                }
                Err(e) if attempts + 1 >= self.retry_limit => {
                    metrics::USAGE_BATCHES.with_label_values(&["dropped"]).inc();
                    error!(
                        error = %e,
                        attempts = attempts + 1,
                        requests = batch.request_count(),
                        "Usage batch dropped after retries"
                    );
                }
                Err(e) => {
                    metrics::USAGE_BATCHES.with_label_values(&["retry"]).inc();
                    warn!(error = %e, attempts = attempts + 1, "Usage batch delivery failed");
                    retry.push_back((batch, attempts + 1));
                }
            }
        }
        self.pending = retry;
    }
}
