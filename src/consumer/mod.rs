//! Order consumer pool (queue -> durable orders)
//!
//! Workers drain the priority queue and materialize orders. Priority
//! workers always poll VIP ahead of NORMAL; normal-only workers never see
//! VIP traffic. A delivery is acknowledged only after the order is durable
//! or the deduction has been compensated, so redelivery can never lose a
//! paid-for unit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SeckillConfig;
use crate::error::SeckillError;
use crate::models::{OrderIntent, SeckillVerdict};
use crate::persistence::{CreateOutcome, OrderStore};
use crate::queue::{Delivery, OrderQueue, Topic};
use crate::seckill::result_store::ResultStore;
use crate::snowflake::OrderNoGenerator;
use crate::stock::MultiLevelInventory;

/// Worker flavor: priority workers drain VIP first, normal workers only
/// ever touch the NORMAL topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Priority,
    NormalOnly,
}

/// Shared state for one consumer worker
pub struct OrderConsumer {
    queue: Arc<dyn OrderQueue>,
    orders: Arc<dyn OrderStore>,
    inventory: Arc<MultiLevelInventory>,
    results: Arc<dyn ResultStore>,
    order_nos: Arc<OrderNoGenerator>,
    retry_times: u32,
    retry_backoff: Duration,
    order_timeout: Duration,
    result_ttl: Duration,
    consume_timeout: Duration,
}

impl OrderConsumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn OrderQueue>,
        orders: Arc<dyn OrderStore>,
        inventory: Arc<MultiLevelInventory>,
        results: Arc<dyn ResultStore>,
        order_nos: Arc<OrderNoGenerator>,
        config: &SeckillConfig,
    ) -> Self {
        Self {
            queue,
            orders,
            inventory,
            results,
            order_nos,
            retry_times: config.retry_times,
            retry_backoff: Duration::from_secs(config.retry_backoff_secs),
            order_timeout: config.order_timeout(),
            result_ttl: Duration::from_secs(config.result_ttl_secs),
            consume_timeout: config.consume_timeout(),
        }
    }

    /// Worker loop. Runs until shutdown is signaled, then drains what is
    /// already buffered before returning.
    pub async fn run(&self, kind: WorkerKind, mut shutdown: watch::Receiver<bool>) {
        debug!(kind = ?kind, "order consumer started");
        loop {
            let draining = *shutdown.borrow();
            let delivery = match self.next_delivery(kind, draining).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    if draining {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "queue poll failed");
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    continue;
                }
            };

            self.process(delivery).await;

            // Pick up a shutdown that arrived mid-message
            if shutdown.has_changed().unwrap_or(false) {
                let _ = shutdown.borrow_and_update();
            }
        }
        debug!(kind = ?kind, "order consumer stopped");
    }

    async fn next_delivery(
        &self,
        kind: WorkerKind,
        draining: bool,
    ) -> Result<Option<Delivery>, SeckillError> {
        match kind {
            WorkerKind::Priority => {
                if let Some(delivery) = self.queue.try_consume(Topic::Vip).await? {
                    return Ok(Some(delivery));
                }
                if let Some(delivery) = self.queue.try_consume(Topic::Normal).await? {
                    return Ok(Some(delivery));
                }
                if draining {
                    return Ok(None);
                }
                self.queue.consume_any(self.consume_timeout).await
            }
            WorkerKind::NormalOnly => {
                if let Some(delivery) = self.queue.try_consume(Topic::Normal).await? {
                    return Ok(Some(delivery));
                }
                if draining {
                    return Ok(None);
                }
                self.queue.consume(Topic::Normal, self.consume_timeout).await
            }
        }
    }

    /// Full lifecycle of one delivery, ending in an ack
    pub async fn process(&self, delivery: Delivery) {
        let intent = match OrderIntent::decode(&delivery.payload) {
            Ok(intent) => intent,
            Err(e) => {
                // Malformed payloads are dropped; redelivering cannot fix them
                error!(error = %e, topic = delivery.topic.as_str(), "dropping malformed intent");
                self.ack(&delivery).await;
                return;
            }
        };

        self.handle_intent(&intent).await;
        self.ack(&delivery).await;
    }

    /// Materialize one intent: insert with retries, then publish the
    /// verdict; on exhaustion revert the deduction.
    pub async fn handle_intent(&self, intent: &OrderIntent) {
        let amount = intent.price_snapshot * Decimal::from(intent.quantity);
        let deadline = Utc::now() + chrono::Duration::from_std(self.order_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));

        let mut last_error: Option<SeckillError> = None;
        for attempt in 0..=self.retry_times {
            if attempt > 0 {
                let backoff = self.retry_backoff * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(backoff).await;
            }

            let order_no = match self.order_nos.next() {
                Ok(order_no) => order_no,
                Err(e) => {
                    warn!(
                        request_id = %intent.request_id,
                        attempt,
                        error = %e,
                        "order number generation failed"
                    );
                    last_error = Some(e);
                    continue;
                }
            };

            match self
                .orders
                .create_pending(intent, order_no, amount, deadline)
                .await
            {
                Ok(CreateOutcome::Created) => {
                    info!(
                        request_id = %intent.request_id,
                        order_no,
                        user_id = intent.user_id,
                        activity_id = intent.activity_id,
                        "order materialized"
                    );
                    self.publish_verdict(
                        &intent.request_id,
                        SeckillVerdict::Success { order_no },
                    )
                    .await;
                    return;
                }
                Ok(CreateOutcome::Duplicate(existing)) => {
                    // At-least-once redelivery: the first delivery won
                    debug!(
                        request_id = %intent.request_id,
                        order_no = existing,
                        "duplicate delivery resolved to existing order"
                    );
                    self.publish_verdict(
                        &intent.request_id,
                        SeckillVerdict::Success { order_no: existing },
                    )
                    .await;
                    return;
                }
                Err(e) => {
                    warn!(
                        request_id = %intent.request_id,
                        attempt,
                        error = %e,
                        "durable order insert failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        // Retries exhausted: give the unit back and record the failure
        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        error!(
            request_id = %intent.request_id,
            reason = %reason,
            "order materialization exhausted retries, reverting"
        );

        if let Err(revert_err) = self
            .inventory
            .revert(
                intent.activity_id,
                intent.goods_id,
                intent.user_id,
                &intent.deduct_id,
                intent.quantity as i64,
            )
            .await
        {
            error!(
                request_id = %intent.request_id,
                error = %revert_err,
                "revert after failed materialization also failed"
            );
        }

        self.publish_verdict(
            &intent.request_id,
            SeckillVerdict::Failure {
                reason: SeckillError::DurableWriteFailed(reason).code().to_string(),
            },
        )
        .await;
    }

    async fn publish_verdict(&self, request_id: &str, verdict: SeckillVerdict) {
        if let Err(e) = self
            .results
            .publish(request_id, &verdict, self.result_ttl)
            .await
        {
            warn!(request_id = %request_id, error = %e, "failed to publish verdict");
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(delivery).await {
            warn!(topic = delivery.topic.as_str(), error = %e, "ack failed");
        }
    }
}

/// Spawns and owns the worker set `{V priority, N normal-only}`
pub struct ConsumerPool {
    consumer: Arc<OrderConsumer>,
    vip_workers: usize,
    normal_workers: usize,
}

impl ConsumerPool {
    pub fn new(consumer: Arc<OrderConsumer>, config: &SeckillConfig) -> Self {
        Self {
            consumer,
            vip_workers: config.vip_workers,
            normal_workers: config.normal_workers,
        }
    }

    /// Spawn all workers; they run until the shutdown signal flips
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.vip_workers + self.normal_workers);
        for _ in 0..self.vip_workers {
            let consumer = self.consumer.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                consumer.run(WorkerKind::Priority, shutdown).await;
            }));
        }
        for _ in 0..self.normal_workers {
            let consumer = self.consumer.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                consumer.run(WorkerKind::NormalOnly, shutdown).await;
            }));
        }
        info!(
            vip = self.vip_workers,
            normal = self.normal_workers,
            "consumer pool started"
        );
        handles
    }
}
