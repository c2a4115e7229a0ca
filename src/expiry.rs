//! Expiry worker
//!
//! Periodically expires unpaid orders past their deadline and gives their
//! units back to the fast store. The revert is guarded by the idempotency
//! record, so a rerun over the same orders restores nothing twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::SeckillConfig;
use crate::error::SeckillError;
use crate::models::Order;
use crate::persistence::OrderStore;
use crate::stock::{MultiLevelInventory, RevertOutcome};

pub struct ExpiryWorker {
    orders: Arc<dyn OrderStore>,
    inventory: Arc<MultiLevelInventory>,
    interval: Duration,
    page_size: i64,
}

impl ExpiryWorker {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        inventory: Arc<MultiLevelInventory>,
        config: &SeckillConfig,
    ) -> Self {
        Self {
            orders,
            inventory,
            interval: Duration::from_secs(config.expiry_interval_secs),
            page_size: config.expiry_page_size,
        }
    }

    /// Run until shutdown; one scan per interval
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            page_size = self.page_size,
            "expiry worker started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
            if let Err(e) = self.scan_once().await {
                error!(error = %e, "expiry scan failed");
            }
        }
        debug!("expiry worker stopped");
    }

    /// One full pass over deadline-expired pending orders, in pages
    pub async fn scan_once(&self) -> Result<usize, SeckillError> {
        let mut expired_total = 0;
        loop {
            let now = Utc::now();
            let batch = self.orders.find_expired(now, self.page_size).await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len() as i64;

            for order in batch {
                match self.expire_one(&order).await {
                    Ok(true) => expired_total += 1,
                    Ok(false) => {}
                    Err(e) => {
                        error!(
                            order_no = order.order_no,
                            error = %e,
                            "failed to expire order"
                        );
                    }
                }
            }

            if batch_len < self.page_size {
                break;
            }
        }

        if expired_total > 0 {
            info!(count = expired_total, "expired unpaid orders");
        }
        Ok(expired_total)
    }

    /// Expire one order: CAS the status, then restore inventory. The CAS
    /// makes racing workers skip orders another one already took; the
    /// idempotency guard makes a repeated revert harmless.
    async fn expire_one(&self, order: &Order) -> Result<bool, SeckillError> {
        if !self.orders.mark_expired(order.order_no).await? {
            // Paid, cancelled or expired by a concurrent worker meanwhile
            return Ok(false);
        }

        let outcome = self
            .inventory
            .revert(
                order.activity_id,
                order.goods_id,
                order.user_id,
                &order.request_id,
                order.quantity as i64,
            )
            .await?;

        match outcome {
            RevertOutcome::Reverted { new_remaining } => {
                self.orders
                    .append_stock_log(
                        order.activity_id,
                        order.goods_id,
                        order.user_id,
                        order.quantity as i64,
                        "order_expired",
                        &order.request_id,
                    )
                    .await?;
                info!(
                    order_no = order.order_no,
                    activity_id = order.activity_id,
                    qty = order.quantity,
                    new_remaining,
                    "expired order restored to stock"
                );
            }
            RevertOutcome::AlreadyReverted => {
                debug!(
                    order_no = order.order_no,
                    "no idempotency record, stock untouched"
                );
            }
        }
        Ok(true)
    }
}
