//! Reconciliation workers
//!
//! Three independent loops keep the fast and durable tiers honest:
//! - push: repopulate a missing L1 key from the durable row (never
//!   overwrites a populated key mid-sale)
//! - flush: persist L1's view into the durable row under a version check
//! - drift: compare `initial - sold_durable - reserved` against L1 and
//!   repair under the per-activity lock when they disagree
//!
//! Drift repair is the only writer allowed to overwrite a populated L1; it
//! re-derives the expected value while holding the lock so deductions that
//! completed before the overwrite are accounted for.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SeckillConfig;
use crate::error::SeckillError;
use crate::models::Activity;
use crate::persistence::{ActivityStore, OrderStore};
use crate::stock::lock::{STOCK_LOCK_TTL, StockLockGuard};
use crate::stock::{MultiLevelInventory, StockBackend};

/// One drift check, before and (when repaired) after
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub activity_id: u64,
    pub redis_stock: i64,
    pub durable_stock: i64,
    pub reserved: i64,
    /// `durable_stock - reserved - redis_stock`
    pub drift: i64,
    pub repaired_to: Option<i64>,
}

pub struct ReconcileWorker {
    activities: Arc<dyn ActivityStore>,
    orders: Arc<dyn OrderStore>,
    inventory: Arc<MultiLevelInventory>,
    backend: Arc<dyn StockBackend>,
    push_interval: Duration,
    flush_interval: Duration,
    drift_interval: Duration,
    tolerance: i64,
}

impl ReconcileWorker {
    pub fn new(
        activities: Arc<dyn ActivityStore>,
        orders: Arc<dyn OrderStore>,
        inventory: Arc<MultiLevelInventory>,
        config: &SeckillConfig,
    ) -> Self {
        Self {
            activities,
            orders,
            backend: inventory.backend(),
            inventory,
            push_interval: Duration::from_secs(config.push_interval_secs),
            flush_interval: Duration::from_secs(config.flush_interval_secs),
            drift_interval: Duration::from_secs(config.drift_interval_secs),
            tolerance: config.drift_tolerance,
        }
    }

    /// Spawn the three loops
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let handles = vec![
            {
                let worker = self.clone();
                let stop = shutdown.clone();
                tokio::spawn(async move { worker.run_push(stop).await })
            },
            {
                let worker = self.clone();
                let stop = shutdown.clone();
                tokio::spawn(async move { worker.run_flush(stop).await })
            },
            {
                let worker = self.clone();
                tokio::spawn(async move { worker.run_drift(shutdown).await })
            },
        ];

        info!(
            push_secs = self.push_interval.as_secs(),
            flush_secs = self.flush_interval.as_secs(),
            drift_secs = self.drift_interval.as_secs(),
            "reconciliation workers started"
        );
        handles
    }

    async fn run_push(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.push_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
            match self.push_once().await {
                Ok(pushed) if pushed > 0 => debug!(pushed, "push cycle done"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "push cycle failed"),
            }
        }
        debug!("push loop stopped");
    }

    async fn run_flush(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.flush_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
            match self.flush_once().await {
                Ok(flushed) if flushed > 0 => debug!(flushed, "flush cycle done"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "flush cycle failed"),
            }
        }
        debug!("flush loop stopped");
    }

    async fn run_drift(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.drift_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
            match self.drift_once().await {
                Ok(reports) => {
                    let repaired = reports.iter().filter(|r| r.repaired_to.is_some()).count();
                    if repaired > 0 {
                        debug!(repaired, "drift cycle done");
                    }
                }
                Err(e) => error!(error = %e, "drift cycle failed"),
            }
        }
        debug!("drift loop stopped");
    }

    /// Repopulate missing L1 keys from the durable rows. Populated keys are
    /// never touched here.
    pub async fn push_once(&self) -> Result<usize, SeckillError> {
        let mut pushed = 0;
        for activity in self.activities.list_active().await? {
            let present = self
                .backend
                .remaining(activity.id, activity.goods_id)
                .await?
                .is_some();
            if present {
                continue;
            }
            if self.inventory.preload(&activity).await? {
                pushed += 1;
                info!(activity_id = activity.id, "repopulated missing fast-store stock");
            }
        }
        Ok(pushed)
    }

    /// Flush every active activity's L1 view into its durable row
    pub async fn flush_once(&self) -> Result<usize, SeckillError> {
        let mut flushed = 0;
        for activity in self.activities.list_active().await? {
            match self.inventory.flush_to_durable(activity.id).await {
                Ok(crate::stock::inventory::FlushResult::Flushed { .. }) => flushed += 1,
                Ok(_) => {}
                Err(e) => {
                    error!(activity_id = activity.id, error = %e, "flush failed");
                }
            }
        }
        Ok(flushed)
    }

    /// Detect and repair drift for every active activity
    pub async fn drift_once(&self) -> Result<Vec<DriftReport>, SeckillError> {
        let mut reports = Vec::new();
        for activity in self.activities.list_active().await? {
            match self.check_activity(&activity).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => {
                    error!(activity_id = activity.id, error = %e, "drift check failed");
                }
            }
        }
        Ok(reports)
    }

    async fn check_activity(
        &self,
        activity: &Activity,
    ) -> Result<Option<DriftReport>, SeckillError> {
        let Some(redis_stock) = self
            .backend
            .remaining(activity.id, activity.goods_id)
            .await?
        else {
            // Missing key is the push loop's job, not drift's
            debug!(activity_id = activity.id, "no fast-store key, drift check skipped");
            return Ok(None);
        };

        let reserved = self.orders.reserved_qty(activity.id).await?;
        let sold_durable = self.orders.sold_qty(activity.id).await?;
        let durable_stock = activity.initial_stock - sold_durable;
        let drift = durable_stock - reserved - redis_stock;

        let mut report = DriftReport {
            activity_id: activity.id,
            redis_stock,
            durable_stock,
            reserved,
            drift,
            repaired_to: None,
        };

        if drift.abs() <= self.tolerance {
            return Ok(Some(report));
        }

        warn!(
            activity_id = activity.id,
            redis_stock,
            durable_stock,
            reserved,
            drift,
            "inventory drift detected, repairing"
        );

        let guard =
            StockLockGuard::acquire(self.backend.clone(), activity.id, STOCK_LOCK_TTL).await?;
        let repair = async {
            // Re-derive under the lock: deductions that finished before the
            // overwrite are visible in these reads
            let reserved = self.orders.reserved_qty(activity.id).await?;
            let sold_durable = self.orders.sold_qty(activity.id).await?;
            let expected = (activity.initial_stock - sold_durable - reserved).max(0);
            self.backend
                .overwrite(
                    activity.id,
                    activity.goods_id,
                    expected,
                    self.inventory.l1_ttl(),
                )
                .await?;
            self.inventory.invalidate_local(activity.id);
            Ok::<i64, SeckillError>(expected)
        }
        .await;
        guard.release().await;

        let repaired_to = repair?;
        self.orders
            .append_stock_log(
                activity.id,
                activity.goods_id,
                0,
                drift,
                "drift_repaired",
                "",
            )
            .await?;
        info!(
            activity_id = activity.id,
            before = redis_stock,
            after = repaired_to,
            "inventory drift repaired"
        );

        report.repaired_to = Some(repaired_to);
        Ok(Some(report))
    }
}
