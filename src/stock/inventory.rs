//! Multi-level inventory façade (L0 -> L1 -> L2)
//!
//! Single entry point for every inventory mutation. Writers dispatch to the
//! atomic backend; reads prefer the per-process mirror when fresh. The
//! durable tier trails the fast tier and is reconciled by the background
//! workers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::backend::{
    DeductOutcome, DeductRequest, RevertOutcome, RevertRequest, StockBackend,
};
use super::local_cache::LocalStockCache;
use super::lock::{STOCK_LOCK_TTL, StockLockGuard};
use crate::config::SeckillConfig;
use crate::core_types::{ActivityId, GoodsId, UserId};
use crate::error::SeckillError;
use crate::models::Activity;
use crate::persistence::ActivityStore;

/// Outcome of one flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushResult {
    Flushed { sold: i64 },
    /// L1 key missing - nothing to flush
    SkippedMissing,
    /// Row version moved under us - retried on the next cycle
    SkippedVersionMismatch,
}

pub struct MultiLevelInventory {
    backend: Arc<dyn StockBackend>,
    activities: Arc<dyn ActivityStore>,
    local: LocalStockCache,
    l1_ttl: Duration,
    idempotency_grace: Duration,
}

impl MultiLevelInventory {
    pub fn new(
        backend: Arc<dyn StockBackend>,
        activities: Arc<dyn ActivityStore>,
        config: &SeckillConfig,
    ) -> Self {
        Self {
            backend,
            activities,
            local: LocalStockCache::new(config.local_cache_ttl()),
            l1_ttl: Duration::from_secs(config.stock_cache_ttl_secs),
            idempotency_grace: Duration::from_secs(config.idempotency_grace_secs),
        }
    }

    pub fn backend(&self) -> Arc<dyn StockBackend> {
        self.backend.clone()
    }

    /// Copy `initial - sold` from the durable row into L1 without
    /// overwriting a populated key, then warm L0.
    pub async fn preload(&self, activity: &Activity) -> Result<bool, SeckillError> {
        let remaining = (activity.initial_stock - activity.sold).max(0);
        let created = self
            .backend
            .preload(activity.id, activity.goods_id, remaining, self.l1_ttl)
            .await?;
        if created {
            info!(
                activity_id = activity.id,
                remaining, "stock preloaded into fast store"
            );
        } else {
            debug!(
                activity_id = activity.id,
                "fast store already populated, preload skipped"
            );
        }
        if let Some(current) = self
            .backend
            .remaining(activity.id, activity.goods_id)
            .await?
        {
            self.local.put(activity.id, current);
        }
        Ok(created)
    }

    /// Atomic deduction. The user quota cell expires with the activity;
    /// the idempotency record outlives it by the configured grace.
    pub async fn try_deduct(
        &self,
        activity: &Activity,
        user_id: UserId,
        request_id: &str,
        qty: i64,
    ) -> Result<DeductOutcome, SeckillError> {
        let until_end = activity.secs_until_end(Utc::now()).max(1);
        let req = DeductRequest {
            activity_id: activity.id,
            goods_id: activity.goods_id,
            user_id,
            request_id: request_id.to_string(),
            qty,
            per_user_limit: activity.per_user_limit as i64,
            user_ttl: Duration::from_secs(until_end),
            request_ttl: Duration::from_secs(until_end) + self.idempotency_grace,
        };
        let outcome = self.backend.try_deduct(&req).await?;
        self.local.invalidate(activity.id);
        Ok(outcome)
    }

    /// Undo a deduction identified by its deduct id. Safe to call more than
    /// once; only the first call restores state.
    pub async fn revert(
        &self,
        activity_id: ActivityId,
        goods_id: GoodsId,
        user_id: UserId,
        deduct_id: &str,
        qty: i64,
    ) -> Result<RevertOutcome, SeckillError> {
        let req = RevertRequest {
            activity_id,
            goods_id,
            user_id,
            request_id: deduct_id.to_string(),
            qty,
        };
        let outcome = self.backend.revert(&req).await?;
        self.local.invalidate(activity_id);
        match &outcome {
            RevertOutcome::Reverted { new_remaining } => {
                info!(
                    activity_id,
                    deduct_id, new_remaining, "inventory deduction reverted"
                );
            }
            RevertOutcome::AlreadyReverted => {
                debug!(activity_id, deduct_id, "revert skipped, nothing recorded");
            }
        }
        Ok(outcome)
    }

    /// Current remaining: L0 if fresh, else L1 (refreshing L0)
    pub async fn peek(&self, activity: &Activity) -> Result<i64, SeckillError> {
        if let Some(cached) = self.local.get(activity.id) {
            return Ok(cached);
        }
        let remaining = self
            .backend
            .remaining(activity.id, activity.goods_id)
            .await?
            .ok_or(SeckillError::StockNotLoaded)?;
        self.local.put(activity.id, remaining);
        Ok(remaining)
    }

    /// Persist L1's view into the durable row under a version check
    pub async fn flush_to_durable(&self, activity_id: ActivityId) -> Result<FlushResult, SeckillError> {
        let activity = self
            .activities
            .get(activity_id)
            .await?
            .ok_or(SeckillError::ActivityNotFound(activity_id))?;

        let Some(remaining) = self
            .backend
            .remaining(activity.id, activity.goods_id)
            .await?
        else {
            return Ok(FlushResult::SkippedMissing);
        };

        let sold = (activity.initial_stock - remaining).max(0);
        let updated = self
            .activities
            .update_sold(activity.id, sold, activity.version)
            .await?;
        if updated {
            debug!(activity_id, sold, remaining, "stock flushed to durable store");
            Ok(FlushResult::Flushed { sold })
        } else {
            warn!(
                activity_id,
                expected_version = activity.version,
                "stock flush skipped on version mismatch"
            );
            Ok(FlushResult::SkippedVersionMismatch)
        }
    }

    /// Authoritative overwrite of L1 from the durable row, serialized by the
    /// per-activity lock.
    pub async fn reload_from_durable(&self, activity_id: ActivityId) -> Result<i64, SeckillError> {
        let guard =
            StockLockGuard::acquire(self.backend.clone(), activity_id, STOCK_LOCK_TTL).await?;

        let result = async {
            let activity = self
                .activities
                .get(activity_id)
                .await?
                .ok_or(SeckillError::ActivityNotFound(activity_id))?;
            let remaining = (activity.initial_stock - activity.sold).max(0);
            self.backend
                .overwrite(activity.id, activity.goods_id, remaining, self.l1_ttl)
                .await?;
            self.local.invalidate(activity_id);
            info!(activity_id, remaining, "fast store reloaded from durable");
            Ok(remaining)
        }
        .await;

        guard.release().await;
        result
    }

    /// Drop the per-process mirror for one activity (drift repair rewrote L1)
    pub fn invalidate_local(&self, activity_id: ActivityId) {
        self.local.invalidate(activity_id);
    }

    /// TTL applied to L1 keys this façade writes
    pub fn l1_ttl(&self) -> Duration {
        self.l1_ttl
    }
}
