//! Stock backend trait and the in-memory implementation
//!
//! The backend is the seam between the inventory façade and the fast store.
//! `RedisStockBackend` evaluates the server-side scripts; where scripting is
//! unavailable the same contract can be met by an equivalent atomic
//! transaction, which is what `MemoryStockBackend` does under a single cell
//! mutex. The memory backend doubles as the test double for every invariant
//! the scripts must uphold.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core_types::{ActivityId, GoodsId, UserId};
use crate::error::SeckillError;

/// Input to one atomic deduction
#[derive(Debug, Clone)]
pub struct DeductRequest {
    pub activity_id: ActivityId,
    pub goods_id: GoodsId,
    pub user_id: UserId,
    pub request_id: String,
    pub qty: i64,
    pub per_user_limit: i64,
    /// TTL for the user quota cell (activity end)
    pub user_ttl: Duration,
    /// TTL for the idempotency record (activity end + grace)
    pub request_ttl: Duration,
}

/// Successful deduction
#[derive(Debug, Clone)]
pub struct DeductOutcome {
    pub new_remaining: i64,
    /// Handle required to revert; equals the recorded request id
    pub deduct_id: String,
}

/// Input to one revert, symmetric to the deduction it undoes
#[derive(Debug, Clone)]
pub struct RevertRequest {
    pub activity_id: ActivityId,
    pub goods_id: GoodsId,
    pub user_id: UserId,
    pub request_id: String,
    pub qty: i64,
}

/// Revert result. `AlreadyReverted` means the idempotency record was gone:
/// nothing was restored and nothing needs to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertOutcome {
    Reverted { new_remaining: i64 },
    AlreadyReverted,
}

/// Atomic operations on the fast-store inventory tier (L1)
#[async_trait]
pub trait StockBackend: Send + Sync {
    /// Populate the remaining counter only if absent (SETNX semantics).
    /// Returns true when this call created the key.
    async fn preload(
        &self,
        activity_id: ActivityId,
        goods_id: GoodsId,
        remaining: i64,
        ttl: Duration,
    ) -> Result<bool, SeckillError>;

    /// The atomic check-and-decrement sequence. Business failures surface
    /// as the matching `SeckillError` variant.
    async fn try_deduct(&self, req: &DeductRequest) -> Result<DeductOutcome, SeckillError>;

    /// Undo a prior deduction. Idempotent: a second call for the same
    /// request id reports `AlreadyReverted`.
    async fn revert(&self, req: &RevertRequest) -> Result<RevertOutcome, SeckillError>;

    /// Current L1 remaining, `None` when the key is not loaded
    async fn remaining(
        &self,
        activity_id: ActivityId,
        goods_id: GoodsId,
    ) -> Result<Option<i64>, SeckillError>;

    /// Authoritative overwrite of L1. Callers must hold the activity lock.
    async fn overwrite(
        &self,
        activity_id: ActivityId,
        goods_id: GoodsId,
        remaining: i64,
        ttl: Duration,
    ) -> Result<(), SeckillError>;

    /// Units bought so far by one user in one activity
    async fn user_bought(
        &self,
        activity_id: ActivityId,
        user_id: UserId,
    ) -> Result<i64, SeckillError>;

    /// Acquire the named per-activity lock. Returns the owner token on
    /// success, `None` when another owner holds it.
    async fn try_lock(
        &self,
        activity_id: ActivityId,
        ttl: Duration,
    ) -> Result<Option<String>, SeckillError>;

    /// Release the lock if and only if `token` still owns it
    async fn unlock(&self, activity_id: ActivityId, token: &str) -> Result<bool, SeckillError>;
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Default)]
struct StockCell {
    remaining: i64,
    bought: HashMap<UserId, i64>,
    requests: HashSet<String>,
    audit: Vec<String>,
}

#[derive(Default)]
struct MemoryState {
    cells: HashMap<(ActivityId, GoodsId), StockCell>,
    locks: HashMap<ActivityId, String>,
}

/// Mutex-atomic stock backend. One lock guards each full evaluation, which
/// gives the same total order per activity the scripts provide.
#[derive(Default)]
pub struct MemoryStockBackend {
    state: Mutex<MemoryState>,
}

impl MemoryStockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit entries recorded for an activity, oldest first
    pub fn audit_log(&self, activity_id: ActivityId, goods_id: GoodsId) -> Vec<String> {
        let state = self.state.lock().expect("stock state mutex poisoned");
        state
            .cells
            .get(&(activity_id, goods_id))
            .map(|c| c.audit.clone())
            .unwrap_or_default()
    }

    /// Drop every cell and lock (tests only need this between scenarios)
    pub fn clear(&self) {
        let mut state = self.state.lock().expect("stock state mutex poisoned");
        state.cells.clear();
        state.locks.clear();
    }
}

#[async_trait]
impl StockBackend for MemoryStockBackend {
    async fn preload(
        &self,
        activity_id: ActivityId,
        goods_id: GoodsId,
        remaining: i64,
        _ttl: Duration,
    ) -> Result<bool, SeckillError> {
        let mut state = self.state.lock().expect("stock state mutex poisoned");
        match state.cells.entry((activity_id, goods_id)) {
            std::collections::hash_map::Entry::Occupied(_) => Ok(false),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(StockCell {
                    remaining,
                    ..Default::default()
                });
                Ok(true)
            }
        }
    }

    async fn try_deduct(&self, req: &DeductRequest) -> Result<DeductOutcome, SeckillError> {
        let mut state = self.state.lock().expect("stock state mutex poisoned");
        let cell = state
            .cells
            .get_mut(&(req.activity_id, req.goods_id))
            .ok_or(SeckillError::StockNotLoaded)?;

        if cell.remaining < req.qty {
            return Err(SeckillError::OutOfStock);
        }
        let bought = cell.bought.get(&req.user_id).copied().unwrap_or(0);
        if bought + req.qty > req.per_user_limit {
            return Err(SeckillError::OverUserLimit);
        }
        if cell.requests.contains(&req.request_id) {
            return Err(SeckillError::DuplicateRequest { order_no: None });
        }

        cell.remaining -= req.qty;
        *cell.bought.entry(req.user_id).or_insert(0) += req.qty;
        cell.requests.insert(req.request_id.clone());
        cell.audit
            .push(format!("{}:{}", req.user_id, req.qty));

        Ok(DeductOutcome {
            new_remaining: cell.remaining,
            deduct_id: req.request_id.clone(),
        })
    }

    async fn revert(&self, req: &RevertRequest) -> Result<RevertOutcome, SeckillError> {
        let mut state = self.state.lock().expect("stock state mutex poisoned");
        let cell = state
            .cells
            .get_mut(&(req.activity_id, req.goods_id))
            .ok_or(SeckillError::StockNotLoaded)?;

        if !cell.requests.remove(&req.request_id) {
            return Ok(RevertOutcome::AlreadyReverted);
        }

        cell.remaining += req.qty;
        let bought = cell.bought.get(&req.user_id).copied().unwrap_or(0);
        if bought > req.qty {
            cell.bought.insert(req.user_id, bought - req.qty);
        } else {
            cell.bought.remove(&req.user_id);
        }
        cell.audit
            .push(format!("revert:{}:{}", req.user_id, req.qty));

        Ok(RevertOutcome::Reverted {
            new_remaining: cell.remaining,
        })
    }

    async fn remaining(
        &self,
        activity_id: ActivityId,
        goods_id: GoodsId,
    ) -> Result<Option<i64>, SeckillError> {
        let state = self.state.lock().expect("stock state mutex poisoned");
        Ok(state
            .cells
            .get(&(activity_id, goods_id))
            .map(|c| c.remaining))
    }

    async fn overwrite(
        &self,
        activity_id: ActivityId,
        goods_id: GoodsId,
        remaining: i64,
        _ttl: Duration,
    ) -> Result<(), SeckillError> {
        let mut state = self.state.lock().expect("stock state mutex poisoned");
        state
            .cells
            .entry((activity_id, goods_id))
            .or_default()
            .remaining = remaining;
        Ok(())
    }

    async fn user_bought(
        &self,
        activity_id: ActivityId,
        user_id: UserId,
    ) -> Result<i64, SeckillError> {
        let state = self.state.lock().expect("stock state mutex poisoned");
        Ok(state
            .cells
            .iter()
            .filter(|((aid, _), _)| *aid == activity_id)
            .filter_map(|(_, cell)| cell.bought.get(&user_id))
            .sum())
    }

    async fn try_lock(
        &self,
        activity_id: ActivityId,
        _ttl: Duration,
    ) -> Result<Option<String>, SeckillError> {
        let mut state = self.state.lock().expect("stock state mutex poisoned");
        if state.locks.contains_key(&activity_id) {
            return Ok(None);
        }
        let token = uuid::Uuid::new_v4().to_string();
        state.locks.insert(activity_id, token.clone());
        Ok(Some(token))
    }

    async fn unlock(&self, activity_id: ActivityId, token: &str) -> Result<bool, SeckillError> {
        let mut state = self.state.lock().expect("stock state mutex poisoned");
        match state.locks.get(&activity_id) {
            Some(owner) if owner == token => {
                state.locks.remove(&activity_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
