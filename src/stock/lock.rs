//! Named per-activity stock lock
//!
//! Thin layer over the backend lock primitives: bounded acquisition with
//! jittered retries and a guard that ties release to the owner token. The
//! TTL must exceed the worst-case critical section; release after TTL
//! expiry is harmless because the token no longer matches.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::backend::StockBackend;
use crate::core_types::ActivityId;
use crate::error::SeckillError;

/// Default lock TTL for reload / drift-repair critical sections
pub const STOCK_LOCK_TTL: Duration = Duration::from_secs(5);

const ACQUIRE_ATTEMPTS: u32 = 3;

/// Owned lock over one activity's stock keys
pub struct StockLockGuard {
    backend: Arc<dyn StockBackend>,
    activity_id: ActivityId,
    token: String,
}

impl StockLockGuard {
    /// Try a few times with a short jittered pause, then give up with
    /// `LockBusy` so the caller can retry on its next cycle.
    pub async fn acquire(
        backend: Arc<dyn StockBackend>,
        activity_id: ActivityId,
        ttl: Duration,
    ) -> Result<Self, SeckillError> {
        for attempt in 0..ACQUIRE_ATTEMPTS {
            if let Some(token) = backend.try_lock(activity_id, ttl).await? {
                return Ok(Self {
                    backend,
                    activity_id,
                    token,
                });
            }
            if attempt + 1 < ACQUIRE_ATTEMPTS {
                let pause = rand::thread_rng().gen_range(20..80);
                tokio::time::sleep(Duration::from_millis(pause)).await;
            }
        }
        Err(SeckillError::LockBusy(activity_id))
    }

    /// Release the lock. Ownership is checked against the token, so a lock
    /// that expired and was re-acquired by someone else is left alone.
    pub async fn release(self) {
        match self
            .backend
            .unlock(self.activity_id, &self.token)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(
                activity_id = self.activity_id,
                "stock lock was no longer ours at release"
            ),
            Err(e) => warn!(
                activity_id = self.activity_id,
                error = %e,
                "failed to release stock lock"
            ),
        }
    }
}
