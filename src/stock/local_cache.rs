//! L0: per-process stock mirror
//!
//! A sharded map of `activity -> (value, fetched_at)` with a freshness
//! window of at most 200 ms. It exists to short-circuit reads for
//! activities that are obviously sold out; any write through the deduct
//! path invalidates the entry. Readers of different activities never
//! contend: the map is sharded internally by key.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::core_types::ActivityId;

#[derive(Clone, Copy)]
struct CachedValue {
    remaining: i64,
    fetched_at: Instant,
}

pub struct LocalStockCache {
    entries: DashMap<ActivityId, CachedValue>,
    ttl: Duration,
}

impl LocalStockCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Fresh value if any; stale entries read as a miss
    pub fn get(&self, activity_id: ActivityId) -> Option<i64> {
        let entry = self.entries.get(&activity_id)?;
        if entry.fetched_at.elapsed() <= self.ttl {
            Some(entry.remaining)
        } else {
            None
        }
    }

    pub fn put(&self, activity_id: ActivityId, remaining: i64) {
        self.entries.insert(
            activity_id,
            CachedValue {
                remaining,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, activity_id: ActivityId) {
        self.entries.remove(&activity_id);
    }
}
