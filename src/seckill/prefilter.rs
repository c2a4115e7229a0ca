//! Pre-filters: rate limiting and degrade switch
//!
//! Both produce a verdict before any inventory is touched. The first
//! failing filter wins and surfaces a typed rejection. Richer limiter and
//! breaker policies live outside the core; these implementations cover the
//! boolean-verdict contract the orchestrator needs.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core_types::{ActivityId, UserId};
use crate::error::SeckillError;

/// Per `{user, ip, activity}` admission check
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(
        &self,
        user_id: UserId,
        client_ip: &str,
        activity_id: ActivityId,
    ) -> Result<(), SeckillError>;
}

/// Manual degrade verdict, per activity or global
pub trait DegradeManager: Send + Sync {
    fn check(&self, activity_id: ActivityId) -> Result<(), SeckillError>;
}

// ============================================================================
// Fixed-window rate limiter
// ============================================================================

struct WindowSlot {
    window_start: Instant,
    count: u32,
}

/// Counter per `(user, activity)` and per `(ip, activity)` over a fixed
/// window. Cheap and sharded; a burst from one user or one address trips
/// it without affecting anyone else.
pub struct FixedWindowRateLimiter {
    window: Duration,
    user_limit: u32,
    ip_limit: u32,
    users: DashMap<(UserId, ActivityId), WindowSlot>,
    ips: DashMap<(String, ActivityId), WindowSlot>,
}

impl FixedWindowRateLimiter {
    pub fn new(window: Duration, user_limit: u32, ip_limit: u32) -> Self {
        Self {
            window,
            user_limit,
            ip_limit,
            users: DashMap::new(),
            ips: DashMap::new(),
        }
    }

    fn admit<K: std::hash::Hash + Eq>(
        map: &DashMap<K, WindowSlot>,
        key: K,
        window: Duration,
        limit: u32,
    ) -> bool {
        let mut slot = map.entry(key).or_insert_with(|| WindowSlot {
            window_start: Instant::now(),
            count: 0,
        });
        if slot.window_start.elapsed() > window {
            slot.window_start = Instant::now();
            slot.count = 0;
        }
        if slot.count >= limit {
            return false;
        }
        slot.count += 1;
        true
    }

    fn retry_after(&self) -> u64 {
        self.window.as_secs().max(1)
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn check(
        &self,
        user_id: UserId,
        client_ip: &str,
        activity_id: ActivityId,
    ) -> Result<(), SeckillError> {
        if !Self::admit(
            &self.users,
            (user_id, activity_id),
            self.window,
            self.user_limit,
        ) {
            return Err(SeckillError::RateLimited {
                retry_after_secs: self.retry_after(),
            });
        }
        if !Self::admit(
            &self.ips,
            (client_ip.to_string(), activity_id),
            self.window,
            self.ip_limit,
        ) {
            return Err(SeckillError::RateLimited {
                retry_after_secs: self.retry_after(),
            });
        }
        Ok(())
    }
}

/// Pass-through limiter for tests and load rigs
pub struct AllowAllRateLimiter;

#[async_trait]
impl RateLimiter for AllowAllRateLimiter {
    async fn check(&self, _: UserId, _: &str, _: ActivityId) -> Result<(), SeckillError> {
        Ok(())
    }
}

// ============================================================================
// Degrade switchboard
// ============================================================================

/// Manual switches: one global, one per activity. Flipped by operators when
/// a dependency is unhealthy; requests are shed before touching inventory.
#[derive(Default)]
pub struct DegradeSwitchboard {
    global: AtomicBool,
    activities: DashMap<ActivityId, ()>,
}

impl DegradeSwitchboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn degrade_all(&self, on: bool) {
        self.global.store(on, Ordering::SeqCst);
    }

    pub fn degrade_activity(&self, activity_id: ActivityId, on: bool) {
        if on {
            self.activities.insert(activity_id, ());
        } else {
            self.activities.remove(&activity_id);
        }
    }
}

impl DegradeManager for DegradeSwitchboard {
    fn check(&self, activity_id: ActivityId) -> Result<(), SeckillError> {
        if self.global.load(Ordering::SeqCst) || self.activities.contains_key(&activity_id) {
            Err(SeckillError::Degraded)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_window_trips_and_recovers() {
        let limiter = FixedWindowRateLimiter::new(Duration::from_millis(50), 2, 100);

        assert!(limiter.check(1, "10.0.0.1", 7).await.is_ok());
        assert!(limiter.check(1, "10.0.0.1", 7).await.is_ok());
        let err = limiter.check(1, "10.0.0.1", 7).await.unwrap_err();
        assert_eq!(err.code(), "RATE_LIMITED");

        // Another user in the same window is unaffected
        assert!(limiter.check(2, "10.0.0.2", 7).await.is_ok());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.check(1, "10.0.0.1", 7).await.is_ok());
    }

    #[tokio::test]
    async fn test_ip_limit_spans_users() {
        let limiter = FixedWindowRateLimiter::new(Duration::from_secs(1), 100, 2);
        assert!(limiter.check(1, "10.0.0.9", 7).await.is_ok());
        assert!(limiter.check(2, "10.0.0.9", 7).await.is_ok());
        assert!(limiter.check(3, "10.0.0.9", 7).await.is_err());
    }

    #[test]
    fn test_degrade_switchboard() {
        let board = DegradeSwitchboard::new();
        assert!(board.check(1).is_ok());

        board.degrade_activity(1, true);
        assert!(board.check(1).is_err());
        assert!(board.check(2).is_ok());

        board.degrade_activity(1, false);
        board.degrade_all(true);
        assert!(board.check(1).is_err());
        assert!(board.check(2).is_err());

        board.degrade_all(false);
        assert!(board.check(2).is_ok());
    }
}
