//! Short-lived result store
//!
//! Bridges the asynchronous gap between acceptance and materialization.
//! The orchestrator writes `pending` on accept, consumers overwrite with
//! the final verdict, clients poll until they see it. Entries outlive the
//! poll window via TTL.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::SeckillError;
use crate::models::SeckillVerdict;
use crate::stock::keys;

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn publish(
        &self,
        request_id: &str,
        verdict: &SeckillVerdict,
        ttl: Duration,
    ) -> Result<(), SeckillError>;

    async fn get(&self, request_id: &str) -> Result<Option<SeckillVerdict>, SeckillError>;
}

// ============================================================================
// Redis-backed store
// ============================================================================

pub struct RedisResultStore {
    conn: ConnectionManager,
}

impl RedisResultStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn publish(
        &self,
        request_id: &str,
        verdict: &SeckillVerdict,
        ttl: Duration,
    ) -> Result<(), SeckillError> {
        let mut conn = self.conn.clone();
        let key = keys::result(request_id);
        let payload =
            serde_json::to_string(verdict).map_err(|e| SeckillError::Internal(e.to_string()))?;
        let () = conn.set_ex(&key, payload, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<SeckillVerdict>, SeckillError> {
        let mut conn = self.conn.clone();
        let key = keys::result(request_id);
        let payload: Option<String> = conn.get(&key).await?;
        match payload {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).map_err(|e| SeckillError::Internal(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }
}

// ============================================================================
// In-memory store
// ============================================================================

struct StoredVerdict {
    verdict: SeckillVerdict,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryResultStore {
    entries: DashMap<String, StoredVerdict>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn publish(
        &self,
        request_id: &str,
        verdict: &SeckillVerdict,
        ttl: Duration,
    ) -> Result<(), SeckillError> {
        self.entries.insert(
            request_id.to_string(),
            StoredVerdict {
                verdict: verdict.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<SeckillVerdict>, SeckillError> {
        // Shard guard must drop before the remove below
        let expired = match self.entries.get(request_id) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.verdict.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(request_id);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_overwrites_pending() {
        let store = MemoryResultStore::new();
        let ttl = Duration::from_secs(60);

        store
            .publish("r1", &SeckillVerdict::Pending, ttl)
            .await
            .unwrap();
        assert_eq!(
            store.get("r1").await.unwrap(),
            Some(SeckillVerdict::Pending)
        );

        store
            .publish("r1", &SeckillVerdict::Success { order_no: 99 }, ttl)
            .await
            .unwrap();
        assert_eq!(
            store.get("r1").await.unwrap(),
            Some(SeckillVerdict::Success { order_no: 99 })
        );
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_missing() {
        let store = MemoryResultStore::new();
        store
            .publish("r1", &SeckillVerdict::Pending, Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("r1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_request_is_missing() {
        let store = MemoryResultStore::new();
        assert_eq!(store.get("ghost").await.unwrap(), None);
    }
}
