//! Broker-backed order queue on redis lists
//!
//! `LPUSH` on the topic list, `RPOPLPUSH` into a per-topic processing list
//! on consume, `LREM` on ack. A delivery that is never acknowledged stays
//! in the processing list for redelivery, which is what makes the contract
//! at-least-once across consumer crashes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::time::Instant;

use super::{Delivery, OrderQueue, Topic};
use crate::error::SeckillError;
use crate::stock::keys;

/// Poll interval while blocking on an empty topic
const CONSUME_POLL_PAUSE: Duration = Duration::from_millis(100);

pub struct RedisOrderQueue {
    conn: ConnectionManager,
    capacity: usize,
    closed: AtomicBool,
}

impl RedisOrderQueue {
    pub fn new(conn: ConnectionManager, capacity: usize) -> Self {
        Self {
            conn,
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    async fn pop_once(&self, topic: Topic) -> Result<Option<Delivery>, SeckillError> {
        let mut conn = self.conn.clone();
        let source = keys::queue_topic(topic.as_str());
        let processing = keys::queue_processing(topic.as_str());
        let payload: Option<Vec<u8>> = redis::cmd("RPOPLPUSH")
            .arg(&source)
            .arg(&processing)
            .query_async(&mut conn)
            .await?;
        Ok(payload.map(|payload| Delivery { topic, payload }))
    }

    /// Move any stranded in-flight deliveries back onto their topic.
    /// Run once at startup before consumers attach.
    pub async fn requeue_inflight(&self) -> Result<usize, SeckillError> {
        let mut moved = 0;
        for topic in [Topic::Vip, Topic::Normal] {
            let mut conn = self.conn.clone();
            let processing = keys::queue_processing(topic.as_str());
            let source = keys::queue_topic(topic.as_str());
            loop {
                let payload: Option<Vec<u8>> = redis::cmd("RPOPLPUSH")
                    .arg(&processing)
                    .arg(&source)
                    .query_async(&mut conn)
                    .await?;
                if payload.is_none() {
                    break;
                }
                moved += 1;
            }
        }
        Ok(moved)
    }
}

#[async_trait]
impl OrderQueue for RedisOrderQueue {
    async fn publish(
        &self,
        topic: Topic,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<(), SeckillError> {
        if self.is_closed() {
            return Err(SeckillError::QueueFull);
        }

        let mut conn = self.conn.clone();
        let key = keys::queue_topic(topic.as_str());
        let capacity = self.capacity;

        let publish = async move {
            let depth: usize = conn.llen(&key).await?;
            if depth >= capacity {
                return Ok::<bool, redis::RedisError>(false);
            }
            let _: i64 = conn.lpush(&key, payload).await?;
            Ok(true)
        };

        match tokio::time::timeout(timeout, publish).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(SeckillError::QueueFull),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(SeckillError::QueueFull),
        }
    }

    async fn try_consume(&self, topic: Topic) -> Result<Option<Delivery>, SeckillError> {
        self.pop_once(topic).await
    }

    async fn consume(
        &self,
        topic: Topic,
        timeout: Duration,
    ) -> Result<Option<Delivery>, SeckillError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.pop_once(topic).await? {
                return Ok(Some(delivery));
            }
            if self.is_closed() || Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(CONSUME_POLL_PAUSE).await;
        }
    }

    async fn consume_any(&self, timeout: Duration) -> Result<Option<Delivery>, SeckillError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.pop_once(Topic::Vip).await? {
                return Ok(Some(delivery));
            }
            if let Some(delivery) = self.pop_once(Topic::Normal).await? {
                return Ok(Some(delivery));
            }
            if self.is_closed() || Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(CONSUME_POLL_PAUSE).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), SeckillError> {
        let mut conn = self.conn.clone();
        let processing = keys::queue_processing(delivery.topic.as_str());
        let _: i64 = conn.lrem(&processing, 1, delivery.payload.clone()).await?;
        Ok(())
    }

    async fn depth(&self, topic: Topic) -> Result<usize, SeckillError> {
        let mut conn = self.conn.clone();
        let key = keys::queue_topic(topic.as_str());
        Ok(conn.llen(&key).await?)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
