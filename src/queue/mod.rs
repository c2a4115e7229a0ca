//! Priority order queue (VIP / NORMAL topics)
//!
//! Delivery contract is at-least-once: consumers are idempotent through the
//! unique request id, and a delivery is acknowledged only after the order is
//! materialized or compensated. Producers never block past their publish
//! timeout; the orchestrator compensates on failure.
//!
//! Two implementations share the contract: an in-process pair of bounded
//! buffers, and a broker-backed variant on redis lists. Consumers pick one
//! by configuration.

pub mod memory;
pub mod redis_queue;

pub use memory::MemoryOrderQueue;
pub use redis_queue::RedisOrderQueue;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SeckillError;

/// Logical topics. VIP strictly precedes NORMAL at each priority worker;
/// the precedence is the consumer's discipline, not the queue's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Vip,
    Normal,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Vip => "vip",
            Topic::Normal => "normal",
        }
    }
}

/// One consumed message, held until acknowledged
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: Topic,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait OrderQueue: Send + Sync {
    /// Non-blocking publish with a short deadline. `QueueFull` on expiry.
    async fn publish(
        &self,
        topic: Topic,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<(), SeckillError>;

    /// Immediate poll of one topic
    async fn try_consume(&self, topic: Topic) -> Result<Option<Delivery>, SeckillError>;

    /// Blocking wait on one topic up to `timeout`
    async fn consume(
        &self,
        topic: Topic,
        timeout: Duration,
    ) -> Result<Option<Delivery>, SeckillError>;

    /// Blocking wait on either topic, VIP drained first on each wake
    async fn consume_any(&self, timeout: Duration) -> Result<Option<Delivery>, SeckillError>;

    /// Confirm a delivery is fully processed
    async fn ack(&self, delivery: &Delivery) -> Result<(), SeckillError>;

    /// Current number of buffered messages in one topic
    async fn depth(&self, topic: Topic) -> Result<usize, SeckillError>;

    /// Stop accepting publishes; consumers drain what is buffered
    fn close(&self);

    fn is_closed(&self) -> bool;
}
