//! In-process order queue
//!
//! One bounded `ArrayQueue` per topic plus a shared wakeup. Publishers spin
//! briefly against a full buffer and give up at their deadline; consumers
//! park on the notifier between polls. FIFO per topic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_queue::ArrayQueue;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Delivery, OrderQueue, Topic};
use crate::error::SeckillError;

/// Pause between publish retries against a full buffer
const PUBLISH_RETRY_PAUSE: Duration = Duration::from_millis(5);

pub struct MemoryOrderQueue {
    vip: ArrayQueue<Vec<u8>>,
    normal: ArrayQueue<Vec<u8>>,
    notify: Notify,
    closed: AtomicBool,
}

impl MemoryOrderQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            vip: ArrayQueue::new(capacity),
            normal: ArrayQueue::new(capacity),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn buffer(&self, topic: Topic) -> &ArrayQueue<Vec<u8>> {
        match topic {
            Topic::Vip => &self.vip,
            Topic::Normal => &self.normal,
        }
    }

    fn pop(&self, topic: Topic) -> Option<Delivery> {
        self.buffer(topic).pop().map(|payload| Delivery {
            topic,
            payload,
        })
    }
}

#[async_trait]
impl OrderQueue for MemoryOrderQueue {
    async fn publish(
        &self,
        topic: Topic,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<(), SeckillError> {
        if self.is_closed() {
            return Err(SeckillError::QueueFull);
        }

        let deadline = Instant::now() + timeout;
        let mut payload = payload;
        loop {
            match self.buffer(topic).push(payload) {
                Ok(()) => {
                    self.notify.notify_waiters();
                    return Ok(());
                }
                Err(rejected) => {
                    if Instant::now() >= deadline {
                        return Err(SeckillError::QueueFull);
                    }
                    payload = rejected;
                    tokio::time::sleep(PUBLISH_RETRY_PAUSE).await;
                }
            }
        }
    }

    async fn try_consume(&self, topic: Topic) -> Result<Option<Delivery>, SeckillError> {
        Ok(self.pop(topic))
    }

    async fn consume(
        &self,
        topic: Topic,
        timeout: Duration,
    ) -> Result<Option<Delivery>, SeckillError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.pop(topic) {
                return Ok(Some(delivery));
            }
            if self.is_closed() {
                return Ok(None);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            // Wakeups can be spurious or raced away; loop until the deadline
            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn consume_any(&self, timeout: Duration) -> Result<Option<Delivery>, SeckillError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.pop(Topic::Vip) {
                return Ok(Some(delivery));
            }
            if let Some(delivery) = self.pop(Topic::Normal) {
                return Ok(Some(delivery));
            }
            if self.is_closed() {
                return Ok(None);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<(), SeckillError> {
        // Popping already removed the message; nothing to confirm in-process
        Ok(())
    }

    async fn depth(&self, topic: Topic) -> Result<usize, SeckillError> {
        Ok(self.buffer(topic).len())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_fifo_per_topic() {
        let queue = MemoryOrderQueue::new(10);
        for i in 0..3u8 {
            queue
                .publish(Topic::Normal, vec![i], SHORT)
                .await
                .unwrap();
        }
        for i in 0..3u8 {
            let delivery = queue.try_consume(Topic::Normal).await.unwrap().unwrap();
            assert_eq!(delivery.payload, vec![i]);
        }
        assert!(queue.try_consume(Topic::Normal).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_buffer_fails_at_deadline() {
        let queue = MemoryOrderQueue::new(2);
        queue.publish(Topic::Vip, vec![1], SHORT).await.unwrap();
        queue.publish(Topic::Vip, vec![2], SHORT).await.unwrap();

        let start = std::time::Instant::now();
        let err = queue.publish(Topic::Vip, vec![3], SHORT).await.unwrap_err();
        assert_eq!(err.code(), "QUEUE_FULL");
        assert!(start.elapsed() >= SHORT);
        assert_eq!(queue.depth(Topic::Vip).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_consume_any_prefers_vip() {
        let queue = MemoryOrderQueue::new(10);
        queue.publish(Topic::Normal, b"n1".to_vec(), SHORT).await.unwrap();
        queue.publish(Topic::Vip, b"v1".to_vec(), SHORT).await.unwrap();
        queue.publish(Topic::Vip, b"v2".to_vec(), SHORT).await.unwrap();

        let first = queue.consume_any(SHORT).await.unwrap().unwrap();
        let second = queue.consume_any(SHORT).await.unwrap().unwrap();
        let third = queue.consume_any(SHORT).await.unwrap().unwrap();

        assert_eq!(first.topic, Topic::Vip);
        assert_eq!(second.topic, Topic::Vip);
        assert_eq!(third.topic, Topic::Normal);
    }

    #[tokio::test]
    async fn test_consume_wakes_on_publish() {
        let queue = Arc::new(MemoryOrderQueue::new(10));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.consume(Topic::Normal, Duration::from_secs(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.publish(Topic::Normal, b"late".to_vec(), SHORT).await.unwrap();

        let delivery = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.payload, b"late");
    }

    #[tokio::test]
    async fn test_close_rejects_publish_but_drains() {
        let queue = MemoryOrderQueue::new(10);
        queue.publish(Topic::Normal, vec![9], SHORT).await.unwrap();
        queue.close();

        assert!(queue.publish(Topic::Normal, vec![1], SHORT).await.is_err());
        // Buffered messages stay consumable after close
        assert!(queue.consume(Topic::Normal, SHORT).await.unwrap().is_some());
        assert!(queue.consume(Topic::Normal, SHORT).await.unwrap().is_none());
    }
}
