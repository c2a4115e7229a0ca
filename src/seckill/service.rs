//! Seckill orchestrator
//!
//! End-to-end request handling: validate, pre-filter, deduct, enqueue,
//! answer provisionally. The single hard rule: a request that decremented
//! inventory either lands an intent on the queue or is reverted before the
//! caller sees an error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use super::prefilter::{DegradeManager, RateLimiter};
use super::result_store::ResultStore;
use crate::config::SeckillConfig;
use crate::core_types::ActivityId;
use crate::error::SeckillError;
use crate::models::{
    Activity, ActivityStatus, OrderIntent, SeckillAccepted, SeckillRequest, SeckillVerdict,
};
use crate::persistence::ActivityStore;
use crate::queue::{OrderQueue, Topic};
use crate::stock::MultiLevelInventory;

pub struct SeckillService {
    activities: Arc<dyn ActivityStore>,
    inventory: Arc<MultiLevelInventory>,
    queue: Arc<dyn OrderQueue>,
    results: Arc<dyn ResultStore>,
    rate_limiter: Arc<dyn RateLimiter>,
    degrade: Arc<dyn DegradeManager>,
    result_ttl: Duration,
    publish_timeout: Duration,
}

impl SeckillService {
    pub fn new(
        activities: Arc<dyn ActivityStore>,
        inventory: Arc<MultiLevelInventory>,
        queue: Arc<dyn OrderQueue>,
        results: Arc<dyn ResultStore>,
        rate_limiter: Arc<dyn RateLimiter>,
        degrade: Arc<dyn DegradeManager>,
        config: &SeckillConfig,
    ) -> Self {
        Self {
            activities,
            inventory,
            queue,
            results,
            rate_limiter,
            degrade,
            result_ttl: Duration::from_secs(config.result_ttl_secs),
            publish_timeout: config.publish_timeout(),
        }
    }

    /// The request pipeline. Each stage surfaces the first failure as a
    /// typed rejection; nothing before the deduct touches inventory.
    pub async fn do_seckill(
        &self,
        req: SeckillRequest,
    ) -> Result<SeckillAccepted, SeckillError> {
        req.check()?;

        self.rate_limiter
            .check(req.user_id, &req.client_ip, req.activity_id)
            .await?;
        self.degrade.check(req.activity_id)?;

        let activity = self.load_open_activity(req.activity_id).await?;

        let outcome = match self
            .inventory
            .try_deduct(&activity, req.user_id, &req.request_id, req.quantity as i64)
            .await
        {
            Ok(outcome) => outcome,
            Err(SeckillError::DuplicateRequest { .. }) => {
                return Err(self.resolve_duplicate(&req.request_id).await);
            }
            Err(e) => return Err(e),
        };

        let topic = if req.is_vip { Topic::Vip } else { Topic::Normal };
        let intent = OrderIntent {
            request_id: req.request_id.clone(),
            activity_id: activity.id,
            goods_id: activity.goods_id,
            user_id: req.user_id,
            quantity: req.quantity,
            price_snapshot: activity.price,
            deduct_id: outcome.deduct_id.clone(),
            is_vip: req.is_vip,
            enqueued_at: Utc::now().timestamp_millis(),
        };

        // Any failure from here on must give the deducted units back
        let publish_result = match intent.encode() {
            Ok(payload) => self.queue.publish(topic, payload, self.publish_timeout).await,
            Err(e) => Err(e),
        };
        if let Err(publish_err) = publish_result {
            warn!(
                request_id = %req.request_id,
                topic = topic.as_str(),
                error = %publish_err,
                "enqueue failed, reverting deduction"
            );
            if let Err(revert_err) = self
                .inventory
                .revert(
                    activity.id,
                    activity.goods_id,
                    req.user_id,
                    &outcome.deduct_id,
                    req.quantity as i64,
                )
                .await
            {
                // Drift repair picks this up; nothing more the request can do
                error!(
                    request_id = %req.request_id,
                    error = %revert_err,
                    "revert after enqueue failure also failed"
                );
            }
            return Err(SeckillError::SystemBusy);
        }

        // Pending marker lets clients poll before a consumer gets there
        if let Err(e) = self
            .results
            .publish(&req.request_id, &SeckillVerdict::Pending, self.result_ttl)
            .await
        {
            warn!(request_id = %req.request_id, error = %e, "failed to write pending marker");
        }

        let queue_position_estimate = self.queue.depth(topic).await.unwrap_or(0);
        info!(
            request_id = %req.request_id,
            activity_id = activity.id,
            user_id = req.user_id,
            qty = req.quantity,
            vip = req.is_vip,
            remaining = outcome.new_remaining,
            "seckill accepted"
        );

        Ok(SeckillAccepted {
            accepted: true,
            request_id: req.request_id,
            deduct_id: outcome.deduct_id,
            queue_position_estimate,
        })
    }

    /// Poll the verdict for an accepted request. `None` means the request
    /// id is unknown (never accepted, or the entry aged out).
    pub async fn query_result(
        &self,
        request_id: &str,
    ) -> Result<Option<SeckillVerdict>, SeckillError> {
        self.results.get(request_id).await
    }

    /// Admin prewarm: preload L1 from the durable row and warm caches
    pub async fn prewarm_activity(&self, activity_id: ActivityId) -> Result<bool, SeckillError> {
        let activity = self
            .activities
            .get(activity_id)
            .await?
            .ok_or(SeckillError::ActivityNotFound(activity_id))?;
        if activity.status != ActivityStatus::Active {
            return Err(SeckillError::ActivityNotActive);
        }
        self.inventory.preload(&activity).await
    }

    async fn load_open_activity(
        &self,
        activity_id: ActivityId,
    ) -> Result<Activity, SeckillError> {
        let activity = self
            .activities
            .get(activity_id)
            .await?
            .ok_or(SeckillError::ActivityNotFound(activity_id))?;
        if !activity.is_open_at(Utc::now()) {
            return Err(SeckillError::ActivityNotActive);
        }
        Ok(activity)
    }

    /// A duplicate deduction surfaces the original verdict when one is
    /// already persisted.
    async fn resolve_duplicate(&self, request_id: &str) -> SeckillError {
        match self.results.get(request_id).await {
            Ok(Some(SeckillVerdict::Success { order_no })) => SeckillError::DuplicateRequest {
                order_no: Some(order_no),
            },
            _ => SeckillError::DuplicateRequest { order_no: None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActivityStatus;
    use crate::persistence::MemoryActivityStore;
    use crate::queue::MemoryOrderQueue;
    use crate::seckill::prefilter::{AllowAllRateLimiter, DegradeSwitchboard};
    use crate::seckill::result_store::MemoryResultStore;
    use crate::stock::backend::StockBackend;
    use crate::stock::MemoryStockBackend;
    use chrono::Duration as ChronoDuration;
    use rust_decimal::Decimal;

    struct Harness {
        service: SeckillService,
        backend: Arc<MemoryStockBackend>,
        queue: Arc<MemoryOrderQueue>,
        results: Arc<MemoryResultStore>,
        degrade: Arc<DegradeSwitchboard>,
        activity: Activity,
    }

    async fn harness(initial: i64, per_user_limit: u32) -> Harness {
        harness_with_capacity(initial, per_user_limit, 100).await
    }

    async fn harness_with_capacity(
        initial: i64,
        per_user_limit: u32,
        queue_capacity: usize,
    ) -> Harness {
        let now = Utc::now();
        let activity = Activity {
            id: 1,
            goods_id: 10,
            price: Decimal::new(49_90, 2),
            initial_stock: initial,
            sold: 0,
            per_user_limit,
            start_time: now - ChronoDuration::minutes(1),
            end_time: now + ChronoDuration::minutes(30),
            status: ActivityStatus::Active,
            version: 0,
        };

        let backend = Arc::new(MemoryStockBackend::new());
        let activities = Arc::new(MemoryActivityStore::new(vec![activity.clone()]));
        let config = SeckillConfig::default();
        let inventory = Arc::new(MultiLevelInventory::new(
            backend.clone(),
            activities.clone(),
            &config,
        ));
        inventory.preload(&activity).await.unwrap();

        let queue = Arc::new(MemoryOrderQueue::new(queue_capacity));
        let results = Arc::new(MemoryResultStore::new());
        let degrade = Arc::new(DegradeSwitchboard::new());

        let service = SeckillService::new(
            activities,
            inventory,
            queue.clone(),
            results.clone(),
            Arc::new(AllowAllRateLimiter),
            degrade.clone(),
            &config,
        );

        Harness {
            service,
            backend,
            queue,
            results,
            degrade,
            activity,
        }
    }

    fn request(request_id: &str, user_id: u64, qty: u32) -> SeckillRequest {
        SeckillRequest {
            request_id: request_id.to_string(),
            activity_id: 1,
            user_id,
            quantity: qty,
            is_vip: false,
            client_ip: "10.1.1.1".into(),
        }
    }

    #[tokio::test]
    async fn test_accept_enqueues_intent_and_pending_marker() {
        let h = harness(10, 2).await;
        let accepted = h.service.do_seckill(request("r1", 7, 2)).await.unwrap();
        assert!(accepted.accepted);
        assert_eq!(accepted.deduct_id, "r1");

        let delivery = h
            .queue
            .try_consume(Topic::Normal)
            .await
            .unwrap()
            .expect("intent must be enqueued");
        let intent = OrderIntent::decode(&delivery.payload).unwrap();
        assert_eq!(intent.request_id, "r1");
        assert_eq!(intent.quantity, 2);
        assert_eq!(intent.price_snapshot, h.activity.price);

        assert_eq!(
            h.results.get("r1").await.unwrap(),
            Some(SeckillVerdict::Pending)
        );
        assert_eq!(h.backend.remaining(1, 10).await.unwrap(), Some(8));
    }

    #[tokio::test]
    async fn test_vip_request_routes_to_vip_topic() {
        let h = harness(10, 2).await;
        let mut req = request("r1", 7, 1);
        req.is_vip = true;
        h.service.do_seckill(req).await.unwrap();

        assert!(h.queue.try_consume(Topic::Vip).await.unwrap().is_some());
        assert!(h.queue.try_consume(Topic::Normal).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_inventory() {
        let h = harness(10, 2).await;
        let err = h.service.do_seckill(request("", 7, 1)).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
        assert_eq!(h.backend.remaining(1, 10).await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_degraded_activity_rejected() {
        let h = harness(10, 2).await;
        h.degrade.degrade_activity(1, true);
        let err = h.service.do_seckill(request("r1", 7, 1)).await.unwrap_err();
        assert_eq!(err.code(), "DEGRADED");
        assert_eq!(h.backend.remaining(1, 10).await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_unknown_and_closed_activities() {
        let h = harness(10, 2).await;

        let mut req = request("r1", 7, 1);
        req.activity_id = 99;
        assert_eq!(
            h.service.do_seckill(req).await.unwrap_err().code(),
            "ACTIVITY_NOT_FOUND"
        );

        let err = {
            let mut ended = h.activity.clone();
            ended.end_time = Utc::now() - ChronoDuration::minutes(1);
            let activities = Arc::new(MemoryActivityStore::new(vec![ended]));
            let config = SeckillConfig::default();
            let inventory = Arc::new(MultiLevelInventory::new(
                h.backend.clone(),
                activities.clone(),
                &config,
            ));
            let service = SeckillService::new(
                activities,
                inventory,
                h.queue.clone(),
                h.results.clone(),
                Arc::new(AllowAllRateLimiter),
                Arc::new(DegradeSwitchboard::new()),
                &config,
            );
            service.do_seckill(request("r2", 7, 1)).await.unwrap_err()
        };
        assert_eq!(err.code(), "ACTIVITY_NOT_ACTIVE");
    }

    #[tokio::test]
    async fn test_sold_out_surfaces_out_of_stock() {
        let h = harness(1, 2).await;
        h.service.do_seckill(request("r1", 7, 1)).await.unwrap();
        let err = h.service.do_seckill(request("r2", 8, 1)).await.unwrap_err();
        assert_eq!(err.code(), "OUT_OF_STOCK");
    }

    #[tokio::test]
    async fn test_queue_full_reverts_and_reports_busy() {
        let h = harness_with_capacity(10, 5, 1).await;
        h.service.do_seckill(request("r1", 7, 1)).await.unwrap();

        // Buffer of one is now full; the next accept must revert
        let err = h.service.do_seckill(request("r2", 8, 1)).await.unwrap_err();
        assert_eq!(err.code(), "SYSTEM_BUSY");
        assert_eq!(h.backend.remaining(1, 10).await.unwrap(), Some(9));
        assert_eq!(h.backend.user_bought(1, 8).await.unwrap(), 0);

        // The reverted request id is free to try again
        h.queue.try_consume(Topic::Normal).await.unwrap();
        h.service.do_seckill(request("r2", 8, 1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_surfaces_original_order_no() {
        let h = harness(10, 2).await;
        h.service.do_seckill(request("r1", 7, 1)).await.unwrap();

        // Before materialization the duplicate has no order number yet
        let err = h.service.do_seckill(request("r1", 7, 1)).await.unwrap_err();
        assert!(matches!(
            err,
            SeckillError::DuplicateRequest { order_no: None }
        ));

        // After a consumer records success the duplicate carries it
        h.results
            .publish(
                "r1",
                &SeckillVerdict::Success { order_no: 4242 },
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        let err = h.service.do_seckill(request("r1", 7, 1)).await.unwrap_err();
        assert!(matches!(
            err,
            SeckillError::DuplicateRequest {
                order_no: Some(4242)
            }
        ));
        // Still only one unit deducted
        assert_eq!(h.backend.remaining(1, 10).await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_prewarm_requires_active_status() {
        let h = harness(10, 2).await;
        assert!(!h.service.prewarm_activity(1).await.unwrap());
        assert_eq!(
            h.service.prewarm_activity(99).await.unwrap_err().code(),
            "ACTIVITY_NOT_FOUND"
        );
    }
}
