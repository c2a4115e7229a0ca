//! End-to-end scenario tests over the full in-memory assembly:
//! orchestrator -> atomic stock -> priority queue -> consumer pool ->
//! order store, plus the expiry and reconciliation workers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;

use flashline::config::SeckillConfig;
use flashline::consumer::{ConsumerPool, OrderConsumer};
use flashline::error::SeckillError;
use flashline::expiry::ExpiryWorker;
use flashline::models::{
    Activity, ActivityStatus, OrderStatus, SeckillRequest, SeckillVerdict,
};
use flashline::persistence::{MemoryActivityStore, MemoryOrderStore};
use flashline::queue::{MemoryOrderQueue, OrderQueue};
use flashline::reconcile::ReconcileWorker;
use flashline::seckill::{
    AllowAllRateLimiter, DegradeSwitchboard, MemoryResultStore, ResultStore, SeckillService,
};
use flashline::snowflake::OrderNoGenerator;
use flashline::stock::{MemoryStockBackend, MultiLevelInventory, StockBackend};

struct Rig {
    service: Arc<SeckillService>,
    backend: Arc<MemoryStockBackend>,
    activities: Arc<MemoryActivityStore>,
    orders: Arc<MemoryOrderStore>,
    results: Arc<MemoryResultStore>,
    queue: Arc<MemoryOrderQueue>,
    inventory: Arc<MultiLevelInventory>,
    config: SeckillConfig,
}

fn activity(id: u64, initial: i64, per_user_limit: u32) -> Activity {
    let now = Utc::now();
    Activity {
        id,
        goods_id: id * 10,
        price: Decimal::new(99_00, 2),
        initial_stock: initial,
        sold: 0,
        per_user_limit,
        start_time: now - ChronoDuration::minutes(1),
        end_time: now + ChronoDuration::minutes(30),
        status: ActivityStatus::Active,
        version: 0,
    }
}

async fn rig(activities_seed: Vec<Activity>) -> Rig {
    let mut config = SeckillConfig::default();
    config.retry_times = 1;
    config.retry_backoff_secs = 0;
    config.consume_timeout_secs = 1;
    config.vip_workers = 2;
    config.normal_workers = 3;

    let backend = Arc::new(MemoryStockBackend::new());
    let activities = Arc::new(MemoryActivityStore::new(activities_seed.clone()));
    let inventory = Arc::new(MultiLevelInventory::new(
        backend.clone(),
        activities.clone(),
        &config,
    ));
    for activity in &activities_seed {
        inventory.preload(activity).await.unwrap();
    }

    let queue = Arc::new(MemoryOrderQueue::new(config.queue_capacity));
    let results = Arc::new(MemoryResultStore::new());
    let orders = Arc::new(MemoryOrderStore::new());

    let service = Arc::new(SeckillService::new(
        activities.clone(),
        inventory.clone(),
        queue.clone(),
        results.clone(),
        Arc::new(AllowAllRateLimiter),
        Arc::new(DegradeSwitchboard::new()),
        &config,
    ));

    Rig {
        service,
        backend,
        activities,
        orders,
        results,
        queue,
        inventory,
        config,
    }
}

fn request(activity_id: u64, request_id: &str, user_id: u64, qty: u32) -> SeckillRequest {
    SeckillRequest {
        request_id: request_id.to_string(),
        activity_id,
        user_id,
        quantity: qty,
        is_vip: false,
        client_ip: format!("10.0.{}.{}", user_id / 256, user_id % 256),
    }
}

/// Run a consumer pool over the rig until the queue drains, then stop it
async fn drain_queue(rig: &Rig) {
    let consumer = Arc::new(OrderConsumer::new(
        rig.queue.clone(),
        rig.orders.clone(),
        rig.inventory.clone(),
        rig.results.clone(),
        Arc::new(OrderNoGenerator::new(7).unwrap()),
        &rig.config,
    ));
    let pool = ConsumerPool::new(consumer, &rig.config);
    let (tx, rx) = watch::channel(false);
    let handles = pool.spawn(rx);

    for _ in 0..200 {
        let vip = rig.queue.depth(flashline::queue::Topic::Vip).await.unwrap();
        let normal = rig
            .queue
            .depth(flashline::queue::Topic::Normal)
            .await
            .unwrap();
        if vip == 0 && normal == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // One extra beat for in-flight messages to finish materializing
    tokio::time::sleep(Duration::from_millis(100)).await;

    tx.send(true).unwrap();
    for handle in handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
}

/// Scenario 1: 200 users race 10 units; exactly 10 orders materialize.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn race_sells_exactly_initial_stock() {
    let rig = rig(vec![activity(1, 10, 2)]).await;

    let mut handles = Vec::new();
    for user in 1..=200u64 {
        let service = rig.service.clone();
        handles.push(tokio::spawn(async move {
            service
                .do_seckill(request(1, &format!("req-{}", user), user, 1))
                .await
        }));
    }

    let mut accepted = 0;
    let mut out_of_stock = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(result) => {
                assert!(result.accepted);
                accepted += 1;
            }
            Err(SeckillError::OutOfStock) => out_of_stock += 1,
            Err(other) => panic!("unexpected rejection: {:?}", other),
        }
    }
    assert_eq!(accepted, 10);
    assert_eq!(out_of_stock, 190);
    assert_eq!(rig.backend.remaining(1, 10).await.unwrap(), Some(0));

    drain_queue(&rig).await;

    let pending = rig.orders.orders_with_status(OrderStatus::Pending);
    assert_eq!(pending.len(), 10);
    let total_qty: u32 = pending.iter().map(|o| o.quantity).sum();
    assert_eq!(total_qty, 10);
}

/// Scenario 2: three concurrent retries of one request id yield one accept,
/// two duplicates, one order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_retries_deduplicate() {
    let rig = rig(vec![activity(1, 10, 2)]).await;

    let mut handles = Vec::new();
    for _ in 0..3 {
        let service = rig.service.clone();
        handles.push(tokio::spawn(async move {
            service.do_seckill(request(1, "req-R", 42, 1)).await
        }));
    }

    let mut accepted = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(SeckillError::DuplicateRequest { .. }) => duplicates += 1,
            Err(other) => panic!("unexpected rejection: {:?}", other),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(duplicates, 2);
    assert_eq!(rig.backend.remaining(1, 10).await.unwrap(), Some(9));

    drain_queue(&rig).await;
    assert_eq!(rig.orders.orders_with_status(OrderStatus::Pending).len(), 1);
}

/// Scenario 3: qty=2 twice under per_user_limit=3; second trips the cap.
#[tokio::test]
async fn user_cap_blocks_second_purchase() {
    let rig = rig(vec![activity(1, 10, 3)]).await;

    rig.service
        .do_seckill(request(1, "first", 7, 2))
        .await
        .unwrap();
    let err = rig
        .service
        .do_seckill(request(1, "second", 7, 2))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "OVER_USER_LIMIT");

    drain_queue(&rig).await;
    assert_eq!(rig.orders.orders_with_status(OrderStatus::Pending).len(), 1);
    assert_eq!(rig.backend.user_bought(1, 7).await.unwrap(), 2);
}

/// Retrying a request that already succeeded surfaces the original order
/// number, not a new one.
#[tokio::test]
async fn retry_after_success_returns_original_order() {
    let rig = rig(vec![activity(1, 10, 2)]).await;

    rig.service
        .do_seckill(request(1, "req-R", 42, 1))
        .await
        .unwrap();
    drain_queue(&rig).await;

    let order_no = match rig.results.get("req-R").await.unwrap() {
        Some(SeckillVerdict::Success { order_no }) => order_no,
        other => panic!("expected success verdict, got {:?}", other),
    };

    let err = rig
        .service
        .do_seckill(request(1, "req-R", 42, 1))
        .await
        .unwrap_err();
    match err {
        SeckillError::DuplicateRequest { order_no: Some(original) } => {
            assert_eq!(original, order_no)
        }
        other => panic!("expected duplicate with original order, got {:?}", other),
    }
    assert_eq!(rig.orders.orders_with_status(OrderStatus::Pending).len(), 1);
}

/// Scenario 4: the durable store rejects the first two intents; their
/// deductions are reverted, later intents land, no idempotency marks leak.
#[tokio::test]
async fn failed_materialization_reverts_inventory() {
    let rig = rig(vec![activity(1, 5, 1)]).await;

    // retry_times = 1 in the rig: two attempts per intent, so four faults
    // exhaust exactly the first two intents
    rig.orders.fail_next_creates(4);

    for user in 1..=4u64 {
        rig.service
            .do_seckill(request(1, &format!("req-{}", user), user, 1))
            .await
            .unwrap();
    }
    assert_eq!(rig.backend.remaining(1, 10).await.unwrap(), Some(1));

    // Sequential consumption keeps the fault schedule deterministic
    let consumer = OrderConsumer::new(
        rig.queue.clone(),
        rig.orders.clone(),
        rig.inventory.clone(),
        rig.results.clone(),
        Arc::new(OrderNoGenerator::new(8).unwrap()),
        &rig.config,
    );
    while let Some(delivery) = rig
        .queue
        .try_consume(flashline::queue::Topic::Normal)
        .await
        .unwrap()
    {
        consumer.process(delivery).await;
    }

    let pending = rig.orders.orders_with_status(OrderStatus::Pending);
    assert_eq!(pending.len(), 2);

    let mut failed_users = Vec::new();
    for user in 1..=4u64 {
        match rig
            .results
            .get(&format!("req-{}", user))
            .await
            .unwrap()
            .expect("every request has a verdict")
        {
            SeckillVerdict::Failure { reason } => {
                assert_eq!(reason, "DURABLE_WRITE_FAILED");
                failed_users.push(user);
            }
            SeckillVerdict::Success { .. } => {}
            SeckillVerdict::Pending => panic!("no verdict should stay pending"),
        }
    }
    assert_eq!(failed_users.len(), 2);

    // 5 initial - 4 deducted + 2 reverted
    assert_eq!(rig.backend.remaining(1, 10).await.unwrap(), Some(3));

    // Reverted users can buy again: their marks and quota are cleared
    for user in failed_users {
        assert_eq!(rig.backend.user_bought(1, user).await.unwrap(), 0);
    }
}

/// Scenario 5: expired pending orders restore stock and drift-detect then
/// reports a consistent state.
#[tokio::test]
async fn expiry_restores_stock_and_state_is_consistent() {
    let rig = rig(vec![activity(1, 10, 5)]).await;

    for i in 1..=3u64 {
        rig.service
            .do_seckill(request(1, &format!("req-{}", i), i, 1))
            .await
            .unwrap();
    }
    drain_queue(&rig).await;
    assert_eq!(rig.orders.orders_with_status(OrderStatus::Pending).len(), 3);
    assert_eq!(rig.backend.remaining(1, 10).await.unwrap(), Some(7));

    // Push every deadline into the past instead of advancing the clock
    for order in rig.orders.orders_with_status(OrderStatus::Pending) {
        let mut expired = order.clone();
        expired.deadline = Utc::now() - ChronoDuration::minutes(1);
        rig.orders.insert_order(expired);
    }

    let expiry = ExpiryWorker::new(rig.orders.clone(), rig.inventory.clone(), &rig.config);
    let expired = expiry.scan_once().await.unwrap();
    assert_eq!(expired, 3);
    assert_eq!(rig.orders.orders_with_status(OrderStatus::Expired).len(), 3);
    assert_eq!(rig.backend.remaining(1, 10).await.unwrap(), Some(10));

    let reconcile = ReconcileWorker::new(
        rig.activities.clone(),
        rig.orders.clone(),
        rig.inventory.clone(),
        &rig.config,
    );
    let reports = reconcile.drift_once().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].drift, 0);
    assert_eq!(reports[0].repaired_to, None);
}

/// Scenario 6: manual discrepancy is repaired to `durable - reserved`.
#[tokio::test]
async fn drift_repair_fixes_manual_discrepancy() {
    let rig = rig(vec![activity(1, 10, 5)]).await;

    // Three pending orders through the real pipeline
    for i in 1..=3u64 {
        rig.service
            .do_seckill(request(1, &format!("req-{}", i), i, 1))
            .await
            .unwrap();
    }
    drain_queue(&rig).await;
    let pending = rig.orders.orders_with_status(OrderStatus::Pending);
    assert_eq!(pending.len(), 3);

    // Inject: zero L1 by hand (durable stock 10, reserved 3, expect 7)
    rig.backend
        .overwrite(1, 10, 0, Duration::from_secs(60))
        .await
        .unwrap();

    let reconcile = ReconcileWorker::new(
        rig.activities.clone(),
        rig.orders.clone(),
        rig.inventory.clone(),
        &rig.config,
    );
    let reports = reconcile.drift_once().await.unwrap();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.redis_stock, 0);
    assert_eq!(report.reserved, 3);
    assert_eq!(report.repaired_to, Some(7));
    assert_eq!(rig.backend.remaining(1, 10).await.unwrap(), Some(7));

    // Second run with no writers: same state (reconciliation idempotence)
    let reports = reconcile.drift_once().await.unwrap();
    assert_eq!(reports[0].drift, 0);
    assert_eq!(rig.backend.remaining(1, 10).await.unwrap(), Some(7));
}

/// VIP intents always materialize ahead of NORMAL ones at priority workers
/// while both topics stay non-empty.
#[tokio::test]
async fn vip_precedence_over_normal() {
    let rig = rig(vec![activity(1, 20, 10)]).await;

    for i in 1..=5u64 {
        rig.service
            .do_seckill(request(1, &format!("n-{}", i), i, 1))
            .await
            .unwrap();
    }
    for i in 6..=10u64 {
        let mut req = request(1, &format!("v-{}", i), i, 1);
        req.is_vip = true;
        rig.service.do_seckill(req).await.unwrap();
    }

    // Single priority worker consuming both topics in its discipline
    let consumer = OrderConsumer::new(
        rig.queue.clone(),
        rig.orders.clone(),
        rig.inventory.clone(),
        rig.results.clone(),
        Arc::new(OrderNoGenerator::new(9).unwrap()),
        &rig.config,
    );
    let mut consumed = Vec::new();
    loop {
        let delivery = match rig
            .queue
            .try_consume(flashline::queue::Topic::Vip)
            .await
            .unwrap()
        {
            Some(d) => d,
            None => match rig
                .queue
                .try_consume(flashline::queue::Topic::Normal)
                .await
                .unwrap()
            {
                Some(d) => d,
                None => break,
            },
        };
        consumed.push(delivery.topic);
        consumer.process(delivery).await;
    }

    let first_normal = consumed
        .iter()
        .position(|t| *t == flashline::queue::Topic::Normal)
        .unwrap();
    assert!(
        consumed[..first_normal]
            .iter()
            .all(|t| *t == flashline::queue::Topic::Vip)
    );
    assert_eq!(consumed[..first_normal].len(), 5);
    assert_eq!(rig.orders.orders_with_status(OrderStatus::Pending).len(), 10);
}

/// Conservation across a mixed run: remaining + reserved + reverted = initial
#[tokio::test]
async fn conservation_invariant_holds() {
    let rig = rig(vec![activity(1, 8, 2)]).await;

    for i in 1..=6u64 {
        rig.service
            .do_seckill(request(1, &format!("req-{}", i), i, 1))
            .await
            .unwrap();
    }
    drain_queue(&rig).await;

    // Expire two of them
    let mut expired_count = 0;
    for order in rig.orders.orders_with_status(OrderStatus::Pending) {
        if expired_count == 2 {
            break;
        }
        let mut overdue = order.clone();
        overdue.deadline = Utc::now() - ChronoDuration::minutes(1);
        rig.orders.insert_order(overdue);
        expired_count += 1;
    }
    let expiry = ExpiryWorker::new(rig.orders.clone(), rig.inventory.clone(), &rig.config);
    expiry.scan_once().await.unwrap();

    let remaining = rig.backend.remaining(1, 10).await.unwrap().unwrap();
    let reserved: i64 = rig
        .orders
        .orders_with_status(OrderStatus::Pending)
        .iter()
        .map(|o| o.quantity as i64)
        .sum();
    // 8 initial - 6 accepted + 2 restored = 4 remaining, 4 still reserved
    assert_eq!(remaining, 4);
    assert_eq!(reserved, 4);
    assert_eq!(remaining + reserved, 8);
}
