//! In-memory store implementations
//!
//! Back the scenario tests and infrastructure-free local runs. The order
//! store supports fault injection so consumer retry and revert paths can
//! be exercised deterministically.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{ActivityStore, CreateOutcome, OrderStore};
use crate::core_types::{ActivityId, GoodsId, OrderNo, RowVersion, UserId};
use crate::error::SeckillError;
use crate::models::{Activity, Order, OrderIntent, OrderStatus};

// ============================================================================
// Activities
// ============================================================================

#[derive(Default)]
pub struct MemoryActivityStore {
    activities: Mutex<HashMap<ActivityId, Activity>>,
}

impl MemoryActivityStore {
    pub fn new(activities: Vec<Activity>) -> Self {
        Self {
            activities: Mutex::new(activities.into_iter().map(|a| (a.id, a)).collect()),
        }
    }

    pub fn upsert(&self, activity: Activity) {
        self.activities
            .lock()
            .expect("activity store mutex poisoned")
            .insert(activity.id, activity);
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn get(&self, id: ActivityId) -> Result<Option<Activity>, SeckillError> {
        Ok(self
            .activities
            .lock()
            .expect("activity store mutex poisoned")
            .get(&id)
            .cloned())
    }

    async fn list_active(&self) -> Result<Vec<Activity>, SeckillError> {
        let mut active: Vec<Activity> = self
            .activities
            .lock()
            .expect("activity store mutex poisoned")
            .values()
            .filter(|a| a.status == crate::models::ActivityStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|a| a.id);
        Ok(active)
    }

    async fn update_sold(
        &self,
        id: ActivityId,
        sold: i64,
        expected_version: RowVersion,
    ) -> Result<bool, SeckillError> {
        let mut activities = self
            .activities
            .lock()
            .expect("activity store mutex poisoned");
        match activities.get_mut(&id) {
            Some(activity) if activity.version == expected_version => {
                activity.sold = sold;
                activity.version += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<OrderNo, Order>>,
    /// Next N create attempts fail with a transient database error
    fail_creates: AtomicU32,
    stock_logs: Mutex<Vec<String>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` create attempts fail (transient write fault)
    pub fn fail_next_creates(&self, n: u32) {
        self.fail_creates.store(n, Ordering::SeqCst);
    }

    pub fn order(&self, order_no: OrderNo) -> Option<Order> {
        self.orders
            .lock()
            .expect("order store mutex poisoned")
            .get(&order_no)
            .cloned()
    }

    pub fn orders_with_status(&self, status: OrderStatus) -> Vec<Order> {
        self.orders
            .lock()
            .expect("order store mutex poisoned")
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect()
    }

    pub fn insert_order(&self, order: Order) {
        self.orders
            .lock()
            .expect("order store mutex poisoned")
            .insert(order.order_no, order);
    }

    pub fn stock_log(&self) -> Vec<String> {
        self.stock_logs
            .lock()
            .expect("stock log mutex poisoned")
            .clone()
    }

    fn transition(&self, order_no: OrderNo, from: OrderStatus, to: OrderStatus) -> bool {
        let mut orders = self.orders.lock().expect("order store mutex poisoned");
        match orders.get_mut(&order_no) {
            Some(order) if order.status == from => {
                order.status = to;
                order.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    fn sum_qty(&self, activity_id: ActivityId, status: OrderStatus) -> i64 {
        self.orders
            .lock()
            .expect("order store mutex poisoned")
            .values()
            .filter(|o| o.activity_id == activity_id && o.status == status)
            .map(|o| o.quantity as i64)
            .sum()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn create_pending(
        &self,
        intent: &OrderIntent,
        order_no: OrderNo,
        amount: Decimal,
        deadline: DateTime<Utc>,
    ) -> Result<CreateOutcome, SeckillError> {
        let pending_faults = self.fail_creates.load(Ordering::SeqCst);
        if pending_faults > 0
            && self
                .fail_creates
                .compare_exchange(
                    pending_faults,
                    pending_faults - 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
        {
            return Err(SeckillError::Database("injected write fault".into()));
        }

        let mut orders = self.orders.lock().expect("order store mutex poisoned");
        if let Some(existing) = orders
            .values()
            .find(|o| o.request_id == intent.request_id)
        {
            return Ok(CreateOutcome::Duplicate(existing.order_no));
        }

        let now = Utc::now();
        orders.insert(
            order_no,
            Order {
                order_no,
                request_id: intent.request_id.clone(),
                user_id: intent.user_id,
                activity_id: intent.activity_id,
                goods_id: intent.goods_id,
                quantity: intent.quantity,
                amount,
                status: OrderStatus::Pending,
                deadline,
                created_at: now,
                updated_at: now,
            },
        );
        drop(orders);

        self.stock_logs
            .lock()
            .expect("stock log mutex poisoned")
            .push(format!(
                "order_created:{}:{}:{}",
                intent.activity_id, intent.user_id, intent.quantity
            ));

        Ok(CreateOutcome::Created)
    }

    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, SeckillError> {
        let orders = self.orders.lock().expect("order store mutex poisoned");
        let mut expired: Vec<Order> = orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.deadline < now)
            .cloned()
            .collect();
        expired.sort_by_key(|o| o.deadline);
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }

    async fn mark_expired(&self, order_no: OrderNo) -> Result<bool, SeckillError> {
        Ok(self.transition(order_no, OrderStatus::Pending, OrderStatus::Expired))
    }

    async fn mark_paid(&self, order_no: OrderNo) -> Result<bool, SeckillError> {
        Ok(self.transition(order_no, OrderStatus::Pending, OrderStatus::Paid))
    }

    async fn mark_cancelled(&self, order_no: OrderNo) -> Result<bool, SeckillError> {
        Ok(self.transition(order_no, OrderStatus::Pending, OrderStatus::Cancelled))
    }

    async fn reserved_qty(&self, activity_id: ActivityId) -> Result<i64, SeckillError> {
        Ok(self.sum_qty(activity_id, OrderStatus::Pending))
    }

    async fn sold_qty(&self, activity_id: ActivityId) -> Result<i64, SeckillError> {
        Ok(self.sum_qty(activity_id, OrderStatus::Paid))
    }

    async fn get_by_request_id(&self, request_id: &str) -> Result<Option<Order>, SeckillError> {
        Ok(self
            .orders
            .lock()
            .expect("order store mutex poisoned")
            .values()
            .find(|o| o.request_id == request_id)
            .cloned())
    }

    async fn append_stock_log(
        &self,
        activity_id: ActivityId,
        _goods_id: GoodsId,
        user_id: UserId,
        quantity: i64,
        action: &str,
        _request_id: &str,
    ) -> Result<(), SeckillError> {
        self.stock_logs
            .lock()
            .expect("stock log mutex poisoned")
            .push(format!("{}:{}:{}:{}", action, activity_id, user_id, quantity));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(request_id: &str) -> OrderIntent {
        OrderIntent {
            request_id: request_id.to_string(),
            activity_id: 1,
            goods_id: 10,
            user_id: 7,
            quantity: 1,
            price_snapshot: Decimal::ONE,
            deduct_id: request_id.to_string(),
            is_vip: false,
            enqueued_at: 0,
        }
    }

    #[tokio::test]
    async fn test_duplicate_returns_original_order_no() {
        let store = MemoryOrderStore::new();
        let deadline = Utc::now() + chrono::Duration::minutes(15);

        let first = store
            .create_pending(&intent("r1"), 100, Decimal::ONE, deadline)
            .await
            .unwrap();
        assert_eq!(first, CreateOutcome::Created);

        let second = store
            .create_pending(&intent("r1"), 200, Decimal::ONE, deadline)
            .await
            .unwrap();
        assert_eq!(second, CreateOutcome::Duplicate(100));
        assert!(store.order(200).is_none());
    }

    #[tokio::test]
    async fn test_fault_injection_counts_down() {
        let store = MemoryOrderStore::new();
        store.fail_next_creates(2);
        let deadline = Utc::now() + chrono::Duration::minutes(15);

        assert!(store
            .create_pending(&intent("r1"), 1, Decimal::ONE, deadline)
            .await
            .is_err());
        assert!(store
            .create_pending(&intent("r1"), 1, Decimal::ONE, deadline)
            .await
            .is_err());
        assert!(store
            .create_pending(&intent("r1"), 1, Decimal::ONE, deadline)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_expiry_paging_and_cas() {
        let store = MemoryOrderStore::new();
        let past = Utc::now() - chrono::Duration::minutes(1);
        for i in 0..3 {
            store
                .create_pending(&intent(&format!("r{}", i)), i, Decimal::ONE, past)
                .await
                .unwrap();
        }

        let expired = store.find_expired(Utc::now(), 2).await.unwrap();
        assert_eq!(expired.len(), 2);

        assert!(store.mark_expired(0).await.unwrap());
        assert!(!store.mark_expired(0).await.unwrap());
        assert_eq!(store.reserved_qty(1).await.unwrap(), 2);
    }
}
