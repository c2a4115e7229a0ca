//! Durable store (L2)
//!
//! PostgreSQL via sqlx. The store traits are the seam the orchestration
//! and worker layers talk through; `Pg*` types are the production
//! implementations and the `Memory*` types back local development and the
//! scenario tests.

pub mod activities;
pub mod memory;
pub mod orders;
pub mod schema;

pub use activities::PgActivityStore;
pub use memory::{MemoryActivityStore, MemoryOrderStore};
pub use orders::PgOrderStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::core_types::{ActivityId, GoodsId, OrderNo, RowVersion, UserId};
use crate::error::SeckillError;
use crate::models::{Activity, Order, OrderIntent};

/// Shared PostgreSQL handle, constructed once at startup
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, SeckillError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the idempotent DDL. Full migrations stay external; this only
    /// guarantees the tables the core needs exist.
    pub async fn init_schema(&self) -> Result<(), SeckillError> {
        for statement in schema::CREATE_TABLES {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Liveness probe; callers wrap it in the health-check deadline
    pub async fn ping(&self) -> Result<(), SeckillError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ============================================================================
// Store traits
// ============================================================================

/// Result of an order materialization attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The unique index on `request_id` already holds this request;
    /// the original order number is returned
    Duplicate(OrderNo),
}

/// Activity catalog + stock row access
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn get(&self, id: ActivityId) -> Result<Option<Activity>, SeckillError>;

    /// Activities in `active` status, for the background loops
    async fn list_active(&self) -> Result<Vec<Activity>, SeckillError>;

    /// Write the flushed `sold` under a row-version check. Returns false
    /// when the version moved and nothing was written.
    async fn update_sold(
        &self,
        id: ActivityId,
        sold: i64,
        expected_version: RowVersion,
    ) -> Result<bool, SeckillError>;
}

/// Durable order lifecycle
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a `pending` order plus its audit entries in one transaction.
    /// Idempotent on `request_id`.
    async fn create_pending(
        &self,
        intent: &OrderIntent,
        order_no: OrderNo,
        amount: Decimal,
        deadline: DateTime<Utc>,
    ) -> Result<CreateOutcome, SeckillError>;

    /// Oldest `pending` orders past their deadline, bounded page
    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, SeckillError>;

    /// CAS `pending -> expired`; false when the order already left `pending`
    async fn mark_expired(&self, order_no: OrderNo) -> Result<bool, SeckillError>;

    /// CAS `pending -> paid` (driven by the external payment trigger)
    async fn mark_paid(&self, order_no: OrderNo) -> Result<bool, SeckillError>;

    /// CAS `pending -> cancelled` (admin action)
    async fn mark_cancelled(&self, order_no: OrderNo) -> Result<bool, SeckillError>;

    /// Units reserved by `pending` orders of one activity
    async fn reserved_qty(&self, activity_id: ActivityId) -> Result<i64, SeckillError>;

    /// Units sold according to `paid` orders of one activity
    async fn sold_qty(&self, activity_id: ActivityId) -> Result<i64, SeckillError>;

    async fn get_by_request_id(&self, request_id: &str) -> Result<Option<Order>, SeckillError>;

    /// Audit entry outside the order-creation transaction (expiry, repair)
    async fn append_stock_log(
        &self,
        activity_id: ActivityId,
        goods_id: GoodsId,
        user_id: UserId,
        quantity: i64,
        action: &str,
        request_id: &str,
    ) -> Result<(), SeckillError>;
}
