//! Durable order persistence
//!
//! `create_pending` is the consumer's single write: order row, detail row
//! and audit entry in one transaction. The unique index on `request_id`
//! turns duplicate deliveries into a lookup of the original order number.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use sqlx::postgres::PgRow;

use super::{CreateOutcome, Database, OrderStore};
use crate::core_types::{ActivityId, GoodsId, OrderNo, UserId};
use crate::error::SeckillError;
use crate::models::{Order, OrderIntent, OrderStatus};

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    async fn transition(
        &self,
        order_no: OrderNo,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, SeckillError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, updated_at = NOW()
            WHERE order_no = $2 AND status = $3
            "#,
        )
        .bind(to.id())
        .bind(order_no as i64)
        .bind(from.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_order(row: &PgRow) -> Result<Order, SeckillError> {
    let status_id: i16 = row.try_get("status")?;
    Ok(Order {
        order_no: row.try_get::<i64, _>("order_no")? as u64,
        request_id: row.try_get("request_id")?,
        user_id: row.try_get::<i64, _>("user_id")? as u64,
        activity_id: row.try_get::<i64, _>("activity_id")? as u64,
        goods_id: row.try_get::<i64, _>("goods_id")? as u64,
        quantity: row.try_get::<i32, _>("quantity")? as u32,
        amount: row.try_get("amount")?,
        status: OrderStatus::from_id(status_id)
            .ok_or_else(|| SeckillError::Database(format!("unknown order status {}", status_id)))?,
        deadline: row.try_get("deadline")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const ORDER_COLUMNS: &str = "order_no, request_id, user_id, activity_id, goods_id, quantity, \
                             amount, status, deadline, created_at, updated_at";

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create_pending(
        &self,
        intent: &OrderIntent,
        order_no: OrderNo,
        amount: Decimal,
        deadline: DateTime<Utc>,
    ) -> Result<CreateOutcome, SeckillError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO orders
                (order_no, request_id, user_id, activity_id, goods_id,
                 quantity, amount, status, deadline)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (request_id) DO NOTHING
            "#,
        )
        .bind(order_no as i64)
        .bind(&intent.request_id)
        .bind(intent.user_id as i64)
        .bind(intent.activity_id as i64)
        .bind(intent.goods_id as i64)
        .bind(intent.quantity as i32)
        .bind(amount)
        .bind(OrderStatus::Pending.id())
        .bind(deadline)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // Redelivery: surface the order number the first delivery got
            let existing: i64 =
                sqlx::query_scalar("SELECT order_no FROM orders WHERE request_id = $1")
                    .bind(&intent.request_id)
                    .fetch_one(&mut *tx)
                    .await?;
            tx.commit().await?;
            return Ok(CreateOutcome::Duplicate(existing as u64));
        }

        sqlx::query(
            r#"
            INSERT INTO order_details (order_no, goods_id, unit_price, quantity)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(order_no as i64)
        .bind(intent.goods_id as i64)
        .bind(intent.price_snapshot)
        .bind(intent.quantity as i32)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO stock_logs (activity_id, goods_id, user_id, quantity, action, request_id)
            VALUES ($1, $2, $3, $4, 'order_created', $5)
            "#,
        )
        .bind(intent.activity_id as i64)
        .bind(intent.goods_id as i64)
        .bind(intent.user_id as i64)
        .bind(intent.quantity as i64)
        .bind(&intent.request_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CreateOutcome::Created)
    }

    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, SeckillError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM orders
            WHERE status = $1 AND deadline < $2
            ORDER BY deadline
            LIMIT $3
            "#,
            ORDER_COLUMNS
        ))
        .bind(OrderStatus::Pending.id())
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_order).collect()
    }

    async fn mark_expired(&self, order_no: OrderNo) -> Result<bool, SeckillError> {
        self.transition(order_no, OrderStatus::Pending, OrderStatus::Expired)
            .await
    }

    async fn mark_paid(&self, order_no: OrderNo) -> Result<bool, SeckillError> {
        self.transition(order_no, OrderStatus::Pending, OrderStatus::Paid)
            .await
    }

    async fn mark_cancelled(&self, order_no: OrderNo) -> Result<bool, SeckillError> {
        self.transition(order_no, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
    }

    async fn reserved_qty(&self, activity_id: ActivityId) -> Result<i64, SeckillError> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(quantity), 0) FROM orders WHERE activity_id = $1 AND status = $2",
        )
        .bind(activity_id as i64)
        .bind(OrderStatus::Pending.id())
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    async fn sold_qty(&self, activity_id: ActivityId) -> Result<i64, SeckillError> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(quantity), 0) FROM orders WHERE activity_id = $1 AND status = $2",
        )
        .bind(activity_id as i64)
        .bind(OrderStatus::Paid.id())
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    async fn get_by_request_id(&self, request_id: &str) -> Result<Option<Order>, SeckillError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE request_id = $1",
            ORDER_COLUMNS
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row_to_order(&row)?)),
            None => Ok(None),
        }
    }

    async fn append_stock_log(
        &self,
        activity_id: ActivityId,
        goods_id: GoodsId,
        user_id: UserId,
        quantity: i64,
        action: &str,
        request_id: &str,
    ) -> Result<(), SeckillError> {
        sqlx::query(
            r#"
            INSERT INTO stock_logs (activity_id, goods_id, user_id, quantity, action, request_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(activity_id as i64)
        .bind(goods_id as i64)
        .bind(user_id as i64)
        .bind(quantity)
        .bind(action)
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
