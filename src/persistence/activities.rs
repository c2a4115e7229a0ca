//! Activity catalog access
//!
//! Per-request lookups go through a short TTL cache so the hot path never
//! hammers the catalog table; the sale window makes 5 seconds of staleness
//! harmless. Stock-row writes bypass the cache.

use async_trait::async_trait;
use cached::proc_macro::cached;
use sqlx::{PgPool, Row};
use sqlx::postgres::PgRow;

use super::{ActivityStore, Database};
use crate::core_types::{ActivityId, RowVersion};
use crate::error::SeckillError;
use crate::models::{Activity, ActivityStatus};

pub struct PgActivityStore {
    pool: PgPool,
}

impl PgActivityStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

fn row_to_activity(row: &PgRow) -> Result<Activity, SeckillError> {
    let status_id: i16 = row.try_get("status")?;
    Ok(Activity {
        id: row.try_get::<i64, _>("id")? as u64,
        goods_id: row.try_get::<i64, _>("goods_id")? as u64,
        price: row.try_get("price")?,
        initial_stock: row.try_get("initial_stock")?,
        sold: row.try_get("sold")?,
        per_user_limit: row.try_get::<i32, _>("per_user_limit")? as u32,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        status: ActivityStatus::from_id(status_id)
            .ok_or_else(|| SeckillError::Database(format!("unknown activity status {}", status_id)))?,
        version: row.try_get("version")?,
    })
}

const ACTIVITY_COLUMNS: &str = "id, goods_id, price, initial_stock, sold, per_user_limit, \
                                start_time, end_time, status, version";

/// Load one activity with a 5s TTL cache
#[cached(
    time = 5,
    key = "u64",
    convert = r#"{ activity_id }"#,
    result = true
)]
async fn load_activity_cached(
    pool: PgPool,
    activity_id: u64,
) -> Result<Option<Activity>, String> {
    tracing::debug!(activity_id, "[cache] loading activity from database");
    let row = sqlx::query(&format!(
        "SELECT {} FROM seckill_activities WHERE id = $1",
        ACTIVITY_COLUMNS
    ))
    .bind(activity_id as i64)
    .fetch_optional(&pool)
    .await
    .map_err(|e| e.to_string())?;

    match row {
        Some(row) => Ok(Some(row_to_activity(&row).map_err(|e| e.to_string())?)),
        None => Ok(None),
    }
}

#[async_trait]
impl ActivityStore for PgActivityStore {
    async fn get(&self, id: ActivityId) -> Result<Option<Activity>, SeckillError> {
        load_activity_cached(self.pool.clone(), id)
            .await
            .map_err(SeckillError::Database)
    }

    async fn list_active(&self) -> Result<Vec<Activity>, SeckillError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM seckill_activities WHERE status = $1 ORDER BY id",
            ACTIVITY_COLUMNS
        ))
        .bind(ActivityStatus::Active.id())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_activity).collect()
    }

    async fn update_sold(
        &self,
        id: ActivityId,
        sold: i64,
        expected_version: RowVersion,
    ) -> Result<bool, SeckillError> {
        let result = sqlx::query(
            r#"
            UPDATE seckill_activities
            SET sold = $1, version = version + 1, updated_at = NOW()
            WHERE id = $2 AND version = $3
            "#,
        )
        .bind(sold)
        .bind(id as i64)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
