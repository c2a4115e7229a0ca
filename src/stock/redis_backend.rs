//! Redis-backed stock tier (L1)
//!
//! All mutations run through the server-evaluated scripts, so every
//! evaluation on one activity partition is atomic with respect to the
//! others. Every call carries a deadline from the redis config; on expiry
//! the caller gets a typed timeout and applies its compensation path.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::backend::{DeductOutcome, DeductRequest, RevertOutcome, RevertRequest, StockBackend};
use super::keys;
use super::script::{
    CODE_NOT_DEDUCTED, CODE_OK, DEDUCT_SCRIPT, REVERT_SCRIPT, UNLOCK_SCRIPT, deduct_code_to_error,
};
use crate::config::RedisConfig;
use crate::core_types::{ActivityId, GoodsId, UserId};
use crate::error::SeckillError;

pub struct RedisStockBackend {
    conn: ConnectionManager,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl RedisStockBackend {
    pub async fn connect(config: &RedisConfig) -> Result<Self, SeckillError> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
        })
    }

    /// Share the underlying connection with other redis-backed components
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn bounded<T, F>(&self, deadline: Duration, what: &str, fut: F) -> Result<T, SeckillError>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result.map_err(SeckillError::from),
            Err(_) => Err(SeckillError::Timeout(format!(
                "fast store {} exceeded {:?}",
                what, deadline
            ))),
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl StockBackend for RedisStockBackend {
    async fn preload(
        &self,
        activity_id: ActivityId,
        goods_id: GoodsId,
        remaining: i64,
        ttl: Duration,
    ) -> Result<bool, SeckillError> {
        let mut conn = self.conn.clone();
        let key = keys::stock(activity_id, goods_id);
        let created: Option<String> = self
            .bounded(self.write_timeout, "preload", async move {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(remaining)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl.as_secs().max(1))
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(created.is_some())
    }

    async fn try_deduct(&self, req: &DeductRequest) -> Result<DeductOutcome, SeckillError> {
        let mut conn = self.conn.clone();
        let stock_key = keys::stock(req.activity_id, req.goods_id);
        let user_key = keys::user_buy(req.activity_id, req.user_id);
        let request_key = keys::request(req.activity_id, &req.request_id);
        let log_key = keys::stock_log(req.activity_id, req.goods_id);
        let qty = req.qty;
        let limit = req.per_user_limit;
        let user_ttl = req.user_ttl.as_secs().max(1);
        let request_ttl = req.request_ttl.as_secs().max(1);
        let user_id = req.user_id;

        let (code, remaining): (i64, i64) = self
            .bounded(self.write_timeout, "deduct", async move {
                DEDUCT_SCRIPT
                    .key(&stock_key)
                    .key(&user_key)
                    .key(&request_key)
                    .key(&log_key)
                    .arg(qty)
                    .arg(limit)
                    .arg(user_ttl)
                    .arg(request_ttl)
                    .arg(user_id)
                    .arg(Self::now_ms())
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        if code == CODE_OK {
            Ok(DeductOutcome {
                new_remaining: remaining,
                deduct_id: req.request_id.clone(),
            })
        } else {
            Err(deduct_code_to_error(code))
        }
    }

    async fn revert(&self, req: &RevertRequest) -> Result<RevertOutcome, SeckillError> {
        let mut conn = self.conn.clone();
        let stock_key = keys::stock(req.activity_id, req.goods_id);
        let user_key = keys::user_buy(req.activity_id, req.user_id);
        let request_key = keys::request(req.activity_id, &req.request_id);
        let log_key = keys::stock_log(req.activity_id, req.goods_id);
        let qty = req.qty;
        let user_id = req.user_id;

        let (code, remaining): (i64, i64) = self
            .bounded(self.write_timeout, "revert", async move {
                REVERT_SCRIPT
                    .key(&stock_key)
                    .key(&user_key)
                    .key(&request_key)
                    .key(&log_key)
                    .arg(qty)
                    .arg(user_id)
                    .arg(Self::now_ms())
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        match code {
            CODE_OK => Ok(RevertOutcome::Reverted {
                new_remaining: remaining,
            }),
            CODE_NOT_DEDUCTED => Ok(RevertOutcome::AlreadyReverted),
            other => Err(SeckillError::FastStore(format!(
                "unexpected revert script code {}",
                other
            ))),
        }
    }

    async fn remaining(
        &self,
        activity_id: ActivityId,
        goods_id: GoodsId,
    ) -> Result<Option<i64>, SeckillError> {
        let mut conn = self.conn.clone();
        let key = keys::stock(activity_id, goods_id);
        self.bounded(self.read_timeout, "remaining", async move {
            conn.get(&key).await
        })
        .await
    }

    async fn overwrite(
        &self,
        activity_id: ActivityId,
        goods_id: GoodsId,
        remaining: i64,
        ttl: Duration,
    ) -> Result<(), SeckillError> {
        let mut conn = self.conn.clone();
        let key = keys::stock(activity_id, goods_id);
        let () = self
            .bounded(self.write_timeout, "overwrite", async move {
                conn.set_ex(&key, remaining, ttl.as_secs().max(1)).await
            })
            .await?;
        Ok(())
    }

    async fn user_bought(
        &self,
        activity_id: ActivityId,
        user_id: UserId,
    ) -> Result<i64, SeckillError> {
        let mut conn = self.conn.clone();
        let key = keys::user_buy(activity_id, user_id);
        let bought: Option<i64> = self
            .bounded(self.read_timeout, "user_bought", async move {
                conn.get(&key).await
            })
            .await?;
        Ok(bought.unwrap_or(0))
    }

    async fn try_lock(
        &self,
        activity_id: ActivityId,
        ttl: Duration,
    ) -> Result<Option<String>, SeckillError> {
        let mut conn = self.conn.clone();
        let key = keys::stock_lock(activity_id);
        let token = uuid::Uuid::new_v4().to_string();
        let token_arg = token.clone();
        let acquired: Option<String> = self
            .bounded(self.write_timeout, "lock", async move {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(&token_arg)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(acquired.map(|_| token))
    }

    async fn unlock(&self, activity_id: ActivityId, token: &str) -> Result<bool, SeckillError> {
        let mut conn = self.conn.clone();
        let key = keys::stock_lock(activity_id);
        let token = token.to_string();
        let released: i64 = self
            .bounded(self.write_timeout, "unlock", async move {
                UNLOCK_SCRIPT
                    .key(&key)
                    .arg(&token)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(released == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> RedisStockBackend {
        RedisStockBackend::connect(&RedisConfig::default())
            .await
            .expect("redis must be reachable")
    }

    fn deduct(request_id: &str, qty: i64) -> DeductRequest {
        DeductRequest {
            activity_id: 990_001,
            goods_id: 1,
            user_id: 42,
            request_id: request_id.to_string(),
            qty,
            per_user_limit: 5,
            user_ttl: Duration::from_secs(60),
            request_ttl: Duration::from_secs(120),
        }
    }

    #[tokio::test]
    #[ignore = "requires Redis running"]
    async fn test_script_deduct_and_revert_round_trip() {
        let backend = connect().await;
        backend
            .overwrite(990_001, 1, 10, Duration::from_secs(60))
            .await
            .unwrap();

        let out = backend.try_deduct(&deduct("rt-1", 3)).await.unwrap();
        assert_eq!(out.new_remaining, 7);

        let dup = backend.try_deduct(&deduct("rt-1", 3)).await.unwrap_err();
        assert_eq!(dup.code(), "DUPLICATE_REQUEST");

        let reverted = backend
            .revert(&RevertRequest {
                activity_id: 990_001,
                goods_id: 1,
                user_id: 42,
                request_id: "rt-1".into(),
                qty: 3,
            })
            .await
            .unwrap();
        assert_eq!(reverted, RevertOutcome::Reverted { new_remaining: 10 });

        let again = backend
            .revert(&RevertRequest {
                activity_id: 990_001,
                goods_id: 1,
                user_id: 42,
                request_id: "rt-1".into(),
                qty: 3,
            })
            .await
            .unwrap();
        assert_eq!(again, RevertOutcome::AlreadyReverted);
    }

    #[tokio::test]
    #[ignore = "requires Redis running"]
    async fn test_lock_round_trip() {
        let backend = connect().await;
        let token = backend
            .try_lock(990_002, Duration::from_secs(5))
            .await
            .unwrap()
            .expect("lock must be free");
        assert!(backend.try_lock(990_002, Duration::from_secs(5)).await.unwrap().is_none());
        assert!(!backend.unlock(990_002, "stranger").await.unwrap());
        assert!(backend.unlock(990_002, &token).await.unwrap());
    }
}
