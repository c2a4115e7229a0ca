//! Domain models: activities, orders, queue intents, request/response DTOs
//!
//! All timestamps are UTC. Money fields use `rust_decimal::Decimal`;
//! quantities are plain integers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core_types::{ActivityId, GoodsId, OrderNo, Qty, RowVersion, UserId};
use crate::error::SeckillError;

// ============================================================================
// Activity
// ============================================================================

/// Activity lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Draft,
    Active,
    Paused,
    Ended,
}

impl ActivityStatus {
    /// Numeric id used in the durable store
    pub fn id(&self) -> i16 {
        match self {
            ActivityStatus::Draft => 0,
            ActivityStatus::Active => 1,
            ActivityStatus::Paused => 2,
            ActivityStatus::Ended => 3,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ActivityStatus::Draft),
            1 => Some(ActivityStatus::Active),
            2 => Some(ActivityStatus::Paused),
            3 => Some(ActivityStatus::Ended),
            _ => None,
        }
    }
}

/// A time-windowed sale of a fixed quantity of one good.
///
/// Immutable per run once the sale opens; `sold` and `version` are the only
/// durable fields that move, and only through the flush / order paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub goods_id: GoodsId,
    pub price: Decimal,
    pub initial_stock: i64,
    /// Units already sold according to the durable store
    pub sold: i64,
    pub per_user_limit: Qty,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: ActivityStatus,
    /// Row version for optimistic flush writes
    pub version: RowVersion,
}

impl Activity {
    /// Whether the sale window is open at `now` (stock is checked by the
    /// atomic deduct path, not here).
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ActivityStatus::Active && now >= self.start_time && now < self.end_time
    }

    /// Seconds until the activity ends, clamped at zero
    pub fn secs_until_end(&self, now: DateTime<Utc>) -> u64 {
        (self.end_time - now).num_seconds().max(0) as u64
    }
}

// ============================================================================
// Orders
// ============================================================================

/// Order lifecycle: `pending -> {paid, cancelled, expired}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn id(&self) -> i16 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Paid => 1,
            OrderStatus::Cancelled => 2,
            OrderStatus::Expired => 3,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(OrderStatus::Pending),
            1 => Some(OrderStatus::Paid),
            2 => Some(OrderStatus::Cancelled),
            3 => Some(OrderStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// Durable order row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_no: OrderNo,
    pub request_id: String,
    pub user_id: UserId,
    pub activity_id: ActivityId,
    pub goods_id: GoodsId,
    pub quantity: Qty,
    pub amount: Decimal,
    pub status: OrderStatus,
    /// Unpaid orders past this instant are expired by the expiry worker
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Queue payload
// ============================================================================

/// Message carried by the order queue from orchestrator to consumers.
///
/// `deduct_id` is the handle a consumer must present to the inventory on
/// failure to roll the deduction back; it equals the request id that the
/// atomic script recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub request_id: String,
    pub activity_id: ActivityId,
    pub goods_id: GoodsId,
    pub user_id: UserId,
    pub quantity: Qty,
    /// Unit price at acceptance time; the order amount is derived from it
    pub price_snapshot: Decimal,
    pub deduct_id: String,
    pub is_vip: bool,
    /// Milliseconds since the unix epoch at enqueue time
    pub enqueued_at: i64,
}

impl OrderIntent {
    pub fn encode(&self) -> Result<Vec<u8>, SeckillError> {
        serde_json::to_vec(self).map_err(|e| SeckillError::Internal(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SeckillError> {
        serde_json::from_slice(bytes)
            .map_err(|e| SeckillError::InvalidInput(format!("malformed order intent: {}", e)))
    }
}

// ============================================================================
// Request / response DTOs
// ============================================================================

/// Inbound seckill request, after auth has resolved the user
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SeckillRequest {
    #[validate(length(min = 1, max = 64))]
    pub request_id: String,
    #[validate(range(min = 1))]
    pub activity_id: ActivityId,
    #[serde(skip)]
    pub user_id: UserId,
    #[validate(range(min = 1))]
    pub quantity: Qty,
    #[serde(skip)]
    pub is_vip: bool,
    #[serde(skip)]
    pub client_ip: String,
}

impl SeckillRequest {
    /// Full input validation; the first failure wins.
    pub fn check(&self) -> Result<(), SeckillError> {
        self.validate()
            .map_err(|e| SeckillError::InvalidInput(e.to_string()))?;
        if self.user_id == 0 {
            return Err(SeckillError::InvalidInput("user id must be nonzero".into()));
        }
        Ok(())
    }
}

/// Provisional acceptance returned by the orchestrator. The order number is
/// assigned later by a consumer; clients poll the result endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SeckillAccepted {
    pub accepted: bool,
    pub request_id: String,
    pub deduct_id: String,
    pub queue_position_estimate: usize,
}

/// Verdict held in the result store, written by consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SeckillVerdict {
    Pending,
    Success { order_no: OrderNo },
    Failure { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn activity_at(status: ActivityStatus, start: i64, end: i64) -> Activity {
        Activity {
            id: 1,
            goods_id: 10,
            price: Decimal::new(9_99, 2),
            initial_stock: 100,
            sold: 0,
            per_user_limit: 2,
            start_time: Utc.timestamp_opt(start, 0).unwrap(),
            end_time: Utc.timestamp_opt(end, 0).unwrap(),
            status,
            version: 0,
        }
    }

    #[test]
    fn test_activity_window() {
        let a = activity_at(ActivityStatus::Active, 1_000, 2_000);
        assert!(a.is_open_at(Utc.timestamp_opt(1_500, 0).unwrap()));
        assert!(a.is_open_at(Utc.timestamp_opt(1_000, 0).unwrap()));
        assert!(!a.is_open_at(Utc.timestamp_opt(2_000, 0).unwrap()));
        assert!(!a.is_open_at(Utc.timestamp_opt(999, 0).unwrap()));
    }

    #[test]
    fn test_paused_activity_is_closed() {
        let a = activity_at(ActivityStatus::Paused, 1_000, 2_000);
        assert!(!a.is_open_at(Utc.timestamp_opt(1_500, 0).unwrap()));
    }

    #[test]
    fn test_order_status_ids_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Cancelled,
            OrderStatus::Expired,
        ] {
            assert_eq!(OrderStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(OrderStatus::from_id(9), None);
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
    }

    #[test]
    fn test_intent_round_trip() {
        let intent = OrderIntent {
            request_id: "req-1".into(),
            activity_id: 1,
            goods_id: 10,
            user_id: 42,
            quantity: 2,
            price_snapshot: Decimal::new(1_50, 2),
            deduct_id: "req-1".into(),
            is_vip: true,
            enqueued_at: 1_700_000_000_000,
        };
        let bytes = intent.encode().unwrap();
        assert_eq!(OrderIntent::decode(&bytes).unwrap(), intent);
    }

    #[test]
    fn test_request_validation() {
        let mut req = SeckillRequest {
            request_id: "r".repeat(64),
            activity_id: 1,
            user_id: 7,
            quantity: 1,
            is_vip: false,
            client_ip: "10.0.0.1".into(),
        };
        assert!(req.check().is_ok());

        req.request_id = "r".repeat(65);
        assert!(req.check().is_err());

        req.request_id = "r1".into();
        req.quantity = 0;
        assert!(req.check().is_err());

        req.quantity = 1;
        req.user_id = 0;
        assert!(req.check().is_err());
    }
}
