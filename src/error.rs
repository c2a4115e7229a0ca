//! Seckill Error Types
//!
//! Every error carries a stable machine-readable code surfaced to clients
//! and a suggested HTTP status for the gateway layer.

use thiserror::Error;

use crate::core_types::OrderNo;

/// Seckill error types
///
/// Codes are part of the external contract; never rename them.
#[derive(Error, Debug, Clone)]
pub enum SeckillError {
    // === Validation / pre-filter ===
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Activity not found: {0}")]
    ActivityNotFound(u64),

    #[error("Activity is not active")]
    ActivityNotActive,

    #[error("Too many requests, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Service degraded, request rejected")]
    Degraded,

    // === Inventory (C1) ===
    #[error("Stock not loaded for activity")]
    StockNotLoaded,

    #[error("Out of stock")]
    OutOfStock,

    #[error("Per-user purchase limit exceeded")]
    OverUserLimit,

    /// Duplicate submission. Carries the original order number when the
    /// verdict has already been materialized by a consumer.
    #[error("Duplicate request")]
    DuplicateRequest { order_no: Option<OrderNo> },

    // === Queue (C4) ===
    #[error("Order queue is full")]
    QueueFull,

    #[error("System busy, inventory reverted")]
    SystemBusy,

    // === Consumers / workers ===
    #[error("Durable write failed after retries: {0}")]
    DurableWriteFailed(String),

    #[error("Inventory drift detected: {0}")]
    DriftDetected(String),

    #[error("Order number clock moved backwards by {0}ms")]
    ClockRegression(u64),

    // === Infrastructure ===
    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Could not acquire stock lock for activity {0}")]
    LockBusy(u64),

    #[error("Fast store error: {0}")]
    FastStore(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SeckillError {
    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            SeckillError::InvalidInput(_) => "INVALID_INPUT",
            SeckillError::ActivityNotFound(_) => "ACTIVITY_NOT_FOUND",
            SeckillError::ActivityNotActive => "ACTIVITY_NOT_ACTIVE",
            SeckillError::RateLimited { .. } => "RATE_LIMITED",
            SeckillError::Degraded => "DEGRADED",
            SeckillError::StockNotLoaded => "STOCK_NOT_LOADED",
            SeckillError::OutOfStock => "OUT_OF_STOCK",
            SeckillError::OverUserLimit => "OVER_USER_LIMIT",
            SeckillError::DuplicateRequest { .. } => "DUPLICATE_REQUEST",
            SeckillError::QueueFull => "QUEUE_FULL",
            SeckillError::SystemBusy => "SYSTEM_BUSY",
            SeckillError::DurableWriteFailed(_) => "DURABLE_WRITE_FAILED",
            SeckillError::DriftDetected(_) => "DRIFT_DETECTED",
            SeckillError::ClockRegression(_) => "CLOCK_REGRESSION",
            SeckillError::Timeout(_) => "TIMEOUT",
            SeckillError::LockBusy(_) => "LOCK_BUSY",
            SeckillError::FastStore(_) => "FAST_STORE_ERROR",
            SeckillError::Database(_) => "DATABASE_ERROR",
            SeckillError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Suggested HTTP status code
    pub fn http_status(&self) -> u16 {
        match self {
            SeckillError::InvalidInput(_) => 400,
            SeckillError::ActivityNotFound(_) => 404,
            SeckillError::ActivityNotActive | SeckillError::OutOfStock => 410,
            SeckillError::OverUserLimit => 403,
            SeckillError::DuplicateRequest { .. } => 409,
            SeckillError::RateLimited { .. } => 429,
            SeckillError::Degraded
            | SeckillError::QueueFull
            | SeckillError::SystemBusy
            | SeckillError::StockNotLoaded => 503,
            SeckillError::DurableWriteFailed(_)
            | SeckillError::DriftDetected(_)
            | SeckillError::ClockRegression(_)
            | SeckillError::Timeout(_)
            | SeckillError::LockBusy(_)
            | SeckillError::FastStore(_)
            | SeckillError::Database(_)
            | SeckillError::Internal(_) => 500,
        }
    }

    /// True for errors the caller may safely retry after a short pause
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SeckillError::RateLimited { .. }
                | SeckillError::SystemBusy
                | SeckillError::QueueFull
                | SeckillError::Timeout(_)
                | SeckillError::LockBusy(_)
        )
    }
}

impl From<redis::RedisError> for SeckillError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() {
            SeckillError::Timeout(e.to_string())
        } else {
            SeckillError::FastStore(e.to_string())
        }
    }
}

impl From<sqlx::Error> for SeckillError {
    fn from(e: sqlx::Error) -> Self {
        SeckillError::Database(e.to_string())
    }
}

impl From<anyhow::Error> for SeckillError {
    fn from(e: anyhow::Error) -> Self {
        SeckillError::Internal(e.to_string())
    }
}
