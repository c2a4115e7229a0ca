//! Multi-level inventory
//!
//! Three tiers per activity:
//! - L0: per-process value with a short freshness window, only good for
//!   short-circuiting obviously-sold-out reads
//! - L1: the fast-store counter all atomic deductions act on; source of
//!   truth while the sale is running
//! - L2: the durable row; source of truth at rest
//!
//! Writers go through the atomic deduct/revert scripts, which are totally
//! ordered per activity partition. Readers tolerate stale L0/L1 values.

pub mod backend;
pub mod inventory;
pub mod keys;
pub mod local_cache;
pub mod lock;
pub mod redis_backend;
pub mod script;

pub use backend::{
    DeductOutcome, DeductRequest, MemoryStockBackend, RevertOutcome, RevertRequest, StockBackend,
};
pub use inventory::MultiLevelInventory;
pub use local_cache::LocalStockCache;
pub use redis_backend::RedisStockBackend;
