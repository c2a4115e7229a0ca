//! flashline - flash-sale transactional core
//!
//! A request-to-order pipeline that survives bursts of concurrent buyers
//! against a small fixed inventory: never oversells, enforces per-user
//! caps, deduplicates retries, answers in milliseconds and keeps the fast
//! in-memory inventory mirror consistent with the durable store.
//!
//! # Modules
//!
//! - [`core_types`] - Fundamental type aliases (ActivityId, UserId, ...)
//! - [`config`] - Application configuration
//! - [`error`] - Error types with stable machine-readable codes
//! - [`models`] - Activities, orders, queue intents, DTOs
//! - [`snowflake`] - Order number generator
//! - [`stock`] - Multi-level inventory (atomic scripts, caches, locks)
//! - [`queue`] - Priority order queue (VIP / NORMAL)
//! - [`seckill`] - Orchestrator, pre-filters, result store
//! - [`consumer`] - Order consumer pool
//! - [`expiry`] - Unpaid order expiry worker
//! - [`reconcile`] - Push / flush / drift-repair workers
//! - [`persistence`] - Durable store (PostgreSQL)
//! - [`gateway`] - HTTP surface

// Core types - must be first!
pub mod core_types;

// Configuration + ambient plumbing
pub mod config;
pub mod error;
pub mod logging;

// Domain
pub mod consumer;
pub mod expiry;
pub mod gateway;
pub mod models;
pub mod persistence;
pub mod queue;
pub mod reconcile;
pub mod seckill;
pub mod snowflake;
pub mod stock;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use consumer::{ConsumerPool, OrderConsumer};
pub use core_types::{ActivityId, GoodsId, OrderNo, Qty, UserId};
pub use error::SeckillError;
pub use expiry::ExpiryWorker;
pub use models::{
    Activity, ActivityStatus, Order, OrderIntent, OrderStatus, SeckillAccepted, SeckillRequest,
    SeckillVerdict,
};
pub use persistence::{ActivityStore, Database, OrderStore};
pub use queue::{OrderQueue, Topic};
pub use reconcile::ReconcileWorker;
pub use seckill::SeckillService;
pub use snowflake::OrderNoGenerator;
pub use stock::{MultiLevelInventory, StockBackend};
