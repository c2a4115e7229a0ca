//! Core types used throughout the system
//!
//! Fundamental type aliases shared by all modules. They carry semantic
//! meaning and leave room for future type evolution.

/// Activity ID - one time-windowed sale of a fixed quantity of one good.
///
/// # Constraints:
/// - **Immutable**: assigned once by the catalog, never reused
/// - Every fast-store key for the activity shares a hash tag on this id,
///   so all of them live on the same partition
pub type ActivityId = u64;

/// Goods ID - the product being sold in an activity
pub type GoodsId = u64;

/// User ID - globally unique, immutable after assignment.
///
/// # Usage:
/// - Primary key for user quota cells (`user_buy:{activity}:{user}`)
/// - Carried in JWT claims by the auth collaborator
pub type UserId = u64;

/// Order number - 64-bit snowflake: `timestamp_ms(41) | worker_id(10) | seq(12)`
pub type OrderNo = u64;

/// Purchase quantity (per request and per cell)
pub type Qty = u32;

/// Stock row version for optimistic writes against the durable store
pub type RowVersion = i64;
