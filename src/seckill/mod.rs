//! Seckill orchestration
//!
//! The request pipeline: validation, pre-filters, atomic deduction, intent
//! enqueue, provisional result. Pre-filters give a verdict without touching
//! inventory; every path that deducted either enqueues successfully or
//! reverts before returning.

pub mod prefilter;
pub mod result_store;
pub mod service;

pub use prefilter::{
    AllowAllRateLimiter, DegradeManager, DegradeSwitchboard, FixedWindowRateLimiter, RateLimiter,
};
pub use result_store::{MemoryResultStore, RedisResultStore, ResultStore};
pub use service::SeckillService;
