//! Server-evaluated atomic stock scripts
//!
//! The deduct script is the single writer for `remaining`, `user_buy` and
//! the idempotency mark on the hot path. It runs the five checks in order
//! and aborts on the first failure, so concurrent evaluations on the same
//! partition are totally ordered. The revert script is its exact inverse,
//! guarded by the idempotency record so a second revert is a no-op.
//!
//! Result convention: `{code, remaining}` where code 0 is success and
//! negative codes map onto the inventory error variants.

use once_cell::sync::Lazy;
use redis::Script;

use crate::error::SeckillError;

/// Failure codes returned by the scripts
pub const CODE_OK: i64 = 0;
pub const CODE_STOCK_NOT_LOADED: i64 = -1;
pub const CODE_OUT_OF_STOCK: i64 = -2;
pub const CODE_OVER_USER_LIMIT: i64 = -3;
pub const CODE_DUPLICATE_REQUEST: i64 = -4;
pub const CODE_NOT_DEDUCTED: i64 = -5;

/// KEYS: stock, user_buy, request, stock_log
/// ARGV: qty, per_user_limit, user_ttl_secs, request_ttl_secs, user_id, now_ms
pub static DEDUCT_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local remaining = redis.call('GET', KEYS[1])
if not remaining then
  return {-1, 0}
end
local qty = tonumber(ARGV[1])
remaining = tonumber(remaining)
if remaining < qty then
  return {-2, remaining}
end
local bought = tonumber(redis.call('GET', KEYS[2]) or '0')
if bought + qty > tonumber(ARGV[2]) then
  return {-3, remaining}
end
if redis.call('EXISTS', KEYS[3]) == 1 then
  return {-4, remaining}
end
local left = redis.call('DECRBY', KEYS[1], qty)
if left < 0 then
  redis.call('INCRBY', KEYS[1], qty)
  return {-2, left + qty}
end
redis.call('INCRBY', KEYS[2], qty)
redis.call('EXPIRE', KEYS[2], tonumber(ARGV[3]))
redis.call('SET', KEYS[3], '1', 'EX', tonumber(ARGV[4]))
redis.call('RPUSH', KEYS[4], ARGV[5] .. ':' .. ARGV[1] .. ':' .. ARGV[6])
return {0, left}
"#,
    )
});

/// KEYS: stock, user_buy, request, stock_log
/// ARGV: qty, user_id, now_ms
///
/// The idempotency record is the proof a deduction actually happened; when
/// it is already gone the script reports `NOT_DEDUCTED` and touches nothing.
/// A missing stock key is not recreated here - the reconciliation push loop
/// owns repopulating L1.
pub static REVERT_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call('EXISTS', KEYS[3]) == 0 then
  return {-5, 0}
end
redis.call('DEL', KEYS[3])
local left = -1
if redis.call('EXISTS', KEYS[1]) == 1 then
  left = redis.call('INCRBY', KEYS[1], tonumber(ARGV[1]))
end
local bought = tonumber(redis.call('GET', KEYS[2]) or '0')
if bought <= tonumber(ARGV[1]) then
  redis.call('DEL', KEYS[2])
else
  redis.call('DECRBY', KEYS[2], tonumber(ARGV[1]))
end
redis.call('RPUSH', KEYS[4], 'revert:' .. ARGV[2] .. ':' .. ARGV[1] .. ':' .. ARGV[3])
return {0, left}
"#,
    )
});

/// Owner-token guarded lock release: delete only if we still hold it
pub static UNLOCK_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#,
    )
});

/// Map a deduct script failure code onto the error it stands for
pub fn deduct_code_to_error(code: i64) -> SeckillError {
    match code {
        CODE_STOCK_NOT_LOADED => SeckillError::StockNotLoaded,
        CODE_OUT_OF_STOCK => SeckillError::OutOfStock,
        CODE_OVER_USER_LIMIT => SeckillError::OverUserLimit,
        CODE_DUPLICATE_REQUEST => SeckillError::DuplicateRequest { order_no: None },
        other => SeckillError::FastStore(format!("unexpected deduct script code {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert_eq!(
            deduct_code_to_error(CODE_STOCK_NOT_LOADED).code(),
            "STOCK_NOT_LOADED"
        );
        assert_eq!(deduct_code_to_error(CODE_OUT_OF_STOCK).code(), "OUT_OF_STOCK");
        assert_eq!(
            deduct_code_to_error(CODE_OVER_USER_LIMIT).code(),
            "OVER_USER_LIMIT"
        );
        assert_eq!(
            deduct_code_to_error(CODE_DUPLICATE_REQUEST).code(),
            "DUPLICATE_REQUEST"
        );
    }
}
