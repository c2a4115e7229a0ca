//! Canonical fast-store key layout
//!
//! Every activity-scoped key embeds `{<activity>}` as a hash tag so that the
//! deduct/revert scripts only ever touch one partition. The idempotency key
//! carries the tag too; script atomicity depends on it.

use crate::core_types::{ActivityId, GoodsId, UserId};

/// `stock:{<activity>}:<goods>` - integer remaining
pub fn stock(activity_id: ActivityId, goods_id: GoodsId) -> String {
    format!("stock:{{{}}}:{}", activity_id, goods_id)
}

/// `user_buy:{<activity>}:<user>` - integer bought, TTL = activity end
pub fn user_buy(activity_id: ActivityId, user_id: UserId) -> String {
    format!("user_buy:{{{}}}:{}", activity_id, user_id)
}

/// `request:{<activity>}:<request_id>` - idempotency mark, TTL = end + grace
pub fn request(activity_id: ActivityId, request_id: &str) -> String {
    format!("request:{{{}}}:{}", activity_id, request_id)
}

/// `stock_log:{<activity>}:<goods>` - append-only audit list
pub fn stock_log(activity_id: ActivityId, goods_id: GoodsId) -> String {
    format!("stock_log:{{{}}}:{}", activity_id, goods_id)
}

/// `lock:stock:{<activity>}` - named lock, owner-token value, PX TTL
pub fn stock_lock(activity_id: ActivityId) -> String {
    format!("lock:stock:{{{}}}", activity_id)
}

/// `result:<request_id>` - verdict written by consumers, polled by clients
pub fn result(request_id: &str) -> String {
    format!("result:{}", request_id)
}

/// Queue list backing a topic in the broker-backed queue
pub fn queue_topic(topic: &str) -> String {
    format!("queue:seckill:{}", topic)
}

/// Processing list holding in-flight deliveries for at-least-once redelivery
pub fn queue_processing(topic: &str) -> String {
    format!("queue:seckill:{}:processing", topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_keys_share_hash_tag() {
        let tag = "{42}";
        assert!(stock(42, 7).contains(tag));
        assert!(user_buy(42, 1001).contains(tag));
        assert!(request(42, "req-1").contains(tag));
        assert!(stock_log(42, 7).contains(tag));
        assert!(stock_lock(42).contains(tag));
    }

    #[test]
    fn test_key_formats() {
        assert_eq!(stock(1, 2), "stock:{1}:2");
        assert_eq!(user_buy(1, 3), "user_buy:{1}:3");
        assert_eq!(request(1, "abc"), "request:{1}:abc");
        assert_eq!(stock_lock(1), "lock:stock:{1}");
        assert_eq!(result("abc"), "result:abc");
    }
}
