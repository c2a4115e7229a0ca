//! Durable schema bootstrap
//!
//! Idempotent DDL applied at startup. Status columns store the numeric ids
//! from the model enums. The unique index on `orders.request_id` is what
//! makes order materialization idempotent under at-least-once delivery.

pub const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS seckill_activities (
        id              BIGINT PRIMARY KEY,
        goods_id        BIGINT NOT NULL,
        price           NUMERIC(18, 2) NOT NULL,
        initial_stock   BIGINT NOT NULL,
        sold            BIGINT NOT NULL DEFAULT 0,
        per_user_limit  INT NOT NULL DEFAULT 1,
        start_time      TIMESTAMPTZ NOT NULL,
        end_time        TIMESTAMPTZ NOT NULL,
        status          SMALLINT NOT NULL DEFAULT 0,
        version         BIGINT NOT NULL DEFAULT 0,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        order_no        BIGINT PRIMARY KEY,
        request_id      VARCHAR(64) NOT NULL,
        user_id         BIGINT NOT NULL,
        activity_id     BIGINT NOT NULL,
        goods_id        BIGINT NOT NULL,
        quantity        INT NOT NULL,
        amount          NUMERIC(18, 2) NOT NULL,
        status          SMALLINT NOT NULL DEFAULT 0,
        deadline        TIMESTAMPTZ NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_request_id ON orders (request_id)",
    "CREATE INDEX IF NOT EXISTS idx_orders_user_status ON orders (user_id, status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_orders_status_deadline ON orders (status, deadline)",
    r#"
    CREATE TABLE IF NOT EXISTS order_details (
        order_no        BIGINT PRIMARY KEY REFERENCES orders (order_no),
        goods_id        BIGINT NOT NULL,
        unit_price      NUMERIC(18, 2) NOT NULL,
        quantity        INT NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_logs (
        id              BIGSERIAL PRIMARY KEY,
        activity_id     BIGINT NOT NULL,
        goods_id        BIGINT NOT NULL,
        user_id         BIGINT NOT NULL,
        quantity        BIGINT NOT NULL,
        action          VARCHAR(32) NOT NULL,
        request_id      VARCHAR(64) NOT NULL DEFAULT '',
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_stock_logs_activity ON stock_logs (activity_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id              BIGINT PRIMARY KEY,
        username        VARCHAR(64) NOT NULL,
        is_vip          BOOLEAN NOT NULL DEFAULT FALSE,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS goods (
        id              BIGINT PRIMARY KEY,
        name            VARCHAR(128) NOT NULL,
        price           NUMERIC(18, 2) NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_is_idempotent_by_construction() {
        for statement in CREATE_TABLES {
            assert!(
                statement.contains("IF NOT EXISTS"),
                "non-idempotent DDL: {}",
                statement
            );
        }
    }
}
