use std::sync::Arc;

use redis::aio::ConnectionManager;

use crate::persistence::Database;
use crate::seckill::SeckillService;

/// Gateway application state (shared)
///
/// Constructed once at startup; every field is immutable after init and
/// safe for concurrent use.
pub struct AppState {
    pub service: Arc<SeckillService>,
    pub jwt_secret: String,
    /// Fast-store handle for the health probe (absent in memory-only runs)
    pub redis: Option<ConnectionManager>,
    /// Durable-store handle for the health probe (absent in memory-only runs)
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(
        service: Arc<SeckillService>,
        jwt_secret: String,
        redis: Option<ConnectionManager>,
        database: Option<Database>,
    ) -> Self {
        Self {
            service,
            jwt_secret,
            redis,
            database,
        }
    }
}
