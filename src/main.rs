//! flashline service entry point
//!
//! Startup is a single init phase that fails fast: config, logging,
//! durable store, fast store, preload, workers, gateway. Exit code 1 on
//! any init failure, 0 on clean shutdown.
//!
//! ```text
//! ┌────────┐   ┌───────────┐   ┌───────┐   ┌──────────┐   ┌─────────┐
//! │ Client │──▶│ Orchestr. │──▶│ Stock │──▶│  Queue   │──▶│ Durable │
//! │  HTTP  │   │ (filters) │   │ (Lua) │   │ VIP/NORM │   │  Order  │
//! └────────┘   └───────────┘   └───────┘   └──────────┘   └─────────┘
//!                 expiry + reconciliation loops run alongside
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use flashline::config::AppConfig;
use flashline::consumer::{ConsumerPool, OrderConsumer};
use flashline::expiry::ExpiryWorker;
use flashline::gateway::{self, state::AppState};
use flashline::logging::init_logging;
use flashline::persistence::{
    ActivityStore, Database, OrderStore, PgActivityStore, PgOrderStore,
};
use flashline::queue::{MemoryOrderQueue, OrderQueue, RedisOrderQueue};
use flashline::reconcile::ReconcileWorker;
use flashline::seckill::{
    DegradeSwitchboard, FixedWindowRateLimiter, RedisResultStore, ResultStore, SeckillService,
};
use flashline::snowflake::OrderNoGenerator;
use flashline::stock::{MultiLevelInventory, RedisStockBackend, StockBackend};

fn main() {
    let config = match AppConfig::load_from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&config.log);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "fatal: failed to start runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        error!(error = %e, "fatal: service failed");
        std::process::exit(1);
    }
    info!("clean shutdown");
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "flashline starting");

    // === Init phase: every failure here is fatal ===

    let database = Database::connect(&config.database).await?;
    database.init_schema().await?;
    info!("durable store ready");

    let backend = Arc::new(RedisStockBackend::connect(&config.redis).await?);
    let redis_conn = backend.connection();
    info!("fast store ready");

    let activities: Arc<dyn ActivityStore> = Arc::new(PgActivityStore::new(&database));
    let orders: Arc<dyn OrderStore> = Arc::new(PgOrderStore::new(&database));

    let stock_backend: Arc<dyn StockBackend> = backend.clone();
    let inventory = Arc::new(MultiLevelInventory::new(
        stock_backend,
        activities.clone(),
        &config.seckill,
    ));

    let queue: Arc<dyn OrderQueue> = match config.seckill.queue_backend.as_str() {
        "redis" => {
            let queue = RedisOrderQueue::new(redis_conn.clone(), config.seckill.queue_capacity);
            let requeued = queue.requeue_inflight().await?;
            if requeued > 0 {
                warn!(requeued, "requeued in-flight deliveries from a previous run");
            }
            Arc::new(queue)
        }
        "memory" => Arc::new(MemoryOrderQueue::new(config.seckill.queue_capacity)),
        other => anyhow::bail!("unknown queue backend {:?}", other),
    };

    let results: Arc<dyn ResultStore> = Arc::new(RedisResultStore::new(redis_conn.clone()));
    let rate_limiter = Arc::new(FixedWindowRateLimiter::new(
        Duration::from_secs(1),
        config.seckill.rate_limit_user,
        config.seckill.rate_limit_ip,
    ));
    let degrade = Arc::new(DegradeSwitchboard::new());

    let service = Arc::new(SeckillService::new(
        activities.clone(),
        inventory.clone(),
        queue.clone(),
        results.clone(),
        rate_limiter,
        degrade,
        &config.seckill,
    ));

    // Warm every active activity before taking traffic
    let active = activities.list_active().await?;
    for activity in &active {
        inventory.preload(activity).await?;
    }
    info!(count = active.len(), "active activities preloaded");

    // === Workers ===

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let order_nos = Arc::new(OrderNoGenerator::new(worker_id_from_env())?);
    let order_consumer = Arc::new(OrderConsumer::new(
        queue.clone(),
        orders.clone(),
        inventory.clone(),
        results,
        order_nos,
        &config.seckill,
    ));
    let pool = ConsumerPool::new(order_consumer, &config.seckill);
    let mut worker_handles = pool.spawn(shutdown_rx.clone());

    let expiry = Arc::new(ExpiryWorker::new(
        orders.clone(),
        inventory.clone(),
        &config.seckill,
    ));
    {
        let expiry = expiry.clone();
        let shutdown = shutdown_rx.clone();
        worker_handles.push(tokio::spawn(async move { expiry.run(shutdown).await }));
    }

    let reconcile = Arc::new(ReconcileWorker::new(
        activities,
        orders,
        inventory,
        &config.seckill,
    ));
    worker_handles.extend(reconcile.spawn(shutdown_rx.clone()));

    // === Gateway ===

    let state = Arc::new(AppState::new(
        service,
        config.auth.jwt_secret.clone(),
        Some(redis_conn),
        Some(database),
    ));
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let gateway_handle = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { gateway::serve(state, addr, shutdown).await })
    };

    // === Wait for a shutdown signal ===

    wait_for_signal().await;
    info!("shutdown signal received, draining");
    queue.close();
    let _ = shutdown_tx.send(true);

    let grace = config.seckill.shutdown_grace();
    if tokio::time::timeout(grace, async {
        for handle in worker_handles {
            let _ = handle.await;
        }
    })
    .await
    .is_err()
    {
        warn!(grace_secs = grace.as_secs(), "workers did not drain in time");
    }

    match tokio::time::timeout(Duration::from_secs(5), gateway_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "gateway exited with error"),
        Ok(Err(e)) => error!(error = %e, "gateway task panicked"),
        Err(_) => warn!("gateway did not stop in time"),
    }

    Ok(())
}

/// Snowflake worker id for this process (0-1023), from `FLASHLINE_WORKER_ID`
fn worker_id_from_env() -> u64 {
    std::env::var("FLASHLINE_WORKER_ID")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(1)
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
