//! HTTP gateway
//!
//! Thin JSON surface over the orchestrator, versioned under `/api/v1`.
//! Routing, auth decode and response shaping live here; all decisions are
//! the service's.

pub mod auth;
pub mod handlers;
pub mod response;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use state::AppState;

/// Assemble the full router
pub fn build_router(state: Arc<AppState>) -> Router {
    let seckill_routes = Router::new()
        .route("/seckill/execute", post(handlers::execute_seckill))
        .route("/seckill/result/{request_id}", get(handlers::query_result))
        .route(
            "/seckill/prewarm/{activity_id}",
            post(handlers::prewarm_activity),
        )
        .layer(from_fn_with_state(state.clone(), auth::jwt_auth_middleware));

    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        .nest("/api/v1", seckill_routes)
        .with_state(state)
}

/// Bind and serve until the shutdown signal flips
pub async fn serve(
    state: Arc<AppState>,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "gateway listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
        info!("gateway draining connections");
    })
    .await?;

    Ok(())
}
