//! Request handlers
//!
//! Thin adapters: extract identity + inputs, call the service, shape the
//! response. Error mapping lives in `response`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension, Json,
    extract::{ConnectInfo, Path, State},
};
use serde::{Deserialize, Serialize};

use super::auth::AuthenticatedUser;
use super::response::{ApiError, ApiResult, ok};
use super::state::AppState;
use crate::core_types::{ActivityId, OrderNo};
use crate::models::{SeckillRequest, SeckillVerdict};

/// Deadline for dependency probes on the health endpoint
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// POST /api/v1/seckill/execute
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    pub request_id: String,
    pub activity_id: ActivityId,
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub struct ExecuteData {
    pub accepted: bool,
    pub request_id: String,
    pub deduct_id: String,
    pub queue_position_estimate: usize,
}

pub async fn execute_seckill(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<ExecuteBody>,
) -> ApiResult<ExecuteData> {
    let request = SeckillRequest {
        request_id: body.request_id,
        activity_id: body.activity_id,
        user_id: user.user_id,
        quantity: body.quantity,
        is_vip: user.is_vip,
        client_ip: peer.ip().to_string(),
    };

    let accepted = state.service.do_seckill(request).await?;
    ok(ExecuteData {
        accepted: accepted.accepted,
        request_id: accepted.request_id,
        deduct_id: accepted.deduct_id,
        queue_position_estimate: accepted.queue_position_estimate,
    })
}

// ============================================================================
// GET /api/v1/seckill/result/{request_id}
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ResultData {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_no: Option<OrderNo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub async fn query_result(
    State(state): State<Arc<AppState>>,
    Extension(_user): Extension<AuthenticatedUser>,
    Path(request_id): Path<String>,
) -> ApiResult<ResultData> {
    let verdict = state
        .service
        .query_result(&request_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Unknown request id"))?;

    let data = match verdict {
        SeckillVerdict::Pending => ResultData {
            status: "pending",
            order_no: None,
            reason: None,
        },
        SeckillVerdict::Success { order_no } => ResultData {
            status: "success",
            order_no: Some(order_no),
            reason: None,
        },
        SeckillVerdict::Failure { reason } => ResultData {
            status: "failure",
            order_no: None,
            reason: Some(reason),
        },
    };
    ok(data)
}

// ============================================================================
// POST /api/v1/seckill/prewarm/{activity_id}
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PrewarmData {
    pub ok: bool,
    /// False when the fast store was already populated
    pub loaded: bool,
}

pub async fn prewarm_activity(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(activity_id): Path<ActivityId>,
) -> ApiResult<PrewarmData> {
    if !user.is_admin() {
        return Err(ApiError::forbidden("Prewarm is admin-only"));
    }
    let loaded = state.service.prewarm_activity(activity_id).await?;
    ok(PrewarmData { ok: true, loaded })
}

// ============================================================================
// GET /api/v1/health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub status: &'static str,
    pub fast_store: &'static str,
    pub durable_store: &'static str,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<HealthData> {
    let fast_store = match &state.redis {
        Some(conn) => {
            let mut conn = conn.clone();
            let ping = async move {
                let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
                Ok::<String, redis::RedisError>(pong)
            };
            match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, ping).await {
                Ok(Ok(_)) => "up",
                _ => "down",
            }
        }
        None => "disabled",
    };

    let durable_store = match &state.database {
        Some(db) => match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, db.ping()).await {
            Ok(Ok(())) => "up",
            _ => "down",
        },
        None => "disabled",
    };

    let status = if fast_store != "down" && durable_store != "down" {
        "ok"
    } else {
        "degraded"
    };
    ok(HealthData {
        status,
        fast_store,
        durable_store,
    })
}
