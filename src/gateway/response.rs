//! API response types
//!
//! - `ApiResponse<T>`: unified wrapper `{code, msg, data}`
//! - `ApiResult<T>`: handler return alias
//! - `ApiError`: error with stable code, HTTP status and optional
//!   Retry-After hint

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::error::SeckillError;

/// Unified API response wrapper
///
/// - code: "OK" on success, a stable error code otherwise
/// - msg: short human-readable description
/// - data: payload, present only on success
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: "OK".to_string(),
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: impl Into<String>, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code: code.into(),
            msg: msg.into(),
            data: None,
        }
    }
}

/// Handler return alias
pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

/// 200 OK helper
#[inline]
pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

/// Unified API error with automatic IntoResponse
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "AUTH_FAILED", msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", msg)
    }
}

impl From<SeckillError> for ApiError {
    fn from(err: SeckillError) -> Self {
        let status = StatusCode::from_u16(err.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after_secs = match &err {
            SeckillError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            SeckillError::Degraded | SeckillError::SystemBusy => Some(1),
            _ => None,
        };
        // A duplicate that already materialized reports its original order
        let message = match &err {
            SeckillError::DuplicateRequest {
                order_no: Some(order_no),
            } => format!("Duplicate request; original order {}", order_no),
            _ => err.to_string(),
        };
        Self {
            status,
            code: err.code().to_string(),
            message,
            retry_after_secs,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(ApiResponse::<()>::error(self.code, self.message));
        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seckill_error_mapping() {
        let err: ApiError = SeckillError::OutOfStock.into();
        assert_eq!(err.status, StatusCode::GONE);
        assert_eq!(err.code, "OUT_OF_STOCK");
        assert_eq!(err.retry_after_secs, None);

        let err: ApiError = SeckillError::RateLimited {
            retry_after_secs: 3,
        }
        .into();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.retry_after_secs, Some(3));

        let err: ApiError = SeckillError::DuplicateRequest { order_no: None }.into();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[test]
    fn test_success_shape() {
        let response = ApiResponse::success(42);
        assert_eq!(response.code, "OK");
        assert_eq!(response.data, Some(42));
    }
}
