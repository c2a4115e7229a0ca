//! Bearer token decoding
//!
//! Token issuance belongs to the external auth service; this middleware
//! only verifies the signature and places the authenticated identity into
//! request extensions for handlers to pick up.

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::response::ApiError;
use super::state::AppState;
use crate::core_types::UserId;

/// Claims carried by the external issuer
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// user_id as string
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub vip: bool,
    #[serde(default)]
    pub role: String,
}

/// Identity available to handlers after the middleware ran
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub is_vip: bool,
    pub role: String,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

pub async fn jwt_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("Invalid token format"))?;

    let claims = verify_token(token, &state.jwt_secret)
        .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;

    let user_id: UserId = claims
        .sub
        .parse()
        .map_err(|_| ApiError::unauthorized("Malformed subject claim"))?;

    request.extensions_mut().insert(AuthenticatedUser {
        user_id,
        is_vip: claims.vip,
        role: claims.role,
    });
    Ok(next.run(request).await)
}

fn verify_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    let token_data = decode::<Claims>(token, &decoding_key, &validation)?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token_for(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(sub: &str) -> Claims {
        Claims {
            sub: sub.to_string(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
            vip: true,
            role: "admin".to_string(),
        }
    }

    #[test]
    fn test_round_trip_claims() {
        let token = token_for(&claims("42"), "secret");
        let decoded = verify_token(&token, "secret").unwrap();
        assert_eq!(decoded.sub, "42");
        assert!(decoded.vip);
        assert_eq!(decoded.role, "admin");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = token_for(&claims("42"), "secret");
        assert!(verify_token(&token, "other").is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut expired = claims("42");
        expired.exp = (chrono::Utc::now().timestamp() - 3600) as usize;
        let token = token_for(&expired, "secret");
        assert!(verify_token(&token, "secret").is_err());
    }

    #[test]
    fn test_admin_check() {
        let user = AuthenticatedUser {
            user_id: 1,
            is_vip: false,
            role: "admin".into(),
        };
        assert!(user.is_admin());
        let user = AuthenticatedUser {
            user_id: 1,
            is_vip: true,
            role: "user".into(),
        };
        assert!(!user.is_admin());
    }
}
