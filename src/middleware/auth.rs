use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::Actor;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    pub exp: usize,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub is_admin: bool,
}

impl AuthUser {
    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.user_id,
            is_admin: self.is_admin,
        }
    }
}

/// Paths reachable without a bearer token.
fn is_public(path: &str) -> bool {
    path == "/health" || path.starts_with("/webhook/")
}

fn auth_declined_response() -> Response {
    let body = serde_json::json!({
        "code": "AUTH_DECLINED",
        "message": "Authentication required or session invalid"
    });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if is_public(&path) {
        return next.run(req).await;
    }

    let token = match req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        Some(token) => token,
        None => return auth_declined_response(),
    };

    let decoding_key = DecodingKey::from_secret(state.config.jwt_secret.as_ref());
    let validation = Validation::new(Algorithm::HS256);
    let claims = match decode::<Claims>(token, &decoding_key, &validation) {
        Ok(data) => data.claims,
        Err(e) => {
            tracing::debug!("Rejected bearer token: {}", e);
            return auth_declined_response();
        }
    };

    let user_id = match Uuid::parse_str(&claims.user_id) {
        Ok(u) => u,
        Err(_) => return auth_declined_response(),
    };

    if path.starts_with("/admin/") && !claims.is_admin {
        let body = serde_json::json!({
            "code": "INSUFFICIENT_PERMISSION",
            "message": "Insufficient permissions"
        });
        return (StatusCode::FORBIDDEN, Json(body)).into_response();
    }

    req.extensions_mut().insert(AuthUser {
        user_id,
        email: claims.email,
        is_admin: claims.is_admin,
    });

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_paths() {
        assert!(is_public("/health"));
        assert!(is_public("/webhook/flutterwave"));
        assert!(!is_public("/payroll/trigger/abc"));
        assert!(!is_public("/admin/ledger/audit"));
    }

    #[test]
    fn test_claims_default_to_non_admin() {
        let claims: Claims = serde_json::from_value(serde_json::json!({
            "user_id": Uuid::new_v4().to_string(),
            "email": "ada@example.com",
            "exp": 4102444800u64
        }))
        .unwrap();
        assert!(!claims.is_admin);
    }
}
