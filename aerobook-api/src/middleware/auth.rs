use aerobook_core::identity::{Principal, Role};
use aerobook_core::models::UserId;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User id.
    pub sub: i64,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

impl Claims {
    pub fn principal(&self) -> Principal {
        Principal::new(UserId(self.sub), self.username.clone(), self.role)
    }

    /// HS256 token for these claims.
    pub fn sign(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        encode(
            &Header::new(Algorithm::HS256),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }
}

// ============================================================================
// Bearer Authentication Middleware
// ============================================================================

/// Resolves the bearer token into a `Principal` request extension.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| AppError::AuthenticationError("missing bearer token".to_string()))?;

    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| {
        tracing::debug!("Rejected token: {}", e);
        AppError::AuthenticationError("invalid or expired token".to_string())
    })?;

    let principal = token_data.claims.principal();
    tracing::debug!(user_id = %principal.user_id, role = ?principal.role, "Authenticated");
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}
