//! Request authentication.
//!
//! Two bearer schemes share the `Authorization` header:
//! - `ProjectToken`: a project's delivery token, used by event producers.
//! - `AuthUser`: an HS256 JWT whose `sub` is a recipient id, used by the
//!   management routes.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use noteo_common::error::AppError;
use noteo_common::types::{Project, RecipientId};

use crate::state::AppState;

/// JWT claims stored in the token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject: the recipient id, as a decimal string
    pub sub: String,
    /// Expiration time (UNIX timestamp)
    pub exp: i64,
    /// Issued at (UNIX timestamp)
    pub iat: i64,
}

/// Authenticated recipient extracted from a JWT.
///
/// Use as an Axum extractor on management routes:
/// ```ignore
/// async fn handler(auth: AuthUser) -> impl IntoResponse {
///     // auth.recipient_id is the caller
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub recipient_id: RecipientId,
    pub claims: Claims,
}

/// The project whose delivery token authenticated the request.
#[derive(Debug, Clone)]
pub struct ProjectToken(pub Project);

/// Encode a JWT for a recipient.
pub fn encode_jwt(
    recipient_id: RecipientId,
    secret: &str,
    expiry_hours: u64,
) -> Result<String, AppError> {
    let now = Utc::now();
    let exp = now + Duration::hours(expiry_hours as i64);

    let claims = Claims {
        sub: recipient_id.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Auth(format!("Failed to encode JWT: {}", e)))?;

    Ok(token)
}

/// Decode and validate a JWT.
pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

    Ok(token_data.claims)
}

/// The credential in `Authorization: Bearer <credential>`, if any.
fn bearer(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let secret = state.config.jwt_secret.clone();
        let token = bearer(parts);

        async move {
            let token = token.ok_or_else(|| {
                AppError::Auth(
                    "Missing or invalid Authorization header. Use 'Bearer <JWT>'".to_string(),
                )
            })?;

            let claims = decode_jwt(&token, &secret)?;
            let recipient_id = claims
                .sub
                .parse()
                .map_err(|_| AppError::Auth("Invalid recipient ID in token".to_string()))?;

            Ok(AuthUser {
                recipient_id,
                claims,
            })
        }
    }
}

impl FromRequestParts<AppState> for ProjectToken {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let projects = state.projects.clone();
        let token = bearer(parts);

        async move {
            let Some(token) = token else {
                return Err(AppError::Auth(
                    "Missing or invalid Authorization header. Use 'Bearer <project token>'"
                        .to_string(),
                ));
            };

            let project = projects.get_by_token(&token).await.map_err(|e| {
                tracing::error!(error = %e, "Project token lookup failed");
                e
            })?;

            project
                .map(ProjectToken)
                .ok_or_else(|| AppError::Auth("Unknown project token".to_string()))
        }
    }
}
