use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::config::JwtConfig;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub email: String,
    pub is_staff: bool,
}

impl AuthUser {
    // Writes to catalog/venue reference data are staff-only
    pub fn require_staff(&self) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
        if self.is_staff {
            Ok(())
        } else {
            Err((
                StatusCode::FORBIDDEN,
                Json(json!({"detail": "staff access required"})),
            ))
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub email: String,
    pub exp: i64,
}

pub fn issue_token(config: &JwtConfig, user_id: i64, email: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let expires_at = Utc::now() + chrono::Duration::hours(config.expires_in_hours);
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: expires_at.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
}

pub fn decode_token(config: &JwtConfig, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    is_staff: bool,
}

// Bearer token extractor
impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let claims =
            decode_token(&state.config.jwt, token).map_err(|_| StatusCode::UNAUTHORIZED)?;

        // The token only proves identity; staff/active flags are read fresh
        // so revocation takes effect without waiting for expiry.
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, is_staff FROM users WHERE id = $1 AND is_active = TRUE",
        )
        .bind(claims.sub)
        .fetch_optional(&state.db.pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let user = row.ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser {
            user_id: user.id,
            email: user.email,
            is_staff: user.is_staff,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret".to_string(),
            expires_in_hours: 24,
        }
    }

    #[test]
    fn token_round_trip_preserves_claims() {
        let config = test_config();
        let token = issue_token(&config, 42, "someone@example.com").unwrap();
        let claims = decode_token(&config, &token).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.email, "someone@example.com");
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let config = test_config();
        let other = JwtConfig {
            secret: "another-secret".to_string(),
            expires_in_hours: 24,
        };
        let token = issue_token(&other, 42, "someone@example.com").unwrap();
        assert!(decode_token(&config, &token).is_err());
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(decode_token(&test_config(), "not-a-token").is_err());
    }
}
