use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use super::{api_error, internal_error, payload_errors, ApiResult};
use crate::middleware::{issue_token, AuthUser};
use crate::models::User;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users/register", post(register))
        .route("/users/token", post(obtain_token))
        .route("/users/me", get(me))
}

/* ---------- USERS ---------- */

#[derive(Debug, Serialize)]
struct UserResponse {
    id: i64,
    email: String,
    first_name: String,
    last_name: String,
    is_staff: bool,
}

// POST /api/users/register
#[derive(Debug, Deserialize, Validate)]
struct RegisterRequest {
    #[validate(email(message = "enter a valid email address"))]
    email: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    password: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate().map_err(|e| payload_errors(&e))?;

    let password_hash = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST)
        .map_err(|e| {
            tracing::error!("register hash error: {:?}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        })?;

    let created = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash, first_name, last_name)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(&req.email)
    .bind(&password_hash)
    .bind(&req.first_name)
    .bind(&req.last_name)
    .fetch_one(&state.db.pool)
    .await;

    match created {
        Ok(user) => Ok((
            StatusCode::CREATED,
            Json(UserResponse {
                id: user.id,
                email: user.email,
                first_name: user.first_name,
                last_name: user.last_name,
                is_staff: user.is_staff,
            }),
        )),
        Err(e) => {
            if let sqlx::Error::Database(ref db) = e {
                if db.is_unique_violation() {
                    return Err((
                        StatusCode::BAD_REQUEST,
                        Json(json!({"email": ["user with this email already exists"]})),
                    ));
                }
            }
            Err(internal_error("register", e))
        }
    }
}

// POST /api/users/token
#[derive(Debug, Deserialize)]
struct TokenRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    access: String,
}

async fn obtain_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TokenRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = User::find_by_email(&req.email, &state.db)
        .await
        .map_err(|e| internal_error("obtain_token", e))?;

    // Same rejection for unknown email and wrong password
    let user = match user {
        Some(u) if u.is_active && u.verify_password(&req.password) => u,
        _ => return Err(api_error(StatusCode::UNAUTHORIZED, "invalid credentials")),
    };

    let access = issue_token(&state.config.jwt, user.id, &user.email).map_err(|e| {
        tracing::error!("obtain_token jwt error: {:?}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    })?;

    Ok((StatusCode::OK, Json(TokenResponse { access })))
}

// GET /api/users/me
async fn me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let row = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user.user_id)
        .fetch_optional(&state.db.pool)
        .await
        .map_err(|e| internal_error("me", e))?
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "user no longer exists"))?;

    Ok((
        StatusCode::OK,
        Json(UserResponse {
            id: row.id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            is_staff: row.is_staff,
        }),
    ))
}
