pub mod halls;
pub mod performances;
pub mod plays;
pub mod reservations;
pub mod users;

use axum::{http::StatusCode, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub type ApiError = (StatusCode, Json<Value>);
pub type ApiResult<T> = Result<T, ApiError>;

pub fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "detail": message })))
}

// Log the SQL error with context, hand the client an opaque 500
pub fn internal_error(context: &str, e: sqlx::Error) -> ApiError {
    tracing::error!("{} sql error: {:?}", context, e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}

// Field-scoped 400 from derive-level payload validation
pub fn payload_errors(errors: &validator::ValidationErrors) -> ApiError {
    let mut body = serde_json::Map::new();
    for (field, field_errors) in errors.field_errors() {
        let messages: Vec<String> = field_errors
            .iter()
            .map(|e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string())
            })
            .collect();
        body.insert(field.to_string(), json!(messages));
    }
    (StatusCode::BAD_REQUEST, Json(Value::Object(body)))
}

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(users::routes())
        .merge(halls::routes())
        .merge(plays::routes())
        .merge(performances::routes())
        .merge(reservations::routes())
}
