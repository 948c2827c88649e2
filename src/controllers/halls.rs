use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use super::{internal_error, payload_errors, ApiResult};
use crate::middleware::AuthUser;
use crate::models::TheatreHall;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/theatre/halls", get(list_halls).post(create_hall))
}

/* ---------- THEATRE HALLS ---------- */

#[derive(Debug, Serialize)]
struct HallResponse {
    id: i64,
    name: String,
    rows: i32,
    seats_in_row: i32,
    capacity: i64,
}

impl From<TheatreHall> for HallResponse {
    fn from(hall: TheatreHall) -> Self {
        let capacity = hall.capacity();
        HallResponse {
            id: hall.id,
            name: hall.name,
            rows: hall.rows,
            seats_in_row: hall.seats_in_row,
            capacity,
        }
    }
}

// GET /api/theatre/halls
async fn list_halls(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let halls = sqlx::query_as::<_, TheatreHall>(
        "SELECT id, name, rows, seats_in_row FROM theatre_halls ORDER BY id",
    )
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| internal_error("list_halls", e))?;

    let payload: Vec<HallResponse> = halls.into_iter().map(HallResponse::from).collect();
    Ok((StatusCode::OK, Json(payload)))
}

// POST /api/theatre/halls
#[derive(Debug, Deserialize, Validate)]
struct CreateHallRequest {
    #[validate(length(min = 1, message = "name must not be empty"))]
    name: String,
    #[validate(range(min = 1, message = "rows must be a positive number"))]
    rows: i32,
    #[validate(range(min = 1, message = "seats_in_row must be a positive number"))]
    seats_in_row: i32,
}

async fn create_hall(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateHallRequest>,
) -> ApiResult<impl IntoResponse> {
    user.require_staff()?;
    req.validate().map_err(|e| payload_errors(&e))?;

    let hall = sqlx::query_as::<_, TheatreHall>(
        r#"
        INSERT INTO theatre_halls (name, rows, seats_in_row)
        VALUES ($1, $2, $3)
        RETURNING id, name, rows, seats_in_row
        "#,
    )
    .bind(&req.name)
    .bind(req.rows)
    .bind(req.seats_in_row)
    .fetch_one(&state.db.pool)
    .await
    .map_err(|e| internal_error("create_hall", e))?;

    Ok((StatusCode::CREATED, Json(HallResponse::from(hall))))
}
