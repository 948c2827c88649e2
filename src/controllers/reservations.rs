use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::Row;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{api_error, internal_error, ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::services::booking::{self, BookingError, SeatRequest};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/theatre/reservations",
            get(list_reservations).post(create_reservation),
        )
        .route("/theatre/reservations/{id}", axum::routing::delete(delete_reservation))
}

/* ---------- helpers ---------- */

async fn reservation_belongs_to_user(
    pool: &sqlx::PgPool,
    reservation_id: i64,
    user_id: i64,
) -> sqlx::Result<bool> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM reservations WHERE id = $1 AND user_id = $2)",
    )
    .bind(reservation_id)
    .bind(user_id)
    .fetch_one(pool)
    .await
}

// BookingError -> client response; field-scoped 400s for validation, 409 for
// conflicts, opaque 500 for storage faults.
fn booking_error(e: BookingError) -> ApiError {
    match e {
        BookingError::PerformanceNotFound(id) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"performance": [format!("performance {} does not exist", id)]})),
        ),
        BookingError::NoTickets => (
            StatusCode::BAD_REQUEST,
            Json(json!({"tickets": ["at least one ticket is required"]})),
        ),
        BookingError::InvalidCoordinate { errors } => {
            let mut body = serde_json::Map::new();
            for err in &errors {
                body.insert(err.field().to_string(), json!([err.to_string()]));
            }
            (StatusCode::BAD_REQUEST, Json(serde_json::Value::Object(body)))
        }
        BookingError::SeatAlreadyTaken { .. } => {
            (StatusCode::CONFLICT, Json(json!({"detail": e.to_string()})))
        }
        BookingError::Db(e) => internal_error("reservation", e),
    }
}

/* ---------- RESERVATIONS ---------- */

#[derive(Debug, Serialize)]
struct TicketResponse {
    id: i64,
    row: i32,
    seat: i32,
    performance_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ReservationResponse {
    id: i64,
    created_at: NaiveDateTime,
    tickets: Vec<TicketResponse>,
}

// GET /api/theatre/reservations
async fn list_reservations(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let rows = sqlx::query(
        r#"
        SELECT r.id AS rid, r.created_at, t.id AS tid, t.row, t.seat, t.performance_id
        FROM reservations r
        LEFT JOIN tickets t ON t.reservation_id = r.id
        WHERE r.user_id = $1
        ORDER BY r.created_at DESC, t.id
        "#,
    )
    .bind(user.user_id)
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| internal_error("list_reservations", e))?;

    let mut map: BTreeMap<i64, (NaiveDateTime, Vec<TicketResponse>)> = BTreeMap::new();
    for r in rows {
        let rid: i64 = r.get("rid");
        let created_at: NaiveDateTime = r.get("created_at");
        let entry = map.entry(rid).or_insert((created_at, Vec::new()));
        if let Ok(tid) = r.try_get::<i64, _>("tid") {
            entry.1.push(TicketResponse {
                id: tid,
                row: r.get("row"),
                seat: r.get("seat"),
                performance_id: r.get("performance_id"),
            });
        }
    }

    // newest first
    let payload: Vec<ReservationResponse> = map
        .into_iter()
        .rev()
        .map(|(rid, (created_at, tickets))| ReservationResponse {
            id: rid,
            created_at,
            tickets,
        })
        .collect();

    Ok((StatusCode::OK, Json(payload)))
}

// POST /api/theatre/reservations
//
// The owning user comes from the bearer token, never from the payload.
#[derive(Debug, Deserialize)]
struct CreateReservationRequest {
    tickets: Vec<SeatRequest>,
}

async fn create_reservation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateReservationRequest>,
) -> ApiResult<impl IntoResponse> {
    let created = booking::create_reservation(&state.db.pool, user.user_id, &req.tickets)
        .await
        .map_err(booking_error)?;

    // Committed; refresh availability caches for every touched performance
    let mut performance_ids: Vec<i64> = created
        .tickets
        .iter()
        .filter_map(|t| t.performance_id)
        .collect();
    performance_ids.sort_unstable();
    performance_ids.dedup();
    futures::future::join_all(
        performance_ids
            .iter()
            .map(|id| state.cache.invalidate_seats(*id)),
    )
    .await;

    Ok((StatusCode::CREATED, Json(created)))
}

// DELETE /api/theatre/reservations/{id}
//
// Owner only. Tickets survive with reservation_id cleared.
async fn delete_reservation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let belongs = reservation_belongs_to_user(&state.db.pool, id, user.user_id)
        .await
        .map_err(|e| internal_error("delete_reservation", e))?;
    if !belongs {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "reservation not found or not yours",
        ));
    }

    // Collect touched performances before the tickets detach
    let performance_ids: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT performance_id FROM tickets
        WHERE reservation_id = $1 AND performance_id IS NOT NULL
        "#,
    )
    .bind(id)
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| internal_error("delete_reservation seats", e))?;

    sqlx::query("DELETE FROM reservations WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await
        .map_err(|e| internal_error("delete_reservation", e))?;

    futures::future::join_all(
        performance_ids
            .iter()
            .map(|pid| state.cache.invalidate_seats(*pid)),
    )
    .await;

    Ok((
        StatusCode::OK,
        Json(json!({"message": "reservation deleted, tickets detached"})),
    ))
}
