use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::{api_error, internal_error, ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/theatre/performances",
            get(list_performances).post(create_performance),
        )
        .route(
            "/theatre/performances/{id}",
            get(performance_detail).delete(delete_performance),
        )
}

/* ---------- PERFORMANCES ---------- */

#[derive(Debug, Deserialize)]
struct PerformancesQuery {
    // comma-separated play ids, e.g. ?play=1,3
    play: Option<String>,
}

fn parse_play_filter(raw: &str) -> Result<Vec<i64>, ApiError> {
    raw.split(',')
        .map(|part| part.trim().parse::<i64>())
        .collect::<Result<Vec<i64>, _>>()
        .map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"play": ["must be a comma-separated list of ids"]})),
            )
        })
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct PerformanceListRow {
    id: i64,
    play_id: i64,
    play_title: String,
    theatre_hall_id: i64,
    theatre_hall_name: String,
    show_time: NaiveDateTime,
    rows: i32,
    seats_in_row: i32,
    tickets_available: i64,
}

// GET /api/theatre/performances
async fn list_performances(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(params): Query<PerformancesQuery>,
) -> Result<Response, ApiError> {
    let play_filter = params.play.as_deref().unwrap_or_default();
    let play_ids: Option<Vec<i64>> = match params.play.as_deref() {
        Some(raw) => Some(parse_play_filter(raw)?),
        None => None,
    };

    let cache_key = format!("performances:play={}", play_filter);
    if let Ok(Some(cached_json)) = state.cache.get_cached_listing(&cache_key).await {
        return Ok(Response::builder()
            .header("Content-Type", "application/json")
            .header("X-Cache", "HIT")
            .body(Body::from(cached_json))
            .unwrap());
    }

    let rows = sqlx::query_as::<_, PerformanceListRow>(
        r#"
        SELECT p.id, p.play_id, pl.title AS play_title,
               p.theatre_hall_id, th.name AS theatre_hall_name, p.show_time,
               th.rows, th.seats_in_row,
               (th.rows::bigint * th.seats_in_row) - COUNT(t.id) AS tickets_available
        FROM performances p
        JOIN plays pl ON pl.id = p.play_id
        JOIN theatre_halls th ON th.id = p.theatre_hall_id
        LEFT JOIN tickets t ON t.performance_id = p.id
        WHERE $1::bigint[] IS NULL OR p.play_id = ANY($1)
        GROUP BY p.id, p.play_id, pl.title, p.theatre_hall_id, th.name,
                 p.show_time, th.rows, th.seats_in_row
        ORDER BY p.show_time
        "#,
    )
    .bind(&play_ids)
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| internal_error("list_performances", e))?;

    let count = rows.len();
    let body = json!({
        "performances": rows,
        "count": count,
    });

    let json_str = serde_json::to_string(&body)
        .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error"))?;

    if let Err(e) = state.cache.cache_listing(&cache_key, &json_str).await {
        tracing::warn!("Failed to cache performance listing: {:?}", e);
    }

    Ok(Response::builder()
        .header("Content-Type", "application/json")
        .header("X-Cache", "MISS")
        .body(Body::from(json_str))
        .unwrap())
}

#[derive(Debug, sqlx::FromRow)]
struct PerformanceDetailRow {
    id: i64,
    show_time: NaiveDateTime,
    play_id: i64,
    play_title: String,
    play_description: Option<String>,
    theatre_hall_id: i64,
    theatre_hall_name: String,
    rows: i32,
    seats_in_row: i32,
}

// GET /api/theatre/performances/{id}
async fn performance_detail(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let row = sqlx::query_as::<_, PerformanceDetailRow>(
        r#"
        SELECT p.id, p.show_time,
               pl.id AS play_id, pl.title AS play_title, pl.description AS play_description,
               th.id AS theatre_hall_id, th.name AS theatre_hall_name,
               th.rows, th.seats_in_row
        FROM performances p
        JOIN plays pl ON pl.id = p.play_id
        JOIN theatre_halls th ON th.id = p.theatre_hall_id
        WHERE p.id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await
    .map_err(|e| internal_error("performance_detail", e))?
    .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "performance not found"))?;

    let taken = state
        .cache
        .get_taken_seats(id)
        .await
        .map_err(|e| internal_error("performance_detail seats", e))?;

    let capacity = row.rows as i64 * row.seats_in_row as i64;

    Ok((
        StatusCode::OK,
        Json(json!({
            "id": row.id,
            "show_time": row.show_time,
            "play": {
                "id": row.play_id,
                "title": row.play_title,
                "description": row.play_description,
            },
            "theatre_hall": {
                "id": row.theatre_hall_id,
                "name": row.theatre_hall_name,
                "rows": row.rows,
                "seats_in_row": row.seats_in_row,
                "capacity": capacity,
            },
            "taken_seats": taken,
            "tickets_available": capacity - taken.len() as i64,
        })),
    ))
}

// POST /api/theatre/performances
#[derive(Debug, Deserialize)]
struct CreatePerformanceRequest {
    play: i64,
    theatre_hall: i64,
    show_time: NaiveDateTime,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct CreatePerformanceResponse {
    id: i64,
    play_id: i64,
    theatre_hall_id: i64,
    show_time: NaiveDateTime,
}

async fn create_performance(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreatePerformanceRequest>,
) -> ApiResult<impl IntoResponse> {
    user.require_staff()?;

    let created = sqlx::query_as::<_, CreatePerformanceResponse>(
        r#"
        INSERT INTO performances (play_id, theatre_hall_id, show_time)
        VALUES ($1, $2, $3)
        RETURNING id, play_id, theatre_hall_id, show_time
        "#,
    )
    .bind(req.play)
    .bind(req.theatre_hall)
    .bind(req.show_time)
    .fetch_one(&state.db.pool)
    .await;

    match created {
        Ok(performance) => {
            state.cache.invalidate_listings().await;
            Ok((StatusCode::CREATED, Json(performance)))
        }
        Err(e) => {
            if let sqlx::Error::Database(ref db) = e {
                if db.is_foreign_key_violation() {
                    return Err((
                        StatusCode::BAD_REQUEST,
                        Json(json!({"detail": "unknown play or theatre hall id"})),
                    ));
                }
            }
            Err(internal_error("create_performance", e))
        }
    }
}

// DELETE /api/theatre/performances/{id}
//
// Tickets sold for the performance are detached (performance_id set to NULL
// by the schema), not deleted.
async fn delete_performance(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    user.require_staff()?;

    let deleted: Option<i64> =
        sqlx::query_scalar("DELETE FROM performances WHERE id = $1 RETURNING id")
            .bind(id)
            .fetch_optional(&state.db.pool)
            .await
            .map_err(|e| internal_error("delete_performance", e))?;

    if deleted.is_none() {
        return Err(api_error(StatusCode::NOT_FOUND, "performance not found"));
    }

    state.cache.invalidate_listings().await;
    state.cache.invalidate_seats(id).await;

    Ok((
        StatusCode::OK,
        Json(json!({"message": "performance deleted, tickets detached"})),
    ))
}
