use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use super::{api_error, internal_error, payload_errors, ApiResult};
use crate::middleware::AuthUser;
use crate::models::{Actor, Genre, Play};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/theatre/genres", get(list_genres).post(create_genre))
        .route("/theatre/actors", get(list_actors).post(create_actor))
        .route("/theatre/actors/{id}", get(actor_detail))
        .route("/theatre/plays", get(list_plays).post(create_play))
        .route("/theatre/plays/{id}", get(play_detail))
}

/* ---------- GENRES ---------- */

// GET /api/theatre/genres
async fn list_genres(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let genres = sqlx::query_as::<_, Genre>("SELECT id, name FROM genres ORDER BY name")
        .fetch_all(&state.db.pool)
        .await
        .map_err(|e| internal_error("list_genres", e))?;

    Ok((StatusCode::OK, Json(genres)))
}

// POST /api/theatre/genres
#[derive(Debug, Deserialize, Validate)]
struct CreateGenreRequest {
    #[validate(length(min = 1, message = "name must not be empty"))]
    name: String,
}

async fn create_genre(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateGenreRequest>,
) -> ApiResult<impl IntoResponse> {
    user.require_staff()?;
    req.validate().map_err(|e| payload_errors(&e))?;

    let created = sqlx::query_as::<_, Genre>(
        "INSERT INTO genres (name) VALUES ($1) RETURNING id, name",
    )
    .bind(&req.name)
    .fetch_one(&state.db.pool)
    .await;

    match created {
        Ok(genre) => Ok((StatusCode::CREATED, Json(genre))),
        Err(e) => {
            if let sqlx::Error::Database(ref db) = e {
                if db.is_unique_violation() {
                    return Err((
                        StatusCode::BAD_REQUEST,
                        Json(json!({"name": ["genre with this name already exists"]})),
                    ));
                }
            }
            Err(internal_error("create_genre", e))
        }
    }
}

/* ---------- ACTORS ---------- */

#[derive(Debug, Serialize)]
struct ActorResponse {
    id: i64,
    first_name: String,
    last_name: String,
    full_name: String,
}

impl From<Actor> for ActorResponse {
    fn from(actor: Actor) -> Self {
        let full_name = actor.full_name();
        ActorResponse {
            id: actor.id,
            first_name: actor.first_name,
            last_name: actor.last_name,
            full_name,
        }
    }
}

// GET /api/theatre/actors
async fn list_actors(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let actors = sqlx::query_as::<_, Actor>(
        "SELECT id, first_name, last_name FROM actors ORDER BY first_name",
    )
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| internal_error("list_actors", e))?;

    let payload: Vec<ActorResponse> = actors.into_iter().map(ActorResponse::from).collect();
    Ok((StatusCode::OK, Json(payload)))
}

// GET /api/theatre/actors/{id}
async fn actor_detail(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let actor = sqlx::query_as::<_, Actor>(
        "SELECT id, first_name, last_name FROM actors WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await
    .map_err(|e| internal_error("actor_detail", e))?
    .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "actor not found"))?;

    Ok((StatusCode::OK, Json(ActorResponse::from(actor))))
}

// POST /api/theatre/actors
#[derive(Debug, Deserialize, Validate)]
struct CreateActorRequest {
    #[validate(length(min = 1, message = "first_name must not be empty"))]
    first_name: String,
    #[validate(length(min = 1, message = "last_name must not be empty"))]
    last_name: String,
}

async fn create_actor(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateActorRequest>,
) -> ApiResult<impl IntoResponse> {
    user.require_staff()?;
    req.validate().map_err(|e| payload_errors(&e))?;

    let actor = sqlx::query_as::<_, Actor>(
        r#"
        INSERT INTO actors (first_name, last_name)
        VALUES ($1, $2)
        RETURNING id, first_name, last_name
        "#,
    )
    .bind(&req.first_name)
    .bind(&req.last_name)
    .fetch_one(&state.db.pool)
    .await
    .map_err(|e| internal_error("create_actor", e))?;

    Ok((StatusCode::CREATED, Json(ActorResponse::from(actor))))
}

/* ---------- PLAYS ---------- */

#[derive(Debug, Deserialize)]
struct PlaysQuery {
    title: Option<String>,
    genre: Option<i64>,
}

// GET /api/theatre/plays
async fn list_plays(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(params): Query<PlaysQuery>,
) -> ApiResult<impl IntoResponse> {
    let mut q = String::from("SELECT DISTINCT p.id, p.title, p.description FROM plays p");
    let mut bind_idx = 1;

    if params.genre.is_some() {
        q.push_str(" JOIN play_genres pg ON pg.play_id = p.id");
    }
    q.push_str(" WHERE TRUE");
    if params.title.is_some() {
        q.push_str(&format!(" AND p.title ILIKE ${}", bind_idx));
        bind_idx += 1;
    }
    if params.genre.is_some() {
        q.push_str(&format!(" AND pg.genre_id = ${}", bind_idx));
    }
    q.push_str(" ORDER BY p.id");

    let mut dbq = sqlx::query_as::<_, Play>(&q);
    if let Some(ref title) = params.title {
        dbq = dbq.bind(format!("%{}%", title));
    }
    if let Some(genre) = params.genre {
        dbq = dbq.bind(genre);
    }

    let plays = dbq
        .fetch_all(&state.db.pool)
        .await
        .map_err(|e| internal_error("list_plays", e))?;

    Ok((StatusCode::OK, Json(plays)))
}

#[derive(Debug, Serialize)]
struct PlayDetailResponse {
    id: i64,
    title: String,
    description: Option<String>,
    genres: Vec<Genre>,
    actors: Vec<ActorResponse>,
}

// GET /api/theatre/plays/{id}
async fn play_detail(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let play = sqlx::query_as::<_, Play>(
        "SELECT id, title, description FROM plays WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await
    .map_err(|e| internal_error("play_detail", e))?
    .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "play not found"))?;

    let genres = sqlx::query_as::<_, Genre>(
        r#"
        SELECT g.id, g.name
        FROM genres g
        JOIN play_genres pg ON pg.genre_id = g.id
        WHERE pg.play_id = $1
        ORDER BY g.name
        "#,
    )
    .bind(id)
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| internal_error("play_detail genres", e))?;

    let actors = sqlx::query_as::<_, Actor>(
        r#"
        SELECT a.id, a.first_name, a.last_name
        FROM actors a
        JOIN play_actors pa ON pa.actor_id = a.id
        WHERE pa.play_id = $1
        ORDER BY a.first_name
        "#,
    )
    .bind(id)
    .fetch_all(&state.db.pool)
    .await
    .map_err(|e| internal_error("play_detail actors", e))?;

    Ok((
        StatusCode::OK,
        Json(PlayDetailResponse {
            id: play.id,
            title: play.title,
            description: play.description,
            genres,
            actors: actors.into_iter().map(ActorResponse::from).collect(),
        }),
    ))
}

// POST /api/theatre/plays
#[derive(Debug, Deserialize, Validate)]
struct CreatePlayRequest {
    #[validate(length(min = 1, message = "title must not be empty"))]
    title: String,
    description: Option<String>,
    #[serde(default)]
    actors: Vec<i64>,
    #[serde(default)]
    genres: Vec<i64>,
}

async fn create_play(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreatePlayRequest>,
) -> ApiResult<impl IntoResponse> {
    user.require_staff()?;
    req.validate().map_err(|e| payload_errors(&e))?;

    let mut tx = state
        .db
        .pool
        .begin()
        .await
        .map_err(|e| internal_error("create_play begin", e))?;

    let play = sqlx::query_as::<_, Play>(
        "INSERT INTO plays (title, description) VALUES ($1, $2) RETURNING id, title, description",
    )
    .bind(&req.title)
    .bind(&req.description)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| internal_error("create_play", e))?;

    for actor_id in &req.actors {
        let res = sqlx::query("INSERT INTO play_actors (play_id, actor_id) VALUES ($1, $2)")
            .bind(play.id)
            .bind(actor_id)
            .execute(&mut *tx)
            .await;
        if let Err(e) = res {
            let _ = tx.rollback().await;
            return Err(unknown_reference_error("actors", *actor_id, e));
        }
    }

    for genre_id in &req.genres {
        let res = sqlx::query("INSERT INTO play_genres (play_id, genre_id) VALUES ($1, $2)")
            .bind(play.id)
            .bind(genre_id)
            .execute(&mut *tx)
            .await;
        if let Err(e) = res {
            let _ = tx.rollback().await;
            return Err(unknown_reference_error("genres", *genre_id, e));
        }
    }

    tx.commit()
        .await
        .map_err(|e| internal_error("create_play commit", e))?;

    Ok((StatusCode::CREATED, Json(play)))
}

fn unknown_reference_error(field: &str, id: i64, e: sqlx::Error) -> super::ApiError {
    if let sqlx::Error::Database(ref db) = e {
        if db.is_foreign_key_violation() {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ field: [format!("unknown id: {}", id)] })),
            );
        }
    }
    internal_error("create_play m2m", e)
}
