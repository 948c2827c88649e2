//! End-to-end booking properties against a live Postgres.
//!
//! Run with a disposable database:
//!   DATABASE_URL=postgres://... cargo test -- --ignored

use fake::faker::company::en::CompanyName;
use fake::faker::internet::en::SafeEmail;
use fake::faker::lorem::en::Sentence;
use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use sqlx::PgPool;
use std::time::{SystemTime, UNIX_EPOCH};

use theatre_system::database::Database;
use theatre_system::services::booking::{
    self, BookingError, CoordinateError, HallDimensions, SeatRequest,
};

/* ---------- fixtures ---------- */

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for these tests");
    let db = Database::new(&url, 5).await.expect("connect to postgres");
    db.run_migrations().await.expect("run migrations");
    db.pool
}

fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos()
}

async fn sample_user(pool: &PgPool) -> i64 {
    let first: String = FirstName().fake();
    let last: String = LastName().fake();
    let local: String = SafeEmail().fake();
    let email = format!("{}-{}", unique_suffix(), local);
    sqlx::query_scalar(
        "INSERT INTO users (email, password_hash, first_name, last_name)
         VALUES ($1, 'x', $2, $3) RETURNING id",
    )
    .bind(email)
    .bind(first)
    .bind(last)
    .fetch_one(pool)
    .await
    .expect("insert user")
}

async fn sample_hall(pool: &PgPool, rows: i32, seats_in_row: i32) -> i64 {
    let name: String = CompanyName().fake();
    sqlx::query_scalar(
        "INSERT INTO theatre_halls (name, rows, seats_in_row) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(name)
    .bind(rows)
    .bind(seats_in_row)
    .fetch_one(pool)
    .await
    .expect("insert hall")
}

async fn sample_performance(pool: &PgPool, rows: i32, seats_in_row: i32) -> i64 {
    let hall_id = sample_hall(pool, rows, seats_in_row).await;
    let title: String = Sentence(1..4).fake();
    let play_id: i64 =
        sqlx::query_scalar("INSERT INTO plays (title) VALUES ($1) RETURNING id")
            .bind(title)
            .fetch_one(pool)
            .await
            .expect("insert play");
    sqlx::query_scalar(
        "INSERT INTO performances (play_id, theatre_hall_id, show_time)
         VALUES ($1, $2, '2030-01-01 19:00:00') RETURNING id",
    )
    .bind(play_id)
    .bind(hall_id)
    .fetch_one(pool)
    .await
    .expect("insert performance")
}

fn seat(performance: i64, row: i32, seat: i32) -> SeatRequest {
    SeatRequest {
        performance,
        row,
        seat,
    }
}

async fn ticket_count(pool: &PgPool, performance_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE performance_id = $1")
        .bind(performance_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

/* ---------- §single-seat scenario ---------- */

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn reserve_then_conflict_then_out_of_range() {
    let pool = test_pool().await;
    let performance = sample_performance(&pool, 10, 15).await;
    let alice = sample_user(&pool).await;
    let bob = sample_user(&pool).await;

    // first reservation wins the seat
    let created = booking::create_reservation(&pool, alice, &[seat(performance, 5, 7)])
        .await
        .expect("first reservation succeeds");
    assert_eq!(created.tickets.len(), 1);
    assert_eq!(created.tickets[0].row, 5);
    assert_eq!(created.tickets[0].seat, 7);
    assert_eq!(created.reservation.user_id, alice);

    // same coordinate, different user: conflict
    let err = booking::create_reservation(&pool, bob, &[seat(performance, 5, 7)])
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SeatAlreadyTaken { row: 5, seat: 7, .. }));

    // row beyond the hall grid: out of range, nothing persisted
    let err = booking::create_reservation(&pool, bob, &[seat(performance, 11, 7)])
        .await
        .unwrap_err();
    match err {
        BookingError::InvalidCoordinate { errors } => {
            assert_eq!(
                errors,
                vec![CoordinateError::RowOutOfRange { row: 11, max: 10 }]
            );
        }
        other => panic!("expected InvalidCoordinate, got {:?}", other),
    }

    assert_eq!(ticket_count(&pool, performance).await, 1);
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn boundary_coordinates() {
    let pool = test_pool().await;
    let performance = sample_performance(&pool, 4, 6).await;
    let user = sample_user(&pool).await;

    // all four corners of the grid are valid
    for (r, s) in [(1, 1), (1, 6), (4, 1), (4, 6)] {
        booking::create_reservation(&pool, user, &[seat(performance, r, s)])
            .await
            .unwrap_or_else(|e| panic!("corner ({}, {}) rejected: {:?}", r, s, e));
    }

    // one past each bound is rejected
    for (r, s) in [(0, 3), (5, 3), (2, 0), (2, 7)] {
        let err = booking::create_reservation(&pool, user, &[seat(performance, r, s)])
            .await
            .unwrap_err();
        assert!(
            matches!(err, BookingError::InvalidCoordinate { .. }),
            "({}, {}) should be out of range, got {:?}",
            r,
            s,
            err
        );
    }

    assert_eq!(ticket_count(&pool, performance).await, 4);
}

/* ---------- uniqueness scope ---------- */

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn same_coordinate_reservable_across_performances() {
    let pool = test_pool().await;
    let first = sample_performance(&pool, 10, 15).await;
    let second = sample_performance(&pool, 10, 15).await;
    let user = sample_user(&pool).await;

    booking::create_reservation(&pool, user, &[seat(first, 3, 3)])
        .await
        .expect("seat on first performance");
    booking::create_reservation(&pool, user, &[seat(second, 3, 3)])
        .await
        .expect("same coordinate on second performance");
}

/* ---------- concurrency ---------- */

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn concurrent_requests_for_one_seat_yield_one_winner() {
    const CALLERS: usize = 16;

    let pool = test_pool().await;
    let performance = sample_performance(&pool, 10, 15).await;

    let mut users = Vec::with_capacity(CALLERS);
    for _ in 0..CALLERS {
        users.push(sample_user(&pool).await);
    }

    let tasks: Vec<_> = users
        .into_iter()
        .map(|user| {
            let pool = pool.clone();
            tokio::spawn(async move {
                booking::create_reservation(&pool, user, &[seat(performance, 2, 2)]).await
            })
        })
        .collect();

    let mut winners = 0;
    let mut conflicts = 0;
    for task in futures::future::join_all(tasks).await {
        match task.expect("task panicked") {
            Ok(_) => winners += 1,
            Err(BookingError::SeatAlreadyTaken { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(conflicts, CALLERS - 1);
    assert_eq!(ticket_count(&pool, performance).await, 1);
}

/* ---------- atomicity ---------- */

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn duplicate_within_batch_rolls_back_everything() {
    let pool = test_pool().await;
    let performance = sample_performance(&pool, 10, 15).await;
    let user = sample_user(&pool).await;

    let err = booking::create_reservation(
        &pool,
        user,
        &[seat(performance, 1, 1), seat(performance, 1, 1)],
    )
    .await
    .unwrap_err();
    assert!(matches!(err, BookingError::SeatAlreadyTaken { .. }));

    // no partial state: zero tickets and zero reservations survived
    assert_eq!(ticket_count(&pool, performance).await, 0);
    let reservations: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM reservations WHERE user_id = $1")
            .bind(user)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(reservations, 0);
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn failing_tail_request_rolls_back_earlier_seats() {
    let pool = test_pool().await;
    let performance = sample_performance(&pool, 10, 15).await;
    let user = sample_user(&pool).await;

    // second request is out of range; the valid first seat must not stick
    let err = booking::create_reservation(
        &pool,
        user,
        &[seat(performance, 1, 1), seat(performance, 1, 99)],
    )
    .await
    .unwrap_err();
    assert!(matches!(err, BookingError::InvalidCoordinate { .. }));
    assert_eq!(ticket_count(&pool, performance).await, 0);

    // the rolled-back seat is still available afterwards
    booking::create_reservation(&pool, user, &[seat(performance, 1, 1)])
        .await
        .expect("seat freed by rollback");
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn multi_seat_batch_commits_together() {
    let pool = test_pool().await;
    let performance = sample_performance(&pool, 10, 15).await;
    let user = sample_user(&pool).await;

    let created = booking::create_reservation(
        &pool,
        user,
        &[
            seat(performance, 1, 1),
            seat(performance, 1, 2),
            seat(performance, 2, 1),
        ],
    )
    .await
    .expect("batch reservation");

    assert_eq!(created.tickets.len(), 3);
    for ticket in &created.tickets {
        assert_eq!(ticket.reservation_id, Some(created.reservation.id));
        assert_eq!(ticket.performance_id, Some(performance));
    }
    assert_eq!(ticket_count(&pool, performance).await, 3);
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn empty_batch_is_rejected_before_any_write() {
    let pool = test_pool().await;
    let user = sample_user(&pool).await;

    let err = booking::create_reservation(&pool, user, &[]).await.unwrap_err();
    assert!(matches!(err, BookingError::NoTickets));

    let reservations: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM reservations WHERE user_id = $1")
            .bind(user)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(reservations, 0);
}

/* ---------- reference data & detachment ---------- */

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn capacity_resolves_via_current_hall() {
    let pool = test_pool().await;
    let performance = sample_performance(&pool, 10, 15).await;

    let dims = booking::hall_capacity(&pool, performance).await.unwrap();
    assert_eq!(
        dims,
        HallDimensions {
            rows: 10,
            seats_in_row: 15
        }
    );

    let err = booking::hall_capacity(&pool, -1).await.unwrap_err();
    assert!(matches!(err, BookingError::PerformanceNotFound(-1)));
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn deleting_performance_detaches_tickets() {
    let pool = test_pool().await;
    let performance = sample_performance(&pool, 10, 15).await;
    let user = sample_user(&pool).await;

    let created = booking::create_reservation(&pool, user, &[seat(performance, 6, 6)])
        .await
        .unwrap();
    let ticket_id = created.tickets[0].id;

    sqlx::query("DELETE FROM performances WHERE id = $1")
        .bind(performance)
        .execute(&pool)
        .await
        .unwrap();

    // the ticket survives as an orphan with its performance reference cleared
    let orphaned: Option<i64> =
        sqlx::query_scalar("SELECT performance_id FROM tickets WHERE id = $1")
            .bind(ticket_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(orphaned, None);
}
