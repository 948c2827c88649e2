//! booking.rs
//!
//! Seat allocation and reservation integrity.
//!
//! Everything that can make a seat double-sold lives here:
//! - coordinate validation against the hall's grid (both dimensions checked
//!   independently so the API can report field errors for each),
//! - the per-performance occupancy check and ticket insert, run inside one
//!   transaction with the `uq_ticket_performance_seat` unique constraint as
//!   the final backstop against races,
//! - atomic multi-seat reservation: all tickets commit or none do.
//!
//! Hall dimensions are re-read inside the committing transaction on every
//! call. Earlier validation results are never trusted.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::{Reservation, Ticket};

/// A hall's seating grid. Valid coordinates are
/// `1..=rows` x `1..=seats_in_row`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct HallDimensions {
    pub rows: i32,
    pub seats_in_row: i32,
}

/// One requested seat, in client payload form.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SeatRequest {
    pub performance: i64,
    pub row: i32,
    pub seat: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinateError {
    #[error("row number must be in available range: (1, {max})")]
    RowOutOfRange { row: i32, max: i32 },
    #[error("seat number must be in available range: (1, {max})")]
    SeatOutOfRange { seat: i32, max: i32 },
}

impl CoordinateError {
    /// Request field the error is scoped to.
    pub fn field(&self) -> &'static str {
        match self {
            CoordinateError::RowOutOfRange { .. } => "row",
            CoordinateError::SeatOutOfRange { .. } => "seat",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("performance {0} does not exist")]
    PerformanceNotFound(i64),
    #[error("a reservation requires at least one ticket")]
    NoTickets,
    #[error("invalid seat coordinate")]
    InvalidCoordinate { errors: Vec<CoordinateError> },
    #[error("seat {seat} in row {row} is already taken for performance {performance}")]
    SeatAlreadyTaken {
        performance: i64,
        row: i32,
        seat: i32,
    },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Checks a coordinate against the hall grid. Both dimensions are checked
/// independently; a request with row and seat both out of range gets both
/// errors back, row first.
pub fn validate_coordinate(
    dims: &HallDimensions,
    row: i32,
    seat: i32,
) -> Result<(), Vec<CoordinateError>> {
    let mut errors = Vec::new();
    if !(1..=dims.rows).contains(&row) {
        errors.push(CoordinateError::RowOutOfRange {
            row,
            max: dims.rows,
        });
    }
    if !(1..=dims.seats_in_row).contains(&seat) {
        errors.push(CoordinateError::SeatOutOfRange {
            seat,
            max: dims.seats_in_row,
        });
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

async fn hall_dimensions<'e, E>(
    executor: E,
    performance_id: i64,
) -> Result<Option<HallDimensions>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, HallDimensions>(
        r#"
        SELECT th.rows, th.seats_in_row
        FROM performances p
        JOIN theatre_halls th ON th.id = p.theatre_hall_id
        WHERE p.id = $1
        "#,
    )
    .bind(performance_id)
    .fetch_optional(executor)
    .await
}

/// Resolves a performance's capacity via its current hall.
pub async fn hall_capacity(
    pool: &PgPool,
    performance_id: i64,
) -> Result<HallDimensions, BookingError> {
    hall_dimensions(pool, performance_id)
        .await?
        .ok_or(BookingError::PerformanceNotFound(performance_id))
}

/// Commits one ticket inside the caller's transaction.
///
/// Re-reads the hall dimensions, validates the coordinate, checks occupancy
/// and inserts. The occupancy check is advisory: two callers can both pass it
/// concurrently, in which case the unique constraint rejects the second
/// insert and the violation is mapped to `SeatAlreadyTaken` here.
pub async fn reserve_seat(
    tx: &mut Transaction<'_, Postgres>,
    reservation_id: i64,
    req: &SeatRequest,
) -> Result<Ticket, BookingError> {
    let dims = hall_dimensions(&mut **tx, req.performance)
        .await?
        .ok_or(BookingError::PerformanceNotFound(req.performance))?;

    validate_coordinate(&dims, req.row, req.seat)
        .map_err(|errors| BookingError::InvalidCoordinate { errors })?;

    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM tickets WHERE performance_id = $1 AND row = $2 AND seat = $3)",
    )
    .bind(req.performance)
    .bind(req.row)
    .bind(req.seat)
    .fetch_one(&mut **tx)
    .await?;

    if taken {
        return Err(BookingError::SeatAlreadyTaken {
            performance: req.performance,
            row: req.row,
            seat: req.seat,
        });
    }

    sqlx::query_as::<_, Ticket>(
        r#"
        INSERT INTO tickets (row, seat, performance_id, reservation_id)
        VALUES ($1, $2, $3, $4)
        RETURNING id, row, seat, performance_id, reservation_id
        "#,
    )
    .bind(req.row)
    .bind(req.seat)
    .bind(req.performance)
    .bind(reservation_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_insert_error(e, req))
}

fn map_insert_error(e: sqlx::Error, req: &SeatRequest) -> BookingError {
    if let sqlx::Error::Database(ref db) = e {
        if db.is_unique_violation() {
            return BookingError::SeatAlreadyTaken {
                performance: req.performance,
                row: req.row,
                seat: req.seat,
            };
        }
    }
    BookingError::Db(e)
}

#[derive(Debug, Serialize)]
pub struct CreatedReservation {
    pub reservation: Reservation,
    pub tickets: Vec<Ticket>,
}

/// Creates a reservation together with its tickets as one atomic unit.
///
/// Seat requests are processed in input order; the first failure aborts and
/// rolls back the whole batch, so no partial reservation is ever visible to
/// other readers. `user_id` must come from the authenticated caller, never
/// from the request payload.
pub async fn create_reservation(
    pool: &PgPool,
    user_id: i64,
    seat_requests: &[SeatRequest],
) -> Result<CreatedReservation, BookingError> {
    if seat_requests.is_empty() {
        return Err(BookingError::NoTickets);
    }

    let mut tx = pool.begin().await?;

    let reservation = sqlx::query_as::<_, Reservation>(
        "INSERT INTO reservations (user_id) VALUES ($1) RETURNING id, user_id, created_at",
    )
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    let mut tickets = Vec::with_capacity(seat_requests.len());
    for req in seat_requests {
        match reserve_seat(&mut tx, reservation.id, req).await {
            Ok(ticket) => tickets.push(ticket),
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(e);
            }
        }
    }

    tx.commit().await?;

    Ok(CreatedReservation {
        reservation,
        tickets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DIMS: HallDimensions = HallDimensions {
        rows: 10,
        seats_in_row: 15,
    };

    #[test]
    fn coordinate_inside_grid_validates() {
        assert_eq!(validate_coordinate(&DIMS, 5, 7), Ok(()));
        assert_eq!(validate_coordinate(&DIMS, 1, 1), Ok(()));
        assert_eq!(validate_coordinate(&DIMS, 10, 15), Ok(()));
    }

    #[test]
    fn row_outside_grid_is_rejected() {
        for row in [0, 11, -3] {
            let errors = validate_coordinate(&DIMS, row, 7).unwrap_err();
            assert_eq!(errors, vec![CoordinateError::RowOutOfRange { row, max: 10 }]);
            assert_eq!(errors[0].field(), "row");
        }
    }

    #[test]
    fn seat_outside_grid_is_rejected() {
        for seat in [0, 16, -1] {
            let errors = validate_coordinate(&DIMS, 5, seat).unwrap_err();
            assert_eq!(
                errors,
                vec![CoordinateError::SeatOutOfRange { seat, max: 15 }]
            );
            assert_eq!(errors[0].field(), "seat");
        }
    }

    #[test]
    fn both_dimensions_reported_at_once() {
        // no short-circuit: the caller gets one error per failing field
        let errors = validate_coordinate(&DIMS, 0, 16).unwrap_err();
        assert_eq!(
            errors,
            vec![
                CoordinateError::RowOutOfRange { row: 0, max: 10 },
                CoordinateError::SeatOutOfRange { seat: 16, max: 15 },
            ]
        );
    }

    #[test]
    fn single_seat_grid() {
        let dims = HallDimensions {
            rows: 1,
            seats_in_row: 1,
        };
        assert_eq!(validate_coordinate(&dims, 1, 1), Ok(()));
        assert!(validate_coordinate(&dims, 2, 1).is_err());
        assert!(validate_coordinate(&dims, 1, 2).is_err());
    }

    proptest! {
        #[test]
        fn any_coordinate_within_bounds_validates(
            rows in 1..=300i32,
            seats in 1..=300i32,
            row_off in 0..300i32,
            seat_off in 0..300i32,
        ) {
            let dims = HallDimensions { rows, seats_in_row: seats };
            let row = 1 + row_off % rows;
            let seat = 1 + seat_off % seats;
            prop_assert_eq!(validate_coordinate(&dims, row, seat), Ok(()));
        }

        #[test]
        fn any_coordinate_past_either_bound_fails(
            rows in 1..=300i32,
            seats in 1..=300i32,
            over in 1..=100i32,
        ) {
            let dims = HallDimensions { rows, seats_in_row: seats };
            prop_assert!(validate_coordinate(&dims, rows + over, 1).is_err());
            prop_assert!(validate_coordinate(&dims, 1, seats + over).is_err());
            prop_assert!(validate_coordinate(&dims, 0, 1).is_err());
            prop_assert!(validate_coordinate(&dims, 1, 0).is_err());
        }
    }
}
