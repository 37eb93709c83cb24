use chrono::{DateTime, Utc};
use parterre_domain::{Seat, SeatStatus, SeatType};
use sqlx::{PgPool, Postgres, Transaction};

/// Column values for one seat to create.
#[derive(Debug, Clone)]
pub struct NewSeat {
    pub seat_number: String,
    pub section: Option<String>,
    pub row_number: Option<String>,
    pub seat_type: SeatType,
    pub price_cents: i64,
}

pub struct SeatRepository;

impl SeatRepository {
    pub async fn create_bulk(
        tx: &mut Transaction<'_, Postgres>,
        event_id: i64,
        seats: &[NewSeat],
    ) -> Result<Vec<Seat>, sqlx::Error> {
        let mut created = Vec::with_capacity(seats.len());
        for seat in seats {
            let row = sqlx::query_as::<_, Seat>(
                r#"
                INSERT INTO seats (event_id, seat_number, section, row_number, seat_type, price_cents, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING *
                "#,
            )
            .bind(event_id)
            .bind(&seat.seat_number)
            .bind(&seat.section)
            .bind(&seat.row_number)
            .bind(seat.seat_type.as_str())
            .bind(seat.price_cents)
            .bind(SeatStatus::Available.as_str())
            .fetch_one(&mut **tx)
            .await?;
            created.push(row);
        }
        Ok(created)
    }

    pub async fn get(pool: &PgPool, seat_id: i64) -> Result<Option<Seat>, sqlx::Error> {
        sqlx::query_as::<_, Seat>("SELECT * FROM seats WHERE seat_id = $1")
            .bind(seat_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_event(
        pool: &PgPool,
        event_id: i64,
        status: Option<SeatStatus>,
    ) -> Result<Vec<Seat>, sqlx::Error> {
        sqlx::query_as::<_, Seat>(
            r#"
            SELECT * FROM seats
            WHERE event_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY section, row_number, seat_number
            "#,
        )
        .bind(event_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(pool)
        .await
    }

    /// Row-level exclusive locks on the target seats, ordered by seat_id so
    /// concurrent transactions wait in a single global order.
    pub async fn lock_for_update(
        tx: &mut Transaction<'_, Postgres>,
        seat_ids: &[i64],
    ) -> Result<Vec<Seat>, sqlx::Error> {
        sqlx::query_as::<_, Seat>(
            "SELECT * FROM seats WHERE seat_id = ANY($1) ORDER BY seat_id FOR UPDATE",
        )
        .bind(seat_ids)
        .fetch_all(&mut **tx)
        .await
    }

    pub async fn lock_one_for_update(
        tx: &mut Transaction<'_, Postgres>,
        seat_id: i64,
    ) -> Result<Option<Seat>, sqlx::Error> {
        sqlx::query_as::<_, Seat>("SELECT * FROM seats WHERE seat_id = $1 FOR UPDATE")
            .bind(seat_id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// AVAILABLE → RESERVED with the optimistic version predicate. Returns
    /// the number of rows changed (0 signals a conflict).
    pub async fn mark_reserved(
        tx: &mut Transaction<'_, Postgres>,
        seat_id: i64,
        user_id: &str,
        reserved_until: DateTime<Utc>,
        expected_version: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE seats
            SET status = $2, reserved_by = $3, reserved_until = $4, version = version + 1
            WHERE seat_id = $1 AND status = $5 AND version = $6
            "#,
        )
        .bind(seat_id)
        .bind(SeatStatus::Reserved.as_str())
        .bind(user_id)
        .bind(reserved_until)
        .bind(SeatStatus::Available.as_str())
        .bind(expected_version)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// RESERVED → BOOKED under a booking, with the version predicate.
    pub async fn mark_booked(
        tx: &mut Transaction<'_, Postgres>,
        seat_id: i64,
        booking_id: i64,
        expected_version: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE seats
            SET status = $2, booking_id = $3, reserved_by = NULL, reserved_until = NULL,
                version = version + 1
            WHERE seat_id = $1 AND status = $4 AND version = $5
            "#,
        )
        .bind(seat_id)
        .bind(SeatStatus::Booked.as_str())
        .bind(booking_id)
        .bind(SeatStatus::Reserved.as_str())
        .bind(expected_version)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Any state → AVAILABLE, clearing hold and booking columns.
    pub async fn release(tx: &mut Transaction<'_, Postgres>, seat_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE seats
            SET status = $2, reserved_by = NULL, reserved_until = NULL, booking_id = NULL,
                version = version + 1
            WHERE seat_id = $1
            "#,
        )
        .bind(seat_id)
        .bind(SeatStatus::Available.as_str())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn extend_hold(
        tx: &mut Transaction<'_, Postgres>,
        seat_id: i64,
        reserved_until: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE seats SET reserved_until = $2 WHERE seat_id = $1")
            .bind(seat_id)
            .bind(reserved_until)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn seats_of_booking(pool: &PgPool, booking_id: i64) -> Result<Vec<Seat>, sqlx::Error> {
        sqlx::query_as::<_, Seat>("SELECT * FROM seats WHERE booking_id = $1 ORDER BY seat_id")
            .bind(booking_id)
            .fetch_all(pool)
            .await
    }
}
