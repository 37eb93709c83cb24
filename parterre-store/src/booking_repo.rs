use chrono::{DateTime, Utc};
use parterre_domain::{Booking, BookingSeat, BookingStatus, PaymentStatus};
use sqlx::{PgPool, Postgres, Transaction};

pub struct BookingRepository;

impl BookingRepository {
    pub async fn create(
        tx: &mut Transaction<'_, Postgres>,
        event_id: i64,
        user_id: &str,
        total_amount_cents: i64,
        booking_reference: &str,
    ) -> Result<Booking, sqlx::Error> {
        sqlx::query_as::<_, Booking>(
            r#"
            INSERT INTO bookings (event_id, user_id, total_amount_cents, booking_reference, status, payment_status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(event_id)
        .bind(user_id)
        .bind(total_amount_cents)
        .bind(booking_reference)
        .bind(BookingStatus::Pending.as_str())
        .bind(PaymentStatus::Pending.as_str())
        .fetch_one(&mut **tx)
        .await
    }

    pub async fn add_seat_line(
        tx: &mut Transaction<'_, Postgres>,
        booking_id: i64,
        seat_id: i64,
        price_cents: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO booking_seats (booking_id, seat_id, price_cents) VALUES ($1, $2, $3)")
            .bind(booking_id)
            .bind(seat_id)
            .bind(price_cents)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn get(pool: &PgPool, booking_id: i64) -> Result<Option<Booking>, sqlx::Error> {
        sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE booking_id = $1")
            .bind(booking_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn get_for_update(
        tx: &mut Transaction<'_, Postgres>,
        booking_id: i64,
    ) -> Result<Option<Booking>, sqlx::Error> {
        sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE booking_id = $1 FOR UPDATE")
            .bind(booking_id)
            .fetch_optional(&mut **tx)
            .await
    }

    pub async fn get_by_reference(pool: &PgPool, reference: &str) -> Result<Option<Booking>, sqlx::Error> {
        sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE booking_reference = $1")
            .bind(reference)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_user(pool: &PgPool, user_id: &str) -> Result<Vec<Booking>, sqlx::Error> {
        sqlx::query_as::<_, Booking>(
            "SELECT * FROM bookings WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn seat_lines(pool: &PgPool, booking_id: i64) -> Result<Vec<BookingSeat>, sqlx::Error> {
        sqlx::query_as::<_, BookingSeat>(
            "SELECT * FROM booking_seats WHERE booking_id = $1 ORDER BY seat_id",
        )
        .bind(booking_id)
        .fetch_all(pool)
        .await
    }

    pub async fn set_status(
        tx: &mut Transaction<'_, Postgres>,
        booking_id: i64,
        status: BookingStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE bookings SET status = $2 WHERE booking_id = $1")
            .bind(booking_id)
            .bind(status.as_str())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn record_payment(
        tx: &mut Transaction<'_, Postgres>,
        booking_id: i64,
        payment_id: Option<&str>,
        payment_status: PaymentStatus,
        status: BookingStatus,
        confirmed_at: Option<DateTime<Utc>>,
    ) -> Result<Booking, sqlx::Error> {
        sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET payment_id = $2, payment_status = $3, status = $4, confirmed_at = $5
            WHERE booking_id = $1
            RETURNING *
            "#,
        )
        .bind(booking_id)
        .bind(payment_id)
        .bind(payment_status.as_str())
        .bind(status.as_str())
        .bind(confirmed_at)
        .fetch_one(&mut **tx)
        .await
    }
}
