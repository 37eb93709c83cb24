use chrono::{DateTime, Utc};
use parterre_domain::{Reservation, ReservationStatus};
use sqlx::{PgPool, Postgres, Transaction};

pub struct ReservationRepository;

impl ReservationRepository {
    pub async fn create(
        tx: &mut Transaction<'_, Postgres>,
        seat_id: i64,
        event_id: i64,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Reservation, sqlx::Error> {
        sqlx::query_as::<_, Reservation>(
            r#"
            INSERT INTO reservations (seat_id, event_id, user_id, expires_at, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(seat_id)
        .bind(event_id)
        .bind(user_id)
        .bind(expires_at)
        .bind(ReservationStatus::Active.as_str())
        .fetch_one(&mut **tx)
        .await
    }

    pub async fn get(pool: &PgPool, reservation_id: i64) -> Result<Option<Reservation>, sqlx::Error> {
        sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE reservation_id = $1")
            .bind(reservation_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn get_for_update(
        tx: &mut Transaction<'_, Postgres>,
        reservation_id: i64,
    ) -> Result<Option<Reservation>, sqlx::Error> {
        sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE reservation_id = $1 FOR UPDATE",
        )
        .bind(reservation_id)
        .fetch_optional(&mut **tx)
        .await
    }

    /// Lock several reservations, ordered by id for a stable wait order.
    pub async fn get_many_for_update(
        tx: &mut Transaction<'_, Postgres>,
        reservation_ids: &[i64],
    ) -> Result<Vec<Reservation>, sqlx::Error> {
        sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE reservation_id = ANY($1) ORDER BY reservation_id FOR UPDATE",
        )
        .bind(reservation_ids)
        .fetch_all(&mut **tx)
        .await
    }

    pub async fn active_by_user(pool: &PgPool, user_id: &str) -> Result<Vec<Reservation>, sqlx::Error> {
        sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE user_id = $1 AND status = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(ReservationStatus::Active.as_str())
        .fetch_all(pool)
        .await
    }

    pub async fn set_status(
        tx: &mut Transaction<'_, Postgres>,
        reservation_id: i64,
        status: ReservationStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE reservations SET status = $2 WHERE reservation_id = $1")
            .bind(reservation_id)
            .bind(status.as_str())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn set_expiry(
        tx: &mut Transaction<'_, Postgres>,
        reservation_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE reservations SET expires_at = $2 WHERE reservation_id = $1")
            .bind(reservation_id)
            .bind(expires_at)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Oldest lapsed ACTIVE reservations, bounded so one sweep cycle stays
    /// short.
    pub async fn expired_batch(
        pool: &PgPool,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Reservation>, sqlx::Error> {
        sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE status = $1 AND expires_at <= $2
            ORDER BY expires_at
            LIMIT $3
            "#,
        )
        .bind(ReservationStatus::Active.as_str())
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Active reservations a user holds on the given seats. Used by the
    /// worker's idempotent retry path.
    pub async fn active_for_seats(
        pool: &PgPool,
        seat_ids: &[i64],
        user_id: &str,
    ) -> Result<Vec<Reservation>, sqlx::Error> {
        sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE seat_id = ANY($1) AND user_id = $2 AND status = $3
            ORDER BY seat_id
            "#,
        )
        .bind(seat_ids)
        .bind(user_id)
        .bind(ReservationStatus::Active.as_str())
        .fetch_all(pool)
        .await
    }
}
