use chrono::{DateTime, Utc};
use parterre_domain::{Event, EventStatus};
use sqlx::{PgPool, Postgres, Transaction};

pub struct EventRepository;

impl EventRepository {
    pub async fn create(
        tx: &mut Transaction<'_, Postgres>,
        event_name: &str,
        event_date: DateTime<Utc>,
        venue_name: Option<&str>,
        sale_start_time: Option<DateTime<Utc>>,
    ) -> Result<Event, sqlx::Error> {
        sqlx::query_as::<_, Event>(
            r#"
            INSERT INTO events (event_name, event_date, venue_name, status, sale_start_time)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(event_name)
        .bind(event_date)
        .bind(venue_name)
        .bind(EventStatus::Upcoming.as_str())
        .bind(sale_start_time)
        .fetch_one(&mut **tx)
        .await
    }

    pub async fn get(pool: &PgPool, event_id: i64) -> Result<Option<Event>, sqlx::Error> {
        sqlx::query_as::<_, Event>("SELECT * FROM events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn get_for_update(
        tx: &mut Transaction<'_, Postgres>,
        event_id: i64,
    ) -> Result<Option<Event>, sqlx::Error> {
        sqlx::query_as::<_, Event>("SELECT * FROM events WHERE event_id = $1 FOR UPDATE")
            .bind(event_id)
            .fetch_optional(&mut **tx)
            .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<Event>, sqlx::Error> {
        sqlx::query_as::<_, Event>("SELECT * FROM events ORDER BY event_date")
            .fetch_all(pool)
            .await
    }

    pub async fn update(
        tx: &mut Transaction<'_, Postgres>,
        event_id: i64,
        event_name: Option<&str>,
        event_date: Option<DateTime<Utc>>,
        venue_name: Option<&str>,
        sale_start_time: Option<DateTime<Utc>>,
    ) -> Result<Option<Event>, sqlx::Error> {
        sqlx::query_as::<_, Event>(
            r#"
            UPDATE events
            SET event_name = COALESCE($2, event_name),
                event_date = COALESCE($3, event_date),
                venue_name = COALESCE($4, venue_name),
                sale_start_time = COALESCE($5, sale_start_time)
            WHERE event_id = $1
            RETURNING *
            "#,
        )
        .bind(event_id)
        .bind(event_name)
        .bind(event_date)
        .bind(venue_name)
        .bind(sale_start_time)
        .fetch_optional(&mut **tx)
        .await
    }

    pub async fn set_status(
        tx: &mut Transaction<'_, Postgres>,
        event_id: i64,
        status: EventStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE events SET status = $2 WHERE event_id = $1")
            .bind(event_id)
            .bind(status.as_str())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Adjust the availability counter and total (used when seats are added).
    pub async fn add_capacity(
        tx: &mut Transaction<'_, Postgres>,
        event_id: i64,
        count: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE events SET total_seats = total_seats + $2, available_seats = available_seats + $2 WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(count)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Adjust `available_seats` by `delta`, returning the new count.
    pub async fn adjust_available(
        tx: &mut Transaction<'_, Postgres>,
        event_id: i64,
        delta: i32,
    ) -> Result<i32, sqlx::Error> {
        let (available,): (i32,) = sqlx::query_as(
            "UPDATE events SET available_seats = available_seats + $2 WHERE event_id = $1 RETURNING available_seats",
        )
        .bind(event_id)
        .bind(delta)
        .fetch_one(&mut **tx)
        .await?;
        Ok(available)
    }
}
