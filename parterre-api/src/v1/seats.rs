use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use parterre_domain::{Seat, SeatStatus, SeatType};
use parterre_store::{EventRepository, NewSeat, SeatRepository};
use serde::Deserialize;

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::state::AppState;
use crate::v1::events::engine_db;

#[derive(Debug, Deserialize)]
struct SeatSpec {
    seat_number: String,
    section: Option<String>,
    row_number: Option<String>,
    #[serde(default = "default_seat_type")]
    seat_type: SeatType,
    price_cents: i64,
}

fn default_seat_type() -> SeatType {
    SeatType::Regular
}

#[derive(Debug, Deserialize)]
struct SeatFilter {
    status: Option<SeatStatus>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events/:event_id/seats", post(add_seats).get(list_seats))
        .route("/events/:event_id/seats/available", get(available_seats))
}

/// Bulk-create seats for an event; the event's capacity counters move in
/// the same transaction.
async fn add_seats(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(event_id): Path<i64>,
    Json(specs): Json<Vec<SeatSpec>>,
) -> Result<(StatusCode, Json<Vec<Seat>>), AppError> {
    if specs.is_empty() {
        return Err(AppError::Validation("no seats provided".to_string()));
    }
    if specs.iter().any(|s| s.price_cents < 0) {
        return Err(AppError::Validation("price_cents must not be negative".to_string()));
    }

    let mut tx = state.db.pool.begin().await.map_err(engine_db)?;
    EventRepository::get_for_update(&mut tx, event_id)
        .await
        .map_err(engine_db)?
        .ok_or_else(|| AppError::NotFound(format!("event {event_id} not found")))?;

    let new_seats: Vec<NewSeat> = specs
        .into_iter()
        .map(|s| NewSeat {
            seat_number: s.seat_number,
            section: s.section,
            row_number: s.row_number,
            seat_type: s.seat_type,
            price_cents: s.price_cents,
        })
        .collect();

    let created = SeatRepository::create_bulk(&mut tx, event_id, &new_seats).await.map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("duplicate seat_number for this event".to_string())
        } else {
            engine_db(e)
        }
    })?;
    EventRepository::add_capacity(&mut tx, event_id, created.len() as i32).await.map_err(engine_db)?;
    tx.commit().await.map_err(engine_db)?;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_seats(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(event_id): Path<i64>,
    Query(filter): Query<SeatFilter>,
) -> Result<Json<Vec<Seat>>, AppError> {
    ensure_event_exists(&state, event_id).await?;
    let seats = SeatRepository::list_by_event(&state.db.pool, event_id, filter.status)
        .await
        .map_err(engine_db)?;
    Ok(Json(seats))
}

async fn available_seats(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(event_id): Path<i64>,
) -> Result<Json<Vec<Seat>>, AppError> {
    ensure_event_exists(&state, event_id).await?;
    let seats = SeatRepository::list_by_event(&state.db.pool, event_id, Some(SeatStatus::Available))
        .await
        .map_err(engine_db)?;
    Ok(Json(seats))
}

async fn ensure_event_exists(state: &AppState, event_id: i64) -> Result<(), AppError> {
    EventRepository::get(&state.db.pool, event_id)
        .await
        .map_err(engine_db)?
        .ok_or_else(|| AppError::NotFound(format!("event {event_id} not found")))?;
    Ok(())
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}
