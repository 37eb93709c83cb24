use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use parterre_domain::{Event, EventStatus};
use parterre_store::EventRepository;
use serde::Deserialize;

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct CreateEventRequest {
    event_name: String,
    event_date: DateTime<Utc>,
    venue_name: Option<String>,
    sale_start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct UpdateEventRequest {
    event_name: Option<String>,
    event_date: Option<DateTime<Utc>>,
    venue_name: Option<String>,
    sale_start_time: Option<DateTime<Utc>>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(create_event).get(list_events))
        .route("/events/:event_id", get(get_event).patch(update_event))
        .route("/events/:event_id/start-sale", post(start_sale))
}

async fn create_event(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(req): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<Event>), AppError> {
    if req.event_name.trim().is_empty() {
        return Err(AppError::Validation("event_name must not be empty".to_string()));
    }

    let mut tx = state.db.pool.begin().await.map_err(engine_db)?;
    let event = EventRepository::create(
        &mut tx,
        &req.event_name,
        req.event_date,
        req.venue_name.as_deref(),
        req.sale_start_time,
    )
    .await
    .map_err(engine_db)?;
    tx.commit().await.map_err(engine_db)?;

    Ok((StatusCode::CREATED, Json(event)))
}

async fn list_events(State(state): State<AppState>, _user: CurrentUser) -> Result<Json<Vec<Event>>, AppError> {
    let events = EventRepository::list(&state.db.pool).await.map_err(engine_db)?;
    Ok(Json(events))
}

async fn get_event(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(event_id): Path<i64>,
) -> Result<Json<Event>, AppError> {
    let event = EventRepository::get(&state.db.pool, event_id)
        .await
        .map_err(engine_db)?
        .ok_or_else(|| AppError::NotFound(format!("event {event_id} not found")))?;
    Ok(Json(event))
}

async fn update_event(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(event_id): Path<i64>,
    Json(req): Json<UpdateEventRequest>,
) -> Result<Json<Event>, AppError> {
    let mut tx = state.db.pool.begin().await.map_err(engine_db)?;
    let event = EventRepository::update(
        &mut tx,
        event_id,
        req.event_name.as_deref(),
        req.event_date,
        req.venue_name.as_deref(),
        req.sale_start_time,
    )
    .await
    .map_err(engine_db)?
    .ok_or_else(|| AppError::NotFound(format!("event {event_id} not found")))?;
    tx.commit().await.map_err(engine_db)?;

    Ok(Json(event))
}

/// Open the event for reservations. Requires a sale_start_time that has
/// already passed.
async fn start_sale(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(event_id): Path<i64>,
) -> Result<Json<Event>, AppError> {
    let mut tx = state.db.pool.begin().await.map_err(engine_db)?;
    let event = EventRepository::get_for_update(&mut tx, event_id)
        .await
        .map_err(engine_db)?
        .ok_or_else(|| AppError::NotFound(format!("event {event_id} not found")))?;

    match event.status {
        EventStatus::OnSale => return Ok(Json(event)),
        EventStatus::Upcoming => {}
        other => {
            return Err(AppError::Conflict(format!("event {event_id} is {other}, sale cannot start")));
        }
    }
    match event.sale_start_time {
        Some(start) if start <= Utc::now() => {}
        Some(start) => {
            return Err(AppError::Conflict(format!("sale for event {event_id} starts at {start}")));
        }
        None => {
            return Err(AppError::Conflict(format!("event {event_id} has no sale_start_time")));
        }
    }

    EventRepository::set_status(&mut tx, event_id, EventStatus::OnSale).await.map_err(engine_db)?;
    tx.commit().await.map_err(engine_db)?;

    let updated = EventRepository::get(&state.db.pool, event_id)
        .await
        .map_err(engine_db)?
        .ok_or_else(|| AppError::NotFound(format!("event {event_id} not found")))?;
    Ok(Json(updated))
}

pub(crate) fn engine_db(error: sqlx::Error) -> AppError {
    parterre_engine::EngineError::Database(error).into()
}
