use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use parterre_domain::Reservation;
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct CreateReservationRequest {
    event_id: i64,
    seat_ids: Vec<i64>,
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReservationResponse {
    reservation_ids: Vec<i64>,
    total_amount_cents: i64,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ExtendResponse {
    expires_at: DateTime<Utc>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reservations", post(create_reservation).get(list_reservations))
        .route("/reservations/:reservation_id", get(get_reservation).delete(cancel_reservation))
        .route("/reservations/:reservation_id/extend", post(extend_reservation))
}

/// Path A: reserve synchronously under the distributed seat locks.
async fn create_reservation(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), AppError> {
    if let Some(body_user) = &req.user_id {
        if body_user != &user_id {
            return Err(AppError::Forbidden("cannot reserve for another user".to_string()));
        }
    }

    let outcome = state.engine.reserve(req.event_id, &req.seat_ids, &user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ReservationResponse {
            reservation_ids: outcome.reservations.iter().map(|r| r.reservation_id).collect(),
            total_amount_cents: outcome.total_amount_cents,
            expires_at: outcome.expires_at,
        }),
    ))
}

/// The caller's active reservations.
async fn list_reservations(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<Reservation>>, AppError> {
    Ok(Json(state.engine.active_reservations(&user_id).await?))
}

async fn get_reservation(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(reservation_id): Path<i64>,
) -> Result<Json<Reservation>, AppError> {
    let reservation = state
        .engine
        .get_reservation(reservation_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("reservation {reservation_id} not found")))?;
    if reservation.user_id != user_id {
        return Err(AppError::Forbidden("reservation belongs to another user".to_string()));
    }
    Ok(Json(reservation))
}

async fn extend_reservation(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(reservation_id): Path<i64>,
) -> Result<Json<ExtendResponse>, AppError> {
    let expires_at = state.engine.extend(reservation_id, &user_id).await?;
    Ok(Json(ExtendResponse { expires_at }))
}

async fn cancel_reservation(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(reservation_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.engine.cancel(reservation_id, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
