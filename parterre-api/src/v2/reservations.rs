use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use parterre_domain::{QueuePriority, RequestState};
use parterre_queue::RequestRecord;
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct QueuedReservationRequest {
    event_id: i64,
    seat_ids: Vec<i64>,
    user_id: Option<String>,
    #[serde(default = "default_priority")]
    priority: QueuePriority,
}

fn default_priority() -> QueuePriority {
    QueuePriority::Normal
}

#[derive(Debug, Serialize)]
struct QueuedReservationResponse {
    request_id: String,
    status: RequestState,
    total_pending: u64,
    estimated_wait_seconds: u64,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v2/reservations", post(queue_reservation))
        .route("/v2/reservations/:request_id", get(request_status).delete(cancel_request))
}

/// Path B: admit the intent into the priority queue and return immediately.
async fn queue_reservation(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<QueuedReservationRequest>,
) -> Result<(StatusCode, Json<QueuedReservationResponse>), AppError> {
    if let Some(body_user) = &req.user_id {
        if body_user != &user_id {
            return Err(AppError::Forbidden("cannot queue a reservation for another user".to_string()));
        }
    }

    let record = state.queue.submit(req.event_id, req.seat_ids, user_id, req.priority).await?;
    let stats = state.queue.stats(req.event_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(QueuedReservationResponse {
            request_id: record.request_id,
            status: record.state,
            total_pending: stats.total_pending,
            estimated_wait_seconds: stats.estimated_wait_seconds,
        }),
    ))
}

/// Snapshot from the request-status store. A lapsed TTL reads as 404.
async fn request_status(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(request_id): Path<String>,
) -> Result<Json<RequestRecord>, AppError> {
    let record = state
        .queue
        .snapshot(&request_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("request {request_id} not found or expired")))?;
    Ok(Json(record))
}

/// Best-effort cancel; conflicts once a worker has picked the request up.
async fn cancel_request(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(request_id): Path<String>,
) -> Result<Json<RequestRecord>, AppError> {
    let record = state.queue.cancel(&request_id, &user_id).await?;
    Ok(Json(record))
}
