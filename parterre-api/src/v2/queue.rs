use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use parterre_queue::QueueStats;
use serde_json::json;

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v2/queue/stats/:event_id", get(queue_stats))
        .route("/v2/queue/health", get(queue_health))
}

async fn queue_stats(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(event_id): Path<i64>,
) -> Result<Json<QueueStats>, AppError> {
    Ok(Json(state.queue.stats(event_id).await?))
}

async fn queue_health(State(state): State<AppState>, _user: CurrentUser) -> (StatusCode, Json<serde_json::Value>) {
    if state.queue.healthy().await {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "unavailable" })))
    }
}
