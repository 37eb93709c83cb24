use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parterre_engine::{EngineError, LockError};
use parterre_queue::{QueueError, ServiceError, StatusError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => {
                tracing::error!("internal server error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(error: EngineError) -> Self {
        match &error {
            EngineError::EventNotFound(_)
            | EngineError::SeatNotFound { .. }
            | EngineError::ReservationNotFound(_)
            | EngineError::BookingNotFound(_) => AppError::NotFound(error.to_string()),

            EngineError::NotOwner => AppError::Forbidden(error.to_string()),

            EngineError::NoSeats
            | EngineError::TooManySeats { .. }
            | EngineError::MixedEvents
            | EngineError::SeatEventMismatch { .. } => AppError::Validation(error.to_string()),

            EngineError::EventNotOnSale(_)
            | EngineError::SeatUnavailable { .. }
            | EngineError::AlreadyHeld { .. }
            | EngineError::SeatNotHeld { .. }
            | EngineError::ReservationNotActive(_)
            | EngineError::AlreadyExpired(_)
            | EngineError::BookingNotPending(_)
            | EngineError::BookingNotCancellable(_) => AppError::Conflict(error.to_string()),

            // Exhausting the lock budget is contention, not an outage.
            EngineError::Lock(LockError::Timeout { .. }) => AppError::Conflict(error.to_string()),
            EngineError::Lock(LockError::Store(_)) => AppError::Unavailable(error.to_string()),

            // A version-predicate miss means the lock discipline was
            // bypassed; the transaction rolled back.
            EngineError::OptimisticConflict { .. } => AppError::Internal(error.to_string()),

            EngineError::Database(db) => match db {
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                    AppError::Unavailable("database temporarily unavailable".to_string())
                }
                _ => AppError::Internal(error.to_string()),
            },
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(error: ServiceError) -> Self {
        match &error {
            ServiceError::NotFound(_) => AppError::NotFound(error.to_string()),
            ServiceError::NotOwner => AppError::Forbidden(error.to_string()),
            ServiceError::CancelConflict { .. } => AppError::Conflict(error.to_string()),
            ServiceError::NoSeats | ServiceError::TooManySeats { .. } => AppError::Validation(error.to_string()),
            ServiceError::Queue(queue) => queue_error(queue),
            ServiceError::Status(status) => status_error(status),
        }
    }
}

fn queue_error(error: &QueueError) -> AppError {
    match error {
        QueueError::Store(_) => AppError::Unavailable("queue store temporarily unavailable".to_string()),
        QueueError::Malformed { .. } => AppError::Internal(error.to_string()),
    }
}

fn status_error(error: &StatusError) -> AppError {
    match error {
        StatusError::NotFound(_) => AppError::NotFound(error.to_string()),
        StatusError::InvalidTransition { .. } => AppError::Conflict(error.to_string()),
        StatusError::Store(_) => AppError::Unavailable("status store temporarily unavailable".to_string()),
        StatusError::Codec(_) => AppError::Internal(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: AppError) -> StatusCode {
        error.into_response().status()
    }

    #[test]
    fn test_domain_errors_map_to_conflict() {
        assert_eq!(status_of(EngineError::SeatUnavailable { seat_id: 7 }.into()), StatusCode::CONFLICT);
        assert_eq!(status_of(EngineError::EventNotOnSale(1).into()), StatusCode::CONFLICT);
        assert_eq!(
            status_of(EngineError::Lock(LockError::Timeout { key: "lock:seat:7".into() }).into()),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_lookup_and_ownership_mapping() {
        assert_eq!(status_of(EngineError::ReservationNotFound(9).into()), StatusCode::NOT_FOUND);
        assert_eq!(status_of(EngineError::NotOwner.into()), StatusCode::FORBIDDEN);
        assert_eq!(status_of(EngineError::TooManySeats { max: 10 }.into()), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_fatal_and_transient_mapping() {
        assert_eq!(
            status_of(EngineError::OptimisticConflict { seat_id: 1 }.into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_of(sqlx_pool_error().into()), StatusCode::SERVICE_UNAVAILABLE);
    }

    fn sqlx_pool_error() -> EngineError {
        EngineError::Database(sqlx::Error::PoolTimedOut)
    }

    #[test]
    fn test_cancel_conflict_maps_to_409() {
        let error = ServiceError::CancelConflict {
            request_id: "r".to_string(),
            state: parterre_domain::RequestState::Processing,
        };
        assert_eq!(status_of(error.into()), StatusCode::CONFLICT);
    }
}
