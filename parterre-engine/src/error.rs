use crate::lock::LockError;

/// Domain errors produced by the reservation engine and booking finalizer.
/// Infrastructure errors bubble up unchanged from the storage drivers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("event {0} not found")]
    EventNotFound(i64),

    #[error("event {0} is not on sale")]
    EventNotOnSale(i64),

    #[error("seat {seat_id} not found")]
    SeatNotFound { seat_id: i64 },

    #[error("seat {seat_id} does not belong to event {event_id}")]
    SeatEventMismatch { seat_id: i64, event_id: i64 },

    #[error("seat {seat_id} is not available")]
    SeatUnavailable { seat_id: i64 },

    #[error("seat {seat_id} is already held by this user")]
    AlreadyHeld { seat_id: i64 },

    #[error("seat {seat_id} is not held by this user")]
    SeatNotHeld { seat_id: i64 },

    #[error("reservation {0} not found")]
    ReservationNotFound(i64),

    #[error("reservation {0} is not active")]
    ReservationNotActive(i64),

    #[error("reservation {0} has already expired")]
    AlreadyExpired(i64),

    #[error("booking {0} not found")]
    BookingNotFound(i64),

    #[error("booking {0} is not pending")]
    BookingNotPending(i64),

    #[error("booking {0} cannot be cancelled")]
    BookingNotCancellable(i64),

    #[error("reservations span more than one event")]
    MixedEvents,

    #[error("no seats specified")]
    NoSeats,

    #[error("cannot reserve more than {max} seats")]
    TooManySeats { max: usize },

    #[error("concurrent update detected on seat {seat_id}")]
    OptimisticConflict { seat_id: i64 },

    #[error("caller does not own this resource")]
    NotOwner,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    /// Transient failures are retryable: the queue worker leaves the message
    /// unacknowledged, Path A surfaces 503/409 to the client.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Lock(_) | EngineError::Database(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::Lock(LockError::Timeout { key: "lock:seat:1".to_string() }).is_transient());
        assert!(!EngineError::SeatUnavailable { seat_id: 1 }.is_transient());
        assert!(!EngineError::EventNotOnSale(1).is_transient());
        assert!(!EngineError::AlreadyHeld { seat_id: 1 }.is_transient());
    }
}
