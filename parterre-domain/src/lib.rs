pub mod booking;
pub mod event;
pub mod request;
pub mod reservation;
pub mod seat;

pub use booking::{Booking, BookingSeat, BookingStatus, PaymentStatus};
pub use event::{Event, EventStatus};
pub use request::{FailureKind, QueuePriority, QueuedRequest, RequestFailure, RequestResult, RequestState};
pub use reservation::{Reservation, ReservationStatus};
pub use seat::{Seat, SeatStatus, SeatType};

/// Error for mapping a stored status string back to its enum.
#[derive(Debug, thiserror::Error)]
#[error("unknown {column} value: {value}")]
pub struct StatusParseError {
    pub column: &'static str,
    pub value: String,
}
