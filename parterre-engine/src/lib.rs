pub mod booking;
mod counters;
pub mod error;
pub mod lock;
pub mod reservation;
pub mod sweeper;

pub use booking::BookingFinalizer;
pub use error::EngineError;
pub use lock::{seat_lock_keys, LockConfig, LockError, LockGuard, LockManager, MultiLockGuard};
pub use reservation::{ReservationEngine, ReservationOutcome};
pub use sweeper::ExpirationSweeper;
