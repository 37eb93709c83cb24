pub mod booking_repo;
pub mod config;
pub mod database;
pub mod event_repo;
pub mod redis;
pub mod reservation_repo;
pub mod seat_repo;

pub use booking_repo::BookingRepository;
pub use config::Settings;
pub use database::DbClient;
pub use event_repo::EventRepository;
pub use redis::{PendingEntry, RedisClient, StreamMessage};
pub use reservation_repo::ReservationRepository;
pub use seat_repo::{NewSeat, SeatRepository};
