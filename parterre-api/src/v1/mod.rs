pub mod bookings;
pub mod events;
pub mod reservations;
pub mod seats;

use axum::Router;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(events::routes())
        .merge(seats::routes())
        .merge(reservations::routes())
        .merge(bookings::routes())
}
