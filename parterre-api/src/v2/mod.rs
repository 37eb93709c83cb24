pub mod queue;
pub mod reservations;
pub mod ws;

use axum::Router;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(reservations::routes())
        .merge(queue::routes())
        .merge(ws::routes())
}
