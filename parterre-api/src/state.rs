use std::sync::Arc;

use parterre_engine::{BookingFinalizer, ReservationEngine};
use parterre_queue::{NotificationHub, QueueService};
use parterre_store::{DbClient, Settings};

#[derive(Clone)]
pub struct AppState {
    pub db: DbClient,
    pub engine: ReservationEngine,
    pub finalizer: BookingFinalizer,
    pub queue: QueueService,
    pub hub: Arc<NotificationHub>,
    pub settings: Arc<Settings>,
}
