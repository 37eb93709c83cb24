use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parterre_domain::{FailureKind, RequestFailure, RequestResult, RequestState};
use parterre_engine::{EngineError, ReservationEngine, ReservationOutcome};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::hub::{Notification, NotificationKind};
use crate::notify::NotificationPublisher;
use crate::queue::{PriorityQueue, QueueMessage};
use crate::status::{RequestRecord, StatusError, StatusStore};

/// How often a worker scans the pending-entries lists for stale deliveries.
const RECLAIM_EVERY: Duration = Duration::from_secs(30);

/// Exponentially-weighted completion rate, persisted per event so queue
/// stats can estimate wait times.
#[derive(Debug, Default)]
pub struct Throughput {
    ewma_per_second: f64,
    last_completion: Option<Instant>,
}

impl Throughput {
    const ALPHA: f64 = 0.2;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self) -> f64 {
        let now = Instant::now();
        let elapsed = self.last_completion.map(|t| now.duration_since(t).as_secs_f64());
        self.last_completion = Some(now);
        match elapsed {
            Some(seconds) => self.observe_interval(seconds),
            None => self.ewma_per_second,
        }
    }

    fn observe_interval(&mut self, elapsed_seconds: f64) -> f64 {
        let sample = 1.0 / elapsed_seconds.max(1e-3);
        self.ewma_per_second = if self.ewma_per_second == 0.0 {
            sample
        } else {
            Self::ALPHA * sample + (1.0 - Self::ALPHA) * self.ewma_per_second
        };
        self.ewma_per_second
    }

    pub fn per_second(&self) -> f64 {
        self.ewma_per_second
    }
}

/// Long-running consumer for one event's priority streams. Reads in
/// priority-weighted rounds, invokes the reservation engine, publishes
/// status and notifications, and acknowledges or dead-letters.
pub struct QueueWorker {
    queue: PriorityQueue,
    status: StatusStore,
    publisher: NotificationPublisher,
    engine: ReservationEngine,
    event_id: i64,
    consumer_name: String,
    reclaim_idle_ms: u64,
    max_deliveries: u64,
}

impl QueueWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: PriorityQueue,
        status: StatusStore,
        publisher: NotificationPublisher,
        engine: ReservationEngine,
        event_id: i64,
        consumer_name: String,
        reclaim_idle_ms: u64,
        max_deliveries: u64,
    ) -> Self {
        Self {
            queue,
            status,
            publisher,
            engine,
            event_id,
            consumer_name,
            reclaim_idle_ms,
            max_deliveries,
        }
    }

    pub async fn run(self) {
        info!(event_id = self.event_id, consumer = %self.consumer_name, "queue worker started");
        let mut throughput = Throughput::new();
        let mut last_reclaim = Instant::now();

        loop {
            if last_reclaim.elapsed() >= RECLAIM_EVERY {
                self.reclaim_pending(&mut throughput).await;
                last_reclaim = Instant::now();
            }

            match self.queue.read_batch(self.event_id, &self.consumer_name).await {
                Ok(batch) => {
                    for message in batch {
                        self.handle_message(&message, &mut throughput).await;
                    }
                }
                Err(e) => {
                    error!(event_id = self.event_id, error = %e, "queue read failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn handle_message(&self, message: &QueueMessage, throughput: &mut Throughput) {
        let request = &message.request;

        let snapshot = match self.status.get(&request.request_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Store unreachable: leave unacked for redelivery.
                warn!(request_id = %request.request_id, error = %e, "status read failed");
                return;
            }
        };

        match snapshot {
            None => {
                // Status TTL lapsed before the message was picked up;
                // nobody is left to report to.
                self.ack(message).await;
                return;
            }
            Some(record) if record.state == RequestState::Cancelled => {
                self.notify(NotificationKind::ReservationCancelled, &record).await;
                self.ack(message).await;
                return;
            }
            Some(record) if record.state.is_terminal() => {
                self.ack(message).await;
                return;
            }
            Some(record) if record.state == RequestState::Processing => {
                // Redelivered after a crash mid-flight: skip the Processing
                // write and let the recovery probe below settle it.
            }
            Some(_) => match self.status.mark_processing(&request.request_id).await {
                Ok(record) => self.notify(NotificationKind::StatusUpdate, &record).await,
                Err(StatusError::InvalidTransition { current, .. }) => {
                    // Raced with a cancel between the snapshot and here.
                    if current == RequestState::Cancelled {
                        if let Ok(Some(record)) = self.status.get(&request.request_id).await {
                            self.notify(NotificationKind::ReservationCancelled, &record).await;
                        }
                    }
                    self.ack(message).await;
                    return;
                }
                Err(e) => {
                    warn!(request_id = %request.request_id, error = %e, "status write failed");
                    return;
                }
            },
        }

        match self.engine.reserve(request.event_id, &request.seat_ids, &request.user_id).await {
            Ok(outcome) => self.finish_success(message, outcome, throughput).await,
            Err(EngineError::AlreadyHeld { seat_id }) => {
                // A prior delivery may have committed the reservation and
                // died before writing the terminal status. If this user
                // already holds exactly these seats, report that success.
                match self.engine.find_existing_outcome(&request.seat_ids, &request.user_id).await {
                    Ok(Some(outcome)) => self.finish_success(message, outcome, throughput).await,
                    _ => {
                        self.finish_failure(
                            message,
                            FailureKind::AlreadyHeld,
                            format!("seat {seat_id} is already held by this user"),
                        )
                        .await
                    }
                }
            }
            Err(EngineError::OptimisticConflict { seat_id }) => {
                warn!(request_id = %request.request_id, seat_id, "optimistic conflict, leaving for redelivery");
            }
            Err(e) if e.is_transient() => {
                warn!(request_id = %request.request_id, error = %e, "transient failure, leaving for redelivery");
            }
            Err(e) => self.finish_failure(message, classify(&e), e.to_string()).await,
        }
    }

    async fn finish_success(
        &self,
        message: &QueueMessage,
        outcome: ReservationOutcome,
        throughput: &mut Throughput,
    ) {
        let result = RequestResult {
            reservation_ids: outcome.reservations.iter().map(|r| r.reservation_id).collect(),
            total_amount_cents: outcome.total_amount_cents,
            expires_at: outcome.expires_at,
        };

        match self.status.complete(&message.request.request_id, result).await {
            Ok(record) => {
                self.notify(NotificationKind::ReservationComplete, &record).await;
                self.ack(message).await;
                let rate = throughput.observe();
                if let Err(e) = self.queue.record_throughput(self.event_id, rate).await {
                    warn!(event_id = self.event_id, error = %e, "failed to record throughput");
                }
            }
            Err(e) => {
                // Seats are committed but the terminal write is lost. Keep
                // the message pending; the reclaim retry finds the seats
                // held by this user and re-issues the completed status.
                warn!(
                    request_id = %message.request.request_id,
                    error = %e,
                    "completed reservation but status write failed, leaving for redelivery"
                );
            }
        }
    }

    async fn finish_failure(&self, message: &QueueMessage, kind: FailureKind, reason: String) {
        let failure = RequestFailure { kind, message: reason };
        match self.status.fail(&message.request.request_id, failure).await {
            Ok(record) => {
                self.notify(NotificationKind::ReservationFailed, &record).await;
                self.ack(message).await;
            }
            Err(StatusError::InvalidTransition { .. }) | Err(StatusError::NotFound(_)) => {
                // Already terminal or expired out of the store; nothing to add.
                self.ack(message).await;
            }
            Err(e) => {
                warn!(request_id = %message.request.request_id, error = %e, "failed to record failure");
            }
        }
    }

    async fn reclaim_pending(&self, throughput: &mut Throughput) {
        let outcome = match self
            .queue
            .reclaim(self.event_id, &self.consumer_name, self.reclaim_idle_ms, self.max_deliveries)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(event_id = self.event_id, error = %e, "pending-entry scan failed");
                return;
            }
        };

        for dead in outcome.exhausted {
            info!(request_id = %dead.request.request_id, "delivery budget exhausted, dead-lettered");
            let failure = RequestFailure {
                kind: FailureKind::ExceededRetries,
                message: "request exceeded its delivery budget".to_string(),
            };
            match self.status.fail(&dead.request.request_id, failure).await {
                Ok(record) => self.notify(NotificationKind::ReservationFailed, &record).await,
                Err(StatusError::InvalidTransition { .. }) | Err(StatusError::NotFound(_)) => {}
                Err(e) => warn!(request_id = %dead.request.request_id, error = %e, "failed to mark dead request"),
            }
        }

        for message in outcome.reclaimed {
            self.handle_message(&message, throughput).await;
        }
    }

    async fn ack(&self, message: &QueueMessage) {
        if let Err(e) = self.queue.ack(self.event_id, message.priority, &message.stream_id).await {
            warn!(
                request_id = %message.request.request_id,
                error = %e,
                "ack failed, message will be redelivered"
            );
        }
    }

    async fn notify(&self, kind: NotificationKind, record: &RequestRecord) {
        let notification = Notification {
            kind,
            request_id: record.request_id.clone(),
            user_id: record.user_id.clone(),
            data: serde_json::to_value(record).unwrap_or_default(),
        };
        if let Err(e) = self.publisher.publish(&notification).await {
            warn!(request_id = %record.request_id, error = %e, "notification publish failed");
        }
    }
}

fn classify(error: &EngineError) -> FailureKind {
    match error {
        EngineError::SeatUnavailable { .. } => FailureKind::SeatUnavailable,
        EngineError::EventNotOnSale(_) => FailureKind::EventNotOnSale,
        EngineError::AlreadyHeld { .. } => FailureKind::AlreadyHeld,
        EngineError::EventNotFound(_)
        | EngineError::SeatNotFound { .. }
        | EngineError::SeatEventMismatch { .. }
        | EngineError::NoSeats
        | EngineError::TooManySeats { .. } => FailureKind::ValidationFailed,
        _ => FailureKind::Internal,
    }
}

/// Spawns one worker per event on first use, all joined to the same
/// consumer group under this instance's name.
pub struct WorkerManager {
    queue: PriorityQueue,
    status: StatusStore,
    publisher: NotificationPublisher,
    engine: ReservationEngine,
    reclaim_idle_ms: u64,
    max_deliveries: u64,
    instance: String,
    handles: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl WorkerManager {
    pub fn new(
        queue: PriorityQueue,
        status: StatusStore,
        publisher: NotificationPublisher,
        engine: ReservationEngine,
        reclaim_idle_ms: u64,
        max_deliveries: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            status,
            publisher,
            engine,
            reclaim_idle_ms,
            max_deliveries,
            instance: Uuid::new_v4().simple().to_string()[..8].to_string(),
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Make sure a worker is draining this event's streams.
    pub fn ensure_worker(&self, event_id: i64) {
        let mut handles = self.handles.lock().expect("worker map lock poisoned");
        if let Some(handle) = handles.get(&event_id) {
            if !handle.is_finished() {
                return;
            }
        }

        let worker = QueueWorker::new(
            self.queue.clone(),
            self.status.clone(),
            self.publisher.clone(),
            self.engine.clone(),
            event_id,
            format!("worker-{event_id}-{}", self.instance),
            self.reclaim_idle_ms,
            self.max_deliveries,
        );
        handles.insert(event_id, tokio::spawn(worker.run()));
    }

    pub fn shutdown(&self) {
        let mut handles = self.handles.lock().expect("worker map lock poisoned");
        for (event_id, handle) in handles.drain() {
            info!(event_id, "stopping queue worker");
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_ewma_smooths_samples() {
        let mut t = Throughput::new();
        // First observation seeds the average.
        assert!((t.observe_interval(0.5) - 2.0).abs() < 1e-9);
        // A slower completion pulls the rate down by alpha.
        let next = t.observe_interval(2.0);
        assert!((next - (0.2 * 0.5 + 0.8 * 2.0)).abs() < 1e-9);
    }

    #[test]
    fn test_throughput_clamps_degenerate_intervals() {
        let mut t = Throughput::new();
        let rate = t.observe_interval(0.0);
        assert!(rate <= 1000.0 + 1e-9);
    }

    #[test]
    fn test_domain_error_classification() {
        assert_eq!(classify(&EngineError::SeatUnavailable { seat_id: 4 }), FailureKind::SeatUnavailable);
        assert_eq!(classify(&EngineError::EventNotOnSale(1)), FailureKind::EventNotOnSale);
        assert_eq!(classify(&EngineError::TooManySeats { max: 10 }), FailureKind::ValidationFailed);
        assert_eq!(classify(&EngineError::NotOwner), FailureKind::Internal);
    }
}
