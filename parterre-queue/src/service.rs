use std::sync::Arc;

use chrono::Utc;
use parterre_domain::{FailureKind, QueuePriority, QueuedRequest, RequestFailure, RequestState};
use parterre_store::RedisClient;
use tracing::info;
use ulid::Ulid;

use crate::hub::{Notification, NotificationKind};
use crate::notify::NotificationPublisher;
use crate::queue::{PriorityQueue, QueueError, QueueStats};
use crate::status::{RequestRecord, StatusError, StatusStore};
use crate::worker::WorkerManager;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("request {0} not found")]
    NotFound(String),

    #[error("caller does not own this request")]
    NotOwner,

    #[error("request {request_id} is already {state}")]
    CancelConflict { request_id: String, state: RequestState },

    #[error("no seats specified")]
    NoSeats,

    #[error("cannot reserve more than {max} seats")]
    TooManySeats { max: usize },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Status(#[from] StatusError),
}

/// Path B front door: admits reservation intents into the priority queue,
/// serves status snapshots, and handles best-effort cancellation.
#[derive(Clone)]
pub struct QueueService {
    queue: PriorityQueue,
    status: StatusStore,
    publisher: NotificationPublisher,
    workers: Arc<WorkerManager>,
    redis: Arc<RedisClient>,
    max_seats: usize,
}

impl QueueService {
    pub fn new(
        queue: PriorityQueue,
        status: StatusStore,
        publisher: NotificationPublisher,
        workers: Arc<WorkerManager>,
        redis: Arc<RedisClient>,
        max_seats: usize,
    ) -> Self {
        Self { queue, status, publisher, workers, redis, max_seats }
    }

    /// Admit a request: status record first (so a fast poll never misses),
    /// then the stream append. Returns without waiting for a worker.
    pub async fn submit(
        &self,
        event_id: i64,
        seat_ids: Vec<i64>,
        user_id: String,
        priority: QueuePriority,
    ) -> Result<RequestRecord, ServiceError> {
        if seat_ids.is_empty() {
            return Err(ServiceError::NoSeats);
        }
        let mut ids = seat_ids;
        ids.sort_unstable();
        ids.dedup();
        if ids.len() > self.max_seats {
            return Err(ServiceError::TooManySeats { max: self.max_seats });
        }

        let request = QueuedRequest {
            request_id: Ulid::new().to_string(),
            event_id,
            seat_ids: ids,
            user_id,
            priority,
            enqueued_at: Utc::now(),
        };

        let record = RequestRecord::pending(&request);
        self.status.put(&record).await?;
        self.queue.enqueue(&request).await?;
        self.workers.ensure_worker(event_id);

        info!(request_id = %request.request_id, event_id, priority = %priority, "reservation request queued");
        Ok(record)
    }

    pub async fn snapshot(&self, request_id: &str) -> Result<Option<RequestRecord>, ServiceError> {
        Ok(self.status.get(request_id).await?)
    }

    /// Best-effort cancel: only effective while the request is still
    /// PENDING. The worker observes the cancelled record before touching
    /// any seats.
    pub async fn cancel(&self, request_id: &str, user_id: &str) -> Result<RequestRecord, ServiceError> {
        let record = self
            .status
            .get(request_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(request_id.to_string()))?;
        if record.user_id != user_id {
            return Err(ServiceError::NotOwner);
        }
        if record.state != RequestState::Pending {
            return Err(ServiceError::CancelConflict { request_id: request_id.to_string(), state: record.state });
        }

        let failure = RequestFailure {
            kind: FailureKind::CancelledByUser,
            message: "cancelled before processing".to_string(),
        };
        let updated = self.status.cancel(request_id, failure).await.map_err(|e| match e {
            StatusError::InvalidTransition { current, .. } => {
                ServiceError::CancelConflict { request_id: request_id.to_string(), state: current }
            }
            other => other.into(),
        })?;

        let notification = Notification {
            kind: NotificationKind::ReservationCancelled,
            request_id: updated.request_id.clone(),
            user_id: updated.user_id.clone(),
            data: serde_json::to_value(&updated).unwrap_or_default(),
        };
        if let Err(e) = self.publisher.publish(&notification).await {
            tracing::warn!(request_id, error = %e, "cancel notification publish failed");
        }

        Ok(updated)
    }

    pub async fn stats(&self, event_id: i64) -> Result<QueueStats, ServiceError> {
        Ok(self.queue.stats(event_id).await?)
    }

    pub async fn healthy(&self) -> bool {
        self.redis.ping().await.is_ok()
    }

    pub fn shutdown_workers(&self) {
        self.workers.shutdown();
    }
}
