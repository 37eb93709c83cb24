use std::sync::Arc;

use chrono::{DateTime, Utc};
use parterre_domain::{QueuePriority, QueuedRequest, RequestFailure, RequestResult, RequestState};
use parterre_store::RedisClient;
use serde::{Deserialize, Serialize};

/// The full lifecycle record of one queued request, stored as a single JSON
/// value under `req:{request_id}` with a TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: String,
    pub state: RequestState,
    pub priority: QueuePriority,
    pub event_id: i64,
    pub seat_ids: Vec<i64>,
    pub user_id: String,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<RequestResult>,
    pub error: Option<RequestFailure>,
}

impl RequestRecord {
    pub fn pending(request: &QueuedRequest) -> Self {
        Self {
            request_id: request.request_id.clone(),
            state: RequestState::Pending,
            priority: request.priority,
            event_id: request.event_id,
            seat_ids: request.seat_ids.clone(),
            user_id: request.user_id.clone(),
            enqueued_at: request.enqueued_at,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("request {0} not found")]
    NotFound(String),

    #[error("request {request_id} is {current}, cannot become {requested}")]
    InvalidTransition {
        request_id: String,
        current: RequestState,
        requested: RequestState,
    },

    #[error(transparent)]
    Store(#[from] redis::RedisError),

    #[error(transparent)]
    Codec(#[from] serde_json::Error),
}

/// Keyed store of request lifecycle records. Each transition is one atomic
/// write of the whole record; the monotonic state rule is enforced before
/// writing, so a terminal record never moves again.
#[derive(Clone)]
pub struct StatusStore {
    redis: Arc<RedisClient>,
    ttl_seconds: u64,
}

impl StatusStore {
    pub fn new(redis: Arc<RedisClient>, ttl_seconds: u64) -> Self {
        Self { redis, ttl_seconds }
    }

    fn key(request_id: &str) -> String {
        format!("req:{request_id}")
    }

    /// Write the initial PENDING record.
    pub async fn put(&self, record: &RequestRecord) -> Result<(), StatusError> {
        let payload = serde_json::to_string(record)?;
        self.redis.put_with_ttl(&Self::key(&record.request_id), &payload, self.ttl_seconds).await?;
        Ok(())
    }

    /// Current snapshot; `None` once the TTL has lapsed.
    pub async fn get(&self, request_id: &str) -> Result<Option<RequestRecord>, StatusError> {
        match self.redis.get_string(&Self::key(request_id)).await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Move the record to `next`, applying `mutate` to attach payload
    /// fields, then persist in one write.
    pub async fn transition<F>(
        &self,
        request_id: &str,
        next: RequestState,
        mutate: F,
    ) -> Result<RequestRecord, StatusError>
    where
        F: FnOnce(&mut RequestRecord),
    {
        let mut record = self
            .get(request_id)
            .await?
            .ok_or_else(|| StatusError::NotFound(request_id.to_string()))?;

        if !record.state.can_transition_to(next) {
            return Err(StatusError::InvalidTransition {
                request_id: request_id.to_string(),
                current: record.state,
                requested: next,
            });
        }

        record.state = next;
        let now = Utc::now();
        match next {
            RequestState::Processing => record.started_at = Some(now),
            s if s.is_terminal() => record.finished_at = Some(now),
            _ => {}
        }
        mutate(&mut record);

        let payload = serde_json::to_string(&record)?;
        self.redis.put_with_ttl(&Self::key(request_id), &payload, self.ttl_seconds).await?;
        Ok(record)
    }

    pub async fn mark_processing(&self, request_id: &str) -> Result<RequestRecord, StatusError> {
        self.transition(request_id, RequestState::Processing, |_| {}).await
    }

    pub async fn complete(&self, request_id: &str, result: RequestResult) -> Result<RequestRecord, StatusError> {
        self.transition(request_id, RequestState::Completed, |r| r.result = Some(result)).await
    }

    pub async fn fail(&self, request_id: &str, failure: RequestFailure) -> Result<RequestRecord, StatusError> {
        self.transition(request_id, RequestState::Failed, |r| r.error = Some(failure)).await
    }

    pub async fn cancel(&self, request_id: &str, failure: RequestFailure) -> Result<RequestRecord, StatusError> {
        self.transition(request_id, RequestState::Cancelled, |r| r.error = Some(failure)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> QueuedRequest {
        QueuedRequest {
            request_id: "01J0000000000000000000TEST".to_string(),
            event_id: 1,
            seat_ids: vec![7],
            user_id: "u1".to_string(),
            priority: QueuePriority::Normal,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_roundtrips_through_json() {
        let record = RequestRecord::pending(&request());
        let payload = serde_json::to_string(&record).unwrap();
        let back: RequestRecord = serde_json::from_str(&payload).unwrap();
        assert_eq!(back.state, RequestState::Pending);
        assert_eq!(back.seat_ids, vec![7]);
        assert!(payload.contains(r#""state":"pending""#));
        assert!(payload.contains(r#""priority":"normal""#));
    }

    #[test]
    fn test_pending_record_has_no_timestamps() {
        let record = RequestRecord::pending(&request());
        assert!(record.started_at.is_none());
        assert!(record.finished_at.is_none());
        assert!(record.result.is_none());
        assert!(record.error.is_none());
    }
}
