use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parterre_domain::{QueuePriority, QueuedRequest};
use parterre_store::{RedisClient, StreamMessage};
use serde::Serialize;
use tracing::warn;

pub const CONSUMER_GROUP: &str = "reservation_workers";

/// Messages attempted per priority within one scheduling round. High drains
/// fastest but the blocking fallback read covers all three streams, so no
/// priority starves.
pub const ROUND_WEIGHTS: [(QueuePriority, usize); 3] = [
    (QueuePriority::High, 10),
    (QueuePriority::Normal, 3),
    (QueuePriority::Low, 1),
];

const BLOCK_MS: u64 = 5000;
const RECLAIM_SCAN_LIMIT: usize = 100;

pub fn stream_key(event_id: i64, priority: QueuePriority) -> String {
    format!("queue:{event_id}:{priority}")
}

pub fn dead_letter_key(event_id: i64) -> String {
    format!("queue:{event_id}:dead")
}

pub fn acked_counter_key(event_id: i64, priority: QueuePriority) -> String {
    format!("queue:{event_id}:{priority}:acked")
}

pub fn throughput_key(event_id: i64) -> String {
    format!("queue:{event_id}:throughput")
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("malformed queue message {id}: {reason}")]
    Malformed { id: String, reason: String },

    #[error(transparent)]
    Store(#[from] redis::RedisError),
}

/// One delivered reservation intent plus the coordinates needed to ack it.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub stream_id: String,
    pub priority: QueuePriority,
    pub request: QueuedRequest,
}

/// Queue statistics for one event.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub event_id: i64,
    pub pending_by_priority: BTreeMap<String, u64>,
    pub total_pending: u64,
    pub estimated_wait_seconds: u64,
}

/// Per-event triple-stream priority queue with consumer-group delivery.
#[derive(Clone)]
pub struct PriorityQueue {
    redis: Arc<RedisClient>,
}

impl PriorityQueue {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    /// Append a request to the stream of its priority. Non-blocking; the
    /// caller gets the store-assigned entry id.
    pub async fn enqueue(&self, request: &QueuedRequest) -> Result<String, QueueError> {
        let stream = stream_key(request.event_id, request.priority);
        self.redis.ensure_group(&stream, CONSUMER_GROUP).await?;
        let fields = encode_request(request);
        Ok(self.redis.stream_append(&stream, &fields).await?)
    }

    /// One scheduling round: weighted non-blocking reads high → normal →
    /// low; if the whole round comes back empty, a single blocking read
    /// across all three streams.
    pub async fn read_batch(&self, event_id: i64, consumer: &str) -> Result<Vec<QueueMessage>, QueueError> {
        let mut batch = Vec::new();

        for (priority, weight) in ROUND_WEIGHTS {
            let stream = stream_key(event_id, priority);
            self.redis.ensure_group(&stream, CONSUMER_GROUP).await?;
            let messages = self
                .redis
                .group_read(&[stream], CONSUMER_GROUP, consumer, weight, None)
                .await?;
            batch.extend(self.decode_all(messages, priority));
        }
        if !batch.is_empty() {
            return Ok(batch);
        }

        // Nothing ready: suspend on all three streams at once. Stream order
        // in the read imposes the priority order within the reply.
        let streams: Vec<String> = QueuePriority::ALL.iter().map(|p| stream_key(event_id, *p)).collect();
        let messages = self
            .redis
            .group_read(&streams, CONSUMER_GROUP, consumer, 1, Some(BLOCK_MS))
            .await?;
        for message in messages {
            if let Some(priority) = priority_of_stream(&message.stream) {
                batch.extend(self.decode_all(vec![message], priority));
            }
        }
        Ok(batch)
    }

    fn decode_all(&self, messages: Vec<StreamMessage>, priority: QueuePriority) -> Vec<QueueMessage> {
        messages
            .into_iter()
            .filter_map(|m| match decode_request(&m.fields) {
                Ok(request) => Some(QueueMessage { stream_id: m.id, priority, request }),
                Err(e) => {
                    // Undecodable entries stay in the PEL; the reclaim scan
                    // dead-letters them once their delivery budget runs out.
                    warn!(stream = %m.stream, id = %m.id, error = %e, "skipping malformed queue message");
                    None
                }
            })
            .collect()
    }

    /// Acknowledge one processed message.
    pub async fn ack(&self, event_id: i64, priority: QueuePriority, stream_id: &str) -> Result<(), QueueError> {
        let stream = stream_key(event_id, priority);
        self.redis.stream_ack(&stream, CONSUMER_GROUP, stream_id).await?;
        self.redis.incr(&acked_counter_key(event_id, priority)).await?;
        Ok(())
    }

    /// Scan the pending-entries lists and reassign stale deliveries to
    /// `consumer`. Entries at or over the delivery budget are moved to the
    /// dead-letter stream here (raw, so even undecodable ones leave the
    /// queue) and returned for status bookkeeping where decodable.
    pub async fn reclaim(
        &self,
        event_id: i64,
        consumer: &str,
        min_idle_ms: u64,
        max_deliveries: u64,
    ) -> Result<ReclaimOutcome, QueueError> {
        let mut outcome = ReclaimOutcome::default();

        for priority in QueuePriority::ALL {
            let stream = stream_key(event_id, priority);
            let pending = self.redis.pending_detail(&stream, CONSUMER_GROUP, RECLAIM_SCAN_LIMIT).await?;

            let mut retryable = Vec::new();
            let mut exhausted = Vec::new();
            for entry in pending {
                if entry.idle_ms < min_idle_ms {
                    continue;
                }
                if entry.deliveries >= max_deliveries {
                    exhausted.push(entry.id);
                } else {
                    retryable.push(entry.id);
                }
            }

            if !retryable.is_empty() {
                let claimed = self
                    .redis
                    .stream_claim(&stream, CONSUMER_GROUP, consumer, min_idle_ms, &retryable)
                    .await?;
                outcome.reclaimed.extend(self.decode_all(claimed, priority));
            }
            if !exhausted.is_empty() {
                let claimed = self
                    .redis
                    .stream_claim(&stream, CONSUMER_GROUP, consumer, min_idle_ms, &exhausted)
                    .await?;
                for message in claimed {
                    self.dead_letter_raw(event_id, priority, &message, "exceeded delivery budget").await?;
                    if let Ok(request) = decode_request(&message.fields) {
                        outcome.exhausted.push(QueueMessage { stream_id: message.id, priority, request });
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// Copy a claimed entry verbatim onto the dead-letter stream and drop
    /// it from the live queue.
    async fn dead_letter_raw(
        &self,
        event_id: i64,
        priority: QueuePriority,
        message: &StreamMessage,
        error: &str,
    ) -> Result<(), QueueError> {
        let dead = dead_letter_key(event_id);
        let mut fields: Vec<(&str, String)> =
            message.fields.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        fields.push(("error", error.to_string()));
        fields.push(("failed_at", Utc::now().to_rfc3339()));
        self.redis.stream_append(&dead, &fields).await?;
        self.ack(event_id, priority, &message.id).await
    }

    /// Pending work per priority plus an estimated wait derived from the
    /// workers' observed throughput.
    pub async fn stats(&self, event_id: i64) -> Result<QueueStats, QueueError> {
        let mut pending_by_priority = BTreeMap::new();
        let mut total_pending = 0u64;

        for priority in QueuePriority::ALL {
            let stream = stream_key(event_id, priority);
            let length = self.redis.stream_len(&stream).await?;
            let acked = self
                .redis
                .get_string(&acked_counter_key(event_id, priority))
                .await?
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            let pending = length.saturating_sub(acked);
            pending_by_priority.insert(priority.as_str().to_string(), pending);
            total_pending += pending;
        }

        let throughput = self
            .redis
            .get_string(&throughput_key(event_id))
            .await?
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);

        Ok(QueueStats {
            event_id,
            pending_by_priority,
            total_pending,
            estimated_wait_seconds: estimate_wait_seconds(total_pending, throughput),
        })
    }

    /// Record the workers' smoothed completion rate for this event.
    pub async fn record_throughput(&self, event_id: i64, per_second: f64) -> Result<(), QueueError> {
        // Gauge, not config: expire with inactivity so stale rates die off.
        self.redis
            .put_with_ttl(&throughput_key(event_id), &format!("{per_second:.4}"), 3600)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ReclaimOutcome {
    /// Claimed entries still inside the delivery budget, to process now.
    pub reclaimed: Vec<QueueMessage>,
    /// Entries already moved to the dead-letter stream; their requests
    /// still need terminal status records.
    pub exhausted: Vec<QueueMessage>,
}

/// Wait estimate: pending work ahead of a notional new request divided by
/// the observed drain rate. A floor on the rate keeps the estimate finite
/// on an idle queue.
pub fn estimate_wait_seconds(total_pending: u64, throughput_per_second: f64) -> u64 {
    let rate = throughput_per_second.max(0.1);
    (total_pending as f64 / rate).ceil() as u64
}

pub fn encode_request(request: &QueuedRequest) -> Vec<(&'static str, String)> {
    let seat_ids = serde_json::to_string(&request.seat_ids).unwrap_or_else(|_| "[]".to_string());
    vec![
        ("request_id", request.request_id.clone()),
        ("event_id", request.event_id.to_string()),
        ("user_id", request.user_id.clone()),
        ("seat_ids", seat_ids),
        ("priority", request.priority.as_str().to_string()),
        ("enqueued_at", request.enqueued_at.to_rfc3339()),
    ]
}

pub fn decode_request(fields: &HashMap<String, String>) -> Result<QueuedRequest, QueueError> {
    let field = |name: &str| {
        fields.get(name).cloned().ok_or_else(|| QueueError::Malformed {
            id: fields.get("request_id").cloned().unwrap_or_default(),
            reason: format!("missing field {name}"),
        })
    };
    let malformed = |reason: String| QueueError::Malformed {
        id: fields.get("request_id").cloned().unwrap_or_default(),
        reason,
    };

    let request_id = field("request_id")?;
    let event_id = field("event_id")?
        .parse::<i64>()
        .map_err(|e| malformed(format!("event_id: {e}")))?;
    let user_id = field("user_id")?;
    let seat_ids: Vec<i64> =
        serde_json::from_str(&field("seat_ids")?).map_err(|e| malformed(format!("seat_ids: {e}")))?;
    let priority = QueuePriority::parse(&field("priority")?)
        .ok_or_else(|| malformed("unknown priority".to_string()))?;
    let enqueued_at = DateTime::parse_from_rfc3339(&field("enqueued_at")?)
        .map_err(|e| malformed(format!("enqueued_at: {e}")))?
        .with_timezone(&Utc);

    Ok(QueuedRequest { request_id, event_id, seat_ids, user_id, priority, enqueued_at })
}

fn priority_of_stream(stream: &str) -> Option<QueuePriority> {
    stream.rsplit(':').next().and_then(QueuePriority::parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> QueuedRequest {
        QueuedRequest {
            request_id: "01J0000000000000000000TEST".to_string(),
            event_id: 42,
            seat_ids: vec![3, 7, 9],
            user_id: "u1".to_string(),
            priority: QueuePriority::High,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn test_request_survives_stream_fields() {
        let original = request();
        let fields: HashMap<String, String> = encode_request(&original)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let decoded = decode_request(&fields).unwrap();
        assert_eq!(decoded.request_id, original.request_id);
        assert_eq!(decoded.seat_ids, original.seat_ids);
        assert_eq!(decoded.priority, QueuePriority::High);
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let mut fields: HashMap<String, String> = encode_request(&request())
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        fields.remove("seat_ids");
        assert!(matches!(decode_request(&fields), Err(QueueError::Malformed { .. })));
    }

    #[test]
    fn test_round_weights_favor_high() {
        assert_eq!(ROUND_WEIGHTS[0].0, QueuePriority::High);
        assert!(ROUND_WEIGHTS[0].1 > ROUND_WEIGHTS[1].1);
        assert!(ROUND_WEIGHTS[1].1 > ROUND_WEIGHTS[2].1);
    }

    #[test]
    fn test_stream_keys() {
        assert_eq!(stream_key(5, QueuePriority::Low), "queue:5:low");
        assert_eq!(dead_letter_key(5), "queue:5:dead");
        assert_eq!(priority_of_stream("queue:5:normal"), Some(QueuePriority::Normal));
        assert_eq!(priority_of_stream("queue:5:dead"), None);
    }

    #[test]
    fn test_wait_estimate() {
        assert_eq!(estimate_wait_seconds(0, 2.0), 0);
        assert_eq!(estimate_wait_seconds(10, 2.0), 5);
        // Idle queue with no observed throughput falls back to the floor.
        assert_eq!(estimate_wait_seconds(1, 0.0), 10);
    }
}
