use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue priority levels. High drains ahead of normal, normal ahead of low,
/// without starving either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePriority {
    High,
    Normal,
    Low,
}

impl QueuePriority {
    pub const ALL: [QueuePriority; 3] = [QueuePriority::High, QueuePriority::Normal, QueuePriority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueuePriority::High => "high",
            QueuePriority::Normal => "normal",
            QueuePriority::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "high" => Some(QueuePriority::High),
            "normal" => Some(QueuePriority::Normal),
            "low" => Some(QueuePriority::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueuePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a queued request. Terminal states never transition further;
/// a reader can rely on the sequence pending → processing → terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::Processing => "processing",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
            RequestState::Cancelled => "cancelled",
            RequestState::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Failed | RequestState::Cancelled | RequestState::Expired
        )
    }

    /// Monotonic transition rule enforced by the status store.
    pub fn can_transition_to(&self, next: RequestState) -> bool {
        match self {
            RequestState::Pending => next != RequestState::Pending,
            RequestState::Processing => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure attached to a request that ended in a non-success state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SeatUnavailable,
    EventNotOnSale,
    AlreadyHeld,
    ValidationFailed,
    ExceededRetries,
    CancelledByUser,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Payload attached to a request that completed successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResult {
    pub reservation_ids: Vec<i64>,
    pub total_amount_cents: i64,
    pub expires_at: DateTime<Utc>,
}

/// A reservation intent admitted into the priority queue. The id is a ULID,
/// so ids sort by enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub request_id: String,
    pub event_id: i64,
    pub seat_ids: Vec<i64>,
    pub user_id: String,
    pub priority: QueuePriority,
    pub enqueued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_never_transition() {
        for terminal in [
            RequestState::Completed,
            RequestState::Failed,
            RequestState::Cancelled,
            RequestState::Expired,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                RequestState::Pending,
                RequestState::Processing,
                RequestState::Completed,
                RequestState::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_pending_and_processing_transitions() {
        assert!(RequestState::Pending.can_transition_to(RequestState::Processing));
        assert!(RequestState::Pending.can_transition_to(RequestState::Cancelled));
        assert!(RequestState::Processing.can_transition_to(RequestState::Completed));
        assert!(RequestState::Processing.can_transition_to(RequestState::Failed));
        assert!(!RequestState::Processing.can_transition_to(RequestState::Pending));
        assert!(!RequestState::Processing.can_transition_to(RequestState::Processing));
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!(QueuePriority::parse("high"), Some(QueuePriority::High));
        assert_eq!(QueuePriority::parse("vip"), None);
    }
}
