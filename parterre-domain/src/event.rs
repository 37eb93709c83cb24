use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StatusParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Upcoming,
    OnSale,
    SoldOut,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Upcoming => "UPCOMING",
            EventStatus::OnSale => "ON_SALE",
            EventStatus::SoldOut => "SOLD_OUT",
            EventStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for EventStatus {
    type Error = StatusParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "UPCOMING" => Ok(EventStatus::Upcoming),
            "ON_SALE" => Ok(EventStatus::OnSale),
            "SOLD_OUT" => Ok(EventStatus::SoldOut),
            "CANCELLED" => Ok(EventStatus::Cancelled),
            _ => Err(StatusParseError { column: "events.status", value }),
        }
    }
}

/// A ticketed event. `available_seats` mirrors the count of this event's
/// seats in AVAILABLE status and is maintained inside every transaction
/// that moves a seat.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub event_id: i64,
    pub event_name: String,
    pub event_date: DateTime<Utc>,
    pub venue_name: Option<String>,
    pub total_seats: i32,
    pub available_seats: i32,
    #[sqlx(try_from = "String")]
    pub status: EventStatus,
    pub sale_start_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Only events on sale accept reservations.
    pub fn accepts_reservations(&self) -> bool {
        self.status == EventStatus::OnSale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in [EventStatus::Upcoming, EventStatus::OnSale, EventStatus::SoldOut, EventStatus::Cancelled] {
            assert_eq!(EventStatus::try_from(s.as_str().to_string()).unwrap(), s);
        }
        assert!(EventStatus::try_from("BOGUS".to_string()).is_err());
    }
}
