use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StatusParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatType {
    Regular,
    Vip,
    Premium,
}

impl SeatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatType::Regular => "REGULAR",
            SeatType::Vip => "VIP",
            SeatType::Premium => "PREMIUM",
        }
    }
}

impl std::fmt::Display for SeatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for SeatType {
    type Error = StatusParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "REGULAR" => Ok(SeatType::Regular),
            "VIP" => Ok(SeatType::Vip),
            "PREMIUM" => Ok(SeatType::Premium),
            _ => Err(StatusParseError { column: "seats.seat_type", value }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Reserved,
    Booked,
    Blocked,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Reserved => "RESERVED",
            SeatStatus::Booked => "BOOKED",
            SeatStatus::Blocked => "BLOCKED",
        }
    }
}

impl std::fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for SeatStatus {
    type Error = StatusParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "AVAILABLE" => Ok(SeatStatus::Available),
            "RESERVED" => Ok(SeatStatus::Reserved),
            "BOOKED" => Ok(SeatStatus::Booked),
            "BLOCKED" => Ok(SeatStatus::Blocked),
            _ => Err(StatusParseError { column: "seats.status", value }),
        }
    }
}

/// A single sellable seat. `version` is bumped on every status transition
/// and guards updates with an optimistic `WHERE version = expected`
/// predicate. `reserved_by`/`reserved_until` are set iff RESERVED,
/// `booking_id` iff BOOKED.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Seat {
    pub seat_id: i64,
    pub event_id: i64,
    pub seat_number: String,
    pub section: Option<String>,
    pub row_number: Option<String>,
    #[sqlx(try_from = "String")]
    pub seat_type: SeatType,
    pub price_cents: i64,
    #[sqlx(try_from = "String")]
    pub status: SeatStatus,
    pub version: i64,
    pub reserved_by: Option<String>,
    pub reserved_until: Option<DateTime<Utc>>,
    pub booking_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Seat {
    /// A seat can be taken when it is AVAILABLE and no stale hold metadata
    /// still points at it.
    pub fn is_takeable(&self, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Available
            && self.reserved_until.map_or(true, |until| until <= now)
    }

    /// Holder/expiry/booking columns must agree with the status.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            SeatStatus::Available | SeatStatus::Blocked => {
                self.reserved_by.is_none() && self.reserved_until.is_none() && self.booking_id.is_none()
            }
            SeatStatus::Reserved => {
                self.reserved_by.is_some() && self.reserved_until.is_some() && self.booking_id.is_none()
            }
            SeatStatus::Booked => self.reserved_by.is_none() && self.booking_id.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn seat(status: SeatStatus) -> Seat {
        Seat {
            seat_id: 1,
            event_id: 1,
            seat_number: "A1".to_string(),
            section: None,
            row_number: None,
            seat_type: SeatType::Regular,
            price_cents: 5000,
            status,
            version: 0,
            reserved_by: None,
            reserved_until: None,
            booking_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_available_seat_is_takeable() {
        assert!(seat(SeatStatus::Available).is_takeable(Utc::now()));
        assert!(!seat(SeatStatus::Reserved).is_takeable(Utc::now()));
        assert!(!seat(SeatStatus::Booked).is_takeable(Utc::now()));
    }

    #[test]
    fn test_stale_hold_metadata_blocks_until_lapsed() {
        let now = Utc::now();
        let mut s = seat(SeatStatus::Available);
        s.reserved_until = Some(now + Duration::seconds(30));
        assert!(!s.is_takeable(now));
        s.reserved_until = Some(now - Duration::seconds(1));
        assert!(s.is_takeable(now));
    }

    #[test]
    fn test_consistency_rules() {
        assert!(seat(SeatStatus::Available).is_consistent());

        let mut reserved = seat(SeatStatus::Reserved);
        assert!(!reserved.is_consistent());
        reserved.reserved_by = Some("u1".to_string());
        reserved.reserved_until = Some(Utc::now());
        assert!(reserved.is_consistent());

        let mut booked = seat(SeatStatus::Booked);
        assert!(!booked.is_consistent());
        booked.booking_id = Some(9);
        assert!(booked.is_consistent());
    }
}
