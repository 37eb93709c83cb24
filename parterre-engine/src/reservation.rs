use chrono::{DateTime, Duration, Utc};
use parterre_domain::{Reservation, ReservationStatus, SeatStatus};
use parterre_store::{DbClient, EventRepository, ReservationRepository, SeatRepository};
use serde::Serialize;
use tracing::info;

use crate::counters::{credit_available, debit_available};
use crate::error::EngineError;
use crate::lock::{seat_lock_keys, LockManager};

/// Successful reservation of one or more seats.
#[derive(Debug, Clone, Serialize)]
pub struct ReservationOutcome {
    pub reservations: Vec<Reservation>,
    pub total_amount_cents: i64,
    pub expires_at: DateTime<Utc>,
}

/// Single entry point for seat state transitions, shared by the synchronous
/// path and the queue workers. All-or-nothing: either every requested seat
/// moves to RESERVED inside one transaction, or nothing changes.
#[derive(Clone)]
pub struct ReservationEngine {
    db: DbClient,
    locks: LockManager,
    reservation_timeout: Duration,
    max_seats_per_booking: usize,
}

impl ReservationEngine {
    pub fn new(
        db: DbClient,
        locks: LockManager,
        reservation_timeout_seconds: u64,
        max_seats_per_booking: usize,
    ) -> Self {
        Self {
            db,
            locks,
            reservation_timeout: Duration::seconds(reservation_timeout_seconds as i64),
            max_seats_per_booking,
        }
    }

    /// Reserve `seat_ids` for `user_id` under the multi-key seat lock.
    pub async fn reserve(
        &self,
        event_id: i64,
        seat_ids: &[i64],
        user_id: &str,
    ) -> Result<ReservationOutcome, EngineError> {
        let ids = normalize_seat_ids(seat_ids, self.max_seats_per_booking)?;

        let guard = self.locks.acquire_all(&seat_lock_keys(&ids)).await?;
        let result = self.reserve_locked(event_id, &ids, user_id).await;
        self.locks.release_all(guard).await;
        result
    }

    async fn reserve_locked(
        &self,
        event_id: i64,
        seat_ids: &[i64],
        user_id: &str,
    ) -> Result<ReservationOutcome, EngineError> {
        let mut tx = self.db.pool.begin().await?;

        let event = EventRepository::get_for_update(&mut tx, event_id)
            .await?
            .ok_or(EngineError::EventNotFound(event_id))?;
        if !event.accepts_reservations() {
            return Err(EngineError::EventNotOnSale(event_id));
        }

        let seats = SeatRepository::lock_for_update(&mut tx, seat_ids).await?;
        if seats.len() != seat_ids.len() {
            let missing = seat_ids
                .iter()
                .find(|id| !seats.iter().any(|s| s.seat_id == **id))
                .copied()
                .unwrap_or(seat_ids[0]);
            return Err(EngineError::SeatNotFound { seat_id: missing });
        }

        let now = Utc::now();
        for seat in &seats {
            if seat.event_id != event_id {
                return Err(EngineError::SeatEventMismatch { seat_id: seat.seat_id, event_id });
            }
            if !seat.is_takeable(now) {
                if seat.status == SeatStatus::Reserved && seat.reserved_by.as_deref() == Some(user_id) {
                    return Err(EngineError::AlreadyHeld { seat_id: seat.seat_id });
                }
                return Err(EngineError::SeatUnavailable { seat_id: seat.seat_id });
            }
        }

        let expires_at = now + self.reservation_timeout;
        let mut reservations = Vec::with_capacity(seats.len());
        let mut total_amount_cents = 0i64;

        for seat in &seats {
            // The version predicate defends against a lock whose TTL lapsed
            // mid-transaction: a writer that slipped in bumped the version.
            let changed =
                SeatRepository::mark_reserved(&mut tx, seat.seat_id, user_id, expires_at, seat.version).await?;
            if changed != 1 {
                return Err(EngineError::OptimisticConflict { seat_id: seat.seat_id });
            }

            let reservation =
                ReservationRepository::create(&mut tx, seat.seat_id, event_id, user_id, expires_at).await?;
            reservations.push(reservation);
            total_amount_cents += seat.price_cents;
        }

        debit_available(&mut tx, event_id, seats.len() as i32).await?;
        tx.commit().await?;

        info!(event_id, user_id, seats = seats.len(), "seats reserved");
        Ok(ReservationOutcome { reservations, total_amount_cents, expires_at })
    }

    /// Cancel an active reservation; the seat returns to the available pool
    /// if this user's hold is still on it.
    pub async fn cancel(&self, reservation_id: i64, user_id: &str) -> Result<(), EngineError> {
        let reservation = ReservationRepository::get(&self.db.pool, reservation_id)
            .await?
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        if reservation.user_id != user_id {
            return Err(EngineError::NotOwner);
        }
        if !reservation.is_active() {
            return Err(EngineError::ReservationNotActive(reservation_id));
        }

        let guard = self.locks.acquire(&format!("seat:{}", reservation.seat_id)).await?;
        let result = self.cancel_locked(&reservation, user_id).await;
        self.locks.release(guard).await;
        result
    }

    async fn cancel_locked(&self, reservation: &Reservation, user_id: &str) -> Result<(), EngineError> {
        let mut tx = self.db.pool.begin().await?;

        let current = ReservationRepository::get_for_update(&mut tx, reservation.reservation_id)
            .await?
            .ok_or(EngineError::ReservationNotFound(reservation.reservation_id))?;
        if !current.is_active() {
            return Err(EngineError::ReservationNotActive(current.reservation_id));
        }

        let seat = SeatRepository::lock_one_for_update(&mut tx, reservation.seat_id).await?;
        if let Some(seat) = seat {
            if seat.status == SeatStatus::Reserved && seat.reserved_by.as_deref() == Some(user_id) {
                SeatRepository::release(&mut tx, seat.seat_id).await?;
                credit_available(&mut tx, seat.event_id, 1).await?;
            }
        }

        ReservationRepository::set_status(&mut tx, reservation.reservation_id, ReservationStatus::Cancelled)
            .await?;
        tx.commit().await?;

        info!(reservation_id = reservation.reservation_id, user_id, "reservation cancelled");
        Ok(())
    }

    /// Push the hold expiry out by one full reservation window.
    pub async fn extend(&self, reservation_id: i64, user_id: &str) -> Result<DateTime<Utc>, EngineError> {
        let reservation = ReservationRepository::get(&self.db.pool, reservation_id)
            .await?
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        if reservation.user_id != user_id {
            return Err(EngineError::NotOwner);
        }
        if !reservation.is_active() {
            return Err(EngineError::ReservationNotActive(reservation_id));
        }

        let guard = self.locks.acquire(&format!("seat:{}", reservation.seat_id)).await?;
        let result = self.extend_locked(&reservation, user_id).await;
        self.locks.release(guard).await;
        result
    }

    async fn extend_locked(
        &self,
        reservation: &Reservation,
        user_id: &str,
    ) -> Result<DateTime<Utc>, EngineError> {
        let mut tx = self.db.pool.begin().await?;

        let current = ReservationRepository::get_for_update(&mut tx, reservation.reservation_id)
            .await?
            .ok_or(EngineError::ReservationNotFound(reservation.reservation_id))?;
        if !current.is_active() {
            return Err(EngineError::ReservationNotActive(current.reservation_id));
        }

        let now = Utc::now();
        if current.is_expired_at(now) {
            return Err(EngineError::AlreadyExpired(current.reservation_id));
        }

        let new_expiry = now + self.reservation_timeout;
        let seat = SeatRepository::lock_one_for_update(&mut tx, current.seat_id).await?;
        if let Some(seat) = seat {
            if seat.status == SeatStatus::Reserved && seat.reserved_by.as_deref() == Some(user_id) {
                SeatRepository::extend_hold(&mut tx, seat.seat_id, new_expiry).await?;
            }
        }
        ReservationRepository::set_expiry(&mut tx, current.reservation_id, new_expiry).await?;
        tx.commit().await?;

        Ok(new_expiry)
    }

    pub async fn get_reservation(&self, reservation_id: i64) -> Result<Option<Reservation>, EngineError> {
        Ok(ReservationRepository::get(&self.db.pool, reservation_id).await?)
    }

    pub async fn active_reservations(&self, user_id: &str) -> Result<Vec<Reservation>, EngineError> {
        Ok(ReservationRepository::active_by_user(&self.db.pool, user_id).await?)
    }

    /// Recovery probe for the retry path: if this user already holds active
    /// reservations on exactly the requested seats, rebuild the outcome a
    /// lost completion would have carried.
    pub async fn find_existing_outcome(
        &self,
        seat_ids: &[i64],
        user_id: &str,
    ) -> Result<Option<ReservationOutcome>, EngineError> {
        let ids = normalize_seat_ids(seat_ids, usize::MAX)?;
        let held = ReservationRepository::active_for_seats(&self.db.pool, &ids, user_id).await?;
        if held.len() != ids.len() {
            return Ok(None);
        }

        let mut total_amount_cents = 0i64;
        for reservation in &held {
            let seat = SeatRepository::get(&self.db.pool, reservation.seat_id)
                .await?
                .ok_or(EngineError::SeatNotFound { seat_id: reservation.seat_id })?;
            total_amount_cents += seat.price_cents;
        }
        let expires_at = held.iter().map(|r| r.expires_at).min().unwrap_or_else(Utc::now);

        Ok(Some(ReservationOutcome { reservations: held, total_amount_cents, expires_at }))
    }
}

/// Sort ascending, reject duplicates collapsing, empty input, and oversized
/// requests.
fn normalize_seat_ids(seat_ids: &[i64], max: usize) -> Result<Vec<i64>, EngineError> {
    if seat_ids.is_empty() {
        return Err(EngineError::NoSeats);
    }
    let mut ids = seat_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() > max {
        return Err(EngineError::TooManySeats { max });
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_sorts_and_dedups() {
        assert_eq!(normalize_seat_ids(&[5, 1, 5, 3], 10).unwrap(), vec![1, 3, 5]);
    }

    #[test]
    fn test_normalize_rejects_empty_and_oversized() {
        assert!(matches!(normalize_seat_ids(&[], 10), Err(EngineError::NoSeats)));
        assert!(matches!(
            normalize_seat_ids(&[1, 2, 3], 2),
            Err(EngineError::TooManySeats { max: 2 })
        ));
    }
}
