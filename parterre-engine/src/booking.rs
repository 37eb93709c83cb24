use chrono::Utc;
use parterre_domain::{Booking, BookingSeat, BookingStatus, PaymentStatus, Reservation, ReservationStatus, Seat, SeatStatus};
use parterre_store::{BookingRepository, DbClient, ReservationRepository, SeatRepository};
use tracing::info;
use ulid::Ulid;

use crate::counters::credit_available;
use crate::error::EngineError;
use crate::lock::{seat_lock_keys, LockManager};

/// Converts a set of held reservations into a booking and drives the
/// payment-confirm / cancel transitions.
#[derive(Clone)]
pub struct BookingFinalizer {
    db: DbClient,
    locks: LockManager,
}

impl BookingFinalizer {
    pub fn new(db: DbClient, locks: LockManager) -> Self {
        Self { db, locks }
    }

    /// Create a PENDING booking from the caller's active reservations,
    /// moving every seat RESERVED → BOOKED under the multi-key lock.
    pub async fn create_booking(&self, reservation_ids: &[i64], user_id: &str) -> Result<Booking, EngineError> {
        if reservation_ids.is_empty() {
            return Err(EngineError::NoSeats);
        }
        let mut ids = reservation_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        // Resolve seat ids up front so the lock set is known before the
        // transaction opens; everything is re-checked under the locks.
        let mut seat_ids = Vec::with_capacity(ids.len());
        let mut event_id = None;
        for id in &ids {
            let reservation = ReservationRepository::get(&self.db.pool, *id)
                .await?
                .ok_or(EngineError::ReservationNotFound(*id))?;
            if reservation.user_id != user_id {
                return Err(EngineError::NotOwner);
            }
            match event_id {
                None => event_id = Some(reservation.event_id),
                Some(existing) if existing != reservation.event_id => return Err(EngineError::MixedEvents),
                Some(_) => {}
            }
            seat_ids.push(reservation.seat_id);
        }
        let event_id = event_id.expect("non-empty reservation set");

        let guard = self.locks.acquire_all(&seat_lock_keys(&seat_ids)).await?;
        let result = self.create_booking_locked(&ids, event_id, user_id).await;
        self.locks.release_all(guard).await;
        result
    }

    async fn create_booking_locked(
        &self,
        reservation_ids: &[i64],
        event_id: i64,
        user_id: &str,
    ) -> Result<Booking, EngineError> {
        let mut tx = self.db.pool.begin().await?;
        let now = Utc::now();

        let reservations = ReservationRepository::get_many_for_update(&mut tx, reservation_ids).await?;
        if reservations.len() != reservation_ids.len() {
            let missing = reservation_ids
                .iter()
                .find(|id| !reservations.iter().any(|r| r.reservation_id == **id))
                .copied()
                .unwrap_or(reservation_ids[0]);
            return Err(EngineError::ReservationNotFound(missing));
        }
        for reservation in &reservations {
            require_bookable(reservation, user_id, now)?;
        }

        let seat_ids: Vec<i64> = reservations.iter().map(|r| r.seat_id).collect();
        let seats = SeatRepository::lock_for_update(&mut tx, &seat_ids).await?;
        for seat in &seats {
            if seat.status != SeatStatus::Reserved || seat.reserved_by.as_deref() != Some(user_id) {
                return Err(EngineError::SeatNotHeld { seat_id: seat.seat_id });
            }
        }

        let total_amount_cents: i64 = seats.iter().map(|s| s.price_cents).sum();
        let reference = new_booking_reference();

        let booking =
            BookingRepository::create(&mut tx, event_id, user_id, total_amount_cents, &reference).await?;

        for seat in &seats {
            let changed =
                SeatRepository::mark_booked(&mut tx, seat.seat_id, booking.booking_id, seat.version).await?;
            if changed != 1 {
                return Err(EngineError::OptimisticConflict { seat_id: seat.seat_id });
            }
            BookingRepository::add_seat_line(&mut tx, booking.booking_id, seat.seat_id, seat.price_cents)
                .await?;
        }

        for reservation in &reservations {
            ReservationRepository::set_status(&mut tx, reservation.reservation_id, ReservationStatus::Confirmed)
                .await?;
        }

        tx.commit().await?;
        info!(booking_id = booking.booking_id, reference = %booking.booking_reference, user_id, "booking created");
        Ok(booking)
    }

    /// Mark the booking paid. Re-confirming with the same payment id is a
    /// no-op; anything else on a non-pending booking is rejected.
    pub async fn confirm_payment(&self, booking_id: i64, payment_id: &str) -> Result<Booking, EngineError> {
        let mut tx = self.db.pool.begin().await?;

        let booking = BookingRepository::get_for_update(&mut tx, booking_id)
            .await?
            .ok_or(EngineError::BookingNotFound(booking_id))?;

        match booking.status {
            BookingStatus::Confirmed if booking.payment_id.as_deref() == Some(payment_id) => {
                tx.commit().await?;
                Ok(booking)
            }
            BookingStatus::Pending => {
                let updated = BookingRepository::record_payment(
                    &mut tx,
                    booking_id,
                    Some(payment_id),
                    PaymentStatus::Success,
                    BookingStatus::Confirmed,
                    Some(Utc::now()),
                )
                .await?;
                tx.commit().await?;
                info!(booking_id, "payment confirmed");
                Ok(updated)
            }
            _ => Err(EngineError::BookingNotPending(booking_id)),
        }
    }

    /// Payment failure releases the seats and marks the booking FAILED.
    pub async fn fail_payment(&self, booking_id: i64, payment_id: Option<&str>) -> Result<Booking, EngineError> {
        let booking = BookingRepository::get(&self.db.pool, booking_id)
            .await?
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::BookingNotPending(booking_id));
        }

        let seats = SeatRepository::seats_of_booking(&self.db.pool, booking_id).await?;
        let seat_ids: Vec<i64> = seats.iter().map(|s| s.seat_id).collect();

        let guard = self.locks.acquire_all(&seat_lock_keys(&seat_ids)).await?;
        let result = self
            .release_booking_seats(booking_id, &seat_ids, PaymentStatus::Failed, BookingStatus::Failed, payment_id)
            .await;
        self.locks.release_all(guard).await;
        result
    }

    /// Cancel a booking. PENDING bookings give their seats back; CONFIRMED
    /// bookings keep seats BOOKED under the cancelled booking as the audit
    /// trail (refunds are out of scope).
    pub async fn cancel_booking(&self, booking_id: i64, user_id: &str) -> Result<Booking, EngineError> {
        let booking = BookingRepository::get(&self.db.pool, booking_id)
            .await?
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        if booking.user_id != user_id {
            return Err(EngineError::NotOwner);
        }

        match booking.status {
            BookingStatus::Pending => {
                let seats = SeatRepository::seats_of_booking(&self.db.pool, booking_id).await?;
                let seat_ids: Vec<i64> = seats.iter().map(|s| s.seat_id).collect();

                let guard = self.locks.acquire_all(&seat_lock_keys(&seat_ids)).await?;
                let result = self
                    .release_booking_seats(
                        booking_id,
                        &seat_ids,
                        PaymentStatus::Pending,
                        BookingStatus::Cancelled,
                        None,
                    )
                    .await;
                self.locks.release_all(guard).await;
                result
            }
            BookingStatus::Confirmed => {
                let mut tx = self.db.pool.begin().await?;
                BookingRepository::set_status(&mut tx, booking_id, BookingStatus::Cancelled).await?;
                tx.commit().await?;
                info!(booking_id, "confirmed booking cancelled, seats retained");
                BookingRepository::get(&self.db.pool, booking_id)
                    .await?
                    .ok_or(EngineError::BookingNotFound(booking_id))
            }
            _ => Err(EngineError::BookingNotCancellable(booking_id)),
        }
    }

    async fn release_booking_seats(
        &self,
        booking_id: i64,
        seat_ids: &[i64],
        payment_status: PaymentStatus,
        status: BookingStatus,
        payment_id: Option<&str>,
    ) -> Result<Booking, EngineError> {
        let mut tx = self.db.pool.begin().await?;

        let seats = SeatRepository::lock_for_update(&mut tx, seat_ids).await?;
        let mut released = 0i32;
        let mut event_id = None;
        for seat in &seats {
            if seat.status == SeatStatus::Booked && seat.booking_id == Some(booking_id) {
                SeatRepository::release(&mut tx, seat.seat_id).await?;
                released += 1;
                event_id = Some(seat.event_id);
            }
        }
        if let (Some(event_id), true) = (event_id, released > 0) {
            credit_available(&mut tx, event_id, released).await?;
        }

        let updated =
            BookingRepository::record_payment(&mut tx, booking_id, payment_id, payment_status, status, None)
                .await?;
        tx.commit().await?;

        info!(booking_id, released, status = %updated.status, "booking closed, seats released");
        Ok(updated)
    }

    pub async fn get_booking(&self, booking_id: i64) -> Result<Option<Booking>, EngineError> {
        Ok(BookingRepository::get(&self.db.pool, booking_id).await?)
    }

    pub async fn get_by_reference(&self, reference: &str) -> Result<Option<Booking>, EngineError> {
        Ok(BookingRepository::get_by_reference(&self.db.pool, reference).await?)
    }

    pub async fn bookings_for_user(&self, user_id: &str) -> Result<Vec<Booking>, EngineError> {
        Ok(BookingRepository::list_by_user(&self.db.pool, user_id).await?)
    }

    pub async fn seat_lines(&self, booking_id: i64) -> Result<Vec<BookingSeat>, EngineError> {
        Ok(BookingRepository::seat_lines(&self.db.pool, booking_id).await?)
    }

    pub async fn booked_seats(&self, booking_id: i64) -> Result<Vec<Seat>, EngineError> {
        Ok(SeatRepository::seats_of_booking(&self.db.pool, booking_id).await?)
    }
}

fn require_bookable(reservation: &Reservation, user_id: &str, now: chrono::DateTime<Utc>) -> Result<(), EngineError> {
    if reservation.user_id != user_id {
        return Err(EngineError::NotOwner);
    }
    if !reservation.is_active() {
        return Err(EngineError::ReservationNotActive(reservation.reservation_id));
    }
    if reservation.is_expired_at(now) {
        return Err(EngineError::AlreadyExpired(reservation.reservation_id));
    }
    Ok(())
}

fn new_booking_reference() -> String {
    format!("BK-{}", Ulid::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reservation(status: ReservationStatus, expires_in: i64) -> Reservation {
        Reservation {
            reservation_id: 1,
            seat_id: 1,
            event_id: 1,
            user_id: "u1".to_string(),
            expires_at: Utc::now() + Duration::seconds(expires_in),
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_booking_reference_shape() {
        let reference = new_booking_reference();
        assert!(reference.starts_with("BK-"));
        assert_eq!(reference.len(), 3 + 26);
    }

    #[test]
    fn test_require_bookable() {
        let now = Utc::now();
        assert!(require_bookable(&reservation(ReservationStatus::Active, 60), "u1", now).is_ok());
        assert!(matches!(
            require_bookable(&reservation(ReservationStatus::Active, 60), "u2", now),
            Err(EngineError::NotOwner)
        ));
        assert!(matches!(
            require_bookable(&reservation(ReservationStatus::Cancelled, 60), "u1", now),
            Err(EngineError::ReservationNotActive(_))
        ));
        assert!(matches!(
            require_bookable(&reservation(ReservationStatus::Active, -5), "u1", now),
            Err(EngineError::AlreadyExpired(_))
        ));
    }
}
