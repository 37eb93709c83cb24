use std::time::Duration;

use chrono::Utc;
use parterre_domain::{Reservation, ReservationStatus, SeatStatus};
use parterre_store::{DbClient, ReservationRepository, SeatRepository};
use tracing::{debug, error, info, warn};

use crate::counters::credit_available;
use crate::error::EngineError;
use crate::lock::LockManager;

/// Periodic scan that returns lapsed holds to the available pool and marks
/// their reservations EXPIRED. One failed reservation never halts a cycle.
#[derive(Clone)]
pub struct ExpirationSweeper {
    db: DbClient,
    locks: LockManager,
    interval: Duration,
    batch_size: i64,
}

impl ExpirationSweeper {
    pub fn new(db: DbClient, locks: LockManager, interval_seconds: u64, batch_size: i64) -> Self {
        Self {
            db,
            locks,
            interval: Duration::from_secs(interval_seconds),
            batch_size,
        }
    }

    /// Run forever; intended for `tokio::spawn`.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "expiration sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(0) => {}
                Ok(released) => info!(released, "expired reservations swept"),
                Err(e) => error!(error = %e, "sweep cycle failed"),
            }
        }
    }

    /// One cycle: bounded batch of lapsed ACTIVE reservations, each handled
    /// in isolation under its seat's lock.
    pub async fn sweep_once(&self) -> Result<usize, EngineError> {
        let now = Utc::now();
        let batch = ReservationRepository::expired_batch(&self.db.pool, now, self.batch_size).await?;

        let mut released = 0;
        for reservation in batch {
            match self.sweep_one(&reservation).await {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        reservation_id = reservation.reservation_id,
                        error = %e,
                        "failed to sweep reservation"
                    );
                }
            }
        }
        Ok(released)
    }

    async fn sweep_one(&self, reservation: &Reservation) -> Result<bool, EngineError> {
        let guard = self.locks.acquire(&format!("seat:{}", reservation.seat_id)).await?;
        let result = self.sweep_one_locked(reservation).await;
        self.locks.release(guard).await;
        result
    }

    async fn sweep_one_locked(&self, reservation: &Reservation) -> Result<bool, EngineError> {
        let mut tx = self.db.pool.begin().await?;
        let now = Utc::now();

        // Re-check under the row lock: the hold may have been cancelled,
        // extended, or promoted to a booking since selection.
        let current = match ReservationRepository::get_for_update(&mut tx, reservation.reservation_id).await? {
            Some(r) if r.is_active() && r.is_expired_at(now) => r,
            _ => return Ok(false),
        };

        let seat = SeatRepository::lock_one_for_update(&mut tx, current.seat_id).await?;
        let released = match seat {
            Some(seat)
                if seat.status == SeatStatus::Reserved
                    && seat.reserved_by.as_deref() == Some(current.user_id.as_str())
                    && seat.reserved_until.map_or(true, |until| until <= now) =>
            {
                SeatRepository::release(&mut tx, seat.seat_id).await?;
                credit_available(&mut tx, seat.event_id, 1).await?;
                true
            }
            Some(seat) if seat.status == SeatStatus::Booked => {
                // Promoted between selection and lock acquisition; leave it
                // on the Confirmed path.
                debug!(seat_id = seat.seat_id, "seat booked mid-sweep, skipping");
                return Ok(false);
            }
            _ => false,
        };

        ReservationRepository::set_status(&mut tx, current.reservation_id, ReservationStatus::Expired).await?;
        tx.commit().await?;
        Ok(released)
    }
}
