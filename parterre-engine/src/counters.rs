use parterre_domain::EventStatus;
use parterre_store::EventRepository;
use sqlx::{Postgres, Transaction};

/// Take `count` seats out of the available pool; flips the event to
/// SOLD_OUT when the counter reaches zero. Caller must hold the event row
/// lock or the seat row locks.
pub(crate) async fn debit_available(
    tx: &mut Transaction<'_, Postgres>,
    event_id: i64,
    count: i32,
) -> Result<i32, sqlx::Error> {
    let available = EventRepository::adjust_available(tx, event_id, -count).await?;
    if available <= 0 {
        EventRepository::set_status(tx, event_id, EventStatus::SoldOut).await?;
    }
    Ok(available)
}

/// Return `count` seats to the available pool; a SOLD_OUT event with
/// availability again goes back ON_SALE.
pub(crate) async fn credit_available(
    tx: &mut Transaction<'_, Postgres>,
    event_id: i64,
    count: i32,
) -> Result<i32, sqlx::Error> {
    let available = EventRepository::adjust_available(tx, event_id, count).await?;
    if available > 0 {
        let event = EventRepository::get_for_update(tx, event_id).await?;
        if event.map(|e| e.status) == Some(EventStatus::SoldOut) {
            EventRepository::set_status(tx, event_id, EventStatus::OnSale).await?;
        }
    }
    Ok(available)
}
