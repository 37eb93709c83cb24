use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use parterre_domain::{Booking, Seat};
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct CreateBookingRequest {
    reservation_ids: Vec<i64>,
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentRequest {
    payment_id: String,
}

#[derive(Debug, Deserialize)]
struct FailPaymentRequest {
    payment_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct BookingWithSeats {
    #[serde(flatten)]
    booking: Booking,
    seats: Vec<Seat>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/bookings", post(create_booking).get(list_bookings))
        .route("/bookings/:booking_id", get(get_booking))
        .route("/bookings/reference/:reference", get(get_booking_by_reference))
        .route("/bookings/:booking_id/confirm-payment", post(confirm_payment))
        .route("/bookings/:booking_id/fail-payment", post(fail_payment))
        .route("/bookings/:booking_id/cancel", post(cancel_booking))
}

/// Finalize the caller's held reservations into a PENDING booking.
async fn create_booking(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    if let Some(body_user) = &req.user_id {
        if body_user != &user_id {
            return Err(AppError::Forbidden("cannot book for another user".to_string()));
        }
    }
    let booking = state.finalizer.create_booking(&req.reservation_ids, &user_id).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn list_bookings(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<Booking>>, AppError> {
    Ok(Json(state.finalizer.bookings_for_user(&user_id).await?))
}

async fn get_booking(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(booking_id): Path<i64>,
) -> Result<Json<BookingWithSeats>, AppError> {
    let booking = owned_booking(&state, booking_id, &user_id).await?;
    let seats = state.finalizer.booked_seats(booking_id).await?;
    Ok(Json(BookingWithSeats { booking, seats }))
}

async fn get_booking_by_reference(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(reference): Path<String>,
) -> Result<Json<BookingWithSeats>, AppError> {
    let booking = state
        .finalizer
        .get_by_reference(&reference)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("booking {reference} not found")))?;
    if booking.user_id != user_id {
        return Err(AppError::Forbidden("booking belongs to another user".to_string()));
    }
    let seats = state.finalizer.booked_seats(booking.booking_id).await?;
    Ok(Json(BookingWithSeats { booking, seats }))
}

/// Payment gateway callback for a successful charge. Idempotent for the
/// same payment id.
async fn confirm_payment(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(booking_id): Path<i64>,
    Json(req): Json<PaymentRequest>,
) -> Result<Json<Booking>, AppError> {
    owned_booking(&state, booking_id, &user_id).await?;
    let booking = state.finalizer.confirm_payment(booking_id, &req.payment_id).await?;
    Ok(Json(booking))
}

/// Payment gateway callback for a failed charge: the booking fails and its
/// seats return to the pool.
async fn fail_payment(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(booking_id): Path<i64>,
    Json(req): Json<FailPaymentRequest>,
) -> Result<Json<Booking>, AppError> {
    owned_booking(&state, booking_id, &user_id).await?;
    let booking = state.finalizer.fail_payment(booking_id, req.payment_id.as_deref()).await?;
    Ok(Json(booking))
}

async fn cancel_booking(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(booking_id): Path<i64>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.finalizer.cancel_booking(booking_id, &user_id).await?;
    Ok(Json(booking))
}

async fn owned_booking(state: &AppState, booking_id: i64, user_id: &str) -> Result<Booking, AppError> {
    let booking = state
        .finalizer
        .get_booking(booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} not found")))?;
    if booking.user_id != user_id {
        return Err(AppError::Forbidden("booking belongs to another user".to_string()));
    }
    Ok(booking)
}
