use aerobook_core::identity::Principal;
use aerobook_core::models::{BookingId, Payment, PaymentId, PaymentMethod, PaymentStatus};
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub booking_id: BookingId,
    pub method: PaymentMethod,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentStatusRequest {
    pub status: PaymentStatus,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments", post(create_payment))
        .route("/v1/payments/{id}", get(get_payment))
        .route("/v1/payments/{id}/cancel", post(cancel_payment))
        .route("/v1/payments/{id}/status", patch(update_payment_status))
        .route(
            "/v1/payments/transactions/{transaction_id}",
            get(get_by_transaction),
        )
        .route("/v1/bookings/{id}/payments", get(list_for_booking))
}

async fn authorize_booking(
    state: &AppState,
    principal: &Principal,
    booking_id: BookingId,
) -> Result<(), AppError> {
    let summary = state.bookings.get(booking_id).await?;
    principal.authorize_booking_access(&summary.booking)?;
    Ok(())
}

async fn authorized_payment(
    state: &AppState,
    principal: &Principal,
    id: PaymentId,
) -> Result<Payment, AppError> {
    let payment = state.payments.get(id).await?;
    authorize_booking(state, principal, payment.booking_id).await?;
    Ok(payment)
}

/// A declined charge is still a recorded attempt: 201 with status FAILED.
async fn create_payment(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    authorize_booking(&state, &principal, req.booking_id).await?;
    let payment = state
        .payments
        .create_payment(req.booking_id, req.method)
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

async fn get_payment(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<PaymentId>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(authorized_payment(&state, &principal, id).await?))
}

async fn get_by_transaction(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(transaction_id): Path<String>,
) -> Result<Json<Payment>, AppError> {
    let payment = state.payments.by_transaction_id(&transaction_id).await?;
    authorize_booking(&state, &principal, payment.booking_id).await?;
    Ok(Json(payment))
}

async fn list_for_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<BookingId>,
) -> Result<Json<Vec<Payment>>, AppError> {
    authorize_booking(&state, &principal, id).await?;
    Ok(Json(state.payments.list_for_booking(id).await?))
}

async fn cancel_payment(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<PaymentId>,
) -> Result<Json<Payment>, AppError> {
    principal.require_staff()?;
    authorized_payment(&state, &principal, id).await?;
    Ok(Json(state.payments.cancel_payment(id).await?))
}

async fn update_payment_status(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<PaymentId>,
    Json(req): Json<UpdatePaymentStatusRequest>,
) -> Result<Json<Payment>, AppError> {
    let grant = principal.require_admin()?;
    Ok(Json(
        state.payments.update_status(grant, id, req.status).await?,
    ))
}
