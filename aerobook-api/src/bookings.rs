use aerobook_booking::{BookingSummary, BookingUpdate, StatusOverride};
use aerobook_core::identity::Principal;
use aerobook_core::models::{Booking, BookingId, BookingStatus, Ticket, TicketId, UserId};
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    /// Staff may book on behalf of a customer; defaults to the caller.
    pub user_id: Option<UserId>,
    pub ticket_ids: Vec<TicketId>,
    pub booking_date: Option<NaiveDateTime>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBookingRequest {
    pub booking_date: Option<NaiveDateTime>,
    pub status: Option<BookingStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ListBookingsQuery {
    pub status: Option<BookingStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBookingQuery {
    pub reason: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking).get(list_bookings))
        .route(
            "/v1/bookings/{id}",
            get(get_booking).patch(update_booking).delete(delete_booking),
        )
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/bookings/{id}/tickets", get(booking_tickets))
}

/// Loads the booking and checks the caller may touch it.
async fn authorized(
    state: &AppState,
    principal: &Principal,
    id: BookingId,
) -> Result<BookingSummary, AppError> {
    let summary = state.bookings.get(id).await?;
    principal.authorize_booking_access(&summary.booking)?;
    Ok(summary)
}

async fn create_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingSummary>), AppError> {
    let user_id = req.user_id.unwrap_or(principal.user_id);
    principal.authorize_user(user_id)?;

    let summary = state
        .bookings
        .create(user_id, &req.ticket_ids, req.booking_date)
        .await?;
    info!(booking = %summary.reference, by = %principal.username, "Booking created over HTTP");
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn list_bookings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ListBookingsQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let bookings = match query.status {
        Some(status) => {
            principal.require_staff()?;
            state.bookings.list_by_status(status).await?
        }
        None => state.bookings.list_for_user(principal.user_id).await?,
    };
    Ok(Json(bookings))
}

async fn get_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<BookingId>,
) -> Result<Json<BookingSummary>, AppError> {
    Ok(Json(authorized(&state, &principal, id).await?))
}

async fn update_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<BookingId>,
    Json(req): Json<UpdateBookingRequest>,
) -> Result<Json<BookingSummary>, AppError> {
    principal.require_staff()?;
    authorized(&state, &principal, id).await?;

    let status = match req.status {
        Some(status) => Some(StatusOverride::new(principal.require_admin()?, status)),
        None => None,
    };
    let summary = state
        .bookings
        .update(
            id,
            BookingUpdate {
                booking_date: req.booking_date,
                status,
            },
        )
        .await?;
    Ok(Json(summary))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<BookingId>,
    Query(req): Query<CancelBookingQuery>,
) -> Result<Json<BookingSummary>, AppError> {
    authorized(&state, &principal, id).await?;
    let reason = req
        .reason
        .unwrap_or_else(|| format!("canceled by {}", principal.username));
    Ok(Json(state.bookings.cancel(id, &reason).await?))
}

async fn delete_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<BookingId>,
) -> Result<StatusCode, AppError> {
    principal.require_staff()?;
    authorized(&state, &principal, id).await?;
    state.bookings.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn booking_tickets(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<BookingId>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    authorized(&state, &principal, id).await?;
    Ok(Json(state.bookings.tickets_of(id).await?))
}
