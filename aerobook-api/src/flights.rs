use aerobook_booking::CascadeReport;
use aerobook_core::identity::Principal;
use aerobook_core::models::{Flight, FlightId, FlightStatus, NewFlight, Ticket};
use aerobook_inventory::GenerationReport;
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CreatedFlight {
    pub flight: Flight,
    pub inventory: GenerationReport,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFlightStatusRequest {
    pub status: FlightStatus,
}

#[derive(Debug, Deserialize)]
pub struct TicketsQuery {
    /// `all` for the manager view; customers only ever see AVAILABLE seats.
    pub view: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/flights", post(create_flight))
        .route("/v1/flights/{id}", get(get_flight).delete(delete_flight))
        .route("/v1/flights/{id}/tickets", get(list_tickets))
        .route("/v1/flights/{id}/status", put(update_status))
        .route("/v1/flights/{id}/seats/{seat}", get(seat_availability))
}

async fn create_flight(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<NewFlight>,
) -> Result<(StatusCode, Json<CreatedFlight>), AppError> {
    principal.require_staff()?;
    let (flight, inventory) = state.flights.create_flight(req).await?;
    Ok((StatusCode::CREATED, Json(CreatedFlight { flight, inventory })))
}

async fn get_flight(
    State(state): State<AppState>,
    Path(id): Path<FlightId>,
) -> Result<Json<Flight>, AppError> {
    Ok(Json(state.flights.get(id).await?))
}

async fn list_tickets(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<FlightId>,
    Query(query): Query<TicketsQuery>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    let tickets = if query.view.as_deref() == Some("all") {
        principal.require_staff()?;
        state.ledger.flight_tickets(id).await?
    } else {
        state.ledger.available_tickets(id).await?
    };
    Ok(Json(tickets))
}

async fn seat_availability(
    State(state): State<AppState>,
    Path((id, seat)): Path<(FlightId, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let available = state.ledger.is_seat_available(id, &seat).await?;
    Ok(Json(serde_json::json!({
        "flight_id": id,
        "seat_number": seat,
        "available": available,
    })))
}

async fn update_status(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<FlightId>,
    Json(req): Json<UpdateFlightStatusRequest>,
) -> Result<Json<CascadeReport>, AppError> {
    principal.require_staff()?;
    Ok(Json(state.flights.update_status(id, req.status).await?))
}

async fn delete_flight(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<FlightId>,
) -> Result<StatusCode, AppError> {
    principal.require_staff()?;
    state.flights.delete_flight(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
