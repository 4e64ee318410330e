use std::sync::Arc;

use aerobook_core::events::EventPublisher;
use aerobook_core::models::{
    BookingId, Flight, FlightId, FlightStatus, NewFlight, PaymentId, TicketId,
};
use aerobook_core::repository::Store;
use aerobook_core::{CoreError, CoreResult};
use aerobook_inventory::{GenerationReport, SeatLedger};
use aerobook_shared::DomainEvent;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::bookings::BookingOrchestrator;

/// Everything a flight status change touched.
#[derive(Debug, Clone, Serialize)]
pub struct CascadeReport {
    pub flight: Flight,
    pub previous_status: FlightStatus,
    pub released_tickets: Vec<TicketId>,
    /// PAID seats taken out of inventory until their payment is refunded.
    pub refund_pending_tickets: Vec<TicketId>,
    pub canceled_bookings: Vec<BookingId>,
    pub refunds: Vec<PaymentId>,
}

impl CascadeReport {
    fn unchanged(flight: Flight) -> Self {
        Self {
            previous_status: flight.status,
            flight,
            released_tickets: Vec::new(),
            refund_pending_tickets: Vec::new(),
            canceled_bookings: Vec::new(),
            refunds: Vec::new(),
        }
    }
}

/// Propagates flight status changes into tickets and bookings.
pub struct FlightLifecycleManager {
    store: Arc<dyn Store>,
    ledger: SeatLedger,
    bookings: Arc<BookingOrchestrator>,
    events: Arc<dyn EventPublisher>,
}

impl FlightLifecycleManager {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: SeatLedger,
        bookings: Arc<BookingOrchestrator>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            ledger,
            bookings,
            events,
        }
    }

    /// Stores a SCHEDULED flight and its seat inventory together.
    pub async fn create_flight(&self, new: NewFlight) -> CoreResult<(Flight, GenerationReport)> {
        new.validate()?;
        self.store.airplane(new.airplane_id).await?;
        self.store.airport(new.departure_airport_id).await?;
        self.store.airport(new.arrival_airport_id).await?;

        let mut tx = self.store.begin().await?;
        let flight = tx.insert_flight(&new).await?;
        let report = self.ledger.generate_within(tx.as_mut(), flight.id).await?;
        tx.commit().await?;

        info!(flight_id = %flight.id, tickets = report.total(), "Flight created");
        Ok((flight, report))
    }

    pub async fn get(&self, id: FlightId) -> CoreResult<Flight> {
        let mut tx = self.store.begin().await?;
        tx.flight(id).await?.ok_or(CoreError::FlightNotFound(id))
    }

    /// Applies a status change. Moving into CANCELED voids every held seat
    /// and cancels every active booking holding one, all in one
    /// transaction: either the whole cascade commits or none of it does.
    pub async fn update_status(&self, id: FlightId, status: FlightStatus) -> CoreResult<CascadeReport> {
        let mut tx = self.store.begin().await?;
        let flight = tx
            .lock_flight(id)
            .await?
            .ok_or(CoreError::FlightNotFound(id))?;

        if flight.status == status {
            return Ok(CascadeReport::unchanged(flight));
        }
        if !flight.status.can_transition_to(status) {
            warn!(flight_id = %id, from = %flight.status, to = %status, "Flight transition refused");
            return Err(CoreError::InvalidOperation(format!(
                "flight {} cannot move from {} to {}",
                id, flight.status, status
            )));
        }

        let previous_status = flight.status;
        let mut report = CascadeReport::unchanged(flight);
        report.previous_status = previous_status;
        let mut events = Vec::new();

        if status == FlightStatus::Canceled {
            let voided = self.ledger.void_flight_within(tx.as_mut(), id).await?;
            let holders = tx.lock_active_bookings_holding(&voided.all()).await?;

            for holder in holders {
                let cancellation = self.bookings.cancel_within(tx.as_mut(), holder.id).await?;
                events.extend(cancellation.events(&format!("flight {} canceled", id)));
                report.canceled_bookings.push(holder.id);
                report
                    .refunds
                    .extend(cancellation.refunds.iter().map(|payment| payment.id));
            }

            report.released_tickets = voided.released;
            report.refund_pending_tickets = voided.refund_pending;
        }

        report.flight = tx.set_flight_status(id, status).await?;
        tx.commit().await?;

        info!(
            flight_id = %id,
            from = %previous_status,
            to = %status,
            released = report.released_tickets.len(),
            refund_pending = report.refund_pending_tickets.len(),
            bookings = report.canceled_bookings.len(),
            "Flight status changed"
        );
        self.events.publish(DomainEvent::FlightStatusChanged {
            flight_id: id.0,
            from: previous_status.to_string(),
            to: status.to_string(),
            timestamp: Utc::now(),
        });
        for event in events {
            self.events.publish(event);
        }
        Ok(report)
    }

    pub async fn cancel_flight(&self, id: FlightId) -> CoreResult<CascadeReport> {
        self.update_status(id, FlightStatus::Canceled).await
    }

    /// Deletes the flight with its tickets. Refused while a seat is held.
    pub async fn delete_flight(&self, id: FlightId) -> CoreResult<()> {
        let mut tx = self.store.begin().await?;
        tx.lock_flight(id)
            .await?
            .ok_or(CoreError::FlightNotFound(id))?;
        let removed = self
            .ledger
            .remove_flight_inventory_within(tx.as_mut(), id)
            .await?;
        tx.delete_flight(id).await?;
        tx.commit().await?;

        info!(flight_id = %id, tickets = removed, "Flight deleted");
        Ok(())
    }
}
