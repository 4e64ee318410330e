use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use aerobook_core::models::{
    BookingId, Flight, FlightId, FlightStatus, NewTicket, Ticket, TicketId, TicketStatus,
    TicketTypeId,
};
use aerobook_core::repository::{Store, StoreTx};
use aerobook_core::{CoreError, CoreResult};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::pricing::Fare;

/// Outcome of seat inventory generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    pub created: u64,
    pub existing: u64,
}

impl GenerationReport {
    pub fn total(&self) -> u64 {
        self.created + self.existing
    }
}

/// Tickets moved to BOOKED for one booking, with their fares at that moment.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub booking_id: BookingId,
    pub tickets: Vec<Ticket>,
    pub fares: Vec<Fare>,
}

impl Reservation {
    pub fn ticket_ids(&self) -> Vec<TicketId> {
        self.tickets.iter().map(|t| t.id).collect()
    }
}

/// Held tickets of a canceled flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VoidedSeats {
    /// Were BOOKED, now AVAILABLE.
    pub released: Vec<TicketId>,
    /// Were PAID, now CANCELED until refunded.
    pub refund_pending: Vec<TicketId>,
}

impl VoidedSeats {
    pub fn all(&self) -> Vec<TicketId> {
        let mut ids: Vec<TicketId> = self
            .released
            .iter()
            .chain(self.refund_pending.iter())
            .copied()
            .collect();
        ids.sort();
        ids
    }
}

/// Authoritative per-seat ticket state.
///
/// Every ticket status change goes through this type. The `*_within`
/// variants join a caller's transaction; the others run in their own.
#[derive(Clone)]
pub struct SeatLedger {
    store: Arc<dyn Store>,
}

/// Three-digit seat label, `1` -> `"001"`.
pub fn seat_label(seat: i32) -> String {
    format!("{:03}", seat)
}

/// Sorts ids ascending. Empty input and repeated ids are rejected.
fn normalize(ids: &[TicketId]) -> CoreResult<Vec<TicketId>> {
    if ids.is_empty() {
        return Err(CoreError::Validation("ticket list is empty".to_string()));
    }
    let unique: BTreeSet<TicketId> = ids.iter().copied().collect();
    if unique.len() != ids.len() {
        return Err(CoreError::Validation(
            "ticket list contains duplicates".to_string(),
        ));
    }
    Ok(unique.into_iter().collect())
}

fn missing_ids(wanted: &[TicketId], found: &[Ticket]) -> Vec<TicketId> {
    let found: BTreeSet<TicketId> = found.iter().map(|t| t.id).collect();
    wanted
        .iter()
        .filter(|id| !found.contains(*id))
        .copied()
        .collect()
}

impl SeatLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Creates one AVAILABLE ticket per seat and ticket type. Safe to call
    /// again: existing (seat, type) pairs are left alone.
    pub async fn generate(&self, flight_id: FlightId) -> CoreResult<GenerationReport> {
        let mut tx = self.store.begin().await?;
        let report = self.generate_within(tx.as_mut(), flight_id).await?;
        tx.commit().await?;
        Ok(report)
    }

    pub async fn generate_within(
        &self,
        tx: &mut dyn StoreTx,
        flight_id: FlightId,
    ) -> CoreResult<GenerationReport> {
        let flight = tx
            .flight(flight_id)
            .await?
            .ok_or(CoreError::FlightNotFound(flight_id))?;
        let airplane = tx
            .airplane(flight.airplane_id)
            .await?
            .ok_or(CoreError::AirplaneNotFound(flight.airplane_id))?;
        if airplane.seat_capacity <= 0 {
            return Err(CoreError::InvalidCapacity(airplane.seat_capacity));
        }
        let ticket_types = tx.ticket_types().await?;
        if ticket_types.is_empty() {
            return Err(CoreError::NoTicketTypesConfigured);
        }

        let tickets: Vec<NewTicket> = (1..=airplane.seat_capacity)
            .flat_map(|seat| {
                ticket_types.iter().map(move |tt| NewTicket {
                    flight_id,
                    ticket_type_id: tt.id,
                    seat_number: seat_label(seat),
                })
            })
            .collect();
        let requested = tickets.len() as u64;
        let created = tx.insert_tickets(&tickets).await?;

        tracing::info!(
            flight_id = %flight_id,
            created,
            existing = requested - created,
            "Generated seat inventory"
        );

        Ok(GenerationReport {
            created,
            existing: requested - created,
        })
    }

    /// Moves every ticket from AVAILABLE to BOOKED and links it to the
    /// booking, or changes nothing.
    pub async fn reserve(
        &self,
        ticket_ids: &[TicketId],
        booking_id: BookingId,
    ) -> CoreResult<Reservation> {
        let mut tx = self.store.begin().await?;
        let reservation = self.reserve_within(tx.as_mut(), ticket_ids, booking_id).await?;
        tx.commit().await?;
        Ok(reservation)
    }

    pub async fn reserve_within(
        &self,
        tx: &mut dyn StoreTx,
        ticket_ids: &[TicketId],
        booking_id: BookingId,
    ) -> CoreResult<Reservation> {
        let ids = normalize(ticket_ids)?;

        // Flights are locked before tickets, and a canceled flight sells nothing.
        let preview = tx.tickets(&ids).await?;
        let missing = missing_ids(&ids, &preview);
        if !missing.is_empty() {
            return Err(CoreError::TicketsNotFound(missing));
        }
        let flight_ids: Vec<FlightId> = preview
            .iter()
            .map(|t| t.flight_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let flights: HashMap<FlightId, Flight> = tx
            .lock_flights_shared(&flight_ids)
            .await?
            .into_iter()
            .map(|f| (f.id, f))
            .collect();
        if let Some(flight) = flights.values().find(|f| f.status == FlightStatus::Canceled) {
            tracing::warn!(flight_id = %flight.id, "Reservation on canceled flight refused");
            return Err(CoreError::InvalidOperation(format!(
                "flight {} is canceled",
                flight.id
            )));
        }

        let locked = tx.lock_tickets(&ids).await?;
        let missing = missing_ids(&ids, &locked);
        if !missing.is_empty() {
            return Err(CoreError::TicketsNotFound(missing));
        }
        let conflicting: Vec<TicketId> = locked
            .iter()
            .filter(|t| t.status != TicketStatus::Available)
            .map(|t| t.id)
            .collect();
        if !conflicting.is_empty() {
            tracing::warn!(
                booking_id = %booking_id,
                conflicting = ?conflicting,
                "Tickets unavailable"
            );
            return Err(CoreError::TicketsUnavailable(conflicting));
        }

        let multipliers: HashMap<TicketTypeId, Decimal> = tx
            .ticket_types()
            .await?
            .into_iter()
            .map(|tt| (tt.id, tt.price_multiplier))
            .collect();
        let mut fares = Vec::with_capacity(locked.len());
        for ticket in &locked {
            let flight = flights
                .get(&ticket.flight_id)
                .ok_or(CoreError::FlightNotFound(ticket.flight_id))?;
            let multiplier = multipliers
                .get(&ticket.ticket_type_id)
                .copied()
                .ok_or(CoreError::TicketTypeNotFound(ticket.ticket_type_id))?;
            fares.push(Fare::new(ticket.id, flight.base_price, multiplier));
        }

        tx.set_ticket_status(&ids, TicketStatus::Booked).await?;
        tx.link_tickets(booking_id, &ids).await?;

        let tickets = locked
            .into_iter()
            .map(|mut t| {
                t.status = TicketStatus::Booked;
                t
            })
            .collect();

        tracing::debug!(booking_id = %booking_id, count = ids.len(), "Reserved tickets");

        Ok(Reservation {
            booking_id,
            tickets,
            fares,
        })
    }

    /// Returns held tickets to AVAILABLE. Already AVAILABLE tickets are a
    /// no-op and CANCELED tickets (refund pending) are left alone. Returns
    /// the ids that actually changed.
    pub async fn release(&self, ticket_ids: &[TicketId]) -> CoreResult<Vec<TicketId>> {
        let mut tx = self.store.begin().await?;
        let released = self.release_within(tx.as_mut(), ticket_ids).await?;
        tx.commit().await?;
        Ok(released)
    }

    pub async fn release_within(
        &self,
        tx: &mut dyn StoreTx,
        ticket_ids: &[TicketId],
    ) -> CoreResult<Vec<TicketId>> {
        if ticket_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<TicketId> = ticket_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let held: Vec<TicketId> = tx
            .lock_tickets(&ids)
            .await?
            .into_iter()
            .filter(|t| t.status.is_held())
            .map(|t| t.id)
            .collect();
        if !held.is_empty() {
            tx.set_ticket_status(&held, TicketStatus::Available).await?;
            tracing::debug!(count = held.len(), "Released tickets");
        }
        Ok(held)
    }

    /// BOOKED -> PAID for every ticket, or nothing.
    pub async fn confirm_paid(&self, ticket_ids: &[TicketId]) -> CoreResult<()> {
        let mut tx = self.store.begin().await?;
        self.confirm_paid_within(tx.as_mut(), ticket_ids).await?;
        tx.commit().await
    }

    pub async fn confirm_paid_within(
        &self,
        tx: &mut dyn StoreTx,
        ticket_ids: &[TicketId],
    ) -> CoreResult<()> {
        let ids = normalize(ticket_ids)?;
        let locked = tx.lock_tickets(&ids).await?;
        let missing = missing_ids(&ids, &locked);
        if !missing.is_empty() {
            return Err(CoreError::TicketsNotFound(missing));
        }
        if let Some(ticket) = locked.iter().find(|t| t.status != TicketStatus::Booked) {
            return Err(CoreError::InvalidTicketState {
                ticket_id: ticket.id,
                actual: ticket.status,
                expected: TicketStatus::Booked,
            });
        }
        tx.set_ticket_status(&ids, TicketStatus::Paid).await
    }

    /// Takes every held ticket of a flight out of circulation. BOOKED seats
    /// go back to AVAILABLE, PAID seats become CANCELED pending refund.
    /// The caller must already hold the flight lock.
    pub async fn void_flight_within(
        &self,
        tx: &mut dyn StoreTx,
        flight_id: FlightId,
    ) -> CoreResult<VoidedSeats> {
        let held = tx
            .lock_flight_tickets(flight_id, &[TicketStatus::Booked, TicketStatus::Paid])
            .await?;
        let mut voided = VoidedSeats::default();
        for ticket in held {
            match ticket.status {
                TicketStatus::Booked => voided.released.push(ticket.id),
                TicketStatus::Paid => voided.refund_pending.push(ticket.id),
                _ => {}
            }
        }
        if !voided.released.is_empty() {
            tx.set_ticket_status(&voided.released, TicketStatus::Available)
                .await?;
        }
        if !voided.refund_pending.is_empty() {
            tx.set_ticket_status(&voided.refund_pending, TicketStatus::Canceled)
                .await?;
        }
        Ok(voided)
    }

    /// Deletes a flight's tickets. Refused while any seat is held.
    pub async fn remove_flight_inventory_within(
        &self,
        tx: &mut dyn StoreTx,
        flight_id: FlightId,
    ) -> CoreResult<u64> {
        let held = tx
            .lock_flight_tickets(flight_id, &[TicketStatus::Booked, TicketStatus::Paid])
            .await?;
        if !held.is_empty() {
            return Err(CoreError::InvalidOperation(format!(
                "flight {} still has {} booked or paid tickets",
                flight_id,
                held.len()
            )));
        }
        tx.delete_flight_tickets(flight_id).await
    }

    pub async fn tickets(&self, ticket_ids: &[TicketId]) -> CoreResult<Vec<Ticket>> {
        let mut tx = self.store.begin().await?;
        tx.tickets(ticket_ids).await
    }

    /// Customer view: bookable tickets only.
    pub async fn available_tickets(&self, flight_id: FlightId) -> CoreResult<Vec<Ticket>> {
        let tickets = self.flight_tickets(flight_id).await?;
        Ok(tickets
            .into_iter()
            .filter(|t| t.status == TicketStatus::Available)
            .collect())
    }

    /// Manager view: every ticket of the flight.
    pub async fn flight_tickets(&self, flight_id: FlightId) -> CoreResult<Vec<Ticket>> {
        let mut tx = self.store.begin().await?;
        tx.flight(flight_id)
            .await?
            .ok_or(CoreError::FlightNotFound(flight_id))?;
        tx.flight_tickets(flight_id).await
    }

    pub async fn is_seat_available(&self, flight_id: FlightId, seat_number: &str) -> CoreResult<bool> {
        let tickets = self.flight_tickets(flight_id).await?;
        Ok(tickets
            .iter()
            .any(|t| t.seat_number == seat_number && t.status == TicketStatus::Available))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_labels_are_zero_padded() {
        assert_eq!(seat_label(1), "001");
        assert_eq!(seat_label(42), "042");
        assert_eq!(seat_label(180), "180");
    }

    #[test]
    fn test_normalize_sorts_and_rejects_duplicates() {
        let ids = normalize(&[TicketId(5), TicketId(2), TicketId(9)]).unwrap();
        assert_eq!(ids, vec![TicketId(2), TicketId(5), TicketId(9)]);
        assert!(matches!(
            normalize(&[TicketId(1), TicketId(1)]),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(normalize(&[]), Err(CoreError::Validation(_))));
    }
}
