//! In-process store for tests and local runs.
//!
//! All transactional state sits behind one async mutex. A transaction holds
//! the lock for its whole lifetime and mutates a staged copy that replaces
//! the shared state on commit, so transactions are fully serialized and a
//! dropped transaction leaves no trace.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use aerobook_core::models::*;
use aerobook_core::repository::{ReferenceData, Store, StoreTx, UserDirectory};
use aerobook_core::{CoreError, CoreResult};
use aerobook_shared::Masked;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    flights: BTreeMap<FlightId, Flight>,
    tickets: BTreeMap<TicketId, Ticket>,
    bookings: BTreeMap<BookingId, Booking>,
    booking_tickets: BTreeSet<(BookingId, TicketId)>,
    payments: BTreeMap<PaymentId, Payment>,
    last_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

/// Reference data and users. Kept apart from the transactional state so
/// lookups never wait on an open transaction.
#[derive(Debug, Default)]
struct Catalog {
    airplanes: BTreeMap<AirplaneId, Airplane>,
    airports: BTreeMap<AirportId, Airport>,
    ticket_types: BTreeMap<TicketTypeId, TicketType>,
    users: BTreeMap<UserId, User>,
    last_id: i64,
}

impl Catalog {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    catalog: Arc<RwLock<Catalog>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_airplane(&self, model: &str, seat_capacity: i32) -> Airplane {
        let mut catalog = self.catalog.write().await;
        let airplane = Airplane {
            id: AirplaneId(catalog.next_id()),
            model: model.to_string(),
            seat_capacity,
            airline: "AeroBook".to_string(),
        };
        catalog.airplanes.insert(airplane.id, airplane.clone());
        airplane
    }

    pub async fn add_airport(&self, code: &str, city: &str) -> Airport {
        let mut catalog = self.catalog.write().await;
        let airport = Airport {
            id: AirportId(catalog.next_id()),
            code: code.to_string(),
            name: format!("{} International", city),
            city: city.to_string(),
            country: "VN".to_string(),
        };
        catalog.airports.insert(airport.id, airport.clone());
        airport
    }

    pub async fn add_ticket_type(&self, name: &str, price_multiplier: Decimal) -> TicketType {
        let mut catalog = self.catalog.write().await;
        let ticket_type = TicketType {
            id: TicketTypeId(catalog.next_id()),
            name: name.to_string(),
            price_multiplier,
        };
        catalog.ticket_types.insert(ticket_type.id, ticket_type.clone());
        ticket_type
    }

    pub async fn set_price_multiplier(
        &self,
        id: TicketTypeId,
        price_multiplier: Decimal,
    ) -> CoreResult<()> {
        let mut catalog = self.catalog.write().await;
        let ticket_type = catalog
            .ticket_types
            .get_mut(&id)
            .ok_or(CoreError::TicketTypeNotFound(id))?;
        ticket_type.price_multiplier = price_multiplier;
        Ok(())
    }

    pub async fn add_user(&self, username: &str, email: &str) -> User {
        let mut catalog = self.catalog.write().await;
        let user = User {
            id: UserId(catalog.next_id()),
            username: username.to_string(),
            email: Masked(email.to_string()),
        };
        catalog.users.insert(user.id, user.clone());
        user
    }

    /// Edits a flight's base price outside any booking flow.
    pub async fn set_base_price(&self, id: FlightId, base_price: Decimal) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        let flight = state
            .flights
            .get_mut(&id)
            .ok_or(CoreError::FlightNotFound(id))?;
        flight.base_price = base_price;
        flight.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ReferenceData for MemoryStore {
    async fn airplane(&self, id: AirplaneId) -> CoreResult<Airplane> {
        self.catalog
            .read()
            .await
            .airplanes
            .get(&id)
            .cloned()
            .ok_or(CoreError::AirplaneNotFound(id))
    }

    async fn airport(&self, id: AirportId) -> CoreResult<Airport> {
        self.catalog
            .read()
            .await
            .airports
            .get(&id)
            .cloned()
            .ok_or(CoreError::AirportNotFound(id))
    }

    async fn ticket_type(&self, id: TicketTypeId) -> CoreResult<TicketType> {
        self.catalog
            .read()
            .await
            .ticket_types
            .get(&id)
            .cloned()
            .ok_or(CoreError::TicketTypeNotFound(id))
    }

    async fn ticket_types(&self) -> CoreResult<Vec<TicketType>> {
        Ok(self.catalog.read().await.ticket_types.values().cloned().collect())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn user(&self, id: UserId) -> CoreResult<User> {
        self.catalog
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::UserNotFound(id.to_string()))
    }

    async fn user_by_username(&self, username: &str) -> CoreResult<User> {
        self.catalog
            .read()
            .await
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| CoreError::UserNotFound(username.to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> CoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx {
            guard: Some(guard),
            staged,
            catalog: self.catalog.clone(),
        }))
    }
}

pub struct MemoryTx {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    staged: MemoryState,
    catalog: Arc<RwLock<Catalog>>,
}

impl MemoryTx {
    fn state(&mut self) -> CoreResult<&mut MemoryState> {
        if self.guard.is_none() {
            return Err(CoreError::Storage("transaction already committed".to_string()));
        }
        Ok(&mut self.staged)
    }
}

fn id_set<T: Ord + Copy>(ids: &[T]) -> BTreeSet<T> {
    ids.iter().copied().collect()
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn airplane(&mut self, id: AirplaneId) -> CoreResult<Option<Airplane>> {
        self.state()?;
        Ok(self.catalog.read().await.airplanes.get(&id).cloned())
    }

    async fn ticket_types(&mut self) -> CoreResult<Vec<TicketType>> {
        self.state()?;
        Ok(self.catalog.read().await.ticket_types.values().cloned().collect())
    }

    async fn flight(&mut self, id: FlightId) -> CoreResult<Option<Flight>> {
        Ok(self.state()?.flights.get(&id).cloned())
    }

    async fn lock_flight(&mut self, id: FlightId) -> CoreResult<Option<Flight>> {
        self.flight(id).await
    }

    async fn lock_flights_shared(&mut self, ids: &[FlightId]) -> CoreResult<Vec<Flight>> {
        let state = self.state()?;
        Ok(id_set(ids)
            .into_iter()
            .filter_map(|id| state.flights.get(&id).cloned())
            .collect())
    }

    async fn insert_flight(&mut self, flight: &NewFlight) -> CoreResult<Flight> {
        let state = self.state()?;
        let now = Utc::now();
        let flight = Flight {
            id: FlightId(state.next_id()),
            airplane_id: flight.airplane_id,
            departure_airport_id: flight.departure_airport_id,
            arrival_airport_id: flight.arrival_airport_id,
            departure_time: flight.departure_time,
            arrival_time: flight.arrival_time,
            base_price: flight.base_price,
            status: FlightStatus::Scheduled,
            created_at: now,
            updated_at: now,
        };
        state.flights.insert(flight.id, flight.clone());
        Ok(flight)
    }

    async fn set_flight_status(&mut self, id: FlightId, status: FlightStatus) -> CoreResult<Flight> {
        let flight = self
            .state()?
            .flights
            .get_mut(&id)
            .ok_or(CoreError::FlightNotFound(id))?;
        flight.status = status;
        flight.updated_at = Utc::now();
        Ok(flight.clone())
    }

    async fn delete_flight(&mut self, id: FlightId) -> CoreResult<()> {
        let state = self.state()?;
        if state.tickets.values().any(|t| t.flight_id == id) {
            return Err(CoreError::Storage(format!(
                "flight {} is still referenced by tickets",
                id
            )));
        }
        state.flights.remove(&id);
        Ok(())
    }

    async fn tickets(&mut self, ids: &[TicketId]) -> CoreResult<Vec<Ticket>> {
        let state = self.state()?;
        Ok(id_set(ids)
            .into_iter()
            .filter_map(|id| state.tickets.get(&id).cloned())
            .collect())
    }

    async fn lock_tickets(&mut self, ids: &[TicketId]) -> CoreResult<Vec<Ticket>> {
        self.tickets(ids).await
    }

    async fn flight_tickets(&mut self, flight_id: FlightId) -> CoreResult<Vec<Ticket>> {
        Ok(self
            .state()?
            .tickets
            .values()
            .filter(|t| t.flight_id == flight_id)
            .cloned()
            .collect())
    }

    async fn lock_flight_tickets(
        &mut self,
        flight_id: FlightId,
        statuses: &[TicketStatus],
    ) -> CoreResult<Vec<Ticket>> {
        Ok(self
            .state()?
            .tickets
            .values()
            .filter(|t| t.flight_id == flight_id && statuses.contains(&t.status))
            .cloned()
            .collect())
    }

    async fn insert_tickets(&mut self, tickets: &[NewTicket]) -> CoreResult<u64> {
        let state = self.state()?;
        let mut existing: HashSet<(FlightId, String, TicketTypeId)> = state
            .tickets
            .values()
            .map(|t| (t.flight_id, t.seat_number.clone(), t.ticket_type_id))
            .collect();
        let now = Utc::now();
        let mut created = 0;
        for new in tickets {
            if !existing.insert((new.flight_id, new.seat_number.clone(), new.ticket_type_id)) {
                continue;
            }
            let ticket = Ticket {
                id: TicketId(state.next_id()),
                flight_id: new.flight_id,
                ticket_type_id: new.ticket_type_id,
                seat_number: new.seat_number.clone(),
                status: TicketStatus::Available,
                updated_at: now,
            };
            state.tickets.insert(ticket.id, ticket);
            created += 1;
        }
        Ok(created)
    }

    async fn set_ticket_status(&mut self, ids: &[TicketId], status: TicketStatus) -> CoreResult<()> {
        let state = self.state()?;
        let now = Utc::now();
        for id in ids {
            if let Some(ticket) = state.tickets.get_mut(id) {
                ticket.status = status;
                ticket.updated_at = now;
            }
        }
        Ok(())
    }

    async fn delete_flight_tickets(&mut self, flight_id: FlightId) -> CoreResult<u64> {
        let state = self.state()?;
        let doomed: BTreeSet<TicketId> = state
            .tickets
            .values()
            .filter(|t| t.flight_id == flight_id)
            .map(|t| t.id)
            .collect();
        state.tickets.retain(|id, _| !doomed.contains(id));
        state
            .booking_tickets
            .retain(|(_, ticket_id)| !doomed.contains(ticket_id));
        Ok(doomed.len() as u64)
    }

    async fn booking(&mut self, id: BookingId) -> CoreResult<Option<Booking>> {
        Ok(self.state()?.bookings.get(&id).cloned())
    }

    async fn lock_booking(&mut self, id: BookingId) -> CoreResult<Option<Booking>> {
        self.booking(id).await
    }

    async fn bookings_for_user(&mut self, user_id: UserId) -> CoreResult<Vec<Booking>> {
        Ok(self
            .state()?
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn bookings_by_status(&mut self, status: BookingStatus) -> CoreResult<Vec<Booking>> {
        Ok(self
            .state()?
            .bookings
            .values()
            .filter(|b| b.status == status)
            .cloned()
            .collect())
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> CoreResult<Booking> {
        let state = self.state()?;
        let now = Utc::now();
        let booking = Booking {
            id: BookingId(state.next_id()),
            user_id: booking.user_id,
            booking_date: booking.booking_date,
            total_amount: Decimal::ZERO,
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        state.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn update_booking(&mut self, booking: &Booking) -> CoreResult<Booking> {
        let state = self.state()?;
        let stored = state
            .bookings
            .get_mut(&booking.id)
            .ok_or(CoreError::BookingNotFound(booking.id))?;
        *stored = Booking {
            updated_at: Utc::now(),
            ..booking.clone()
        };
        Ok(stored.clone())
    }

    async fn delete_booking(&mut self, id: BookingId) -> CoreResult<()> {
        let state = self.state()?;
        state.bookings.remove(&id);
        state.booking_tickets.retain(|(booking_id, _)| *booking_id != id);
        state.payments.retain(|_, p| p.booking_id != id);
        Ok(())
    }

    async fn link_tickets(&mut self, booking_id: BookingId, ticket_ids: &[TicketId]) -> CoreResult<()> {
        let state = self.state()?;
        if !state.bookings.contains_key(&booking_id) {
            return Err(CoreError::BookingNotFound(booking_id));
        }
        for ticket_id in ticket_ids {
            state.booking_tickets.insert((booking_id, *ticket_id));
        }
        Ok(())
    }

    async fn booking_ticket_ids(&mut self, booking_id: BookingId) -> CoreResult<Vec<TicketId>> {
        Ok(self
            .state()?
            .booking_tickets
            .iter()
            .filter(|(b, _)| *b == booking_id)
            .map(|(_, t)| *t)
            .collect())
    }

    async fn lock_active_bookings_holding(
        &mut self,
        ticket_ids: &[TicketId],
    ) -> CoreResult<Vec<Booking>> {
        let state = self.state()?;
        let tickets = id_set(ticket_ids);
        let booking_ids: BTreeSet<BookingId> = state
            .booking_tickets
            .iter()
            .filter(|(_, t)| tickets.contains(t))
            .map(|(b, _)| *b)
            .collect();
        Ok(booking_ids
            .into_iter()
            .filter_map(|id| state.bookings.get(&id))
            .filter(|b| b.status != BookingStatus::Canceled)
            .cloned()
            .collect())
    }

    async fn payment(&mut self, id: PaymentId) -> CoreResult<Option<Payment>> {
        Ok(self.state()?.payments.get(&id).cloned())
    }

    async fn lock_payment(&mut self, id: PaymentId) -> CoreResult<Option<Payment>> {
        self.payment(id).await
    }

    async fn payment_by_transaction_id(&mut self, transaction_id: &str) -> CoreResult<Option<Payment>> {
        Ok(self
            .state()?
            .payments
            .values()
            .find(|p| p.transaction_id == transaction_id)
            .cloned())
    }

    async fn payments_for_booking(&mut self, booking_id: BookingId) -> CoreResult<Vec<Payment>> {
        Ok(self
            .state()?
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn pending_payments_before(&mut self, threshold: DateTime<Utc>) -> CoreResult<Vec<Payment>> {
        Ok(self
            .state()?
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.created_at < threshold)
            .cloned()
            .collect())
    }

    async fn insert_payment(&mut self, payment: &NewPayment) -> CoreResult<Payment> {
        let state = self.state()?;
        if !state.bookings.contains_key(&payment.booking_id) {
            return Err(CoreError::BookingNotFound(payment.booking_id));
        }
        if state
            .payments
            .values()
            .any(|p| p.transaction_id == payment.transaction_id)
        {
            return Err(CoreError::DuplicateTransactionId(payment.transaction_id.clone()));
        }
        let now = Utc::now();
        let payment = Payment {
            id: PaymentId(state.next_id()),
            booking_id: payment.booking_id,
            amount: payment.amount,
            transaction_id: payment.transaction_id.clone(),
            method: payment.method,
            status: PaymentStatus::Pending,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        state.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn update_payment(&mut self, payment: &Payment) -> CoreResult<Payment> {
        let state = self.state()?;
        if payment.status == PaymentStatus::Success
            && state.payments.values().any(|p| {
                p.booking_id == payment.booking_id
                    && p.id != payment.id
                    && p.status == PaymentStatus::Success
            })
        {
            return Err(CoreError::IdempotencyViolation {
                booking_id: payment.booking_id,
                current_status: PaymentStatus::Success,
            });
        }
        let stored = state
            .payments
            .get_mut(&payment.id)
            .ok_or(CoreError::PaymentNotFound(payment.id))?;
        *stored = Payment {
            updated_at: Utc::now(),
            ..payment.clone()
        };
        Ok(stored.clone())
    }

    async fn commit(&mut self) -> CoreResult<()> {
        let mut guard = self
            .guard
            .take()
            .ok_or_else(|| CoreError::Storage("transaction already committed".to_string()))?;
        *guard = std::mem::take(&mut self.staged);
        Ok(())
    }
}
