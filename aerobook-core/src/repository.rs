use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::*;
use crate::CoreResult;

/// Read-only reference data. Lookups of a missing id fail with the matching
/// `NotFound` error.
#[async_trait]
pub trait ReferenceData: Send + Sync {
    async fn airplane(&self, id: AirplaneId) -> CoreResult<Airplane>;

    async fn airport(&self, id: AirportId) -> CoreResult<Airport>;

    async fn ticket_type(&self, id: TicketTypeId) -> CoreResult<TicketType>;

    /// Every configured ticket type, ordered by id.
    async fn ticket_types(&self) -> CoreResult<Vec<TicketType>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user(&self, id: UserId) -> CoreResult<User>;

    async fn user_by_username(&self, username: &str) -> CoreResult<User>;
}

/// Entry point to the transactional store.
#[async_trait]
pub trait Store: ReferenceData + UserDirectory {
    /// Opens a transaction. Dropping it without `commit` rolls back every
    /// mutation made through it.
    async fn begin(&self) -> CoreResult<Box<dyn StoreTx>>;
}

/// Row-level primitives executed inside one transaction.
///
/// `lock_*` methods take row locks that are held until commit or rollback.
/// Callers lock flights before tickets, and tickets before bookings, so two
/// transactions always acquire locks in the same order.
#[async_trait]
pub trait StoreTx: Send {
    // Reference data, read on the transaction's own connection

    async fn airplane(&mut self, id: AirplaneId) -> CoreResult<Option<Airplane>>;

    /// Every configured ticket type, ordered by id.
    async fn ticket_types(&mut self) -> CoreResult<Vec<TicketType>>;

    // Flights

    async fn flight(&mut self, id: FlightId) -> CoreResult<Option<Flight>>;

    /// Exclusive lock, used when the flight status changes.
    async fn lock_flight(&mut self, id: FlightId) -> CoreResult<Option<Flight>>;

    /// Shared lock, held while tickets of these flights are reserved.
    async fn lock_flights_shared(&mut self, ids: &[FlightId]) -> CoreResult<Vec<Flight>>;

    async fn insert_flight(&mut self, flight: &NewFlight) -> CoreResult<Flight>;

    async fn set_flight_status(&mut self, id: FlightId, status: FlightStatus)
        -> CoreResult<Flight>;

    async fn delete_flight(&mut self, id: FlightId) -> CoreResult<()>;

    // Tickets

    async fn tickets(&mut self, ids: &[TicketId]) -> CoreResult<Vec<Ticket>>;

    /// Locks the given tickets in ascending id order and returns them in that
    /// order. Missing ids are simply absent from the result.
    async fn lock_tickets(&mut self, ids: &[TicketId]) -> CoreResult<Vec<Ticket>>;

    async fn flight_tickets(&mut self, flight_id: FlightId) -> CoreResult<Vec<Ticket>>;

    /// Locks every ticket of the flight whose status is one of `statuses`,
    /// in ascending id order.
    async fn lock_flight_tickets(
        &mut self,
        flight_id: FlightId,
        statuses: &[TicketStatus],
    ) -> CoreResult<Vec<Ticket>>;

    /// Inserts tickets, skipping any (flight, seat, type) that already
    /// exists. Returns the number of rows created.
    async fn insert_tickets(&mut self, tickets: &[NewTicket]) -> CoreResult<u64>;

    async fn set_ticket_status(&mut self, ids: &[TicketId], status: TicketStatus)
        -> CoreResult<()>;

    async fn delete_flight_tickets(&mut self, flight_id: FlightId) -> CoreResult<u64>;

    // Bookings

    async fn booking(&mut self, id: BookingId) -> CoreResult<Option<Booking>>;

    async fn lock_booking(&mut self, id: BookingId) -> CoreResult<Option<Booking>>;

    async fn bookings_for_user(&mut self, user_id: UserId) -> CoreResult<Vec<Booking>>;

    async fn bookings_by_status(&mut self, status: BookingStatus) -> CoreResult<Vec<Booking>>;

    async fn insert_booking(&mut self, booking: &NewBooking) -> CoreResult<Booking>;

    async fn update_booking(&mut self, booking: &Booking) -> CoreResult<Booking>;

    /// Removes the booking together with its booking-ticket links and
    /// payments.
    async fn delete_booking(&mut self, id: BookingId) -> CoreResult<()>;

    async fn link_tickets(&mut self, booking_id: BookingId, ticket_ids: &[TicketId])
        -> CoreResult<()>;

    async fn booking_ticket_ids(&mut self, booking_id: BookingId) -> CoreResult<Vec<TicketId>>;

    /// Locks every non-CANCELED booking linked to any of the tickets, in
    /// ascending id order.
    async fn lock_active_bookings_holding(
        &mut self,
        ticket_ids: &[TicketId],
    ) -> CoreResult<Vec<Booking>>;

    // Payments

    async fn payment(&mut self, id: PaymentId) -> CoreResult<Option<Payment>>;

    async fn lock_payment(&mut self, id: PaymentId) -> CoreResult<Option<Payment>>;

    async fn payment_by_transaction_id(&mut self, transaction_id: &str)
        -> CoreResult<Option<Payment>>;

    async fn payments_for_booking(&mut self, booking_id: BookingId) -> CoreResult<Vec<Payment>>;

    /// PENDING payments created strictly before `threshold`.
    async fn pending_payments_before(
        &mut self,
        threshold: DateTime<Utc>,
    ) -> CoreResult<Vec<Payment>>;

    async fn insert_payment(&mut self, payment: &NewPayment) -> CoreResult<Payment>;

    async fn update_payment(&mut self, payment: &Payment) -> CoreResult<Payment>;

    async fn commit(&mut self) -> CoreResult<()>;
}
