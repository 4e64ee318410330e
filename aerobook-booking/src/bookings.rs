use std::sync::Arc;

use aerobook_core::events::EventPublisher;
use aerobook_core::identity::AdminGrant;
use aerobook_core::models::{
    Booking, BookingId, BookingStatus, NewBooking, Payment, PaymentStatus, Ticket, TicketId,
    UserId,
};
use aerobook_core::repository::{Store, StoreTx};
use aerobook_core::{CoreError, CoreResult};
use aerobook_inventory::{booking_total, SeatLedger};
use aerobook_shared::DomainEvent;
use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// A booking with its human reference and the tickets it holds.
#[derive(Debug, Clone, Serialize)]
pub struct BookingSummary {
    #[serde(flatten)]
    pub booking: Booking,
    pub reference: String,
    pub ticket_ids: Vec<TicketId>,
}

impl BookingSummary {
    fn new(booking: Booking, ticket_ids: Vec<TicketId>) -> Self {
        Self {
            reference: booking.reference(),
            booking,
            ticket_ids,
        }
    }
}

/// Direct status overwrite. Only constructible with an [`AdminGrant`].
#[derive(Debug)]
pub struct StatusOverride {
    status: BookingStatus,
    _grant: AdminGrant,
}

impl StatusOverride {
    pub fn new(grant: AdminGrant, status: BookingStatus) -> Self {
        Self {
            status,
            _grant: grant,
        }
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }
}

#[derive(Debug, Default)]
pub struct BookingUpdate {
    pub booking_date: Option<NaiveDateTime>,
    pub status: Option<StatusOverride>,
}

/// Result of canceling one booking inside a transaction.
#[derive(Debug, Clone)]
pub struct Cancellation {
    pub booking: Booking,
    pub ticket_ids: Vec<TicketId>,
    /// Tickets moved back to AVAILABLE by this cancellation.
    pub released: Vec<TicketId>,
    /// SUCCESS payments that now owe the customer a refund.
    pub refunds: Vec<Payment>,
    /// False when the booking was already CANCELED.
    pub changed: bool,
}

impl Cancellation {
    /// `BookingCanceled` followed by one `RefundRequired` per settled
    /// payment. Empty when nothing changed.
    pub fn events(&self, reason: &str) -> Vec<DomainEvent> {
        if !self.changed {
            return Vec::new();
        }
        let mut events = vec![DomainEvent::BookingCanceled {
            booking_id: self.booking.id.0,
            released_ticket_ids: self.released.iter().map(|id| id.0).collect(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }];
        events.extend(self.refunds.iter().map(|payment| DomainEvent::RefundRequired {
            booking_id: self.booking.id.0,
            payment_id: payment.id.0,
            amount: payment.amount,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }));
        events
    }
}

/// Creates, updates and cancels bookings, reserving seats through the
/// ledger in the same transaction.
pub struct BookingOrchestrator {
    store: Arc<dyn Store>,
    ledger: SeatLedger,
    events: Arc<dyn EventPublisher>,
}

impl BookingOrchestrator {
    pub fn new(store: Arc<dyn Store>, ledger: SeatLedger, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            ledger,
            events,
        }
    }

    /// Reserves the tickets and stores a CONFIRMED booking, or fails with no
    /// visible trace. The PENDING row only exists inside the transaction.
    pub async fn create(
        &self,
        user_id: UserId,
        ticket_ids: &[TicketId],
        booking_date: Option<NaiveDateTime>,
    ) -> CoreResult<BookingSummary> {
        let user = self.store.user(user_id).await?;

        let mut tx = self.store.begin().await?;
        let pending = tx
            .insert_booking(&NewBooking {
                user_id: user.id,
                booking_date: booking_date.unwrap_or_else(|| Utc::now().naive_utc()),
            })
            .await?;

        let reservation = self
            .ledger
            .reserve_within(tx.as_mut(), ticket_ids, pending.id)
            .await?;

        let booking = tx
            .update_booking(&Booking {
                total_amount: booking_total(&reservation.fares),
                status: BookingStatus::Confirmed,
                ..pending
            })
            .await?;
        tx.commit().await?;

        let ticket_ids = reservation.ticket_ids();
        info!(
            booking_id = %booking.id,
            user_id = %booking.user_id,
            total = %booking.total_amount,
            tickets = ticket_ids.len(),
            "Booking confirmed"
        );
        self.events.publish(DomainEvent::BookingConfirmed {
            booking_id: booking.id.0,
            user_id: booking.user_id.0,
            ticket_ids: ticket_ids.iter().map(|id| id.0).collect(),
            total_amount: booking.total_amount,
            timestamp: Utc::now(),
        });

        Ok(BookingSummary::new(booking, ticket_ids))
    }

    pub async fn get(&self, id: BookingId) -> CoreResult<BookingSummary> {
        let mut tx = self.store.begin().await?;
        let booking = tx.booking(id).await?.ok_or(CoreError::BookingNotFound(id))?;
        let ticket_ids = tx.booking_ticket_ids(id).await?;
        Ok(BookingSummary::new(booking, ticket_ids))
    }

    pub async fn list_for_user(&self, user_id: UserId) -> CoreResult<Vec<Booking>> {
        let mut tx = self.store.begin().await?;
        tx.bookings_for_user(user_id).await
    }

    pub async fn list_by_status(&self, status: BookingStatus) -> CoreResult<Vec<Booking>> {
        let mut tx = self.store.begin().await?;
        tx.bookings_by_status(status).await
    }

    pub async fn tickets_of(&self, id: BookingId) -> CoreResult<Vec<Ticket>> {
        let mut tx = self.store.begin().await?;
        tx.booking(id).await?.ok_or(CoreError::BookingNotFound(id))?;
        let ticket_ids = tx.booking_ticket_ids(id).await?;
        tx.tickets(&ticket_ids).await
    }

    /// Partial update. A status override to CANCELED takes the regular
    /// cancel path; a CANCELED booking cannot be revived.
    pub async fn update(&self, id: BookingId, update: BookingUpdate) -> CoreResult<BookingSummary> {
        let mut tx = self.store.begin().await?;
        let mut cancellation = None;

        if let Some(status) = update.status.as_ref().map(StatusOverride::status) {
            let current = tx.booking(id).await?.ok_or(CoreError::BookingNotFound(id))?;
            if status == BookingStatus::Canceled {
                cancellation = Some(self.cancel_within(tx.as_mut(), id).await?);
            } else if current.status == BookingStatus::Canceled {
                return Err(CoreError::InvalidOperation(format!(
                    "booking {} is canceled",
                    id
                )));
            } else if current.status != status {
                let booking = tx.lock_booking(id).await?.ok_or(CoreError::BookingNotFound(id))?;
                warn!(
                    booking_id = %id,
                    from = %booking.status,
                    to = %status,
                    "Booking status overridden"
                );
                tx.update_booking(&Booking { status, ..booking }).await?;
            }
        }

        let mut booking = tx.lock_booking(id).await?.ok_or(CoreError::BookingNotFound(id))?;
        if let Some(date) = update.booking_date {
            booking = tx
                .update_booking(&Booking {
                    booking_date: date,
                    ..booking
                })
                .await?;
        }
        let ticket_ids = tx.booking_ticket_ids(id).await?;
        tx.commit().await?;

        for event in cancellation.iter().flat_map(|c| c.events("status override")) {
            self.events.publish(event);
        }
        Ok(BookingSummary::new(booking, ticket_ids))
    }

    /// Releases the booking's tickets and marks it CANCELED. Canceling an
    /// already canceled booking returns it unchanged.
    pub async fn cancel(&self, id: BookingId, reason: &str) -> CoreResult<BookingSummary> {
        let mut tx = self.store.begin().await?;
        let cancellation = self.cancel_within(tx.as_mut(), id).await?;
        if cancellation.changed {
            tx.commit().await?;
            info!(
                booking_id = %id,
                released = cancellation.released.len(),
                refunds = cancellation.refunds.len(),
                reason,
                "Booking canceled"
            );
        }
        for event in cancellation.events(reason) {
            self.events.publish(event);
        }
        Ok(BookingSummary::new(cancellation.booking, cancellation.ticket_ids))
    }

    /// Cancels inside the caller's transaction. Tickets are locked before
    /// the booking, and nothing is released unless the booking row, read
    /// under lock, is still active. Paid seats are released too; the
    /// settled payments come back in `refunds`.
    pub async fn cancel_within(&self, tx: &mut dyn StoreTx, id: BookingId) -> CoreResult<Cancellation> {
        let ticket_ids = tx.booking_ticket_ids(id).await?;
        if !ticket_ids.is_empty() {
            tx.lock_tickets(&ticket_ids).await?;
        }
        let booking = tx.lock_booking(id).await?.ok_or(CoreError::BookingNotFound(id))?;
        if booking.status == BookingStatus::Canceled {
            return Ok(Cancellation {
                booking,
                ticket_ids,
                released: Vec::new(),
                refunds: Vec::new(),
                changed: false,
            });
        }

        let released = self.ledger.release_within(tx, &ticket_ids).await?;
        let refunds: Vec<Payment> = tx
            .payments_for_booking(id)
            .await?
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Success)
            .collect();
        if !refunds.is_empty() {
            warn!(booking_id = %id, payments = refunds.len(), "Canceling a paid booking, refund owed");
        }
        let booking = tx
            .update_booking(&Booking {
                status: BookingStatus::Canceled,
                ..booking
            })
            .await?;

        Ok(Cancellation {
            booking,
            ticket_ids,
            released,
            refunds,
            changed: true,
        })
    }

    /// Releases tickets, then removes the booking with its ticket links.
    /// Refused once a payment has succeeded.
    pub async fn delete(&self, id: BookingId) -> CoreResult<()> {
        let mut tx = self.store.begin().await?;
        tx.booking(id).await?.ok_or(CoreError::BookingNotFound(id))?;
        let payments = tx.payments_for_booking(id).await?;
        if payments.iter().any(|p| p.status == PaymentStatus::Success) {
            return Err(CoreError::InvalidOperation(format!(
                "booking {} has a settled payment and cannot be deleted",
                id
            )));
        }

        let cancellation = self.cancel_within(tx.as_mut(), id).await?;
        tx.delete_booking(id).await?;
        tx.commit().await?;

        info!(booking_id = %id, released = cancellation.released.len(), "Booking deleted");
        for event in cancellation.events("booking deleted") {
            self.events.publish(event);
        }
        Ok(())
    }
}
