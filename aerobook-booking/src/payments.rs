use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aerobook_core::events::EventPublisher;
use aerobook_core::identity::AdminGrant;
use aerobook_core::models::{
    Booking, BookingId, BookingStatus, NewPayment, Payment, PaymentId, PaymentMethod,
    PaymentStatus, TicketStatus,
};
use aerobook_core::payment::{
    new_transaction_id, ChargeRequest, GatewayDecision, GatewayError, PaymentGateway,
};
use aerobook_core::repository::{Store, StoreTx};
use aerobook_core::{CoreError, CoreResult};
use aerobook_inventory::SeatLedger;
use aerobook_shared::DomainEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

/// Records payment attempts and settles bookings on approval.
pub struct PaymentProcessor {
    store: Arc<dyn Store>,
    ledger: SeatLedger,
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventPublisher>,
}

/// Outcome of trying to settle a payment inside a transaction.
enum Settlement {
    Paid { payment: Payment, booking: Booking },
    /// Booking can no longer be settled; nothing was changed.
    Blocked(CoreError),
}

fn recorded(payment: &Payment) -> DomainEvent {
    DomainEvent::PaymentRecorded {
        payment_id: payment.id.0,
        booking_id: payment.booking_id.0,
        transaction_id: payment.transaction_id.clone(),
        status: payment.status.to_string(),
        amount: payment.amount,
        timestamp: Utc::now(),
    }
}

impl PaymentProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: SeatLedger,
        gateway: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            ledger,
            gateway,
            events,
        }
    }

    /// Charges the booking total. A decline is returned as a FAILED payment;
    /// a gateway that cannot answer yields `GatewayUnavailable`.
    pub async fn create_payment(&self, booking_id: BookingId, method: PaymentMethod) -> CoreResult<Payment> {
        // The PENDING row is committed first so an interrupted attempt stays
        // visible to the expiry sweep.
        let payment = {
            let mut tx = self.store.begin().await?;
            let booking = tx
                .lock_booking(booking_id)
                .await?
                .ok_or(CoreError::BookingNotFound(booking_id))?;
            if booking.status == BookingStatus::Canceled {
                warn!(booking_id = %booking_id, "Payment for canceled booking refused");
                return Err(CoreError::InvalidOperation(format!(
                    "booking {} is canceled",
                    booking_id
                )));
            }
            let existing = tx.payments_for_booking(booking_id).await?;
            if existing.iter().any(|p| p.status == PaymentStatus::Success) {
                warn!(booking_id = %booking_id, "Duplicate payment refused");
                return Err(CoreError::IdempotencyViolation {
                    booking_id,
                    current_status: PaymentStatus::Success,
                });
            }
            let payment = tx
                .insert_payment(&NewPayment {
                    booking_id,
                    amount: booking.total_amount,
                    transaction_id: new_transaction_id(),
                    method,
                })
                .await?;
            tx.commit().await?;
            payment
        };

        let request = ChargeRequest {
            payment_id: payment.id,
            booking_id,
            transaction_id: payment.transaction_id.clone(),
            amount: payment.amount,
            method,
        };
        info!(
            payment_id = %payment.id,
            transaction_id = %payment.transaction_id,
            gateway = self.gateway.name(),
            "Charging payment"
        );

        match self.gateway.charge(&request).await {
            Ok(GatewayDecision::Approved { reference }) => {
                info!(payment_id = %payment.id, reference = %reference, "Payment approved");
                self.settle_approved(payment.id).await
            }
            Ok(GatewayDecision::Declined { reason }) => {
                warn!(payment_id = %payment.id, reason = %reason, "Payment declined");
                self.mark_failed(payment.id).await
            }
            Err(err) => {
                error!(payment_id = %payment.id, "Payment gateway error: {}", err);
                self.mark_failed(payment.id).await?;
                Err(CoreError::GatewayUnavailable(err.to_string()))
            }
        }
    }

    /// The gateway took the money. If the booking was canceled or paid by a
    /// concurrent attempt meanwhile, the attempt is stored FAILED and a
    /// refund is requested.
    async fn settle_approved(&self, payment_id: PaymentId) -> CoreResult<Payment> {
        let mut tx = self.store.begin().await?;
        match self.settle_within(tx.as_mut(), payment_id).await? {
            Settlement::Paid { payment, booking } => {
                tx.commit().await?;
                info!(
                    payment_id = %payment.id,
                    booking_id = %booking.id,
                    "Booking paid"
                );
                self.events.publish(recorded(&payment));
                Ok(payment)
            }
            Settlement::Blocked(reason) => {
                let mut payment = tx
                    .lock_payment(payment_id)
                    .await?
                    .ok_or(CoreError::PaymentNotFound(payment_id))?;
                payment.status = PaymentStatus::Failed;
                let payment = tx.update_payment(&payment).await?;
                tx.commit().await?;

                warn!(
                    payment_id = %payment.id,
                    booking_id = %payment.booking_id,
                    "Approved payment could not settle, refund required: {}",
                    reason
                );
                self.events.publish(recorded(&payment));
                self.events.publish(DomainEvent::RefundRequired {
                    booking_id: payment.booking_id.0,
                    payment_id: payment.id.0,
                    amount: payment.amount,
                    reason: reason.to_string(),
                    timestamp: Utc::now(),
                });
                Err(reason)
            }
        }
    }

    /// Tickets, then booking, then payment are locked. BOOKED tickets move to
    /// PAID, the payment to SUCCESS and the booking to CONFIRMED.
    async fn settle_within(&self, tx: &mut dyn StoreTx, payment_id: PaymentId) -> CoreResult<Settlement> {
        let current = tx
            .payment(payment_id)
            .await?
            .ok_or(CoreError::PaymentNotFound(payment_id))?;
        let booking_id = current.booking_id;

        let ticket_ids = tx.booking_ticket_ids(booking_id).await?;
        let tickets = tx.lock_tickets(&ticket_ids).await?;
        let booking = tx
            .lock_booking(booking_id)
            .await?
            .ok_or(CoreError::BookingNotFound(booking_id))?;
        let mut payment = tx
            .lock_payment(payment_id)
            .await?
            .ok_or(CoreError::PaymentNotFound(payment_id))?;

        if booking.status == BookingStatus::Canceled {
            return Ok(Settlement::Blocked(CoreError::InvalidOperation(format!(
                "booking {} was canceled",
                booking_id
            ))));
        }
        let others = tx.payments_for_booking(booking_id).await?;
        if others
            .iter()
            .any(|p| p.id != payment_id && p.status == PaymentStatus::Success)
        {
            return Ok(Settlement::Blocked(CoreError::IdempotencyViolation {
                booking_id,
                current_status: PaymentStatus::Success,
            }));
        }
        if let Some(ticket) = tickets.iter().find(|t| t.status != TicketStatus::Booked) {
            return Ok(Settlement::Blocked(CoreError::InvalidTicketState {
                ticket_id: ticket.id,
                actual: ticket.status,
                expected: TicketStatus::Booked,
            }));
        }

        if !ticket_ids.is_empty() {
            self.ledger.confirm_paid_within(tx, &ticket_ids).await?;
        }
        payment.status = PaymentStatus::Success;
        payment.paid_at = Some(Utc::now());
        let payment = tx.update_payment(&payment).await?;

        let booking = if booking.status == BookingStatus::Confirmed {
            booking
        } else {
            tx.update_booking(&Booking {
                status: BookingStatus::Confirmed,
                ..booking
            })
            .await?
        };

        Ok(Settlement::Paid { payment, booking })
    }

    async fn mark_failed(&self, payment_id: PaymentId) -> CoreResult<Payment> {
        let mut tx = self.store.begin().await?;
        let mut payment = tx
            .lock_payment(payment_id)
            .await?
            .ok_or(CoreError::PaymentNotFound(payment_id))?;
        if payment.status != PaymentStatus::Pending {
            return Ok(payment);
        }
        payment.status = PaymentStatus::Failed;
        let payment = tx.update_payment(&payment).await?;
        tx.commit().await?;
        self.events.publish(recorded(&payment));
        Ok(payment)
    }

    /// Privileged correction. A SUCCESS payment is final; correcting to
    /// SUCCESS settles the booking exactly like a gateway approval.
    pub async fn update_status(
        &self,
        _grant: AdminGrant,
        id: PaymentId,
        status: PaymentStatus,
    ) -> CoreResult<Payment> {
        let mut tx = self.store.begin().await?;
        let mut payment = tx
            .payment(id)
            .await?
            .ok_or(CoreError::PaymentNotFound(id))?;
        if payment.status == PaymentStatus::Success {
            return Err(CoreError::InvalidOperation(format!(
                "payment {} already succeeded",
                id
            )));
        }
        if payment.status == status {
            return Ok(payment);
        }

        let payment = if status == PaymentStatus::Success {
            match self.settle_within(tx.as_mut(), id).await? {
                Settlement::Paid { payment, .. } => payment,
                Settlement::Blocked(reason) => return Err(reason),
            }
        } else {
            payment = tx.lock_payment(id).await?.ok_or(CoreError::PaymentNotFound(id))?;
            payment.status = status;
            tx.update_payment(&payment).await?
        };
        tx.commit().await?;

        warn!(payment_id = %id, status = %status, "Payment status corrected");
        self.events.publish(recorded(&payment));
        Ok(payment)
    }

    /// PENDING -> FAILED. Tickets stay with the booking; canceling the
    /// booking is a separate action.
    pub async fn cancel_payment(&self, id: PaymentId) -> CoreResult<Payment> {
        let mut tx = self.store.begin().await?;
        let mut payment = tx
            .lock_payment(id)
            .await?
            .ok_or(CoreError::PaymentNotFound(id))?;
        match payment.status {
            PaymentStatus::Success => Err(CoreError::InvalidOperation(format!(
                "payment {} already succeeded",
                id
            ))),
            PaymentStatus::Failed => Ok(payment),
            PaymentStatus::Pending => {
                payment.status = PaymentStatus::Failed;
                let payment = tx.update_payment(&payment).await?;
                tx.commit().await?;
                info!(payment_id = %id, "Payment canceled");
                self.events.publish(recorded(&payment));
                Ok(payment)
            }
        }
    }

    pub async fn get(&self, id: PaymentId) -> CoreResult<Payment> {
        let mut tx = self.store.begin().await?;
        tx.payment(id).await?.ok_or(CoreError::PaymentNotFound(id))
    }

    pub async fn by_transaction_id(&self, transaction_id: &str) -> CoreResult<Payment> {
        let mut tx = self.store.begin().await?;
        tx.payment_by_transaction_id(transaction_id)
            .await?
            .ok_or_else(|| CoreError::TransactionNotFound(transaction_id.to_string()))
    }

    pub async fn list_for_booking(&self, booking_id: BookingId) -> CoreResult<Vec<Payment>> {
        let mut tx = self.store.begin().await?;
        tx.booking(booking_id)
            .await?
            .ok_or(CoreError::BookingNotFound(booking_id))?;
        tx.payments_for_booking(booking_id).await
    }

    /// PENDING payments created before `threshold`.
    pub async fn find_expired_pending_payments(&self, threshold: DateTime<Utc>) -> CoreResult<Vec<Payment>> {
        let mut tx = self.store.begin().await?;
        tx.pending_payments_before(threshold).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMode {
    Approve,
    Decline,
    Unavailable,
}

/// In-process gateway for tests and local runs.
pub struct MockPaymentGateway {
    mode: MockMode,
    calls: AtomicUsize,
}

impl MockPaymentGateway {
    pub fn new(mode: MockMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn approving() -> Self {
        Self::new(MockMode::Approve)
    }

    pub fn declining() -> Self {
        Self::new(MockMode::Decline)
    }

    pub fn unavailable() -> Self {
        Self::new(MockMode::Unavailable)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<GatewayDecision, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            MockMode::Approve => Ok(GatewayDecision::Approved {
                reference: format!("mock_{}", request.transaction_id.to_lowercase()),
            }),
            MockMode::Decline => Ok(GatewayDecision::Declined {
                reason: "card declined".to_string(),
            }),
            MockMode::Unavailable => Err(GatewayError::Unavailable(
                "simulated gateway outage".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
