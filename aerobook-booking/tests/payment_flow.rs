mod common;

use std::sync::{Arc, OnceLock};

use aerobook_booking::{BookingOrchestrator, ExpirySweep, MockPaymentGateway};
use aerobook_core::identity::{Principal, Role};
use aerobook_core::models::{
    BookingId, BookingStatus, NewPayment, Payment, PaymentMethod, PaymentStatus, TicketId,
    TicketStatus, UserId,
};
use aerobook_core::payment::{ChargeRequest, GatewayDecision, GatewayError, PaymentGateway};
use aerobook_core::repository::Store;
use aerobook_core::CoreError;
use aerobook_shared::DomainEvent;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{drain, Fixture};
use rust_decimal::Decimal;

async fn booked(fx: &Fixture) -> (BookingId, Vec<TicketId>) {
    let flight = fx.flight(2).await;
    let economy = fx.seat(&flight, "001", &fx.economy).await;
    let business = fx.seat(&flight, "001", &fx.business).await;
    let summary = fx
        .bookings
        .create(fx.user.id, &[economy.id, business.id], None)
        .await
        .unwrap();
    (summary.booking.id, summary.ticket_ids)
}

async fn pending_payment(fx: &Fixture, booking_id: BookingId) -> Payment {
    let mut tx = fx.store.begin().await.unwrap();
    let payment = tx
        .insert_payment(&NewPayment {
            booking_id,
            amount: Decimal::new(300, 0),
            transaction_id: format!("TXN-PENDING-{}", booking_id),
            method: PaymentMethod::Banking,
        })
        .await
        .unwrap();
    tx.commit().await.unwrap();
    payment
}

#[tokio::test]
async fn test_successful_payment_settles_booking() {
    let fx = Fixture::new().await;
    let (booking_id, tickets) = booked(&fx).await;
    let mut rx = fx.subscribe();

    let payment = fx
        .payments
        .create_payment(booking_id, PaymentMethod::CreditCard)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.amount, Decimal::new(300, 0));
    assert!(payment.paid_at.is_some());
    assert!(payment.transaction_id.starts_with("TXN-"));
    assert_eq!(fx.status_of(&tickets).await, vec![TicketStatus::Paid; 2]);

    let found = fx.payments.by_transaction_id(&payment.transaction_id).await.unwrap();
    assert_eq!(found.id, payment.id);

    let events = drain(&mut rx);
    assert!(matches!(
        &events[..],
        [DomainEvent::PaymentRecorded { status, .. }] if status == "SUCCESS"
    ));
}

#[tokio::test]
async fn test_second_payment_is_an_idempotency_violation() {
    let fx = Fixture::new().await;
    let (booking_id, _) = booked(&fx).await;
    fx.payments
        .create_payment(booking_id, PaymentMethod::Momo)
        .await
        .unwrap();

    let err = fx
        .payments
        .create_payment(booking_id, PaymentMethod::Momo)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::IdempotencyViolation {
            current_status: PaymentStatus::Success,
            ..
        }
    ));
    assert_eq!(err.code(), "IDEMPOTENCY_VIOLATION");
    assert_eq!(fx.payments.list_for_booking(booking_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_declined_payment_keeps_tickets_booked() {
    let fx = Fixture::with_gateway(Arc::new(MockPaymentGateway::declining())).await;
    let (booking_id, tickets) = booked(&fx).await;

    let payment = fx
        .payments
        .create_payment(booking_id, PaymentMethod::CreditCard)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert!(payment.paid_at.is_none());
    assert_eq!(fx.status_of(&tickets).await, vec![TicketStatus::Booked; 2]);
    assert_eq!(
        fx.bookings.get(booking_id).await.unwrap().booking.status,
        BookingStatus::Confirmed
    );
}

#[tokio::test]
async fn test_unavailable_gateway_fails_the_attempt() {
    let fx = Fixture::with_gateway(Arc::new(MockPaymentGateway::unavailable())).await;
    let (booking_id, tickets) = booked(&fx).await;

    let err = fx
        .payments
        .create_payment(booking_id, PaymentMethod::CreditCard)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::GatewayUnavailable(_)));
    assert!(err.is_retryable());

    let attempts = fx.payments.list_for_booking(booking_id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, PaymentStatus::Failed);
    assert_eq!(fx.status_of(&tickets).await, vec![TicketStatus::Booked; 2]);
}

#[tokio::test]
async fn test_paying_a_canceled_booking_is_refused() {
    let fx = Fixture::new().await;
    let (booking_id, _) = booked(&fx).await;
    fx.bookings.cancel(booking_id, "changed plans").await.unwrap();

    let err = fx
        .payments
        .create_payment(booking_id, PaymentMethod::Cash)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidOperation(_)));
    assert!(fx.payments.list_for_booking(booking_id).await.unwrap().is_empty());

    assert!(matches!(
        fx.payments
            .create_payment(BookingId(777), PaymentMethod::Cash)
            .await,
        Err(CoreError::BookingNotFound(_))
    ));
}

/// Approves the charge, but the customer cancels the booking while the
/// gateway is still deciding.
struct CancelDuringCharge {
    bookings: OnceLock<Arc<BookingOrchestrator>>,
}

#[async_trait]
impl PaymentGateway for CancelDuringCharge {
    async fn charge(&self, request: &ChargeRequest) -> Result<GatewayDecision, GatewayError> {
        if let Some(bookings) = self.bookings.get() {
            bookings
                .cancel(request.booking_id, "canceled during checkout")
                .await
                .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        }
        Ok(GatewayDecision::Approved {
            reference: "late".to_string(),
        })
    }

    fn name(&self) -> &str {
        "cancel-during-charge"
    }
}

#[tokio::test]
async fn test_approval_for_canceled_booking_requests_refund() {
    let gateway = Arc::new(CancelDuringCharge {
        bookings: OnceLock::new(),
    });
    let fx = Fixture::with_gateway(gateway.clone()).await;
    assert!(gateway.bookings.set(fx.bookings.clone()).is_ok());
    let (booking_id, tickets) = booked(&fx).await;
    let mut rx = fx.subscribe();

    let err = fx
        .payments
        .create_payment(booking_id, PaymentMethod::CreditCard)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidOperation(_)));

    let attempts = fx.payments.list_for_booking(booking_id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, PaymentStatus::Failed);
    assert_eq!(fx.status_of(&tickets).await, vec![TicketStatus::Available; 2]);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        DomainEvent::RefundRequired { booking_id: b, .. } if *b == booking_id.0
    )));
}

#[tokio::test]
async fn test_canceling_a_paid_booking_requests_a_refund() {
    let fx = Fixture::new().await;
    let (booking_id, tickets) = booked(&fx).await;
    let payment = fx
        .payments
        .create_payment(booking_id, PaymentMethod::CreditCard)
        .await
        .unwrap();
    let mut rx = fx.subscribe();

    let canceled = fx.bookings.cancel(booking_id, "customer request").await.unwrap();
    assert_eq!(canceled.booking.status, BookingStatus::Canceled);
    assert_eq!(fx.status_of(&tickets).await, vec![TicketStatus::Available; 2]);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        DomainEvent::BookingCanceled { released_ticket_ids, .. } if released_ticket_ids.len() == 2
    ));
    assert!(matches!(
        &events[1],
        DomainEvent::RefundRequired { payment_id, amount, .. }
            if *payment_id == payment.id.0 && *amount == Decimal::new(300, 0)
    ));

    // The seats are sellable again; the original payment stays settled.
    let bob = fx.another_user("bob").await;
    fx.bookings.create(bob.id, &tickets, None).await.unwrap();
    assert_eq!(
        fx.payments.get(payment.id).await.unwrap().status,
        PaymentStatus::Success
    );

    // A second cancel owes nothing more.
    fx.bookings.cancel(booking_id, "customer request").await.unwrap();
    assert!(drain(&mut rx)
        .iter()
        .all(|e| !matches!(e, DomainEvent::RefundRequired { .. })));
}

#[tokio::test]
async fn test_cancel_payment() {
    let fx = Fixture::new().await;
    let (booking_id, tickets) = booked(&fx).await;
    let pending = pending_payment(&fx, booking_id).await;
    assert_eq!(pending.status, PaymentStatus::Pending);

    let canceled = fx.payments.cancel_payment(pending.id).await.unwrap();
    assert_eq!(canceled.status, PaymentStatus::Failed);
    let again = fx.payments.cancel_payment(pending.id).await.unwrap();
    assert_eq!(again.status, PaymentStatus::Failed);
    assert_eq!(fx.status_of(&tickets).await, vec![TicketStatus::Booked; 2]);

    let paid = fx
        .payments
        .create_payment(booking_id, PaymentMethod::CreditCard)
        .await
        .unwrap();
    assert!(matches!(
        fx.payments.cancel_payment(paid.id).await,
        Err(CoreError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn test_admin_status_correction() {
    let fx = Fixture::new().await;
    let (booking_id, tickets) = booked(&fx).await;
    let pending = pending_payment(&fx, booking_id).await;
    let admin = Principal::new(UserId(1000), "root", Role::Admin);

    let corrected = fx
        .payments
        .update_status(admin.require_admin().unwrap(), pending.id, PaymentStatus::Success)
        .await
        .unwrap();
    assert_eq!(corrected.status, PaymentStatus::Success);
    assert!(corrected.paid_at.is_some());
    assert_eq!(fx.status_of(&tickets).await, vec![TicketStatus::Paid; 2]);

    let refused = fx
        .payments
        .update_status(admin.require_admin().unwrap(), pending.id, PaymentStatus::Failed)
        .await;
    assert!(matches!(refused, Err(CoreError::InvalidOperation(_))));
    assert_eq!(
        fx.payments.get(pending.id).await.unwrap().status,
        PaymentStatus::Success
    );
}

#[tokio::test]
async fn test_correction_to_success_on_canceled_booking_changes_nothing() {
    let fx = Fixture::new().await;
    let (booking_id, tickets) = booked(&fx).await;
    let pending = pending_payment(&fx, booking_id).await;
    fx.bookings.cancel(booking_id, "changed plans").await.unwrap();
    let admin = Principal::new(UserId(1000), "root", Role::Admin);

    let result = fx
        .payments
        .update_status(admin.require_admin().unwrap(), pending.id, PaymentStatus::Success)
        .await;
    assert!(matches!(result, Err(CoreError::InvalidOperation(_))));
    assert_eq!(
        fx.payments.get(pending.id).await.unwrap().status,
        PaymentStatus::Pending
    );
    assert_eq!(fx.status_of(&tickets).await, vec![TicketStatus::Available; 2]);
}

#[tokio::test]
async fn test_unknown_transaction_id() {
    let fx = Fixture::new().await;
    let err = fx.payments.by_transaction_id("TXN-NOPE").await.unwrap_err();
    assert!(matches!(err, CoreError::TransactionNotFound(_)));
    assert_eq!(err.code(), "TRANSACTION_NOT_FOUND");
}

#[tokio::test]
async fn test_expiry_sweep_fails_stale_payments() {
    let fx = Fixture::new().await;
    let (booking_id, tickets) = booked(&fx).await;
    let pending = pending_payment(&fx, booking_id).await;

    let keep_bookings = ExpirySweep::new(
        fx.payments.clone(),
        fx.bookings.clone(),
        Duration::minutes(30),
        false,
    );
    let report = keep_bookings.run_once(Utc::now()).await.unwrap();
    assert!(report.expired_payments.is_empty());

    let report = keep_bookings
        .run_once(Utc::now() + Duration::minutes(31))
        .await
        .unwrap();
    assert_eq!(report.expired_payments, vec![pending.id]);
    assert!(report.canceled_bookings.is_empty());
    assert_eq!(
        fx.payments.get(pending.id).await.unwrap().status,
        PaymentStatus::Failed
    );
    assert_eq!(fx.status_of(&tickets).await, vec![TicketStatus::Booked; 2]);
}

#[tokio::test]
async fn test_expiry_sweep_can_release_unpaid_bookings() {
    let fx = Fixture::new().await;
    let (booking_id, tickets) = booked(&fx).await;
    pending_payment(&fx, booking_id).await;

    let sweep = ExpirySweep::new(
        fx.payments.clone(),
        fx.bookings.clone(),
        Duration::minutes(30),
        true,
    );
    let report = sweep
        .run_once(Utc::now() + Duration::minutes(31))
        .await
        .unwrap();
    assert_eq!(report.canceled_bookings, vec![booking_id]);
    assert_eq!(report.failures, 0);
    assert_eq!(
        fx.bookings.get(booking_id).await.unwrap().booking.status,
        BookingStatus::Canceled
    );
    assert_eq!(fx.status_of(&tickets).await, vec![TicketStatus::Available; 2]);

    let rerun = sweep
        .run_once(Utc::now() + Duration::minutes(31))
        .await
        .unwrap();
    assert_eq!(rerun, Default::default());
}
