use std::sync::Arc;

use aerobook_core::models::{BookingId, BookingStatus, PaymentId, PaymentStatus};
use aerobook_core::CoreResult;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::bookings::BookingOrchestrator;
use crate::payments::PaymentProcessor;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_payments: Vec<PaymentId>,
    pub canceled_bookings: Vec<BookingId>,
    /// Payments whose expiry failed; they are picked up again next run.
    pub failures: usize,
}

/// Fails stale PENDING payments. Never schedules itself; the host calls
/// `run_once` on whatever cadence it likes.
pub struct ExpirySweep {
    payments: Arc<PaymentProcessor>,
    bookings: Arc<BookingOrchestrator>,
    pending_expiry: Duration,
    release_unpaid_bookings: bool,
}

impl ExpirySweep {
    pub fn new(
        payments: Arc<PaymentProcessor>,
        bookings: Arc<BookingOrchestrator>,
        pending_expiry: Duration,
        release_unpaid_bookings: bool,
    ) -> Self {
        Self {
            payments,
            bookings,
            pending_expiry,
            release_unpaid_bookings,
        }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> CoreResult<SweepReport> {
        let threshold = now - self.pending_expiry;
        let stale = self.payments.find_expired_pending_payments(threshold).await?;
        let mut report = SweepReport::default();

        for payment in stale {
            match self.payments.cancel_payment(payment.id).await {
                Ok(p) if p.status == PaymentStatus::Failed => report.expired_payments.push(p.id),
                Ok(_) => {}
                Err(e) => {
                    // Settled concurrently, most likely.
                    warn!(payment_id = %payment.id, "Could not expire payment: {}", e);
                    report.failures += 1;
                    continue;
                }
            }

            if !self.release_unpaid_bookings {
                continue;
            }
            let settled = self
                .payments
                .list_for_booking(payment.booking_id)
                .await?
                .iter()
                .any(|p| p.status == PaymentStatus::Success);
            if settled {
                continue;
            }
            let current = self.bookings.get(payment.booking_id).await?;
            if current.booking.status == BookingStatus::Canceled {
                continue;
            }
            match self.bookings.cancel(payment.booking_id, "payment expired").await {
                Ok(summary) => {
                    if !report.canceled_bookings.contains(&summary.booking.id) {
                        report.canceled_bookings.push(summary.booking.id);
                    }
                }
                Err(e) => {
                    error!(booking_id = %payment.booking_id, "Could not release unpaid booking: {}", e);
                    report.failures += 1;
                }
            }
        }

        if !report.expired_payments.is_empty() {
            info!(
                expired = report.expired_payments.len(),
                canceled = report.canceled_bookings.len(),
                "Expired pending payments"
            );
        }
        Ok(report)
    }
}
