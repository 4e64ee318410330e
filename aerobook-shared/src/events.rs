use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Facts published after a transaction commits.
///
/// Ids are carried as raw integers so consumers do not need the domain crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEvent {
    BookingConfirmed {
        booking_id: i64,
        user_id: i64,
        ticket_ids: Vec<i64>,
        total_amount: Decimal,
        timestamp: DateTime<Utc>,
    },
    BookingCanceled {
        booking_id: i64,
        released_ticket_ids: Vec<i64>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    PaymentRecorded {
        payment_id: i64,
        booking_id: i64,
        transaction_id: String,
        status: String,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    },
    FlightStatusChanged {
        flight_id: i64,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },
    RefundRequired {
        booking_id: i64,
        payment_id: i64,
        amount: Decimal,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Routing key, e.g. `booking.confirmed`.
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEvent::BookingConfirmed { .. } => "booking.confirmed",
            DomainEvent::BookingCanceled { .. } => "booking.canceled",
            DomainEvent::PaymentRecorded { .. } => "payment.recorded",
            DomainEvent::FlightStatusChanged { .. } => "flight.status_changed",
            DomainEvent::RefundRequired { .. } => "payment.refund_required",
        }
    }

    /// Id of the aggregate the event is about, used as the partition key.
    pub fn key(&self) -> i64 {
        match self {
            DomainEvent::BookingConfirmed { booking_id, .. }
            | DomainEvent::BookingCanceled { booking_id, .. }
            | DomainEvent::RefundRequired { booking_id, .. } => *booking_id,
            DomainEvent::PaymentRecorded { payment_id, .. } => *payment_id,
            DomainEvent::FlightStatusChanged { flight_id, .. } => *flight_id,
        }
    }
}
