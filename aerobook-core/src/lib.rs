pub mod events;
pub mod identity;
pub mod models;
pub mod payment;
pub mod repository;

use models::{
    AirplaneId, AirportId, BookingId, FlightId, PaymentId, PaymentStatus, TicketId, TicketStatus,
    TicketTypeId,
};
use serde::Serialize;
use serde_json::{json, Value};

/// Coarse classification used by callers to decide on retry and by the HTTP
/// boundary to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidOperation,
    ExternalDependency,
    Validation,
    Forbidden,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Flight not found: {0}")]
    FlightNotFound(FlightId),
    #[error("Tickets not found: {}", join_ids(.0))]
    TicketsNotFound(Vec<TicketId>),
    #[error("Booking not found: {0}")]
    BookingNotFound(BookingId),
    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),
    #[error("No payment with transaction id {0}")]
    TransactionNotFound(String),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Ticket type not found: {0}")]
    TicketTypeNotFound(TicketTypeId),
    #[error("Airplane not found: {0}")]
    AirplaneNotFound(AirplaneId),
    #[error("Airport not found: {0}")]
    AirportNotFound(AirportId),

    #[error("Tickets are not available: {}", join_ids(.0))]
    TicketsUnavailable(Vec<TicketId>),
    #[error("Booking {booking_id} already has a payment in status {current_status}")]
    IdempotencyViolation {
        booking_id: BookingId,
        current_status: PaymentStatus,
    },
    #[error("Duplicate transaction id: {0}")]
    DuplicateTransactionId(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Ticket {ticket_id} is {actual}, expected {expected}")]
    InvalidTicketState {
        ticket_id: TicketId,
        actual: TicketStatus,
        expected: TicketStatus,
    },
    #[error("No ticket types configured")]
    NoTicketTypesConfigured,
    #[error("Invalid seat capacity: {0}")]
    InvalidCapacity(i32),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

fn join_ids(ids: &[TicketId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::FlightNotFound(_)
            | CoreError::TicketsNotFound(_)
            | CoreError::BookingNotFound(_)
            | CoreError::PaymentNotFound(_)
            | CoreError::TransactionNotFound(_)
            | CoreError::UserNotFound(_)
            | CoreError::TicketTypeNotFound(_)
            | CoreError::AirplaneNotFound(_)
            | CoreError::AirportNotFound(_) => ErrorKind::NotFound,
            CoreError::TicketsUnavailable(_)
            | CoreError::IdempotencyViolation { .. }
            | CoreError::DuplicateTransactionId(_) => ErrorKind::Conflict,
            CoreError::InvalidOperation(_)
            | CoreError::InvalidTicketState { .. }
            | CoreError::NoTicketTypesConfigured
            | CoreError::InvalidCapacity(_) => ErrorKind::InvalidOperation,
            CoreError::GatewayUnavailable(_) => ErrorKind::ExternalDependency,
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::Forbidden(_) => ErrorKind::Forbidden,
            CoreError::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code. Never change an existing value.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::FlightNotFound(_) => "FLIGHT_NOT_FOUND",
            CoreError::TicketsNotFound(_) => "TICKET_NOT_FOUND",
            CoreError::BookingNotFound(_) => "BOOKING_NOT_FOUND",
            CoreError::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            CoreError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            CoreError::UserNotFound(_) => "USER_NOT_FOUND",
            CoreError::TicketTypeNotFound(_) => "TICKET_TYPE_NOT_FOUND",
            CoreError::AirplaneNotFound(_) => "AIRPLANE_NOT_FOUND",
            CoreError::AirportNotFound(_) => "AIRPORT_NOT_FOUND",
            CoreError::TicketsUnavailable(_) => "TICKETS_UNAVAILABLE",
            CoreError::IdempotencyViolation { .. } => "IDEMPOTENCY_VIOLATION",
            CoreError::DuplicateTransactionId(_) => "DUPLICATE_TRANSACTION_ID",
            CoreError::InvalidOperation(_) => "INVALID_OPERATION",
            CoreError::InvalidTicketState { .. } => "INVALID_TICKET_STATE",
            CoreError::NoTicketTypesConfigured => "NO_TICKET_TYPES_CONFIGURED",
            CoreError::InvalidCapacity(_) => "INVALID_CAPACITY",
            CoreError::GatewayUnavailable(_) => "PAYMENT_GATEWAY_ERROR",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::Forbidden(_) => "FORBIDDEN",
            CoreError::Storage(_) => "INTERNAL_ERROR",
        }
    }

    /// Details a caller needs to decide what to do next.
    pub fn details(&self) -> Value {
        match self {
            CoreError::TicketsNotFound(ids) => json!({ "ticketIds": ids }),
            CoreError::TicketsUnavailable(ids) => json!({ "conflictingTicketIds": ids }),
            CoreError::IdempotencyViolation {
                booking_id,
                current_status,
            } => json!({ "bookingId": booking_id, "currentPaymentStatus": current_status }),
            CoreError::InvalidTicketState {
                ticket_id,
                actual,
                expected,
            } => json!({ "ticketId": ticket_id, "actual": actual, "expected": expected }),
            CoreError::DuplicateTransactionId(txn) => json!({ "transactionId": txn }),
            CoreError::InvalidCapacity(capacity) => json!({ "seatCapacity": capacity }),
            _ => json!({}),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::GatewayUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_tickets_carry_ids() {
        let err = CoreError::TicketsUnavailable(vec![TicketId(3), TicketId(9)]);
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.code(), "TICKETS_UNAVAILABLE");
        assert_eq!(err.details()["conflictingTicketIds"], json!([3, 9]));
        assert_eq!(err.to_string(), "Tickets are not available: 3, 9");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_idempotency_violation_reports_current_status() {
        let err = CoreError::IdempotencyViolation {
            booking_id: BookingId(1),
            current_status: PaymentStatus::Success,
        };
        assert_eq!(err.details()["currentPaymentStatus"], "SUCCESS");
    }

    #[test]
    fn test_only_gateway_errors_are_retryable() {
        assert!(CoreError::GatewayUnavailable("timeout".into()).is_retryable());
        assert_eq!(
            CoreError::GatewayUnavailable("timeout".into()).kind(),
            ErrorKind::ExternalDependency
        );
        assert!(!CoreError::Storage("io".into()).is_retryable());
    }
}
