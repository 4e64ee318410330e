use std::fmt;
use std::str::FromStr;

use aerobook_shared::Masked;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::CoreError;

macro_rules! id_type {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub i64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<i64> for $name {
                fn from(value: i64) -> Self {
                    Self(value)
                }
            }
        )*
    };
}

id_type!(
    FlightId,
    TicketId,
    BookingId,
    PaymentId,
    UserId,
    AirplaneId,
    AirportId,
    TicketTypeId,
);

/// Generates `as_str`, `Display` and `FromStr` for a status enum stored as
/// an upper-case string.
macro_rules! status_enum {
    ($name:ident { $($variant:ident => $text:literal),* $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)*
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok($name::$variant),)*
                    other => Err(CoreError::Validation(format!(
                        "unknown {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightStatus {
    Scheduled,
    Delayed,
    Canceled,
}

status_enum!(FlightStatus {
    Scheduled => "SCHEDULED",
    Delayed => "DELAYED",
    Canceled => "CANCELED",
});

impl FlightStatus {
    /// SCHEDULED and DELAYED move freely between each other, anything can be
    /// canceled, and CANCELED is terminal.
    pub fn can_transition_to(&self, next: FlightStatus) -> bool {
        match (self, next) {
            (FlightStatus::Canceled, FlightStatus::Canceled) => true,
            (FlightStatus::Canceled, _) => false,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Available,
    Booked,
    Paid,
    Canceled,
}

status_enum!(TicketStatus {
    Available => "AVAILABLE",
    Booked => "BOOKED",
    Paid => "PAID",
    Canceled => "CANCELED",
});

impl TicketStatus {
    /// Held tickets are owned by exactly one active booking.
    pub fn is_held(&self) -> bool {
        matches!(self, TicketStatus::Booked | TicketStatus::Paid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Canceled,
}

status_enum!(BookingStatus {
    Pending => "PENDING",
    Confirmed => "CONFIRMED",
    Canceled => "CANCELED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

status_enum!(PaymentStatus {
    Pending => "PENDING",
    Success => "SUCCESS",
    Failed => "FAILED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    CreditCard,
    Momo,
    Banking,
    Cash,
}

status_enum!(PaymentMethod {
    CreditCard => "CREDIT_CARD",
    Momo => "MOMO",
    Banking => "BANKING",
    Cash => "CASH",
});

// Reference data

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Airplane {
    pub id: AirplaneId,
    pub model: String,
    pub seat_capacity: i32,
    pub airline: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Airport {
    pub id: AirportId,
    pub code: String,
    pub name: String,
    pub city: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketType {
    pub id: TicketTypeId,
    pub name: String,
    pub price_multiplier: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: Masked<String>,
}

// Inventory

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flight {
    pub id: FlightId,
    pub airplane_id: AirplaneId,
    pub departure_airport_id: AirportId,
    pub arrival_airport_id: AirportId,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub base_price: Decimal,
    pub status: FlightStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFlight {
    pub airplane_id: AirplaneId,
    pub departure_airport_id: AirportId,
    pub arrival_airport_id: AirportId,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub base_price: Decimal,
}

impl NewFlight {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.departure_time >= self.arrival_time {
            return Err(CoreError::Validation(
                "departure time must be before arrival time".to_string(),
            ));
        }
        if self.base_price <= Decimal::ZERO {
            return Err(CoreError::Validation(
                "base price must be positive".to_string(),
            ));
        }
        if self.departure_airport_id == self.arrival_airport_id {
            return Err(CoreError::Validation(
                "departure and arrival airports must differ".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub flight_id: FlightId,
    pub ticket_type_id: TicketTypeId,
    pub seat_number: String,
    pub status: TicketStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub flight_id: FlightId,
    pub ticket_type_id: TicketTypeId,
    pub seat_number: String,
}

// Bookings

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub user_id: UserId,
    pub booking_date: NaiveDateTime,
    pub total_amount: Decimal,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Human-facing reference, e.g. `BK-000042`.
    pub fn reference(&self) -> String {
        format!("BK-{:06}", self.id.0)
    }
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub user_id: UserId,
    pub booking_date: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingTicket {
    pub booking_id: BookingId,
    pub ticket_id: TicketId,
}

// Payments

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub booking_id: BookingId,
    pub amount: Decimal,
    pub transaction_id: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub booking_id: BookingId,
    pub amount: Decimal,
    pub transaction_id: String,
    pub method: PaymentMethod,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_parsing_is_case_insensitive() {
        assert_eq!("booked".parse::<TicketStatus>().unwrap(), TicketStatus::Booked);
        assert_eq!(
            "credit_card".parse::<PaymentMethod>().unwrap(),
            PaymentMethod::CreditCard
        );
        let err = "WIRE".parse::<PaymentMethod>().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_canceled_flight_is_terminal() {
        assert!(FlightStatus::Scheduled.can_transition_to(FlightStatus::Delayed));
        assert!(FlightStatus::Delayed.can_transition_to(FlightStatus::Scheduled));
        assert!(FlightStatus::Delayed.can_transition_to(FlightStatus::Canceled));
        assert!(!FlightStatus::Canceled.can_transition_to(FlightStatus::Scheduled));
        assert!(!FlightStatus::Canceled.can_transition_to(FlightStatus::Delayed));
    }

    #[test]
    fn test_booking_reference_is_zero_padded() {
        let now = Utc::now();
        let booking = Booking {
            id: BookingId(42),
            user_id: UserId(1),
            booking_date: now.naive_utc(),
            total_amount: Decimal::ZERO,
            status: BookingStatus::Confirmed,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(booking.reference(), "BK-000042");
    }

    #[test]
    fn test_new_flight_validation() {
        let now = Utc::now();
        let mut flight = NewFlight {
            airplane_id: AirplaneId(1),
            departure_airport_id: AirportId(1),
            arrival_airport_id: AirportId(2),
            departure_time: now,
            arrival_time: now + Duration::hours(2),
            base_price: Decimal::new(100, 0),
        };
        assert!(flight.validate().is_ok());

        flight.arrival_time = now - Duration::hours(1);
        assert!(matches!(flight.validate(), Err(CoreError::Validation(_))));

        flight.arrival_time = now + Duration::hours(1);
        flight.base_price = Decimal::ZERO;
        assert!(matches!(flight.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_ids_serialize_as_plain_integers() {
        assert_eq!(serde_json::to_string(&TicketId(12)).unwrap(), "12");
        assert_eq!(serde_json::to_string(&TicketStatus::Paid).unwrap(), "\"PAID\"");
    }
}
