pub mod inventory;
pub mod pricing;

pub use inventory::{GenerationReport, Reservation, SeatLedger, VoidedSeats};
pub use pricing::{booking_total, fare, Fare};
