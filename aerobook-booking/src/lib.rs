pub mod bookings;
pub mod expiry;
pub mod flights;
pub mod payments;
pub mod resiliency;

pub use bookings::{BookingOrchestrator, BookingSummary, BookingUpdate, Cancellation, StatusOverride};
pub use expiry::{ExpirySweep, SweepReport};
pub use flights::{CascadeReport, FlightLifecycleManager};
pub use payments::{MockMode, MockPaymentGateway, PaymentProcessor};
pub use resiliency::{CircuitBreaker, CircuitBreakerGateway, CircuitState};
