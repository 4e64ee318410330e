use std::sync::Arc;

use aerobook_booking::{BookingOrchestrator, FlightLifecycleManager, PaymentProcessor};
use aerobook_core::events::EventPublisher;
use aerobook_core::payment::PaymentGateway;
use aerobook_core::repository::Store;
use aerobook_inventory::SeatLedger;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub ledger: SeatLedger,
    pub bookings: Arc<BookingOrchestrator>,
    pub payments: Arc<PaymentProcessor>,
    pub flights: Arc<FlightLifecycleManager>,
    pub auth: AuthConfig,
}

impl AppState {
    /// Wires every service over one store.
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventPublisher>,
        auth: AuthConfig,
    ) -> Self {
        let ledger = SeatLedger::new(store.clone());
        let bookings = Arc::new(BookingOrchestrator::new(
            store.clone(),
            ledger.clone(),
            events.clone(),
        ));
        let payments = Arc::new(PaymentProcessor::new(
            store.clone(),
            ledger.clone(),
            gateway,
            events.clone(),
        ));
        let flights = Arc::new(FlightLifecycleManager::new(
            store,
            ledger.clone(),
            bookings.clone(),
            events,
        ));

        Self {
            ledger,
            bookings,
            payments,
            flights,
            auth,
        }
    }
}
