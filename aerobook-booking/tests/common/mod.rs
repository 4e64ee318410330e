#![allow(dead_code)]

use std::sync::Arc;

use aerobook_booking::{BookingOrchestrator, FlightLifecycleManager, MockPaymentGateway, PaymentProcessor};
use aerobook_core::events::EventPublisher;
use aerobook_core::models::{Flight, NewFlight, Ticket, TicketId, TicketStatus, TicketType, User};
use aerobook_core::payment::PaymentGateway;
use aerobook_core::repository::Store;
use aerobook_inventory::SeatLedger;
use aerobook_shared::DomainEvent;
use aerobook_store::{BroadcastPublisher, MemoryStore};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;

pub struct Fixture {
    pub store: MemoryStore,
    pub ledger: SeatLedger,
    pub bookings: Arc<BookingOrchestrator>,
    pub payments: Arc<PaymentProcessor>,
    pub flights: FlightLifecycleManager,
    pub publisher: BroadcastPublisher,
    pub economy: TicketType,
    pub business: TicketType,
    pub user: User,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_gateway(Arc::new(MockPaymentGateway::approving())).await
    }

    pub async fn with_gateway(gateway: Arc<dyn PaymentGateway>) -> Self {
        let store = MemoryStore::new();
        let economy = store.add_ticket_type("Economy", Decimal::new(10, 1)).await;
        let business = store.add_ticket_type("Business", Decimal::new(20, 1)).await;
        let user = store.add_user("alice", "alice@example.com").await;

        let shared: Arc<dyn Store> = Arc::new(store.clone());
        let publisher = BroadcastPublisher::new(64);
        let events: Arc<dyn EventPublisher> = Arc::new(publisher.clone());
        let ledger = SeatLedger::new(shared.clone());
        let bookings = Arc::new(BookingOrchestrator::new(
            shared.clone(),
            ledger.clone(),
            events.clone(),
        ));
        let payments = Arc::new(PaymentProcessor::new(
            shared.clone(),
            ledger.clone(),
            gateway,
            events.clone(),
        ));
        let flights = FlightLifecycleManager::new(shared, ledger.clone(), bookings.clone(), events);

        Self {
            store,
            ledger,
            bookings,
            payments,
            flights,
            publisher,
            economy,
            business,
            user,
        }
    }

    /// Flight with the given seat capacity and a base price of 100.
    pub async fn flight(&self, capacity: i32) -> Flight {
        let plane = self.store.add_airplane("A321", capacity).await;
        let from = self.store.add_airport("SGN", "Ho Chi Minh City").await;
        let to = self.store.add_airport("HAN", "Hanoi").await;
        let departure = Utc::now() + Duration::days(7);
        let (flight, _) = self
            .flights
            .create_flight(NewFlight {
                airplane_id: plane.id,
                departure_airport_id: from.id,
                arrival_airport_id: to.id,
                departure_time: departure,
                arrival_time: departure + Duration::hours(2),
                base_price: Decimal::new(100, 0),
            })
            .await
            .unwrap();
        flight
    }

    pub async fn seat(&self, flight: &Flight, seat: &str, ticket_type: &TicketType) -> Ticket {
        self.ledger
            .flight_tickets(flight.id)
            .await
            .unwrap()
            .into_iter()
            .find(|t| t.seat_number == seat && t.ticket_type_id == ticket_type.id)
            .unwrap()
    }

    pub async fn status_of(&self, ids: &[TicketId]) -> Vec<TicketStatus> {
        self.ledger
            .tickets(ids)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.status)
            .collect()
    }

    pub async fn another_user(&self, name: &str) -> User {
        self.store
            .add_user(name, &format!("{}@example.com", name))
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.publisher.subscribe()
    }
}

pub fn drain(rx: &mut broadcast::Receiver<DomainEvent>) -> Vec<DomainEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
