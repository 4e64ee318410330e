use aerobook_core::events::EventPublisher;
use aerobook_shared::DomainEvent;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Fans committed domain events out to in-process subscribers.
#[derive(Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<DomainEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: DomainEvent) {
        let topic = event.topic();
        let key = event.key();
        match self.tx.send(event) {
            Ok(receivers) => info!("Published {}/{} to {} subscribers", topic, key, receivers),
            // No subscriber is not an error for the producer.
            Err(_) => debug!("No subscribers for {}/{}", topic, key),
        }
    }
}
