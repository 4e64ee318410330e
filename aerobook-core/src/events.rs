use aerobook_shared::DomainEvent;

/// Sink for domain events. Called only after the producing transaction has
/// committed; publishing never fails the operation.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, event: DomainEvent) {
        tracing::trace!(topic = event.topic(), "Dropping event");
    }
}
