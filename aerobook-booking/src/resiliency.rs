use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aerobook_core::payment::{ChargeRequest, GatewayDecision, GatewayError, PaymentGateway};
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failing fast
    HalfOpen, // Letting a probe through
}

pub struct CircuitBreaker {
    pub name: String,
    pub state: RwLock<CircuitState>,
    pub failure_count: AtomicUsize,
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
    pub last_failure: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicUsize::new(0),
            failure_threshold: threshold.max(1),
            reset_timeout: timeout,
            last_failure: RwLock::new(None),
        }
    }

    pub async fn current(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Whether a call may go through now.
    pub async fn check(&self) -> bool {
        let state = *self.state.read().await;
        if state == CircuitState::Closed {
            return true;
        }

        if state == CircuitState::Open {
            let last_fail = *self.last_failure.read().await;
            if let Some(instant) = last_fail {
                if instant.elapsed() >= self.reset_timeout {
                    let mut s = self.state.write().await;
                    *s = CircuitState::HalfOpen;
                    tracing::info!("Circuit Breaker [{}] moving to Half-Open", self.name);
                    return true;
                }
            }
            return false;
        }

        true
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            self.failure_count.store(0, Ordering::SeqCst);
            tracing::info!("Circuit Breaker [{}] recovered to Closed", self.name);
        } else if *state == CircuitState::Closed {
            self.failure_count.store(0, Ordering::SeqCst);
        }
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;

        if count >= self.failure_threshold || *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            let mut last = self.last_failure.write().await;
            *last = Some(Instant::now());
            tracing::error!("Circuit Breaker [{}] TRIPPED to Open. Failures: {}", self.name, count);
        }
    }
}

/// Gateway wrapper that stops calling a failing gateway for a while.
/// Declines are answers, so only transport errors count as failures.
pub struct CircuitBreakerGateway {
    inner: Arc<dyn PaymentGateway>,
    breaker: CircuitBreaker,
}

impl CircuitBreakerGateway {
    pub fn new(inner: Arc<dyn PaymentGateway>, threshold: usize, reset_timeout: Duration) -> Self {
        let breaker = CircuitBreaker::new(inner.name(), threshold, reset_timeout);
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl PaymentGateway for CircuitBreakerGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<GatewayDecision, GatewayError> {
        if !self.breaker.check().await {
            return Err(GatewayError::Unavailable(format!(
                "circuit breaker [{}] is open",
                self.breaker.name
            )));
        }
        match self.inner.charge(request).await {
            Ok(decision) => {
                self.breaker.record_success().await;
                Ok(decision)
            }
            Err(err) => {
                self.breaker.record_failure().await;
                Err(err)
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::MockPaymentGateway;
    use aerobook_core::models::{BookingId, PaymentId, PaymentMethod};
    use rust_decimal::Decimal;

    fn request() -> ChargeRequest {
        ChargeRequest {
            payment_id: PaymentId(1),
            booking_id: BookingId(1),
            transaction_id: "TXN-TEST".to_string(),
            amount: Decimal::new(100, 0),
            method: PaymentMethod::CreditCard,
        }
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new("test", 2, Duration::from_secs(60));
        assert!(breaker.check().await);
        breaker.record_failure().await;
        assert_eq!(breaker.current().await, CircuitState::Closed);
        breaker.record_failure().await;
        assert_eq!(breaker.current().await, CircuitState::Open);
        assert!(!breaker.check().await);
    }

    #[tokio::test]
    async fn test_half_open_probe_recovers() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(0));
        breaker.record_failure().await;
        assert!(breaker.check().await);
        assert_eq!(breaker.current().await, CircuitState::HalfOpen);
        breaker.record_success().await;
        assert_eq!(breaker.current().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast_without_calling_gateway() {
        let mock = Arc::new(MockPaymentGateway::unavailable());
        let gateway = CircuitBreakerGateway::new(mock.clone(), 2, Duration::from_secs(60));

        for _ in 0..2 {
            assert!(gateway.charge(&request()).await.is_err());
        }
        assert_eq!(mock.calls(), 2);

        let err = gateway.charge(&request()).await.unwrap_err();
        assert!(err.to_string().contains("circuit breaker"));
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_declines_do_not_trip_the_breaker() {
        let gateway = CircuitBreakerGateway::new(
            Arc::new(MockPaymentGateway::declining()),
            1,
            Duration::from_secs(60),
        );
        for _ in 0..3 {
            let decision = gateway.charge(&request()).await.unwrap();
            assert!(matches!(decision, GatewayDecision::Declined { .. }));
        }
        assert_eq!(gateway.breaker().current().await, CircuitState::Closed);
    }
}
