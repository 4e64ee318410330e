use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{BookingId, PaymentId, PaymentMethod};

/// What the gateway is asked to charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub payment_id: PaymentId,
    pub booking_id: BookingId,
    pub transaction_id: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
}

/// A definitive answer from the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayDecision {
    Approved { reference: String },
    Declined { reason: String },
}

/// The gateway could not give an answer. The charge may be retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    #[error("gateway timed out")]
    Timeout,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<GatewayDecision, GatewayError>;

    fn name(&self) -> &str;
}

/// `TXN-` followed by 32 upper-case hex digits.
pub fn new_transaction_id() -> String {
    format!("TXN-{}", Uuid::new_v4().simple().to_string().to_uppercase())
}
