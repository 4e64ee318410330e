use aerobook_core::models::TicketId;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Price of one ticket at the moment it was reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fare {
    pub ticket_id: TicketId,
    pub base_price: Decimal,
    pub price_multiplier: Decimal,
    pub amount: Decimal,
}

impl Fare {
    pub fn new(ticket_id: TicketId, base_price: Decimal, price_multiplier: Decimal) -> Self {
        Self {
            ticket_id,
            base_price,
            price_multiplier,
            amount: fare(base_price, price_multiplier),
        }
    }
}

/// Flight base price scaled by the ticket type multiplier. Not rounded.
pub fn fare(base_price: Decimal, price_multiplier: Decimal) -> Decimal {
    base_price * price_multiplier
}

/// Sum of fares, rounded half-up to cents once.
pub fn booking_total(fares: &[Fare]) -> Decimal {
    fares
        .iter()
        .map(|f| f.amount)
        .sum::<Decimal>()
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
