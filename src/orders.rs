use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    amount::exact_mul,
    instrument::{Asset, Pair},
};

pub type OrderId = Uuid;

/// Account identifier as asserted by the identity provider (`sub` claim).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        AccountId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Represents which side of the market the order is on.
///
/// # Intuition
/// - `Buy` (Bid): The trader wants to purchase the asset. Buy orders are sorted from **highest to lowest price**
///   because a higher price means more willingness to buy, i.e. more aggressive.
/// - `Sell` (Ask): The trader wants to sell the asset. Sell orders are sorted from **lowest to highest price**
///   because a lower price means more willingness to sell.
///
/// This sorting ensures the matching engine always finds the **best price first**:
/// - Buyers match with the **lowest ask**
/// - Sellers match with the **highest bid**
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,  // Bid
    Sell, // Ask
}

impl Side {
    /// Does a resting order at `resting` satisfy an incoming limit of `limit` on this side?
    pub fn crosses(self, limit: Decimal, resting: Decimal) -> bool {
        match self {
            Side::Buy => limit >= resting,
            Side::Sell => limit <= resting,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

/// A limit order as the engine and the book see it.
///
/// - `remaining` only ever decreases; the order leaves the book when it hits zero
/// - `sequence` is the engine-wide arrival number used for time priority
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub account: AccountId,
    pub pair: Pair,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub remaining: Decimal,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        account: AccountId,
        pair: Pair,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        sequence: u64,
    ) -> Self {
        Order {
            id: Uuid::new_v4(),
            account,
            pair,
            side,
            price,
            quantity,
            remaining: quantity,
            sequence,
            created_at: Utc::now(),
        }
    }

    pub fn filled(&self) -> Decimal {
        self.quantity - self.remaining
    }

    pub fn status(&self) -> OrderStatus {
        if self.remaining.is_zero() {
            OrderStatus::Filled
        } else if self.remaining < self.quantity {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Open
        }
    }

    /// Funds an order of this shape locks while it is open: quote notional
    /// for a buy, base quantity for a sell. `None` if the notional cannot be
    /// represented exactly.
    pub fn exposure_of(
        pair: Pair,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    ) -> Option<(Asset, Decimal)> {
        match side {
            Side::Buy => exact_mul(price, quantity).map(|n| (pair.quote, n)),
            Side::Sell => Some((pair.base, quantity)),
        }
    }

    /// Funds still locked by the unfilled part of this order.
    pub fn exposure(&self) -> Option<(Asset, Decimal)> {
        Order::exposure_of(self.pair, self.side, self.price, self.remaining)
    }
}
