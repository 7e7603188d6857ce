use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    instrument::{Asset, Pair},
    orders::{AccountId, OrderId, Side},
};

/// A trade represents a matched transaction between two orders.
///
/// # Terminology
/// - **Maker**: The order that was already resting in the order book (providing liquidity).
/// - **Taker**: The incoming order that triggered the trade (taking liquidity).
///   `taker_side` records which side that was.
///
/// # Behavior
/// - The trade always executes at the **maker's price** (book price).
/// - Partial fills may occur: multiple trades can be generated from one order.
///
/// Example:
/// - A buy limit at 100 (taker) matches a resting sell at 95 (maker).
/// - A trade is created at price 95.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    /// Engine-wide execution number; orders trades that share a timestamp.
    pub sequence: u64,
    pub pair: Pair,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub taker_side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    /// The two per-account views of this trade: buyer first, then seller.
    pub fn transactions(&self) -> [Transaction; 2] {
        let leg = |account: &AccountId, side| Transaction {
            trade_id: self.id,
            account: account.clone(),
            currency: self.pair.base,
            side,
            price: self.price,
            amount: self.quantity,
            date: self.timestamp,
        };
        [leg(&self.buyer, Side::Buy), leg(&self.seller, Side::Sell)]
    }
}

/// One account's leg of a trade, as shown in its transaction history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub trade_id: Uuid,
    pub account: AccountId,
    pub currency: Asset,
    #[serde(rename = "type")]
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub date: DateTime<Utc>,
}

impl Transaction {
    pub fn volume(&self) -> Decimal {
        self.price.saturating_mul(self.amount)
    }
}
