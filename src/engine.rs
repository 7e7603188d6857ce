//! The matching engine: validates, reserves, matches and settles.
//!
//! Each pair owns one [`Market`] behind its own mutex. An order holds that
//! lock for its entire pass (halt check, reservation, matching, settlement,
//! resting), so at most one order per pair is ever matching and a cancel
//! lands either strictly before or strictly after a fill.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    amount::{MAX_DECIMALS, within_precision},
    errors::{ExchangeError, ExchangeResult},
    instrument::Pair,
    leaderboard::Leaderboard,
    ledger::{Ledger, Settlement},
    orderbook::{BookSnapshot, OrderBook},
    orders::{AccountId, Order, OrderId, OrderStatus, Side},
    trade::Trade,
};

/// A validated client request to trade.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub pair: Pair,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// What happened to a submitted order.
#[derive(Debug, Clone)]
pub struct Execution {
    /// The order after matching; `remaining` is what now rests (if anything).
    pub order: Order,
    pub status: OrderStatus,
    pub trades: Vec<Trade>,
}

/// How many filled or cancelled orders each market remembers.
pub const CLOSED_ORDERS_RETAINED: usize = 100_000;

/// Orders that left the book, so a late cancel can tell "already done"
/// apart from "never existed". Oldest entries are forgotten first; a cancel
/// of a forgotten order reads as `NotFound`.
struct ClosedOrders {
    statuses: HashMap<OrderId, (AccountId, OrderStatus)>,
    order: VecDeque<OrderId>,
    capacity: usize,
}

impl ClosedOrders {
    fn with_capacity(capacity: usize) -> Self {
        ClosedOrders {
            statuses: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn insert(&mut self, id: OrderId, owner: AccountId, status: OrderStatus) {
        if self.statuses.insert(id, (owner, status)).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.statuses.remove(&oldest);
            }
        }
    }

    fn get(&self, id: &OrderId) -> Option<&(AccountId, OrderStatus)> {
        self.statuses.get(id)
    }
}

struct Market {
    book: OrderBook,
    closed: ClosedOrders,
    halted: Option<String>,
}

impl Market {
    fn new(pair: Pair) -> Self {
        Market {
            book: OrderBook::new(pair),
            closed: ClosedOrders::with_capacity(CLOSED_ORDERS_RETAINED),
            halted: None,
        }
    }

    fn halt(&mut self, pair: Pair, reason: String) -> String {
        error!(%pair, %reason, "halting market, manual intervention required");
        self.halted = Some(reason.clone());
        reason
    }
}

fn closed_label(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Filled => "filled",
        OrderStatus::Cancelled => "cancelled",
        OrderStatus::Open | OrderStatus::PartiallyFilled => "closed",
    }
}

/// Rejects orders that could never be valid, before any funds move.
pub fn validate(order: &NewOrder) -> ExchangeResult<()> {
    if order.price <= Decimal::ZERO {
        return Err(ExchangeError::Validation("price must be > 0".into()));
    }
    if order.quantity <= Decimal::ZERO {
        return Err(ExchangeError::Validation("amount must be > 0".into()));
    }
    if !within_precision(order.price) {
        return Err(ExchangeError::Validation(format!(
            "price allows at most {} decimal places",
            MAX_DECIMALS
        )));
    }
    if !within_precision(order.quantity) {
        return Err(ExchangeError::Validation(format!(
            "amount allows at most {} decimal places",
            MAX_DECIMALS
        )));
    }
    Ok(())
}

pub struct Engine {
    ledger: Arc<Ledger>,
    leaderboard: Arc<Leaderboard>,
    markets: HashMap<Pair, Mutex<Market>>,
    sequence: AtomicU64,
}

impl Engine {
    pub fn new(ledger: Arc<Ledger>, leaderboard: Arc<Leaderboard>) -> Self {
        let markets = Pair::supported()
            .iter()
            .map(|p| (*p, Mutex::new(Market::new(*p))))
            .collect();
        Engine {
            ledger,
            leaderboard,
            markets,
            sequence: AtomicU64::new(1),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn leaderboard(&self) -> &Leaderboard {
        &self.leaderboard
    }

    fn market(&self, pair: Pair) -> ExchangeResult<&Mutex<Market>> {
        self.markets
            .get(&pair)
            .ok_or_else(|| ExchangeError::Validation(format!("unsupported symbol: `{}`", pair)))
    }

    /// Runs one order through Received → Validated → Matching and returns
    /// its fills. Rejections happen before any ledger or book mutation.
    pub fn submit(&self, account: &AccountId, req: NewOrder) -> ExchangeResult<Execution> {
        validate(&req)?;
        let (asset, locked) = Order::exposure_of(req.pair, req.side, req.price, req.quantity)
            .ok_or_else(|| ExchangeError::Validation("order notional is out of range".into()))?;

        let pair = req.pair;
        let mut market = self.market(pair)?.lock();
        if let Some(reason) = &market.halted {
            return Err(ExchangeError::Halted {
                pair,
                reason: reason.clone(),
                trades: Vec::new(),
            });
        }

        self.ledger.reserve(account, asset, locked)?;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let order = Order::new(account.clone(), pair, req.side, req.price, req.quantity, seq);
        self.leaderboard.record_order(account, req.quantity);
        info!(order = %order.id, %account, %pair, side = %order.side, price = %order.price, quantity = %order.quantity, "order accepted");

        let outcome = match market.book.match_order(order) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.ledger.release(account, asset, locked)?;
                return Err(e.into());
            }
        };
        let taker = outcome.taker;

        let mut trades = Vec::with_capacity(outcome.fills.len());
        for fill in &outcome.fills {
            let (buyer, seller, buy_order_id, sell_order_id, buyer_limit) = match taker.side {
                Side::Buy => (
                    taker.account.clone(),
                    fill.maker_account.clone(),
                    taker.id,
                    fill.maker_id,
                    taker.price,
                ),
                Side::Sell => (
                    fill.maker_account.clone(),
                    taker.account.clone(),
                    fill.maker_id,
                    taker.id,
                    fill.price,
                ),
            };
            let settlement = Settlement {
                pair,
                buyer,
                seller,
                price: fill.price,
                quantity: fill.quantity,
                buyer_limit,
            };
            if let Err(e) = self.ledger.settle(&settlement) {
                let reason = market.halt(
                    pair,
                    format!("settlement of fill against order {} failed: {}", fill.maker_id, e),
                );
                return Err(ExchangeError::Halted {
                    pair,
                    reason,
                    trades,
                });
            }
            if fill.maker_remaining.is_zero() {
                market
                    .closed
                    .insert(fill.maker_id, fill.maker_account.clone(), OrderStatus::Filled);
            }
            trades.push(Trade {
                id: Uuid::new_v4(),
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
                pair,
                buy_order_id,
                sell_order_id,
                buyer: settlement.buyer,
                seller: settlement.seller,
                taker_side: taker.side,
                price: fill.price,
                quantity: fill.quantity,
                timestamp: Utc::now(),
            });
        }

        let status = taker.status();
        if status == OrderStatus::Filled {
            market
                .closed
                .insert(taker.id, taker.account.clone(), OrderStatus::Filled);
        }
        info!(order = %taker.id, trades = trades.len(), remaining = %taker.remaining, ?status, "order processed");
        Ok(Execution {
            order: taker,
            status,
            trades,
        })
    }

    /// Cancels the caller's resting order and releases what it still locks.
    ///
    /// An order that already left the book is a `Conflict` and changes
    /// nothing; an unknown order, or someone else's, is `NotFound`.
    pub fn cancel(&self, account: &AccountId, order_id: OrderId) -> ExchangeResult<Order> {
        for (pair, lock) in &self.markets {
            let pair = *pair;
            let mut market = lock.lock();
            let owner = market.book.get(order_id).map(|o| o.account.clone());
            match owner {
                Some(owner) if &owner == account => {
                    if let Some(reason) = &market.halted {
                        return Err(ExchangeError::Halted {
                            pair,
                            reason: reason.clone(),
                            trades: Vec::new(),
                        });
                    }
                    let order = market.book.cancel(order_id)?;
                    let released = order
                        .exposure()
                        .ok_or_else(|| format!("exposure of order {} is out of range", order_id))
                        .and_then(|(asset, amount)| {
                            self.ledger
                                .release(account, asset, amount)
                                .map(|()| amount)
                                .map_err(|e| e.to_string())
                        });
                    let amount = match released {
                        Ok(amount) => amount,
                        Err(e) => {
                            let reason = market.halt(
                                pair,
                                format!("release for cancelled order {} failed: {}", order_id, e),
                            );
                            return Err(ExchangeError::Halted {
                                pair,
                                reason,
                                trades: Vec::new(),
                            });
                        }
                    };
                    market
                        .closed
                        .insert(order_id, account.clone(), OrderStatus::Cancelled);
                    info!(order = %order_id, %account, %pair, released = %amount, "order cancelled");
                    return Ok(order);
                }
                Some(_) => break,
                None => {
                    if let Some((owner, status)) = market.closed.get(&order_id) {
                        if owner != account {
                            break;
                        }
                        warn!(order = %order_id, %account, "cancel of closed order ignored");
                        return Err(ExchangeError::Conflict(format!(
                            "order {} is already {}",
                            order_id,
                            closed_label(*status)
                        )));
                    }
                }
            }
        }
        Err(ExchangeError::NotFound(format!("order {} not found", order_id)))
    }

    /// The account's resting orders across every pair.
    pub fn open_orders(&self, account: &AccountId) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .markets
            .values()
            .flat_map(|m| m.lock().book.open_orders(account))
            .collect();
        orders.sort_by_key(|o| o.sequence);
        orders
    }

    pub fn snapshot(&self, pair: Pair) -> ExchangeResult<BookSnapshot> {
        Ok(self.market(pair)?.lock().book.snapshot())
    }

    pub fn is_halted(&self, pair: Pair) -> bool {
        self.markets
            .get(&pair)
            .map(|m| m.lock().halted.is_some())
            .unwrap_or(false)
    }
}
