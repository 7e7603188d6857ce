use crate::{
    instrument::Pair,
    orders::{AccountId, Order, OrderId, Side},
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BookError {
    #[error("order {0} not found")]
    NotFound(OrderId),
    #[error("order {id} does not belong on the {pair} book")]
    WrongPair { id: OrderId, pair: Pair },
    #[error("order {0} has no open quantity")]
    NothingToRest(OrderId),
}

/// An [`OrderBook`] stores **resting** buy and sell orders for one pair in
/// two separate [`BTreeMap`]s:
/// - `bids` (buy orders)
/// - `asks` (sell orders)
///
/// Each price level (key) has a FIFO queue of orders stored in a [`VecDeque`]
/// to maintain **price-time** priority.
#[derive(Debug, Clone)]
pub struct OrderBook {
    pair: Pair,
    /// Buy orders, keyed by price in ascending order.
    ///
    /// For matching, we iterate **in reverse** to find the highest bid first.
    bids: BTreeMap<Decimal, VecDeque<Order>>,

    /// Sell orders, keyed by price in ascending order.
    ///
    /// For matching, we iterate **forwards** to find the lowest ask first.
    asks: BTreeMap<Decimal, VecDeque<Order>>,
}

/// One execution against a resting order, at that order's price.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub maker_id: OrderId,
    pub maker_account: AccountId,
    pub price: Decimal,
    pub quantity: Decimal,
    /// Maker's remaining quantity after this fill.
    pub maker_remaining: Decimal,
}

/// Result of [`OrderBook::match_order`]: the fills in execution order and the
/// taker as it stands afterwards.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub fills: Vec<Fill>,
    pub taker: Order,
    pub rested: bool,
}

/// A resting order as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookEntry {
    pub price: Decimal,
    pub amount: Decimal,
    pub total: Decimal,
}

/// Immutable copy of both sides of a book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookSnapshot {
    pub currency: String,
    /// Highest price first, earliest first within a price.
    pub buy_orders: Vec<BookEntry>,
    /// Lowest price first, earliest first within a price.
    pub sell_orders: Vec<BookEntry>,
}

/// Internal enum to unify forward (`IterMut`) and reverse (`Rev<IterMut>`) BTreeMap iteration.
///
/// - [`EitherIter::Fwd`] handles ascending iteration over prices.
/// - [`EitherIter::Rev`] handles descending iteration (used for matching sells against the highest bids).
enum EitherIter<'a> {
    /// Forward (ascending) iteration over the price levels.
    Fwd(std::collections::btree_map::IterMut<'a, Decimal, VecDeque<Order>>),
    /// Reverse (descending) iteration over the price levels.
    Rev(std::iter::Rev<std::collections::btree_map::IterMut<'a, Decimal, VecDeque<Order>>>),
}

impl<'a> Iterator for EitherIter<'a> {
    type Item = (&'a Decimal, &'a mut VecDeque<Order>);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            EitherIter::Fwd(iter) => iter.next(),
            EitherIter::Rev(iter) => iter.next(),
        }
    }
}

/// Matches an **incoming order** against one side of the book, best price
/// first, for as long as the level price crosses the incoming limit.
///
/// The fill quantity is `min(incoming.remaining, resting.remaining)`, so
/// neither order is overfilled and one incoming order may sweep several
/// levels. Fully filled resting orders are popped and empty levels pruned.
///
/// # Example
/// - A buy for 1.0 @ 100 meets asks of 0.6 @ 95 and 0.5 @ 99.
/// - The engine fills 0.6 @ 95, then 0.4 @ 99, leaving 0.1 @ 99 resting.
fn match_incoming_side(
    incoming: &mut Order,
    book_side: &mut BTreeMap<Decimal, VecDeque<Order>>,
    reversed: bool,
) -> Vec<Fill> {
    trace!(order = %incoming.id, side = %incoming.side, price = %incoming.price, "matching incoming order");
    let mut fills = Vec::new();
    let mut levels_to_remove = Vec::new();

    let iter = if reversed {
        EitherIter::Rev(book_side.iter_mut().rev())
    } else {
        EitherIter::Fwd(book_side.iter_mut())
    };

    // Labeled loop to break out early once the incoming order is done or stops crossing.
    'outer: for (&price, orders_at_price) in iter {
        if !incoming.side.crosses(incoming.price, price) {
            break;
        }
        while let Some(order) = orders_at_price.front_mut() {
            let fill_qty = incoming.remaining.min(order.remaining);

            incoming.remaining -= fill_qty;
            order.remaining -= fill_qty;

            fills.push(Fill {
                maker_id: order.id,
                maker_account: order.account.clone(),
                price,
                quantity: fill_qty,
                maker_remaining: order.remaining,
            });

            if order.remaining.is_zero() {
                orders_at_price.pop_front();
            }
            if orders_at_price.is_empty() {
                levels_to_remove.push(price);
            }
            if incoming.remaining.is_zero() {
                break 'outer;
            }
        }
    }

    for price in levels_to_remove {
        book_side.remove(&price);
    }
    debug!(order = %incoming.id, fills = fills.len(), remaining = %incoming.remaining, "matched");
    fills
}

fn entries<'a>(levels: impl Iterator<Item = &'a VecDeque<Order>>) -> Vec<BookEntry> {
    levels
        .flat_map(|q| q.iter())
        .map(|o| BookEntry {
            price: o.price,
            amount: o.remaining,
            total: o.price * o.remaining,
        })
        .collect()
}

impl OrderBook {
    /// Creates a new, empty [`OrderBook`] for `pair`.
    pub fn new(pair: Pair) -> Self {
        Self {
            pair,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    /// Places a resting order at the back of its price level.
    pub fn insert(&mut self, order: Order) -> Result<(), BookError> {
        if order.pair != self.pair {
            return Err(BookError::WrongPair {
                id: order.id,
                pair: self.pair,
            });
        }
        if order.remaining <= Decimal::ZERO {
            return Err(BookError::NothingToRest(order.id));
        }
        let book_side = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        book_side.entry(order.price).or_default().push_back(order);
        Ok(())
    }

    /// Matches an incoming limit order against the opposite side and rests
    /// any remainder.
    ///
    /// - A buy walks the `asks` from lowest to highest.
    /// - A sell walks the `bids` from highest to lowest.
    pub fn match_order(&mut self, mut incoming: Order) -> Result<MatchOutcome, BookError> {
        if incoming.pair != self.pair {
            return Err(BookError::WrongPair {
                id: incoming.id,
                pair: self.pair,
            });
        }
        let fills = match incoming.side {
            Side::Buy => match_incoming_side(&mut incoming, &mut self.asks, false),
            Side::Sell => match_incoming_side(&mut incoming, &mut self.bids, true),
        };
        let rested = incoming.remaining > Decimal::ZERO;
        if rested {
            self.insert(incoming.clone())?;
        }
        Ok(MatchOutcome {
            fills,
            taker: incoming,
            rested,
        })
    }

    /// Removes a resting order, pruning its level if it empties.
    //cancel order linear time implementation
    pub fn cancel(&mut self, order_id: OrderId) -> Result<Order, BookError> {
        for book_side in [&mut self.bids, &mut self.asks] {
            let mut found = None;
            for (price, queue) in book_side.iter_mut() {
                if let Some(pos) = queue.iter().position(|o| o.id == order_id) {
                    found = queue.remove(pos).map(|o| (*price, o, queue.is_empty()));
                    break;
                }
            }
            if let Some((price, order, emptied)) = found {
                if emptied {
                    book_side.remove(&price);
                }
                return Ok(order);
            }
        }
        Err(BookError::NotFound(order_id))
    }

    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        self.bids
            .values()
            .chain(self.asks.values())
            .flat_map(|q| q.iter())
            .find(|o| o.id == order_id)
    }

    /// The account's resting orders, bids then asks, each in priority order.
    pub fn open_orders(&self, account: &AccountId) -> Vec<Order> {
        self.bids
            .values()
            .rev()
            .chain(self.asks.values())
            .flat_map(|q| q.iter())
            .filter(|o| &o.account == account)
            .cloned()
            .collect()
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn snapshot(&self) -> BookSnapshot {
        BookSnapshot {
            currency: self.pair.base.to_string(),
            buy_orders: entries(self.bids.values().rev()),
            sell_orders: entries(self.asks.values()),
        }
    }
}

//tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{BTC_USDC, ETH_USDC};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn limit(seq: u64, side: Side, price: Decimal, quantity: Decimal) -> Order {
        Order::new(
            AccountId::new(format!("acct-{seq}")),
            BTC_USDC,
            side,
            price,
            quantity,
            seq,
        )
    }

    /// A buy sweeping two ask levels, filled at each maker's price.
    #[test]
    fn test_buy_sweeps_levels_at_maker_prices() {
        let mut ob = OrderBook::new(BTC_USDC);
        ob.insert(limit(1, Side::Sell, dec!(95), dec!(0.6))).unwrap();
        ob.insert(limit(2, Side::Sell, dec!(99), dec!(0.5))).unwrap();

        let out = ob.match_order(limit(3, Side::Buy, dec!(100), dec!(1.0))).unwrap();

        assert_eq!(out.fills.len(), 2);
        assert_eq!((out.fills[0].price, out.fills[0].quantity), (dec!(95), dec!(0.6)));
        assert_eq!((out.fills[1].price, out.fills[1].quantity), (dec!(99), dec!(0.4)));
        assert!(out.taker.remaining.is_zero());
        assert!(!out.rested);
        assert_eq!(ob.best_bid(), None);
        let snap = ob.snapshot();
        assert_eq!(snap.sell_orders.len(), 1);
        assert_eq!(snap.sell_orders[0].amount, dec!(0.1));
    }

    /// A sell with no crossing bids rests entirely.
    #[test]
    fn test_sell_without_bids_rests() {
        let mut ob = OrderBook::new(ETH_USDC);
        let sell = Order::new(
            AccountId::new("a"),
            ETH_USDC,
            Side::Sell,
            dec!(50),
            dec!(2.0),
            1,
        );
        let out = ob.match_order(sell).unwrap();
        assert!(out.fills.is_empty());
        assert!(out.rested);
        let snap = ob.snapshot();
        assert_eq!(
            snap.sell_orders,
            vec![BookEntry {
                price: dec!(50),
                amount: dec!(2.0),
                total: dec!(100.0)
            }]
        );
        assert_eq!(snap.currency, "ETH");
    }

    /// Tests a limit sell that partially fills against a smaller bid and rests the remainder.
    #[test]
    fn test_partial_fill_rests_remainder() {
        let mut ob = OrderBook::new(BTC_USDC);
        ob.insert(limit(1, Side::Buy, dec!(100), dec!(4))).unwrap();

        let out = ob.match_order(limit(2, Side::Sell, dec!(90), dec!(10))).unwrap();

        assert_eq!(out.fills.len(), 1);
        assert_eq!(out.fills[0].quantity, dec!(4));
        assert_eq!(out.fills[0].price, dec!(100));
        assert_eq!(out.fills[0].maker_remaining, Decimal::ZERO);
        assert!(out.rested);
        assert_eq!(ob.best_bid(), None);
        assert_eq!(ob.best_ask(), Some(dec!(90)));
        assert_eq!(ob.get(out.taker.id).unwrap().remaining, dec!(6));
    }

    #[test]
    fn test_non_crossing_limit_does_not_trade() {
        let mut ob = OrderBook::new(BTC_USDC);
        ob.insert(limit(1, Side::Sell, dec!(101), dec!(1))).unwrap();
        let out = ob.match_order(limit(2, Side::Buy, dec!(100), dec!(1))).unwrap();
        assert!(out.fills.is_empty());
        assert_eq!(ob.best_bid(), Some(dec!(100)));
        assert_eq!(ob.best_ask(), Some(dec!(101)));
    }

    /// Tests that FIFO order is respected for multiple orders at the same price.
    #[test]
    fn test_queue_fairness_fifo_fill_order() {
        let mut ob = OrderBook::new(BTC_USDC);
        let first = limit(1, Side::Sell, dec!(100), dec!(4));
        let second = limit(2, Side::Sell, dec!(100), dec!(6));
        let (first_id, second_id) = (first.id, second.id);
        ob.insert(first).unwrap();
        ob.insert(second).unwrap();

        let out = ob.match_order(limit(3, Side::Buy, dec!(100), dec!(9))).unwrap();

        assert_eq!(out.fills.len(), 2);
        assert_eq!(out.fills[0].maker_id, first_id);
        assert_eq!(out.fills[0].quantity, dec!(4));
        assert_eq!(out.fills[1].maker_id, second_id);
        assert_eq!(out.fills[1].quantity, dec!(5));
        assert_eq!(ob.get(second_id).unwrap().remaining, dec!(1));
    }

    #[test]
    fn test_cancel_existing_order_prunes_level() {
        let mut ob = OrderBook::new(BTC_USDC);
        let order = limit(42, Side::Buy, dec!(101), dec!(10));
        let id = order.id;
        ob.insert(order).unwrap();

        let cancelled = ob.cancel(id).unwrap();

        assert_eq!(cancelled.id, id);
        assert!(ob.is_empty());
        assert_eq!(ob.cancel(id), Err(BookError::NotFound(id)));
    }

    #[test]
    fn test_insert_rejects_foreign_pair_and_empty_orders() {
        let mut ob = OrderBook::new(BTC_USDC);
        let eth = Order::new(AccountId::new("a"), ETH_USDC, Side::Buy, dec!(1), dec!(1), 1);
        assert!(matches!(ob.insert(eth), Err(BookError::WrongPair { .. })));
        let mut done = limit(2, Side::Buy, dec!(1), dec!(1));
        done.remaining = Decimal::ZERO;
        assert!(matches!(ob.insert(done), Err(BookError::NothingToRest(_))));
    }

    #[test]
    fn test_open_orders_filters_by_account() {
        let mut ob = OrderBook::new(BTC_USDC);
        ob.insert(limit(1, Side::Buy, dec!(10), dec!(1))).unwrap();
        ob.insert(limit(2, Side::Sell, dec!(20), dec!(1))).unwrap();
        let mine = ob.open_orders(&AccountId::new("acct-2"));
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].side, Side::Sell);
    }

    fn arb_order() -> impl Strategy<Value = (bool, u32, u32)> {
        (any::<bool>(), 1u32..50, 1u32..20)
    }

    proptest! {
        #[test]
        fn snapshot_sides_stay_sorted(orders in prop::collection::vec(arb_order(), 1..60)) {
            let mut ob = OrderBook::new(BTC_USDC);
            for (i, (buy, price, qty)) in orders.into_iter().enumerate() {
                let side = if buy { Side::Buy } else { Side::Sell };
                let order = limit(i as u64, side, Decimal::from(price), Decimal::from(qty));
                let original = order.quantity;
                let out = ob.match_order(order).unwrap();
                prop_assert!(out.taker.remaining <= original);
                prop_assert!(out.fills.iter().all(|f| f.quantity > Decimal::ZERO));

                let snap = ob.snapshot();
                prop_assert!(snap.sell_orders.windows(2).all(|w| w[0].price <= w[1].price));
                prop_assert!(snap.buy_orders.windows(2).all(|w| w[0].price >= w[1].price));
                if let (Some(bid), Some(ask)) = (ob.best_bid(), ob.best_ask()) {
                    prop_assert!(bid < ask, "book left crossed: {} >= {}", bid, ask);
                }
            }
        }
    }
}
