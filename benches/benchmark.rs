use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use rust_decimal::Decimal;
use spot_exchange::instrument::BTC_USDC;
use spot_exchange::orderbook::OrderBook;
use spot_exchange::orders::{AccountId, Order, Side};

fn setup_order_book(depth: u64, orders_per_level: u64) -> OrderBook {
    let maker = AccountId::new("maker");
    let mut ob = OrderBook::new(BTC_USDC);
    let mut seq = 0;
    // asks above the bids so the book is never crossed
    for level in 1..=depth {
        for _ in 0..orders_per_level {
            seq += 1;
            let bid = Decimal::from(level);
            let ask = Decimal::from(depth + level);
            ob.insert(Order::new(maker.clone(), BTC_USDC, Side::Buy, bid, Decimal::ONE, seq))
                .unwrap();
            seq += 1;
            ob.insert(Order::new(maker.clone(), BTC_USDC, Side::Sell, ask, Decimal::ONE, seq))
                .unwrap();
        }
    }
    ob
}

fn bench_match_order(c: &mut Criterion) {
    let depth = 100;
    let orders_per_level = 10;
    let base = setup_order_book(depth, orders_per_level);
    let taker = AccountId::new("taker");

    c.bench_function("sweep half the asks", |b| {
        b.iter_batched(
            || base.clone(),
            |mut ob| {
                let buy = Order::new(
                    taker.clone(),
                    BTC_USDC,
                    Side::Buy,
                    Decimal::from(2 * depth),
                    Decimal::from(depth * orders_per_level / 2),
                    u64::MAX,
                );
                ob.match_order(buy).unwrap()
            },
            BatchSize::LargeInput,
        )
    });

    c.bench_function("non-crossing limit rests", |b| {
        b.iter_batched(
            || base.clone(),
            |mut ob| {
                let sell = Order::new(
                    taker.clone(),
                    BTC_USDC,
                    Side::Sell,
                    Decimal::from(depth + 1) + Decimal::new(5, 1),
                    Decimal::ONE,
                    u64::MAX,
                );
                ob.match_order(sell).unwrap()
            },
            BatchSize::LargeInput,
        )
    });
}
criterion_group!(benches, bench_match_order);
criterion_main!(benches);
