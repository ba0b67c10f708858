//! Property tests for book and matching invariants

use chrono::Utc;
use common::{Amount, OrderId, Side, UserId};
use matching_engine::{EngineConfig, Exchange, Matcher, NewOrder, Order};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};

fn config() -> EngineConfig {
    EngineConfig {
        pairs: vec![config::PairConfig {
            symbol: "BTC-USDT".into(),
            price_decimals: 2,
            amount_decimals: 2,
            min_amount: "0.01".into(),
            enabled: true,
        }],
        batch: config::BatchConfig {
            flush_interval_ms: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[derive(Debug, Clone)]
struct Submission {
    side: Side,
    /// Price in cents around 100.00
    price_cents: u64,
    /// Amount in hundredths
    amount: u64,
    cancel_previous: bool,
}

fn submission() -> impl Strategy<Value = Submission> {
    (any::<bool>(), 9_500u64..10_500, 1u64..1_000, prop::bool::weighted(0.15)).prop_map(
        |(buy, price_cents, amount, cancel_previous)| Submission {
            side: if buy { Side::Buy } else { Side::Sell },
            // coarse ticks so levels collide often
            price_cents: price_cents / 50 * 50,
            amount,
            cancel_previous,
        },
    )
}

fn cents(value: u64) -> Amount {
    format!("{}.{:02}", value / 100, value % 100).parse().unwrap()
}

fn check_order(order: &Order) {
    assert!(order.is_consistent(), "remaining != amount - filled for {}", order.id);
    assert_eq!(order.filled.checked_add(order.remaining).unwrap(), order.amount);
}

async fn run_sequence(submissions: Vec<Submission>) {
    let exchange = Exchange::start(config()).await.unwrap();
    let pair: common::Pair = "BTC-USDT".parse().unwrap();
    let mut known: HashMap<OrderId, Order> = HashMap::new();
    let mut last: Option<OrderId> = None;

    for (i, s) in submissions.into_iter().enumerate() {
        if s.cancel_previous {
            if let Some(id) = last.take() {
                let result = exchange.cancel_order(id).await.unwrap();
                if let Some(order) = result.order {
                    check_order(&order);
                    known.insert(order.id, order);
                }
            }
            continue;
        }

        let request = NewOrder::limit(
            UserId::new(format!("u{}", i % 7)).unwrap(),
            pair.clone(),
            s.side,
            cents(s.price_cents),
            cents(s.amount),
        );
        let result = exchange.submit_order(request).await.unwrap();
        check_order(&result.order);

        let mut taker_remaining = cents(s.amount);
        for trade in &result.trades {
            let maker_before = known[&trade.maker_order_id].remaining;
            assert!(trade.amount <= maker_before.min(taker_remaining));
            taker_remaining = taker_remaining.checked_sub(trade.amount).unwrap();

            let maker = exchange.get_order(trade.maker_order_id).await.unwrap().unwrap();
            check_order(&maker);
            known.insert(maker.id, maker);
        }
        assert_eq!(taker_remaining, result.order.remaining);

        last = Some(result.order.id);
        known.insert(result.order.id, result.order);
    }

    // Book levels aggregate exactly the live orders
    let mut expected: BTreeMap<(bool, Amount), (Amount, usize)> = BTreeMap::new();
    for order in known.values() {
        let stored = exchange.get_order(order.id).await.unwrap().unwrap();
        check_order(&stored);
        if stored.is_live() {
            let price = stored.price.unwrap();
            let entry = expected
                .entry((stored.side == Side::Buy, price))
                .or_insert((Amount::ZERO, 0));
            entry.0 = entry.0.checked_add(stored.remaining).unwrap();
            entry.1 += 1;
        }
    }

    let book = exchange.get_book_snapshot(&pair, Some(1_000)).await.unwrap();
    let mut actual = BTreeMap::new();
    for level in &book.bids {
        actual.insert((true, level.price), (level.amount, level.order_count));
    }
    for level in &book.asks {
        actual.insert((false, level.price), (level.amount, level.order_count));
    }
    assert_eq!(actual, expected);

    if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
        assert!(bid < ask, "book is crossed: {} >= {}", bid, ask);
    }

    exchange.shutdown().await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_book_invariants_hold(submissions in prop::collection::vec(submission(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_sequence(submissions));
    }

    #[test]
    fn test_matcher_conserves_amounts(
        taker_amount in 1u64..10_000,
        maker_amounts in prop::collection::vec(1u64..5_000, 0..20),
    ) {
        let now = Utc::now();
        let pair: common::Pair = "BTC-USDT".parse().unwrap();
        let candidates: Vec<Order> = maker_amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| {
                let request = NewOrder::limit(
                    UserId::new(format!("maker{}", i)).unwrap(),
                    pair.clone(),
                    Side::Sell,
                    cents(10_000 + i as u64),
                    cents(*amount),
                );
                Order::accept(OrderId::new(), &request, now)
            })
            .collect();

        let request = NewOrder::limit(
            UserId::new("taker").unwrap(),
            pair.clone(),
            Side::Buy,
            cents(20_000),
            cents(taker_amount),
        );
        let mut taker = Order::accept(OrderId::new(), &request, now);
        let mut trades = Vec::new();
        Matcher::default().plan(&mut taker, &candidates, now, &mut trades).unwrap();

        let mut total = Amount::ZERO;
        for (trade, maker) in trades.iter().zip(&candidates) {
            prop_assert_eq!(trade.maker_order_id, maker.id);
            prop_assert!(trade.amount <= maker.remaining);
            prop_assert_eq!(trade.price, maker.price.unwrap());
            total = total.checked_add(trade.amount).unwrap();
        }
        prop_assert_eq!(total, taker.filled);
        prop_assert!(taker.is_consistent());

        let liquidity = maker_amounts.iter().sum::<u64>();
        prop_assert_eq!(taker.filled, cents(taker_amount.min(liquidity)));
    }
}
