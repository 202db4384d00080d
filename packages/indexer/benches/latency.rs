//! Latency benchmarks for the per-event and per-token hot paths
//!
//! A scan window can hold thousands of logs and a pricing pass touches every
//! discovered token, so these should stay in the microsecond range:
//! - Log decode
//! - Reserve-ratio pricing
//! - Alert message rendering

use alloy::primitives::{address, b256, Address, U256};
use alloy::sol;
use alloy::sol_types::SolEvent;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lpwatch_indexer::config::{DEFAULT_EVENT_SIGNATURE, USDT, WBNB};
use lpwatch_indexer::decoder::EventDecoder;
use lpwatch_indexer::ledger::{RawEvent, Reserves};

sol! {
    event LiquidityAdded(address token0, uint256 amount0, address token1, uint256 amount1);
}

const TOKEN: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

fn sample_log() -> RawEvent {
    let event = LiquidityAdded {
        token0: TOKEN,
        amount0: U256::from(1_000_000_000_000_000_000u128),
        token1: USDT,
        amount1: U256::from(2_000_000_000_000_000_000u128),
    };
    let data = event.encode_log_data();
    RawEvent {
        block_number: Some(49_900_000),
        transaction_hash: Some(b256!(
            "1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef"
        )),
        log_index: Some(3),
        topics: data.topics().to_vec(),
        data: data.data,
    }
}

/// Benchmark LiquidityAdded log decoding
fn bench_decode_event(c: &mut Criterion) {
    let decoder = EventDecoder::new(DEFAULT_EVENT_SIGNATURE, "token0", "token1").unwrap();
    let log = sample_log();

    c.bench_function("decode_event", |b| {
        b.iter(|| black_box(decoder.decode(black_box(&log)).unwrap()))
    });
}

/// Benchmark price and market cap derivation from pool reserves
fn bench_price_from_reserves(c: &mut Criterion) {
    use lpwatch_indexer::pricing::{market_cap, reserve_ratio_price, usd_price, QuoteAsset};

    let reserves = Reserves {
        reserve0: 2_500_000_000_000_000_000_000,
        reserve1: 1_000_000_000_000_000_000_000_000,
    };

    c.bench_function("price_from_reserves", |b| {
        b.iter(|| {
            let price = reserve_ratio_price(black_box(true), black_box(&reserves)).unwrap();
            let usd = usd_price(QuoteAsset::Base(WBNB), price, Some(black_box(600.0))).unwrap();
            black_box(market_cap(usd, 1_000_000_000.0))
        })
    });
}

/// Benchmark alert message rendering
fn bench_format_message(c: &mut Criterion) {
    use lpwatch_indexer::notifier::{format_message, MarketCapAlert};

    let alert = MarketCapAlert {
        entity: TOKEN,
        name: "Example Token".to_string(),
        symbol: "EXT".to_string(),
        price_usd: 0.00123,
        market_cap_usd: 1_230_000.0,
    };

    c.bench_function("format_alert_message", |b| {
        b.iter(|| black_box(format_message(black_box(&alert))))
    });
}

criterion_group!(
    benches,
    bench_decode_event,
    bench_price_from_reserves,
    bench_format_message
);

criterion_main!(benches);
