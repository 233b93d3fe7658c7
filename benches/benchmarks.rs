use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ethers::types::{Address, U256};

use token_distributor::{
    amount::Amount,
    balances::{aggregate, BalanceSource, Blacklist},
    batch::plan_chunks,
};

fn source(label: &str, count: u64, offset: u64) -> BalanceSource {
    BalanceSource::from_rows(
        label,
        (0..count).map(|i| (Address::from_low_u64_be(i + offset), Amount::from_tokens(i + 1))),
    )
    .unwrap()
}

fn bench_aggregate(c: &mut Criterion) {
    let next = vec![source("next", 10_000, 0)];
    let prev = vec![source("prev", 10_000, 5_000)];
    let retro = vec![source("retro", 2_000, 14_000)];
    let blacklist = vec![Blacklist::from_addresses(
        "blacklist",
        (0..100).map(|i| Address::from_low_u64_be(i * 97)),
    )
    .unwrap()];

    c.bench_function("aggregate_22k", |b| {
        b.iter(|| aggregate(black_box(&next), black_box(&prev), black_box(&retro), black_box(&blacklist)).unwrap())
    });
}

fn bench_plan_chunks(c: &mut Criterion) {
    let recipients: Vec<Address> = (0..10_000).map(Address::from_low_u64_be).collect();
    let amounts: Vec<U256> = (0..10_000u64).map(U256::from).collect();

    c.bench_function("plan_chunks_10k_by_400", |b| {
        b.iter(|| plan_chunks(black_box(&recipients), black_box(&amounts), 400).unwrap())
    });
}

criterion_group!(benches, bench_aggregate, bench_plan_chunks);
criterion_main!(benches);
