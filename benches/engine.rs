// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Benchmarks for the transaction engine.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Single-threaded transfers and orders
//! - Rollback cost as the number of undone operations grows
//! - Parallel transfers over disjoint and shared accounts

use atomic_ledger_rs::{AccountId, Engine, LineItem, Money, ProductId, ResourceId, TransactionKind};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rayon::prelude::*;

// =============================================================================
// Helper Functions
// =============================================================================

fn make_engine(accounts: u32, products: u32) -> Engine {
    let engine = Engine::new();
    for id in 1..=accounts {
        engine
            .open_account(AccountId(id), format!("owner-{id}"), Money(u64::MAX / 4))
            .unwrap();
    }
    for id in 1..=products {
        engine
            .add_product(ProductId(id), format!("product-{id}"), u32::MAX, Money(1_99))
            .unwrap();
    }
    engine
}

// =============================================================================
// Single-Threaded Benchmarks
// =============================================================================

fn bench_single_transfer(c: &mut Criterion) {
    let engine = make_engine(2, 0);
    c.bench_function("single_transfer", |b| {
        b.iter(|| {
            engine
                .transfer(black_box(AccountId(1)), black_box(AccountId(2)), Money(1))
                .unwrap()
        })
    });
}

fn bench_refused_transfer(c: &mut Criterion) {
    let engine = make_engine(1, 0);
    engine.open_account(AccountId(2), "empty", Money::ZERO).unwrap();
    c.bench_function("refused_transfer", |b| {
        b.iter(|| {
            engine
                .transfer(black_box(AccountId(2)), black_box(AccountId(1)), Money(1))
                .unwrap_err()
        })
    });
}

fn bench_order_lines(c: &mut Criterion) {
    let mut group = c.benchmark_group("order_lines");
    let engine = make_engine(1, 32);

    for lines in [1u32, 4, 16, 32] {
        let items: Vec<LineItem> = (1..=lines).map(|id| LineItem::new(ProductId(id), 1)).collect();
        group.throughput(Throughput::Elements(u64::from(lines)));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &items, |b, items| {
            b.iter(|| engine.place_order(AccountId(1), black_box(items)).unwrap())
        });
    }
    group.finish();
}

fn bench_rollback_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("rollback_depth");
    let engine = make_engine(1, 1);
    let declared: Vec<ResourceId> = vec![AccountId(1).into(), ProductId(1).into()];

    for depth in [1usize, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                let mut txn = engine
                    .begin(TransactionKind::Generic, declared.clone())
                    .unwrap();
                for _ in 0..depth {
                    txn.reserve(ProductId(1), 1).unwrap();
                    txn.debit(AccountId(1), Money(1)).unwrap();
                }
                txn.rollback().unwrap()
            })
        });
    }
    group.finish();
}

// =============================================================================
// Multi-Threaded Benchmarks
// =============================================================================

fn bench_parallel_disjoint_transfers(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_disjoint_transfers");
    let engine = make_engine(64, 0);
    let count = 1_000u32;
    group.throughput(Throughput::Elements(u64::from(count)));

    group.bench_function("pairs", |b| {
        b.iter(|| {
            (0..count).into_par_iter().for_each(|i| {
                let from = AccountId(i % 32 * 2 + 1);
                let to = AccountId(i % 32 * 2 + 2);
                engine.transfer(from, to, Money(1)).unwrap();
            })
        })
    });
    group.finish();
}

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");
    let count = 1_000u32;
    group.throughput(Throughput::Elements(u64::from(count)));

    for accounts in [2u32, 8, 64] {
        let engine = make_engine(accounts, 0);
        group.bench_with_input(
            BenchmarkId::from_parameter(accounts),
            &accounts,
            |b, &accounts| {
                b.iter(|| {
                    (0..count).into_par_iter().for_each(|i| {
                        let from = AccountId(i % accounts + 1);
                        let to = AccountId((i + 1) % accounts + 1);
                        engine.transfer(from, to, Money(1)).unwrap();
                    })
                })
            },
        );
    }
    group.finish();
}

fn bench_parallel_orders(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_orders");
    let engine = make_engine(16, 4);
    let count = 500u32;
    group.throughput(Throughput::Elements(u64::from(count)));

    group.bench_function("shared_products", |b| {
        b.iter(|| {
            (0..count).into_par_iter().for_each(|i| {
                let lines = [
                    LineItem::new(ProductId(i % 4 + 1), 1),
                    LineItem::new(ProductId((i + 1) % 4 + 1), 1),
                ];
                engine.place_order(AccountId(i % 16 + 1), &lines).unwrap();
            })
        })
    });
    group.finish();
}

criterion_group!(
    single,
    bench_single_transfer,
    bench_refused_transfer,
    bench_order_lines,
    bench_rollback_depth,
);

criterion_group!(
    parallel,
    bench_parallel_disjoint_transfers,
    bench_contention,
    bench_parallel_orders,
);

criterion_main!(single, parallel);
