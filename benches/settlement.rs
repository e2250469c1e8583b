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

//! Benchmarks for splitting, balances and the ledger.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Even splits and tax allocation
//! - Per-person totals for receipts of growing size
//! - Balance aggregation over many settlements
//! - Concurrent payments against a shared ledger

use billo_core::balance::{group_balances, net_balance};
use billo_core::{
    AssignmentMap, Currency, GroupId, ItemId, ItemInput, Ledger, Money, ReceiptId, ReceiptInput,
    ReceiptItem, Settlement, SettlementId, SettlementStatus, UserId, accept_manual,
    calculate_person_totals,
};
use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rayon::prelude::*;
use std::sync::Arc;

// =============================================================================
// Helper Functions
// =============================================================================

fn users(n: usize) -> Vec<UserId> {
    (0..n).map(|i| UserId::new(format!("user-{i}"))).collect()
}

fn make_items(count: usize) -> Vec<ReceiptItem> {
    (0..count)
        .map(|i| {
            ReceiptItem::new(
                ItemId(i as u64 + 1),
                format!("item {i}"),
                Money::from_cents(199 + i as i64 * 37),
            )
        })
        .collect()
}

fn make_settlements(count: usize, people: &[UserId]) -> Vec<Settlement> {
    (0..count)
        .map(|i| Settlement {
            id: SettlementId(i as u64 + 1),
            from: people[i % people.len()].clone(),
            to: people[(i + 1) % people.len()].clone(),
            amount: Money::from_cents(500 + i as i64),
            currency: Currency::Usd,
            receipt_id: Some(ReceiptId(i as u64 / 4 + 1)),
            group_id: Some(GroupId(1)),
            status: if i % 5 == 0 {
                SettlementStatus::Completed
            } else {
                SettlementStatus::Pending
            },
            settled_at: None,
            notes: None,
            created_at: Utc::now(),
        })
        .collect()
}

/// Ledger with `count` receipts owned by `user-0`, each shared with one other person.
fn seeded_ledger(count: usize, people: &[UserId]) -> Ledger {
    let ledger = Ledger::default();
    let owner = &people[0];
    for i in 0..count {
        let receipt = ledger.create_receipt(owner, None, None).unwrap();
        let draft = accept_manual(&ReceiptInput {
            merchant_name: Some("Cafe".into()),
            purchase_date: Some("2025-03-01".into()),
            tax: Some("1.00".into()),
            items: vec![ItemInput::new("Lunch", "1", "12.00", "12.00")],
            ..Default::default()
        })
        .unwrap();
        let receipt = ledger.confirm_items(owner, receipt.id, draft).unwrap();
        let guest = people[1 + i % (people.len() - 1)].clone();
        let map = AssignmentMap::split_evenly(&receipt.items, &[owner.clone(), guest]);
        ledger.save_assignments(owner, receipt.id, &map).unwrap();
    }
    ledger
}

// =============================================================================
// Splitting Benchmarks
// =============================================================================

fn bench_split_even(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_even");
    let total = Money::from_cents(123_457);

    for n in [2usize, 10, 50].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, &n| {
            b.iter(|| black_box(total).split_even(black_box(n)))
        });
    }
    group.finish();
}

fn bench_allocate_tax(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_tax");
    let tax = Money::from_cents(1_999);

    for n in [2usize, 10, 50].iter() {
        let weights: Vec<Money> = (0..*n).map(|i| Money::from_cents(1_000 + i as i64 * 333)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &weights, |b, weights| {
            b.iter(|| black_box(tax).allocate(black_box(weights)))
        });
    }
    group.finish();
}

fn bench_person_totals(c: &mut Criterion) {
    let mut group = c.benchmark_group("person_totals");
    let people = users(6);

    for count in [10usize, 100, 1_000].iter() {
        let items = make_items(*count);
        let mut map = AssignmentMap::new();
        for (i, item) in items.iter().enumerate() {
            for person in people.iter().take(1 + i % people.len()) {
                map.toggle_assignment(item.id, person.clone());
            }
        }

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &items, |b, items| {
            b.iter(|| {
                black_box(calculate_person_totals(
                    items,
                    &map,
                    &people,
                    Money::from_cents(850),
                ))
            })
        });
    }
    group.finish();
}

// =============================================================================
// Balance Benchmarks
// =============================================================================

fn bench_net_balance(c: &mut Criterion) {
    let mut group = c.benchmark_group("net_balance");
    let people = users(8);

    for count in [100usize, 1_000, 10_000].iter() {
        let settlements = make_settlements(*count, &people);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(count),
            &settlements,
            |b, settlements| {
                b.iter(|| black_box(net_balance(settlements, &people[0], Currency::Usd)))
            },
        );
    }
    group.finish();
}

fn bench_group_balances(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_balances");
    let people = users(8);

    for count in [100usize, 1_000, 10_000].iter() {
        let settlements = make_settlements(*count, &people);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(count),
            &settlements,
            |b, settlements| {
                b.iter(|| {
                    black_box(group_balances(
                        settlements,
                        GroupId(1),
                        &people,
                        Currency::Usd,
                    ))
                })
            },
        );
    }
    group.finish();
}

// =============================================================================
// Ledger Benchmarks
// =============================================================================

fn bench_save_assignments(c: &mut Criterion) {
    let people = users(4);
    c.bench_function("save_assignments", |b| {
        b.iter(|| black_box(seeded_ledger(10, &people)))
    });
}

fn bench_parallel_payments(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_payments");
    let people = users(9);

    for count in [100usize, 1_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_with_setup(
                || {
                    let ledger = Arc::new(seeded_ledger(count, &people));
                    let rows = ledger.settlements();
                    (ledger, rows)
                },
                |(ledger, rows)| {
                    rows.par_iter().for_each(|row| {
                        let _ = ledger.mark_paid(&row.from, row.id);
                        let _ = ledger.net_balance(&row.to, Currency::Usd);
                    });
                    black_box(&ledger);
                },
            )
        });
    }
    group.finish();
}

criterion_group!(splitting, bench_split_even, bench_allocate_tax, bench_person_totals,);

criterion_group!(balances, bench_net_balance, bench_group_balances,);

criterion_group!(ledger, bench_save_assignments, bench_parallel_payments,);

criterion_main!(splitting, balances, ledger);
