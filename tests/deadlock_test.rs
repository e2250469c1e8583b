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

//! Deadlock detection tests using parking_lot's built-in deadlock detector.
//!
//! These tests drive a shared [`Ledger`] from many threads and verify that
//! the settlement locks never form a cycle, and that concurrent status
//! changes resolve to exactly one winner.
//!
//! The ledger uses parking_lot::Mutex, so with the `deadlock_detection`
//! feature enabled any cycle in the lock graph is reported.

use billo_core::{
    AssignmentMap, BilloError, Currency, ErrorKind, GroupId, ItemInput, Ledger, Money,
    ReceiptId, ReceiptInput, Role, SettlementId, SettlementStatus, UserId, accept_manual,
};
use parking_lot::deadlock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

// === Fixtures ===

fn user(id: &str) -> UserId {
    UserId::from(id)
}

/// Group of alice (admin), bob and carol with one shared pizza receipt owned
/// by alice and split three ways.
fn shared_dinner(ledger: &Ledger) -> (GroupId, ReceiptId, AssignmentMap) {
    let alice = user("alice");
    let group = ledger.create_group(&alice, "Flatmates", None, None).unwrap();
    for member in ["bob", "carol"] {
        ledger
            .add_member(&alice, group.id, &user(member), Role::Member)
            .unwrap();
    }

    let receipt = ledger.create_receipt(&alice, Some(group.id), None).unwrap();
    let draft = accept_manual(&ReceiptInput {
        merchant_name: Some("Luigi's".into()),
        purchase_date: Some("2025-03-01".into()),
        tax: Some("3.00".into()),
        items: vec![ItemInput::new("Pizza", "1", "30.00", "30.00")],
        ..Default::default()
    })
    .unwrap();
    let receipt = ledger.confirm_items(&alice, receipt.id, draft).unwrap();

    let members = [user("alice"), user("bob"), user("carol")];
    let assignments = AssignmentMap::split_evenly(&receipt.items, &members);
    ledger
        .save_assignments(&alice, receipt.id, &assignments)
        .unwrap();
    (group.id, receipt.id, assignments)
}

fn settlement_ids(ledger: &Ledger) -> Vec<SettlementId> {
    ledger.settlements().iter().map(|s| s.id).collect()
}

fn assert_conflict(result: Result<impl Sized, BilloError>) {
    if let Err(err) = result {
        assert_eq!(err.kind(), ErrorKind::Conflict, "unexpected error: {err}");
    }
}

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150)); // Let detector thread exit
}

// === Tests ===

/// Many threads race to pay the same settlement; exactly one wins.
#[test]
fn concurrent_mark_paid_has_single_winner() {
    let detector = start_deadlock_detector();
    let ledger = Arc::new(Ledger::default());
    shared_dinner(&ledger);

    let target = ledger
        .settlements()
        .into_iter()
        .find(|s| s.from == user("bob"))
        .expect("bob owes alice");

    const NUM_THREADS: usize = 32;
    let mut handles = Vec::with_capacity(NUM_THREADS);

    for i in 0..NUM_THREADS {
        let ledger = ledger.clone();
        // Debtor and creditor race
        let actor = if i % 2 == 0 { user("bob") } else { user("alice") };
        let id = target.id;
        handles.push(thread::spawn(move || ledger.mark_paid(&actor, id)));
    }

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .collect();

    stop_deadlock_detector(detector);

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(err, BilloError::InvalidSettlementState { .. }),
            "unexpected error: {err}"
        );
    }

    let paid = ledger.settlement(&user("bob"), target.id).unwrap();
    assert_eq!(paid.status, SettlementStatus::Completed);
    assert!(paid.settled_at.is_some());
}

/// Payments, reversals, re-saves and balance reads interleave freely.
#[test]
fn no_deadlock_mixed_operations() {
    let detector = start_deadlock_detector();
    let ledger = Arc::new(Ledger::default());
    let (group_id, receipt_id, assignments) = shared_dinner(&ledger);
    let ids = Arc::new(settlement_ids(&ledger));

    const NUM_THREADS: usize = 16;
    const OPS_PER_THREAD: usize = 200;

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let ledger = ledger.clone();
        let ids = ids.clone();
        let assignments = assignments.clone();

        let handle = thread::spawn(move || {
            let alice = user("alice");
            let debtor = if thread_id % 2 == 0 { user("bob") } else { user("carol") };

            for i in 0..OPS_PER_THREAD {
                let id = ids[i % ids.len()];
                match (thread_id + i) % 6 {
                    0 => assert_conflict(ledger.mark_paid(&alice, id)),
                    1 => assert_conflict(ledger.mark_unpaid(&alice, id)),
                    2 if thread_id == 0 => {
                        let tax = if i % 4 == 2 { "3.00" } else { "6.00" };
                        ledger
                            .update_tax(&alice, receipt_id, Money::parse(tax).unwrap())
                            .unwrap();
                        assert_conflict(ledger.save_assignments(&alice, receipt_id, &assignments));
                    }
                    3 => {
                        let _ = ledger.net_balance(&debtor, Currency::Usd);
                        let _ = ledger.pair_balance(&debtor, &alice, Currency::Usd);
                    }
                    4 => {
                        let _ = ledger.group_balances(&alice, group_id, Currency::Usd).unwrap();
                    }
                    _ => {
                        let _ = ledger.history(&debtor);
                        let _ = ledger.settlement(&debtor, id);
                    }
                }
            }
        });

        handles.push(handle);
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    // Every debt is still someone else's credit
    let balances = ledger
        .group_balances(&user("alice"), group_id, Currency::Usd)
        .unwrap();
    let sum: Money = balances.iter().map(|b| b.net).sum();
    assert!(sum.is_zero());

    // At most one live settlement per debtor
    for debtor in ["bob", "carol"] {
        let live = ledger
            .settlements()
            .into_iter()
            .filter(|s| s.from == user(debtor) && s.status != SettlementStatus::Cancelled)
            .count();
        assert!(live <= 1, "{debtor} has {live} live settlements");
    }
}

/// Independent receipts owned by different people are paid across threads.
#[test]
fn no_deadlock_cross_receipt_operations() {
    let detector = start_deadlock_detector();
    let ledger = Arc::new(Ledger::default());
    let people = ["alice", "bob", "carol", "dave"];

    // Everyone pays for one lunch shared with the next person
    for (i, owner) in people.iter().enumerate() {
        let owner = user(owner);
        let guest = user(people[(i + 1) % people.len()]);
        let receipt = ledger.create_receipt(&owner, None, None).unwrap();
        let draft = accept_manual(&ReceiptInput {
            merchant_name: Some("Canteen".into()),
            purchase_date: Some("2025-03-02".into()),
            items: vec![ItemInput::new("Lunch", "1", "20.00", "20.00")],
            ..Default::default()
        })
        .unwrap();
        let receipt = ledger.confirm_items(&owner, receipt.id, draft).unwrap();
        let map = AssignmentMap::split_evenly(&receipt.items, &[owner.clone(), guest]);
        ledger.save_assignments(&owner, receipt.id, &map).unwrap();
    }

    let rows = Arc::new(ledger.settlements());
    assert_eq!(rows.len(), people.len());

    const NUM_THREADS: usize = 12;
    const CYCLES_PER_THREAD: usize = 300;

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let ledger = ledger.clone();
        let rows = rows.clone();

        let handle = thread::spawn(move || {
            for i in 0..CYCLES_PER_THREAD {
                let row = &rows[(thread_id + i) % rows.len()];
                if i % 2 == 0 {
                    assert_conflict(ledger.mark_paid(&row.from, row.id));
                } else {
                    assert_conflict(ledger.mark_unpaid(&row.to, row.id));
                }
                let _ = ledger.counterparty_balances(&row.to, Currency::Usd);
            }
        });

        handles.push(handle);
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    let total: Money = people
        .iter()
        .map(|p| ledger.net_balance(&user(p), Currency::Usd).net)
        .sum();
    assert!(total.is_zero());
}

/// Deleting the group while members pay does not deadlock.
#[test]
fn no_deadlock_delete_group_during_payments() {
    let detector = start_deadlock_detector();
    let ledger = Arc::new(Ledger::default());
    let (group_id, _, _) = shared_dinner(&ledger);
    let ids = settlement_ids(&ledger);

    let mut handles = Vec::new();
    for id in ids {
        for actor in ["bob", "carol"] {
            let ledger = ledger.clone();
            handles.push(thread::spawn(move || {
                // Only one of the two is a party to each settlement
                let result = ledger.mark_paid(&user(actor), id);
                if let Err(err) = &result {
                    assert!(
                        matches!(err.kind(), ErrorKind::Conflict | ErrorKind::Authorization),
                        "unexpected error: {err}"
                    );
                }
            }));
        }
    }

    let deleter = {
        let ledger = ledger.clone();
        thread::spawn(move || ledger.delete_group(&user("alice"), group_id))
    };

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    deleter.join().expect("Thread panicked").unwrap();

    stop_deadlock_detector(detector);

    // Each settlement was either paid first or cancelled by the delete
    for settlement in ledger.settlements() {
        assert_ne!(settlement.status, SettlementStatus::Pending);
    }
}
