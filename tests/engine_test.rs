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

//! Engine public API integration tests.

use point_ledger::{
    BalanceStore, Engine, HistoryStore, LedgerConfig, LedgerError, MemoryBalanceStore,
    MemoryHistoryStore, PartialFailurePolicy, PointHistory, StoreError, TransactionType, UserId,
    replay,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// History store that fails appends while `failing` is set.
#[derive(Default)]
struct FlakyHistory {
    inner: MemoryHistoryStore,
    failing: AtomicBool,
}

impl FlakyHistory {
    fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl HistoryStore for FlakyHistory {
    fn append(
        &self,
        user_id: UserId,
        amount: u64,
        kind: TransactionType,
        time_millis: u64,
    ) -> Result<PointHistory, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io("history log unavailable".into()));
        }
        self.inner.append(user_id, amount, kind, time_millis)
    }

    fn list_by_user(&self, user_id: UserId) -> Result<Vec<PointHistory>, StoreError> {
        self.inner.list_by_user(user_id)
    }
}

fn flaky_engine(
    policy: PartialFailurePolicy,
) -> (Engine<Arc<MemoryBalanceStore>, Arc<FlakyHistory>>, Arc<FlakyHistory>) {
    let history = Arc::new(FlakyHistory::default());
    let engine = Engine::with_stores(
        Arc::new(MemoryBalanceStore::new()),
        Arc::clone(&history),
        LedgerConfig {
            on_partial_failure: policy,
            ..LedgerConfig::default()
        },
    );
    (engine, history)
}

#[test]
fn unknown_user_has_zero_points() {
    let engine = Engine::new();
    let point = engine.get_point(UserId(1)).unwrap();
    assert_eq!(point.id, UserId(1));
    assert_eq!(point.point, 0);
}

#[test]
fn unknown_user_has_empty_history() {
    let engine = Engine::new();
    assert!(engine.history(UserId(1)).unwrap().is_empty());
}

#[test]
fn charge_then_balance() {
    let engine = Engine::new();
    let charged = engine.charge(UserId(1), 100).unwrap();
    assert_eq!(charged.point, 100);
    assert_eq!(engine.get_point(UserId(1)).unwrap(), charged);
}

#[test]
fn charges_accumulate() {
    let engine = Engine::new();
    for amount in [10, 20, 30, 40] {
        engine.charge(UserId(1), amount).unwrap();
    }
    assert_eq!(engine.get_point(UserId(1)).unwrap().point, 100);
}

#[test]
fn use_after_charge() {
    let engine = Engine::new();
    engine.charge(UserId(1), 100).unwrap();
    let used = engine.use_points(UserId(1), 30).unwrap();
    assert_eq!(used.point, 70);
}

#[test]
fn use_entire_balance() {
    let engine = Engine::new();
    engine.charge(UserId(1), 100).unwrap();
    assert_eq!(engine.use_points(UserId(1), 100).unwrap().point, 0);
}

#[test]
fn charge_records_history_with_write_timestamp() {
    let engine = Engine::new();
    let charged = engine.charge(UserId(1), 100).unwrap();

    let history = engine.history(UserId(1)).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].user_id, UserId(1));
    assert_eq!(history[0].amount, 100);
    assert_eq!(history[0].kind, TransactionType::Charge);
    assert_eq!(history[0].time_millis, charged.update_millis);
}

#[test]
fn use_records_requested_amount_not_balance() {
    let engine = Engine::new();
    engine.charge(UserId(1), 100).unwrap();
    let used = engine.use_points(UserId(1), 30).unwrap();

    let history = engine.history(UserId(1)).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].amount, 30);
    assert_eq!(history[1].kind, TransactionType::Use);
    assert_eq!(history[1].time_millis, used.update_millis);
}

#[test]
fn non_positive_amounts_are_rejected_without_trace() {
    let engine = Engine::new();
    engine.charge(UserId(1), 50).unwrap();
    let before = engine.get_point(UserId(1)).unwrap();

    for amount in [0, -1, i64::MIN] {
        assert_eq!(
            engine.charge(UserId(1), amount),
            Err(LedgerError::InvalidAmount {
                kind: TransactionType::Charge,
                amount
            })
        );
        assert_eq!(
            engine.use_points(UserId(1), amount),
            Err(LedgerError::InvalidAmount {
                kind: TransactionType::Use,
                amount
            })
        );
    }

    assert_eq!(engine.get_point(UserId(1)).unwrap(), before);
    assert_eq!(engine.history(UserId(1)).unwrap().len(), 1);
}

#[test]
fn invalid_amount_does_not_create_user() {
    let engine = Engine::new();
    assert!(engine.charge(UserId(7), 0).is_err());
    assert!(engine.balances().is_empty());
}

#[test]
fn use_more_than_balance_fails() {
    let engine = Engine::new();
    engine.charge(UserId(1), 50).unwrap();
    let before = engine.get_point(UserId(1)).unwrap();

    assert_eq!(
        engine.use_points(UserId(1), 51),
        Err(LedgerError::InsufficientBalance {
            balance: 50,
            requested: 51
        })
    );

    // Balance and history unchanged
    assert_eq!(engine.get_point(UserId(1)).unwrap(), before);
    assert_eq!(engine.history(UserId(1)).unwrap().len(), 1);
}

#[test]
fn use_on_new_user_fails() {
    let engine = Engine::new();
    assert!(matches!(
        engine.use_points(UserId(1), 1),
        Err(LedgerError::InsufficientBalance {
            balance: 0,
            requested: 1
        })
    ));
    assert_eq!(engine.get_point(UserId(1)).unwrap().point, 0);
    assert!(engine.history(UserId(1)).unwrap().is_empty());
}

#[test]
fn charge_overflow_fails_explicitly() {
    let engine = Engine::new();
    engine.charge(UserId(1), i64::MAX).unwrap();
    engine.charge(UserId(1), i64::MAX).unwrap();
    let before = engine.get_point(UserId(1)).unwrap();

    assert!(matches!(
        engine.charge(UserId(1), 2),
        Err(LedgerError::BalanceOverflow { .. })
    ));
    assert_eq!(engine.get_point(UserId(1)).unwrap(), before);
    assert_eq!(engine.history(UserId(1)).unwrap().len(), 2);
}

#[test]
fn users_are_independent() {
    let engine = Engine::new();
    engine.charge(UserId(1), 100).unwrap();
    engine.charge(UserId(2), 200).unwrap();
    engine.use_points(UserId(2), 50).unwrap();

    assert_eq!(engine.get_point(UserId(1)).unwrap().point, 100);
    assert_eq!(engine.get_point(UserId(2)).unwrap().point, 150);
    assert_eq!(engine.history(UserId(1)).unwrap().len(), 1);
    assert_eq!(engine.history(UserId(2)).unwrap().len(), 2);
}

#[test]
fn reads_are_idempotent() {
    let engine = Engine::new();
    engine.charge(UserId(1), 100).unwrap();
    engine.use_points(UserId(1), 25).unwrap();

    assert_eq!(
        engine.get_point(UserId(1)).unwrap(),
        engine.get_point(UserId(1)).unwrap()
    );
    assert_eq!(
        engine.history(UserId(1)).unwrap(),
        engine.history(UserId(1)).unwrap()
    );
}

#[test]
fn history_replays_to_balance() {
    let engine = Engine::new();
    engine.charge(UserId(1), 100).unwrap();
    engine.use_points(UserId(1), 40).unwrap();
    let _ = engine.use_points(UserId(1), 500);
    engine.charge(UserId(1), 15).unwrap();

    let history = engine.history(UserId(1)).unwrap();
    assert_eq!(replay(&history), Ok(75));
    assert_eq!(engine.get_point(UserId(1)).unwrap().point, 75);
}

#[test]
fn apply_dispatches_by_kind() {
    let engine = Engine::new();
    engine.apply(TransactionType::Charge, UserId(1), 10).unwrap();
    let point = engine.apply(TransactionType::Use, UserId(1), 4).unwrap();
    assert_eq!(point.point, 6);
}

// === Partial failure ===

#[test]
fn failed_append_leaves_balance_written_by_default() {
    let (engine, history) = flaky_engine(PartialFailurePolicy::Propagate);
    engine.charge(UserId(1), 100).unwrap();

    history.fail(true);
    assert_eq!(
        engine.charge(UserId(1), 50),
        Err(LedgerError::Store(StoreError::Io(
            "history log unavailable".into()
        )))
    );

    // The gap: balance moved, history did not
    assert_eq!(engine.get_point(UserId(1)).unwrap().point, 150);
    assert_eq!(engine.history(UserId(1)).unwrap().len(), 1);

    let reconciliation = engine.reconcile(UserId(1)).unwrap();
    assert!(!reconciliation.is_consistent());
    assert_eq!(reconciliation.replayed, Some(100));

    // Gate was released despite the error
    history.fail(false);
    assert_eq!(engine.charge(UserId(1), 1).unwrap().point, 151);
}

#[test]
fn failed_append_is_compensated_when_configured() {
    let (engine, history) = flaky_engine(PartialFailurePolicy::Compensate);
    engine.charge(UserId(1), 100).unwrap();

    history.fail(true);
    assert!(matches!(
        engine.use_points(UserId(1), 30),
        Err(LedgerError::Store(_))
    ));

    assert_eq!(engine.get_point(UserId(1)).unwrap().point, 100);
    assert!(engine.reconcile(UserId(1)).unwrap().is_consistent());
}

#[test]
fn stores_stay_observable_through_arc() {
    let (engine, history) = flaky_engine(PartialFailurePolicy::Propagate);
    engine.charge(UserId(3), 9).unwrap();

    assert_eq!(history.list_by_user(UserId(3)).unwrap().len(), 1);
    assert_eq!(engine.balances().read(UserId(3)).unwrap().point, 9);
}
