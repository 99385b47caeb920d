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

//! Point ledger engine.
//!
//! The [`Engine`] validates charge and use requests, computes the new balance
//! and records the mutation in the history store. Mutations for one user are
//! serialized through that user's gate; mutations for different users run in
//! parallel.
//!
//! # Mutation Protocol
//!
//! Inside the user's gate:
//!
//! 1. Read the current balance (a first read materializes zero).
//! 2. Compute the new balance, rejecting overdrafts and overflow.
//! 3. Write the new balance and take the store-assigned timestamp.
//! 4. Append a history entry carrying the requested amount and that timestamp.
//!
//! The balance write and the history append are two separate store calls.
//! If the append fails the caller gets the store error and, depending on
//! [`PartialFailurePolicy`], the balance is either left as written or put
//! back to its previous value.
//!
//! # Reads
//!
//! [`Engine::get_point`] and [`Engine::history`] do not take the gate. They
//! return snapshots that may be stale by the time the caller sees them.

use crate::base::UserId;
use crate::config::{LedgerConfig, PartialFailurePolicy};
use crate::gate::GateRegistry;
use crate::point::UserPoint;
use crate::store::{BalanceStore, HistoryStore, MemoryBalanceStore, MemoryHistoryStore};
use crate::transaction::{self, PointHistory, TransactionType};
use crate::LedgerError;

/// Balance compared against its replayed history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Balance held by the balance store.
    pub balance: u64,
    /// Balance obtained by replaying the history, `None` if the history
    /// cannot be replayed (e.g. a use entry exceeds the replayed balance).
    pub replayed: Option<u64>,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.replayed == Some(self.balance)
    }
}

/// Point ledger over a balance store and a history store.
///
/// # Invariants
///
/// - A stored balance is never negative.
/// - Each successful charge or use appends exactly one history entry with
///   the same amount, kind and timestamp as the balance write.
/// - At most one mutation per user is in flight, and queued mutations for a
///   user run in submission order.
pub struct Engine<B = MemoryBalanceStore, H = MemoryHistoryStore> {
    balances: B,
    history: H,
    gates: GateRegistry,
    config: LedgerConfig,
}

impl Engine {
    /// Creates an engine over empty in-memory stores.
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Self::with_stores(MemoryBalanceStore::new(), MemoryHistoryStore::new(), config)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: BalanceStore, H: HistoryStore> Engine<B, H> {
    pub fn with_stores(balances: B, history: H, config: LedgerConfig) -> Self {
        Self {
            balances,
            history,
            gates: GateRegistry::new(config.gates),
            config,
        }
    }

    /// Returns the user's balance, zero for a user never seen before.
    ///
    /// # Errors
    ///
    /// [`LedgerError::ReadFailed`] if the balance store read fails.
    pub fn get_point(&self, user_id: UserId) -> Result<UserPoint, LedgerError> {
        self.balances.read(user_id).map_err(|source| {
            tracing::warn!(user = %user_id, error = %source, "balance read failed");
            LedgerError::ReadFailed { user_id, source }
        })
    }

    /// Returns the user's charge/use history in chronological order.
    ///
    /// # Errors
    ///
    /// [`LedgerError::ReadFailed`] if the history store read fails.
    pub fn history(&self, user_id: UserId) -> Result<Vec<PointHistory>, LedgerError> {
        self.history.list_by_user(user_id).map_err(|source| {
            tracing::warn!(user = %user_id, error = %source, "history read failed");
            LedgerError::ReadFailed { user_id, source }
        })
    }

    /// Adds `amount` points to the user's balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `amount` is not positive; no store is touched.
    /// - [`LedgerError::BalanceOverflow`] - the new balance exceeds `u64::MAX`.
    /// - [`LedgerError::Store`] - a store call failed.
    pub fn charge(&self, user_id: UserId, amount: i64) -> Result<UserPoint, LedgerError> {
        self.apply(TransactionType::Charge, user_id, amount)
    }

    /// Spends `amount` points from the user's balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `amount` is not positive; no store is touched.
    /// - [`LedgerError::InsufficientBalance`] - the balance is below `amount`;
    ///   nothing is written.
    /// - [`LedgerError::Store`] - a store call failed.
    pub fn use_points(&self, user_id: UserId, amount: i64) -> Result<UserPoint, LedgerError> {
        self.apply(TransactionType::Use, user_id, amount)
    }

    /// Validates and applies one mutation under the user's gate.
    ///
    /// | Kind | Behavior |
    /// |------|----------|
    /// | Charge | Adds `amount`, fails on overflow |
    /// | Use | Subtracts `amount`, fails if the balance would go negative |
    pub fn apply(
        &self,
        kind: TransactionType,
        user_id: UserId,
        amount: i64,
    ) -> Result<UserPoint, LedgerError> {
        let amount = match u64::try_from(amount) {
            Ok(amount) if amount > 0 => amount,
            _ => {
                tracing::warn!(user = %user_id, %kind, amount, "rejected non-positive amount");
                return Err(LedgerError::InvalidAmount { kind, amount });
            }
        };

        let result = self
            .gates
            .with_user_lock(user_id, || self.mutate(kind, user_id, amount));

        match &result {
            Ok(point) => tracing::debug!(
                user = %user_id,
                %kind,
                amount,
                point = point.point,
                "points updated"
            ),
            Err(error) => tracing::warn!(user = %user_id, %kind, amount, %error, "mutation failed"),
        }
        result
    }

    /// Must only run while holding the user's gate.
    fn mutate(
        &self,
        kind: TransactionType,
        user_id: UserId,
        amount: u64,
    ) -> Result<UserPoint, LedgerError> {
        let current = self.balances.read(user_id)?;
        let next = kind.apply(current.point, amount)?;
        debug_assert!(
            kind == TransactionType::Charge || next <= current.point,
            "use must never increase the balance"
        );

        let updated = self.balances.write(user_id, next)?;
        if let Err(source) = self
            .history
            .append(user_id, amount, kind, updated.update_millis)
        {
            tracing::error!(
                user = %user_id,
                %kind,
                amount,
                point = next,
                error = %source,
                "balance written but history append failed"
            );
            if self.config.on_partial_failure == PartialFailurePolicy::Compensate {
                self.restore(user_id, current.point);
            }
            return Err(source.into());
        }

        Ok(updated)
    }

    fn restore(&self, user_id: UserId, point: u64) {
        match self.balances.write(user_id, point) {
            Ok(_) => tracing::info!(user = %user_id, point, "restored balance after failed append"),
            Err(error) => tracing::error!(
                user = %user_id,
                point,
                %error,
                "failed to restore balance after failed append"
            ),
        }
    }

    /// Replays the user's history and compares it with the stored balance.
    ///
    /// Runs under the user's gate so no mutation lands between the two reads.
    pub fn reconcile(&self, user_id: UserId) -> Result<Reconciliation, LedgerError> {
        self.gates.with_user_lock(user_id, || {
            let balance = self.get_point(user_id)?.point;
            let history = self.history(user_id)?;
            let reconciliation = Reconciliation {
                balance,
                replayed: transaction::replay(&history).ok(),
            };
            if !reconciliation.is_consistent() {
                tracing::warn!(
                    user = %user_id,
                    balance,
                    replayed = ?reconciliation.replayed,
                    "balance does not match history"
                );
            }
            Ok(reconciliation)
        })
    }

    /// Per-user gates guarding mutations.
    pub fn gates(&self) -> &GateRegistry {
        &self.gates
    }

    pub fn balances(&self) -> &B {
        &self.balances
    }

    pub fn history_store(&self) -> &H {
        &self.history
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }
}
