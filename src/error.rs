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

//! Error types for ledger operations.

use crate::base::UserId;
use crate::transaction::TransactionType;
use thiserror::Error;

/// Failures reported by a balance or history store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store cannot serve requests right now
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backing store failed while reading or writing
    #[error("store i/o error: {0}")]
    Io(String),
}

/// Ledger operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero or negative
    #[error("invalid {kind} amount {amount} (must be a positive integer)")]
    InvalidAmount { kind: TransactionType, amount: i64 },

    /// Use would drive the balance below zero
    #[error("insufficient balance: {balance} available, {requested} requested")]
    InsufficientBalance { balance: u64, requested: u64 },

    /// Charge would exceed the representable balance
    #[error("balance overflow: {balance} + {amount} exceeds the maximum balance")]
    BalanceOverflow { balance: u64, amount: u64 },

    /// A balance or history read failed on the query path
    #[error("failed to read points of user {user_id}: {source}")]
    ReadFailed {
        user_id: UserId,
        #[source]
        source: StoreError,
    },

    /// A store operation failed while mutating a balance
    #[error(transparent)]
    Store(#[from] StoreError),
}
