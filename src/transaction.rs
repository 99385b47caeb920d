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

//! Point transactions and their history.
//!
//! Every successful mutation is recorded as one [`PointHistory`] entry. A
//! user's history, replayed in order from a zero balance, reproduces the
//! stored balance:
//!
//! ```text
//! point₀ = 0
//! pointₙ = pointₙ₋₁ + amountₙ   (CHARGE)
//! pointₙ = pointₙ₋₁ - amountₙ   (USE)
//! ```

use crate::LedgerError;
use crate::base::{HistoryId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of balance mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    /// Increases the balance.
    Charge,
    /// Decreases the balance.
    Use,
}

impl TransactionType {
    /// Computes the balance that results from applying `amount` to `balance`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::BalanceOverflow`] - a charge exceeds `u64::MAX`.
    /// - [`LedgerError::InsufficientBalance`] - a use exceeds the balance.
    pub fn apply(self, balance: u64, amount: u64) -> Result<u64, LedgerError> {
        match self {
            Self::Charge => balance
                .checked_add(amount)
                .ok_or(LedgerError::BalanceOverflow { balance, amount }),
            Self::Use => balance
                .checked_sub(amount)
                .ok_or(LedgerError::InsufficientBalance {
                    balance,
                    requested: amount,
                }),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Charge => f.write_str("charge"),
            Self::Use => f.write_str("use"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "charge" => Ok(Self::Charge),
            "use" => Ok(Self::Use),
            other => Err(format!("unknown transaction type '{other}'")),
        }
    }
}

/// One recorded charge or use. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointHistory {
    pub id: HistoryId,
    pub user_id: UserId,
    /// The requested amount, not the resulting balance.
    pub amount: u64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub time_millis: u64,
}

/// Folds a history sequence from a zero balance.
///
/// # Errors
///
/// Fails with the first arithmetic error encountered, e.g. a use entry that
/// would take the replayed balance below zero.
pub fn replay(history: &[PointHistory]) -> Result<u64, LedgerError> {
    history
        .iter()
        .try_fold(0u64, |balance, entry| entry.kind.apply(balance, entry.amount))
}
