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

//! # Point Ledger
//!
//! This library keeps a per-user point balance: callers can query it, charge
//! it, spend it, and read back the history of those operations.
//!
//! ## Core Components
//!
//! - [`Engine`]: Validates and applies charge/use requests
//! - [`GateRegistry`]: FIFO per-user gates serializing mutations
//! - [`BalanceStore`] / [`HistoryStore`]: Storage contracts, with in-memory implementations
//! - [`LedgerError`]: Error types for ledger operations
//!
//! ## Example
//!
//! ```
//! use point_ledger::{Engine, LedgerError, TransactionType, UserId};
//!
//! let engine = Engine::new();
//!
//! // A user never seen before starts at zero
//! assert_eq!(engine.get_point(UserId(1)).unwrap().point, 0);
//!
//! engine.charge(UserId(1), 100).unwrap();
//! let point = engine.use_points(UserId(1), 30).unwrap();
//! assert_eq!(point.point, 70);
//!
//! // Overdrafts are rejected and leave no trace
//! assert!(matches!(
//!     engine.use_points(UserId(1), 500),
//!     Err(LedgerError::InsufficientBalance { .. })
//! ));
//!
//! let history = engine.history(UserId(1)).unwrap();
//! assert_eq!(history.len(), 2);
//! assert_eq!(history[1].kind, TransactionType::Use);
//! ```
//!
//! ## Thread Safety
//!
//! Mutations for the same user run one at a time in submission order;
//! mutations for different users run in parallel.

mod base;
pub mod config;
mod engine;
pub mod error;
pub mod gate;
mod point;
pub mod store;
mod transaction;

pub use base::{HistoryId, UserId, now_millis};
pub use config::{GateMode, LedgerConfig, PartialFailurePolicy};
pub use engine::{Engine, Reconciliation};
pub use error::{LedgerError, StoreError};
pub use gate::{Gate, GateGuard, GateRegistry};
pub use point::UserPoint;
pub use store::{BalanceStore, HistoryStore, MemoryBalanceStore, MemoryHistoryStore};
pub use transaction::{PointHistory, TransactionType, replay};
