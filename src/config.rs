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

//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// How user ids map to gates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum GateMode {
    /// One gate per user id, created on first use.
    #[default]
    PerUser,
    /// A fixed table of gates indexed by `user_id mod shards`. Unrelated
    /// users in the same shard serialize behind each other.
    Sharded { shards: NonZeroUsize },
}

/// What the engine does when the history append fails after the balance
/// write already succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialFailurePolicy {
    /// Return the store error and leave the new balance in place.
    #[default]
    Propagate,
    /// Write the previous balance back before returning the store error.
    Compensate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub gates: GateMode,
    pub on_partial_failure: PartialFailurePolicy,
}
