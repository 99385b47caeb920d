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

//! Point balance records.
//!
//! # Example
//!
//! ```
//! use point_ledger::{UserId, UserPoint};
//!
//! let point = UserPoint::empty(UserId(1), 0);
//! assert_eq!(point.point, 0);
//! ```

use crate::base::UserId;
use serde::{Deserialize, Serialize};

/// Current balance of one user.
///
/// Created with a zero balance the first time a user is read, mutated only
/// through the balance store's write, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPoint {
    pub id: UserId,
    pub point: u64,
    pub update_millis: u64,
}

impl UserPoint {
    /// Zero balance record for a user seen for the first time.
    pub fn empty(id: UserId, now_millis: u64) -> Self {
        Self {
            id,
            point: 0,
            update_millis: now_millis,
        }
    }

    /// Returns the record with `point` replaced and a fresh timestamp.
    pub fn updated(&self, point: u64, now_millis: u64) -> Self {
        Self {
            id: self.id,
            point,
            update_millis: now_millis,
        }
    }
}
