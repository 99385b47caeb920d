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

//! Balance and history storage contracts.
//!
//! The engine only talks to storage through [`BalanceStore`] and
//! [`HistoryStore`]. Each write is atomic at the store level; the two stores
//! are not written atomically together (see [`PartialFailurePolicy`]).
//!
//! [`MemoryBalanceStore`] and [`MemoryHistoryStore`] are the in-process
//! implementations. Both can simulate a slow backend with a fixed per-call
//! latency, which widens race windows in concurrency tests.
//!
//! [`PartialFailurePolicy`]: crate::PartialFailurePolicy

use crate::base::{HistoryId, UserId, now_millis};
use crate::error::StoreError;
use crate::point::UserPoint;
use crate::transaction::{PointHistory, TransactionType};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Durable mapping from user id to current balance.
pub trait BalanceStore: Send + Sync {
    /// Returns the user's balance, materializing a zero record on first read.
    fn read(&self, user_id: UserId) -> Result<UserPoint, StoreError>;

    /// Stores `point` as the user's balance and returns the stored record
    /// with a fresh timestamp.
    fn write(&self, user_id: UserId, point: u64) -> Result<UserPoint, StoreError>;
}

/// Append-only log of balance mutations keyed by user id.
pub trait HistoryStore: Send + Sync {
    /// Appends one entry and returns it with its assigned id.
    fn append(
        &self,
        user_id: UserId,
        amount: u64,
        kind: TransactionType,
        time_millis: u64,
    ) -> Result<PointHistory, StoreError>;

    /// Returns the user's entries in insertion order, empty if none exist.
    fn list_by_user(&self, user_id: UserId) -> Result<Vec<PointHistory>, StoreError>;
}

impl<T: BalanceStore + ?Sized> BalanceStore for Arc<T> {
    fn read(&self, user_id: UserId) -> Result<UserPoint, StoreError> {
        (**self).read(user_id)
    }

    fn write(&self, user_id: UserId, point: u64) -> Result<UserPoint, StoreError> {
        (**self).write(user_id, point)
    }
}

impl<T: HistoryStore + ?Sized> HistoryStore for Arc<T> {
    fn append(
        &self,
        user_id: UserId,
        amount: u64,
        kind: TransactionType,
        time_millis: u64,
    ) -> Result<PointHistory, StoreError> {
        (**self).append(user_id, amount, kind, time_millis)
    }

    fn list_by_user(&self, user_id: UserId) -> Result<Vec<PointHistory>, StoreError> {
        (**self).list_by_user(user_id)
    }
}

/// In-memory balance table.
#[derive(Debug, Default)]
pub struct MemoryBalanceStore {
    points: DashMap<UserId, UserPoint>,
    latency: Option<Duration>,
}

impl MemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that sleeps for `latency` on every call.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            points: DashMap::new(),
            latency: Some(latency),
        }
    }

    /// Returns every known record, sorted by user id.
    pub fn snapshot(&self) -> Vec<UserPoint> {
        let mut points: Vec<UserPoint> = self.points.iter().map(|r| r.value().clone()).collect();
        points.sort_by_key(|p| p.id);
        points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn pause(&self) {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
    }
}

impl BalanceStore for MemoryBalanceStore {
    fn read(&self, user_id: UserId) -> Result<UserPoint, StoreError> {
        self.pause();
        if let Some(point) = self.points.get(&user_id) {
            return Ok(point.value().clone());
        }
        // Another reader may have inserted since the lookup; `entry` keeps theirs.
        let point = self
            .points
            .entry(user_id)
            .or_insert_with(|| UserPoint::empty(user_id, now_millis()));
        Ok(point.value().clone())
    }

    fn write(&self, user_id: UserId, point: u64) -> Result<UserPoint, StoreError> {
        self.pause();
        let now = now_millis();
        let mut record = self
            .points
            .entry(user_id)
            .or_insert_with(|| UserPoint::empty(user_id, now));
        *record = record.updated(point, now);
        Ok(record.value().clone())
    }
}

/// In-memory history log.
///
/// Entry ids come from one counter shared by all users, starting at 1.
#[derive(Debug)]
pub struct MemoryHistoryStore {
    entries: DashMap<UserId, Vec<PointHistory>>,
    next_id: AtomicU64,
    latency: Option<Duration>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
            latency: None,
        }
    }

    /// Creates a store that sleeps for `latency` on every call.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new()
        }
    }

    /// Total number of entries across all users.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|r| r.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pause(&self) {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
    }
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn append(
        &self,
        user_id: UserId,
        amount: u64,
        kind: TransactionType,
        time_millis: u64,
    ) -> Result<PointHistory, StoreError> {
        self.pause();
        // Allocate the id under the user's entry lock so ids stay increasing
        // within each user's sequence.
        let mut entries = self.entries.entry(user_id).or_default();
        let entry = PointHistory {
            id: HistoryId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            user_id,
            amount,
            kind,
            time_millis,
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    fn list_by_user(&self, user_id: UserId) -> Result<Vec<PointHistory>, StoreError> {
        self.pause();
        Ok(self
            .entries
            .get(&user_id)
            .map(|entries| entries.value().clone())
            .unwrap_or_default())
    }
}
