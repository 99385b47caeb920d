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

//! Per-user mutual exclusion with first-come, first-served ordering.
//!
//! Every balance mutation runs while holding its user's [`Gate`]. A gate is a
//! ticket lock: the caller draws a ticket when it *asks* for the gate and
//! tickets are served strictly in order, so two requests for the same user
//! run in the order they were submitted, not in whatever order the scheduler
//! happens to wake them.
//!
//! Gates for different users are independent. With [`GateMode::Sharded`]
//! users that land in the same shard share a gate.
//!
//! The gate is released when its [`GateGuard`] is dropped, which covers
//! normal returns, `?` early exits and panics alike.

use crate::base::UserId;
use crate::config::GateMode;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Tickets {
    /// Next ticket to hand out.
    next: u64,
    /// Ticket currently allowed to run.
    serving: u64,
}

/// FIFO lock guarding one user's (or one shard's) balance.
#[derive(Debug, Default)]
pub struct Gate {
    tickets: Mutex<Tickets>,
    turn: Condvar,
}

impl Gate {
    /// Draws a ticket and blocks until it is served.
    pub fn acquire(gate: Arc<Gate>) -> GateGuard {
        let mut tickets = gate.tickets.lock();
        let ticket = tickets.next;
        tickets.next += 1;
        if tickets.serving != ticket {
            tracing::trace!(ticket, serving = tickets.serving, "gate contended, queueing");
        }
        while tickets.serving != ticket {
            gate.turn.wait(&mut tickets);
        }
        drop(tickets);
        GateGuard { gate }
    }

    /// Tickets drawn but not yet released: the holder plus everyone queued.
    pub fn pending(&self) -> u64 {
        let tickets = self.tickets.lock();
        tickets.next - tickets.serving
    }

    // Every waiter wakes to compare its ticket, so a queue of n costs O(n)
    // wakeups per release. Per-user queues are expected to stay short.
    fn release(&self) {
        self.tickets.lock().serving += 1;
        self.turn.notify_all();
    }
}

/// Holds a gate until dropped.
#[derive(Debug)]
#[must_use = "the gate is released as soon as the guard is dropped"]
pub struct GateGuard {
    gate: Arc<Gate>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[derive(Debug)]
enum Gates {
    PerUser(DashMap<UserId, Arc<Gate>>),
    Sharded(Box<[Arc<Gate>]>),
}

/// Hands out the gate for a user id.
///
/// In [`GateMode::PerUser`] gates are created on first use and kept until
/// [`GateRegistry::evict_idle`] removes the ones nobody holds.
#[derive(Debug)]
pub struct GateRegistry {
    gates: Gates,
}

impl GateRegistry {
    pub fn new(mode: GateMode) -> Self {
        let gates = match mode {
            GateMode::PerUser => Gates::PerUser(DashMap::new()),
            GateMode::Sharded { shards } => Gates::Sharded(
                (0..shards.get()).map(|_| Arc::new(Gate::default())).collect(),
            ),
        };
        Self { gates }
    }

    fn gate(&self, user_id: UserId) -> Arc<Gate> {
        match &self.gates {
            Gates::PerUser(gates) => Arc::clone(gates.entry(user_id).or_default().value()),
            Gates::Sharded(table) => Arc::clone(&table[Self::shard(table, user_id)]),
        }
    }

    fn shard(table: &[Arc<Gate>], user_id: UserId) -> usize {
        (user_id.0 % table.len() as u64) as usize
    }

    /// Blocks until `user_id`'s gate is held by the caller.
    pub fn lock(&self, user_id: UserId) -> GateGuard {
        Gate::acquire(self.gate(user_id))
    }

    /// Runs `f` while holding `user_id`'s gate and returns its result.
    pub fn with_user_lock<T>(&self, user_id: UserId, f: impl FnOnce() -> T) -> T {
        let _guard = self.lock(user_id);
        f()
    }

    /// Holder plus queued callers on `user_id`'s gate.
    pub fn pending(&self, user_id: UserId) -> u64 {
        match &self.gates {
            Gates::PerUser(gates) => gates.get(&user_id).map_or(0, |gate| gate.pending()),
            Gates::Sharded(table) => table[Self::shard(table, user_id)].pending(),
        }
    }

    /// Number of gates currently allocated.
    pub fn len(&self) -> usize {
        match &self.gates {
            Gates::PerUser(gates) => gates.len(),
            Gates::Sharded(table) => table.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops per-user gates that are neither held nor waited on.
    ///
    /// Returns how many gates were removed. Sharded tables are fixed-size and
    /// never evict.
    pub fn evict_idle(&self) -> usize {
        match &self.gates {
            Gates::PerUser(gates) => {
                let before = gates.len();
                // Holders and waiters each own a clone, and clones are only
                // taken under the shard lock that `retain` holds here.
                gates.retain(|_, gate| Arc::strong_count(gate) > 1);
                let evicted = before.saturating_sub(gates.len());
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = gates.len(), "evicted idle gates");
                }
                evicted
            }
            Gates::Sharded(_) => 0,
        }
    }
}

impl Default for GateRegistry {
    fn default() -> Self {
        Self::new(GateMode::default())
    }
}
