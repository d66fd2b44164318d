// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Per-policy packet and byte counters.

use super::trie::SlotVec;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use spd_api::CombinedCount;
use spd_api::PolicyIndex;
use std::sync::Arc;

/// A packet and byte counter pair, safe to bump from any number of
/// lookup paths at once.
#[derive(Debug, Default)]
pub struct CombinedCounter {
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl CombinedCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit(&self, bytes: u64) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn read(&self) -> CombinedCount {
        CombinedCount {
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.packets.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
    }
}

/// Counter slots indexed by policy index.
///
/// Allocating a slot always installs a fresh counter. A lookup that
/// loaded an older generation may still hold the counter of a
/// deleted policy; its increment lands there and never in the counter
/// of a policy that reused the index.
#[derive(Clone, Debug, Default)]
pub struct CounterTable {
    slots: SlotVec<Arc<CombinedCounter>>,
}

impl CounterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a zeroed counter at `index`.
    pub fn alloc(&mut self, index: PolicyIndex) -> Arc<CombinedCounter> {
        let ctr = Arc::new(CombinedCounter::new());
        self.slots.insert(index, Arc::clone(&ctr));
        ctr
    }

    /// Retire the counter at `index`, returning it.
    pub fn free(
        &mut self,
        index: PolicyIndex,
    ) -> Option<Arc<CombinedCounter>> {
        self.slots.remove(index)
    }

    pub fn get(&self, index: PolicyIndex) -> Option<&Arc<CombinedCounter>> {
        self.slots.get(index)
    }

    pub fn read(&self, index: PolicyIndex) -> Option<CombinedCount> {
        self.get(index).map(|c| c.read())
    }

    /// Is the node holding slot `index` shared with `other`?
    pub fn shares_slot(&self, other: &Self, index: PolicyIndex) -> bool {
        self.slots.shares_leaf(&other.slots, index)
    }

    pub fn clear_all(&self) {
        for ctr in self.slots.values() {
            ctr.clear();
        }
    }
}
