// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The pool of installed policies.

use super::Result;
use super::index::FpHasher;
use super::policy::Policy;
use super::trie::HashTrie;
use super::trie::SlotVec;
use spd_api::PolicyIndex;
use spd_api::PolicyReq;
use spd_api::SpdError;
use std::sync::Arc;

/// Policies by stable index, backed by a free list.
///
/// Indices of deleted policies are handed out again, most recently
/// freed first. Every container is a persistent trie, so cloning a
/// store shares all of it.
#[derive(Clone, Debug)]
pub struct PolicyStore {
    slots: SlotVec<Arc<Policy>>,
    /// Freed indices as a stack, most recent on top.
    free: SlotVec<PolicyIndex>,
    by_req: HashTrie<PolicyReq, PolicyIndex, FpHasher>,
    /// One past the highest index ever stored.
    end: PolicyIndex,
    limit: u32,
}

impl PolicyStore {
    pub fn new(limit: u32) -> Self {
        Self {
            slots: SlotVec::new(),
            free: SlotVec::new(),
            by_req: HashTrie::new(),
            end: 0,
            limit,
        }
    }

    fn free_top(&self) -> Option<PolicyIndex> {
        let top = self.free.len().checked_sub(1)?;
        self.free.get(top as u32).copied()
    }

    /// Pick the index the next policy will be stored under. The index
    /// stays free until [`PolicyStore::put`] fills it.
    pub fn next_index(&self) -> Result<PolicyIndex> {
        if self.len() >= self.limit as usize {
            return Err(SpdError::MaxCapacity(self.limit));
        }

        Ok(self.free_top().unwrap_or(self.end))
    }

    /// Store `policy` under its index, which must be the one
    /// [`PolicyStore::next_index`] returned.
    pub fn put(&mut self, policy: Arc<Policy>) {
        let idx = policy.index();
        if self.free_top() == Some(idx) {
            self.free.remove((self.free.len() - 1) as u32);
        } else {
            debug_assert_eq!(idx, self.end);
            self.end = idx + 1;
        }

        self.by_req.insert(policy.req().clone(), idx);
        self.slots.insert(idx, policy);
    }

    pub fn remove(&mut self, index: PolicyIndex) -> Result<Arc<Policy>> {
        let Some(policy) = self.slots.remove(index) else {
            return Err(SpdError::NotFound { index });
        };

        self.by_req.remove(policy.req());
        self.free.insert(self.free.len() as u32, index);
        Ok(policy)
    }

    pub fn get(&self, index: PolicyIndex) -> Option<&Arc<Policy>> {
        self.slots.get(index)
    }

    /// Find the installed policy identical to `req`, which must be
    /// normalized.
    pub fn find(&self, req: &PolicyReq) -> Option<PolicyIndex> {
        self.by_req.get(req).copied()
    }

    /// The installed policies, in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Policy>> {
        self.slots.values()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Is the node holding slot `index` shared with `other`?
    pub fn shares_slot(&self, other: &Self, index: PolicyIndex) -> bool {
        self.slots.shares_leaf(&other.slots, index)
    }
}
