// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The fast-path index: masked keys to candidate policy ids.

use super::Result;
use super::key::FpKey;
use super::key::FpKey4;
use super::key::FpKey6;
use super::key::FpTuple;
use super::mask::FpMask;
use super::mask::MaskId;
use super::mask::MaskRegistry;
use super::trie::HashTrie;
use core::hash::BuildHasherDefault;
use spd_api::AddrFamily;
use spd_api::PolicyIndex;
use spd_api::SpdError;
use std::sync::Arc;

/// Keys hash with CRC-32 over their byte image.
pub type FpHasher = BuildHasherDefault<crc32fast::Hasher>;

/// The policies sharing one masked key.
///
/// A bucket is never modified in place: insert and erase replace it,
/// so a generation holding the old bucket keeps seeing a complete
/// list.
pub type Candidates = Arc<[PolicyIndex]>;

/// Masked keys to their candidates.
///
/// Cloning a table is cheap and the clone shares every bucket; an
/// insert or erase copies only the trie path to its key.
#[derive(Clone, Debug)]
pub struct FpTable<K: FpKey> {
    map: HashTrie<K, Candidates, FpHasher>,
}

impl<K: FpKey> Default for FpTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: FpKey> FpTable<K> {
    pub fn new() -> Self {
        Self { map: HashTrie::new() }
    }

    /// Add `id` to the candidates of `key`.
    pub fn insert(&mut self, key: K, id: PolicyIndex) -> Result<()> {
        let bucket: Candidates = match self.map.get(&key) {
            Some(cur) if cur.contains(&id) => {
                return Err(SpdError::DuplicateInsert {
                    key: key.to_hex(),
                    policy: id,
                });
            }

            Some(cur) => {
                cur.iter().copied().chain(core::iter::once(id)).collect()
            }

            None => Arc::from([id]),
        };

        self.map.insert(key, bucket);
        Ok(())
    }

    /// Remove `id` from the candidates of `key`, dropping the key once
    /// no candidates remain.
    pub fn erase(&mut self, key: &K, id: PolicyIndex) -> Result<()> {
        let Some(cur) = self.map.get(key) else {
            return Err(SpdError::CorruptIndex { policy: id });
        };

        if !cur.contains(&id) {
            return Err(SpdError::CorruptIndex { policy: id });
        }

        if cur.len() == 1 {
            self.map.remove(key);
        } else {
            let bucket: Candidates =
                cur.iter().copied().filter(|c| *c != id).collect();
            self.map.insert(*key, bucket);
        }

        Ok(())
    }

    pub fn lookup(&self, key: &K) -> Option<&Candidates> {
        self.map.get(key)
    }

    /// The number of distinct keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// The number of candidate ids over all keys.
    pub fn num_entries(&self) -> usize {
        self.map.values().map(|c| c.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &Candidates)> {
        self.map.iter()
    }
}

/// What [`FamilyIndex::attach`] did to the mask registry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Attached {
    pub mask: MaskId,
    pub created: bool,
}

/// The masks and table of one address family in one direction.
#[derive(Clone, Debug)]
pub struct FamilyIndex<K: FpKey> {
    pub masks: MaskRegistry,
    pub table: FpTable<K>,
}

impl<K: FpKey> Default for FamilyIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: FpKey> FamilyIndex<K> {
    pub fn new() -> Self {
        Self { masks: MaskRegistry::new(), table: FpTable::new() }
    }

    pub fn family(&self) -> AddrFamily {
        K::FAMILY
    }

    /// Make policy `id`, whose selectors reduce to `tuple`, reachable
    /// through `mask`. On failure the mask reference is given back.
    pub fn attach(
        &mut self,
        id: PolicyIndex,
        tuple: &FpTuple,
        mask: FpMask,
    ) -> Result<Attached> {
        let (mask_id, created) = self.masks.find_or_create(mask);
        let key = K::from_masked(&tuple.masked(&mask));
        if let Err(e) = self.table.insert(key, id) {
            self.masks.release(mask_id);
            return Err(e);
        }

        Ok(Attached { mask: mask_id, created })
    }

    /// Undo [`FamilyIndex::attach`]. Return whether the mask was
    /// retired.
    pub fn detach(
        &mut self,
        id: PolicyIndex,
        tuple: &FpTuple,
        mask_id: MaskId,
    ) -> Result<bool> {
        let Some(entry) = self.masks.get(mask_id) else {
            return Err(SpdError::CorruptIndex { policy: id });
        };

        let key = K::from_masked(&tuple.masked(&entry.mask));
        self.table.erase(&key, id)?;
        self.masks
            .release(mask_id)
            .ok_or(SpdError::CorruptIndex { policy: id })
    }

    /// Is policy `id` present in the bucket its tuple and mask lead
    /// to?
    pub fn holds(
        &self,
        id: PolicyIndex,
        tuple: &FpTuple,
        mask_id: MaskId,
    ) -> bool {
        let Some(entry) = self.masks.get(mask_id) else {
            return false;
        };

        self.table
            .lookup(&K::from_masked(&tuple.masked(&entry.mask)))
            .is_some_and(|c| c.contains(&id))
    }

    /// Every candidate id in the table, with repeats.
    pub fn ids(&self) -> impl Iterator<Item = PolicyIndex> + '_ {
        self.table.iter().flat_map(|(_, c)| c.iter().copied())
    }

    /// The candidate buckets for a packet, one probe per mask.
    pub fn probe<'a>(
        &'a self,
        pkt: &'a FpTuple,
    ) -> impl Iterator<Item = &'a Candidates> + 'a {
        self.masks.iter().filter_map(move |(_, entry)| {
            self.table.lookup(&K::from_masked(&pkt.masked(&entry.mask)))
        })
    }
}

/// The per-direction index: one [`FamilyIndex`] per key width.
#[derive(Clone, Debug, Default)]
pub struct DirIndex {
    pub v4: FamilyIndex<FpKey4>,
    pub v6: FamilyIndex<FpKey6>,
}

impl DirIndex {
    pub fn new() -> Self {
        Self { v4: FamilyIndex::new(), v6: FamilyIndex::new() }
    }

    pub fn attach(
        &mut self,
        id: PolicyIndex,
        tuple: &FpTuple,
        mask: FpMask,
    ) -> Result<Attached> {
        match tuple.family {
            AddrFamily::V4 => self.v4.attach(id, tuple, mask),
            AddrFamily::V6 => self.v6.attach(id, tuple, mask),
        }
    }

    pub fn detach(
        &mut self,
        id: PolicyIndex,
        tuple: &FpTuple,
        mask_id: MaskId,
    ) -> Result<bool> {
        match tuple.family {
            AddrFamily::V4 => self.v4.detach(id, tuple, mask_id),
            AddrFamily::V6 => self.v6.detach(id, tuple, mask_id),
        }
    }

    pub fn holds(
        &self,
        family: AddrFamily,
        id: PolicyIndex,
        tuple: &FpTuple,
        mask_id: MaskId,
    ) -> bool {
        match family {
            AddrFamily::V4 => self.v4.holds(id, tuple, mask_id),
            AddrFamily::V6 => self.v6.holds(id, tuple, mask_id),
        }
    }

    pub fn ids(&self, family: AddrFamily) -> Vec<PolicyIndex> {
        match family {
            AddrFamily::V4 => self.v4.ids().collect(),
            AddrFamily::V6 => self.v6.ids().collect(),
        }
    }

    pub fn masks(&self, family: AddrFamily) -> &MaskRegistry {
        match family {
            AddrFamily::V4 => &self.v4.masks,
            AddrFamily::V6 => &self.v6.masks,
        }
    }

    /// The number of keys and candidate ids of one family's table.
    pub fn occupancy(&self, family: AddrFamily) -> (usize, usize) {
        match family {
            AddrFamily::V4 => {
                (self.v4.table.len(), self.v4.table.num_entries())
            }
            AddrFamily::V6 => {
                (self.v6.table.len(), self.v6.table.num_entries())
            }
        }
    }
}
