// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Persistent containers for SPD generations.
//!
//! Every request starts from a clone of the current generation. The
//! containers here are 64-way tries whose nodes sit behind `Arc`:
//! cloning one bumps a single reference count, and an update copies
//! only the nodes on the path to the slot it touches. The cost of a
//! request therefore grows with the depth of the trie, never with the
//! number of entries in it.

use core::hash::BuildHasher;
use core::hash::Hash;
use core::mem;
use std::sync::Arc;

const BITS: u32 = 6;
const WIDTH: usize = 1 << BITS;
const SLOT_MASK: u32 = (WIDTH - 1) as u32;

/// A leaf of a [`HashTrie`] splits once it holds more entries than
/// this, as long as hash bits remain.
const LEAF_MAX: usize = 8;

type Children<N> = [Option<Arc<N>>; WIDTH];

fn empty<T>() -> [Option<T>; WIDTH] {
    core::array::from_fn(|_| None)
}

fn slot(key: u32, shift: u32) -> usize {
    ((key >> shift) & SLOT_MASK) as usize
}

#[derive(Clone, Debug)]
enum VecNode<T> {
    Leaf([Option<T>; WIDTH]),
    Inner(Children<VecNode<T>>),
}

impl<T> VecNode<T> {
    fn values<'a>(&'a self) -> Box<dyn Iterator<Item = &'a T> + 'a> {
        match self {
            Self::Leaf(slots) => Box::new(slots.iter().flatten()),
            Self::Inner(children) => {
                Box::new(children.iter().flatten().flat_map(|c| c.values()))
            }
        }
    }
}

/// A sparse vector indexed by `u32`.
///
/// The trie grows a level whenever an index beyond its reach is
/// stored; it never shrinks.
#[derive(Clone, Debug)]
pub struct SlotVec<T> {
    root: Arc<VecNode<T>>,
    height: u32,
    len: usize,
}

impl<T: Clone> Default for SlotVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> SlotVec<T> {
    pub fn new() -> Self {
        Self { root: Arc::new(VecNode::Leaf(empty())), height: 0, len: 0 }
    }

    fn reaches(&self, index: u32) -> bool {
        let bits = BITS * (self.height + 1);
        bits >= u32::BITS || index >> bits == 0
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        if !self.reaches(index) {
            return None;
        }

        let mut node = &*self.root;
        let mut shift = BITS * self.height;
        loop {
            match node {
                VecNode::Leaf(slots) => return slots[slot(index, 0)].as_ref(),
                VecNode::Inner(children) => {
                    node = children[slot(index, shift)].as_deref()?;
                    shift -= BITS;
                }
            }
        }
    }

    /// Store `value` at `index`, returning the value it replaces.
    pub fn insert(&mut self, index: u32, value: T) -> Option<T> {
        while !self.reaches(index) {
            let mut children = empty();
            children[0] = Some(mem::replace(
                &mut self.root,
                Arc::new(VecNode::Leaf(empty())),
            ));
            self.root = Arc::new(VecNode::Inner(children));
            self.height += 1;
        }

        let shift = BITS * self.height;
        let old = Self::slot_mut(&mut self.root, shift, index).replace(value);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    pub fn remove(&mut self, index: u32) -> Option<T> {
        // Never copy a path that leads nowhere.
        self.get(index)?;
        let shift = BITS * self.height;
        let old = Self::slot_mut(&mut self.root, shift, index).take();
        self.len -= 1;
        old
    }

    /// The slot for `index`, copying every shared node on the way and
    /// creating missing ones.
    fn slot_mut(
        node: &mut Arc<VecNode<T>>,
        shift: u32,
        index: u32,
    ) -> &mut Option<T> {
        match Arc::make_mut(node) {
            VecNode::Leaf(slots) => &mut slots[slot(index, 0)],
            VecNode::Inner(children) => {
                let child =
                    children[slot(index, shift)].get_or_insert_with(|| {
                        if shift == BITS {
                            Arc::new(VecNode::Leaf(empty()))
                        } else {
                            Arc::new(VecNode::Inner(empty()))
                        }
                    });
                Self::slot_mut(child, shift - BITS, index)
            }
        }
    }

    /// The occupied slots, in index order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.root.values()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Does `other` share this vector's root?
    pub fn shares_root(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.root, &other.root)
    }

    /// Is the leaf holding `index` the same node in `other`?
    pub fn shares_leaf(&self, other: &Self, index: u32) -> bool {
        match (self.leaf(index), other.leaf(index)) {
            (Some(a), Some(b)) => core::ptr::eq(a, b),
            _ => false,
        }
    }

    fn leaf(&self, index: u32) -> Option<&VecNode<T>> {
        if !self.reaches(index) {
            return None;
        }

        let mut node = &*self.root;
        let mut shift = BITS * self.height;
        while let VecNode::Inner(children) = node {
            node = children[slot(index, shift)].as_deref()?;
            shift = shift.saturating_sub(BITS);
        }
        Some(node)
    }
}

/// The entries of a [`HashTrie`] leaf, with their hashes.
type Entries<K, V> = Vec<(u32, K, V)>;

#[derive(Clone, Debug)]
enum MapNode<K, V> {
    Leaf(Entries<K, V>),
    Inner(Children<MapNode<K, V>>),
}

impl<K, V> MapNode<K, V> {
    fn entries<'a>(
        &'a self,
    ) -> Box<dyn Iterator<Item = (&'a K, &'a V)> + 'a> {
        match self {
            Self::Leaf(entries) => {
                Box::new(entries.iter().map(|(_, k, v)| (k, v)))
            }
            Self::Inner(children) => {
                Box::new(children.iter().flatten().flat_map(|c| c.entries()))
            }
        }
    }
}

/// A hash map over the 32-bit hash of its keys.
///
/// Each level consumes six bits of the hash. Entries live in small
/// leaves that split into a new level when they overflow.
#[derive(Clone, Debug)]
pub struct HashTrie<K, V, S> {
    root: Arc<MapNode<K, V>>,
    len: usize,
    hasher: S,
}

impl<K, V, S> Default for HashTrie<K, V, S>
where
    K: Clone + Eq + Hash,
    V: Clone,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> HashTrie<K, V, S>
where
    K: Clone + Eq + Hash,
    V: Clone,
    S: BuildHasher + Default,
{
    pub fn new() -> Self {
        Self {
            root: Arc::new(MapNode::Leaf(Vec::new())),
            len: 0,
            hasher: S::default(),
        }
    }

    fn hash(&self, key: &K) -> u32 {
        self.hasher.hash_one(key) as u32
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = self.hash(key);
        let mut node = &*self.root;
        let mut shift = 0;
        loop {
            match node {
                MapNode::Leaf(entries) => {
                    return entries
                        .iter()
                        .find(|(h, k, _)| *h == hash && k == key)
                        .map(|(_, _, v)| v);
                }

                MapNode::Inner(children) => {
                    node = children[slot(hash, shift)].as_deref()?;
                    shift += BITS;
                }
            }
        }
    }

    /// Map `key` to `value`, returning the value it replaces.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = self.hash(&key);
        let old = Self::insert_at(&mut self.root, 0, hash, key, value);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    fn insert_at(
        node: &mut Arc<MapNode<K, V>>,
        shift: u32,
        hash: u32,
        key: K,
        value: V,
    ) -> Option<V> {
        let node = Arc::make_mut(node);
        match node {
            MapNode::Leaf(entries) => {
                let found = entries
                    .iter_mut()
                    .find(|(h, k, _)| *h == hash && *k == key);
                if let Some((_, _, v)) = found {
                    return Some(mem::replace(v, value));
                }

                if entries.len() < LEAF_MAX || shift >= u32::BITS {
                    entries.push((hash, key, value));
                    return None;
                }

                let mut children = Self::split(mem::take(entries), shift);
                let old = Self::insert_child(
                    &mut children,
                    shift,
                    hash,
                    key,
                    value,
                );
                *node = MapNode::Inner(children);
                old
            }

            MapNode::Inner(children) => {
                Self::insert_child(children, shift, hash, key, value)
            }
        }
    }

    fn insert_child(
        children: &mut Children<MapNode<K, V>>,
        shift: u32,
        hash: u32,
        key: K,
        value: V,
    ) -> Option<V> {
        let child = children[slot(hash, shift)]
            .get_or_insert_with(|| Arc::new(MapNode::Leaf(Vec::new())));
        Self::insert_at(child, shift + BITS, hash, key, value)
    }

    /// Spread the entries of a full leaf over a new level.
    fn split(entries: Entries<K, V>, shift: u32) -> Children<MapNode<K, V>> {
        let mut spread: [Entries<K, V>; WIDTH] =
            core::array::from_fn(|_| Vec::new());
        for e in entries {
            spread[slot(e.0, shift)].push(e);
        }

        let mut children = empty();
        for (child, entries) in children.iter_mut().zip(spread) {
            if !entries.is_empty() {
                *child = Some(Arc::new(MapNode::Leaf(entries)));
            }
        }
        children
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        // Never copy a path that leads nowhere.
        self.get(key)?;
        let hash = self.hash(key);
        let old = Self::remove_at(&mut self.root, 0, hash, key);
        if old.is_some() {
            self.len -= 1;
        }
        old
    }

    fn remove_at(
        node: &mut Arc<MapNode<K, V>>,
        shift: u32,
        hash: u32,
        key: &K,
    ) -> Option<V> {
        match Arc::make_mut(node) {
            MapNode::Leaf(entries) => {
                let pos = entries
                    .iter()
                    .position(|(h, k, _)| *h == hash && k == key)?;
                Some(entries.swap_remove(pos).2)
            }

            MapNode::Inner(children) => {
                let idx = slot(hash, shift);
                let child = children[idx].as_mut()?;
                let old = Self::remove_at(child, shift + BITS, hash, key);
                if matches!(&**child, MapNode::Leaf(e) if e.is_empty()) {
                    children[idx] = None;
                }
                old
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.root.entries()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Is the leaf holding `key` the same node in `other`?
    pub fn shares_leaf(&self, other: &Self, key: &K) -> bool {
        match (self.leaf(key), other.leaf(key)) {
            (Some(a), Some(b)) => core::ptr::eq(a, b),
            _ => false,
        }
    }

    fn leaf(&self, key: &K) -> Option<&MapNode<K, V>> {
        let hash = self.hash(key);
        let mut node = &*self.root;
        let mut shift = 0;
        while let MapNode::Inner(children) = node {
            node = children[slot(hash, shift)].as_deref()?;
            shift += BITS;
        }
        Some(node)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::hash::BuildHasherDefault;
    use core::hash::Hasher;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::collections::HashMap;

    type Crc = BuildHasherDefault<crc32fast::Hasher>;

    /// Hashes every key to its own low 32 bits, for placing keys in
    /// chosen leaves.
    #[derive(Default)]
    struct Identity(u64);

    impl Hasher for Identity {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, _bytes: &[u8]) {
            unimplemented!()
        }

        fn write_u64(&mut self, v: u64) {
            self.0 = v;
        }
    }

    type Ident = BuildHasherDefault<Identity>;

    #[test]
    fn slot_vec_grows() {
        let mut v = SlotVec::new();
        assert_eq!(v.insert(3, "a"), None);
        assert_eq!(v.insert(70, "b"), None);
        assert_eq!(v.insert(u32::MAX, "c"), None);
        assert_eq!(v.insert(3, "d"), Some("a"));
        assert_eq!(v.len(), 3);
        assert_eq!(v.get(3), Some(&"d"));
        assert_eq!(v.get(70), Some(&"b"));
        assert_eq!(v.get(u32::MAX), Some(&"c"));
        assert_eq!(v.get(4), None);
        assert_eq!(v.get(1 << 20), None);
        assert_eq!(v.values().copied().collect::<Vec<_>>(), ["d", "b", "c"]);

        assert_eq!(v.remove(70), Some("b"));
        assert_eq!(v.remove(70), None);
        assert_eq!(v.remove(1 << 30), None);
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn slot_vec_copies_only_the_path() {
        let mut v = SlotVec::new();
        for i in 0..4096 {
            v.insert(i, i);
        }

        let old = v.clone();
        assert!(old.shares_root(&v));
        v.insert(5, 500);
        assert!(!old.shares_root(&v));
        assert_eq!(old.get(5), Some(&5));
        assert_eq!(v.get(5), Some(&500));

        // Slot 4000 lies under another top-level child, which is
        // still shared.
        let (VecNode::Inner(a), VecNode::Inner(b)) = (&*old.root, &*v.root)
        else {
            panic!("expected inner roots");
        };
        let far = slot(4000, BITS);
        assert!(Arc::ptr_eq(
            a[far].as_ref().unwrap(),
            b[far].as_ref().unwrap()
        ));
        assert!(!Arc::ptr_eq(a[0].as_ref().unwrap(), b[0].as_ref().unwrap()));
    }

    #[test]
    fn hash_trie_splits_and_shares() {
        let mut m: HashTrie<u64, u64, Ident> = HashTrie::new();
        // Twelve keys in slot 0 of the root, four more elsewhere.
        for k in 0..12 {
            m.insert(k << BITS, k);
        }
        for k in 1..5 {
            m.insert(k, k);
        }
        assert_eq!(m.len(), 16);
        assert!(matches!(&*m.root, MapNode::Inner(_)));

        let old = m.clone();
        m.insert(3, 300);
        assert_eq!(old.get(&3), Some(&3));
        assert_eq!(m.get(&3), Some(&300));
        assert!(m.shares_leaf(&old, &(5 << BITS)));
        assert!(!m.shares_leaf(&old, &3));

        assert_eq!(m.remove(&(5 << BITS)), Some(5));
        assert_eq!(m.remove(&(5 << BITS)), None);
        assert_eq!(m.get(&(5 << BITS)), None);
        assert_eq!(old.get(&(5 << BITS)), Some(&5));
        assert_eq!(m.len(), 15);
    }

    #[test]
    fn hash_trie_full_collisions() {
        let mut m: HashTrie<u64, u64, Ident> = HashTrie::new();
        // Equal low 32 bits: every key has the same hash.
        for k in 0..40u64 {
            m.insert((k << 32) | 7, k);
        }
        assert_eq!(m.len(), 40);
        for k in 0..40u64 {
            assert_eq!(m.get(&((k << 32) | 7)), Some(&k));
        }
        assert_eq!(m.remove(&((39 << 32) | 7)), Some(39));
        assert_eq!(m.iter().count(), 39);
    }

    proptest! {
        #[test]
        fn slot_vec_matches_btree(
            ops in prop::collection::vec(
                (any::<bool>(), 0u32..5000, any::<u8>()),
                0..300,
            ),
        ) {
            let mut v = SlotVec::new();
            let mut model = BTreeMap::new();
            for (insert, idx, val) in ops {
                if insert {
                    prop_assert_eq!(v.insert(idx, val), model.insert(idx, val));
                } else {
                    prop_assert_eq!(v.remove(idx), model.remove(&idx));
                }
            }
            prop_assert_eq!(v.len(), model.len());
            let vals: Vec<u8> = v.values().copied().collect();
            let expect: Vec<u8> = model.values().copied().collect();
            prop_assert_eq!(vals, expect);
        }

        #[test]
        fn hash_trie_matches_hashmap(
            ops in prop::collection::vec(
                (any::<bool>(), 0u16..2000, any::<u8>()),
                0..500,
            ),
        ) {
            let mut m: HashTrie<u16, u8, Crc> = HashTrie::new();
            let mut model = HashMap::new();
            for (insert, k, val) in ops {
                if insert {
                    prop_assert_eq!(m.insert(k, val), model.insert(k, val));
                } else {
                    prop_assert_eq!(m.remove(&k), model.remove(&k));
                }
            }
            prop_assert_eq!(m.len(), model.len());
            prop_assert_eq!(m.iter().count(), model.len());
            for (k, val) in &model {
                prop_assert_eq!(m.get(k), Some(val));
            }
        }
    }
}
