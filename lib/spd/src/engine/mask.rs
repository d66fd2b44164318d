// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Selector masks and the registry of masks in use.
//!
//! A mask records which bits of each 5-tuple field a group of
//! policies cares about. Policies whose selectors reduce to the same
//! mask share one probe at lookup time. A mask may cover more than a
//! policy's ranges, but never less: the classifier verifies the exact
//! ranges of every candidate, so over-approximation costs selectivity,
//! while under-approximation would lose matches.

use spd_api::MaskStrategyKind;
use spd_api::PolicyReq;
use spd_api::full_bits;
use std::collections::HashMap;
use std::fmt;

/// The mask of one policy shape. Every field is a bitmask of the
/// same width as the tuple field it applies to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FpMask {
    pub laddr: u128,
    pub raddr: u128,
    pub lport: u16,
    pub rport: u16,
    pub protocol: u16,
}

impl FpMask {
    /// Care about every bit.
    pub const ALL: Self = Self {
        laddr: u128::MAX,
        raddr: u128::MAX,
        lport: u16::MAX,
        rport: u16::MAX,
        protocol: u16::MAX,
    };
}

/// Turns a selector range into the bits a mask keeps for it.
pub trait MaskStrategy: fmt::Debug + Send + Sync {
    /// Derive the mask of the closed range `[start, stop]` of a field
    /// `width` bits wide. Every value in the range must agree with
    /// `start` on every bit of the returned mask.
    fn derive_mask(&self, start: u128, stop: u128, width: u32) -> u128;

    fn name(&self) -> &'static str;
}

/// Keep the bits above the highest bit in which `start` and `stop`
/// differ.
///
/// A power-of-two aligned block yields the exact prefix mask of that
/// block. Any other range yields the mask of the smallest aligned
/// block containing it.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommonPrefix;

impl MaskStrategy for CommonPrefix {
    fn derive_mask(&self, start: u128, stop: u128, width: u32) -> u128 {
        let full = full_bits(width);
        if start == stop {
            return full;
        }

        let high = u128::BITS - (start ^ stop).leading_zeros();
        full & !full_bits(high)
    }

    fn name(&self) -> &'static str {
        "common-prefix"
    }
}

/// Keep every bit of a single-value range and none of any other.
#[derive(Clone, Copy, Debug, Default)]
pub struct Exact;

impl MaskStrategy for Exact {
    fn derive_mask(&self, start: u128, stop: u128, width: u32) -> u128 {
        if start == stop { full_bits(width) } else { 0 }
    }

    fn name(&self) -> &'static str {
        "exact"
    }
}

pub fn strategy_for(kind: MaskStrategyKind) -> Box<dyn MaskStrategy> {
    match kind {
        MaskStrategyKind::CommonPrefix => Box::new(CommonPrefix),
        MaskStrategyKind::Exact => Box::new(Exact),
    }
}

/// Derive the mask of a policy's selectors.
///
/// The protocol is wildcarded for "any". Ports only take part for
/// protocols which carry them.
pub fn policy_mask(strategy: &dyn MaskStrategy, req: &PolicyReq) -> FpMask {
    let width = req.family().bits();
    let (lport, rport) = if req.protocol.has_ports() {
        let l = &req.local_ports;
        let r = &req.remote_ports;
        (
            strategy.derive_mask(l.start().into(), l.stop().into(), 16) as u16,
            strategy.derive_mask(r.start().into(), r.stop().into(), 16) as u16,
        )
    } else {
        (0, 0)
    };

    FpMask {
        laddr: strategy.derive_mask(
            req.local.start_bits(),
            req.local.stop_bits(),
            width,
        ),
        raddr: strategy.derive_mask(
            req.remote.start_bits(),
            req.remote.stop_bits(),
            width,
        ),
        lport,
        rport,
        protocol: if req.protocol.is_any() { 0 } else { u16::MAX },
    }
}

pub type MaskId = u32;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MaskEntry {
    pub mask: FpMask,
    pub refcnt: u32,
}

/// The reference counted set of masks in use by one direction and
/// address family.
#[derive(Clone, Debug, Default)]
pub struct MaskRegistry {
    entries: Vec<Option<MaskEntry>>,
    free: Vec<MaskId>,
    by_mask: HashMap<FpMask, MaskId>,
}

impl MaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reference on `mask`, creating its entry if this is the
    /// first. Return the mask's id and whether it was created.
    pub fn find_or_create(&mut self, mask: FpMask) -> (MaskId, bool) {
        if let Some(&id) = self.by_mask.get(&mask) {
            if let Some(Some(entry)) = self.entries.get_mut(id as usize) {
                entry.refcnt += 1;
                return (id, false);
            }
        }

        let entry = MaskEntry { mask, refcnt: 1 };
        let id = match self.free.pop() {
            Some(id) => {
                self.entries[id as usize] = Some(entry);
                id
            }

            None => {
                self.entries.push(Some(entry));
                (self.entries.len() - 1) as MaskId
            }
        };
        self.by_mask.insert(mask, id);
        (id, true)
    }

    /// Drop a reference on mask `id`. Return `Some(true)` if that was
    /// the last reference and the mask is retired, or `None` if no
    /// such mask exists.
    pub fn release(&mut self, id: MaskId) -> Option<bool> {
        let slot = self.entries.get_mut(id as usize)?;
        let entry = slot.as_mut()?;
        entry.refcnt -= 1;
        if entry.refcnt > 0 {
            return Some(false);
        }

        self.by_mask.remove(&entry.mask);
        *slot = None;
        self.free.push(id);
        Some(true)
    }

    pub fn get(&self, id: MaskId) -> Option<&MaskEntry> {
        self.entries.get(id as usize)?.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MaskId, &MaskEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(id, e)| e.as_ref().map(|e| (id as MaskId, e)))
    }

    pub fn len(&self) -> usize {
        self.by_mask.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn req(s: &str) -> PolicyReq {
        s.parse().unwrap()
    }

    #[test]
    fn common_prefix_masks() {
        let cp = CommonPrefix;
        assert_eq!(cp.derive_mask(5, 5, 32), 0xFFFF_FFFF);
        // 10.0.0.0/24
        assert_eq!(cp.derive_mask(0x0A00_0000, 0x0A00_00FF, 32), 0xFFFF_FF00);
        // 10.0.0.3 - 10.0.0.9 differs in bit 3, keep bits 4 and up.
        assert_eq!(cp.derive_mask(0x0A00_0003, 0x0A00_0009, 32), 0xFFFF_FFF0);
        assert_eq!(cp.derive_mask(0, u128::MAX, 128), 0);
        assert_eq!(cp.derive_mask(0, 0xFFFF, 16), 0);
        assert_eq!(cp.derive_mask(1024, 2047, 16), 0xFC00);
    }

    #[test]
    fn exact_masks() {
        let ex = Exact;
        assert_eq!(ex.derive_mask(80, 80, 16), 0xFFFF);
        assert_eq!(ex.derive_mask(1024, 2047, 16), 0);
        assert_eq!(ex.derive_mask(7, 7, 128), u128::MAX);
    }

    #[test]
    fn ports_only_for_port_protocols() {
        let m = policy_mask(
            &CommonPrefix,
            &req("dir=out action=bypass priority=1 proto=icmp \
                  local=10.0.0.1 remote=any4 lport=80 rport=80"),
        );
        assert_eq!(m.lport, 0);
        assert_eq!(m.rport, 0);
        assert_eq!(m.protocol, u16::MAX);
        assert_eq!(m.laddr, 0xFFFF_FFFF);
        assert_eq!(m.raddr, 0);

        let m = policy_mask(
            &CommonPrefix,
            &req("dir=out action=bypass priority=1 proto=udp \
                  local=any4 remote=any4 lport=53"),
        );
        assert_eq!(m.lport, u16::MAX);
        assert_eq!(m.rport, 0);

        let m = policy_mask(
            &CommonPrefix,
            &req("dir=out action=bypass priority=1 \
                  local=any4 remote=any4 lport=53"),
        );
        assert_eq!(m.protocol, 0);
        assert_eq!(m.lport, 0);
    }

    #[test]
    fn registry_refcounts() {
        let mut reg = MaskRegistry::new();
        let a = FpMask::ALL;
        let b = FpMask { laddr: 0xFFFF_FF00, ..FpMask::ALL };

        assert_eq!(reg.find_or_create(a), (0, true));
        assert_eq!(reg.find_or_create(a), (0, false));
        assert_eq!(reg.find_or_create(b), (1, true));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get(0).unwrap().refcnt, 2);

        assert_eq!(reg.release(0), Some(false));
        assert_eq!(reg.release(0), Some(true));
        assert_eq!(reg.release(0), None);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.iter().count(), 1);

        // A retired id is reused by the next new mask.
        let c = FpMask { lport: 0, ..FpMask::ALL };
        assert_eq!(reg.find_or_create(c), (0, true));
        assert_eq!(reg.find_or_create(b), (1, false));
    }

    fn range(width: u32) -> impl Strategy<Value = (u128, u128)> {
        let max = full_bits(width);
        (0..=max, 0..=max)
            .prop_map(|(a, b)| if a <= b { (a, b) } else { (b, a) })
    }

    fn sound(strategy: &dyn MaskStrategy, width: u32, lo: u128, hi: u128) {
        let m = strategy.derive_mask(lo, hi, width);
        assert_eq!(m & !full_bits(width), 0);
        let mid = lo + (hi - lo) / 2;
        for x in [lo, hi, mid, lo.saturating_add(1).min(hi)] {
            assert_eq!(x & m, lo & m, "{x:#x} in [{lo:#x}, {hi:#x}]");
        }
    }

    proptest! {
        #[test]
        fn common_prefix_sound_16(
            (lo, hi) in range(16),
            off in 0u128..=0xFFFF,
        ) {
            let m = CommonPrefix.derive_mask(lo, hi, 16);
            let x = lo + off % (hi - lo + 1);
            prop_assert_eq!(x & m, lo & m);
        }

        #[test]
        fn common_prefix_sound_32((lo, hi) in range(32)) {
            sound(&CommonPrefix, 32, lo, hi);
        }

        #[test]
        fn common_prefix_sound_128((lo, hi) in range(128)) {
            sound(&CommonPrefix, 128, lo, hi);
        }

        #[test]
        fn exact_sound_32((lo, hi) in range(32)) {
            sound(&Exact, 32, lo, hi);
        }

        #[test]
        fn aligned_blocks_are_exact(
            base in 0u128..=0xFFFF_FFFF,
            bits in 0u32..=32,
        ) {
            let block = full_bits(bits);
            let lo = base & !block & full_bits(32);
            let hi = lo | block;
            let m = CommonPrefix.derive_mask(lo, hi, 32);
            prop_assert_eq!(m, full_bits(32) & !block);
            // One past either end lands outside the mask's block.
            if hi < full_bits(32) {
                prop_assert_ne!((hi + 1) & m, lo & m);
            }
            if lo > 0 {
                prop_assert_ne!((lo - 1) & m, lo & m);
            }
        }
    }
}
