// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! SPD-wide statistics.

use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use spd_api::DirStatsSnap;
use spd_api::Direction;
use spd_api::SpdStatsSnap;

#[derive(Debug, Default)]
pub struct DirStats {
    /// The number of packets that matched a policy.
    pub rule_match: AtomicU64,

    /// The number of packets that matched no policy, resulting in the
    /// default action being applied.
    pub rule_nomatch: AtomicU64,

    /// The number of candidates found through the index whose exact
    /// ranges did not contain the packet.
    pub candidates_rejected: AtomicU64,
}

impl DirStats {
    fn snapshot(&self) -> DirStatsSnap {
        DirStatsSnap {
            rule_match: self.rule_match.load(Ordering::Relaxed),
            rule_nomatch: self.rule_nomatch.load(Ordering::Relaxed),
            candidates_rejected: self
                .candidates_rejected
                .load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
pub struct SpdStats {
    pub inbound: DirStats,
    pub outbound: DirStats,

    /// The number of policy add requests.
    pub add_called: AtomicU64,

    /// The number of policy add requests that were rejected.
    pub add_failed: AtomicU64,

    /// The number of policy delete requests.
    pub del_called: AtomicU64,

    pub masks_created: AtomicU64,
    pub masks_retired: AtomicU64,
}

impl SpdStats {
    pub fn dir(&self, dir: Direction) -> &DirStats {
        match dir {
            Direction::In => &self.inbound,
            Direction::Out => &self.outbound,
        }
    }

    pub fn incr(ctr: &AtomicU64, n: u64) {
        ctr.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SpdStatsSnap {
        SpdStatsSnap {
            inbound: self.inbound.snapshot(),
            outbound: self.outbound.snapshot(),
            add_called: self.add_called.load(Ordering::Relaxed),
            add_failed: self.add_failed.load(Ordering::Relaxed),
            del_called: self.del_called.load(Ordering::Relaxed),
            masks_created: self.masks_created.load(Ordering::Relaxed),
            masks_retired: self.masks_retired.load(Ordering::Relaxed),
        }
    }
}
