// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Tuple space search over one direction's index.
//!
//! 1. Probe the table of the packet's family once per mask in use,
//!    with the packet tuple masked by that mask.
//! 2. Verify the exact selector ranges of every candidate found.
//! 3. Keep the verified candidate with the highest priority, ties
//!    going to the lowest index.
//!
//! A candidate id missing from the policy store means the index and
//! the store have diverged; that is reported, never skipped.

use super::Result;
use super::index::Candidates;
use super::index::DirIndex;
use super::index::FamilyIndex;
use super::key::FpKey;
use super::key::FpTuple;
use super::policy::Policy;
use super::store::PolicyStore;
use heapless::Vec as FVec;
use spd_api::AddrPair;
use spd_api::FiveTuple;
use spd_api::SpdError;
use std::sync::Arc;

/// The number of distinct buckets a search remembers without
/// re-probing.
const SEEN_MAX: usize = 16;

/// The result of searching one direction.
#[derive(Debug)]
pub struct Outcome<'a> {
    /// The winning policy, if any candidate verified.
    pub winner: Option<&'a Arc<Policy>>,

    /// The number of candidates that failed exact verification.
    pub rejected: u64,
}

pub fn classify<'a>(
    store: &'a PolicyStore,
    index: &DirIndex,
    pkt: &FiveTuple,
) -> Result<Outcome<'a>> {
    let fp = FpTuple::from_packet(pkt);
    match pkt.addrs {
        AddrPair::V4 { .. } => search(store, &index.v4, &fp, pkt),
        AddrPair::V6 { .. } => search(store, &index.v6, &fp, pkt),
    }
}

fn search<'a, K: FpKey>(
    store: &'a PolicyStore,
    fi: &FamilyIndex<K>,
    fp: &FpTuple,
    pkt: &FiveTuple,
) -> Result<Outcome<'a>> {
    let mut winner: Option<&'a Arc<Policy>> = None;
    let mut rejected = 0;

    // Two masks may reduce a packet to the same key; visit each bucket
    // once. Past SEEN_MAX buckets, earlier ones are found by probing
    // again.
    let mut seen: FVec<&Candidates, SEEN_MAX> = FVec::new();

    for (n, bucket) in fi.probe(fp).enumerate() {
        let dup = if seen.is_full() {
            fi.probe(fp).take(n).any(|b| Arc::ptr_eq(b, bucket))
        } else {
            seen.iter().any(|b| Arc::ptr_eq(b, bucket))
        };
        if dup {
            continue;
        }
        let _ = seen.push(bucket);

        for &id in bucket.iter() {
            let Some(policy) = store.get(id) else {
                return Err(SpdError::CorruptIndex { policy: id });
            };

            if !policy.is_match(pkt) {
                rejected += 1;
                continue;
            }

            if winner.is_none_or(|w| policy.outranks(w)) {
                winner = Some(policy);
            }
        }
    }

    Ok(Outcome { winner, rejected })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::mask::CommonPrefix;
    use crate::engine::mask::policy_mask;
    use crate::engine::policy::selector_tuple;
    use spd_api::PolicyReq;
    use spd_api::Protocol;

    fn install(
        store: &mut PolicyStore,
        index: &mut DirIndex,
        s: &str,
    ) -> Arc<Policy> {
        let req: PolicyReq = s.parse().unwrap();
        let ty = req.validate().unwrap();
        let id = store.next_index().unwrap();
        let mask = policy_mask(&CommonPrefix, &req);
        let att = index.attach(id, &selector_tuple(&req), mask).unwrap();
        let policy = Arc::new(Policy::new(id, ty, req, None, att.mask));
        store.put(Arc::clone(&policy));
        policy
    }

    fn pkt(local: &str, lport: u16) -> FiveTuple {
        FiveTuple::new(
            local.parse().unwrap(),
            "192.168.7.7".parse().unwrap(),
            Protocol::TCP,
            lport,
            443,
        )
        .unwrap()
    }

    #[test]
    fn over_approximation_is_filtered() {
        let mut store = PolicyStore::new(16);
        let mut index = DirIndex::new();
        // 10.0.0.3-10.0.0.9 masks to 10.0.0.0/28.
        install(
            &mut store,
            &mut index,
            "dir=out action=discard priority=1 local=10.0.0.3-10.0.0.9 \
             remote=any4",
        );

        let out = classify(&store, &index, &pkt("10.0.0.5", 1)).unwrap();
        assert_eq!(out.winner.unwrap().index(), 0);
        assert_eq!(out.rejected, 0);

        let out = classify(&store, &index, &pkt("10.0.0.12", 1)).unwrap();
        assert!(out.winner.is_none());
        assert_eq!(out.rejected, 1);

        let out = classify(&store, &index, &pkt("10.0.0.16", 1)).unwrap();
        assert!(out.winner.is_none());
        assert_eq!(out.rejected, 0);
    }

    #[test]
    fn priority_then_index() {
        let mut store = PolicyStore::new(16);
        let mut index = DirIndex::new();
        let any = "remote=any4";
        install(
            &mut store,
            &mut index,
            &format!("dir=out action=discard priority=5 local=10.0.0.0/8 {any}"),
        );
        install(
            &mut store,
            &mut index,
            &format!("dir=out action=bypass priority=5 local=10.0.0.0/16 {any}"),
        );
        install(
            &mut store,
            &mut index,
            &format!("dir=out action=bypass priority=1 local=10.0.0.1 {any}"),
        );

        let out = classify(&store, &index, &pkt("10.0.0.1", 1)).unwrap();
        assert_eq!(out.winner.unwrap().index(), 0);
    }

    #[test]
    fn shared_bucket_visited_once() {
        let mut store = PolicyStore::new(64);
        let mut index = DirIndex::new();
        // Nested prefixes of 10.0.0.0 with one port range: every mask
        // reduces the packets below to the same key, so all probes
        // land in one bucket.
        for len in 8..=32 {
            install(
                &mut store,
                &mut index,
                &format!(
                    "dir=out action=discard priority={len} proto=tcp \
                     local=10.0.0.0/{len} remote=any4 lport=2-4"
                ),
            );
        }
        assert_eq!(index.masks(spd_api::AddrFamily::V4).len(), 25);
        assert_eq!(index.v4.table.len(), 1);

        // Port 5 shares the masked key but fails every candidate, each
        // exactly once.
        let out = classify(&store, &index, &pkt("10.0.0.0", 5)).unwrap();
        assert!(out.winner.is_none());
        assert_eq!(out.rejected, 25);

        let out = classify(&store, &index, &pkt("10.0.0.0", 2)).unwrap();
        assert_eq!(out.winner.unwrap().priority(), 32);
        assert_eq!(out.rejected, 0);
    }

    #[test]
    fn dangling_candidate_is_corruption() {
        let mut store = PolicyStore::new(16);
        let mut index = DirIndex::new();
        let p = install(
            &mut store,
            &mut index,
            "dir=out action=bypass priority=1 local=any4 remote=any4",
        );

        // Free the store slot without detaching from the index.
        store.remove(p.index()).unwrap();
        let res = classify(&store, &index, &pkt("10.1.1.1", 1));
        assert_eq!(
            res.unwrap_err(),
            SpdError::CorruptIndex { policy: p.index() }
        );
    }
}
