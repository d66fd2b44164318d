// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! An SPD instance: policy lifecycle, classification and introspection.
//!
//! The searchable state of an SPD is an immutable [`SpdState`]
//! generation. Lookups load the current generation without locking
//! and resolve every candidate id inside it. Adds and deletes take the
//! writer lock, apply their changes to a copy of the current
//! generation, and publish the copy with one atomic store. A failed
//! request publishes nothing.
//!
//! The store, the counters and the index tables are persistent tries,
//! so the copy shares everything a request leaves alone. Only the
//! touched direction's mask registries are copied in full.

use super::Result;
use super::classify;
use super::counter::CombinedCounter;
use super::counter::CounterTable;
use super::index::DirIndex;
use super::mask::MaskId;
use super::mask::MaskStrategy;
use super::mask::policy_mask;
use super::mask::strategy_for;
use super::policy::Policy;
use super::policy::normalize;
use super::policy::selector_tuple;
use super::sa::SaResolver;
use super::stat::SpdStats;
use super::store::PolicyStore;
use arc_swap::ArcSwap;
use core::cmp::Reverse;
use itertools::Itertools;
use slog::Logger;
use slog::crit;
use slog::debug;
use slog::info;
use slog::o;
use spd_api::AddrFamily;
use spd_api::CombinedCount;
use spd_api::Direction;
use spd_api::DumpSpdResp;
use spd_api::FiveTuple;
use spd_api::MaskDump;
use spd_api::PolicyIndex;
use spd_api::PolicyReq;
use spd_api::SaIndex;
use spd_api::SpdConfig;
use spd_api::SpdError;
use spd_api::SpdStatsSnap;
use spd_api::TableDump;
use spd_api::Verdict;
use spd_api::bits_ip;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;

/// One generation of an SPD's searchable state.
#[derive(Clone, Debug)]
struct SpdState {
    store: PolicyStore,
    counters: CounterTable,
    dirs: [Arc<DirIndex>; 2],
}

impl SpdState {
    fn new(limit: u32) -> Self {
        Self {
            store: PolicyStore::new(limit),
            counters: CounterTable::new(),
            dirs: [Arc::new(DirIndex::new()), Arc::new(DirIndex::new())],
        }
    }

    fn dir(&self, dir: Direction) -> &DirIndex {
        &self.dirs[dir.idx()]
    }

    fn dir_mut(&mut self, dir: Direction) -> &mut DirIndex {
        Arc::make_mut(&mut self.dirs[dir.idx()])
    }

    /// Check that the store, the counters, the masks and the index
    /// agree with each other.
    fn verify(&self) -> Result<()> {
        let mut users: HashMap<(Direction, AddrFamily, MaskId), u32> =
            HashMap::new();
        let mut per_table: HashMap<(Direction, AddrFamily), usize> =
            HashMap::new();

        for p in self.store.iter() {
            let (dir, family) = (p.direction(), p.family());
            let reachable = self.dir(dir).holds(
                family,
                p.index(),
                &p.fp_tuple(),
                p.mask_id(),
            );
            if !reachable || self.counters.get(p.index()).is_none() {
                return Err(SpdError::CorruptIndex { policy: p.index() });
            }

            *users.entry((dir, family, p.mask_id())).or_default() += 1;
            *per_table.entry((dir, family)).or_default() += 1;
        }

        for dir in Direction::ALL {
            for family in AddrFamily::ALL {
                let di = self.dir(dir);

                let ids = di.ids(family);
                for &id in &ids {
                    let owned = self.store.get(id).is_some_and(|p| {
                        p.direction() == dir && p.family() == family
                    });
                    if !owned {
                        return Err(SpdError::CorruptIndex { policy: id });
                    }
                }

                // Every stored policy was found above, so equal counts
                // mean no policy is listed twice.
                let expected = per_table.get(&(dir, family)).copied();
                if ids.len() != expected.unwrap_or(0) {
                    let dup = ids.iter().duplicates().next().copied();
                    return Err(SpdError::CorruptIndex {
                        policy: dup.unwrap_or_default(),
                    });
                }

                for (mask, entry) in di.masks(family).iter() {
                    let n = users.get(&(dir, family, mask)).copied();
                    if n != Some(entry.refcnt) {
                        return Err(SpdError::CorruptMask {
                            mask,
                            refcnt: entry.refcnt,
                            users: n.unwrap_or(0),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

/// A change made by a committed request, logged and counted once the
/// new generation is published.
enum Event {
    Installed(Arc<Policy>),
    Removed(Arc<Policy>),
    MaskCreated { dir: Direction, family: AddrFamily, mask: MaskId },
    MaskRetired { dir: Direction, family: AddrFamily, mask: MaskId },
}

/// A request in progress against the next generation.
struct Txn<'a> {
    spd: &'a Spd,
    next: SpdState,
    events: Vec<Event>,
}

impl Txn<'_> {
    /// Install one policy.
    ///
    /// Validate and resolve the SA, pick a store index, take a
    /// reference on the policy's mask and insert its key, then
    /// allocate its counter and store it.
    fn add(&mut self, req: &PolicyReq) -> Result<PolicyIndex> {
        let ty = req.validate()?;
        let req = normalize(req);
        let sa_index = self.spd.resolve_sa(&req)?;

        if let Some(index) = self.next.store.find(&req) {
            return Err(SpdError::PolicyExists { index });
        }

        let index = self.next.store.next_index()?;
        let dir = ty.direction();
        let family = ty.family();
        let mask = policy_mask(self.spd.strategy.as_ref(), &req);
        let att =
            self.next.dir_mut(dir).attach(index, &selector_tuple(&req), mask)?;
        if att.created {
            let mask = att.mask;
            self.events.push(Event::MaskCreated { dir, family, mask });
        }

        let policy = Arc::new(Policy::new(index, ty, req, sa_index, att.mask));
        self.next.counters.alloc(index);
        self.next.store.put(Arc::clone(&policy));
        self.events.push(Event::Installed(policy));
        Ok(index)
    }

    /// Remove one policy, in the reverse order of [`Txn::add`]: the
    /// index entry, the mask reference, the counter, and last the
    /// store slot.
    fn delete(&mut self, index: PolicyIndex) -> Result<()> {
        let Some(policy) = self.next.store.get(index).cloned() else {
            return Err(SpdError::NotFound { index });
        };

        let dir = policy.direction();
        let retired = self.next.dir_mut(dir).detach(
            index,
            &policy.fp_tuple(),
            policy.mask_id(),
        )?;
        if retired {
            self.events.push(Event::MaskRetired {
                dir,
                family: policy.family(),
                mask: policy.mask_id(),
            });
        }

        self.next.counters.free(index);
        self.next.store.remove(index)?;
        self.events.push(Event::Removed(policy));
        Ok(())
    }
}

/// A security policy database.
pub struct Spd {
    id: u32,
    cfg: SpdConfig,
    log: Logger,
    strategy: Box<dyn MaskStrategy>,
    sas: Arc<dyn SaResolver>,
    state: ArcSwap<SpdState>,
    writer: Mutex<()>,
    fault: OnceLock<SpdError>,
    stats: SpdStats,
    default_hits: [CombinedCounter; 2],
}

impl Spd {
    /// Create an empty SPD using the mask strategy named by `cfg`.
    pub fn new(cfg: SpdConfig, sas: Arc<dyn SaResolver>, log: &Logger) -> Self {
        let strategy = strategy_for(cfg.mask_strategy);
        Self::with_strategy(cfg, sas, strategy, log)
    }

    pub fn with_strategy(
        cfg: SpdConfig,
        sas: Arc<dyn SaResolver>,
        strategy: Box<dyn MaskStrategy>,
        log: &Logger,
    ) -> Self {
        let log = log.new(o!("spd" => cfg.id));
        debug!(
            log, "created";
            "strategy" => strategy.name(),
            "max_policies" => cfg.max_policies
        );

        Self {
            id: cfg.id,
            state: ArcSwap::from_pointee(SpdState::new(cfg.max_policies)),
            cfg,
            log,
            strategy,
            sas,
            writer: Mutex::new(()),
            fault: OnceLock::new(),
            stats: SpdStats::default(),
            default_hits: Default::default(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn config(&self) -> &SpdConfig {
        &self.cfg
    }

    /// Install a policy and return its index.
    pub fn add_policy(&self, req: &PolicyReq) -> Result<PolicyIndex> {
        SpdStats::incr(&self.stats.add_called, 1);
        self.mutate("add", |txn| txn.add(req)).inspect_err(|_| {
            SpdStats::incr(&self.stats.add_failed, 1);
        })
    }

    /// Install every policy of `reqs`, or none of them. A failure
    /// carries the position in `reqs` of the request that failed.
    pub fn add_policies(
        &self,
        reqs: &[PolicyReq],
    ) -> core::result::Result<Vec<PolicyIndex>, (usize, SpdError)> {
        let n = reqs.len() as u64;
        SpdStats::incr(&self.stats.add_called, n);

        let mut at = 0;
        let res: Result<Vec<PolicyIndex>> = self.mutate("add", |txn| {
            reqs.iter()
                .enumerate()
                .map(|(i, req)| {
                    at = i;
                    txn.add(req)
                })
                .collect()
        });

        res.map_err(|e| {
            SpdStats::incr(&self.stats.add_failed, n);
            (at, e)
        })
    }

    pub fn delete_policy(&self, index: PolicyIndex) -> Result<()> {
        SpdStats::incr(&self.stats.del_called, 1);
        self.mutate("delete", |txn| txn.delete(index))
    }

    /// Delete the installed policy identical to `req` and return the
    /// index it had.
    pub fn delete_matching(&self, req: &PolicyReq) -> Result<PolicyIndex> {
        SpdStats::incr(&self.stats.del_called, 1);
        self.mutate("delete", |txn| {
            req.validate()?;
            let Some(index) = txn.next.store.find(&normalize(req)) else {
                return Err(SpdError::NoMatchingPolicy {
                    policy: req.to_string(),
                });
            };
            txn.delete(index)?;
            Ok(index)
        })
    }

    /// Classify a packet travelling in `dir`, counting `len` bytes
    /// against the policy it matches.
    ///
    /// A packet matching no policy gets the direction's default action.
    /// `Err` is only returned for a broken internal invariant, which
    /// also disables the SPD.
    pub fn classify(
        &self,
        dir: Direction,
        pkt: &FiveTuple,
        len: u64,
    ) -> Result<Verdict> {
        if self.fault.get().is_some() {
            return Err(SpdError::Poisoned { spd: self.id });
        }

        let state = self.state.load();
        let stats = self.stats.dir(dir);
        let outcome =
            match classify::classify(&state.store, state.dir(dir), pkt) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.poison(&e);
                    return Err(e);
                }
            };

        if outcome.rejected > 0 {
            SpdStats::incr(&stats.candidates_rejected, outcome.rejected);
        }

        let Some(policy) = outcome.winner else {
            SpdStats::incr(&stats.rule_nomatch, 1);
            self.default_hits[dir.idx()].hit(len);
            return Ok(Verdict::default_action(self.cfg.default_for(dir)));
        };

        let Some(ctr) = state.counters.get(policy.index()) else {
            let e = SpdError::CorruptIndex { policy: policy.index() };
            self.poison(&e);
            return Err(e);
        };

        ctr.hit(len);
        SpdStats::incr(&stats.rule_match, 1);
        let action = policy.action();
        Ok(Verdict {
            action,
            policy: Some(policy.index()),
            sa_index: if action.uses_sa() { policy.sa_index() } else { None },
        })
    }

    pub fn get_policy(&self, index: PolicyIndex) -> Option<Arc<Policy>> {
        self.state.load().store.get(index).cloned()
    }

    /// The policies of one direction, in the order they are preferred.
    pub fn policies(&self, dir: Direction) -> Vec<Arc<Policy>> {
        self.state
            .load()
            .store
            .iter()
            .filter(|p| p.direction() == dir)
            .sorted_by_key(|p| (Reverse(p.priority()), p.index()))
            .cloned()
            .collect()
    }

    pub fn counters(&self, index: PolicyIndex) -> Option<CombinedCount> {
        self.state.load().counters.read(index)
    }

    /// The packets of `dir` that matched no policy.
    pub fn default_hits(&self, dir: Direction) -> CombinedCount {
        self.default_hits[dir.idx()].read()
    }

    pub fn clear_counters(&self) {
        self.state.load().counters.clear_all();
        for ctr in &self.default_hits {
            ctr.clear();
        }
    }

    pub fn num_policies(&self) -> usize {
        self.state.load().store.len()
    }

    pub fn num_masks(&self, dir: Direction, family: AddrFamily) -> usize {
        self.state.load().dir(dir).masks(family).len()
    }

    pub fn stats(&self) -> SpdStatsSnap {
        self.stats.snapshot()
    }

    pub fn is_poisoned(&self) -> bool {
        self.fault.get().is_some()
    }

    /// Check the consistency of the current generation.
    pub fn verify(&self) -> Result<()> {
        self.state.load().verify()
    }

    pub fn dump(&self) -> DumpSpdResp {
        let state = self.state.load();

        let policies = state
            .store
            .iter()
            .map(|p| p.dump(state.counters.read(p.index()).unwrap_or_default()))
            .collect();

        let mut masks = Vec::new();
        let mut tables = Vec::new();
        for dir in Direction::ALL {
            let di = state.dir(dir);
            for family in AddrFamily::ALL {
                for (id, entry) in di.masks(family).iter() {
                    masks.push(MaskDump {
                        id,
                        direction: dir,
                        family,
                        refcnt: entry.refcnt,
                        local: bits_ip(family, entry.mask.laddr),
                        remote: bits_ip(family, entry.mask.raddr),
                        local_port: entry.mask.lport,
                        remote_port: entry.mask.rport,
                        protocol: entry.mask.protocol,
                    });
                }

                let (keys, entries) = di.occupancy(family);
                tables.push(TableDump {
                    direction: dir,
                    family,
                    keys,
                    entries,
                });
            }
        }

        DumpSpdResp {
            spd: self.id,
            policies,
            masks,
            tables,
            default_in: self.default_hits(Direction::In),
            default_out: self.default_hits(Direction::Out),
        }
    }

    fn resolve_sa(&self, req: &PolicyReq) -> Result<Option<SaIndex>> {
        if !req.action.uses_sa() {
            return Ok(None);
        }

        match req.sa_id {
            Some(sa_id) => self
                .sas
                .resolve(sa_id)
                .map(Some)
                .ok_or(SpdError::UnresolvedSa { sa_id }),
            None => Ok(None),
        }
    }

    /// Run `op` against a copy of the current generation under the
    /// writer lock, publishing the copy if `op` succeeds.
    fn mutate<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut Txn) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(fault) = self.fault.get() {
            return Err(fault.clone());
        }

        let mut txn = Txn {
            spd: self,
            next: SpdState::clone(&self.state.load()),
            events: Vec::new(),
        };

        match f(&mut txn) {
            Ok(val) => {
                self.state.store(Arc::new(txn.next));
                self.commit(txn.events);
                Ok(val)
            }

            Err(e) if e.is_fatal() => {
                self.poison(&e);
                Err(e)
            }

            Err(e) => {
                info!(self.log, "request rejected"; "op" => op, "err" => %e);
                Err(e)
            }
        }
    }

    fn commit(&self, events: Vec<Event>) {
        for ev in events {
            match ev {
                Event::Installed(p) => {
                    debug!(
                        self.log, "policy installed";
                        "index" => p.index(),
                        "type" => %p.ty(),
                        "policy" => %p.req()
                    );
                }

                Event::Removed(p) => {
                    debug!(
                        self.log, "policy removed";
                        "index" => p.index(),
                        "type" => %p.ty()
                    );
                }

                Event::MaskCreated { dir, family, mask } => {
                    SpdStats::incr(&self.stats.masks_created, 1);
                    debug!(
                        self.log, "mask created";
                        "dir" => %dir,
                        "family" => %family,
                        "mask" => mask
                    );
                }

                Event::MaskRetired { dir, family, mask } => {
                    SpdStats::incr(&self.stats.masks_retired, 1);
                    debug!(
                        self.log, "mask retired";
                        "dir" => %dir,
                        "family" => %family,
                        "mask" => mask
                    );
                }
            }
        }
    }

    fn poison(&self, err: &SpdError) {
        crit!(self.log, "internal fault, SPD disabled"; "err" => %err);
        let _ = self.fault.set(err.clone());
    }

    /// Publish a generation whose store has lost `index` while the
    /// index still lists it.
    #[cfg(test)]
    fn free_slot_only(&self, index: PolicyIndex) {
        let mut next = SpdState::clone(&self.state.load());
        next.store.remove(index).unwrap();
        next.counters.free(index);
        self.state.store(Arc::new(next));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::sa::SaTable;
    use spd_api::PolicyAction;
    use spd_api::Protocol;

    fn spd() -> Spd {
        let sas: SaTable = [(1, 100), (2, 200)].into_iter().collect();
        let log = Logger::root(slog::Discard, o!());
        Spd::new(SpdConfig::default(), Arc::new(sas), &log)
    }

    fn req(s: &str) -> PolicyReq {
        s.parse().unwrap()
    }

    fn pkt(local: &str) -> FiveTuple {
        FiveTuple::new(
            local.parse().unwrap(),
            "192.0.2.1".parse().unwrap(),
            Protocol::UDP,
            500,
            500,
        )
        .unwrap()
    }

    #[test]
    fn sa_resolution() {
        let spd = spd();
        let base = "dir=out priority=1 local=10.0.0.0/24 remote=any4";

        assert_eq!(
            spd.add_policy(&req(&format!("action=protect sa=9 {base}"))),
            Err(SpdError::UnresolvedSa { sa_id: 9 })
        );
        assert_eq!(spd.num_policies(), 0);

        let idx = spd
            .add_policy(&req(&format!("action=resolve {base}")))
            .unwrap();
        assert_eq!(spd.get_policy(idx).unwrap().sa_index(), None);

        // Bypass ignores its SA entirely, even an unknown one.
        let idx = spd
            .add_policy(&req(&format!("action=bypass sa=9 {base}")))
            .unwrap();
        assert_eq!(spd.get_policy(idx).unwrap().sa_id(), None);

        let idx = spd
            .add_policy(&req(&format!("action=protect sa=2 {base}")))
            .unwrap();
        assert_eq!(spd.get_policy(idx).unwrap().sa_index(), Some(200));
    }

    #[test]
    fn duplicates_rejected() {
        let spd = spd();
        let r = req("dir=in action=bypass priority=3 local=any4 remote=any4");
        let idx = spd.add_policy(&r).unwrap();
        assert_eq!(
            spd.add_policy(&r),
            Err(SpdError::PolicyExists { index: idx })
        );
        assert_eq!(spd.num_policies(), 1);
        assert_eq!(spd.num_masks(Direction::In, AddrFamily::V4), 1);

        let stats = spd.stats();
        assert_eq!(stats.add_called, 2);
        assert_eq!(stats.add_failed, 1);
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let spd = spd();
        let any = "priority=1 local=any4 remote=any4";
        let good = req(&format!("dir=out action=bypass {any}"));
        let bad = req(&format!("dir=in action=resolve {any}"));

        let res = spd.add_policies(&[good.clone(), bad]);
        assert!(matches!(res, Err((1, SpdError::Validation(_)))));
        assert_eq!(spd.num_policies(), 0);
        assert_eq!(spd.num_masks(Direction::Out, AddrFamily::V4), 0);
        assert_eq!(spd.stats().masks_created, 0);

        let idxs = spd.add_policies(&[good]).unwrap();
        assert_eq!(idxs, vec![0]);
        assert_eq!(spd.stats().masks_created, 1);
    }

    #[test]
    fn delete_matching() {
        let spd = spd();
        let r = req(
            "dir=out action=protect priority=1 local=10.0.0.1 remote=any4 sa=1",
        );
        let idx = spd.add_policy(&r).unwrap();
        assert_eq!(spd.delete_matching(&r), Ok(idx));
        assert_eq!(spd.num_policies(), 0);
        assert!(matches!(
            spd.delete_matching(&r),
            Err(SpdError::NoMatchingPolicy { .. })
        ));
        assert_eq!(
            spd.delete_policy(idx),
            Err(SpdError::NotFound { index: idx })
        );
        spd.verify().unwrap();
    }

    #[test]
    fn limit_enforced() {
        let sas = Arc::new(SaTable::new());
        let log = Logger::root(slog::Discard, o!());
        let cfg = SpdConfig { max_policies: 1, ..Default::default() };
        let spd = Spd::new(cfg, sas, &log);

        spd.add_policy(&req(
            "dir=out action=bypass priority=1 local=any4 remote=any4",
        ))
        .unwrap();
        assert_eq!(
            spd.add_policy(&req(
                "dir=out action=bypass priority=2 local=any4 remote=any4"
            )),
            Err(SpdError::MaxCapacity(1))
        );
    }

    #[test]
    fn corruption_poisons() {
        let spd = spd();
        let idx = spd
            .add_policy(&req(
                "dir=out action=bypass priority=1 local=10.0.0.0/8 remote=any4",
            ))
            .unwrap();

        spd.free_slot_only(idx);
        assert_eq!(spd.verify(), Err(SpdError::CorruptIndex { policy: idx }));

        // A packet missing every mask still classifies normally.
        let v = spd.classify(Direction::Out, &pkt("11.0.0.1"), 64).unwrap();
        assert_eq!(v.action, PolicyAction::Discard);

        assert_eq!(
            spd.classify(Direction::Out, &pkt("10.0.0.1"), 64),
            Err(SpdError::CorruptIndex { policy: idx })
        );
        assert!(spd.is_poisoned());
        assert_eq!(
            spd.classify(Direction::Out, &pkt("11.0.0.1"), 64),
            Err(SpdError::Poisoned { spd: 0 })
        );
        assert_eq!(
            spd.add_policy(&req(
                "dir=in action=bypass priority=1 local=any4 remote=any4"
            )),
            Err(SpdError::CorruptIndex { policy: idx })
        );
        assert_eq!(
            spd.delete_policy(idx),
            Err(SpdError::CorruptIndex { policy: idx })
        );
    }

    #[test]
    fn update_copies_only_touched_paths() {
        let spd = spd();
        let reqs: Vec<PolicyReq> = (0..4000)
            .map(|i| {
                req(&format!(
                    "dir=out action=bypass priority={i} \
                     local=10.{}.{}.0/24 remote=any4",
                    i / 256,
                    i % 256
                ))
            })
            .collect();
        spd.add_policies(&reqs).unwrap();

        let old = spd.state.load_full();
        let idx = spd
            .add_policy(&req(
                "dir=out action=discard priority=-1 local=192.168.0.0/16 \
                 remote=any4",
            ))
            .unwrap();
        assert_eq!(idx, 4000);
        let new = spd.state.load_full();

        let (i, o) = (Direction::In.idx(), Direction::Out.idx());
        assert!(Arc::ptr_eq(&old.dirs[i], &new.dirs[i]));
        assert!(!Arc::ptr_eq(&old.dirs[o], &new.dirs[o]));

        // Slots far from the new index are shared, not copied.
        for far in [0, 1000, 2500] {
            assert!(new.store.shares_slot(&old.store, far));
            assert!(new.counters.shares_slot(&old.counters, far));
        }
        assert!(!new.store.shares_slot(&old.store, idx));
        assert!(old.store.get(idx).is_none());

        spd.delete_policy(1000).unwrap();
        let newer = spd.state.load_full();
        assert!(newer.store.shares_slot(&new.store, 0));
        assert!(!newer.store.shares_slot(&new.store, 1000));
        assert!(new.store.get(1000).is_some());
        spd.verify().unwrap();
    }

    #[test]
    fn stale_generation_counts_retired_counter() {
        let spd = spd();
        let idx = spd
            .add_policy(&req(
                "dir=out action=bypass priority=1 local=any4 remote=any4",
            ))
            .unwrap();

        let old = spd.state.load_full();
        let old_ctr = Arc::clone(old.counters.get(idx).unwrap());
        spd.delete_policy(idx).unwrap();
        let idx2 = spd
            .add_policy(&req(
                "dir=out action=discard priority=1 local=any4 remote=any4",
            ))
            .unwrap();
        assert_eq!(idx, idx2);

        // A lookup still holding the old generation.
        let out = classify::classify(
            &old.store,
            old.dir(Direction::Out),
            &pkt("1.1.1.1"),
        )
        .unwrap();
        assert_eq!(out.winner.unwrap().action(), PolicyAction::Bypass);
        old_ctr.hit(64);

        assert_eq!(spd.counters(idx2), Some(CombinedCount::default()));
        assert_eq!(old_ctr.read().packets, 1);
    }
}
