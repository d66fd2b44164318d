// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The installed policy record.

use super::key::FpTuple;
use super::mask::MaskId;
use core::fmt;
use core::fmt::Display;
use spd_api::AddrFamily;
use spd_api::CombinedCount;
use spd_api::Direction;
use spd_api::FiveTuple;
use spd_api::PolicyAction;
use spd_api::PolicyDump;
use spd_api::PolicyIndex;
use spd_api::PolicyReq;
use spd_api::PolicyType;
use spd_api::SaId;
use spd_api::SaIndex;

/// An installed policy. Immutable once installed; a change is a
/// delete followed by an add.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Policy {
    index: PolicyIndex,
    ty: PolicyType,
    req: PolicyReq,
    sa_index: Option<SaIndex>,
    mask: MaskId,
}

impl Policy {
    pub(crate) fn new(
        index: PolicyIndex,
        ty: PolicyType,
        req: PolicyReq,
        sa_index: Option<SaIndex>,
        mask: MaskId,
    ) -> Self {
        Self { index, ty, req, sa_index, mask }
    }

    pub fn index(&self) -> PolicyIndex {
        self.index
    }

    pub fn ty(&self) -> PolicyType {
        self.ty
    }

    pub fn direction(&self) -> Direction {
        self.ty.direction()
    }

    pub fn family(&self) -> AddrFamily {
        self.ty.family()
    }

    pub fn priority(&self) -> i32 {
        self.req.priority
    }

    pub fn action(&self) -> PolicyAction {
        self.req.action
    }

    pub fn sa_id(&self) -> Option<SaId> {
        self.req.sa_id
    }

    pub fn sa_index(&self) -> Option<SaIndex> {
        self.sa_index
    }

    pub fn mask_id(&self) -> MaskId {
        self.mask
    }

    /// The request this policy was installed from.
    pub fn req(&self) -> &PolicyReq {
        &self.req
    }

    /// Does `pkt` lie inside every selector range of this policy?
    ///
    /// The protocol is checked unless it is "any", and ports are
    /// checked only for protocols which carry them.
    pub fn is_match(&self, pkt: &FiveTuple) -> bool {
        let req = &self.req;

        if !req.protocol.is_any() && pkt.protocol != req.protocol {
            return false;
        }

        if !req.local.contains(&pkt.addrs.local())
            || !req.remote.contains(&pkt.addrs.remote())
        {
            return false;
        }

        if req.protocol.has_ports() {
            return req.local_ports.contains(pkt.local_port)
                && req.remote_ports.contains(pkt.remote_port);
        }

        true
    }

    /// Does this policy win over `other` when both match?
    ///
    /// Higher priority wins. Equal priorities go to the lower index,
    /// so the outcome does not depend on insertion order.
    pub fn outranks(&self, other: &Policy) -> bool {
        self.priority() > other.priority()
            || (self.priority() == other.priority()
                && self.index < other.index)
    }

    /// The tuple this policy's index key is built from: the start of
    /// every range.
    pub fn fp_tuple(&self) -> FpTuple {
        selector_tuple(&self.req)
    }

    pub fn dump(&self, counts: CombinedCount) -> PolicyDump {
        PolicyDump {
            index: self.index,
            ty: self.ty,
            priority: self.req.priority,
            action: self.req.action,
            protocol: self.req.protocol,
            local: self.req.local,
            remote: self.req.remote,
            local_ports: self.req.local_ports,
            remote_ports: self.req.remote_ports,
            sa_id: self.req.sa_id,
            sa_index: self.sa_index,
            mask: self.mask,
            counts,
        }
    }
}

impl Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {} {}", self.index, self.ty, self.req)
    }
}

pub(crate) fn selector_tuple(req: &PolicyReq) -> FpTuple {
    FpTuple {
        laddr: req.local.start_bits(),
        raddr: req.remote.start_bits(),
        lport: req.local_ports.start(),
        rport: req.remote_ports.start(),
        protocol: u16::from(req.protocol.0),
        family: req.family(),
    }
}

/// The canonical form of a request, used to recognize duplicates.
///
/// An SA named by a bypass or discard policy plays no part in it.
pub fn normalize(req: &PolicyReq) -> PolicyReq {
    let mut req = req.clone();
    if !req.action.uses_sa() {
        req.sa_id = None;
    }
    req
}

#[cfg(test)]
mod test {
    use super::*;
    use spd_api::Protocol;

    fn policy(index: PolicyIndex, s: &str) -> Policy {
        let req: PolicyReq = s.parse().unwrap();
        let ty = req.validate().unwrap();
        Policy::new(index, ty, req, None, 0)
    }

    fn pkt(local: &str, proto: Protocol, lport: u16) -> FiveTuple {
        FiveTuple::new(
            local.parse().unwrap(),
            "172.16.0.1".parse().unwrap(),
            proto,
            lport,
            4000,
        )
        .unwrap()
    }

    #[test]
    fn range_edges() {
        let p = policy(
            0,
            "dir=out action=bypass priority=1 proto=tcp \
             local=10.0.0.3-10.0.0.9 remote=any4 lport=100-200",
        );

        assert!(p.is_match(&pkt("10.0.0.3", Protocol::TCP, 100)));
        assert!(p.is_match(&pkt("10.0.0.9", Protocol::TCP, 200)));
        assert!(!p.is_match(&pkt("10.0.0.2", Protocol::TCP, 150)));
        assert!(!p.is_match(&pkt("10.0.0.10", Protocol::TCP, 150)));
        assert!(!p.is_match(&pkt("10.0.0.5", Protocol::TCP, 99)));
        assert!(!p.is_match(&pkt("10.0.0.5", Protocol::TCP, 201)));
        assert!(!p.is_match(&pkt("10.0.0.5", Protocol::UDP, 150)));
    }

    #[test]
    fn ports_ignored_without_port_protocol() {
        let any = policy(
            0,
            "dir=out action=bypass priority=1 local=any4 remote=any4 lport=80",
        );
        assert!(any.is_match(&pkt("10.0.0.1", Protocol::TCP, 81)));
        assert!(any.is_match(&pkt("10.0.0.1", Protocol::ICMP, 0)));

        let icmp = policy(
            1,
            "dir=out action=bypass priority=1 proto=icmp local=any4 \
             remote=any4 lport=80",
        );
        assert!(icmp.is_match(&pkt("10.0.0.1", Protocol::ICMP, 7)));
        assert!(!icmp.is_match(&pkt("10.0.0.1", Protocol::TCP, 80)));
    }

    #[test]
    fn wrong_family_never_matches() {
        let p = policy(
            0,
            "dir=out action=bypass priority=1 local=any4 remote=any4",
        );
        let v6 = FiveTuple::new(
            "fd00::1".parse().unwrap(),
            "fd00::2".parse().unwrap(),
            Protocol::TCP,
            1,
            2,
        )
        .unwrap();
        assert!(!p.is_match(&v6));
    }

    #[test]
    fn ranking() {
        let any = "local=any4 remote=any4";
        let low = policy(4, &format!("dir=out action=bypass priority=10 {any}"));
        let high = policy(9, &format!("dir=out action=bypass priority=20 {any}"));
        let tie = policy(2, &format!("dir=out action=discard priority=10 {any}"));

        assert!(high.outranks(&low));
        assert!(!low.outranks(&high));
        assert!(tie.outranks(&low));
        assert!(!low.outranks(&tie));
        assert!(!low.outranks(&low));
    }

    #[test]
    fn normalize_drops_unused_sa() {
        let req: PolicyReq =
            "dir=out action=bypass priority=1 local=any4 remote=any4 sa=5"
                .parse()
                .unwrap();
        assert_eq!(normalize(&req).sa_id, None);

        let req: PolicyReq =
            "dir=out action=resolve priority=1 local=any4 remote=any4 sa=5"
                .parse()
                .unwrap();
        assert_eq!(normalize(&req).sa_id, Some(5));
    }
}
