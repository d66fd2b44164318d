// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Errors and the responses of the SPD's read accessors.

use super::AddrFamily;
use super::Direction;
use super::PolicyIndex;
use super::SaId;
use super::SaIndex;
use super::ip::AddrRange;
use super::ip::PortRange;
use super::ip::Protocol;
use super::policy::PolicyAction;
use super::policy::PolicyType;
use serde::Deserialize;
use serde::Serialize;
use std::net::IpAddr;
use thiserror::Error;

/// A malformed policy request.
#[derive(Clone, Debug, Deserialize, Eq, Error, PartialEq, Serialize)]
pub enum ValidationError {
    #[error("address range start {start} is after stop {stop}")]
    InvalidAddrRange { start: IpAddr, stop: IpAddr },

    #[error("port range start {start} is after stop {stop}")]
    InvalidPortRange { start: u16, stop: u16 },

    #[error("mixed address families: {0} and {1}")]
    MixedFamily(AddrFamily, AddrFamily),

    #[error("no {action} policy type exists for direction {direction}")]
    InvalidType { direction: Direction, action: PolicyAction },

    #[error("a protect policy requires an SA")]
    MissingSa,
}

#[derive(Clone, Debug, Deserialize, Eq, Error, PartialEq, Serialize)]
pub enum SpdError {
    #[error("invalid policy: {0}")]
    Validation(#[from] ValidationError),

    #[error("SA {sa_id} is not known")]
    UnresolvedSa { sa_id: SaId },

    #[error("policy {index} not found")]
    NotFound { index: PolicyIndex },

    #[error("no installed policy matches: {policy}")]
    NoMatchingPolicy { policy: String },

    #[error("an identical policy is installed at index {index}")]
    PolicyExists { index: PolicyIndex },

    #[error("policy pool is full ({0} policies)")]
    MaxCapacity(u32),

    /// A policy id was inserted twice into one candidate collection.
    #[error("policy {policy} already present under key {key}")]
    DuplicateInsert { key: String, policy: PolicyIndex },

    /// The fast-path index and the policy store disagree about a
    /// policy id.
    #[error("index references policy {policy} absent from the store")]
    CorruptIndex { policy: PolicyIndex },

    /// A mask's reference count disagrees with the policies using it.
    #[error("mask {mask} has {refcnt} references but {users} users")]
    CorruptMask { mask: u32, refcnt: u32, users: u32 },

    /// A previous corruption fault disabled this SPD.
    #[error("SPD {spd} is disabled after an internal fault")]
    Poisoned { spd: u32 },
}

impl SpdError {
    /// Is this a broken internal invariant rather than a rejected
    /// request?
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DuplicateInsert { .. }
                | Self::CorruptIndex { .. }
                | Self::CorruptMask { .. }
                | Self::Poisoned { .. }
        )
    }
}

/// A packet and byte count pair.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CombinedCount {
    pub packets: u64,
    pub bytes: u64,
}

/// An installed policy, as reported by `dump`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PolicyDump {
    pub index: PolicyIndex,
    pub ty: PolicyType,
    pub priority: i32,
    pub action: PolicyAction,
    pub protocol: Protocol,
    pub local: AddrRange,
    pub remote: AddrRange,
    pub local_ports: PortRange,
    pub remote_ports: PortRange,
    pub sa_id: Option<SaId>,
    pub sa_index: Option<SaIndex>,
    pub mask: u32,
    pub counts: CombinedCount,
}

/// A mask in use, rendered as the bits it keeps of each field.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MaskDump {
    pub id: u32,
    pub direction: Direction,
    pub family: AddrFamily,
    pub refcnt: u32,
    pub local: IpAddr,
    pub remote: IpAddr,
    pub local_port: u16,
    pub remote_port: u16,
    pub protocol: u16,
}

/// The occupancy of one fast-path table.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TableDump {
    pub direction: Direction,
    pub family: AddrFamily,
    /// Distinct keys.
    pub keys: usize,
    /// Candidate ids summed over all keys.
    pub entries: usize,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DumpSpdResp {
    pub spd: u32,
    pub policies: Vec<PolicyDump>,
    pub masks: Vec<MaskDump>,
    pub tables: Vec<TableDump>,
    pub default_in: CombinedCount,
    pub default_out: CombinedCount,
}

/// Per-direction classification counters.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DirStatsSnap {
    pub rule_match: u64,
    pub rule_nomatch: u64,
    pub candidates_rejected: u64,
}

/// A point-in-time copy of an SPD's statistics.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SpdStatsSnap {
    pub inbound: DirStatsSnap,
    pub outbound: DirStatsSnap,
    pub add_called: u64,
    pub add_failed: u64,
    pub del_called: u64,
    pub masks_created: u64,
    pub masks_retired: u64,
}

impl SpdStatsSnap {
    pub fn dir(&self, dir: Direction) -> &DirStatsSnap {
        match dir {
            Direction::In => &self.inbound,
            Direction::Out => &self.outbound,
        }
    }
}
