// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Fast-path lookup keys.
//!
//! A policy and a packet are both reduced to an [`FpTuple`], masked
//! with a [`FpMask`], and packed into a fixed-size key for the hash
//! table of their address family. IPv4 and IPv6 use distinct key
//! types of 16 and 40 bytes which share the [`FpKey`] interface, so
//! one table implementation serves both widths.

use super::mask::FpMask;
use core::fmt;
use core::hash::Hash;
use core::hash::Hasher;
use spd_api::AddrFamily;
use spd_api::FiveTuple;
use spd_api::ip_bits;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// A 5-tuple widened to the largest field sizes of either family.
///
/// For IPv4 only the low 32 bits of each address are used.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FpTuple {
    pub laddr: u128,
    pub raddr: u128,
    pub lport: u16,
    pub rport: u16,
    pub protocol: u16,
    pub family: AddrFamily,
}

impl FpTuple {
    pub fn from_packet(pkt: &FiveTuple) -> Self {
        Self {
            laddr: ip_bits(&pkt.addrs.local()),
            raddr: ip_bits(&pkt.addrs.remote()),
            lport: pkt.local_port,
            rport: pkt.remote_port,
            protocol: u16::from(pkt.protocol.0),
            family: pkt.family(),
        }
    }

    /// Keep only the bits `mask` cares about.
    pub fn masked(&self, mask: &FpMask) -> Self {
        Self {
            laddr: self.laddr & mask.laddr,
            raddr: self.raddr & mask.raddr,
            lport: self.lport & mask.lport,
            rport: self.rport & mask.rport,
            protocol: self.protocol & mask.protocol,
            family: self.family,
        }
    }
}

/// A hash key built from a masked tuple.
pub trait FpKey:
    Copy
    + Eq
    + Hash
    + fmt::Debug
    + Immutable
    + IntoBytes
    + Send
    + Sync
    + 'static
{
    const FAMILY: AddrFamily;

    fn from_masked(tuple: &FpTuple) -> Self;

    /// The key's byte image in hex, for error reports.
    fn to_hex(&self) -> String {
        self.as_bytes().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    FromBytes,
    Immutable,
    IntoBytes,
    KnownLayout,
    PartialEq,
)]
#[repr(C)]
pub struct FpKey4 {
    pub laddr: [u8; 4],
    pub raddr: [u8; 4],
    pub lport: u16,
    pub rport: u16,
    pub protocol: u16,
    pub is_ipv6: u16,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    FromBytes,
    Immutable,
    IntoBytes,
    KnownLayout,
    PartialEq,
)]
#[repr(C)]
pub struct FpKey6 {
    pub laddr: [u8; 16],
    pub raddr: [u8; 16],
    pub lport: u16,
    pub rport: u16,
    pub protocol: u16,
    pub is_ipv6: u16,
}

const _: () = assert!(size_of::<FpKey4>() == 16);
const _: () = assert!(size_of::<FpKey6>() == 40);

// Keys hash as their byte image so that CRC-32 sees every field
// exactly once and without length prefixes.
impl Hash for FpKey4 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(self.as_bytes());
    }
}

impl Hash for FpKey6 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(self.as_bytes());
    }
}

impl FpKey for FpKey4 {
    const FAMILY: AddrFamily = AddrFamily::V4;

    fn from_masked(tuple: &FpTuple) -> Self {
        Self {
            laddr: (tuple.laddr as u32).to_be_bytes(),
            raddr: (tuple.raddr as u32).to_be_bytes(),
            lport: tuple.lport,
            rport: tuple.rport,
            protocol: tuple.protocol,
            is_ipv6: 0,
        }
    }
}

impl FpKey for FpKey6 {
    const FAMILY: AddrFamily = AddrFamily::V6;

    fn from_masked(tuple: &FpTuple) -> Self {
        Self {
            laddr: tuple.laddr.to_be_bytes(),
            raddr: tuple.raddr.to_be_bytes(),
            lport: tuple.lport,
            rport: tuple.rport,
            protocol: tuple.protocol,
            is_ipv6: 1,
        }
    }
}
