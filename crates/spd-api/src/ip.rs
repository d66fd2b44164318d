// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Selector and packet tuple types.

use super::AddrFamily;
use super::cmd::ValidationError;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use ipnetwork::IpNetwork;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::de;
use serde::de::Unexpected;
use serde::de::Visitor;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;

pub const PROTO_ICMP: u8 = 0x1;
pub const PROTO_TCP: u8 = 0x6;
pub const PROTO_UDP: u8 = 0x11;
pub const PROTO_ICMPV6: u8 = 0x3A;
pub const PROTO_SCTP: u8 = 0x84;

/// The reserved IP protocol number, used by policies to mean "any
/// protocol".
pub const PROTO_RESERVED: u8 = 0xFF;

/// An IP protocol value.
///
/// The reserved value 255 never appears on the wire and doubles as the
/// wildcard for policy selectors.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Protocol(pub u8);

impl Protocol {
    pub const ICMP: Self = Self(PROTO_ICMP);
    pub const TCP: Self = Self(PROTO_TCP);
    pub const UDP: Self = Self(PROTO_UDP);
    pub const ICMPV6: Self = Self(PROTO_ICMPV6);
    pub const SCTP: Self = Self(PROTO_SCTP);
    pub const ANY: Self = Self(PROTO_RESERVED);

    pub fn is_any(self) -> bool {
        self == Self::ANY
    }

    /// Does this protocol carry the port numbers a selector may match
    /// on?
    pub fn has_ports(self) -> bool {
        matches!(self.0, PROTO_TCP | PROTO_UDP | PROTO_SCTP)
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::ANY
    }
}

impl From<u8> for Protocol {
    fn from(proto: u8) -> Self {
        Self(proto)
    }
}

impl From<Protocol> for u8 {
    fn from(proto: Protocol) -> u8 {
        proto.0
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(Self::ANY),
            "icmp" => Ok(Self::ICMP),
            "tcp" => Ok(Self::TCP),
            "udp" => Ok(Self::UDP),
            "icmpv6" => Ok(Self::ICMPV6),
            "sctp" => Ok(Self::SCTP),
            num => num
                .parse::<u8>()
                .map(Self)
                .map_err(|e| format!("bad protocol: '{s}' {e}")),
        }
    }
}

impl TryFrom<String> for Protocol {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Protocol> for String {
    fn from(proto: Protocol) -> String {
        proto.to_string()
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            PROTO_RESERVED => write!(f, "ANY"),
            PROTO_ICMP => write!(f, "ICMP"),
            PROTO_TCP => write!(f, "TCP"),
            PROTO_UDP => write!(f, "UDP"),
            PROTO_ICMPV6 => write!(f, "ICMPv6"),
            PROTO_SCTP => write!(f, "SCTP"),
            num => write!(f, "{num}"),
        }
    }
}

/// Convert an address to its integer value, widened to 128 bits.
pub fn ip_bits(ip: &IpAddr) -> u128 {
    match ip {
        IpAddr::V4(ip4) => u128::from(u32::from(*ip4)),
        IpAddr::V6(ip6) => u128::from(*ip6),
    }
}

/// Convert an integer value back to an address of the given family.
/// For IPv4 only the low 32 bits are used.
pub fn bits_ip(family: AddrFamily, bits: u128) -> IpAddr {
    match family {
        AddrFamily::V4 => IpAddr::V4(Ipv4Addr::from(bits as u32)),
        AddrFamily::V6 => IpAddr::V6(Ipv6Addr::from(bits)),
    }
}

/// The all-ones value for a field `width` bits wide.
pub const fn full_bits(width: u32) -> u128 {
    if width >= 128 { u128::MAX } else { (1u128 << width) - 1 }
}

/// A closed range of addresses, `[start, stop]`.
///
/// Both ends are always of the same family and `start <= stop`; the
/// constructors enforce this.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddrRange {
    start: IpAddr,
    stop: IpAddr,
}

impl AddrRange {
    pub fn new(start: IpAddr, stop: IpAddr) -> Result<Self, ValidationError> {
        let (sf, ef) = (AddrFamily::of(&start), AddrFamily::of(&stop));
        if sf != ef {
            return Err(ValidationError::MixedFamily(sf, ef));
        }

        if ip_bits(&start) > ip_bits(&stop) {
            return Err(ValidationError::InvalidAddrRange { start, stop });
        }

        Ok(Self { start, stop })
    }

    pub fn exact(ip: IpAddr) -> Self {
        Self { start: ip, stop: ip }
    }

    /// The range covering every address of `family`.
    pub fn any(family: AddrFamily) -> Self {
        Self {
            start: bits_ip(family, 0),
            stop: bits_ip(family, full_bits(family.bits())),
        }
    }

    pub fn start(&self) -> IpAddr {
        self.start
    }

    pub fn stop(&self) -> IpAddr {
        self.stop
    }

    pub fn start_bits(&self) -> u128 {
        ip_bits(&self.start)
    }

    pub fn stop_bits(&self) -> u128 {
        ip_bits(&self.stop)
    }

    pub fn family(&self) -> AddrFamily {
        AddrFamily::of(&self.start)
    }

    pub fn is_exact(&self) -> bool {
        self.start == self.stop
    }

    pub fn is_any(&self) -> bool {
        *self == Self::any(self.family())
    }

    /// Does this range contain `ip`? An address of the other family is
    /// never contained.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        if AddrFamily::of(ip) != self.family() {
            return false;
        }

        let val = ip_bits(ip);
        self.start_bits() <= val && val <= self.stop_bits()
    }

    /// If this range is exactly one CIDR block, return its prefix
    /// length.
    pub fn prefix_len(&self) -> Option<u32> {
        let diff = self.start_bits() ^ self.stop_bits();
        let host = diff.count_ones();
        let aligned = diff == full_bits(host)
            && self.start_bits() & diff == 0
            && self.stop_bits() & diff == diff;
        aligned.then(|| self.family().bits() - host)
    }
}

impl From<IpNetwork> for AddrRange {
    fn from(net: IpNetwork) -> Self {
        let family = AddrFamily::of(&net.ip());
        let width = family.bits();
        let host = full_bits(width - u32::from(net.prefix()));
        let start = ip_bits(&net.network());
        Self {
            start: bits_ip(family, start),
            stop: bits_ip(family, start | host),
        }
    }
}

impl FromStr for AddrRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any4" => Ok(Self::any(AddrFamily::V4)),
            "any6" => Ok(Self::any(AddrFamily::V6)),

            cidr if cidr.contains('/') => cidr
                .parse::<IpNetwork>()
                .map(Self::from)
                .map_err(|e| format!("bad CIDR: '{s}' {e}")),

            range if range.contains('-') => {
                let Some((start, stop)) = range.split_once('-') else {
                    return Err(format!("malformed range: {s}"));
                };
                let start = start
                    .trim()
                    .parse::<IpAddr>()
                    .map_err(|e| format!("bad address: '{start}' {e}"))?;
                let stop = stop
                    .trim()
                    .parse::<IpAddr>()
                    .map_err(|e| format!("bad address: '{stop}' {e}"))?;
                Self::new(start, stop).map_err(|e| e.to_string())
            }

            single => single
                .parse::<IpAddr>()
                .map(Self::exact)
                .map_err(|e| format!("bad address: '{s}' {e}")),
        }
    }
}

impl TryFrom<String> for AddrRange {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AddrRange> for String {
    fn from(range: AddrRange) -> String {
        range.to_string()
    }
}

impl Display for AddrRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_exact() {
            return write!(f, "{}", self.start);
        }

        match (self.prefix_len(), self.family()) {
            (Some(0), AddrFamily::V4) => write!(f, "any4"),
            (Some(0), AddrFamily::V6) => write!(f, "any6"),
            (Some(prefix), _) => write!(f, "{}/{prefix}", self.start),
            (None, _) => write!(f, "{}-{}", self.start, self.stop),
        }
    }
}

/// A closed range of transport ports, `[start, stop]`.
///
/// Deserializes from a bare port number or from its string form.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(into = "String")]
pub struct PortRange {
    start: u16,
    stop: u16,
}

impl PortRange {
    pub const ANY: Self = Self { start: 0, stop: u16::MAX };

    pub fn new(start: u16, stop: u16) -> Result<Self, ValidationError> {
        if start > stop {
            return Err(ValidationError::InvalidPortRange { start, stop });
        }

        Ok(Self { start, stop })
    }

    pub const fn exact(port: u16) -> Self {
        Self { start: port, stop: port }
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn stop(&self) -> u16 {
        self.stop
    }

    pub fn is_any(&self) -> bool {
        *self == Self::ANY
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.stop
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::ANY
    }
}

impl FromStr for PortRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_port = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|e| format!("bad port: '{p}' {e}"))
        };

        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(Self::ANY),

            _ => match s.split_once('-') {
                Some((start, stop)) => {
                    Self::new(parse_port(start)?, parse_port(stop)?)
                        .map_err(|e| e.to_string())
                }

                None => parse_port(s).map(Self::exact),
            },
        }
    }
}

impl From<PortRange> for String {
    fn from(range: PortRange) -> String {
        range.to_string()
    }
}

struct PortRangeVisitor;

impl Visitor<'_> for PortRangeVisitor {
    type Value = PortRange;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a port number or a port range")
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        u16::try_from(value)
            .map(PortRange::exact)
            .map_err(|_| E::invalid_value(Unexpected::Unsigned(value), &self))
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        u16::try_from(value)
            .map(PortRange::exact)
            .map_err(|_| E::invalid_value(Unexpected::Signed(value), &self))
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        value.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for PortRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(PortRangeVisitor)
    }
}

impl Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_any() {
            write!(f, "ANY")
        } else if self.start == self.stop {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.stop)
        }
    }
}

/// The local and remote address of a packet, always of one family.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum AddrPair {
    V4 { local: Ipv4Addr, remote: Ipv4Addr },
    V6 { local: Ipv6Addr, remote: Ipv6Addr },
}

impl AddrPair {
    pub fn new(local: IpAddr, remote: IpAddr) -> Result<Self, ValidationError> {
        match (local, remote) {
            (IpAddr::V4(local), IpAddr::V4(remote)) => {
                Ok(Self::V4 { local, remote })
            }
            (IpAddr::V6(local), IpAddr::V6(remote)) => {
                Ok(Self::V6 { local, remote })
            }
            (l, r) => Err(ValidationError::MixedFamily(
                AddrFamily::of(&l),
                AddrFamily::of(&r),
            )),
        }
    }

    pub fn family(&self) -> AddrFamily {
        match self {
            Self::V4 { .. } => AddrFamily::V4,
            Self::V6 { .. } => AddrFamily::V6,
        }
    }

    pub fn local(&self) -> IpAddr {
        match self {
            Self::V4 { local, .. } => IpAddr::V4(*local),
            Self::V6 { local, .. } => IpAddr::V6(*local),
        }
    }

    pub fn remote(&self) -> IpAddr {
        match self {
            Self::V4 { remote, .. } => IpAddr::V4(*remote),
            Self::V6 { remote, .. } => IpAddr::V6(*remote),
        }
    }
}

/// The normalized 5-tuple of a packet as handed to the classifier.
///
/// "Local" and "remote" are relative to the node running the SPD, not
/// to the packet's source and destination: for outbound traffic local
/// is the source, for inbound traffic it is the destination.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct FiveTuple {
    pub addrs: AddrPair,
    pub protocol: Protocol,
    pub local_port: u16,
    pub remote_port: u16,
}

impl FiveTuple {
    pub fn new(
        local: IpAddr,
        remote: IpAddr,
        protocol: Protocol,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            addrs: AddrPair::new(local, remote)?,
            protocol,
            local_port,
            remote_port,
        })
    }

    pub fn family(&self) -> AddrFamily {
        self.addrs.family()
    }
}

impl Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let local = self.addrs.local();
        let remote = self.addrs.remote();
        match self.addrs {
            AddrPair::V4 { .. } => write!(
                f,
                "{} {local}:{} -> {remote}:{}",
                self.protocol, self.local_port, self.remote_port
            ),
            AddrPair::V6 { .. } => write!(
                f,
                "{} [{local}]:{} -> [{remote}]:{}",
                self.protocol, self.local_port, self.remote_port
            ),
        }
    }
}
