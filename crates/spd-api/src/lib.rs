// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types shared between the SPD engine, its administrative tooling and
//! tests.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod cmd;
pub mod ip;
pub mod policy;

pub use cmd::*;
pub use ip::*;
pub use policy::*;

/// The overall version of the API. Anytime a type in this crate is
/// added, removed, or modified in a way visible to a serialized
/// config or dump, this number should increment.
pub const API_VERSION: u64 = 1;

/// The direction of traffic a policy governs.
///
/// Each direction owns an independent set of masks and fast-path
/// tables.
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
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In = 1,
    Out = 2,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::In, Direction::Out];

    /// A dense index for per-direction arrays.
    pub const fn idx(self) -> usize {
        match self {
            Direction::In => 0,
            Direction::Out => 1,
        }
    }
}

impl core::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" | "inbound" => Ok(Direction::In),
            "out" | "outbound" => Ok(Direction::Out),
            _ => Err(format!("invalid direction: {s}")),
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dirstr = match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        };

        write!(f, "{dirstr}")
    }
}

/// The address family of a selector or packet.
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
#[serde(rename_all = "lowercase")]
pub enum AddrFamily {
    V4,
    V6,
}

impl AddrFamily {
    pub const ALL: [AddrFamily; 2] = [AddrFamily::V4, AddrFamily::V6];

    /// The width of an address of this family, in bits.
    pub const fn bits(self) -> u32 {
        match self {
            AddrFamily::V4 => 32,
            AddrFamily::V6 => 128,
        }
    }

    pub const fn of(ip: &std::net::IpAddr) -> Self {
        match ip {
            std::net::IpAddr::V4(_) => AddrFamily::V4,
            std::net::IpAddr::V6(_) => AddrFamily::V6,
        }
    }
}

impl Display for AddrFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AddrFamily::V4 => write!(f, "IPv4"),
            AddrFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// The external name of a security association, as written in
/// configuration.
pub type SaId = u32;

/// The internal, stable handle of a resolved security association.
pub type SaIndex = u32;

/// The stable index of an installed policy. Counter slots share this
/// index.
pub type PolicyIndex = u32;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn direction_parse_display() {
        assert_eq!("in".parse::<Direction>().unwrap(), Direction::In);
        assert_eq!("OUTBOUND".parse::<Direction>().unwrap(), Direction::Out);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(Direction::Out.to_string(), "OUT");
        assert_eq!(Direction::In.idx(), 0);
        assert_eq!(Direction::Out.idx(), 1);
    }
}
