// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

use slog::Drain;

// Let's make our lives easier and pub use a bunch of stuff.
pub use slog::Logger;
pub use spd::Spd;
pub use spd::api::AddrFamily;
pub use spd::api::CombinedCount;
pub use spd::api::DefaultAction;
pub use spd::api::Direction;
pub use spd::api::Direction::*;
pub use spd::api::FiveTuple;
pub use spd::api::MaskStrategyKind;
pub use spd::api::PolicyAction;
pub use spd::api::PolicyIndex;
pub use spd::api::PolicyReq;
pub use spd::api::Protocol;
pub use spd::api::SpdConfig;
pub use spd::api::SpdError;
pub use spd::api::Verdict;
pub use spd::engine::sa::SaResolver;
pub use spd::engine::sa::SaTable;
pub use std::sync::Arc;

/// Expects that classifying a packet yields the given action, and
/// evaluates to the verdict.
#[macro_export]
macro_rules! expect_action {
    ($spd:expr, $dir:expr, $pkt:expr, $action:expr) => {{
        let v = $spd.classify($dir, &$pkt, 64).unwrap();
        assert_eq!(v.action, $action, "verdict {v} for {}", $pkt);
        v
    }};
}

/// The SA ids known to every test SPD, and their indices.
pub const TEST_SAS: [(u32, u32); 3] = [(1, 1001), (2, 1002), (3, 1003)];

/// A discard logger, or a terminal logger when `SPD_TEST_LOG` is set.
pub fn test_logger() -> Logger {
    if std::env::var_os("SPD_TEST_LOG").is_some() {
        return term_logger();
    }
    Logger::root(slog::Discard, slog::o!())
}

/// A logger writing into the test harness's captured output.
pub fn term_logger() -> Logger {
    let decorator =
        slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    Logger::root(drain, slog::o!("test" => true))
}

pub fn sa_table() -> Arc<SaTable> {
    Arc::new(TEST_SAS.into_iter().collect())
}

/// An SPD with the default configuration and the [`TEST_SAS`].
pub fn spd_setup() -> Spd {
    spd_setup_with(SpdConfig::default())
}

pub fn spd_setup_with(cfg: SpdConfig) -> Spd {
    Spd::new(cfg, sa_table(), &test_logger())
}

/// Parse a policy from its `key=value` form.
pub fn policy(s: &str) -> PolicyReq {
    s.parse().unwrap_or_else(|e| panic!("bad policy {s:?}: {e}"))
}

/// Add every policy, in order, returning their indices.
pub fn add_all(spd: &Spd, policies: &[&str]) -> Vec<PolicyIndex> {
    policies
        .iter()
        .map(|s| {
            spd.add_policy(&policy(s))
                .unwrap_or_else(|e| panic!("add {s:?}: {e}"))
        })
        .collect()
}

pub fn tuple4(
    local: &str,
    remote: &str,
    protocol: Protocol,
    lport: u16,
    rport: u16,
) -> FiveTuple {
    FiveTuple::new(
        local.parse().unwrap(),
        remote.parse().unwrap(),
        protocol,
        lport,
        rport,
    )
    .unwrap()
}

pub fn tuple6(
    local: &str,
    remote: &str,
    protocol: Protocol,
    lport: u16,
    rport: u16,
) -> FiveTuple {
    let t = tuple4(local, remote, protocol, lport, rport);
    assert_eq!(t.family(), AddrFamily::V6);
    t
}

/// A UDP packet from `local` to `remote`, both on port 500.
pub fn udp4(local: &str, remote: &str) -> FiveTuple {
    tuple4(local, remote, Protocol::UDP, 500, 500)
}
