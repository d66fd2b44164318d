// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use criterion::measurement::Measurement;
use criterion::measurement::WallTime;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use spd_test_utils::*;
use std::net::Ipv4Addr;

/// Additional labelling information for [`Measurement`]s for
/// pretty-printing and grouping.
pub trait MeasurementInfo: Measurement {
    fn label() -> &'static str;
}

impl MeasurementInfo for WallTime {
    fn label() -> &'static str {
        "wallclock"
    }
}

/// The selector shapes a generated policy set is drawn from.
#[derive(Clone, Copy, Debug)]
pub enum Shape {
    /// Every policy is a /24 on the local side: one mask.
    Subnets,
    /// Prefix lengths and port ranges vary: many masks.
    Mixed,
}

/// A policy set plus packets to classify against it.
pub struct Workload {
    pub policies: Vec<PolicyReq>,
    pub packets: Vec<FiveTuple>,
}

impl Workload {
    pub fn generate(shape: Shape, n_policies: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let policies = (0..n_policies)
            .map(|i| {
                let net = Ipv4Addr::from(0x0A00_0000 | ((i as u32) << 8));
                let s = match shape {
                    Shape::Subnets => format!(
                        "dir=out action=bypass priority={i} local={net}/24 \
                         remote=any4"
                    ),
                    Shape::Mixed => {
                        let prefix = rng.random_range(20..=32);
                        let lo: u16 = rng.random_range(0..4096);
                        let span: u16 = rng.random_range(0..1024);
                        format!(
                            "dir=out action=discard priority={} proto=tcp \
                             local={net}/{prefix} remote=any4 \
                             rport={lo}-{}",
                            rng.random_range(-100..100),
                            lo + span,
                        )
                    }
                };
                policy(&s)
            })
            .collect();

        let packets = (0..1024)
            .map(|_| {
                let n: u32 = rng.random_range(0..(n_policies as u32 + 8));
                let host: u8 = rng.random();
                let local =
                    Ipv4Addr::from(0x0A00_0000 | (n << 8) | u32::from(host));
                FiveTuple::new(
                    local.into(),
                    Ipv4Addr::new(198, 51, 100, 1).into(),
                    Protocol::TCP,
                    rng.random(),
                    rng.random_range(0..6000),
                )
                .unwrap()
            })
            .collect();

        Self { policies, packets }
    }

    /// An SPD holding every policy of this workload. Repeats drawn by
    /// the generator are skipped.
    pub fn install(&self) -> Spd {
        let spd = spd_setup();
        for p in &self.policies {
            match spd.add_policy(p) {
                Ok(_) | Err(SpdError::PolicyExists { .. }) => {}
                Err(e) => panic!("failed to install {p}: {e}"),
            }
        }
        spd
    }
}
