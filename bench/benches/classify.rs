// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::Throughput;
use criterion::criterion_group;
use criterion::criterion_main;
use spd_bench::MeasurementInfo;
use spd_bench::Shape;
use spd_bench::Workload;
use spd_test_utils::*;
use std::hint::black_box;

const SIZES: [usize; 3] = [16, 256, 4096];

/// The cost of one update should not follow the size of the SPD.
const CHURN_SIZES: [usize; 4] = [16, 256, 4096, 65536];

pub fn classify<M: MeasurementInfo + 'static>(c: &mut Criterion<M>) {
    let mut c = c.benchmark_group(format!("classify/{}", M::label()));

    for shape in [Shape::Subnets, Shape::Mixed] {
        for n in SIZES {
            let wl = Workload::generate(shape, n, 0x5bd);
            let spd = wl.install();
            c.throughput(Throughput::Elements(wl.packets.len() as u64));
            c.bench_with_input(
                BenchmarkId::new(format!("{shape:?}"), n),
                &wl.packets,
                |b, pkts| {
                    b.iter(|| {
                        for pkt in pkts {
                            black_box(spd.classify(Out, pkt, 64).unwrap());
                        }
                    })
                },
            );
        }
    }
}

pub fn churn<M: MeasurementInfo + 'static>(c: &mut Criterion<M>) {
    let mut c = c.benchmark_group(format!("churn/{}", M::label()));

    for n in CHURN_SIZES {
        let wl = Workload::generate(Shape::Mixed, n, 0x5bd);
        let spd = wl.install();
        let extra = policy(
            "dir=out action=bypass priority=1000 proto=udp local=10.255.0.0/16 \
             remote=any4 rport=4500",
        );
        c.bench_function(BenchmarkId::new("add+delete", n), |b| {
            b.iter(|| {
                let idx = spd.add_policy(black_box(&extra)).unwrap();
                spd.delete_policy(idx).unwrap();
            })
        });
    }
}

criterion_group!(spd_wall, classify, churn);
criterion_main!(spd_wall);
