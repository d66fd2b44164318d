// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use slog::Drain;
use slog::Logger;
use slog::o;

use spd::print::print_spd;
use spd::print::print_stats;
use spd_api::API_VERSION;
use spd_api::Direction;
use spd_api::FiveTuple;
use spd_api::Protocol;
use spdadm::SpdAdm;

/// Administer an IPsec security policy database (SPD)
#[derive(Debug, Parser)]
#[command(version = spdadm_version())]
enum Command {
    /// Install a config and print its policies, masks and tables.
    List {
        #[arg(short)]
        config: PathBuf,

        /// Print the dump as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Classify one 5-tuple against a config.
    Classify {
        #[arg(short)]
        config: PathBuf,

        #[arg(long = "dir")]
        direction: Direction,

        #[arg(long)]
        local: IpAddr,

        #[arg(long)]
        remote: IpAddr,

        #[arg(long, default_value_t = Protocol::ANY)]
        proto: Protocol,

        #[arg(long, default_value_t = 0)]
        lport: u16,

        #[arg(long, default_value_t = 0)]
        rport: u16,

        /// The packet length counted against the matching policy.
        #[arg(long, default_value_t = 64)]
        len: u64,

        /// Also print the SPD statistics.
        #[arg(long)]
        stats: bool,
    },

    /// Check that every policy of a config installs.
    Check {
        #[arg(short)]
        config: PathBuf,
    },
}

fn spdadm_version() -> String {
    format!("{} (API v{API_VERSION})", env!("CARGO_PKG_VERSION"))
}

/// A terminal logger filtered by `RUST_LOG`.
fn logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("component" => "spdadm"))
}

fn main() -> anyhow::Result<()> {
    let cmd = Command::parse();
    let log = logger();

    match cmd {
        Command::List { config, json } => {
            let adm = SpdAdm::open(&config, &log)?;
            let dump = adm.dump();
            if json {
                println!("{}", serde_json::to_string_pretty(&dump)?);
            } else {
                print_spd(&dump)?;
            }
        }

        Command::Classify {
            config,
            direction,
            local,
            remote,
            proto,
            lport,
            rport,
            len,
            stats,
        } => {
            let adm = SpdAdm::open(&config, &log)?;
            let pkt = FiveTuple::new(local, remote, proto, lport, rport)
                .context("invalid 5-tuple")?;
            let verdict = adm.classify(direction, &pkt, len)?;
            println!("{direction} {pkt}: {verdict}");
            if stats {
                println!();
                print_stats(&adm.stats())?;
            }
        }

        Command::Check { config } => {
            let adm = SpdAdm::open(&config, &log)?;
            adm.verify()?;
            println!(
                "{}: spd {}, {} policies OK",
                config.display(),
                adm.id(),
                adm.num_policies(),
            );
        }
    }

    Ok(())
}
