// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print dump responses in a human-friendly manner.
//!
//! Shared by spdadm and the integration tests.

use crate::api::CombinedCount;
use crate::api::Direction;
use crate::api::DumpSpdResp;
use crate::api::MaskDump;
use crate::api::PolicyDump;
use crate::api::SpdStatsSnap;
use core::cmp::Reverse;
use itertools::Itertools;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a [`DumpSpdResp`].
pub fn print_spd(resp: &DumpSpdResp) -> std::io::Result<()> {
    print_spd_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpSpdResp`] into a given writer.
pub fn print_spd_into(
    writer: &mut impl Write,
    resp: &DumpSpdResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "SPD {}", resp.spd)?;
    write_hrb(&mut t)?;

    for dir in Direction::ALL {
        let def = match dir {
            Direction::In => resp.default_in,
            Direction::Out => resp.default_out,
        };

        writeln!(t, "{dir} Policies")?;
        write_hr(&mut t)?;
        print_policy_header(&mut t)?;
        for p in resp
            .policies
            .iter()
            .filter(|p| p.ty.direction() == dir)
            .sorted_by_key(|p| (Reverse(p.priority), p.index))
        {
            print_policy(&mut t, p)?;
        }
        print_def_policy(&mut t, def)?;
        writeln!(t)?;
        t.flush()?;
    }

    writeln!(t, "Masks")?;
    write_hr(&mut t)?;
    print_mask_header(&mut t)?;
    for m in &resp.masks {
        print_mask(&mut t, m)?;
    }
    writeln!(t)?;
    t.flush()?;

    writeln!(t, "Tables")?;
    write_hr(&mut t)?;
    writeln!(t, "DIR\tFAMILY\tKEYS\tENTRIES")?;
    for tbl in &resp.tables {
        writeln!(
            t,
            "{}\t{}\t{}\t{}",
            tbl.direction, tbl.family, tbl.keys, tbl.entries
        )?;
    }
    t.flush()
}

/// Print the header for the [`print_policy()`] output.
pub fn print_policy_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(
        t,
        "IDX\tPRI\tTYPE\tACTION\tPROTO\tLOCAL\tREMOTE\tLPORT\tRPORT\tSA\t\
         PKTS\tBYTES"
    )
}

/// Print a [`PolicyDump`].
pub fn print_policy(
    t: &mut impl Write,
    p: &PolicyDump,
) -> std::io::Result<()> {
    let sa = match (p.sa_id, p.sa_index) {
        (Some(id), Some(idx)) => format!("{id}:{idx}"),
        (Some(id), None) => format!("{id}"),
        _ => "--".to_string(),
    };

    writeln!(
        t,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        p.index,
        p.priority,
        p.ty,
        p.action,
        p.protocol,
        p.local,
        p.remote,
        p.local_ports,
        p.remote_ports,
        sa,
        p.counts.packets,
        p.counts.bytes,
    )
}

pub fn print_def_policy(
    t: &mut impl Write,
    counts: CombinedCount,
) -> std::io::Result<()> {
    writeln!(
        t,
        "DEF\t--\t--\t--\t--\t--\t--\t--\t--\t--\t{}\t{}",
        counts.packets, counts.bytes
    )
}

/// Print the header for the [`print_mask()`] output.
pub fn print_mask_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "ID\tDIR\tFAMILY\tREFS\tLOCAL\tREMOTE\tLPORT\tRPORT\tPROTO")
}

/// Print a [`MaskDump`].
pub fn print_mask(t: &mut impl Write, m: &MaskDump) -> std::io::Result<()> {
    writeln!(
        t,
        "{}\t{}\t{}\t{}\t{}\t{}\t{:#06x}\t{:#06x}\t{:#06x}",
        m.id,
        m.direction,
        m.family,
        m.refcnt,
        m.local,
        m.remote,
        m.local_port,
        m.remote_port,
        m.protocol,
    )
}

/// Print an [`SpdStatsSnap`].
pub fn print_stats(stats: &SpdStatsSnap) -> std::io::Result<()> {
    print_stats_into(&mut std::io::stdout(), stats)
}

/// Print an [`SpdStatsSnap`] into a given writer.
pub fn print_stats_into(
    writer: &mut impl Write,
    stats: &SpdStatsSnap,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "DIR\tMATCH\tNO MATCH\tREJECTED")?;
    for dir in Direction::ALL {
        let d = stats.dir(dir);
        writeln!(
            t,
            "{dir}\t{}\t{}\t{}",
            d.rule_match, d.rule_nomatch, d.candidates_rejected
        )?;
    }
    writeln!(t)?;
    writeln!(t, "ADDS\tADDS FAILED\tDELETES\tMASKS CREATED\tMASKS RETIRED")?;
    writeln!(
        t,
        "{}\t{}\t{}\t{}\t{}",
        stats.add_called,
        stats.add_failed,
        stats.del_called,
        stats.masks_created,
        stats.masks_retired,
    )?;
    t.flush()
}

/// Print a horizontal rule in bold.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}
