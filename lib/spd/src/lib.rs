// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The security policy database (SPD) engine.
//!
//! An [`Spd`] holds the policies of one SPD instance and classifies
//! packet 5-tuples against them. Policies are grouped by the shape of
//! their selectors (their mask) and indexed in per-direction hash
//! tables keyed by the masked selector, so that a lookup costs one
//! hash probe per distinct mask rather than a scan of every policy.
//!
//! Lookups run lock-free against an immutable generation of the
//! index. Policy adds and deletes are serialized and publish a new
//! generation when they complete.

#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub use spd_api as api;

pub mod engine;
#[cfg(feature = "std")]
pub mod print;

pub use engine::spd::Spd;
