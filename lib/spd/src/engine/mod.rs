// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The classification engine.

pub mod classify;
pub mod counter;
pub mod index;
pub mod key;
pub mod mask;
pub mod policy;
pub mod sa;
pub mod spd;
pub mod stat;
pub mod store;
pub mod trie;

use spd_api::SpdError;

type Result<T> = core::result::Result<T, SpdError>;
