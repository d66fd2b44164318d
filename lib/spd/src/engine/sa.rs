// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The seam to the security association subsystem.

use spd_api::SaId;
use spd_api::SaIndex;
use std::collections::BTreeMap;

/// Resolve the external id of an SA to its internal index.
///
/// The SPD only consults this when a policy is added; the resolved
/// index is stored with the policy.
pub trait SaResolver: Send + Sync {
    fn resolve(&self, sa_id: SaId) -> Option<SaIndex>;
}

/// A static table of SAs, for configurations and tests that have no
/// live SA subsystem.
#[derive(Clone, Debug, Default)]
pub struct SaTable {
    map: BTreeMap<SaId, SaIndex>,
}

impl SaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        sa_id: SaId,
        sa_index: SaIndex,
    ) -> Option<SaIndex> {
        self.map.insert(sa_id, sa_index)
    }

    pub fn remove(&mut self, sa_id: SaId) -> Option<SaIndex> {
        self.map.remove(&sa_id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

impl FromIterator<(SaId, SaIndex)> for SaTable {
    fn from_iter<I: IntoIterator<Item = (SaId, SaIndex)>>(iter: I) -> Self {
        Self { map: iter.into_iter().collect() }
    }
}

impl SaResolver for SaTable {
    fn resolve(&self, sa_id: SaId) -> Option<SaIndex> {
        self.map.get(&sa_id).copied()
    }
}
