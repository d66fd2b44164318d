// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! SPD administration library

use serde::Deserialize;
use serde::Serialize;
use slog::Logger;
use spd::Spd;
use spd::engine::sa::SaTable;
use spd_api::PolicyIndex;
use spd_api::PolicyReq;
use spd_api::SaId;
use spd_api::SaIndex;
use spd_api::SpdConfig;
use spd_api::SpdError;
use std::ops::Deref;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {path}: {err}")]
    Io { path: String, err: std::io::Error },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("duplicate SA id {0}")]
    DuplicateSa(SaId),

    #[error("policy #{n} ({policy}): {err}")]
    Policy { n: usize, policy: String, err: SpdError },
}

/// An SA known to the configuration.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SaEntry {
    pub sa_id: SaId,
    pub sa_index: SaIndex,
}

/// The TOML document spdadm operates on.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SpdFile {
    #[serde(default)]
    pub spd: SpdConfig,
    #[serde(default)]
    pub sa: Vec<SaEntry>,
    #[serde(default)]
    pub policy: Vec<PolicyReq>,
}

impl FromStr for SpdFile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

impl SpdFile {
    pub fn read(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|err| Error::Io {
            path: path.display().to_string(),
            err,
        })?;
        text.parse()
    }

    pub fn sa_table(&self) -> Result<SaTable, Error> {
        let mut sas = SaTable::new();
        for e in &self.sa {
            if sas.insert(e.sa_id, e.sa_index).is_some() {
                return Err(Error::DuplicateSa(e.sa_id));
            }
        }
        Ok(sas)
    }
}

/// An SPD instance built from an [`SpdFile`].
pub struct SpdAdm {
    spd: Spd,
    indices: Vec<PolicyIndex>,
}

impl Deref for SpdAdm {
    type Target = Spd;

    fn deref(&self) -> &Self::Target {
        &self.spd
    }
}

impl SpdAdm {
    /// Read the config at `path` and install it.
    pub fn open(path: &Path, log: &Logger) -> Result<Self, Error> {
        Self::install(&SpdFile::read(path)?, log)
    }

    /// Install every policy of `file` as one batch, in order. The
    /// first policy that fails to install is reported by its position
    /// in the file, and nothing is installed.
    pub fn install(file: &SpdFile, log: &Logger) -> Result<Self, Error> {
        let sas = Arc::new(file.sa_table()?);
        let spd = Spd::new(file.spd.clone(), sas, log);

        let indices =
            spd.add_policies(&file.policy).map_err(|(n, err)| Error::Policy {
                n: n + 1,
                policy: file.policy[n].to_string(),
                err,
            })?;

        Ok(Self { spd, indices })
    }

    /// The index each policy of the file was installed at.
    pub fn indices(&self) -> &[PolicyIndex] {
        &self.indices
    }
}
