// imap-repack, re-encrypt PGP messages of an IMAP mailbox.
// Copyright (C) 2022  soywod <clement.douin@posteo.net>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! PGP config module.
//!
//! This module contains the representation of the gpg configuration.

use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

use crate::Fingerprint;

pub const DEFAULT_GPG_CMD: &str = "gpg";
pub const DEFAULT_GPG_TIMEOUT: u64 = 60;

/// Represents the gpg configuration.
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PgpConfig {
    /// Represents the gpg binary, `gpg` by default.
    pub gpg_cmd: Option<String>,
    /// Represents the gpg home directory.
    pub homedir: Option<PathBuf>,
    /// Represents the gpg invocation timeout, in seconds.
    pub timeout: Option<u64>,
    /// Represents keys that must never be given back as recipients,
    /// on top of the built-in one.
    #[serde(default)]
    pub exclusions: Vec<Fingerprint>,
}

impl PgpConfig {
    pub fn gpg_cmd(&self) -> String {
        self.gpg_cmd
            .as_ref()
            .and_then(|cmd| shellexpand::full(cmd).ok())
            .map(String::from)
            .unwrap_or_else(|| DEFAULT_GPG_CMD.into())
    }

    pub fn homedir(&self) -> Option<PathBuf> {
        self.homedir
            .as_ref()
            .and_then(|dir| dir.to_str())
            .and_then(|dir| shellexpand::full(dir).ok())
            .map(|dir| PathBuf::from(dir.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_GPG_TIMEOUT))
    }
}
