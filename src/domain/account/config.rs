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

//! Config module.
//!
//! This module contains the representation of the user
//! configuration: the IMAP accounts and the gpg settings.

use serde::Deserialize;
use std::{collections::HashMap, env, fs, io, path::PathBuf, result};
use thiserror::Error;

use crate::{ImapConfig, PgpConfig};

pub const DEFAULT_INBOX_FOLDER: &str = "INBOX";

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot expand config path {1}")]
    ExpandConfigPathError(#[source] shellexpand::LookupError<env::VarError>, String),
    #[error("cannot read config file at {1}")]
    ReadConfigFileError(#[source] io::Error, PathBuf),
    #[error("cannot parse config file at {1}")]
    ParseConfigFileError(#[source] toml::de::Error, PathBuf),
    #[error("cannot find config directory")]
    FindConfigDirError,
    #[error("cannot find a default account")]
    FindDefaultAccountError,
    #[error("cannot find account {0}")]
    FindAccountError(String),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the configuration of one account.
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AccountConfig {
    /// Represents the name of the account, filled in from the
    /// accounts table key.
    #[serde(skip)]
    pub name: String,
    /// Represents the folder used when none is given.
    pub default_folder: Option<String>,
    /// Represents the IMAP connection of the account.
    #[serde(flatten)]
    pub imap: ImapConfig,
}

impl AccountConfig {
    pub fn default_folder(&self) -> &str {
        self.default_folder
            .as_deref()
            .unwrap_or(DEFAULT_INBOX_FOLDER)
    }
}

/// Represents the user configuration.
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Represents the account used when none is given.
    pub default_account: Option<String>,
    /// Represents the accounts configuration.
    #[serde(default)]
    pub accounts: HashMap<String, AccountConfig>,
    /// Represents the gpg configuration.
    #[serde(default)]
    pub pgp: PgpConfig,
}

impl Config {
    /// Gets the default config file path.
    pub fn default_path() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .ok_or(Error::FindConfigDirError)?
            .join("imap-repack")
            .join("config.toml"))
    }

    /// Reads and parses the config file at the given path, expanding
    /// shell variables and `~`.
    pub fn from_path<P: AsRef<str>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path = shellexpand::full(path)
            .map(|path| PathBuf::from(path.to_string()))
            .map_err(|err| Error::ExpandConfigPathError(err, path.to_owned()))?;
        let content =
            fs::read_to_string(&path).map_err(|err| Error::ReadConfigFileError(err, path.clone()))?;

        Self::from_toml(&content).map_err(|err| Error::ParseConfigFileError(err, path))
    }

    pub fn from_toml(content: &str) -> result::Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(content)?;
        for (name, account) in config.accounts.iter_mut() {
            account.name = name.clone();
        }
        Ok(config)
    }

    /// Gets the account configuration matching the given name. If no
    /// name is given, gets the default account, or the only account
    /// when there is just one.
    pub fn account(&self, name: Option<&str>) -> Result<&AccountConfig> {
        match name.or(self.default_account.as_deref()) {
            Some(name) => self
                .accounts
                .get(name)
                .ok_or_else(|| Error::FindAccountError(name.to_owned())),
            None if self.accounts.len() == 1 => self
                .accounts
                .values()
                .next()
                .ok_or(Error::FindDefaultAccountError),
            None => Err(Error::FindDefaultAccountError),
        }
    }
}
