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

//! IMAP backend config module.
//!
//! This module contains the representation of the IMAP backend
//! configuration of the user account.

use serde::Deserialize;
use std::{result, time::Duration};
use thiserror::Error;

use crate::process;

pub const DEFAULT_IMAP_PORT: u16 = 993;
pub const DEFAULT_IMAP_TIMEOUT: u64 = 60;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot get imap password")]
    GetPasswdError(#[source] process::Error),
    #[error("cannot get imap password: password is empty")]
    GetPasswdEmptyError,
    #[error("cannot get imap password: neither passwd nor passwd-cmd is set")]
    GetPasswdMissingError,
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the IMAP backend configuration.
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImapConfig {
    /// Represents the IMAP server host.
    pub host: String,
    /// Represents the IMAP server port.
    pub port: Option<u16>,
    /// Enables SSL, on by default.
    pub ssl: Option<bool>,
    /// Enables StartTLS.
    pub starttls: Option<bool>,
    /// Trusts any certificate.
    pub insecure: Option<bool>,
    /// Represents the IMAP server login.
    pub login: String,
    /// Represents the IMAP server password.
    pub passwd: Option<String>,
    /// Represents the IMAP server password command, takes precedence
    /// over the plain password.
    pub passwd_cmd: Option<String>,
    /// Represents the socket read and write timeout, in seconds.
    pub timeout: Option<u64>,
}

impl ImapConfig {
    /// Retrieves the IMAP server password, executing the password
    /// command if any.
    pub fn passwd(&self) -> Result<String> {
        if let Some(cmd) = self.passwd_cmd.as_ref() {
            let passwd = process::run(cmd).map_err(Error::GetPasswdError)?;
            let passwd = String::from_utf8_lossy(&passwd);
            let passwd = passwd
                .lines()
                .next()
                .filter(|passwd| !passwd.is_empty())
                .ok_or(Error::GetPasswdEmptyError)?;
            return Ok(passwd.to_owned());
        }

        self.passwd.clone().ok_or(Error::GetPasswdMissingError)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_IMAP_PORT)
    }

    /// Gets the SSL IMAP option.
    pub fn ssl(&self) -> bool {
        self.ssl.unwrap_or(true)
    }

    /// Gets the StartTLS IMAP option.
    pub fn starttls(&self) -> bool {
        self.starttls.unwrap_or_default()
    }

    /// Gets the insecure IMAP option.
    pub fn insecure(&self) -> bool {
        self.insecure.unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_IMAP_TIMEOUT))
    }
}
