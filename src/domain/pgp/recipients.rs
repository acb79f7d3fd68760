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

//! Recipients module.
//!
//! This module contains the key fingerprint and recipient set types,
//! and the policy computing a new recipient set from the current one.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, convert::Infallible, fmt, ops, str::FromStr};

/// Fingerprint of the maintainer key some keyrings carry as a default
/// recipient. It is never given back as a recipient.
pub const DEFAULT_EXCLUSION: &str = "80615870F5BAD690333686D0F2AD85AC1E42B367";

/// Represents a key fingerprint, trimmed and uppercased.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new<F: AsRef<str>>(fpr: F) -> Self {
        Self(fpr.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Fingerprint {
    fn from(fpr: &str) -> Self {
        Self::new(fpr)
    }
}

impl From<String> for Fingerprint {
    fn from(fpr: String) -> Self {
        Self::new(fpr)
    }
}

impl From<Fingerprint> for String {
    fn from(fpr: Fingerprint) -> Self {
        fpr.0
    }
}

impl FromStr for Fingerprint {
    type Err = Infallible;

    fn from_str(fpr: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(fpr))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents the set of keys a message is encrypted to.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Recipients(pub BTreeSet<Fingerprint>);

impl ops::Deref for Recipients {
    type Target = BTreeSet<Fingerprint>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ops::DerefMut for Recipients {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<Fingerprint> for Recipients {
    fn from_iter<T: IntoIterator<Item = Fingerprint>>(iter: T) -> Self {
        Recipients(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for Recipients {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        iter.into_iter().map(Fingerprint::from).collect()
    }
}

impl fmt::Display for Recipients {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut glue = "";
        for fpr in self.iter() {
            write!(f, "{}{}", glue, fpr)?;
            glue = ", ";
        }
        Ok(())
    }
}

/// Represents the add/remove/replace-all directives applied to the
/// recipients of every repacked message.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RecipientsPolicy {
    pub add: Recipients,
    pub remove: Recipients,
    /// Starts from an empty set instead of the current recipients.
    pub replace_all: bool,
    /// Keys removed from every result, even when listed in `add`.
    pub exclusions: Recipients,
}

impl Default for RecipientsPolicy {
    fn default() -> Self {
        Self {
            add: Recipients::default(),
            remove: Recipients::default(),
            replace_all: false,
            exclusions: Self::default_exclusions(),
        }
    }
}

impl RecipientsPolicy {
    pub fn default_exclusions() -> Recipients {
        Recipients::from_iter([DEFAULT_EXCLUSION])
    }

    /// Computes the new recipient set. Pure: `current` is left as is.
    pub fn compute(&self, current: &Recipients) -> Recipients {
        let base = if self.replace_all {
            BTreeSet::new()
        } else {
            current.0.clone()
        };

        base.difference(&self.remove)
            .chain(self.add.iter())
            .filter(|fpr| !self.exclusions.contains(*fpr))
            .cloned()
            .collect()
    }
}
