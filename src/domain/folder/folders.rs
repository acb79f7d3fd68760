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

//! Folders module.
//!
//! This module contains the representation of the email folders.

use serde::Serialize;
use std::{fmt, ops};

use crate::Folder;

/// Represents the list of folders.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Folders(pub Vec<Folder>);

impl ops::Deref for Folders {
    type Target = Vec<Folder>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ops::DerefMut for Folders {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<Folder> for Folders {
    fn from_iter<T: IntoIterator<Item = Folder>>(iter: T) -> Self {
        Folders(iter.into_iter().collect())
    }
}

/// Lists one folder name per line.
impl fmt::Display for Folders {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut glue = "";
        for folder in self.iter() {
            write!(f, "{}{}", glue, folder)?;
            glue = "\n";
        }
        Ok(())
    }
}
