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

use std::borrow::Cow;

use crate::{Flag, Flags};

pub type ImapFlag<'a> = imap::types::Flag<'a>;

pub fn from_imap_flag(imap_flag: &ImapFlag<'_>) -> Flag {
    match imap_flag {
        ImapFlag::Seen => Flag::Seen,
        ImapFlag::Answered => Flag::Answered,
        ImapFlag::Flagged => Flag::Flagged,
        ImapFlag::Deleted => Flag::Deleted,
        ImapFlag::Draft => Flag::Draft,
        ImapFlag::Recent => Flag::Recent,
        ImapFlag::Custom(flag) => Flag::Custom(flag.to_string()),
        flag => Flag::Custom(flag.to_string()),
    }
}

pub fn into_imap_flag(flag: &Flag) -> ImapFlag<'static> {
    match flag {
        Flag::Seen => ImapFlag::Seen,
        Flag::Answered => ImapFlag::Answered,
        Flag::Flagged => ImapFlag::Flagged,
        Flag::Deleted => ImapFlag::Deleted,
        Flag::Draft => ImapFlag::Draft,
        Flag::Recent => ImapFlag::Recent,
        Flag::Custom(flag) => ImapFlag::Custom(Cow::Owned(flag.clone())),
    }
}

pub fn from_imap_flags(imap_flags: &[ImapFlag<'_>]) -> Flags {
    imap_flags.iter().map(from_imap_flag).collect()
}

pub fn into_imap_flags(flags: &Flags) -> Vec<ImapFlag<'static>> {
    flags.iter().map(into_imap_flag).collect()
}
