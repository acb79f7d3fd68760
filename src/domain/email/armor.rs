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

//! Armor module.
//!
//! This module locates the ASCII-armored PGP message inside the raw
//! payload of a leaf part and splits the payload around it.

use memchr::memmem;

pub const PGP_MESSAGE_BEGIN: &str = "-----BEGIN PGP MESSAGE-----\r\n";
pub const PGP_MESSAGE_END: &str = "-----END PGP MESSAGE-----\r\n";

/// Represents a payload split around its first armored block.
///
/// Invariant: `prefix + body + suffix` is the original payload.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Armor<'a> {
    /// Everything before the begin marker line.
    pub prefix: &'a [u8],
    /// The begin marker line through the end marker line, inclusive.
    pub body: &'a [u8],
    /// Everything after the end marker line.
    pub suffix: &'a [u8],
}

impl<'a> Armor<'a> {
    /// Locates the first `begin` marker and the first `end` marker
    /// at or after it. Returns `None` when one of them is missing,
    /// partial armor included.
    pub fn locate(payload: &'a [u8], begin: &str, end: &str) -> Option<Self> {
        let start = memmem::find(payload, begin.as_bytes())?;
        let end = start
            + begin.len()
            + memmem::find(&payload[start + begin.len()..], end.as_bytes())?
            + end.len();

        Some(Self {
            prefix: &payload[..start],
            body: &payload[start..end],
            suffix: &payload[end..],
        })
    }

    /// Locates a `PGP MESSAGE` armored block.
    ///
    /// Only the first block of the payload is located: payloads
    /// holding several messages keep the following ones untouched.
    pub fn locate_pgp_message(payload: &'a [u8]) -> Option<Self> {
        Self::locate(payload, PGP_MESSAGE_BEGIN, PGP_MESSAGE_END)
    }

    /// Builds a new payload made of the prefix, the given body and
    /// the suffix.
    pub fn splice(&self, body: &[u8]) -> Vec<u8> {
        let mut payload =
            Vec::with_capacity(self.prefix.len() + body.len() + self.suffix.len());
        payload.extend_from_slice(self.prefix);
        payload.extend_from_slice(body);
        payload.extend_from_slice(self.suffix);
        payload
    }
}

/// Undoes the damage some mail clients do to armored text sent with
/// the quoted-printable transfer encoding: escaped equal signs and
/// encoded trailing spaces.
///
/// Only meant for parts declared as quoted-printable: in any other
/// part a checksum line starting with `=3D` is genuine armor and would
/// be corrupted.
pub fn repair_quoted_printable(body: &[u8]) -> Vec<u8> {
    let body = replace(body, b"=3D", b"=");
    replace(&body, b"=20\r\n", b"\r\n")
}

/// Escapes equal signs so that armored text survives inside a
/// quoted-printable leaf. Armor lines are short enough to never need
/// soft line breaks.
pub fn escape_quoted_printable(body: &[u8]) -> Vec<u8> {
    replace(body, b"=", b"=3D")
}

/// Converts line endings of the given text to CRLF when `crlf` is
/// set, or to LF otherwise.
pub fn normalize_line_endings(text: &[u8], crlf: bool) -> Vec<u8> {
    let text = replace(text, b"\r\n", b"\n");
    if crlf {
        replace(&text, b"\n", b"\r\n")
    } else {
        text
    }
}

fn replace(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let finder = memmem::Finder::new(from);
    let mut out = Vec::with_capacity(haystack.len());
    let mut cursor = 0;

    for pos in finder.find_iter(haystack) {
        out.extend_from_slice(&haystack[cursor..pos]);
        out.extend_from_slice(to);
        cursor = pos + from.len();
    }
    out.extend_from_slice(&haystack[cursor..]);

    out
}
