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

//! MIME module.
//!
//! This module contains a lossless MIME part tree. Parsing never
//! fails: anything that cannot be understood as a multipart is kept
//! as an opaque leaf, and serializing an untouched tree gives back
//! the exact input bytes.

use log::{trace, warn};
use mailparse::MailHeaderMap;
use memchr::memchr_iter;

/// Maximum depth of multipart nesting. Deeper multiparts are kept as
/// leaves.
pub const MAX_DEPTH: usize = 64;

const DEFAULT_MIMETYPE: &str = "text/plain";
const DEFAULT_TRANSFER_ENCODING: &str = "7bit";

/// Represents a MIME part, either a leaf or a multipart.
#[derive(Debug, Clone)]
pub struct Part {
    /// The raw header block, separator line included.
    header: Vec<u8>,
    mimetype: String,
    encoding: String,
    pub body: Body,
}

#[derive(Debug, Clone)]
pub enum Body {
    Leaf(Vec<u8>),
    Multipart(Multipart),
}

/// Represents the body of a multipart. Delimiter lines and the bytes
/// surrounding the children are kept verbatim.
#[derive(Debug, Clone)]
pub struct Multipart {
    pub boundary: String,
    preamble: Vec<u8>,
    /// Each child with the delimiter line preceding it.
    parts: Vec<(Vec<u8>, Part)>,
    /// The close delimiter line and everything after it.
    epilogue: Vec<u8>,
}

impl Part {
    /// Parses the given raw bytes into a part tree.
    pub fn parse(raw: &[u8]) -> Self {
        Self::parse_at_depth(raw, 0)
    }

    fn parse_at_depth(raw: &[u8], depth: usize) -> Self {
        let (headers, offset) = match mailparse::parse_headers(raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("cannot parse part headers, keeping part as is: {}", err);
                return Self::opaque(raw);
            }
        };

        let (mimetype, boundary) = match headers.get_first_value("Content-Type") {
            Some(value) => {
                let mut ctype = mailparse::parse_content_type(&value);
                (ctype.mimetype, ctype.params.remove("boundary"))
            }
            None => (String::new(), None),
        };
        let mimetype = if mimetype.trim().is_empty() {
            DEFAULT_MIMETYPE.to_owned()
        } else {
            mimetype
        };
        let encoding = headers
            .get_first_value("Content-Transfer-Encoding")
            .map(|encoding| encoding.trim().to_lowercase())
            .unwrap_or_else(|| DEFAULT_TRANSFER_ENCODING.into());

        let header = raw[..offset].to_vec();
        let raw_body = &raw[offset..];

        let body = match &boundary {
            Some(boundary) if mimetype.starts_with("multipart/") => {
                if depth >= MAX_DEPTH {
                    warn!("multipart nested deeper than {}, keeping it as is", MAX_DEPTH);
                    Body::Leaf(raw_body.to_vec())
                } else {
                    Multipart::parse(raw_body, boundary, depth)
                        .map(Body::Multipart)
                        .unwrap_or_else(|| Body::Leaf(raw_body.to_vec()))
                }
            }
            _ => Body::Leaf(raw_body.to_vec()),
        };

        Self {
            header,
            mimetype,
            encoding,
            body,
        }
    }

    fn opaque(raw: &[u8]) -> Self {
        Self {
            header: Vec::new(),
            mimetype: DEFAULT_MIMETYPE.into(),
            encoding: DEFAULT_TRANSFER_ENCODING.into(),
            body: Body::Leaf(raw.to_vec()),
        }
    }

    /// Gets the lowercased MIME type, `text/plain` by default.
    pub fn mimetype(&self) -> &str {
        &self.mimetype
    }

    /// Gets the lowercased transfer encoding, `7bit` by default.
    pub fn transfer_encoding(&self) -> &str {
        &self.encoding
    }

    pub fn is_quoted_printable(&self) -> bool {
        self.encoding == "quoted-printable"
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.body, Body::Leaf(_))
    }

    /// Gets the first decoded value of the given header.
    pub fn header(&self, key: &str) -> Option<String> {
        mailparse::parse_headers(&self.header)
            .ok()
            .and_then(|(headers, _)| headers.get_first_value(key))
    }

    pub fn raw_header(&self) -> &[u8] {
        &self.header
    }

    /// Gets the raw payload of a leaf.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Leaf(payload) => Some(payload),
            Body::Multipart(_) => None,
        }
    }

    /// Replaces the raw payload of a leaf. Does nothing on
    /// multiparts.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        if let Body::Leaf(prev) = &mut self.body {
            *prev = payload;
        }
    }

    /// Gets the direct children of a multipart.
    pub fn children(&self) -> Vec<&Part> {
        match &self.body {
            Body::Leaf(_) => Vec::new(),
            Body::Multipart(multipart) => multipart.parts.iter().map(|(_, part)| part).collect(),
        }
    }

    /// Collects all the leaves depth-first, in document order.
    pub fn leaves_mut(&mut self) -> Vec<&mut Part> {
        let mut leaves = Vec::new();
        collect_leaves(self, &mut leaves);
        leaves
    }

    /// Serializes the part back to raw bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes);
        bytes
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.header);
        match &self.body {
            Body::Leaf(payload) => out.extend_from_slice(payload),
            Body::Multipart(multipart) => {
                out.extend_from_slice(&multipart.preamble);
                for (delimiter, part) in &multipart.parts {
                    out.extend_from_slice(delimiter);
                    part.write_to(out);
                }
                out.extend_from_slice(&multipart.epilogue);
            }
        }
    }
}

fn collect_leaves<'a>(part: &'a mut Part, leaves: &mut Vec<&'a mut Part>) {
    if part.is_leaf() {
        leaves.push(part);
    } else if let Body::Multipart(multipart) = &mut part.body {
        for (_, child) in multipart.parts.iter_mut() {
            collect_leaves(child, leaves);
        }
    }
}

#[derive(Debug)]
struct DelimiterLine {
    start: usize,
    end: usize,
    close: bool,
}

impl Multipart {
    /// Splits the given multipart body. Returns `None` when no
    /// delimiter line can be found.
    fn parse(body: &[u8], boundary: &str, depth: usize) -> Option<Self> {
        let delimiters = find_delimiter_lines(body, boundary);
        trace!("delimiter lines of boundary {:?}: {:?}", boundary, delimiters);

        let first = delimiters.first().filter(|line| !line.close)?;
        let preamble = body[..first.start].to_vec();

        let mut parts = Vec::new();
        for (i, line) in delimiters.iter().enumerate() {
            if line.close {
                break;
            }
            let end = delimiters
                .get(i + 1)
                .map(|next| next.start)
                .unwrap_or(body.len());
            let delimiter = body[line.start..line.end].to_vec();
            let part = Part::parse_at_depth(&body[line.end..end], depth + 1);
            parts.push((delimiter, part));
        }

        let epilogue = delimiters
            .iter()
            .find(|line| line.close)
            .map(|line| body[line.start..].to_vec())
            .unwrap_or_default();

        Some(Self {
            boundary: boundary.to_owned(),
            preamble,
            parts,
            epilogue,
        })
    }
}

/// Finds the delimiter lines of the given boundary, up to and
/// including the close delimiter.
fn find_delimiter_lines(body: &[u8], boundary: &str) -> Vec<DelimiterLine> {
    let delimiter = format!("--{}", boundary);
    let close_delimiter = format!("--{}--", boundary);
    let mut lines = Vec::new();
    let mut start = 0;

    let line_ends = memchr_iter(b'\n', body)
        .map(|pos| pos + 1)
        .chain((body.last() != Some(&b'\n')).then(|| body.len()));

    for end in line_ends {
        if start >= end {
            break;
        }
        let line = trim_line(&body[start..end]);
        if line == close_delimiter.as_bytes() {
            lines.push(DelimiterLine {
                start,
                end,
                close: true,
            });
            break;
        }
        if line == delimiter.as_bytes() {
            lines.push(DelimiterLine {
                start,
                end,
                close: false,
            });
        }
        start = end;
    }

    lines
}

/// Trims the line ending and the transport padding of a line.
fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b'\n' | b' ' | b'\t') {
        end -= 1;
    }
    &line[..end]
}
