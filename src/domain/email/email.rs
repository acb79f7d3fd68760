use chrono::{DateTime, FixedOffset};

use crate::{Flags, Part, RawEmail};

/// Represents an email fetched from a folder, with its MIME tree.
#[derive(Debug, Clone)]
pub struct Email {
    /// Represents the UID of the email inside its folder.
    pub uid: u32,
    /// Represents the flags at fetch time.
    pub flags: Flags,
    /// Represents the arrival date known by the server.
    pub internal_date: Option<DateTime<FixedOffset>>,
    /// Represents the root part of the email.
    pub part: Part,
}

impl Email {
    pub fn from_raw(raw: RawEmail) -> Self {
        Self {
            uid: raw.uid,
            flags: raw.flags,
            internal_date: raw.internal_date,
            part: Part::parse(&raw.raw),
        }
    }

    pub fn from(&self) -> String {
        self.part.header("From").unwrap_or_default()
    }

    pub fn subject(&self) -> String {
        self.part.header("Subject").unwrap_or_default()
    }

    pub fn date(&self) -> String {
        self.part.header("Date").unwrap_or_default()
    }

    /// Serializes the email back to raw bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.part.to_bytes()
    }
}
