//! Finder module.
//!
//! This module searches a folder for PGP encrypted emails.

use log::{debug, warn};
use std::{collections::BTreeSet, result};
use thiserror::Error;

use crate::{backend, Backend};

/// Matches PGP/MIME emails.
pub const MIME_QUERY: &str = "HEADER Content-Type \"pgp-encrypted\"";
/// Matches inline PGP emails.
pub const INLINE_QUERY: &str = "BODY \"-----BEGIN PGP MESSAGE-----\"";

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot select folder {1}")]
    SelectFolderError(#[source] backend::Error, String),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the encrypted emails of a folder, by kind. An email
/// matching both queries appears in both lists.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct EncryptedEmails {
    pub mime: Vec<u32>,
    pub inline: Vec<u32>,
}

impl EncryptedEmails {
    /// Gets the sorted union of both lists.
    pub fn all(&self) -> Vec<u32> {
        self.mime
            .iter()
            .chain(self.inline.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.mime.is_empty() && self.inline.is_empty()
    }
}

/// Searches the given folder for encrypted emails. A failing query
/// is logged and gives an empty list.
pub fn search_encrypted(backend: &mut dyn Backend, folder: &str) -> Result<EncryptedEmails> {
    backend
        .select_folder(folder)
        .map_err(|err| Error::SelectFolderError(err, folder.to_owned()))?;

    let mut search = |query: &str| {
        backend.search_uids(query).unwrap_or_else(|err| {
            warn!("cannot search emails with query {}: {}", query, err);
            Vec::new()
        })
    };

    let emails = EncryptedEmails {
        mime: search(MIME_QUERY),
        inline: search(INLINE_QUERY),
    };
    debug!("encrypted emails of folder {}: {:?}", folder, emails);

    Ok(emails)
}
