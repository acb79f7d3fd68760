//! Backend module.
//!
//! This module exposes the backend trait, the mail-protocol session
//! the repack engine drives. It can be used to create custom backend
//! implementations.

use chrono::{DateTime, FixedOffset};
use std::{error, result};
use thiserror::Error;

use crate::{Flags, Folders};

#[cfg(feature = "imap-backend")]
use crate::backend;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find email {0}")]
    FindEmailError(u32),
    #[error("cannot get body of email {0}")]
    GetEmailBodyError(u32),

    #[cfg(feature = "imap-backend")]
    #[error(transparent)]
    ImapBackendError(#[from] backend::imap::Error),
    #[error(transparent)]
    CustomError(#[from] Box<dyn error::Error + Send + Sync>),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents an email as fetched from the server.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RawEmail {
    pub uid: u32,
    pub flags: Flags,
    pub internal_date: Option<DateTime<FixedOffset>>,
    pub raw: Vec<u8>,
}

/// Represents one stateful session: every method acts on the folder
/// selected last, hence the exclusive borrows.
pub trait Backend {
    fn list_folders(&mut self) -> Result<Folders>;
    fn select_folder(&mut self, folder: &str) -> Result<()>;

    /// Searches the selected folder, returns matching UIDs.
    fn search_uids(&mut self, query: &str) -> Result<Vec<u32>>;
    /// Fetches flags, internal date and full body of the given UID
    /// without marking it as seen.
    fn fetch_email(&mut self, uid: u32) -> Result<RawEmail>;
    fn append_email(
        &mut self,
        folder: &str,
        raw: &[u8],
        flags: &Flags,
        internal_date: Option<DateTime<FixedOffset>>,
    ) -> Result<()>;
    /// Marks the given UID of the selected folder as deleted.
    fn add_deleted_flag(&mut self, uid: u32) -> Result<()>;
    /// Permanently removes emails marked as deleted from the selected
    /// folder.
    fn expunge(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}
