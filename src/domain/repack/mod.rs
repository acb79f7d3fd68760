//! Repack module.
//!
//! This module contains the repack engine: the MIME walker, the
//! per-email transaction, the batch and the encrypted emails finder.

pub mod walker;
pub use walker::{RecipientError, Repacker};

pub mod transaction;
pub use transaction::{Commit, EmailTransaction};

pub mod batch;
pub use batch::{BatchRepacker, LogObserver, Outcome, RepackObserver, Report};

pub mod finder;
pub use finder::{search_encrypted, EncryptedEmails};
