//! IMAP backend module.
//!
//! This module contains everything related to the IMAP session.

#[cfg(feature = "imap-backend")]
mod backend;
#[cfg(feature = "imap-backend")]
pub use backend::*;

pub mod config;
pub use config::ImapConfig;

#[cfg(feature = "imap-backend")]
pub mod imap_flags;
