//! Account module.
//!
//! This module contains everything related to the user accounts.

pub mod config;
pub use config::{AccountConfig, Config, DEFAULT_INBOX_FOLDER};
