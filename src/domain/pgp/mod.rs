//! PGP module.
//!
//! This module contains everything related to PGP: the contract with
//! the cryptographic engine, its gpg implementation and the recipient
//! set policy.

mod pgp;
pub use self::pgp::{Decrypted, Error, Pgp, Result, TrustModel};

pub mod config;
pub use config::PgpConfig;

pub mod gpg;
pub use gpg::GpgCmd;

pub mod recipients;
pub use recipients::{Fingerprint, Recipients, RecipientsPolicy, DEFAULT_EXCLUSION};
