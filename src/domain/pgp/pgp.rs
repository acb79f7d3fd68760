//! PGP module.
//!
//! This module exposes the PGP trait, the contract the repack engine
//! has with the external cryptographic engine.

use std::result;
use thiserror::Error;

use crate::{process, Recipients};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot decrypt message: no secret key available")]
    NoSecretKeyError,
    #[error("cannot decrypt message: {0}")]
    DecryptionError(String),
    #[error("cannot decrypt message: decrypted data is empty")]
    EmptyPlaintextError,
    #[error("cannot encrypt message: {0}")]
    EncryptionError(String),
    #[error("cannot encrypt message: recipient list is empty")]
    EmptyRecipientsError,
    #[error("cannot run gpg")]
    RunGpgError(#[source] process::Error),
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn is_no_secret_key(&self) -> bool {
        matches!(self, Self::NoSecretKeyError)
    }
}

/// Represents the trust model used when encrypting.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum TrustModel {
    /// Requires a valid trust path to every recipient key.
    #[default]
    Default,
    /// Trusts every recipient key.
    Always,
}

/// Represents a successfully decrypted message.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Decrypted {
    pub plaintext: Vec<u8>,
    /// The keys the message was actually encrypted to, as reported
    /// by the engine.
    pub recipients: Recipients,
}

pub trait Pgp: Send + Sync {
    /// Decrypts the given armored message. Empty plaintext is an
    /// error.
    fn decrypt(&self, armored: &[u8]) -> Result<Decrypted>;

    /// Encrypts the given plaintext for every recipient and returns
    /// the armored message. Fails if one recipient key is unusable.
    fn encrypt(&self, plaintext: &[u8], recipients: &Recipients, trust: TrustModel)
        -> Result<Vec<u8>>;
}
