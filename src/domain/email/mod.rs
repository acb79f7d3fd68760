//! Email module.
//!
//! This module contains everything related to emails: the lossless
//! MIME tree and the armored PGP block locator.

pub mod armor;
pub use armor::{Armor, PGP_MESSAGE_BEGIN, PGP_MESSAGE_END};

pub mod mime;
pub use mime::{Body, Multipart, Part};

mod email;
pub use email::*;
