//! Flag module.
//!
//! This module contains everything related to email flags.

pub mod flag;
pub use flag::*;

pub mod flags;
pub use flags::*;
