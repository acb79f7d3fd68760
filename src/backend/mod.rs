mod backend;
pub use self::backend::{Backend, Error, RawEmail, Result};

pub mod imap;
pub use self::imap::ImapConfig;
#[cfg(feature = "imap-backend")]
pub use self::imap::ImapBackend;
