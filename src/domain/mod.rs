pub mod account;
pub use account::{AccountConfig, Config, DEFAULT_INBOX_FOLDER};

pub mod email;
pub use email::{Armor, Body, Email, Multipart, Part};

pub mod flag;
pub use flag::{Flag, Flags};

pub mod folder;
pub use folder::{Folder, Folders};

pub mod pgp;
pub use pgp::{
    Decrypted, Fingerprint, GpgCmd, Pgp, PgpConfig, Recipients, RecipientsPolicy, TrustModel,
};

pub mod repack;
pub use repack::{
    search_encrypted, BatchRepacker, EmailTransaction, EncryptedEmails, LogObserver, Outcome,
    RepackObserver, Repacker, Report,
};
