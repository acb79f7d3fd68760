// imap-repack, re-encrypt PGP messages of an IMAP mailbox.
// Copyright (C) 2022  soywod <clement.douin@posteo.net>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Transaction module.
//!
//! This module contains the per-email transaction: fetch, edit, then
//! write back by appending the new version before flagging the old
//! one for deletion.

use log::{debug, warn};
use std::result;
use thiserror::Error;

use crate::{backend, Backend, Email};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot select folder {1}")]
    SelectFolderError(#[source] backend::Error, String),
    #[error("cannot fetch email {1}")]
    FetchEmailError(#[source] backend::Error, u32),
    #[error("cannot append new version of email {1} to folder {2}")]
    AppendEmailError(#[source] backend::Error, u32, String),
    #[error("cannot flag email {1} as deleted, its new version was already appended")]
    AddDeletedFlagError(#[source] backend::Error, u32),
}

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum State {
    Clean,
    Dirty,
    Committed,
}

/// Represents the result of a committed transaction.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Commit {
    /// Nothing was written.
    Clean,
    /// The new version was appended and the original one flagged as
    /// deleted.
    Replaced,
}

/// Represents an email being edited.
///
/// The transaction starts clean. Only a dirty transaction writes
/// anything, and only when committed: dropping it is always a no-op
/// for the server.
pub struct EmailTransaction<'a> {
    backend: &'a mut dyn Backend,
    folder: String,
    email: Email,
    state: State,
}

impl<'a> EmailTransaction<'a> {
    /// Selects the folder then fetches the email.
    pub fn begin(backend: &'a mut dyn Backend, folder: &str, uid: u32) -> Result<Self> {
        backend
            .select_folder(folder)
            .map_err(|err| Error::SelectFolderError(err, folder.to_owned()))?;
        let raw = backend
            .fetch_email(uid)
            .map_err(|err| Error::FetchEmailError(err, uid))?;

        Ok(Self {
            backend,
            folder: folder.to_owned(),
            email: Email::from_raw(raw),
            state: State::Clean,
        })
    }

    pub fn email(&self) -> &Email {
        &self.email
    }

    pub fn email_mut(&mut self) -> &mut Email {
        &mut self.email
    }

    pub fn mark_dirty(&mut self) {
        self.state = State::Dirty;
    }

    pub fn mark_clean(&mut self) {
        self.state = State::Clean;
    }

    pub fn is_dirty(&self) -> bool {
        self.state == State::Dirty
    }

    /// Writes the email back if dirty. The original email is flagged
    /// as deleted only once the append succeeded, and is never
    /// expunged here.
    pub fn commit(mut self) -> Result<Commit> {
        let dirty = self.is_dirty();
        self.state = State::Committed;

        if !dirty {
            debug!("email {} is clean, nothing to commit", self.email.uid);
            return Ok(Commit::Clean);
        }

        let uid = self.email.uid;
        let flags = self.email.flags.clone_for_append();
        debug!("appending new version of email {} with flags {}", uid, flags);

        self.backend
            .append_email(
                &self.folder,
                &self.email.to_bytes(),
                &flags,
                self.email.internal_date,
            )
            .map_err(|err| Error::AppendEmailError(err, uid, self.folder.clone()))?;

        self.backend
            .add_deleted_flag(uid)
            .map_err(|err| Error::AddDeletedFlagError(err, uid))?;

        Ok(Commit::Replaced)
    }
}

impl Drop for EmailTransaction<'_> {
    fn drop(&mut self) {
        if self.state == State::Dirty {
            warn!(
                "email {} was modified but not committed, discarding changes",
                self.email.uid
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::DateTime;
    use std::collections::BTreeMap;

    use crate::{Flag, Flags, Folders, RawEmail};

    use super::*;

    /// Records every call made to the server.
    #[derive(Debug, Default)]
    pub(crate) struct FakeBackend {
        pub emails: BTreeMap<u32, RawEmail>,
        pub calls: Vec<String>,
        pub appended: Vec<(String, Vec<u8>, Flags)>,
        pub fail_append: bool,
        pub fail_search: bool,
        pub fail_expunge: bool,
    }

    impl FakeBackend {
        pub fn with_emails<I: IntoIterator<Item = RawEmail>>(emails: I) -> Self {
            Self {
                emails: emails.into_iter().map(|email| (email.uid, email)).collect(),
                ..Self::default()
            }
        }

        pub fn writes(&self) -> Vec<&String> {
            self.calls
                .iter()
                .filter(|call| {
                    call.starts_with("append") || call.starts_with("store") || *call == "expunge"
                })
                .collect()
        }
    }

    fn fake_error(msg: &str) -> backend::Error {
        backend::Error::CustomError(msg.to_owned().into())
    }

    impl Backend for FakeBackend {
        fn list_folders(&mut self) -> backend::Result<Folders> {
            Ok(Folders::default())
        }

        fn select_folder(&mut self, folder: &str) -> backend::Result<()> {
            self.calls.push(format!("select {}", folder));
            if folder == "missing" {
                return Err(fake_error("no such folder"));
            }
            Ok(())
        }

        fn search_uids(&mut self, query: &str) -> backend::Result<Vec<u32>> {
            self.calls.push(format!("search {}", query));
            if self.fail_search {
                return Err(fake_error("search failed"));
            }
            let pattern = query.split('"').nth(1).unwrap_or_default().to_owned();
            Ok(self
                .emails
                .values()
                .filter(|email| String::from_utf8_lossy(&email.raw).contains(&pattern))
                .map(|email| email.uid)
                .collect())
        }

        fn fetch_email(&mut self, uid: u32) -> backend::Result<RawEmail> {
            self.calls.push(format!("fetch {}", uid));
            self.emails
                .get(&uid)
                .cloned()
                .ok_or(backend::Error::FindEmailError(uid))
        }

        fn append_email(
            &mut self,
            folder: &str,
            raw: &[u8],
            flags: &Flags,
            _internal_date: Option<chrono::DateTime<chrono::FixedOffset>>,
        ) -> backend::Result<()> {
            self.calls.push(format!("append {}", folder));
            if self.fail_append {
                return Err(fake_error("mailbox full"));
            }
            self.appended
                .push((folder.to_owned(), raw.to_vec(), flags.clone()));
            Ok(())
        }

        fn add_deleted_flag(&mut self, uid: u32) -> backend::Result<()> {
            self.calls.push(format!("store {}", uid));
            if let Some(email) = self.emails.get_mut(&uid) {
                email.flags.insert(Flag::Deleted);
            }
            Ok(())
        }

        fn expunge(&mut self) -> backend::Result<()> {
            self.calls.push("expunge".into());
            if self.fail_expunge {
                return Err(fake_error("connection lost"));
            }
            self.emails
                .retain(|_, email| !email.flags.contains(&Flag::Deleted));
            Ok(())
        }

        fn close(&mut self) -> backend::Result<()> {
            Ok(())
        }
    }

    fn raw_email() -> RawEmail {
        RawEmail {
            uid: 7,
            flags: Flags::from_iter([Flag::Seen, Flag::Recent, Flag::custom("$Label1")]),
            internal_date: DateTime::parse_from_rfc2822("Tue, 1 Jul 2003 10:52:37 +0200").ok(),
            raw: b"Subject: hello\r\n\r\nbody\r\n".to_vec(),
        }
    }

    #[test]
    fn clean_commit_writes_nothing() {
        let mut backend = FakeBackend::with_emails([raw_email()]);

        let tx = EmailTransaction::begin(&mut backend, "INBOX", 7).unwrap();
        assert!(!tx.is_dirty());
        assert_eq!(Commit::Clean, tx.commit().unwrap());

        assert_eq!(vec!["select INBOX", "fetch 7"], backend.calls);
    }

    #[test]
    fn dirty_commit_appends_then_flags() {
        let mut backend = FakeBackend::with_emails([raw_email()]);

        let mut tx = EmailTransaction::begin(&mut backend, "INBOX", 7).unwrap();
        tx.email_mut().part.set_payload(b"new body\r\n".to_vec());
        tx.mark_dirty();
        assert_eq!(Commit::Replaced, tx.commit().unwrap());

        assert_eq!(
            vec!["select INBOX", "fetch 7", "append INBOX", "store 7"],
            backend.calls
        );
        let (folder, raw, flags) = &backend.appended[0];
        assert_eq!("INBOX", folder);
        assert_eq!(b"Subject: hello\r\n\r\nnew body\r\n".to_vec(), *raw);
        assert_eq!(
            &Flags::from_iter([Flag::Seen, Flag::custom("$Label1")]),
            flags
        );
    }

    #[test]
    fn failed_append_never_flags_original() {
        let mut backend = FakeBackend {
            fail_append: true,
            ..FakeBackend::with_emails([raw_email()])
        };

        let mut tx = EmailTransaction::begin(&mut backend, "INBOX", 7).unwrap();
        tx.mark_dirty();
        assert!(matches!(
            tx.commit(),
            Err(Error::AppendEmailError(_, 7, _))
        ));

        assert!(!backend.calls.iter().any(|call| call.starts_with("store")));
        assert!(!backend.emails[&7].flags.contains(&Flag::Deleted));
    }

    #[test]
    fn mark_clean_after_dirty() {
        let mut backend = FakeBackend::with_emails([raw_email()]);

        let mut tx = EmailTransaction::begin(&mut backend, "INBOX", 7).unwrap();
        tx.mark_dirty();
        tx.mark_clean();
        assert_eq!(Commit::Clean, tx.commit().unwrap());
        assert!(backend.writes().is_empty());
    }

    #[test]
    fn dropped_dirty_transaction_writes_nothing() {
        let mut backend = FakeBackend::with_emails([raw_email()]);

        let mut tx = EmailTransaction::begin(&mut backend, "INBOX", 7).unwrap();
        tx.mark_dirty();
        drop(tx);

        assert!(backend.writes().is_empty());
    }

    #[test]
    fn begin_fails_fast() {
        let mut backend = FakeBackend::with_emails([raw_email()]);

        assert!(matches!(
            EmailTransaction::begin(&mut backend, "missing", 7),
            Err(Error::SelectFolderError(_, folder)) if folder == "missing"
        ));
        assert!(matches!(
            EmailTransaction::begin(&mut backend, "INBOX", 8),
            Err(Error::FetchEmailError(_, 8))
        ));
        assert_eq!(
            vec!["select missing", "select INBOX", "fetch 8"],
            backend.calls
        );
    }
}
