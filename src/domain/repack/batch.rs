//! Batch module.
//!
//! This module repacks a list of emails of one folder. Every email
//! gets its own transaction, and the failure of one email never
//! stops the batch.

use log::{debug, info, warn};
use std::{
    collections::BTreeMap,
    error, fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    repack::{
        transaction::{Commit, EmailTransaction},
        walker::{self, RecipientError, Repacker},
    },
    Backend, Email,
};

/// Represents what happened to one email of the batch.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Outcome {
    Repacked,
    SkippedNoSecretKey,
    SkippedNotRecipient,
    SkippedIdenticalRecipients,
    SkippedNoEnvelope,
    Failed(String),
}

impl Outcome {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Repacked => "repacked",
            Self::SkippedNoSecretKey => "skipped (no secret key)",
            Self::SkippedNotRecipient => "skipped (not a recipient)",
            Self::SkippedIdenticalRecipients => "skipped (identical recipients)",
            Self::SkippedNoEnvelope => "skipped (no armored message)",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    fn from_walker_error(err: walker::Error) -> Self {
        match err {
            walker::Error::PgpError(err) if err.is_no_secret_key() => Self::SkippedNoSecretKey,
            walker::Error::RecipientError(RecipientError::NotIntendedRecipient(..)) => {
                Self::SkippedNotRecipient
            }
            walker::Error::RecipientError(RecipientError::IdenticalRecipients(..)) => {
                Self::SkippedIdenticalRecipients
            }
            err => Self::Failed(error_chain(&err)),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {}", reason),
            outcome => write!(f, "{}", outcome.name()),
        }
    }
}

/// Joins the messages of an error and all its sources.
fn error_chain(err: &dyn error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        msg.push_str(": ");
        msg.push_str(&err.to_string());
        source = err.source();
    }
    msg
}

/// Represents the result of a batch.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Report {
    /// Outcome of every processed email, in processing order.
    pub outcomes: Vec<(u32, Outcome)>,
    /// Whether the folder was expunged.
    pub compacted: bool,
    pub compact_error: Option<String>,
    /// Whether the batch was cancelled before its end.
    pub cancelled: bool,
}

impl Report {
    /// Counts outcomes by name.
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for (_, outcome) in &self.outcomes {
            *counts.entry(outcome.name()).or_insert(0) += 1;
        }
        counts
    }

    pub fn count<F: Fn(&Outcome) -> bool>(&self, predicate: F) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| predicate(outcome))
            .count()
    }

    /// Only failed emails count as failures, skipped ones do not.
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|(_, outcome)| outcome.is_failure())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let counts = self
            .counts()
            .into_iter()
            .map(|(name, count)| format!("{}: {}", name, count))
            .collect::<Vec<_>>();
        write!(f, "{} email(s) processed", self.outcomes.len())?;
        if !counts.is_empty() {
            write!(f, " ({})", counts.join(", "))?;
        }
        if self.cancelled {
            write!(f, ", cancelled")?;
        }
        if let Some(err) = &self.compact_error {
            write!(f, ", cannot expunge folder: {}", err)?;
        }
        Ok(())
    }
}

/// Receives the batch progress. Every method does nothing by
/// default.
pub trait RepackObserver {
    /// Called once the email is fetched, before it is repacked.
    fn on_email(&mut self, _email: &Email) {}
    fn on_outcome(&mut self, _uid: u32, _outcome: &Outcome) {}
    /// Called in dry run mode with the email as it would have been
    /// written back.
    fn on_dry_run(&mut self, _uid: u32, _raw: &[u8]) {}
    fn on_compact(&mut self, _result: Result<(), &str>) {}
}

impl<T: RepackObserver + ?Sized> RepackObserver for &mut T {
    fn on_email(&mut self, email: &Email) {
        (**self).on_email(email)
    }

    fn on_outcome(&mut self, uid: u32, outcome: &Outcome) {
        (**self).on_outcome(uid, outcome)
    }

    fn on_dry_run(&mut self, uid: u32, raw: &[u8]) {
        (**self).on_dry_run(uid, raw)
    }

    fn on_compact(&mut self, result: Result<(), &str>) {
        (**self).on_compact(result)
    }
}

/// Observer logging the batch progress.
#[derive(Debug, Default)]
pub struct LogObserver;

impl RepackObserver for LogObserver {
    fn on_email(&mut self, email: &Email) {
        debug!(
            "email {}: from {:?}, subject {:?}",
            email.uid,
            email.from(),
            email.subject()
        );
    }

    fn on_outcome(&mut self, uid: u32, outcome: &Outcome) {
        if outcome.is_failure() {
            warn!("email {}: {}", uid, outcome);
        } else {
            info!("email {}: {}", uid, outcome);
        }
    }

    fn on_dry_run(&mut self, uid: u32, raw: &[u8]) {
        info!("email {}: dry run, {} bytes not written back", uid, raw.len());
    }

    fn on_compact(&mut self, result: Result<(), &str>) {
        match result {
            Ok(()) => info!("folder expunged"),
            Err(err) => warn!("cannot expunge folder: {}", err),
        }
    }
}

pub struct BatchRepacker<'a> {
    backend: &'a mut dyn Backend,
    repacker: &'a Repacker<'a>,
    observer: Box<dyn RepackObserver + 'a>,
    cancel: Arc<AtomicBool>,
}

impl<'a> BatchRepacker<'a> {
    pub fn new(backend: &'a mut dyn Backend, repacker: &'a Repacker<'a>) -> Self {
        Self {
            backend,
            repacker,
            observer: Box::new(LogObserver),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn observer<O: RepackObserver + 'a>(mut self, observer: O) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Gets the flag cancelling the batch when set. The email being
    /// processed is finished first, then the folder is still
    /// expunged.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Repacks the given emails of the given folder, then expunges the
    /// folder once if at least one email was replaced.
    pub fn run(&mut self, folder: &str, uids: &[u32]) -> Report {
        info!("repacking {} email(s) from folder {}", uids.len(), folder);

        let mut report = Report::default();
        let mut replaced = 0;

        for &uid in uids {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("batch cancelled, {} email(s) left", uids.len() - report.outcomes.len());
                report.cancelled = true;
                break;
            }

            let (outcome, commit) = self.process(folder, uid);
            if commit == Some(Commit::Replaced) {
                replaced += 1;
            }
            self.observer.on_outcome(uid, &outcome);
            report.outcomes.push((uid, outcome));
        }

        if !self.repacker.is_dry_run() && replaced > 0 {
            debug!("expunging folder {} ({} email(s) replaced)", folder, replaced);
            match self.backend.expunge() {
                Ok(()) => {
                    report.compacted = true;
                    self.observer.on_compact(Ok(()));
                }
                Err(err) => {
                    let err = error_chain(&err);
                    self.observer.on_compact(Err(err.as_str()));
                    report.compact_error = Some(err);
                }
            }
        }

        report
    }

    fn process(&mut self, folder: &str, uid: u32) -> (Outcome, Option<Commit>) {
        let mut tx = match EmailTransaction::begin(&mut *self.backend, folder, uid) {
            Ok(tx) => tx,
            Err(err) => return (Outcome::Failed(error_chain(&err)), None),
        };
        self.observer.on_email(tx.email());

        let outcome = match self.repacker.repack_email(tx.email_mut()) {
            Ok(0) => Outcome::SkippedNoEnvelope,
            Ok(_) if self.repacker.is_dry_run() => {
                self.observer.on_dry_run(uid, &tx.email().to_bytes());
                Outcome::Repacked
            }
            Ok(_) => {
                tx.mark_dirty();
                Outcome::Repacked
            }
            Err(err) => {
                tx.mark_clean();
                Outcome::from_walker_error(err)
            }
        };

        match tx.commit() {
            Ok(commit) => (outcome, Some(commit)),
            Err(err) => (Outcome::Failed(error_chain(&err)), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        repack::{
            transaction::tests::FakeBackend,
            walker::tests::{fake_armor, FakePgp, CORRUPT, HANGING, UNENCRYPTABLE},
        },
        RawEmail, RecipientsPolicy,
    };

    use super::*;

    fn raw_email(uid: u32, recipients: &[&str]) -> RawEmail {
        raw_email_with(uid, recipients, "secret")
    }

    fn raw_email_with(uid: u32, recipients: &[&str], plaintext: &str) -> RawEmail {
        RawEmail {
            uid,
            raw: format!("Subject: {}\r\n\r\n{}", uid, fake_armor(recipients, plaintext)).into_bytes(),
            ..RawEmail::default()
        }
    }

    fn policy() -> RecipientsPolicy {
        RecipientsPolicy {
            add: ["BBBB"].into_iter().collect(),
            ..RecipientsPolicy::default()
        }
    }

    #[derive(Default)]
    struct Recorder {
        outcomes: Vec<(u32, Outcome)>,
        dry_runs: Vec<u32>,
        compacts: usize,
    }

    impl RepackObserver for Recorder {
        fn on_outcome(&mut self, uid: u32, outcome: &Outcome) {
            self.outcomes.push((uid, outcome.clone()));
        }

        fn on_dry_run(&mut self, uid: u32, _raw: &[u8]) {
            self.dry_runs.push(uid);
        }

        fn on_compact(&mut self, _result: Result<(), &str>) {
            self.compacts += 1;
        }
    }

    #[test]
    fn outcomes_and_single_expunge() {
        let pgp = FakePgp::new("AAAA");
        let repacker = Repacker::new(&pgp).policy(policy());
        let mut backend = FakeBackend::with_emails([
            raw_email(1, &["AAAA"]),
            raw_email(2, &["CCCC"]),
            raw_email(3, &["AAAA", "BBBB"]),
            RawEmail {
                uid: 4,
                raw: b"Subject: plain\r\n\r\nhi\r\n".to_vec(),
                ..RawEmail::default()
            },
            raw_email(5, &["AAAA"]),
        ]);
        let mut recorder = Recorder::default();

        let report = BatchRepacker::new(&mut backend, &repacker)
            .observer(&mut recorder)
            .run("INBOX", &[1, 2, 3, 4, 5, 6]);

        assert_eq!(
            vec![
                (1, Outcome::Repacked),
                (2, Outcome::SkippedNoSecretKey),
                (3, Outcome::SkippedIdenticalRecipients),
                (4, Outcome::SkippedNoEnvelope),
                (5, Outcome::Repacked),
                (6, Outcome::Failed("cannot fetch email 6: cannot find email 6".into())),
            ],
            report.outcomes
        );
        assert!(report.compacted);
        assert!(report.has_failures());
        assert_eq!(report.outcomes, recorder.outcomes);
        assert_eq!(1, recorder.compacts);
        assert_eq!(
            1,
            backend.calls.iter().filter(|call| *call == "expunge").count()
        );
        assert_eq!(2, backend.appended.len());
    }

    #[test]
    fn dry_run_writes_nothing() {
        let pgp = FakePgp::new("AAAA");
        let repacker = Repacker::new(&pgp).policy(policy()).dry_run(true);
        let mut backend =
            FakeBackend::with_emails([raw_email(1, &["AAAA"]), raw_email(2, &["CCCC"])]);
        let mut recorder = Recorder::default();

        let report = BatchRepacker::new(&mut backend, &repacker)
            .observer(&mut recorder)
            .run("INBOX", &[1, 2]);

        assert_eq!(1, report.count(|outcome| *outcome == Outcome::Repacked));
        assert!(!report.compacted);
        assert_eq!(vec![1], recorder.dry_runs);
        assert!(backend.writes().is_empty());
    }

    #[test]
    fn nothing_replaced_means_no_expunge() {
        let pgp = FakePgp::new("AAAA");
        let repacker = Repacker::new(&pgp).policy(policy());
        let mut backend = FakeBackend::with_emails([raw_email(1, &["CCCC"])]);

        let report = BatchRepacker::new(&mut backend, &repacker).run("INBOX", &[1]);

        assert!(!report.compacted);
        assert!(!report.has_failures());
        assert!(backend.writes().is_empty());
    }

    #[test]
    fn cancelled_batch_still_expunges() {
        let pgp = FakePgp::new("AAAA");
        let repacker = Repacker::new(&pgp).policy(policy());
        let mut backend =
            FakeBackend::with_emails([raw_email(1, &["AAAA"]), raw_email(2, &["AAAA"])]);

        struct CancelAfterFirst(Arc<AtomicBool>);
        impl RepackObserver for CancelAfterFirst {
            fn on_outcome(&mut self, _uid: u32, _outcome: &Outcome) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let batch = BatchRepacker::new(&mut backend, &repacker);
        let cancel = batch.cancel_flag();
        let mut batch = batch.observer(CancelAfterFirst(cancel));
        let report = batch.run("INBOX", &[1, 2]);

        assert!(report.cancelled);
        assert_eq!(vec![(1, Outcome::Repacked)], report.outcomes);
        assert!(report.compacted);
    }

    #[test]
    fn expunge_failure_is_reported() {
        let pgp = FakePgp::new("AAAA");
        let repacker = Repacker::new(&pgp).policy(policy());
        let mut backend = FakeBackend {
            fail_expunge: true,
            ..FakeBackend::with_emails([raw_email(1, &["AAAA"])])
        };
        let mut recorder = Recorder::default();

        let report = BatchRepacker::new(&mut backend, &repacker)
            .observer(&mut recorder)
            .run("INBOX", &[1]);

        assert_eq!(vec![(1, Outcome::Repacked)], report.outcomes);
        assert!(!report.compacted);
        assert!(!report.has_failures());
        assert_eq!(
            Some("connection lost".to_owned()),
            report.compact_error
        );
        assert_eq!(1, recorder.compacts);
        assert!(report.to_string().ends_with(", cannot expunge folder: connection lost"));
    }

    #[test]
    fn engine_errors_fail_one_email_only() {
        let pgp = FakePgp::new("AAAA");
        let repacker = Repacker::new(&pgp).policy(policy());
        let mut backend = FakeBackend::with_emails([
            raw_email_with(1, &["AAAA"], CORRUPT),
            raw_email_with(2, &["AAAA"], UNENCRYPTABLE),
            raw_email_with(3, &["AAAA"], HANGING),
            raw_email(4, &["AAAA"]),
        ]);

        let report = BatchRepacker::new(&mut backend, &repacker).run("INBOX", &[1, 2, 3, 4]);

        assert_eq!(
            vec![
                (
                    1,
                    Outcome::Failed("cannot decrypt message: invalid packet".into())
                ),
                (
                    2,
                    Outcome::Failed("cannot encrypt message: unusable public key".into())
                ),
                (
                    3,
                    Outcome::Failed(
                        "cannot run gpg: command \"gpg\" timed out after 60s".into()
                    )
                ),
                (4, Outcome::Repacked),
            ],
            report.outcomes
        );
        assert!(report.has_failures());
        assert!(report.compacted);

        // only the last email was written back
        assert_eq!(1, backend.appended.len());
        let writes: Vec<&str> = backend.writes().into_iter().map(String::as_str).collect();
        assert_eq!(vec!["append INBOX", "store 4", "expunge"], writes);
    }

    #[test]
    fn report_display() {
        let report = Report {
            outcomes: vec![
                (1, Outcome::Repacked),
                (2, Outcome::Repacked),
                (3, Outcome::SkippedNoSecretKey),
            ],
            ..Report::default()
        };

        assert_eq!(
            "3 email(s) processed (repacked: 2, skipped (no secret key): 1)",
            report.to_string()
        );
    }
}
