//! Walker module.
//!
//! This module walks the MIME tree of an email and repacks every
//! leaf holding an armored PGP message.

use log::{debug, trace};
use std::result;
use thiserror::Error;

use crate::{
    email::armor::{self, Armor},
    pgp, Email, Fingerprint, Part, Pgp, Recipients, RecipientsPolicy, TrustModel,
};

/// Represents the reasons for not repacking a message whose armor
/// could be decrypted.
#[derive(Debug, Error)]
pub enum RecipientError {
    #[error("message is not encrypted to {0} (encrypted to: {1})")]
    NotIntendedRecipient(Fingerprint, Recipients),
    #[error("recipients would not change (encrypted to: {0})")]
    IdenticalRecipients(Recipients),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    PgpError(#[from] pgp::Error),
    #[error(transparent)]
    RecipientError(#[from] RecipientError),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the repack settings shared by every message of a batch.
pub struct Repacker<'a> {
    pgp: &'a dyn Pgp,
    policy: RecipientsPolicy,
    only_for: Option<Fingerprint>,
    trust: TrustModel,
    dry_run: bool,
}

impl<'a> Repacker<'a> {
    pub fn new(pgp: &'a dyn Pgp) -> Self {
        Self {
            pgp,
            policy: RecipientsPolicy::default(),
            only_for: None,
            trust: TrustModel::default(),
            dry_run: false,
        }
    }

    pub fn policy(mut self, policy: RecipientsPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Only repacks messages encrypted to the given key.
    pub fn only_for(mut self, fpr: Option<Fingerprint>) -> Self {
        self.only_for = fpr;
        self
    }

    pub fn trust(mut self, trust: TrustModel) -> Self {
        self.trust = trust;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Repacks the given email in place and returns the number of
    /// rewritten leaves. The first error aborts the walk: the tree may
    /// then be partially rewritten and must not be written back.
    pub fn repack_email(&self, email: &mut Email) -> Result<usize> {
        debug!("repacking email {}", email.uid);
        self.repack_part(&mut email.part)
    }

    /// Repacks every leaf of the given part, depth-first.
    pub fn repack_part(&self, part: &mut Part) -> Result<usize> {
        let mut count = 0;

        for leaf in part.leaves_mut() {
            let payload = match self.repack_leaf(leaf)? {
                Some(payload) => payload,
                None => continue,
            };
            leaf.set_payload(payload);
            count += 1;
        }

        Ok(count)
    }

    fn repack_leaf(&self, leaf: &Part) -> Result<Option<Vec<u8>>> {
        let qp = leaf.is_quoted_printable();
        let armor = match leaf.payload().and_then(Armor::locate_pgp_message) {
            Some(armor) => armor,
            None => return Ok(None),
        };
        trace!("found armored message in {} leaf", leaf.mimetype());

        let body = if qp {
            armor::repair_quoted_printable(armor.body)
        } else {
            armor.body.to_vec()
        };

        let decrypted = self.pgp.decrypt(&body)?;
        let current = &decrypted.recipients;

        if let Some(fpr) = &self.only_for {
            if !current.contains(fpr) {
                return Err(RecipientError::NotIntendedRecipient(fpr.clone(), current.clone()).into());
            }
        }

        let next = self.policy.compute(current);
        if &next == current {
            return Err(RecipientError::IdenticalRecipients(next).into());
        }
        debug!("re-encrypting from [{}] to [{}]", current, next);

        let encrypted = self.pgp.encrypt(&decrypted.plaintext, &next, self.trust)?;
        let mut encrypted = armor::normalize_line_endings(&encrypted, true);
        if qp {
            encrypted = armor::escape_quoted_printable(&encrypted);
        }

        Ok(Some(armor.splice(&encrypted)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use crate::{pgp::Decrypted, process, RawEmail};

    use super::*;

    /// Plaintext the fake engine fails to decrypt.
    pub(crate) const CORRUPT: &str = "corrupt";
    /// Plaintext whose decryption never ends.
    pub(crate) const HANGING: &str = "hanging";
    /// Plaintext the fake engine fails to encrypt.
    pub(crate) const UNENCRYPTABLE: &str = "unencryptable";

    /// Fake engine: an armored message is `to:<fprs>` followed by the
    /// plaintext. Only messages encrypted to `secret` can be decrypted.
    pub(crate) struct FakePgp {
        pub secret: Fingerprint,
        pub encrypt_calls: AtomicUsize,
    }

    impl FakePgp {
        pub fn new(secret: &str) -> Self {
            Self {
                secret: secret.into(),
                encrypt_calls: AtomicUsize::new(0),
            }
        }

        pub fn encrypt_calls(&self) -> usize {
            self.encrypt_calls.load(Ordering::SeqCst)
        }
    }

    pub(crate) fn fake_armor(recipients: &[&str], plaintext: &str) -> String {
        format!(
            "-----BEGIN PGP MESSAGE-----\r\nto:{}\r\n{}\r\n-----END PGP MESSAGE-----\r\n",
            recipients.join(","),
            plaintext
        )
    }

    impl Pgp for FakePgp {
        fn decrypt(&self, armored: &[u8]) -> pgp::Result<Decrypted> {
            let text = String::from_utf8_lossy(armored).replace("\r\n", "\n");
            let mut lines = text.lines().skip(1);
            let recipients: Recipients = lines
                .next()
                .and_then(|line| line.strip_prefix("to:"))
                .ok_or_else(|| pgp::Error::DecryptionError("corrupt armor".into()))?
                .split(',')
                .filter(|fpr| !fpr.is_empty())
                .collect();
            let plaintext = lines.next().unwrap_or_default();

            if !recipients.contains(&self.secret) {
                return Err(pgp::Error::NoSecretKeyError);
            }
            match plaintext {
                "" => return Err(pgp::Error::EmptyPlaintextError),
                CORRUPT => return Err(pgp::Error::DecryptionError("invalid packet".into())),
                HANGING => {
                    let err = process::Error::TimeoutError("gpg".into(), Duration::from_secs(60));
                    return Err(pgp::Error::RunGpgError(err));
                }
                _ => (),
            }

            Ok(Decrypted {
                plaintext: plaintext.as_bytes().to_vec(),
                recipients,
            })
        }

        fn encrypt(
            &self,
            plaintext: &[u8],
            recipients: &Recipients,
            _trust: TrustModel,
        ) -> pgp::Result<Vec<u8>> {
            self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
            if plaintext == UNENCRYPTABLE.as_bytes() {
                return Err(pgp::Error::EncryptionError("unusable public key".into()));
            }
            let fprs: Vec<&str> = recipients.iter().map(|fpr| fpr.as_str()).collect();
            let armor = fake_armor(&fprs, &String::from_utf8_lossy(plaintext));
            // gpg outputs LF line endings
            Ok(armor.replace("\r\n", "\n").into_bytes())
        }
    }

    fn email(raw: &str) -> Email {
        Email::from_raw(RawEmail {
            uid: 1,
            raw: raw.as_bytes().to_vec(),
            ..RawEmail::default()
        })
    }

    fn add(fprs: &[&str]) -> RecipientsPolicy {
        RecipientsPolicy {
            add: fprs.iter().copied().collect(),
            ..RecipientsPolicy::default()
        }
    }

    #[test]
    fn repack_inline_message() {
        let pgp = FakePgp::new("AAAA");
        let raw = format!(
            "Subject: inline\r\n\r\nHi,\r\n{}-- \r\nBob\r\n",
            fake_armor(&["AAAA"], "secret")
        );
        let mut email = email(&raw);

        let count = Repacker::new(&pgp)
            .policy(add(&["BBBB"]))
            .repack_email(&mut email)
            .unwrap();

        assert_eq!(1, count);
        assert_eq!(
            format!(
                "Subject: inline\r\n\r\nHi,\r\n{}-- \r\nBob\r\n",
                fake_armor(&["AAAA", "BBBB"], "secret")
            ),
            String::from_utf8(email.to_bytes()).unwrap()
        );
    }

    #[test]
    fn repack_without_armor_keeps_email() {
        let pgp = FakePgp::new("AAAA");
        let raw = "Subject: plain\r\n\r\nnothing to see\r\n";
        let mut email = email(raw);

        let count = Repacker::new(&pgp)
            .policy(add(&["BBBB"]))
            .repack_email(&mut email)
            .unwrap();

        assert_eq!(0, count);
        assert_eq!(raw.as_bytes(), email.to_bytes().as_slice());
    }

    #[test]
    fn repack_identical_recipients_never_encrypts() {
        let pgp = FakePgp::new("AAAA");
        let raw = format!("Subject: x\r\n\r\n{}", fake_armor(&["AAAA", "BBBB"], "secret"));
        let mut email = email(&raw);

        let err = Repacker::new(&pgp)
            .policy(add(&["BBBB"]))
            .repack_email(&mut email)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::RecipientError(RecipientError::IdenticalRecipients(_))
        ));
        assert_eq!(0, pgp.encrypt_calls());
    }

    #[test]
    fn repack_only_for_other_key() {
        let pgp = FakePgp::new("AAAA");
        let raw = format!("Subject: x\r\n\r\n{}", fake_armor(&["AAAA"], "secret"));
        let mut email = email(&raw);

        let err = Repacker::new(&pgp)
            .policy(add(&["BBBB"]))
            .only_for(Some("cccc".into()))
            .repack_email(&mut email)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::RecipientError(RecipientError::NotIntendedRecipient(fpr, _)) if fpr.as_str() == "CCCC"
        ));
        assert_eq!(0, pgp.encrypt_calls());
    }

    #[test]
    fn repack_propagates_no_secret_key() {
        let pgp = FakePgp::new("AAAA");
        let raw = format!("Subject: x\r\n\r\n{}", fake_armor(&["BBBB"], "secret"));
        let mut email = email(&raw);

        let err = Repacker::new(&pgp)
            .policy(add(&["CCCC"]))
            .repack_email(&mut email)
            .unwrap_err();

        assert!(matches!(err, Error::PgpError(err) if err.is_no_secret_key()));
    }

    #[test]
    fn repack_quoted_printable_leaf() {
        let pgp = FakePgp::new("AAAA");
        let armored = fake_armor(&["AAAA"], "secret==").replace('=', "=3D");
        let raw = format!(
            "Content-Type: text/plain\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\n{}",
            armored
        );
        let mut email = email(&raw);

        let count = Repacker::new(&pgp)
            .policy(add(&["BBBB"]))
            .repack_email(&mut email)
            .unwrap();

        assert_eq!(1, count);
        let leaf = email.part.leaves_mut().remove(0).payload().unwrap().to_vec();
        assert_eq!(
            fake_armor(&["AAAA", "BBBB"], "secret==").replace('=', "=3D"),
            String::from_utf8(leaf).unwrap()
        );
    }

    #[test]
    fn repack_nested_leaf_only() {
        let pgp = FakePgp::new("AAAA");
        let raw = format!(
            concat!(
                "Content-Type: multipart/mixed; boundary=a\r\n\r\n",
                "--a\r\nContent-Type: text/plain\r\n\r\nhello\r\n",
                "--a\r\nContent-Type: multipart/encrypted; boundary=b\r\n\r\n",
                "--b\r\nContent-Type: application/pgp-encrypted\r\n\r\nVersion: 1\r\n",
                "--b\r\nContent-Type: application/octet-stream\r\n\r\n{}",
                "--b--\r\n",
                "--a--\r\n"
            ),
            fake_armor(&["AAAA"], "secret")
        );
        let mut email = email(&raw);

        let count = Repacker::new(&pgp)
            .policy(add(&["BBBB"]))
            .repack_email(&mut email)
            .unwrap();

        assert_eq!(1, count);
        assert_eq!(
            raw.replace("to:AAAA\r\n", "to:AAAA,BBBB\r\n"),
            String::from_utf8(email.to_bytes()).unwrap()
        );
    }
}
