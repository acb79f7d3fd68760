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

//! Gpg module.
//!
//! This module implements the PGP trait on top of the gpg binary,
//! driven in batch mode through its machine readable status output.

use log::{debug, trace, warn};
use std::borrow::Cow;

use crate::{
    pgp::{Decrypted, Error, Pgp, Result, TrustModel},
    process, Fingerprint, PgpConfig, Recipients,
};

const NO_SECRET_KEY: &str = "decryption failed: No secret key";

/// Represents one `[GNUPG:]` status line.
#[derive(Debug, Clone, Eq, PartialEq)]
struct StatusLine<'a> {
    keyword: &'a str,
    args: Vec<&'a str>,
}

fn parse_status(stderr: &str) -> Vec<StatusLine<'_>> {
    stderr
        .lines()
        .filter_map(|line| line.strip_prefix("[GNUPG:] "))
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            words.next().map(|keyword| StatusLine {
                keyword,
                args: words.collect(),
            })
        })
        .collect()
}

fn has_status(status: &[StatusLine], keyword: &str) -> bool {
    status.iter().any(|line| line.keyword == keyword)
}

/// Collects the keys gpg considered while decrypting.
fn parse_recipients(status: &[StatusLine]) -> Recipients {
    status
        .iter()
        .filter(|line| line.keyword == "KEY_CONSIDERED")
        .filter_map(|line| line.args.first())
        .map(|fpr| Fingerprint::from(*fpr))
        .collect()
}

fn status_args<'a>(status: &[StatusLine<'a>], keyword: &str) -> Vec<&'a str> {
    status
        .iter()
        .filter(|line| line.keyword == keyword)
        .filter_map(|line| line.args.first().copied())
        .collect()
}

/// Tells whether none of the local secret keys could open the
/// message. gpg emits `NO_SECKEY` for every recipient key missing
/// from the keyring, including when another recipient key matched.
fn lacks_secret_key(status: &[StatusLine], stderr: &str) -> bool {
    if has_status(status, "DECRYPTION_KEY") || has_status(status, "BEGIN_DECRYPTION") {
        return false;
    }

    let enc_to = status_args(status, "ENC_TO");
    let no_seckey = status_args(status, "NO_SECKEY");
    let all_missing = !enc_to.is_empty()
        && enc_to
            .iter()
            .all(|keyid| no_seckey.iter().any(|missing| missing.eq_ignore_ascii_case(keyid)));

    all_missing || stderr.contains(NO_SECRET_KEY)
}

fn decrypted_from_output(output: process::Output) -> Result<Decrypted> {
    let stderr = output.stderr_lossy();
    let status = parse_status(&stderr);
    trace!("gpg decrypt stderr: {}", stderr);

    let ok = has_status(&status, "DECRYPTION_OKAY") && !has_status(&status, "DECRYPTION_FAILED");
    if !ok {
        if lacks_secret_key(&status, &stderr) {
            return Err(Error::NoSecretKeyError);
        }
        return Err(Error::DecryptionError(format!(
            "gpg exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    if !output.status.success() {
        // a missing signer key makes gpg exit with an error even
        // though the message was decrypted
        warn!("gpg decrypted message but exited with {}", output.status);
    }

    if output.stdout.is_empty() {
        return Err(Error::EmptyPlaintextError);
    }

    Ok(Decrypted {
        plaintext: output.stdout,
        recipients: parse_recipients(&status),
    })
}

fn encrypted_from_output(output: process::Output) -> Result<Vec<u8>> {
    let stderr = output.stderr_lossy();
    let status = parse_status(&stderr);
    trace!("gpg encrypt stderr: {}", stderr);

    if !output.status.success()
        || !has_status(&status, "END_ENCRYPTION")
        || has_status(&status, "INV_RECP")
    {
        return Err(Error::EncryptionError(format!(
            "gpg exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(output.stdout)
}

/// Represents the gpg binary.
#[derive(Debug, Clone, Default)]
pub struct GpgCmd {
    config: PgpConfig,
}

impl GpgCmd {
    pub fn new(config: PgpConfig) -> Self {
        Self { config }
    }

    fn base_args(&self) -> Vec<Cow<'static, str>> {
        let mut args: Vec<Cow<str>> = vec![
            "--batch".into(),
            "--no-tty".into(),
            "--status-fd".into(),
            "2".into(),
        ];
        if let Some(homedir) = self.config.homedir() {
            args.push("--homedir".into());
            args.push(homedir.to_string_lossy().into_owned().into());
        }
        args
    }

    fn exec(&self, args: &[Cow<str>], input: &[u8]) -> Result<process::Output> {
        process::exec(
            &self.config.gpg_cmd(),
            args,
            input,
            Some(self.config.timeout()),
        )
        .map_err(Error::RunGpgError)
    }
}

impl Pgp for GpgCmd {
    fn decrypt(&self, armored: &[u8]) -> Result<Decrypted> {
        let mut args = self.base_args();
        args.push("--decrypt".into());

        let decrypted = decrypted_from_output(self.exec(&args, armored)?)?;
        debug!("message encrypted to: {}", decrypted.recipients);

        Ok(decrypted)
    }

    fn encrypt(
        &self,
        plaintext: &[u8],
        recipients: &Recipients,
        trust: TrustModel,
    ) -> Result<Vec<u8>> {
        if recipients.is_empty() {
            return Err(Error::EmptyRecipientsError);
        }

        let mut args = self.base_args();
        if trust == TrustModel::Always {
            args.push("--trust-model".into());
            args.push("always".into());
        }
        args.push("--armor".into());
        args.push("--encrypt".into());
        for fpr in recipients.iter() {
            args.push("--recipient".into());
            args.push(fpr.to_string().into());
        }

        debug!("encrypting message to: {}", recipients);
        encrypted_from_output(self.exec(&args, plaintext)?)
    }
}
