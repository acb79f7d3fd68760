//! IMAP backend module.
//!
//! This module contains the definition of the IMAP backend.

use chrono::{DateTime, FixedOffset};
use log::{debug, log_enabled, trace, Level};
use native_tls::{TlsConnector, TlsStream};
use std::{
    io::{self, Read, Write},
    net::TcpStream,
    result,
};
use thiserror::Error;
use utf7_imap::{decode_utf7_imap as decode_utf7, encode_utf7_imap as encode_utf7};

use crate::{
    backend::{self, imap::imap_flags, RawEmail},
    Backend, Flag, Flags, Folder, Folders, ImapConfig,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot create tls connector")]
    CreateTlsConnectorError(#[source] native_tls::Error),
    #[error("cannot connect to imap server")]
    ConnectImapServerError(#[source] imap::Error),
    #[error("cannot login to imap server")]
    LoginImapServerError(#[source] imap::Error),
    #[error("cannot list mailboxes")]
    ListMboxesError(#[source] imap::Error),
    #[error("cannot select mailbox {1}")]
    SelectFolderError(#[source] imap::Error, String),
    #[error("cannot search messages with query: {1}")]
    SearchMsgsError(#[source] imap::Error, String),
    #[error("cannot fetch message {1}")]
    FetchMsgError(#[source] imap::Error, u32),
    #[error("cannot append message to mailbox {1}")]
    AppendMsgError(#[source] imap::Error, String),
    #[error("cannot add flags {1} to message {2}")]
    AddFlagsError(#[source] imap::Error, String, u32),
    #[error("cannot expunge mailbox")]
    ExpungeError(#[source] imap::Error),
    #[error("cannot logout from imap server")]
    LogoutImapSessionError(#[source] imap::Error),

    #[error(transparent)]
    ImapConfigError(#[from] backend::imap::config::Error),
}

pub type Result<T> = result::Result<T, Error>;

pub enum ImapSessionStream {
    Tls(TlsStream<TcpStream>),
    Tcp(TcpStream),
}

impl Read for ImapSessionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.read(buf),
            Self::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for ImapSessionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.write(buf),
            Self::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tls(stream) => stream.flush(),
            Self::Tcp(stream) => stream.flush(),
        }
    }
}

pub type ImapSession = imap::Session<ImapSessionStream>;

/// Represents one authenticated IMAP session.
pub struct ImapBackend {
    session: ImapSession,
}

impl ImapBackend {
    pub fn new(config: &ImapConfig) -> Result<Self> {
        Ok(Self {
            session: Self::create_session(config)?,
        })
    }

    fn create_session(config: &ImapConfig) -> Result<ImapSession> {
        let builder = TlsConnector::builder()
            .danger_accept_invalid_certs(config.insecure())
            .danger_accept_invalid_hostnames(config.insecure())
            .build()
            .map_err(Error::CreateTlsConnectorError)?;

        let timeout = config.timeout();
        let mut client_builder = imap::ClientBuilder::new(&config.host, config.port());
        if config.starttls() {
            client_builder.starttls();
        }

        let client = if config.ssl() || config.starttls() {
            client_builder.connect(|domain, tcp| {
                tcp.set_read_timeout(Some(timeout))?;
                tcp.set_write_timeout(Some(timeout))?;
                let connector = TlsConnector::connect(&builder, domain, tcp)?;
                Ok(ImapSessionStream::Tls(connector))
            })
        } else {
            client_builder.connect(|_, tcp| {
                tcp.set_read_timeout(Some(timeout))?;
                tcp.set_write_timeout(Some(timeout))?;
                Ok(ImapSessionStream::Tcp(tcp))
            })
        }
        .map_err(Error::ConnectImapServerError)?;

        let mut session = client
            .login(&config.login, &config.passwd()?)
            .map_err(|res| Error::LoginImapServerError(res.0))?;
        session.debug = log_enabled!(Level::Trace);

        Ok(session)
    }

    /// Fetches the raw RFC822 bytes of the given UID, for inspection.
    pub fn fetch_raw(&mut self, uid: u32) -> backend::Result<Vec<u8>> {
        Ok(self.fetch_email(uid)?.raw)
    }
}

impl Backend for ImapBackend {
    fn list_folders(&mut self) -> backend::Result<Folders> {
        let names = self
            .session
            .list(Some(""), Some("*"))
            .map_err(Error::ListMboxesError)?;
        let folders = Folders::from_iter(names.iter().map(|name| Folder {
            delim: name.delimiter().unwrap_or_default().into(),
            name: decode_utf7(name.name().into()),
            desc: name
                .attributes()
                .iter()
                .map(|attr| format!("{:?}", attr))
                .collect::<Vec<_>>()
                .join(", "),
        }));

        trace!("imap folders: {:?}", folders);
        Ok(folders)
    }

    fn select_folder(&mut self, folder: &str) -> backend::Result<()> {
        let encoded = encode_utf7(folder.to_owned());
        debug!("selecting folder {} (utf7 encoded: {})", folder, encoded);

        self.session
            .select(&encoded)
            .map_err(|err| Error::SelectFolderError(err, folder.to_owned()))?;

        Ok(())
    }

    fn search_uids(&mut self, query: &str) -> backend::Result<Vec<u32>> {
        debug!("searching uids: {}", query);

        let mut uids: Vec<u32> = self
            .session
            .uid_search(query)
            .map_err(|err| Error::SearchMsgsError(err, query.to_owned()))?
            .into_iter()
            .collect();
        uids.sort_unstable();
        trace!("uids: {:?}", uids);

        Ok(uids)
    }

    fn fetch_email(&mut self, uid: u32) -> backend::Result<RawEmail> {
        debug!("fetching email {}", uid);

        let fetches = self
            .session
            .uid_fetch(uid.to_string(), "(UID FLAGS INTERNALDATE BODY.PEEK[])")
            .map_err(|err| Error::FetchMsgError(err, uid))?;
        let fetch = fetches
            .iter()
            .find(|fetch| fetch.uid == Some(uid))
            .ok_or(backend::Error::FindEmailError(uid))?;

        let raw = fetch
            .body()
            .ok_or(backend::Error::GetEmailBodyError(uid))?
            .to_vec();

        Ok(RawEmail {
            uid,
            flags: imap_flags::from_imap_flags(fetch.flags()),
            internal_date: fetch.internal_date(),
            raw,
        })
    }

    fn append_email(
        &mut self,
        folder: &str,
        raw: &[u8],
        flags: &Flags,
        internal_date: Option<DateTime<FixedOffset>>,
    ) -> backend::Result<()> {
        let encoded = encode_utf7(folder.to_owned());
        debug!("appending email to folder {} with flags {}", folder, flags);

        let mut cmd = self.session.append(encoded.as_str(), raw);
        cmd.flags(imap_flags::into_imap_flags(flags));
        if let Some(date) = internal_date {
            cmd.internal_date(date);
        }
        cmd.finish()
            .map_err(|err| Error::AppendMsgError(err, folder.to_owned()))?;

        Ok(())
    }

    fn add_deleted_flag(&mut self, uid: u32) -> backend::Result<()> {
        let flags = Flags::from_iter([Flag::Deleted]);
        debug!("adding flags {} to email {}", flags, uid);

        self.session
            .uid_store(uid.to_string(), format!("+FLAGS.SILENT ({})", flags))
            .map_err(|err| Error::AddFlagsError(err, flags.to_string(), uid))?;

        Ok(())
    }

    fn expunge(&mut self) -> backend::Result<()> {
        debug!("expunging selected folder");
        self.session.expunge().map_err(Error::ExpungeError)?;
        Ok(())
    }

    /// Logs out rather than closing: CLOSE would silently expunge the
    /// selected folder.
    fn close(&mut self) -> backend::Result<()> {
        self.session
            .logout()
            .map_err(Error::LogoutImapSessionError)?;
        Ok(())
    }
}
