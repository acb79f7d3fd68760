use anyhow::Context;
use clap::{ArgGroup, Parser};
use log::{debug, warn, LevelFilter};
use std::{
    io::{self, Write},
    process::ExitCode,
};

use imap_repack::{
    search_encrypted, Backend, BatchRepacker, Config, Email, Fingerprint, GpgCmd, ImapBackend,
    Outcome, RecipientsPolicy, RepackObserver, Repacker, TrustModel,
};

/// Re-encrypts the PGP emails of an IMAP folder for a new set of
/// recipients.
#[derive(Debug, Parser)]
#[command(about, version)]
#[command(group(ArgGroup::new("task").required(true).args(["list", "search", "single"])))]
struct Opt {
    /// Configuration file, defaults to ~/.config/imap-repack/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// Account from the configuration file
    #[arg(long)]
    account: Option<String>,

    /// Folder to work on, defaults to the account default folder
    #[arg(long, value_name = "FOLDER")]
    mailbox: Option<String>,

    /// Does everything but writing emails back
    #[arg(long)]
    dry_run: bool,

    /// Lists the folders
    #[arg(long, help_heading = "Tasks")]
    list: bool,

    /// Searches the folder for encrypted emails
    #[arg(long, help_heading = "Tasks")]
    search: bool,

    /// Shows a single email
    #[arg(long, value_name = "UID", help_heading = "Tasks")]
    single: Option<u32>,

    /// Re-encrypts the emails found by --search or given by --single
    #[arg(long, help_heading = "Tasks")]
    repack: bool,

    /// Removes a key from the recipients (repeatable)
    #[arg(long, visible_alias = "delkey", value_name = "FINGERPRINT", help_heading = "Keys")]
    del_key: Vec<String>,

    /// Adds a key to the recipients (repeatable)
    #[arg(long, visible_alias = "addkey", value_name = "FINGERPRINT", help_heading = "Keys")]
    add_key: Vec<String>,

    /// Clears the recipients before adding keys
    #[arg(long, help_heading = "Keys")]
    del_all_keys: bool,

    /// Only repacks emails encrypted to this key
    #[arg(long, value_name = "FINGERPRINT", help_heading = "Keys")]
    only_for: Option<String>,

    /// Trusts every recipient key
    #[arg(long, help_heading = "Keys")]
    always_trust: bool,

    /// Enables debug logs
    #[arg(long)]
    debug: bool,

    /// Enables trace logs
    #[arg(long)]
    trace: bool,
}

/// Prints the batch progress to stdout.
struct ConsoleObserver;

impl RepackObserver for ConsoleObserver {
    fn on_email(&mut self, email: &Email) {
        println!("Email UID: {}", email.uid);
        println!("From     : {}", email.from());
        println!("Date     : {}", email.date());
        println!("Subject  : {}", email.subject());
    }

    fn on_outcome(&mut self, uid: u32, outcome: &Outcome) {
        println!("{}: {}", uid, outcome);
    }

    fn on_dry_run(&mut self, _uid: u32, raw: &[u8]) {
        println!("{}", String::from_utf8_lossy(raw));
    }

    fn on_compact(&mut self, result: Result<(), &str>) {
        match result {
            Ok(()) => println!("Folder expunged."),
            Err(err) => println!("Cannot expunge folder: {}", err),
        }
    }
}

fn init_logger(opts: &Opt) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if opts.trace {
        builder.filter_level(LevelFilter::Trace);
    } else if opts.debug {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.init();
}

fn join(uids: &[u32]) -> String {
    uids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn repack_policy(opts: &Opt, config: &Config) -> RecipientsPolicy {
    let mut exclusions = RecipientsPolicy::default_exclusions();
    exclusions.extend(config.pgp.exclusions.iter().cloned());

    RecipientsPolicy {
        add: opts.add_key.iter().map(Fingerprint::new).collect(),
        remove: opts.del_key.iter().map(Fingerprint::new).collect(),
        replace_all: opts.del_all_keys,
        exclusions,
    }
}

fn run_task(
    opts: &Opt,
    config: &Config,
    folder: &str,
    backend: &mut ImapBackend,
) -> anyhow::Result<ExitCode> {
    if opts.list {
        println!("{}", backend.list_folders()?);
        return Ok(ExitCode::SUCCESS);
    }

    let uids = if opts.search {
        println!("Searching for encrypted emails in {} ...", folder);
        let emails = search_encrypted(backend, folder)?;
        println!("pgp/mime : {}", join(&emails.mime));
        println!("inline   : {}", join(&emails.inline));
        emails.all()
    } else if let Some(uid) = opts.single {
        if !opts.repack {
            backend.select_folder(folder)?;
            let raw = backend.fetch_raw(uid)?;
            io::stdout().write_all(&raw)?;
        }
        vec![uid]
    } else {
        Vec::new()
    };

    if !opts.repack {
        return Ok(ExitCode::SUCCESS);
    }

    let pgp = GpgCmd::new(config.pgp.clone());
    let trust = if opts.always_trust {
        TrustModel::Always
    } else {
        TrustModel::Default
    };
    let repacker = Repacker::new(&pgp)
        .policy(repack_policy(opts, config))
        .only_for(opts.only_for.as_deref().map(Fingerprint::new))
        .trust(trust)
        .dry_run(opts.dry_run);

    let report = BatchRepacker::new(backend, &repacker)
        .observer(ConsoleObserver)
        .run(folder, &uids);
    println!("{}", report);

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn run(opts: Opt) -> anyhow::Result<ExitCode> {
    let path = match &opts.config {
        Some(path) => path.clone(),
        None => Config::default_path()?.to_string_lossy().into_owned(),
    };
    debug!("reading config from {}", path);
    let config = Config::from_path(&path)?;
    let account = config.account(opts.account.as_deref())?;
    let folder = opts
        .mailbox
        .clone()
        .unwrap_or_else(|| account.default_folder().to_owned());

    let mut backend = ImapBackend::new(&account.imap)
        .with_context(|| format!("cannot open imap session of account {}", account.name))?;
    let res = run_task(&opts, &config, &folder, &mut backend);
    if let Err(err) = backend.close() {
        warn!("cannot close imap session: {}", err);
    }

    res
}

fn main() -> ExitCode {
    let opts = Opt::parse();
    init_logger(&opts);

    match run(opts) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
