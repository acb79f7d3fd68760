//! Process module.
//!
//! This module contains cross platform helpers around the
//! `std::process` crate, used to run the password command and the
//! gpg binary.

use log::{debug, trace};
use std::{
    env,
    io::{self, prelude::*},
    process::{Child, Command, ExitStatus, Stdio},
    result, thread,
    time::{Duration, Instant},
};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot spawn process for command {1:?}")]
    SpawnProcessError(#[source] io::Error, String),
    #[error("cannot get standard input")]
    GetStdinError,
    #[error("cannot write data to standard input")]
    WriteStdinError(#[source] io::Error),
    #[error("cannot get standard output")]
    GetStdoutError,
    #[error("cannot get standard error")]
    GetStderrError,
    #[error("cannot read data from process output")]
    ReadOutputError(#[source] io::Error),
    #[error("cannot join process io thread")]
    JoinIoThreadError,
    #[error("cannot wait for command {1:?}")]
    WaitProcessError(#[source] io::Error, String),
    #[error("command {0:?} timed out after {1:?}")]
    TimeoutError(String, Duration),
    #[error("command {0:?} exited with {1}: {2}")]
    ExitStatusError(String, ExitStatus, String),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the captured output of a finished command.
#[derive(Debug)]
pub struct Output {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Output {
    /// Returns the standard error as a lossy UTF-8 string.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Runs the given shell command and returns its standard output.
/// Fails when the command does not exit successfully.
pub fn run(cmd: &str) -> Result<Vec<u8>> {
    debug!("running command: {}", cmd);

    let windows = cfg!(target_os = "windows")
        && env::var("MSYSTEM")
            .map(|env| !env.starts_with("MINGW"))
            .unwrap_or_default();

    let (program, args) = if windows {
        ("cmd", ["/C", cmd])
    } else {
        ("sh", ["-c", cmd])
    };

    let output = exec(program, &args, &[], None)?;
    if !output.status.success() {
        return Err(Error::ExitStatusError(
            cmd.to_owned(),
            output.status,
            output.stderr_lossy(),
        ));
    }

    Ok(output.stdout)
}

/// Executes the given program with arguments, writes `input` to its
/// standard input and collects both output streams. When a timeout
/// is given the child is killed once it is exceeded.
pub fn exec<S: AsRef<str>>(
    program: &str,
    args: &[S],
    input: &[u8],
    timeout: Option<Duration>,
) -> Result<Output> {
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    let cmd = format!("{} {}", program, args.join(" "));
    trace!("executing: {}", cmd);

    let mut child = Command::new(program)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| Error::SpawnProcessError(err, cmd.clone()))?;

    let mut stdin = child.stdin.take().ok_or(Error::GetStdinError)?;
    let mut stdout = child.stdout.take().ok_or(Error::GetStdoutError)?;
    let mut stderr = child.stderr.take().ok_or(Error::GetStderrError)?;

    // one thread per pipe
    let input = input.to_owned();
    let writer = thread::spawn(move || match stdin.write_all(&input) {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        res => res,
    });
    let stdout_reader = thread::spawn(move || {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).map(|_| buf)
    });
    let stderr_reader = thread::spawn(move || {
        let mut buf = Vec::new();
        stderr.read_to_end(&mut buf).map(|_| buf)
    });

    let status = wait(&mut child, &cmd, timeout)?;

    writer
        .join()
        .map_err(|_| Error::JoinIoThreadError)?
        .map_err(Error::WriteStdinError)?;
    let stdout = stdout_reader
        .join()
        .map_err(|_| Error::JoinIoThreadError)?
        .map_err(Error::ReadOutputError)?;
    let stderr = stderr_reader
        .join()
        .map_err(|_| Error::JoinIoThreadError)?
        .map_err(Error::ReadOutputError)?;

    debug!("command {:?} exited with {}", program, status);

    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

fn wait(child: &mut Child, cmd: &str, timeout: Option<Duration>) -> Result<ExitStatus> {
    let timeout = match timeout {
        Some(timeout) => timeout,
        None => {
            return child
                .wait()
                .map_err(|err| Error::WaitProcessError(err, cmd.to_owned()))
        }
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|err| Error::WaitProcessError(err, cmd.to_owned()))?
        {
            return Ok(status);
        }

        if Instant::now() >= deadline {
            // the process may have exited in between, errors are not
            // relevant anymore
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::TimeoutError(cmd.to_owned(), timeout));
        }

        thread::sleep(POLL_INTERVAL);
    }
}
