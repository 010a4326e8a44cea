//! Materializing [`Cmd`] values into OS processes.

use std::fs::OpenOptions;
use std::io;
use std::process::{Command, ExitStatus, Stdio};

use tracing::debug;

use crate::cmd::{Cmd, StreamSpec};
use crate::error::TransportError;

/// Output of a one-shot captured command.
#[derive(Debug)]
pub struct Capture {
    /// Exit status of the process.
    pub status: ExitStatus,
    /// Everything the process wrote to stdout.
    pub stdout: Vec<u8>,
    /// Everything the process wrote to stderr.
    pub stderr: Vec<u8>,
}

impl Capture {
    /// Whether the process exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// The stderr bytes as lossy UTF-8, trimmed of trailing whitespace.
    #[must_use]
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim_end().to_owned()
    }
}

/// Runs a command to completion, capturing stdout and stderr.
///
/// The command's stdin disposition is honored; listing commands are
/// expected to set [`StreamSpec::Null`] so a misbehaving tool cannot hang
/// on a terminal read.
///
/// # Errors
///
/// Returns [`TransportError::Spawn`] when the process cannot be started
/// and [`TransportError::Io`] when collecting its output fails.
pub fn run_capture(cmd: &Cmd) -> Result<Capture, TransportError> {
    let mut command = command_from(cmd);
    command
        .stdin(stdio_for_input(cmd.stdin_spec())?)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(program = cmd.program(), args = ?cmd.arg_list(), "running capture command");

    let output = command.output().map_err(|source| TransportError::Spawn {
        program: cmd.program().to_owned(),
        source,
    })?;

    Ok(Capture {
        status: output.status,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Builds a [`Command`] with program, arguments, and environment overrides
/// applied, leaving stream wiring to the caller.
pub(crate) fn command_from(cmd: &Cmd) -> Command {
    let mut command = Command::new(cmd.program());
    command.args(cmd.arg_list());
    for (key, value) in cmd.envs() {
        command.env(key, value);
    }
    command
}

/// Resolves a [`StreamSpec`] into an input [`Stdio`].
pub(crate) fn stdio_for_input(spec: &StreamSpec) -> io::Result<Stdio> {
    match spec {
        StreamSpec::Inherit => Ok(Stdio::inherit()),
        StreamSpec::Null => Ok(Stdio::null()),
        StreamSpec::Piped => Ok(Stdio::piped()),
        StreamSpec::Fd(fd) => Ok(stdio_from_raw_fd(*fd)),
        StreamSpec::File { path, .. } => Ok(Stdio::from(std::fs::File::open(path)?)),
    }
}

/// Resolves a [`StreamSpec`] into an output [`Stdio`].
pub(crate) fn stdio_for_output(spec: &StreamSpec) -> io::Result<Stdio> {
    match spec {
        StreamSpec::Inherit => Ok(Stdio::inherit()),
        StreamSpec::Null => Ok(Stdio::null()),
        StreamSpec::Piped => Ok(Stdio::piped()),
        StreamSpec::Fd(fd) => Ok(stdio_from_raw_fd(*fd)),
        StreamSpec::File { path, append } => {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .append(*append)
                .truncate(!*append)
                .open(path)?;
            Ok(Stdio::from(file))
        }
    }
}

/// Adopts a raw descriptor handed in through [`StreamSpec::Fd`].
///
/// Whoever constructed the [`StreamSpec::Fd`] vouches for the descriptor;
/// this is the only place the crate trusts a raw integer fd.
#[allow(unsafe_code)]
fn stdio_from_raw_fd(fd: i32) -> Stdio {
    use std::os::fd::FromRawFd;
    // SAFETY: StreamSpec::Fd carries an open descriptor whose ownership
    // transfers to the spawned child.
    unsafe { Stdio::from_raw_fd(fd) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_collects_stdout_and_status() {
        let cmd = Cmd::new("sh")
            .arg("-c")
            .arg("printf hello; exit 0")
            .stdin(StreamSpec::Null);
        let capture = run_capture(&cmd).unwrap();
        assert!(capture.success());
        assert_eq!(capture.stdout, b"hello");
    }

    #[test]
    fn capture_collects_stderr_on_failure() {
        let cmd = Cmd::new("sh")
            .arg("-c")
            .arg("echo oops >&2; exit 3")
            .stdin(StreamSpec::Null);
        let capture = run_capture(&cmd).unwrap();
        assert!(!capture.success());
        assert_eq!(capture.status.code(), Some(3));
        assert_eq!(capture.stderr_text(), "oops");
    }

    #[test]
    fn spawn_failure_names_the_program() {
        let cmd = Cmd::new("cowsync-definitely-missing-binary").stdin(StreamSpec::Null);
        match run_capture(&cmd) {
            Err(TransportError::Spawn { program, .. }) => {
                assert_eq!(program, "cowsync-definitely-missing-binary");
            }
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[test]
    fn env_overrides_reach_the_child() {
        let cmd = Cmd::new("sh")
            .arg("-c")
            .arg("printf %s \"$COWSYNC_TEST_VAR\"")
            .env("COWSYNC_TEST_VAR", "value")
            .stdin(StreamSpec::Null);
        let capture = run_capture(&cmd).unwrap();
        assert_eq!(capture.stdout, b"value");
    }
}
