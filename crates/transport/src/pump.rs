//! The byte pump bridging the producer and consumer sides of a flow.
//!
//! Bytes move with `splice(2)` when the kernel accepts it (at least one
//! side of the bridge is always a pipe), falling back to a buffered
//! read/write loop otherwise. Broken pipes are suppressed: when a
//! downstream stage dies, its exit status is the signal that matters, not
//! the pump's `EPIPE`.

use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};

use rustix::io::Errno;
use rustix::pipe::{splice, SpliceFlags};
use tracing::{trace, warn};

/// Bytes requested per `splice` call.
const SPLICE_CHUNK: usize = 1 << 20;

/// Buffer size of the read/write fallback loop.
const COPY_BUF: usize = 64 * 1024;

/// What the pump observed while draining the bridge.
#[derive(Debug, Default)]
pub(crate) struct PumpOutcome {
    /// Total bytes moved downstream.
    pub bytes: u64,
    /// The downstream end went away mid-stream.
    pub broken_pipe: bool,
    /// The cancel flag was observed set.
    pub cancelled: bool,
}

/// Progress reporting configuration: a callback and the byte interval at
/// which it fires.
pub(crate) struct Progress<'a> {
    pub callback: &'a mut dyn FnMut(u64),
    pub threshold: u64,
}

/// Moves bytes from `src` to `dst` until EOF, broken pipe, or
/// cancellation.
pub(crate) fn pump<R, W>(
    mut src: R,
    mut dst: W,
    cancel: Option<&AtomicBool>,
    mut progress: Option<Progress<'_>>,
) -> io::Result<PumpOutcome>
where
    R: Read + AsFd,
    W: Write + AsFd,
{
    let mut outcome = PumpOutcome::default();
    let mut next_mark = progress.as_ref().map_or(u64::MAX, |p| p.threshold.max(1));
    let mut use_splice = true;

    loop {
        if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            outcome.cancelled = true;
            break;
        }

        let moved = if use_splice {
            match splice(src.as_fd(), None, dst.as_fd(), None, SPLICE_CHUNK, SpliceFlags::empty()) {
                Ok(n) => n,
                Err(err) if err == Errno::INTR => continue,
                Err(err) if err == Errno::PIPE => {
                    outcome.broken_pipe = true;
                    break;
                }
                // The kernel refuses this descriptor pairing; fall back to
                // a userspace copy for the rest of the stream.
                Err(err)
                    if (err == Errno::INVAL || err == Errno::XDEV) && outcome.bytes == 0 =>
                {
                    trace!("splice unavailable for this bridge, using copy loop");
                    use_splice = false;
                    continue;
                }
                Err(err) => return Err(io::Error::from(err)),
            }
        } else {
            match copy_chunk(&mut src, &mut dst) {
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    outcome.broken_pipe = true;
                    break;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        };

        if moved == 0 {
            break;
        }
        outcome.bytes += moved as u64;

        if outcome.bytes >= next_mark {
            if let Some(p) = progress.as_mut() {
                (p.callback)(outcome.bytes);
                next_mark = outcome.bytes - outcome.bytes % p.threshold + p.threshold;
            }
        }
    }

    if let Some(p) = progress.as_mut() {
        (p.callback)(outcome.bytes);
    }
    if outcome.broken_pipe {
        warn!(bytes = outcome.bytes, "downstream closed early; deferring to its exit status");
    }
    Ok(outcome)
}

/// One buffered read/write round, returning the bytes moved (0 on EOF).
fn copy_chunk<R: Read, W: Write>(src: &mut R, dst: &mut W) -> io::Result<usize> {
    let mut buf = [0u8; COPY_BUF];
    let n = src.read(&mut buf)?;
    if n > 0 {
        dst.write_all(&buf[..n])?;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};
    use std::process::{Command, Stdio};

    fn producer(script: &str) -> std::process::Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .expect("spawn sh")
    }

    #[test]
    fn pumps_pipe_to_file() {
        let mut child = producer("printf 'hello from the pump'");
        let out = child.stdout.take().unwrap();
        let mut file = tempfile::tempfile().unwrap();

        let outcome = pump(out, &mut file, None, None).unwrap();
        child.wait().unwrap();

        assert_eq!(outcome.bytes, 19);
        assert!(!outcome.broken_pipe);

        let mut contents = String::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello from the pump");
    }

    #[test]
    fn progress_fires_on_thresholds() {
        let mut child = producer("dd if=/dev/zero bs=1024 count=64 2>/dev/null");
        let out = child.stdout.take().unwrap();
        let mut file = tempfile::tempfile().unwrap();

        let mut reports = Vec::new();
        let mut callback = |n: u64| reports.push(n);
        let outcome = pump(
            out,
            &mut file,
            None,
            Some(Progress {
                callback: &mut callback,
                threshold: 16 * 1024,
            }),
        )
        .unwrap();
        child.wait().unwrap();

        assert_eq!(outcome.bytes, 64 * 1024);
        assert_eq!(reports.last().copied(), Some(64 * 1024));
        assert!(reports.len() >= 2, "expected intermediate reports: {reports:?}");
    }

    #[test]
    fn cancellation_stops_an_endless_stream() {
        let mut child = producer("while :; do printf x; done");
        let out = child.stdout.take().unwrap();
        let mut file = tempfile::tempfile().unwrap();

        let cancel = AtomicBool::new(true);
        let outcome = pump(out, &mut file, Some(&cancel), None).unwrap();
        assert!(outcome.cancelled);

        child.kill().ok();
        child.wait().unwrap();
    }

    #[test]
    fn broken_downstream_is_suppressed() {
        // Consumer exits immediately; writing into its closed stdin must
        // not surface as an error.
        let mut consumer = Command::new("sh")
            .arg("-c")
            .arg("exit 0")
            .stdin(Stdio::piped())
            .spawn()
            .unwrap();
        let sink = consumer.stdin.take().unwrap();
        consumer.wait().unwrap();

        let mut src = producer("dd if=/dev/zero bs=1024 count=1024 2>/dev/null");
        let out = src.stdout.take().unwrap();

        let outcome = pump(out, sink, None, None).unwrap();
        assert!(outcome.broken_pipe);

        src.kill().ok();
        src.wait().unwrap();
    }
}
