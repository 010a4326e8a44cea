//! Running pipelines: process spawning, the bridge pump, and lifecycle.
//!
//! A [`Flow`] joins a *producer* pipeline (the side that emits the stream)
//! to a *consumer* pipeline or terminal sink. Stages inside each side are
//! wired stdout-to-stdin with kernel pipes; the two sides are joined by a
//! single splice-backed pump that also carries the byte tally used for
//! progress reporting and the cancellation point used for interrupts.
//!
//! Dropping the pump's read end closes the producer's stdout, which is how
//! cancellation reaches a stuck sender: the next write raises `SIGPIPE`
//! there while the consumer drains to EOF.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, ExitStatus, Stdio};
use std::sync::atomic::AtomicBool;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::cmd::{Cmd, Pipeline};
use crate::error::TransportError;
use crate::pump::{self, Progress};
use crate::spawn;

/// Default bound on the per-stage stderr tail.
const DEFAULT_STDERR_LIMIT: usize = 8 * 1024;

/// Default time allowed for stages to drain after the stream ends.
const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Default byte interval between progress callbacks.
const DEFAULT_PROGRESS_THRESHOLD: u64 = 1 << 20;

/// Where the stream ends up after the last consumer stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowSink {
    /// The final consumer stage consumes the stream itself.
    Stage,
    /// The stream is written to a new file; an existing file is refused.
    File(PathBuf),
    /// The stream is copied to this process's stdout.
    Stdout,
}

/// Exit record of one pipeline stage.
#[derive(Clone, Debug)]
pub struct StageStatus {
    /// Position of the stage in spawn order.
    pub index: usize,
    /// Program of the stage, for messages.
    pub program: String,
    /// Exit code, when the stage exited normally.
    pub code: Option<i32>,
    /// Terminating signal, when the stage was killed.
    pub signal: Option<i32>,
    /// Bounded tail of the stage's stderr.
    pub stderr_tail: String,
    /// Whether older stderr output was dropped to honor the bound.
    pub truncated: bool,
}

impl StageStatus {
    /// Whether the stage exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short human-readable account of how the stage ended.
    #[must_use]
    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("`{}` exited with code {code}", self.program),
            (None, Some(signal)) => format!("`{}` killed by signal {signal}", self.program),
            (None, None) => format!("`{}` did not report an exit status", self.program),
        }
    }
}

/// Result of a completed [`Flow`] run.
#[derive(Debug)]
pub struct FlowOutcome {
    /// Exit records in stage order, producer side first.
    pub stages: Vec<StageStatus>,
    /// Bytes the bridge pump moved downstream.
    pub bytes: u64,
    /// Whether the run was stopped by the cancel flag.
    pub cancelled: bool,
}

impl FlowOutcome {
    /// Whether every stage exited 0 and the run was not cancelled.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.cancelled && self.stages.iter().all(StageStatus::success)
    }

    /// The earliest stage (lowest index) that did not exit 0.
    ///
    /// When several stages fail, the first one is the primary cause: a
    /// dying upstream routinely takes downstream stages with it through
    /// `SIGPIPE`, and those secondary deaths must not mask the original
    /// error.
    #[must_use]
    pub fn first_failure(&self) -> Option<&StageStatus> {
        self.stages.iter().find(|stage| !stage.success())
    }
}

/// A composed pipeline ready to run.
#[derive(Debug)]
pub struct Flow {
    producer: Pipeline,
    consumer: Option<Pipeline>,
    sink: FlowSink,
    grace: Duration,
    stderr_limit: usize,
    progress_threshold: u64,
}

impl Flow {
    /// Composes a flow from a producer pipeline, an optional consumer
    /// pipeline, and a terminal sink.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::EmptyPipeline`] when the sink is
    /// [`FlowSink::Stage`] but no consumer pipeline was given.
    pub fn new(
        producer: Pipeline,
        consumer: Option<Pipeline>,
        sink: FlowSink,
    ) -> Result<Self, TransportError> {
        if matches!(sink, FlowSink::Stage) && consumer.is_none() {
            return Err(TransportError::EmptyPipeline);
        }
        Ok(Self {
            producer,
            consumer,
            sink,
            grace: DEFAULT_GRACE,
            stderr_limit: DEFAULT_STDERR_LIMIT,
            progress_threshold: DEFAULT_PROGRESS_THRESHOLD,
        })
    }

    /// Sets the drain deadline applied after the stream ends or the flow
    /// is cancelled; survivors are sent `SIGTERM`, then `SIGKILL`.
    #[must_use]
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Sets the per-stage stderr tail bound in bytes.
    #[must_use]
    pub fn stderr_limit(mut self, limit: usize) -> Self {
        self.stderr_limit = limit.max(1);
        self
    }

    /// Sets the byte interval between progress callbacks.
    #[must_use]
    pub fn progress_threshold(mut self, threshold: u64) -> Self {
        self.progress_threshold = threshold.max(1);
        self
    }

    /// Spawns the flow, pumps the stream, and waits for every stage.
    ///
    /// `cancel`, when set during the run, stops the pump, closes the
    /// producer's stdout, and drains the stages within the grace window.
    /// `progress` is invoked from the pump whenever the byte tally crosses
    /// the configured threshold, and once more with the final tally.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SinkExists`] without spawning anything
    /// when the file sink already exists, [`TransportError::Spawn`] when a
    /// stage cannot be started (already-started stages are terminated),
    /// and [`TransportError::Io`] for pump failures other than a broken
    /// pipe.
    pub fn run(
        self,
        cancel: Option<&AtomicBool>,
        progress: Option<&mut dyn FnMut(u64)>,
    ) -> Result<FlowOutcome, TransportError> {
        let sink_file = match &self.sink {
            FlowSink::File(path) => Some(open_sink_file(path)?),
            _ => None,
        };

        let mut spawner = Spawner::new(self.stderr_limit);
        let (bridge_src, bridge_dst) = self.spawn_stages(&mut spawner, sink_file)?;
        let mut running = spawner.disarm();

        debug!(stages = running.len(), "flow started");

        let progress = progress.map(|callback| Progress {
            callback,
            threshold: self.progress_threshold,
        });
        let pumped = match bridge_dst {
            BridgeDst::Child(stdin) => pump::pump(bridge_src, stdin, cancel, progress),
            BridgeDst::File(file) => pump::pump(bridge_src, file, cancel, progress),
            BridgeDst::Stdout(out) => pump::pump(bridge_src, out, cancel, progress),
        };
        let pumped = match pumped {
            Ok(pumped) => pumped,
            Err(err) => {
                abort_stages(&mut running);
                return Err(err.into());
            }
        };

        let statuses = wait_with_grace(&mut running, self.grace);

        let mut stages = Vec::with_capacity(running.len());
        for (index, (stage, status)) in running.into_iter().zip(statuses).enumerate() {
            let (tail, truncated) = stage
                .stderr
                .map(|handle| handle.join().unwrap_or_default())
                .unwrap_or_default();
            stages.push(StageStatus {
                index,
                program: stage.program,
                code: status.and_then(|st| st.code()),
                signal: status.and_then(exit_signal),
                stderr_tail: String::from_utf8_lossy(&tail).into_owned(),
                truncated,
            });
        }

        let outcome = FlowOutcome {
            stages,
            bytes: pumped.bytes,
            cancelled: pumped.cancelled,
        };
        info!(
            bytes = outcome.bytes,
            success = outcome.success(),
            cancelled = outcome.cancelled,
            "flow finished"
        );
        Ok(outcome)
    }

    fn spawn_stages(
        &self,
        spawner: &mut Spawner,
        sink_file: Option<File>,
    ) -> Result<(ChildStdout, BridgeDst), TransportError> {
        // Producer side: every stage's stdout is piped; the last pipe read
        // end becomes the bridge source.
        let mut carried: Option<ChildStdout> = None;
        for cmd in self.producer.stages() {
            let stdin = match carried.take() {
                Some(prev) => Stdio::from(prev),
                None => spawn::stdio_for_input(cmd.stdin_spec())
                    .map_err(TransportError::Io)
                    .inspect_err(|_| spawner.abort())?,
            };
            let stdout = spawner.spawn(cmd, stdin, Stdio::piped())?;
            carried = stdout;
        }
        let bridge_src = carried.expect("producer pipeline has at least one stage");

        // Consumer side, when present: the first stage's stdin is the
        // bridge destination, the last stage's stdout is the sink.
        let mut sink_file = sink_file;
        let bridge_dst = match &self.consumer {
            Some(consumer) => {
                let stages = consumer.stages();
                let mut first_stdin: Option<ChildStdin> = None;
                let mut carried: Option<ChildStdout> = None;
                for (i, cmd) in stages.iter().enumerate() {
                    let stdin = match carried.take() {
                        Some(prev) => Stdio::from(prev),
                        None => Stdio::piped(),
                    };
                    let last = i == stages.len() - 1;
                    let stdout = if !last {
                        Stdio::piped()
                    } else {
                        match &self.sink {
                            FlowSink::Stage => spawn::stdio_for_output(cmd.stdout_spec())
                                .map_err(TransportError::Io)
                                .inspect_err(|_| spawner.abort())?,
                            FlowSink::File(_) => Stdio::from(
                                sink_file.take().expect("sink file opened before spawning"),
                            ),
                            FlowSink::Stdout => Stdio::inherit(),
                        }
                    };
                    let (stdin_handle, stdout_handle) =
                        spawner.spawn_keep_stdin(cmd, stdin, stdout)?;
                    if i == 0 {
                        first_stdin = stdin_handle;
                    }
                    carried = stdout_handle;
                }
                drop(carried);
                BridgeDst::Child(first_stdin.expect("first consumer stage stdin is piped"))
            }
            None => match &self.sink {
                FlowSink::File(_) => {
                    BridgeDst::File(sink_file.expect("sink file opened before spawning"))
                }
                FlowSink::Stdout => BridgeDst::Stdout(io::stdout()),
                FlowSink::Stage => unreachable!("validated in Flow::new"),
            },
        };

        Ok((bridge_src, bridge_dst))
    }
}

/// Write end of the bridge pump.
enum BridgeDst {
    Child(ChildStdin),
    File(File),
    Stdout(io::Stdout),
}

struct RunningStage {
    child: Child,
    program: String,
    stderr: Option<JoinHandle<(Vec<u8>, bool)>>,
}

/// Spawner that terminates already-started stages when a later spawn
/// fails, so a half-built flow never leaks children.
struct Spawner {
    running: Vec<RunningStage>,
    stderr_limit: usize,
    armed: bool,
}

impl Spawner {
    fn new(stderr_limit: usize) -> Self {
        Self {
            running: Vec::new(),
            stderr_limit,
            armed: true,
        }
    }

    fn spawn(
        &mut self,
        cmd: &Cmd,
        stdin: Stdio,
        stdout: Stdio,
    ) -> Result<Option<ChildStdout>, TransportError> {
        let (_, stdout) = self.spawn_keep_stdin(cmd, stdin, stdout)?;
        Ok(stdout)
    }

    fn spawn_keep_stdin(
        &mut self,
        cmd: &Cmd,
        stdin: Stdio,
        stdout: Stdio,
    ) -> Result<(Option<ChildStdin>, Option<ChildStdout>), TransportError> {
        let mut command = spawn::command_from(cmd);
        command.stdin(stdin).stdout(stdout).stderr(Stdio::piped());
        debug!(program = cmd.program(), args = ?cmd.arg_list(), "spawning stage");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.abort();
                return Err(TransportError::Spawn {
                    program: cmd.program().to_owned(),
                    source,
                });
            }
        };
        let stdin_handle = child.stdin.take();
        let stdout_handle = child.stdout.take();
        let stderr = child
            .stderr
            .take()
            .map(|stream| collect_stderr(stream, self.stderr_limit));
        self.running.push(RunningStage {
            child,
            program: cmd.program().to_owned(),
            stderr,
        });
        Ok((stdin_handle, stdout_handle))
    }

    fn abort(&mut self) {
        if self.armed {
            abort_stages(&mut self.running);
            self.armed = false;
        }
    }

    fn disarm(mut self) -> Vec<RunningStage> {
        self.armed = false;
        std::mem::take(&mut self.running)
    }
}

impl Drop for Spawner {
    fn drop(&mut self) {
        self.abort();
    }
}

fn open_sink_file(path: &PathBuf) -> Result<File, TransportError> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| {
            if err.kind() == io::ErrorKind::AlreadyExists {
                TransportError::SinkExists(path.clone())
            } else {
                TransportError::Io(err)
            }
        })
}

/// Drains one stage's stderr into a bounded tail on its own thread.
fn collect_stderr(mut stream: ChildStderr, limit: usize) -> JoinHandle<(Vec<u8>, bool)> {
    thread::spawn(move || {
        let mut tail: VecDeque<u8> = VecDeque::with_capacity(limit.min(4096));
        let mut truncated = false;
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    tail.extend(&buf[..n]);
                    while tail.len() > limit {
                        tail.pop_front();
                        truncated = true;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        (tail.into_iter().collect(), truncated)
    })
}

/// Waits for every stage, escalating to `SIGTERM` then `SIGKILL` once the
/// grace window closes.
fn wait_with_grace(running: &mut [RunningStage], grace: Duration) -> Vec<Option<ExitStatus>> {
    let mut statuses: Vec<Option<ExitStatus>> = vec![None; running.len()];

    let mut poll = |statuses: &mut Vec<Option<ExitStatus>>, running: &mut [RunningStage]| {
        let mut pending = false;
        for (i, stage) in running.iter_mut().enumerate() {
            if statuses[i].is_none() {
                match stage.child.try_wait() {
                    Ok(Some(status)) => statuses[i] = Some(status),
                    Ok(None) => pending = true,
                    Err(_) => {}
                }
            }
        }
        pending
    };

    let deadline = Instant::now() + grace;
    while poll(&mut statuses, running) {
        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(Duration::from_millis(25));
    }

    for signal in [libc::SIGTERM, libc::SIGKILL] {
        if !poll(&mut statuses, running) {
            break;
        }
        for (i, stage) in running.iter().enumerate() {
            if statuses[i].is_none() {
                send_signal(&stage.child, signal);
            }
        }
        let escalate_deadline = Instant::now() + Duration::from_millis(500);
        while poll(&mut statuses, running) && Instant::now() < escalate_deadline {
            thread::sleep(Duration::from_millis(25));
        }
    }

    // After SIGKILL the children are reapable; a blocking wait closes any
    // remaining gap between kill and reap.
    for (i, stage) in running.iter_mut().enumerate() {
        if statuses[i].is_none() {
            statuses[i] = stage.child.wait().ok();
        }
    }
    statuses
}

/// Terminates and reaps every started stage; used on spawn failure and
/// pump errors.
fn abort_stages(running: &mut Vec<RunningStage>) {
    for stage in running.iter() {
        send_signal(&stage.child, libc::SIGTERM);
    }
    for mut stage in running.drain(..) {
        let _ = stage.child.wait();
        if let Some(handle) = stage.stderr.take() {
            let _ = handle.join();
        }
    }
}

#[allow(unsafe_code)]
fn send_signal(child: &Child, signal: libc::c_int) {
    // SAFETY: the pid comes from a Child handle this flow still owns, so
    // it has not been reaped and cannot have been recycled.
    unsafe {
        libc::kill(child.id() as libc::pid_t, signal);
    }
}

fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}
