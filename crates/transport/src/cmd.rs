//! Command values and local pipeline composition.

use std::path::PathBuf;

use crate::error::TransportError;
use crate::quote::shell_quote;

/// Disposition of one standard stream of a [`Cmd`].
///
/// The set is closed on purpose: every way a stage can be wired is one of
/// these cases, so pipeline assembly never has to reason about arbitrary
/// stream-like objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamSpec {
    /// Inherit the parent's stream.
    Inherit,
    /// Connect to `/dev/null`.
    Null,
    /// Connect to a fresh pipe owned by the spawner.
    Piped,
    /// Connect to an already-open file descriptor.
    Fd(i32),
    /// Open the named file at spawn time.
    File {
        /// Path of the file to open.
        path: PathBuf,
        /// Append instead of truncating when the stream is an output.
        append: bool,
    },
}

impl StreamSpec {
    /// Convenience constructor for [`StreamSpec::File`] in truncate mode.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            append: false,
        }
    }
}

/// An immutable description of one external command invocation.
///
/// A `Cmd` is a value: it can be cloned, compared, wrapped (by `sudo -n`
/// or an SSH target) and composed into a [`Pipeline`] without touching the
/// OS. Nothing happens until a flow spawns it.
///
/// # Examples
///
/// ```
/// use cowsync_transport::Cmd;
///
/// let cmd = Cmd::new("btrfs")
///     .arg("send")
///     .arg("/mnt/@snap");
/// assert_eq!(cmd.program(), "btrfs");
/// assert_eq!(cmd.shell_string(), "btrfs send /mnt/@snap");
///
/// let elevated = cmd.wrap_sudo();
/// assert_eq!(elevated.program(), "sudo");
/// assert_eq!(elevated.shell_string(), "sudo -n btrfs send /mnt/@snap");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    stdin: StreamSpec,
    stdout: StreamSpec,
    stderr: StreamSpec,
}

impl Cmd {
    /// Creates a command with no arguments and all streams inherited.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stdin: StreamSpec::Inherit,
            stdout: StreamSpec::Inherit,
            stderr: StreamSpec::Inherit,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment override for the spawned process.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Sets the stdin disposition.
    #[must_use]
    pub fn stdin(mut self, spec: StreamSpec) -> Self {
        self.stdin = spec;
        self
    }

    /// Sets the stdout disposition.
    #[must_use]
    pub fn stdout(mut self, spec: StreamSpec) -> Self {
        self.stdout = spec;
        self
    }

    /// Sets the stderr disposition.
    #[must_use]
    pub fn stderr(mut self, spec: StreamSpec) -> Self {
        self.stderr = spec;
        self
    }

    /// The program to execute.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The arguments following the program.
    #[must_use]
    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    /// Environment overrides applied to the spawned process.
    #[must_use]
    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// The stdin disposition.
    #[must_use]
    pub fn stdin_spec(&self) -> &StreamSpec {
        &self.stdin
    }

    /// The stdout disposition.
    #[must_use]
    pub fn stdout_spec(&self) -> &StreamSpec {
        &self.stdout
    }

    /// The stderr disposition.
    #[must_use]
    pub fn stderr_spec(&self) -> &StreamSpec {
        &self.stderr
    }

    /// Renders the command as a single shell-safe string.
    ///
    /// Environment overrides become leading `KEY=value` assignments so the
    /// rendered form is a complete POSIX command, suitable for handing to a
    /// remote shell.
    #[must_use]
    pub fn shell_string(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.envs {
            out.push_str(key);
            out.push('=');
            out.push_str(&shell_quote(value));
            out.push(' ');
        }
        out.push_str(&shell_quote(&self.program));
        for arg in &self.args {
            out.push(' ');
            out.push_str(&shell_quote(arg));
        }
        out
    }

    /// Returns the command prefixed with `sudo -n`.
    ///
    /// `-n` makes sudo fail immediately instead of prompting, so an
    /// unauthenticated invocation shows up as an ordinary stage failure.
    /// Stream dispositions and environment overrides are preserved.
    #[must_use]
    pub fn wrap_sudo(&self) -> Cmd {
        let mut wrapped = Cmd::new("sudo").arg("-n").arg(&self.program);
        wrapped.args.extend(self.args.iter().cloned());
        wrapped.envs = self.envs.clone();
        wrapped.stdin = self.stdin.clone();
        wrapped.stdout = self.stdout.clone();
        wrapped.stderr = self.stderr.clone();
        wrapped
    }
}

/// A local pipeline: commands joined stdout-to-stdin by OS pipes.
///
/// The pipeline itself is still a value; a [`Flow`](crate::Flow) turns it
/// into running processes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Cmd>,
}

impl Pipeline {
    /// Creates a single-stage pipeline.
    #[must_use]
    pub fn new(first: Cmd) -> Self {
        Self {
            stages: vec![first],
        }
    }

    /// Builds a pipeline from existing stages.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::EmptyPipeline`] when `stages` is empty.
    pub fn from_stages(stages: Vec<Cmd>) -> Result<Self, TransportError> {
        if stages.is_empty() {
            return Err(TransportError::EmptyPipeline);
        }
        Ok(Self { stages })
    }

    /// Appends a stage whose stdin is the previous stage's stdout.
    #[must_use]
    pub fn then(mut self, next: Cmd) -> Self {
        self.stages.push(next);
        self
    }

    /// The stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Cmd] {
        &self.stages
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages. Always `false` for a pipeline
    /// built through the public constructors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Whether the pipeline consists of a single command.
    #[must_use]
    pub fn is_single(&self) -> bool {
        self.stages.len() == 1
    }

    /// Wraps every stage with `sudo -n`.
    #[must_use]
    pub fn wrap_sudo(&self) -> Pipeline {
        Pipeline {
            stages: self.stages.iter().map(Cmd::wrap_sudo).collect(),
        }
    }

    /// Renders the pipeline as a `a | b | c` shell string.
    #[must_use]
    pub fn shell_string(&self) -> String {
        self.stages
            .iter()
            .map(Cmd::shell_string)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

impl From<Cmd> for Pipeline {
    fn from(cmd: Cmd) -> Self {
        Pipeline::new(cmd)
    }
}
