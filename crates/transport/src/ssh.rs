//! Wrapping commands for execution on an SSH remote.

use crate::cmd::{Cmd, Pipeline};
use crate::error::TransportError;

/// Builder describing the remote end of an SSH invocation.
///
/// The target collects the connection parameters (`user`, `port`, identity
/// file, compression) and turns local [`Cmd`] values into `ssh` commands
/// whose final argument is the remote command as a quoted shell string, so
/// the remote side sees exactly the argv that was wrapped.
///
/// # Examples
///
/// ```
/// use cowsync_transport::{Cmd, SshTarget};
///
/// let target = SshTarget::new("backup.example.com").user("root").port(2222);
/// let wrapped = target.wrap(&Cmd::new("btrfs").arg("send").arg("/mnt/@snap"));
/// assert_eq!(wrapped.program(), "ssh");
/// assert_eq!(
///     wrapped.arg_list().last().map(String::as_str),
///     Some("btrfs send /mnt/@snap")
/// );
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshTarget {
    host: String,
    user: Option<String>,
    port: Option<u16>,
    identity: Option<String>,
    compress: bool,
    batch_mode: bool,
}

impl SshTarget {
    /// Creates a target for `host` with batch mode enabled.
    ///
    /// Batch mode makes `ssh` fail instead of prompting for a password,
    /// which keeps a broken authentication setup visible as an ordinary
    /// stage failure.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity: None,
            compress: false,
            batch_mode: true,
        }
    }

    /// Sets the remote login user (`-l`).
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the remote port (`-p`).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the identity file (`-i`).
    #[must_use]
    pub fn identity(mut self, path: impl Into<String>) -> Self {
        self.identity = Some(path.into());
        self
    }

    /// Enables SSH channel compression (`-C`).
    #[must_use]
    pub fn compress(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    /// Enables or disables batch mode (default: enabled).
    #[must_use]
    pub fn batch_mode(mut self, enabled: bool) -> Self {
        self.batch_mode = enabled;
        self
    }

    /// The remote host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The remote login user, if set.
    #[must_use]
    pub fn login_user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Human-readable `user@host` form for messages.
    #[must_use]
    pub fn display_target(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    fn base_cmd(&self) -> Cmd {
        let mut ssh = Cmd::new("ssh");
        if self.batch_mode {
            ssh = ssh.arg("-oBatchMode=yes");
        }
        if self.compress {
            ssh = ssh.arg("-C");
        }
        if let Some(user) = &self.user {
            ssh = ssh.arg("-l").arg(user);
        }
        if let Some(port) = self.port {
            ssh = ssh.arg("-p").arg(port.to_string());
        }
        if let Some(identity) = &self.identity {
            ssh = ssh.arg("-i").arg(identity);
        }
        ssh.arg(&self.host)
    }

    /// Wraps a single command for execution on the remote host.
    ///
    /// The wrapped command inherits the original's stream dispositions:
    /// bytes written to the remote command's stdout arrive on the local
    /// `ssh` process's stdout, and likewise for stdin.
    #[must_use]
    pub fn wrap(&self, cmd: &Cmd) -> Cmd {
        self.base_cmd()
            .arg(cmd.shell_string())
            .stdin(cmd.stdin_spec().clone())
            .stdout(cmd.stdout_spec().clone())
            .stderr(cmd.stderr_spec().clone())
    }

    /// Wraps a local pipeline, which must consist of a single stage.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PipelineOverSsh`] when the pipeline has
    /// more than one stage. A locally piped pipeline has its joints wired
    /// with OS pipes on this machine; pushing that construct through SSH is
    /// ill-defined. Remote pipelines are built with
    /// [`wrap_shell_stages`](Self::wrap_shell_stages) instead.
    pub fn wrap_pipeline(&self, pipeline: &Pipeline) -> Result<Cmd, TransportError> {
        if !pipeline.is_single() {
            return Err(TransportError::PipelineOverSsh);
        }
        Ok(self.wrap(&pipeline.stages()[0]))
    }

    /// Composes `stages` into a single remote shell pipeline.
    ///
    /// The stages become one quoted `a | b | c` string executed by the
    /// remote shell; the pipes between them exist inside the remote shell
    /// process, not on this machine.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::EmptyPipeline`] when `stages` is empty.
    pub fn wrap_shell_stages(&self, stages: &[Cmd]) -> Result<Cmd, TransportError> {
        let Some(first) = stages.first() else {
            return Err(TransportError::EmptyPipeline);
        };
        let last = stages.last().expect("non-empty slice has a last element");
        let remote = stages
            .iter()
            .map(Cmd::shell_string)
            .collect::<Vec<_>>()
            .join(" | ");
        Ok(self
            .base_cmd()
            .arg(remote)
            .stdin(first.stdin_spec().clone())
            .stdout(last.stdout_spec().clone()))
    }
}
