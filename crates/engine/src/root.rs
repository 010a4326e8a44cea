//! Endpoint drivers: the places subvolumes are read from and sent to.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::debug;
use uuid::Uuid;

use cowsync_btrfs as btrfs;
use cowsync_btrfs::{CowForest, Vol};
use cowsync_transport::{run_capture, Cmd, FlowSink, Pipeline, SshTarget, StreamSpec};

use crate::error::{EngineError, FsErrorKind};

/// What an endpoint can do, checked before any flow is spawned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caps {
    /// The endpoint can produce send streams.
    pub can_send: bool,
    /// The endpoint can consume send streams.
    pub can_receive: bool,
    /// The endpoint's listing matters for incremental planning.
    pub needs_list_for_planning: bool,
}

/// The receive side of one transfer: an optional consumer pipeline in
/// front of the terminal sink.
#[derive(Debug)]
pub struct Receive {
    /// Stages the stream passes through before the sink, if any.
    pub consumer: Option<Pipeline>,
    /// Where the stream ends up.
    pub sink: FlowSink,
}

/// A place that holds or receives subvolumes.
///
/// The variants form a closed set with a uniform capability surface;
/// asking a variant for an operation it cannot perform is an explicit
/// [`EngineError::Configuration`].
#[derive(Clone, Debug)]
pub enum Root {
    /// A locally mounted btrfs filesystem.
    Local(LocalRoot),
    /// A btrfs filesystem on a remote host reached over SSH.
    Ssh(SshRoot),
    /// A local directory of raw send-stream dumps, read side.
    DumpRead(DumpReadRoot),
    /// A local directory of raw send-stream dumps, write side.
    DumpWrite(DumpWriteRoot),
    /// This process's stdout.
    Pipe(PipeRoot),
}

impl Root {
    /// Human-readable identifier for messages.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Local(root) => root.mount.clone(),
            Self::Ssh(root) => format!("{}:{}", root.target.display_target(), root.mount),
            Self::DumpRead(root) => root.dir.display().to_string(),
            Self::DumpWrite(root) => root.dir.display().to_string(),
            Self::Pipe(_) => "-".to_owned(),
        }
    }

    /// The endpoint's capabilities.
    #[must_use]
    pub fn capabilities(&self) -> Caps {
        match self {
            Self::Local(_) | Self::Ssh(_) => Caps {
                can_send: true,
                can_receive: true,
                needs_list_for_planning: true,
            },
            Self::DumpRead(_) => Caps {
                can_send: true,
                can_receive: false,
                needs_list_for_planning: true,
            },
            Self::DumpWrite(_) | Self::Pipe(_) => Caps {
                can_send: false,
                can_receive: true,
                needs_list_for_planning: false,
            },
        }
    }

    /// Enumerates the subvolumes known to this endpoint as a built
    /// [`CowForest`]. Write-only endpoints return an empty forest.
    ///
    /// # Errors
    ///
    /// Listing failures, unparseable output, and forest inconsistencies
    /// all surface here; each is fatal for the run.
    pub fn list(&self) -> Result<CowForest, EngineError> {
        match self {
            Self::Local(root) => root.list(),
            Self::Ssh(root) => root.list(),
            Self::DumpRead(root) => root.list(),
            Self::DumpWrite(_) | Self::Pipe(_) => Ok(CowForest::new()),
        }
    }

    /// Builds the producer pipeline emitting `vol`'s send stream.
    ///
    /// # Errors
    ///
    /// [`EngineError::Configuration`] when the endpoint cannot send, or
    /// when incremental options are requested from a dump reader.
    pub fn send_pipeline(
        &self,
        vol: &Vol,
        parent: Option<&Vol>,
        clones: &[Vol],
    ) -> Result<Pipeline, EngineError> {
        match self {
            Self::Local(root) => root.send_pipeline(vol, parent, clones),
            Self::Ssh(root) => root.send_pipeline(vol, parent, clones),
            Self::DumpRead(root) => root.send_pipeline(vol, parent, clones),
            Self::DumpWrite(_) | Self::Pipe(_) => Err(EngineError::Configuration(format!(
                "{} cannot send subvolumes",
                self.name()
            ))),
        }
    }

    /// Pre-flight work for receiving into `dst_path` (relative to the
    /// endpoint), such as creating the destination directory.
    ///
    /// # Errors
    ///
    /// Filesystem checks and helper-command failures are fatal.
    pub fn prepare_receive(&self, dst_path: &str) -> Result<(), EngineError> {
        check_subpath(dst_path)?;
        match self {
            Self::Local(root) => root.prepare_receive(dst_path),
            Self::Ssh(root) => root.prepare_receive(dst_path),
            Self::DumpWrite(root) => root.prepare_receive(dst_path),
            Self::Pipe(_) => Ok(()),
            Self::DumpRead(_) => Err(EngineError::Configuration(format!(
                "{} cannot receive subvolumes",
                self.name()
            ))),
        }
    }

    /// Builds the receive side for a transfer into `dst_path`.
    ///
    /// # Errors
    ///
    /// [`EngineError::Configuration`] when the endpoint cannot receive.
    pub fn receive(&self, dst_path: &str) -> Result<Receive, EngineError> {
        check_subpath(dst_path)?;
        match self {
            Self::Local(root) => Ok(root.receive(dst_path)),
            Self::Ssh(root) => Ok(root.receive(dst_path)),
            Self::DumpWrite(root) => Ok(root.receive(dst_path)),
            Self::Pipe(_) => Ok(Receive {
                consumer: None,
                sink: FlowSink::Stdout,
            }),
            Self::DumpRead(_) => Err(EngineError::Configuration(format!(
                "{} cannot receive subvolumes",
                self.name()
            ))),
        }
    }
}

/// A locally mounted btrfs filesystem.
#[derive(Clone, Debug)]
pub struct LocalRoot {
    mount: String,
    sudo: bool,
    create_destpath: bool,
}

impl LocalRoot {
    /// Creates a driver anchored at `mount`.
    #[must_use]
    pub fn new(mount: impl Into<String>) -> Self {
        Self {
            mount: mount.into(),
            sudo: false,
            create_destpath: false,
        }
    }

    /// Runs every `btrfs` command through `sudo -n`.
    #[must_use]
    pub fn sudo(mut self, enabled: bool) -> Self {
        self.sudo = enabled;
        self
    }

    /// Creates missing destination directories before receiving.
    #[must_use]
    pub fn create_destpath(mut self, enabled: bool) -> Self {
        self.create_destpath = enabled;
        self
    }

    fn wrap(&self, cmd: Cmd) -> Cmd {
        if self.sudo { cmd.wrap_sudo() } else { cmd }
    }

    fn list(&self) -> Result<CowForest, EngineError> {
        list_forest(&self.mount, |cmd| self.wrap(cmd))
    }

    fn send_pipeline(
        &self,
        vol: &Vol,
        parent: Option<&Vol>,
        clones: &[Vol],
    ) -> Result<Pipeline, EngineError> {
        let cmd = send_cmd_for(&self.mount, vol, parent, clones)?;
        Ok(Pipeline::new(self.wrap(cmd)))
    }

    fn prepare_receive(&self, dst_path: &str) -> Result<(), EngineError> {
        if self.create_destpath {
            let dir = join_posix(&self.mount, posix_dirname(dst_path));
            run_checked(self.wrap(mkdir_cmd(&dir)))?;
        }
        Ok(())
    }

    fn receive(&self, dst_path: &str) -> Receive {
        let dir = join_posix(&self.mount, posix_dirname(dst_path));
        Receive {
            consumer: Some(Pipeline::new(self.wrap(btrfs::receive_cmd(&dir)))),
            sink: FlowSink::Stage,
        }
    }
}

/// A btrfs filesystem on a remote host, driven through `ssh`.
#[derive(Clone, Debug)]
pub struct SshRoot {
    target: SshTarget,
    mount: String,
    sudo: bool,
    create_destpath: bool,
}

impl SshRoot {
    /// Creates a driver for `mount` on the remote described by `target`.
    #[must_use]
    pub fn new(target: SshTarget, mount: impl Into<String>) -> Self {
        Self {
            target,
            mount: mount.into(),
            sudo: false,
            create_destpath: false,
        }
    }

    /// Runs every remote `btrfs` command through `sudo -n`.
    #[must_use]
    pub fn sudo(mut self, enabled: bool) -> Self {
        self.sudo = enabled;
        self
    }

    /// Creates missing destination directories before receiving.
    #[must_use]
    pub fn create_destpath(mut self, enabled: bool) -> Self {
        self.create_destpath = enabled;
        self
    }

    fn wrap(&self, cmd: Cmd) -> Cmd {
        let cmd = if self.sudo { cmd.wrap_sudo() } else { cmd };
        self.target.wrap(&cmd)
    }

    fn list(&self) -> Result<CowForest, EngineError> {
        list_forest(&self.mount, |cmd| self.wrap(cmd))
    }

    fn send_pipeline(
        &self,
        vol: &Vol,
        parent: Option<&Vol>,
        clones: &[Vol],
    ) -> Result<Pipeline, EngineError> {
        let cmd = send_cmd_for(&self.mount, vol, parent, clones)?;
        Ok(Pipeline::new(self.wrap(cmd)))
    }

    fn prepare_receive(&self, dst_path: &str) -> Result<(), EngineError> {
        if self.create_destpath {
            let dir = join_posix(&self.mount, posix_dirname(dst_path));
            run_checked(self.wrap(mkdir_cmd(&dir)))?;
        }
        Ok(())
    }

    fn receive(&self, dst_path: &str) -> Receive {
        let dir = join_posix(&self.mount, posix_dirname(dst_path));
        Receive {
            consumer: Some(Pipeline::new(self.wrap(btrfs::receive_cmd(&dir)))),
            sink: FlowSink::Stage,
        }
    }
}

/// A directory of raw send-stream dumps used as a source.
///
/// Every `*.stream` file is presented as one sendable subvolume. Dumps
/// carry no COW history, so only full transfers can originate here.
#[derive(Clone, Debug)]
pub struct DumpReadRoot {
    dir: PathBuf,
}

impl DumpReadRoot {
    /// Creates a driver reading dumps from `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn list(&self) -> Result<CowForest, EngineError> {
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&self.dir).map_err(|_| EngineError::Filesystem {
            kind: FsErrorKind::NotFound,
            path: self.dir.clone(),
        })?;
        for entry in entries {
            let entry = entry.map_err(|err| EngineError::Transport(err.into()))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "stream") {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    names.push(stem.to_owned());
                }
            }
        }
        names.sort();
        debug!(dir = %self.dir.display(), dumps = names.len(), "listed dump directory");

        let vols = names.into_iter().enumerate().map(|(i, name)| Vol {
            id: i as u64,
            gen: 0,
            uuid: Uuid::new_v4(),
            parent_uuid: Uuid::nil(),
            received_uuid: Uuid::nil(),
            path: name,
            ro: true,
        });
        CowForest::from_vols(vols).map_err(Into::into)
    }

    fn send_pipeline(
        &self,
        vol: &Vol,
        parent: Option<&Vol>,
        clones: &[Vol],
    ) -> Result<Pipeline, EngineError> {
        if parent.is_some() || !clones.is_empty() {
            return Err(EngineError::Configuration(
                "stream dumps cannot be sent incrementally; a dump has no parent to diff against"
                    .to_owned(),
            ));
        }
        let file = self.dir.join(format!("{}.stream", vol.path));
        let cmd = Cmd::new("cat")
            .arg(file.display().to_string())
            .stdin(StreamSpec::Null);
        Ok(Pipeline::new(cmd))
    }
}

/// A directory of raw send-stream dumps used as a destination.
#[derive(Clone, Debug)]
pub struct DumpWriteRoot {
    dir: PathBuf,
    filter: Option<Pipeline>,
    create_destpath: bool,
}

impl DumpWriteRoot {
    /// Creates a driver writing dumps into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            filter: None,
            create_destpath: false,
        }
    }

    /// Interposes a user-supplied shell pipeline in front of each dump
    /// file, e.g. a compressor.
    #[must_use]
    pub fn filter(mut self, filter: Pipeline) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Creates missing destination directories before receiving.
    #[must_use]
    pub fn create_destpath(mut self, enabled: bool) -> Self {
        self.create_destpath = enabled;
        self
    }

    fn target_dir(&self, dst_path: &str) -> PathBuf {
        let dir = posix_dirname(dst_path);
        if dir.is_empty() {
            self.dir.clone()
        } else {
            self.dir.join(dir)
        }
    }

    fn prepare_receive(&self, dst_path: &str) -> Result<(), EngineError> {
        let target = self.target_dir(dst_path);
        if self.create_destpath {
            std::fs::create_dir_all(&target).map_err(|err| EngineError::Transport(err.into()))?;
        } else if !target.is_dir() {
            let kind = if target.exists() {
                FsErrorKind::NotADirectory
            } else {
                FsErrorKind::NotFound
            };
            return Err(EngineError::Filesystem { kind, path: target });
        }
        Ok(())
    }

    fn receive(&self, dst_path: &str) -> Receive {
        let name = dst_path.rsplit('/').next().unwrap_or(dst_path);
        let file = self.target_dir(dst_path).join(format!("{name}.stream"));
        Receive {
            consumer: self.filter.clone(),
            sink: FlowSink::File(file),
        }
    }
}

/// The enclosing process's stdout, for dumping a stream onward.
#[derive(Clone, Debug, Default)]
pub struct PipeRoot;

/// Lists `mount` twice (full, then read-only) and folds both into one
/// forest; a subvolume is sendable iff it appears in the second listing.
fn list_forest(
    mount: &str,
    wrap: impl Fn(Cmd) -> Cmd,
) -> Result<CowForest, EngineError> {
    let all_out = run_checked(wrap(btrfs::list_cmd(mount)))?;
    let ro_out = run_checked(wrap(btrfs::list_readonly_cmd(mount)))?;

    let ro_uuids: HashSet<Uuid> = btrfs::parse_list(&ro_out)?
        .into_iter()
        .map(|vol| vol.uuid)
        .collect();

    let mut vols = btrfs::parse_list(&all_out)?;
    for vol in &mut vols {
        vol.ro = ro_uuids.contains(&vol.uuid);
    }
    debug!(mount, subvolumes = vols.len(), readonly = ro_uuids.len(), "listed btrfs root");

    CowForest::from_vols(vols).map_err(Into::into)
}

/// Runs a helper command, mapping a nonzero exit to
/// [`EngineError::CommandFailed`] and returning its stdout as text.
fn run_checked(cmd: Cmd) -> Result<String, EngineError> {
    let capture = run_capture(&cmd)?;
    if !capture.success() {
        return Err(EngineError::CommandFailed {
            command: cmd.shell_string(),
            stderr: capture.stderr_text(),
        });
    }
    Ok(String::from_utf8_lossy(&capture.stdout).into_owned())
}

fn send_cmd_for(
    mount: &str,
    vol: &Vol,
    parent: Option<&Vol>,
    clones: &[Vol],
) -> Result<Cmd, EngineError> {
    check_subpath(&vol.path)?;
    for related in parent.iter().copied().chain(clones.iter()) {
        check_subpath(&related.path)?;
    }
    let path = join_posix(mount, &vol.path);
    let parent_path = parent.map(|p| join_posix(mount, &p.path));
    let clone_paths: Vec<String> = clones
        .iter()
        .map(|clone| join_posix(mount, &clone.path))
        .collect();
    Ok(btrfs::send_cmd(&path, parent_path.as_deref(), &clone_paths))
}

fn mkdir_cmd(dir: &str) -> Cmd {
    Cmd::new("mkdir")
        .arg("-p")
        .arg(dir)
        .stdin(StreamSpec::Null)
}

/// Joins a mount point and a relative subvolume path with POSIX rules;
/// subvolume paths are POSIX on both local and remote roots.
fn join_posix(base: &str, rel: &str) -> String {
    if rel.is_empty() {
        base.to_owned()
    } else if base.ends_with('/') {
        format!("{base}{rel}")
    } else {
        format!("{base}/{rel}")
    }
}

fn posix_dirname(path: &str) -> &str {
    path.rfind('/').map_or("", |i| &path[..i])
}

/// Relative paths handed to roots must stay below their anchor.
fn check_subpath(rel: &str) -> Result<(), EngineError> {
    let escapes = rel.starts_with('/') || rel.split('/').any(|component| component == "..");
    if escapes {
        return Err(EngineError::Configuration(format!(
            "path `{rel}` must be relative and cannot escape its base directory"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vol(path: &str) -> Vol {
        Vol {
            id: 1,
            gen: 1,
            uuid: Uuid::from_u128(1),
            parent_uuid: Uuid::nil(),
            received_uuid: Uuid::nil(),
            path: path.to_owned(),
            ro: true,
        }
    }

    #[test]
    fn local_send_uses_absolute_paths() {
        let root = LocalRoot::new("/mnt/pool");
        let pipeline = root.send_pipeline(&vol("snaps/a"), None, &[]).unwrap();
        let stage = &pipeline.stages()[0];
        assert_eq!(stage.program(), "btrfs");
        assert_eq!(stage.arg_list(), &["send", "/mnt/pool/snaps/a"]);
    }

    #[test]
    fn local_sudo_wraps_send_and_receive() {
        let root = LocalRoot::new("/mnt/pool").sudo(true);
        let pipeline = root.send_pipeline(&vol("a"), None, &[]).unwrap();
        assert_eq!(pipeline.stages()[0].program(), "sudo");

        let receive = root.receive("a");
        let consumer = receive.consumer.unwrap();
        assert_eq!(consumer.stages()[0].program(), "sudo");
    }

    #[test]
    fn local_receive_targets_the_containing_directory() {
        let root = LocalRoot::new("/mnt/backups");
        let receive = root.receive("daily/root-2024-01-01");
        let consumer = receive.consumer.unwrap();
        assert_eq!(
            consumer.stages()[0].arg_list(),
            &["receive", "/mnt/backups/daily"]
        );
        assert_eq!(receive.sink, FlowSink::Stage);
    }

    #[test]
    fn ssh_send_is_a_single_remote_command() {
        let root = SshRoot::new(SshTarget::new("host"), "/pool").sudo(true);
        let pipeline = root.send_pipeline(&vol("a"), None, &[]).unwrap();
        assert!(pipeline.is_single());
        let stage = &pipeline.stages()[0];
        assert_eq!(stage.program(), "ssh");
        assert_eq!(
            stage.arg_list().last().map(String::as_str),
            Some("sudo -n btrfs send /pool/a")
        );
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let root = LocalRoot::new("/mnt/pool");
        assert!(matches!(
            root.send_pipeline(&vol("../etc"), None, &[]),
            Err(EngineError::Configuration(_))
        ));
        let rooted = Root::Local(LocalRoot::new("/mnt/pool"));
        assert!(matches!(
            rooted.receive("/absolute"),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn dump_reader_lists_stream_files_as_full_sends() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.stream"), b"x").unwrap();
        std::fs::write(dir.path().join("a.stream"), b"y").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), b"z").unwrap();

        let root = DumpReadRoot::new(dir.path());
        let forest = root.list().unwrap();
        let paths: Vec<&str> = forest.vols().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, ["a", "b"]);
        assert!(forest.vols().all(|v| v.ro));
    }

    #[test]
    fn dump_reader_rejects_incremental_send() {
        let dir = tempfile::tempdir().unwrap();
        let root = DumpReadRoot::new(dir.path());
        let parent = vol("parent");
        let err = root
            .send_pipeline(&vol("a"), Some(&parent), &[])
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn dump_writer_names_the_stream_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = DumpWriteRoot::new(dir.path());
        let receive = root.receive("daily/root");
        match receive.sink {
            FlowSink::File(path) => {
                assert_eq!(path, dir.path().join("daily").join("root.stream"));
            }
            other => panic!("expected file sink, got {other:?}"),
        }
    }

    #[test]
    fn dump_writer_checks_the_target_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = DumpWriteRoot::new(dir.path().join("missing"));
        let err = root.prepare_receive("a").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Filesystem {
                kind: FsErrorKind::NotFound,
                ..
            }
        ));

        let creating = DumpWriteRoot::new(dir.path().join("created")).create_destpath(true);
        creating.prepare_receive("a").unwrap();
        assert!(dir.path().join("created").is_dir());
    }

    #[test]
    fn capability_table_matches_the_variants() {
        let local = Root::Local(LocalRoot::new("/mnt"));
        assert!(local.capabilities().can_send);
        assert!(local.capabilities().can_receive);

        let dump_read = Root::DumpRead(DumpReadRoot::new("/tmp"));
        assert!(dump_read.capabilities().can_send);
        assert!(!dump_read.capabilities().can_receive);

        let pipe = Root::Pipe(PipeRoot);
        assert!(!pipe.capabilities().can_send);
        assert!(pipe.capabilities().can_receive);
        assert!(!pipe.capabilities().needs_list_for_planning);
    }

    #[test]
    fn write_only_roots_list_empty_forests() {
        let pipe = Root::Pipe(PipeRoot);
        assert!(pipe.list().unwrap().is_empty());
    }
}
