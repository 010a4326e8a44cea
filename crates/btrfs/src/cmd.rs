//! Builders for the `btrfs` invocations cowsync runs.
//!
//! Commands are produced as [`Cmd`] values with stdin already pointed at
//! `/dev/null` where nothing should be read, leaving sudo and SSH
//! wrapping to the endpoint drivers.

use cowsync_transport::{Cmd, StreamSpec};

/// Lists every subvolume of the filesystem holding `mount`, with the
/// uuid, parent-uuid, and received-uuid columns the planner needs.
#[must_use]
pub fn list_cmd(mount: &str) -> Cmd {
    Cmd::new("btrfs")
        .args(["subvolume", "list", "-a", "-u", "-q", "-R", "-t"])
        .arg(mount)
        .stdin(StreamSpec::Null)
}

/// Like [`list_cmd`] but restricted to read-only subvolumes; the uuid
/// intersection of the two listings yields the sendable set.
#[must_use]
pub fn list_readonly_cmd(mount: &str) -> Cmd {
    Cmd::new("btrfs")
        .args(["subvolume", "list", "-a", "-u", "-q", "-R", "-r", "-t"])
        .arg(mount)
        .stdin(StreamSpec::Null)
}

/// Emits the send stream of `path` on stdout, diffed against `parent`
/// (`-p`) and allowed to reference `clones` (`-c`) when given.
#[must_use]
pub fn send_cmd(path: &str, parent: Option<&str>, clones: &[String]) -> Cmd {
    let mut cmd = Cmd::new("btrfs").arg("send");
    if let Some(parent) = parent {
        cmd = cmd.arg("-p").arg(parent);
    }
    for clone in clones {
        cmd = cmd.arg("-c").arg(clone);
    }
    cmd.arg(path).stdin(StreamSpec::Null)
}

/// Consumes a send stream on stdin, creating the received subvolume
/// inside `dir`.
#[must_use]
pub fn receive_cmd(dir: &str) -> Cmd {
    Cmd::new("btrfs")
        .arg("receive")
        .arg(dir)
        .stdin(StreamSpec::Piped)
}
