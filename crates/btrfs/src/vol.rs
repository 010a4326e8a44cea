//! The subvolume record.

use uuid::Uuid;

/// One btrfs subvolume as reported by `btrfs subvolume list`.
///
/// Paths are kept relative to the root they were listed from, so the same
/// record works for a local mount and for a remote mount reached over SSH.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vol {
    /// Internal subvolume id; only meaningful within one root.
    pub id: u64,
    /// Generation at the time of listing; newer changes mean higher
    /// generations.
    pub gen: u64,
    /// Identity assigned by btrfs at creation, unique within a root.
    pub uuid: Uuid,
    /// Uuid of the snapshot source, or nil for a standalone subvolume.
    /// The source may have been deleted since the snapshot was taken.
    pub parent_uuid: Uuid,
    /// For a subvolume created by `btrfs receive`, the uuid of the
    /// subvolume the stream was generated from; nil otherwise.
    pub received_uuid: Uuid,
    /// Path relative to the root mount point.
    pub path: String,
    /// Whether the subvolume is read-only and therefore sendable.
    pub ro: bool,
}

impl Vol {
    /// Whether this subvolume was created by `btrfs receive`.
    #[must_use]
    pub fn is_received(&self) -> bool {
        !self.received_uuid.is_nil()
    }

    /// Whether this subvolume is a snapshot of some (possibly deleted)
    /// subvolume.
    #[must_use]
    pub fn has_parent(&self) -> bool {
        !self.parent_uuid.is_nil()
    }

    /// Final path component, used for flattened destination layouts and
    /// dump file names.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vol(path: &str) -> Vol {
        Vol {
            id: 256,
            gen: 1,
            uuid: Uuid::from_u128(1),
            parent_uuid: Uuid::nil(),
            received_uuid: Uuid::nil(),
            path: path.to_owned(),
            ro: true,
        }
    }

    #[test]
    fn name_is_the_last_component() {
        assert_eq!(vol("snapshots/daily/root-2024-01-01").name(), "root-2024-01-01");
        assert_eq!(vol("toplevel").name(), "toplevel");
    }

    #[test]
    fn received_and_parent_flags_follow_nil_uuids() {
        let mut v = vol("a");
        assert!(!v.is_received());
        assert!(!v.has_parent());
        v.received_uuid = Uuid::from_u128(7);
        v.parent_uuid = Uuid::from_u128(9);
        assert!(v.is_received());
        assert!(v.has_parent());
    }
}
