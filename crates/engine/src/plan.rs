//! The COW-aware transfer planner.
//!
//! Planning is pure: two built forests go in, an ordered list of per-
//! subvolume decisions comes out. The destination's received-uuid index
//! is the incrementality substrate — a destination subvolume whose
//! `received_uuid` equals a source uuid *is* a copy of that source
//! subvolume, so diffing against it only ships the difference.

use std::fmt;

use tracing::debug;

use cowsync_btrfs::{CowForest, Vol};

/// How source paths map into the destination.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Layout {
    /// Place every subvolume directly in the destination under its
    /// basename.
    #[default]
    Flatten,
    /// Recreate the source-relative directory structure.
    Replicate,
}

impl Layout {
    /// The destination-relative path for a source subvolume path.
    #[must_use]
    pub fn dst_path(&self, src_path: &str) -> String {
        match self {
            Self::Flatten => src_path
                .rsplit('/')
                .next()
                .unwrap_or(src_path)
                .to_owned(),
            Self::Replicate => src_path.to_owned(),
        }
    }
}

/// Why a source subvolume was not planned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The destination already holds a copy of this subvolume.
    AlreadyPresent,
    /// Incremental-only mode and no usable parent exists.
    NoParent,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AlreadyPresent => "already present at destination",
            Self::NoParent => "no parent for incremental transfer",
        })
    }
}

/// A subvolume the planner decided not to transfer.
#[derive(Clone, Debug)]
pub struct Skipped {
    /// The subvolume in question.
    pub vol: Vol,
    /// Why it was left out.
    pub reason: SkipReason,
}

/// The transfer decision for one subvolume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    /// The subvolume to send.
    pub src_vol: Vol,
    /// Diff basis (`btrfs send -p`); `None` means a full transfer.
    pub parent: Option<Vol>,
    /// Additional reference subvolumes (`btrfs send -c`), never
    /// containing the parent and free of duplicates.
    pub clones: Vec<Vol>,
    /// Destination-relative path of the transferred subvolume.
    pub dst_path: String,
}

impl Plan {
    /// Whether the plan diffs against a parent.
    #[must_use]
    pub fn is_incremental(&self) -> bool {
        self.parent.is_some()
    }

    /// `"incremental"` or `"full"`, for messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        if self.is_incremental() {
            "incremental"
        } else {
            "full"
        }
    }
}

/// Ordered planner output.
#[derive(Debug, Default)]
pub struct PlanSet {
    /// Transfers to run, in order.
    pub plans: Vec<Plan>,
    /// Subvolumes left out, with reasons.
    pub skipped: Vec<Skipped>,
}

impl PlanSet {
    /// Whether nothing is left to transfer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

/// Plans transfers from `src` to `dst` for every selected subvolume.
///
/// Only read-only subvolumes can be sent or diffed against, so both the
/// targets and the parent/clone candidates come from the source forest's
/// eligible set. Per eligible subvolume `S`, in canonical `(path, uuid)`
/// order:
///
/// 1. If some destination subvolume received `S` itself, `S` is already
///    present and skipped.
/// 2. Candidates are the other eligible source subvolumes that share
///    `S`'s snapshot-tree root and have a received counterpart at the
///    destination. The parent is the candidate ancestor of `S` with the
///    greatest generation not exceeding `S`'s, ties broken by the
///    shortest snapshot distance; failing any such ancestor, the first
///    candidate in canonical order.
/// 3. The remaining candidates become clone sources.
///
/// With `incremental_only`, a subvolume with no parent candidate is
/// skipped instead of planned as a full transfer.
///
/// The function performs no I/O and is deterministic: shuffling the
/// insertion order of either forest does not change the output.
#[must_use]
pub fn plan(
    src: &CowForest,
    dst: &CowForest,
    select: &dyn Fn(&Vol) -> bool,
    layout: Layout,
    incremental_only: bool,
) -> PlanSet {
    let dst_received = dst.received_index();

    let mut ordered: Vec<&Vol> = src.iter_eligible().collect();
    ordered.sort_by(|a, b| (a.path.as_str(), a.uuid).cmp(&(b.path.as_str(), b.uuid)));

    let mut set = PlanSet::default();
    for vol in ordered.iter().copied().filter(|vol| select(vol)) {
        if dst_received.contains_key(&vol.uuid) {
            set.skipped.push(Skipped {
                vol: vol.clone(),
                reason: SkipReason::AlreadyPresent,
            });
            continue;
        }

        let root = src
            .root_of(&vol.uuid)
            .expect("selected subvolume comes from this forest")
            .uuid;
        let candidates: Vec<&Vol> = ordered
            .iter()
            .copied()
            .filter(|c| c.uuid != vol.uuid)
            .filter(|c| dst_received.contains_key(&c.uuid))
            .filter(|c| src.root_of(&c.uuid).map(|r| r.uuid) == Some(root))
            .collect();

        let parent = choose_parent(src, vol, &candidates);
        if parent.is_none() && incremental_only {
            set.skipped.push(Skipped {
                vol: vol.clone(),
                reason: SkipReason::NoParent,
            });
            continue;
        }

        let clones: Vec<Vol> = candidates
            .iter()
            .copied()
            .filter(|c| parent.map(|p| p.uuid) != Some(c.uuid))
            .cloned()
            .collect();

        debug!(
            subvol = %vol.path,
            parent = parent.map(|p| p.path.as_str()),
            clones = clones.len(),
            "planned transfer"
        );
        set.plans.push(Plan {
            src_vol: vol.clone(),
            parent: parent.cloned(),
            clones,
            dst_path: layout.dst_path(&vol.path),
        });
    }
    set
}

/// Picks the transfer parent for `target` among `candidates`.
///
/// Ancestors of `target` make the cheapest diff bases; among those with a
/// generation not exceeding the target's, the newest wins, and equal
/// generations prefer the nearest. When no ancestor qualifies, any
/// same-root candidate still shares extents worth diffing against, so the
/// first in canonical order is taken.
fn choose_parent<'a>(src: &CowForest, target: &Vol, candidates: &[&'a Vol]) -> Option<&'a Vol> {
    let mut best: Option<(&'a Vol, u32)> = None;
    for candidate in candidates.iter().copied() {
        let Some(distance) = src.distance(&target.uuid, &candidate.uuid) else {
            continue;
        };
        if candidate.gen > target.gen {
            continue;
        }
        let better = match best {
            None => true,
            Some((current, current_distance)) => {
                candidate.gen > current.gen
                    || (candidate.gen == current.gen && distance < current_distance)
            }
        };
        if better {
            best = Some((candidate, distance));
        }
    }
    best.map(|(vol, _)| vol).or_else(|| candidates.first().copied())
}
