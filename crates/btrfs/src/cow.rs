//! The COW snapshot forest.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::error::CowError;
use crate::vol::Vol;

/// A forest of subvolumes linked by snapshot parentage.
///
/// Subvolumes are held in an arena with a uuid index; snapshot edges are
/// resolved once by [`build`](Self::build), which also computes each
/// node's forest root and rejects cycles. Received-from relations (which
/// cross roots) are exposed through [`received_index`](Self::received_index)
/// rather than stored as edges: they key the planner's incrementality
/// lookup, nothing more.
///
/// # Examples
///
/// ```
/// use cowsync_btrfs::{CowForest, Vol};
/// use uuid::Uuid;
///
/// let base = Vol {
///     id: 256, gen: 10,
///     uuid: Uuid::from_u128(1),
///     parent_uuid: Uuid::nil(),
///     received_uuid: Uuid::nil(),
///     path: "base".into(), ro: true,
/// };
/// let snap = Vol {
///     id: 257, gen: 11,
///     uuid: Uuid::from_u128(2),
///     parent_uuid: Uuid::from_u128(1),
///     received_uuid: Uuid::nil(),
///     path: "snap".into(), ro: true,
/// };
///
/// let forest = CowForest::from_vols([base.clone(), snap.clone()]).unwrap();
/// assert_eq!(forest.root_of(&snap.uuid).unwrap().uuid, base.uuid);
/// ```
#[derive(Debug, Default)]
pub struct CowForest {
    vols: Vec<Vol>,
    index: HashMap<Uuid, usize>,
    parent: Vec<Option<usize>>,
    root: Vec<usize>,
    built: bool,
}

impl CowForest {
    /// Creates an empty forest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a forest from records in one pass.
    ///
    /// # Errors
    ///
    /// Propagates [`CowError::DuplicateUuid`] from insertion and
    /// [`CowError::Cycle`] from edge resolution.
    pub fn from_vols(vols: impl IntoIterator<Item = Vol>) -> Result<Self, CowError> {
        let mut forest = Self::new();
        for vol in vols {
            forest.insert(vol)?;
        }
        forest.build()?;
        Ok(forest)
    }

    /// Adds a subvolume to the arena.
    ///
    /// # Errors
    ///
    /// Returns [`CowError::DuplicateUuid`] when the uuid is already
    /// indexed; a root never reports the same subvolume twice.
    pub fn insert(&mut self, vol: Vol) -> Result<(), CowError> {
        if self.index.contains_key(&vol.uuid) {
            return Err(CowError::DuplicateUuid(vol.uuid));
        }
        self.index.insert(vol.uuid, self.vols.len());
        self.vols.push(vol);
        self.built = false;
        Ok(())
    }

    /// Resolves snapshot edges and computes forest roots.
    ///
    /// A `parent_uuid` with no match in the arena marks the child as a
    /// forest root: the snapshot source existed once but may have been
    /// deleted, and that is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`CowError::Cycle`] when following parent links revisits a
    /// subvolume.
    pub fn build(&mut self) -> Result<(), CowError> {
        let n = self.vols.len();
        self.parent = (0..n)
            .map(|i| {
                let parent_uuid = self.vols[i].parent_uuid;
                if parent_uuid.is_nil() {
                    None
                } else {
                    self.index.get(&parent_uuid).copied()
                }
            })
            .collect();

        let mut roots: Vec<Option<usize>> = vec![None; n];
        for start in 0..n {
            if roots[start].is_some() {
                continue;
            }
            let mut path = Vec::new();
            let mut on_path = HashSet::new();
            let mut cursor = start;
            let root = loop {
                if let Some(root) = roots[cursor] {
                    break root;
                }
                if !on_path.insert(cursor) {
                    return Err(CowError::Cycle(self.vols[cursor].uuid));
                }
                path.push(cursor);
                match self.parent[cursor] {
                    Some(parent) => cursor = parent,
                    None => break cursor,
                }
            };
            for node in path {
                roots[node] = Some(root);
            }
        }
        self.root = roots
            .into_iter()
            .map(|root| root.expect("every node was assigned a root"))
            .collect();
        self.built = true;
        Ok(())
    }

    /// Number of subvolumes in the forest.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vols.len()
    }

    /// Whether the forest holds no subvolumes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vols.is_empty()
    }

    /// Iterates over every subvolume in insertion order.
    pub fn vols(&self) -> impl Iterator<Item = &Vol> {
        self.vols.iter()
    }

    /// Iterates over the subvolumes eligible to send: the read-only ones.
    pub fn iter_eligible(&self) -> impl Iterator<Item = &Vol> {
        self.vols.iter().filter(|vol| vol.ro)
    }

    /// The in-forest snapshot parent of `uuid`, if its source is present.
    #[must_use]
    pub fn snapshot_parent(&self, uuid: &Uuid) -> Option<&Vol> {
        self.assert_built();
        let i = *self.index.get(uuid)?;
        self.parent[i].map(|p| &self.vols[p])
    }

    /// The forest root reached from `uuid` by following snapshot edges
    /// upward. A subvolume with no in-forest parent is its own root.
    #[must_use]
    pub fn root_of(&self, uuid: &Uuid) -> Option<&Vol> {
        self.assert_built();
        let i = *self.index.get(uuid)?;
        Some(&self.vols[self.root[i]])
    }

    /// Iterates over `uuid` and its snapshot ancestors, nearest first,
    /// by following [`snapshot_parent`](Self::snapshot_parent) links.
    pub fn ancestors<'a>(&'a self, uuid: &Uuid) -> impl Iterator<Item = &'a Vol> {
        self.assert_built();
        let mut cursor = self.index.get(uuid).map(|&i| &self.vols[i]);
        std::iter::from_fn(move || {
            let vol = cursor?;
            cursor = self.snapshot_parent(&vol.uuid);
            Some(vol)
        })
    }

    /// Snapshot-edge hops from `from` up to `to`; `None` when `to` is not
    /// an ancestor of `from`.
    #[must_use]
    pub fn distance(&self, from: &Uuid, to: &Uuid) -> Option<u32> {
        self.ancestors(from)
            .position(|vol| vol.uuid == *to)
            .map(|hops| hops as u32)
    }

    /// Maps every nonzero received uuid to the local subvolumes declaring
    /// it. This answers "which of our subvolumes are copies of that
    /// sender?" and is the substrate of incremental planning.
    #[must_use]
    pub fn received_index(&self) -> HashMap<Uuid, Vec<&Vol>> {
        let mut map: HashMap<Uuid, Vec<&Vol>> = HashMap::new();
        for vol in &self.vols {
            if vol.is_received() {
                map.entry(vol.received_uuid).or_default().push(vol);
            }
        }
        map
    }

    fn assert_built(&self) {
        assert!(
            self.built || self.vols.is_empty(),
            "CowForest queried before build()"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vol(uuid: u128, parent: u128, gen: u64, path: &str) -> Vol {
        Vol {
            id: uuid as u64,
            gen,
            uuid: Uuid::from_u128(uuid),
            parent_uuid: if parent == 0 {
                Uuid::nil()
            } else {
                Uuid::from_u128(parent)
            },
            received_uuid: Uuid::nil(),
            path: path.to_owned(),
            ro: true,
        }
    }

    #[test]
    fn chains_resolve_to_their_base() {
        let forest = CowForest::from_vols([
            vol(1, 0, 10, "base"),
            vol(2, 1, 11, "snap1"),
            vol(3, 2, 12, "snap2"),
        ])
        .unwrap();

        let base = Uuid::from_u128(1);
        for uuid in [1u128, 2, 3] {
            let root = forest.root_of(&Uuid::from_u128(uuid)).unwrap();
            assert_eq!(root.uuid, base);
        }
    }

    #[test]
    fn dangling_parent_makes_the_child_a_root() {
        let forest = CowForest::from_vols([vol(2, 99, 11, "orphan")]).unwrap();
        let orphan = Uuid::from_u128(2);
        assert_eq!(forest.root_of(&orphan).unwrap().uuid, orphan);
        assert!(forest.snapshot_parent(&orphan).is_none());
    }

    #[test]
    fn resolved_edges_are_consistent() {
        let forest = CowForest::from_vols([
            vol(1, 0, 10, "base"),
            vol(2, 1, 11, "snap1"),
            vol(3, 1, 12, "snap2"),
        ])
        .unwrap();

        for child in forest.vols() {
            if let Some(parent) = forest.snapshot_parent(&child.uuid) {
                assert_eq!(child.parent_uuid, parent.uuid);
            }
            assert!(forest.root_of(&child.uuid).is_some());
        }
    }

    #[test]
    fn cycles_are_rejected() {
        let err = CowForest::from_vols([
            vol(1, 2, 10, "a"),
            vol(2, 3, 11, "b"),
            vol(3, 1, 12, "c"),
        ])
        .unwrap_err();
        assert!(matches!(err, CowError::Cycle(_)));
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let err = CowForest::from_vols([vol(1, 1, 10, "selfie")]).unwrap_err();
        assert_eq!(err, CowError::Cycle(Uuid::from_u128(1)));
    }

    #[test]
    fn duplicate_uuid_is_rejected() {
        let mut forest = CowForest::new();
        forest.insert(vol(1, 0, 10, "a")).unwrap();
        assert_eq!(
            forest.insert(vol(1, 0, 11, "b")),
            Err(CowError::DuplicateUuid(Uuid::from_u128(1)))
        );
    }

    #[test]
    fn ancestors_walk_nearest_first() {
        let forest = CowForest::from_vols([
            vol(1, 0, 10, "base"),
            vol(2, 1, 11, "snap1"),
            vol(3, 2, 12, "snap2"),
        ])
        .unwrap();

        let uuids: Vec<u128> = forest
            .ancestors(&Uuid::from_u128(3))
            .map(|v| v.uuid.as_u128())
            .collect();
        assert_eq!(uuids, [3, 2, 1]);
    }

    #[test]
    fn distance_counts_snapshot_hops() {
        let forest = CowForest::from_vols([
            vol(1, 0, 10, "base"),
            vol(2, 1, 11, "snap1"),
            vol(3, 2, 12, "snap2"),
            vol(4, 1, 13, "sibling"),
        ])
        .unwrap();

        let u = Uuid::from_u128;
        assert_eq!(forest.distance(&u(3), &u(3)), Some(0));
        assert_eq!(forest.distance(&u(3), &u(2)), Some(1));
        assert_eq!(forest.distance(&u(3), &u(1)), Some(2));
        assert_eq!(forest.distance(&u(3), &u(4)), None);
    }

    #[test]
    fn received_index_groups_by_origin() {
        let mut copy_a = vol(10, 0, 20, "copies/a");
        copy_a.received_uuid = Uuid::from_u128(1);
        let mut copy_b = vol(11, 0, 21, "copies/b");
        copy_b.received_uuid = Uuid::from_u128(1);
        let plain = vol(12, 0, 22, "plain");

        let forest = CowForest::from_vols([copy_a, copy_b, plain]).unwrap();
        let index = forest.received_index();

        assert_eq!(index.len(), 1);
        let copies = &index[&Uuid::from_u128(1)];
        assert_eq!(copies.len(), 2);
    }

    #[test]
    fn eligible_volumes_are_the_read_only_ones() {
        let mut rw = vol(1, 0, 10, "live");
        rw.ro = false;
        let ro = vol(2, 0, 11, "snap");

        let forest = CowForest::from_vols([rw, ro]).unwrap();
        let eligible: Vec<&str> = forest.iter_eligible().map(|v| v.path.as_str()).collect();
        assert_eq!(eligible, ["snap"]);
    }
}
