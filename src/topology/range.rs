//! Item ranges and their deferred counterparts.
//!
//! - [`ItemRange`]: an ordered list of local ids, possibly non-contiguous.
//! - [`FutureItemRange`]: returned by the `schedule_*` calls; it only holds a
//!   value once the batch that owns it has been applied.
//! - [`ValidMeshState`]: token returned by `apply_scheduled_operations`,
//!   required to read a future.
//!
//! Reading a future that was never filled, or with a token older than the
//! future's batch, is a programming error and panics.

use crate::topology::item::Lid;
use itertools::Itertools;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

/// Ordered set of local ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ItemRange {
    lids: Vec<Lid>,
}

impl ItemRange {
    pub fn new(lids: Vec<Lid>) -> Self {
        Self { lids }
    }

    /// `[first, first + len)`.
    pub fn contiguous(first: usize, len: usize) -> Self {
        Self {
            lids: (first..first + len).map(Lid::from_index).collect(),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.lids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lids.is_empty()
    }

    #[inline]
    pub fn lids(&self) -> &[Lid] {
        &self.lids
    }

    pub fn iter(&self) -> impl Iterator<Item = Lid> + '_ {
        self.lids.iter().copied()
    }

    /// Whether the lids form one increasing, gap-free run.
    pub fn is_contiguous(&self) -> bool {
        self.lids
            .windows(2)
            .all(|w| !w[0].is_null() && w[1].get() == w[0].get() + 1)
    }

    pub fn into_lids(self) -> Vec<Lid> {
        self.lids
    }
}

impl From<Vec<Lid>> for ItemRange {
    fn from(lids: Vec<Lid>) -> Self {
        Self { lids }
    }
}

impl FromIterator<Lid> for ItemRange {
    fn from_iter<I: IntoIterator<Item = Lid>>(iter: I) -> Self {
        Self {
            lids: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ItemRange {
    type Item = Lid;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, Lid>>;

    fn into_iter(self) -> Self::IntoIter {
        self.lids.iter().copied()
    }
}

impl fmt::Display for ItemRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemRange(size={}): [{}]", self.size(), self.lids.iter().join(" "))
    }
}

/// Proof that a mesh applied every batch up to `generation`.
///
/// Only [`Mesh`](crate::mesh::Mesh) creates these.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ValidMeshState {
    mesh_id: u64,
    generation: u64,
}

impl ValidMeshState {
    pub(crate) fn new(mesh_id: u64, generation: u64) -> Self {
        Self {
            mesh_id,
            generation,
        }
    }

    /// Number of non-empty batches applied so far.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Range produced by a scheduled operation, readable once its batch is applied.
///
/// Clones share the same slot: filling one fills them all.
#[derive(Clone)]
pub struct FutureItemRange {
    mesh_id: u64,
    generation: u64,
    slot: Arc<OnceCell<ItemRange>>,
}

impl FutureItemRange {
    pub(crate) fn new(mesh_id: u64, generation: u64) -> Self {
        Self {
            mesh_id,
            generation,
            slot: Arc::new(OnceCell::new()),
        }
    }

    /// Generation of the batch this future belongs to.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the owning operation has run.
    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Read the resolved range.
    ///
    /// # Panics
    /// If `state` comes from another mesh, or if the operation that owns the
    /// future never ran. Any token of the owning mesh resolves a filled
    /// future, including one taken before its batch was applied.
    pub fn get(&self, state: &ValidMeshState) -> ItemRange {
        assert_eq!(
            state.mesh_id, self.mesh_id,
            "[fatal] FutureItemRange resolved with a token from another mesh"
        );
        match self.slot.get() {
            Some(range) => range.clone(),
            None => panic!(
                "[fatal] FutureItemRange of batch {} was never filled: its operation was not applied",
                self.generation
            ),
        }
    }

    /// Borrow the resolved range during application of a later operation
    /// of the same batch.
    pub(crate) fn peek(&self) -> Option<&ItemRange> {
        self.slot.get()
    }

    pub(crate) fn fill(&self, range: ItemRange) {
        if self.slot.set(range).is_err() {
            panic!("[fatal] FutureItemRange filled twice");
        }
    }
}

impl fmt::Debug for FutureItemRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureItemRange")
            .field("generation", &self.generation)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
