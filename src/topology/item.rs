//! Item identifiers: `Uid`, `Lid` and `ItemKind`.
//!
//! Every mesh entity carries two identifiers:
//! - a [`Uid`], the caller-assigned, globally stable 64-bit id (mesh reader,
//!   partitioner, restart file, ...). It is never generated nor reused here.
//! - a [`Lid`], a dense 32-bit index into the per-family arrays. Lids are
//!   recycled after removal and renumbered by compaction.
//!
//! Both are `repr(transparent)` newtypes so slices of them can be handed to
//! `bytemuck` without copies.

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Raw value of the null local id.
pub const NULL_ITEM_LID: i32 = -1;

/// Caller-assigned unique identifier of an item.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Pod,
    Zeroable,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct Uid(i64);

impl Uid {
    #[inline]
    pub const fn new(raw: i64) -> Self {
        Uid(raw)
    }

    #[inline]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Wrap a slice of raw ids.
    pub fn from_raw(raw: &[i64]) -> Vec<Uid> {
        raw.iter().copied().map(Uid).collect()
    }
}

impl From<i64> for Uid {
    #[inline]
    fn from(raw: i64) -> Self {
        Uid(raw)
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Uid").field(&self.0).finish()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-local index of an item inside its family.
///
/// [`Lid::NULL`] marks removed entries, both in the allocator and in
/// connectivity rows.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Pod,
    Zeroable,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct Lid(i32);

impl Lid {
    /// The null sentinel (`-1`).
    pub const NULL: Lid = Lid(NULL_ITEM_LID);

    #[inline]
    pub const fn new(raw: i32) -> Self {
        Lid(raw)
    }

    #[inline]
    pub const fn get(self) -> i32 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_ITEM_LID
    }

    /// Index into per-family arrays.
    ///
    /// # Panics
    /// Panics on the null lid.
    #[inline]
    pub fn index(self) -> usize {
        assert!(!self.is_null(), "[fatal] null local id used as an array index");
        self.0 as usize
    }

    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        match i32::try_from(index) {
            Ok(raw) => Lid(raw),
            Err(_) => panic!("[fatal] local id space exhausted (i32)"),
        }
    }
}

impl From<i32> for Lid {
    #[inline]
    fn from(raw: i32) -> Self {
        Lid(raw)
    }
}

impl fmt::Debug for Lid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("Lid(NULL)")
        } else {
            f.debug_tuple("Lid").field(&self.0).finish()
        }
    }
}

impl fmt::Display for Lid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of the items stored in a family.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum ItemKind {
    Node,
    Edge,
    Face,
    Cell,
    Dof,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Node => "node",
            ItemKind::Edge => "edge",
            ItemKind::Face => "face",
            ItemKind::Cell => "cell",
            ItemKind::Dof => "dof",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
