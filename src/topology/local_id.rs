//! `ItemLocalIdAllocator`: stable uid → dense local id mapping.
//!
//! The allocator hands out the smallest free local id first: tombstoned
//! slots left by [`release`](ItemLocalIdAllocator::release) are recycled
//! before the id space grows. Nothing is renumbered implicitly;
//! [`compact`](ItemLocalIdAllocator::compact) is the only operation that
//! moves live items, and it invalidates every previously handed-out lid.

use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshError;
use crate::topology::item::{Lid, Uid};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Old → new local id table produced by a compaction.
///
/// Entries for lids that were already free map to [`Lid::NULL`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LidRemap {
    old_to_new: Vec<Lid>,
}

impl LidRemap {
    /// New lid of `old`, or `Lid::NULL` if `old` was not live (or is null).
    #[inline]
    pub fn get(&self, old: Lid) -> Lid {
        if old.is_null() {
            return Lid::NULL;
        }
        self.old_to_new
            .get(old.index())
            .copied()
            .unwrap_or(Lid::NULL)
    }

    /// Whether the remap changes no live lid.
    pub fn is_identity(&self) -> bool {
        self.old_to_new
            .iter()
            .enumerate()
            .all(|(i, &new)| new.is_null() || new.index() == i)
    }

    /// Number of slots covered (the capacity before compaction).
    pub fn len(&self) -> usize {
        self.old_to_new.len()
    }

    pub fn is_empty(&self) -> bool {
        self.old_to_new.is_empty()
    }
}

/// Uid ↔ lid bookkeeping for one family.
///
/// # Invariants
/// - `uid_to_lid[u] == l` iff `lid_to_uid[l] == Some(u)`.
/// - Every free-list entry designates a tombstone (`None`) slot, exactly once.
/// - `nb_items() + free.len() == capacity()`.
#[derive(Clone, Debug)]
pub struct ItemLocalIdAllocator {
    family: String,
    uid_to_lid: HashMap<Uid, Lid>,
    lid_to_uid: Vec<Option<Uid>>,
    free: BinaryHeap<Reverse<i32>>,
    epoch: u64,
}

impl ItemLocalIdAllocator {
    /// Empty allocator; `family` only labels error messages.
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            uid_to_lid: HashMap::new(),
            lid_to_uid: Vec::new(),
            free: BinaryHeap::new(),
            epoch: 0,
        }
    }

    /// Allocate a lid for `uid`: smallest recycled slot first, else a new one.
    ///
    /// # Errors
    /// [`MeshError::DuplicateUid`] if `uid` is already live.
    pub fn allocate(&mut self, uid: Uid) -> Result<Lid, MeshError> {
        if let Some(&lid) = self.uid_to_lid.get(&uid) {
            return Err(MeshError::DuplicateUid {
                family: self.family.clone(),
                uid,
                lid,
            });
        }
        let lid = match self.free.pop() {
            Some(Reverse(raw)) => {
                let lid = Lid::new(raw);
                self.lid_to_uid[lid.index()] = Some(uid);
                lid
            }
            None => {
                let lid = Lid::from_index(self.lid_to_uid.len());
                self.lid_to_uid.push(Some(uid));
                lid
            }
        };
        self.uid_to_lid.insert(uid, lid);
        Ok(lid)
    }

    /// Allocate one lid per uid; the output follows the input order.
    ///
    /// The batch is validated before anything is allocated, so on error the
    /// allocator is unchanged.
    pub fn allocate_many(&mut self, uids: &[Uid]) -> Result<Vec<Lid>, MeshError> {
        let mut seen = HashSet::with_capacity(uids.len());
        for &uid in uids {
            if let Some(&lid) = self.uid_to_lid.get(&uid) {
                return Err(MeshError::DuplicateUid {
                    family: self.family.clone(),
                    uid,
                    lid,
                });
            }
            if !seen.insert(uid) {
                return Err(MeshError::DuplicateUid {
                    family: self.family.clone(),
                    uid,
                    lid: Lid::NULL,
                });
            }
        }
        let lids = uids
            .iter()
            .map(|&uid| self.allocate(uid))
            .collect::<Result<Vec<_>, _>>()?;
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
        Ok(lids)
    }

    /// Tombstone `lid` and make it available to a later `allocate`.
    ///
    /// Returns the uid that lived there.
    pub fn release(&mut self, lid: Lid) -> Result<Uid, MeshError> {
        let uid = (!lid.is_null())
            .then(|| self.lid_to_uid.get_mut(lid.index()))
            .flatten()
            .and_then(Option::take)
            .ok_or_else(|| MeshError::LidNotAllocated {
                family: self.family.clone(),
                lid,
            })?;
        self.uid_to_lid.remove(&uid);
        self.free.push(Reverse(lid.get()));
        Ok(uid)
    }

    /// Release the items designated by `uids`, returning their lids in
    /// input order. A uid repeated in `uids` is released and reported once.
    /// Validated up front: on error nothing is released.
    pub fn release_uids(&mut self, uids: &[Uid]) -> Result<Vec<Lid>, MeshError> {
        let mut lids = self.lookup_many(uids)?;
        let mut seen = HashSet::with_capacity(lids.len());
        lids.retain(|&lid| seen.insert(lid));
        for &lid in &lids {
            self.release(lid)?;
        }
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
        Ok(lids)
    }

    /// Lid of `uid`.
    ///
    /// # Errors
    /// [`MeshError::UidNotFound`] if `uid` is not live in this family.
    #[inline]
    pub fn lookup(&self, uid: Uid) -> Result<Lid, MeshError> {
        self.uid_to_lid
            .get(&uid)
            .copied()
            .ok_or_else(|| MeshError::UidNotFound {
                family: self.family.clone(),
                uid,
            })
    }

    /// Lids of `uids`, in input order.
    pub fn lookup_many(&self, uids: &[Uid]) -> Result<Vec<Lid>, MeshError> {
        uids.iter().map(|&uid| self.lookup(uid)).collect()
    }

    /// Uid stored at `lid`, if live.
    #[inline]
    pub fn uid(&self, lid: Lid) -> Option<Uid> {
        if lid.is_null() {
            return None;
        }
        self.lid_to_uid.get(lid.index()).copied().flatten()
    }

    #[inline]
    pub fn is_live(&self, lid: Lid) -> bool {
        self.uid(lid).is_some()
    }

    /// Number of live items.
    #[inline]
    pub fn nb_items(&self) -> usize {
        self.uid_to_lid.len()
    }

    /// Size of the lid space (largest lid ever handed out + 1).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.lid_to_uid.len()
    }

    /// Number of times [`compact`](Self::compact) renumbered the family.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Live lids in increasing order.
    pub fn live_lids(&self) -> impl Iterator<Item = Lid> + '_ {
        self.lid_to_uid
            .iter()
            .enumerate()
            .filter_map(|(i, uid)| uid.map(|_| Lid::from_index(i)))
    }

    /// Renumber the live items to `0..nb_items()`, keeping their relative
    /// order, and drop all tombstones.
    ///
    /// Every lid handed out before this call is invalid afterwards; use the
    /// returned [`LidRemap`] or look the uids up again.
    pub fn compact(&mut self) -> LidRemap {
        let mut old_to_new = vec![Lid::NULL; self.lid_to_uid.len()];
        let mut packed = Vec::with_capacity(self.uid_to_lid.len());
        for (old, slot) in self.lid_to_uid.iter().enumerate() {
            if let Some(uid) = *slot {
                let new = Lid::from_index(packed.len());
                old_to_new[old] = new;
                packed.push(Some(uid));
                self.uid_to_lid.insert(uid, new);
            }
        }
        self.lid_to_uid = packed;
        self.free.clear();
        self.epoch += 1;
        log::debug!(
            "compacted family `{}`: {} live items, {} slots reclaimed",
            self.family,
            self.lid_to_uid.len(),
            old_to_new.len() - self.lid_to_uid.len()
        );
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
        LidRemap { old_to_new }
    }
}

impl DebugInvariants for ItemLocalIdAllocator {
    fn validate_invariants(&self) -> Result<(), MeshError> {
        for (&uid, &lid) in &self.uid_to_lid {
            if self.uid(lid) != Some(uid) {
                return Err(MeshError::InvariantViolation(format!(
                    "family `{}`: uid {uid} maps to {lid:?} which does not map back",
                    self.family
                )));
            }
        }
        let mut free: Vec<i32> = self.free.iter().map(|r| r.0).collect();
        free.sort_unstable();
        if free.windows(2).any(|w| w[0] == w[1]) {
            return Err(MeshError::InvariantViolation(format!(
                "family `{}`: duplicate free-list entry",
                self.family
            )));
        }
        if let Some(&raw) = free.iter().find(|&&raw| self.is_live(Lid::new(raw))) {
            return Err(MeshError::InvariantViolation(format!(
                "family `{}`: live lid {raw} on the free list",
                self.family
            )));
        }
        if self.nb_items() + free.len() != self.capacity() {
            return Err(MeshError::InvariantViolation(format!(
                "family `{}`: {} live + {} free != {} slots",
                self.family,
                self.nb_items(),
                free.len(),
                self.capacity()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uids(raw: &[i64]) -> Vec<Uid> {
        Uid::from_raw(raw)
    }

    #[test]
    fn allocate_appends_in_input_order() {
        let mut a = ItemLocalIdAllocator::new("cells");
        let lids = a.allocate_many(&uids(&[10, 3, 7])).unwrap();
        assert_eq!(lids, vec![Lid::new(0), Lid::new(1), Lid::new(2)]);
        assert_eq!(a.lookup(Uid::new(3)).unwrap(), Lid::new(1));
        assert_eq!(a.uid(Lid::new(2)), Some(Uid::new(7)));
    }

    #[test]
    fn released_slots_are_recycled_smallest_first() {
        let mut a = ItemLocalIdAllocator::new("nodes");
        a.allocate_many(&uids(&[0, 1, 2, 3, 4])).unwrap();
        a.release_uids(&uids(&[3, 1])).unwrap();
        assert_eq!(a.nb_items(), 3);
        assert_eq!(a.capacity(), 5);
        assert_eq!(a.allocate(Uid::new(20)).unwrap(), Lid::new(1));
        assert_eq!(a.allocate(Uid::new(21)).unwrap(), Lid::new(3));
        assert_eq!(a.allocate(Uid::new(22)).unwrap(), Lid::new(5));
        a.validate_invariants().unwrap();
    }

    #[test]
    fn repeated_uid_is_released_once() {
        let mut a = ItemLocalIdAllocator::new("cells");
        a.allocate_many(&uids(&[0, 1, 2, 3])).unwrap();
        let lids = a.release_uids(&uids(&[3, 1, 3])).unwrap();
        assert_eq!(lids, vec![Lid::new(3), Lid::new(1)]);
        assert_eq!(a.nb_items(), 2);
        assert_eq!(a.allocate_many(&uids(&[8, 9])).unwrap(), vec![Lid::new(1), Lid::new(3)]);
        assert_eq!(a.allocate(Uid::new(10)).unwrap(), Lid::new(4));
        a.validate_invariants().unwrap();
    }

    #[test]
    fn lookup_of_unknown_uid_is_an_error() {
        let a = ItemLocalIdAllocator::new("faces");
        let err = a.lookup(Uid::new(9)).unwrap_err();
        assert_eq!(
            err,
            MeshError::UidNotFound {
                family: "faces".into(),
                uid: Uid::new(9)
            }
        );
    }

    #[test]
    fn duplicate_uid_leaves_allocator_untouched() {
        let mut a = ItemLocalIdAllocator::new("cells");
        a.allocate(Uid::new(1)).unwrap();
        assert!(matches!(
            a.allocate_many(&uids(&[5, 1])),
            Err(MeshError::DuplicateUid { .. })
        ));
        assert!(matches!(
            a.allocate_many(&uids(&[6, 6])),
            Err(MeshError::DuplicateUid { .. })
        ));
        assert_eq!(a.nb_items(), 1);
        assert!(a.lookup(Uid::new(5)).is_err());
    }

    #[test]
    fn release_twice_fails() {
        let mut a = ItemLocalIdAllocator::new("cells");
        let lid = a.allocate(Uid::new(4)).unwrap();
        assert_eq!(a.release(lid).unwrap(), Uid::new(4));
        assert!(matches!(
            a.release(lid),
            Err(MeshError::LidNotAllocated { .. })
        ));
        assert!(a.release(Lid::NULL).is_err());
    }

    #[test]
    fn compact_renumbers_densely_and_bumps_epoch() {
        let mut a = ItemLocalIdAllocator::new("nodes");
        a.allocate_many(&uids(&[100, 101, 102, 103])).unwrap();
        a.release_uids(&uids(&[100, 102])).unwrap();
        let remap = a.compact();
        assert_eq!(a.epoch(), 1);
        assert_eq!(a.capacity(), 2);
        assert_eq!(remap.get(Lid::new(0)), Lid::NULL);
        assert_eq!(remap.get(Lid::new(1)), Lid::new(0));
        assert_eq!(remap.get(Lid::new(3)), Lid::new(1));
        assert_eq!(a.lookup(Uid::new(103)).unwrap(), Lid::new(1));
        assert_eq!(a.live_lids().collect::<Vec<_>>(), vec![Lid::new(0), Lid::new(1)]);
        // Freed slots are gone: the next lid is appended.
        assert_eq!(a.allocate(Uid::new(7)).unwrap(), Lid::new(2));
    }

    #[test]
    fn compact_without_holes_is_identity() {
        let mut a = ItemLocalIdAllocator::new("nodes");
        a.allocate_many(&uids(&[5, 6])).unwrap();
        assert!(a.compact().is_identity());
    }
}
