//! Connectivity store: per-source-item lists of target local ids.
//!
//! A [`Connectivity`] belongs to its source family and points into one
//! target family. Two layouts are supported:
//! - **fixed** degree: a dense `rows × degree` block,
//! - **variable** degree: one span per row inside a shared buffer.
//!
//! A reverse index (target lid → source rows referencing it) keeps removal
//! cleanup proportional to the number of touched entries: when targets are
//! removed, only the rows that mention them are scanned and rewritten to
//! [`Lid::NULL`].

use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshError;
use crate::topology::family::FamilyId;
use crate::topology::item::Lid;
use crate::topology::local_id::LidRemap;
use hashbrown::HashMap as FastMap;
use std::ops::Range;

/// Row layout of a connectivity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ConnectivityLayout {
    Fixed { degree: usize },
    Variable,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct Span {
    offset: usize,
    len: usize,
    cap: usize,
}

/// Directed adjacency from the items of one family to another family.
#[derive(Clone, Debug)]
pub struct Connectivity {
    name: String,
    target: FamilyId,
    layout: ConnectivityLayout,
    data: Vec<Lid>,
    /// Variable layout only: one span per source row.
    spans: Vec<Span>,
    /// Variable layout only: dead slots left in `data` by reallocated rows.
    garbage: usize,
    reverse: FastMap<Lid, Vec<Lid>>,
}

impl Connectivity {
    pub fn new(name: impl Into<String>, target: FamilyId, layout: ConnectivityLayout) -> Self {
        Self {
            name: name.into(),
            target,
            layout,
            data: Vec::new(),
            spans: Vec::new(),
            garbage: 0,
            reverse: FastMap::new(),
        }
    }

    pub fn fixed(name: impl Into<String>, target: FamilyId, degree: usize) -> Self {
        Self::new(name, target, ConnectivityLayout::Fixed { degree })
    }

    pub fn variable(name: impl Into<String>, target: FamilyId) -> Self {
        Self::new(name, target, ConnectivityLayout::Variable)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Family the stored lids belong to.
    pub fn target(&self) -> FamilyId {
        self.target
    }

    pub fn layout(&self) -> ConnectivityLayout {
        self.layout
    }

    /// Fixed degree, `None` for variable layouts.
    pub fn degree(&self) -> Option<usize> {
        match self.layout {
            ConnectivityLayout::Fixed { degree } => Some(degree),
            ConnectivityLayout::Variable => None,
        }
    }

    /// Number of source rows currently materialized.
    pub fn nb_rows(&self) -> usize {
        match self.layout {
            ConnectivityLayout::Fixed { degree: 0 } => self.spans.len(),
            ConnectivityLayout::Fixed { degree } => self.data.len() / degree,
            ConnectivityLayout::Variable => self.spans.len(),
        }
    }

    fn row_range(&self, source: Lid) -> Option<Range<usize>> {
        if source.is_null() || source.index() >= self.nb_rows() {
            return None;
        }
        let row = source.index();
        Some(match self.layout {
            ConnectivityLayout::Fixed { degree } => row * degree..(row + 1) * degree,
            ConnectivityLayout::Variable => {
                let s = self.spans[row];
                s.offset..s.offset + s.len
            }
        })
    }

    /// Targets of `source`. Rows never written read as empty (variable) or
    /// all-null (fixed).
    pub fn view(&self, source: Lid) -> &[Lid] {
        match self.row_range(source) {
            Some(range) => &self.data[range],
            None => &[],
        }
    }

    /// All rows concatenated in source order.
    pub fn flat_view(&self) -> Vec<Lid> {
        (0..self.nb_rows())
            .flat_map(|row| self.view(Lid::from_index(row)).iter().copied())
            .collect()
    }

    /// Materialize rows up to `nb_rows` (exclusive).
    pub fn ensure_rows(&mut self, nb_rows: usize) {
        if nb_rows <= self.nb_rows() {
            return;
        }
        match self.layout {
            ConnectivityLayout::Fixed { degree: 0 } => self.spans.resize(nb_rows, Span::default()),
            ConnectivityLayout::Fixed { degree } => self.data.resize(nb_rows * degree, Lid::NULL),
            ConnectivityLayout::Variable => {
                let offset = self.data.len();
                self.spans.resize(
                    nb_rows,
                    Span {
                        offset,
                        len: 0,
                        cap: 0,
                    },
                );
            }
        }
    }

    /// Replace the targets of `source`.
    ///
    /// # Errors
    /// `DegreeMismatch` if a fixed-degree row is given the wrong count.
    pub fn set(&mut self, source: Lid, targets: &[Lid]) -> Result<(), MeshError> {
        if let ConnectivityLayout::Fixed { degree } = self.layout {
            if targets.len() != degree {
                return Err(MeshError::DegreeMismatch {
                    name: self.name.clone(),
                    degree,
                    found: targets.len(),
                });
            }
        }
        self.ensure_rows(source.index() + 1);
        self.unlink_row(source);
        match self.layout {
            ConnectivityLayout::Fixed { .. } => {
                let range = self.row_range(source).unwrap_or_default();
                self.data[range].copy_from_slice(targets);
            }
            ConnectivityLayout::Variable => self.write_variable_row(source.index(), targets),
        }
        self.link_row(source);
        Ok(())
    }

    /// Replace one entry of a fixed-degree row.
    pub fn set_slot(&mut self, source: Lid, slot: usize, target: Lid) -> Result<(), MeshError> {
        let degree = match self.layout {
            ConnectivityLayout::Fixed { degree } => degree,
            ConnectivityLayout::Variable => self.view(source).len(),
        };
        if slot >= degree {
            return Err(MeshError::SlotOutOfRange {
                name: self.name.clone(),
                slot,
                degree,
            });
        }
        self.ensure_rows(source.index() + 1);
        self.unlink_row(source);
        if let Some(range) = self.row_range(source) {
            self.data[range.start + slot] = target;
        }
        self.link_row(source);
        Ok(())
    }

    fn write_variable_row(&mut self, row: usize, targets: &[Lid]) {
        let span = self.spans[row];
        if targets.len() <= span.cap {
            self.data[span.offset..span.offset + targets.len()].copy_from_slice(targets);
            self.spans[row].len = targets.len();
            return;
        }
        self.garbage += span.cap;
        let offset = self.data.len();
        self.data.extend_from_slice(targets);
        self.spans[row] = Span {
            offset,
            len: targets.len(),
            cap: targets.len(),
        };
        if self.garbage > self.data.len() / 2 {
            self.compact_storage();
        }
    }

    /// Rewrite the variable-degree buffer without dead slots. No-op for
    /// fixed layouts. Row contents are unchanged.
    pub fn compact_storage(&mut self) {
        if self.layout != ConnectivityLayout::Variable || self.garbage == 0 {
            return;
        }
        let mut data = Vec::with_capacity(self.data.len() - self.garbage);
        for span in &mut self.spans {
            let start = data.len();
            data.extend_from_slice(&self.data[span.offset..span.offset + span.len]);
            *span = Span {
                offset: start,
                len: span.len,
                cap: span.len,
            };
        }
        self.data = data;
        self.garbage = 0;
    }

    fn unlink_row(&mut self, source: Lid) {
        let Some(range) = self.row_range(source) else {
            return;
        };
        for &t in &self.data[range] {
            if t.is_null() {
                continue;
            }
            if let Some(rows) = self.reverse.get_mut(&t) {
                rows.retain(|&s| s != source);
                if rows.is_empty() {
                    self.reverse.remove(&t);
                }
            }
        }
    }

    fn link_row(&mut self, source: Lid) {
        let Some(range) = self.row_range(source) else {
            return;
        };
        for &t in &self.data[range] {
            if t.is_null() {
                continue;
            }
            let rows = self.reverse.entry(t).or_default();
            if !rows.contains(&source) {
                rows.push(source);
            }
        }
    }

    /// Null every reference to the removed target lids.
    ///
    /// Only the rows listed in the reverse index for those targets are
    /// touched. Returns the number of rewritten entries.
    pub fn notify_target_removed(&mut self, removed: &[Lid]) -> usize {
        let mut rewritten = 0;
        for &t in removed {
            let Some(rows) = self.reverse.remove(&t) else {
                continue;
            };
            for source in rows {
                if let Some(range) = self.row_range(source) {
                    for entry in &mut self.data[range] {
                        if *entry == t {
                            *entry = Lid::NULL;
                            rewritten += 1;
                        }
                    }
                }
            }
        }
        log::trace!(
            "connectivity `{}`: {} entries nulled for {} removed targets",
            self.name,
            rewritten,
            removed.len()
        );
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
        rewritten
    }

    /// Drop the rows of removed source items: fixed rows are nulled,
    /// variable rows emptied.
    pub fn notify_source_removed(&mut self, removed: &[Lid]) {
        for &source in removed {
            let Some(range) = self.row_range(source) else {
                continue;
            };
            self.unlink_row(source);
            match self.layout {
                ConnectivityLayout::Fixed { .. } => self.data[range].fill(Lid::NULL),
                ConnectivityLayout::Variable => self.spans[source.index()].len = 0,
            }
        }
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
    }

    /// Rewrite stored targets after the target family was compacted.
    pub fn apply_target_remap(&mut self, remap: &LidRemap) {
        for entry in &mut self.data {
            *entry = remap.get(*entry);
        }
        self.rebuild_reverse();
    }

    /// Move rows after the source family was compacted.
    pub fn apply_source_remap(&mut self, remap: &LidRemap, new_nb_rows: usize) {
        let old_rows: Vec<Vec<Lid>> = (0..self.nb_rows())
            .map(|row| self.view(Lid::from_index(row)).to_vec())
            .collect();
        self.data.clear();
        self.spans.clear();
        self.garbage = 0;
        self.ensure_rows(new_nb_rows);
        for (old, targets) in old_rows.into_iter().enumerate() {
            let new = remap.get(Lid::from_index(old));
            if new.is_null() {
                continue;
            }
            match self.layout {
                ConnectivityLayout::Fixed { .. } => {
                    let range = self.row_range(new).unwrap_or_default();
                    self.data[range].copy_from_slice(&targets);
                }
                ConnectivityLayout::Variable => self.write_variable_row(new.index(), &targets),
            }
        }
        self.rebuild_reverse();
    }

    fn rebuild_reverse(&mut self) {
        self.reverse.clear();
        for row in 0..self.nb_rows() {
            self.link_row(Lid::from_index(row));
        }
    }
}

impl DebugInvariants for Connectivity {
    fn validate_invariants(&self) -> Result<(), MeshError> {
        for row in 0..self.nb_rows() {
            let source = Lid::from_index(row);
            for &t in self.view(source) {
                if t.is_null() {
                    continue;
                }
                if !self.reverse.get(&t).is_some_and(|rows| rows.contains(&source)) {
                    return Err(MeshError::InvariantViolation(format!(
                        "connectivity `{}`: row {row} references {t:?} without reverse entry",
                        self.name
                    )));
                }
            }
        }
        for (&t, rows) in &self.reverse {
            if let Some(&source) = rows.iter().find(|&&s| !self.view(s).contains(&t)) {
                return Err(MeshError::InvariantViolation(format!(
                    "connectivity `{}`: reverse entry {t:?} → {source:?} is stale",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lids(raw: &[i32]) -> Vec<Lid> {
        raw.iter().copied().map(Lid::new).collect()
    }

    #[test]
    fn fixed_rows_and_slots() {
        let mut c = Connectivity::fixed("cell_to_nodes", FamilyId(1), 2);
        c.set(Lid::new(1), &lids(&[4, 5])).unwrap();
        assert_eq!(c.nb_rows(), 2);
        assert_eq!(c.view(Lid::new(0)), &[Lid::NULL, Lid::NULL]);
        assert_eq!(c.view(Lid::new(1)), &lids(&[4, 5])[..]);
        c.set_slot(Lid::new(1), 0, Lid::new(7)).unwrap();
        assert_eq!(c.view(Lid::new(1)), &lids(&[7, 5])[..]);
        assert!(matches!(
            c.set(Lid::new(0), &lids(&[1])),
            Err(MeshError::DegreeMismatch { .. })
        ));
        assert!(matches!(
            c.set_slot(Lid::new(0), 2, Lid::new(1)),
            Err(MeshError::SlotOutOfRange { .. })
        ));
        c.validate_invariants().unwrap();
    }

    #[test]
    fn variable_rows_grow_and_shrink() {
        let mut c = Connectivity::variable("node_to_cells", FamilyId(0));
        c.set(Lid::new(0), &lids(&[1])).unwrap();
        c.set(Lid::new(2), &lids(&[1, 2, 3])).unwrap();
        assert!(c.view(Lid::new(1)).is_empty());
        c.set(Lid::new(0), &lids(&[4, 5, 6, 7])).unwrap();
        c.set(Lid::new(2), &lids(&[9])).unwrap();
        assert_eq!(c.view(Lid::new(0)), &lids(&[4, 5, 6, 7])[..]);
        assert_eq!(c.view(Lid::new(2)), &lids(&[9])[..]);
        c.compact_storage();
        assert_eq!(c.flat_view(), lids(&[4, 5, 6, 7, 9]));
        c.validate_invariants().unwrap();
    }

    #[test]
    fn target_removal_touches_only_referencing_rows() {
        let mut c = Connectivity::fixed("node_to_cell", FamilyId(0), 1);
        for (row, cell) in [0, 0, 1, 1, 2, 3, 0, 0, 1, 2, 2, 3].into_iter().enumerate() {
            c.set(Lid::from_index(row), &[Lid::new(cell)]).unwrap();
        }
        let rewritten = c.notify_target_removed(&lids(&[0, 1, 2]));
        assert_eq!(rewritten, 10);
        let mut expected = vec![Lid::NULL; 12];
        expected[5] = Lid::new(3);
        expected[11] = Lid::new(3);
        assert_eq!(c.flat_view(), expected);
        // Second notification finds nothing left to rewrite.
        assert_eq!(c.notify_target_removed(&lids(&[0])), 0);
    }

    #[test]
    fn source_removal_nulls_or_empties_rows() {
        let mut fixed = Connectivity::fixed("f", FamilyId(0), 2);
        fixed.set(Lid::new(0), &lids(&[1, 2])).unwrap();
        fixed.notify_source_removed(&lids(&[0]));
        assert_eq!(fixed.view(Lid::new(0)), &[Lid::NULL, Lid::NULL]);

        let mut var = Connectivity::variable("v", FamilyId(0));
        var.set(Lid::new(0), &lids(&[1, 2])).unwrap();
        var.notify_source_removed(&lids(&[0, 9]));
        assert!(var.view(Lid::new(0)).is_empty());
        var.validate_invariants().unwrap();
    }

    #[test]
    fn remaps_follow_compaction() {
        let mut alloc = crate::topology::local_id::ItemLocalIdAllocator::new("cells");
        alloc
            .allocate_many(&crate::topology::item::Uid::from_raw(&[10, 11, 12]))
            .unwrap();
        alloc.release(Lid::new(1)).unwrap();
        let remap = alloc.compact();

        let mut targets = Connectivity::fixed("n2c", FamilyId(0), 2);
        targets.set(Lid::new(0), &lids(&[0, 2])).unwrap();
        targets.apply_target_remap(&remap);
        assert_eq!(targets.view(Lid::new(0)), &lids(&[0, 1])[..]);

        let mut sources = Connectivity::variable("c2n", FamilyId(1));
        sources.set(Lid::new(0), &lids(&[5])).unwrap();
        sources.set(Lid::new(2), &lids(&[6, 7])).unwrap();
        sources.apply_source_remap(&remap, 2);
        assert_eq!(sources.nb_rows(), 2);
        assert_eq!(sources.view(Lid::new(1)), &lids(&[6, 7])[..]);
        sources.validate_invariants().unwrap();
        targets.validate_invariants().unwrap();
    }
}
