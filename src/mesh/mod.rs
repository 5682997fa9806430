//! The evolving mesh: families plus a transactional mutation queue.
//!
//! Mutations are scheduled, then applied as one batch:
//!
//! ```
//! use neo_mesh::prelude::*;
//!
//! let mut mesh = Mesh::new("demo");
//! let cells = mesh.add_family(ItemKind::Cell, "CellFamily").unwrap();
//! let nodes = mesh.add_family(ItemKind::Node, "NodeFamily").unwrap();
//! let added_cells = mesh.schedule_add_items(cells, [0i64, 1]);
//! let added_nodes = mesh.schedule_add_items(nodes, 0i64..6);
//! mesh.schedule_add_connectivity(cells, &added_cells, nodes, 3, [0i64, 1, 2, 3, 4, 5], "cell_to_nodes");
//! let state = mesh.apply_scheduled_operations().unwrap();
//! assert_eq!(added_cells.get(&state).size(), 2);
//! assert_eq!(added_nodes.get(&state).size(), 6);
//! ```
//!
//! Within a batch operations run in scheduling order. Removing items also
//! nulls every connectivity entry pointing at them, inside the same
//! operation, so later operations never see dangling lids.

pub mod schedule;

use crate::debug_invariants::DebugInvariants;
use crate::geometry::Real3;
use crate::io::snapshot::PropertySnapshot;
use crate::mesh_error::MeshError;
use crate::topology::connectivity::ConnectivityLayout;
use crate::topology::family::{FamilyId, ItemFamily};
use crate::topology::item::{ItemKind, Lid, Uid};
use crate::topology::local_id::LidRemap;
use crate::topology::property::{Property, PropertyValue};
use crate::topology::range::{FutureItemRange, ItemRange, ValidMeshState};
use schedule::{Degree, ItemSource, QueueState, ScheduledOperation, ScheduledOperationQueue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Name of the `Real3` property written by [`Mesh::schedule_set_item_coords`].
pub const COORDINATES_PROPERTY: &str = "item_coordinates";

static NEXT_MESH_ID: AtomicU64 = AtomicU64::new(1);

fn collect_uids<U: Into<Uid>>(uids: impl IntoIterator<Item = U>) -> Vec<Uid> {
    uids.into_iter().map(Into::into).collect()
}

/// An unstructured mesh made of item families.
#[derive(Debug)]
pub struct Mesh {
    id: u64,
    name: String,
    families: Vec<ItemFamily>,
    index: HashMap<(ItemKind, String), FamilyId>,
    queue: ScheduledOperationQueue,
    generation: u64,
}

impl Mesh {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_MESH_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            families: Vec::new(),
            index: HashMap::new(),
            queue: ScheduledOperationQueue::new(),
            generation: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of non-empty batches applied so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Token for the current generation.
    pub fn current_state(&self) -> ValidMeshState {
        ValidMeshState::new(self.id, self.generation)
    }

    // ---- families ---------------------------------------------------------

    /// Register a new, empty family.
    ///
    /// # Errors
    /// `DuplicateFamily` if `(kind, name)` is taken.
    pub fn add_family(&mut self, kind: ItemKind, name: &str) -> Result<FamilyId, MeshError> {
        let key = (kind, name.to_owned());
        if self.index.contains_key(&key) {
            return Err(MeshError::DuplicateFamily {
                kind,
                name: name.to_owned(),
            });
        }
        let id = FamilyId(self.families.len());
        self.families.push(ItemFamily::new(id, kind, name));
        self.index.insert(key, id);
        log::debug!("mesh `{}`: added {kind} family `{name}` as {id}", self.name);
        Ok(id)
    }

    pub fn find_family(&self, kind: ItemKind, name: &str) -> Result<FamilyId, MeshError> {
        self.index
            .get(&(kind, name.to_owned()))
            .copied()
            .ok_or_else(|| MeshError::FamilyNotFound {
                kind,
                name: name.to_owned(),
            })
    }

    /// # Panics
    /// If `id` was not issued by this mesh.
    pub fn family(&self, id: FamilyId) -> &ItemFamily {
        &self.families[id.0]
    }

    pub fn families(&self) -> impl Iterator<Item = &ItemFamily> {
        self.families.iter()
    }

    /// Coordinates written by [`schedule_set_item_coords`](Self::schedule_set_item_coords).
    pub fn item_coord_property(&self, family: FamilyId) -> Result<&Property<Real3>, MeshError> {
        self.family(family).property::<Real3>(COORDINATES_PROPERTY)
    }

    // ---- scheduling -------------------------------------------------------

    pub fn queue_state(&self) -> QueueState {
        self.queue.state()
    }

    pub fn nb_scheduled_operations(&self) -> usize {
        self.queue.len()
    }

    fn pending_future(&self) -> FutureItemRange {
        FutureItemRange::new(self.id, self.generation + 1)
    }

    /// Add items with the given uids. The future yields their lids, in
    /// input order.
    pub fn schedule_add_items<U: Into<Uid>>(
        &mut self,
        family: FamilyId,
        uids: impl IntoIterator<Item = U>,
    ) -> FutureItemRange {
        let added = self.pending_future();
        self.queue.push(ScheduledOperation::AddItems {
            family,
            uids: collect_uids(uids),
            added: added.clone(),
        });
        added
    }

    /// Remove items by uid. The future yields the released lids.
    pub fn schedule_remove_items<U: Into<Uid>>(
        &mut self,
        family: FamilyId,
        uids: impl IntoIterator<Item = U>,
    ) -> FutureItemRange {
        let removed = self.pending_future();
        self.queue.push(ScheduledOperation::RemoveItems {
            family,
            uids: collect_uids(uids),
            removed: removed.clone(),
        });
        removed
    }

    /// Fixed-degree connectivity: `nb_per_item` consecutive target uids per
    /// source item.
    pub fn schedule_add_connectivity<U: Into<Uid>>(
        &mut self,
        source: FamilyId,
        source_items: impl Into<ItemSource>,
        target: FamilyId,
        nb_per_item: usize,
        target_uids: impl IntoIterator<Item = U>,
        name: impl Into<String>,
    ) {
        self.queue.push(ScheduledOperation::AddConnectivity {
            source,
            source_items: source_items.into(),
            target,
            degree: Degree::Fixed(nb_per_item),
            target_uids: collect_uids(target_uids),
            name: name.into(),
        });
    }

    /// Variable-degree connectivity: `degrees[i]` target uids for the i-th
    /// source item.
    pub fn schedule_add_variable_connectivity<U: Into<Uid>>(
        &mut self,
        source: FamilyId,
        source_items: impl Into<ItemSource>,
        target: FamilyId,
        degrees: Vec<usize>,
        target_uids: impl IntoIterator<Item = U>,
        name: impl Into<String>,
    ) {
        self.queue.push(ScheduledOperation::AddConnectivity {
            source,
            source_items: source_items.into(),
            target,
            degree: Degree::Variable(degrees),
            target_uids: collect_uids(target_uids),
            name: name.into(),
        });
    }

    /// Write `values[i]` into property `name` of the i-th item.
    pub fn schedule_set_property<V: PropertyValue>(
        &mut self,
        family: FamilyId,
        name: impl Into<String>,
        items: impl Into<ItemSource>,
        values: Vec<V>,
    ) {
        self.queue.push(ScheduledOperation::SetProperty {
            family,
            name: name.into(),
            items: items.into(),
            values: V::into_column(values),
        });
    }

    pub fn schedule_set_item_coords(
        &mut self,
        family: FamilyId,
        items: impl Into<ItemSource>,
        coords: Vec<Real3>,
    ) {
        self.schedule_set_property(family, COORDINATES_PROPERTY, items, coords);
    }

    /// Overwrite the coordinates of existing items, addressed by uid.
    pub fn schedule_move_nodes<U: Into<Uid>>(
        &mut self,
        family: FamilyId,
        uids: impl IntoIterator<Item = U>,
        coords: Vec<Real3>,
    ) {
        self.schedule_set_item_coords(family, ItemSource::Uids(collect_uids(uids)), coords);
    }

    // ---- application ------------------------------------------------------

    /// Apply every pending operation in scheduling order.
    ///
    /// Returns the token that unlocks the futures of this batch. An empty
    /// queue leaves the mesh untouched and returns the current token.
    ///
    /// # Errors
    /// The first failing operation stops the batch. Operations before it
    /// stay applied, the rest are dropped and their futures stay
    /// unresolved. The generation still advances.
    ///
    /// # Panics
    /// If called while another apply runs or after an apply panicked, or
    /// if an operation reads a future that was never resolved.
    pub fn apply_scheduled_operations(&mut self) -> Result<ValidMeshState, MeshError> {
        let ops = self.queue.begin_apply();
        if ops.is_empty() {
            self.queue.end_apply();
            return Ok(self.current_state());
        }
        let generation = self.generation + 1;
        log::debug!(
            "mesh `{}`: applying batch {generation} ({} operations)",
            self.name,
            ops.len()
        );
        let total = ops.len();
        let mut outcome = Ok(());
        for (i, op) in ops.into_iter().enumerate() {
            log::trace!("mesh `{}`: {op}", self.name);
            if let Err(e) = self.apply_operation(op) {
                log::warn!(
                    "mesh `{}`: batch {generation} stopped at operation {}/{total}: {e}",
                    self.name,
                    i + 1
                );
                outcome = Err(e);
                break;
            }
        }
        self.generation = generation;
        self.queue.end_apply();
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
        outcome.map(|()| self.current_state())
    }

    fn apply_operation(&mut self, op: ScheduledOperation) -> Result<(), MeshError> {
        match op {
            ScheduledOperation::AddItems {
                family,
                uids,
                added,
            } => {
                let range = self.families[family.0].add_items(&uids)?;
                added.fill(range);
            }
            ScheduledOperation::RemoveItems {
                family,
                uids,
                removed,
            } => {
                let range = self.families[family.0].remove_items(&uids)?;
                for f in &mut self.families {
                    for c in f.connectivities_mut().filter(|c| c.target() == family) {
                        c.notify_target_removed(range.lids());
                    }
                }
                removed.fill(range);
            }
            ScheduledOperation::AddConnectivity {
                source,
                source_items,
                target,
                degree,
                target_uids,
                name,
            } => {
                let sources = self.resolve(source, &source_items)?;
                let targets = self.family(target).lookup_many(&target_uids)?;
                let (layout, counts) = match degree {
                    Degree::Fixed(n) => (
                        ConnectivityLayout::Fixed { degree: n },
                        vec![n; sources.len()],
                    ),
                    Degree::Variable(counts) => {
                        if counts.len() != sources.len() {
                            return Err(MeshError::SizeMismatch {
                                what: "connectivity degrees",
                                expected: sources.len(),
                                found: counts.len(),
                            });
                        }
                        (ConnectivityLayout::Variable, counts)
                    }
                };
                let expected: usize = counts.iter().sum();
                if expected != targets.len() {
                    return Err(MeshError::SizeMismatch {
                        what: "connectivity target uids",
                        expected,
                        found: targets.len(),
                    });
                }
                let family = &mut self.families[source.0];
                family.check_connectivity(&name, target, layout)?;
                let connectivity = family.connectivity_entry(&name, target, layout);
                let mut offset = 0;
                for (&lid, n) in sources.iter().zip(counts) {
                    connectivity.set(lid, &targets[offset..offset + n])?;
                    offset += n;
                }
            }
            ScheduledOperation::SetProperty {
                family,
                name,
                items,
                values,
            } => {
                let lids = self.resolve(family, &items)?;
                self.families[family.0].set_property_column(&name, &lids, &values)?;
            }
        }
        Ok(())
    }

    fn resolve(&self, family: FamilyId, items: &ItemSource) -> Result<Vec<Lid>, MeshError> {
        let f = self.family(family);
        let lids = match items {
            ItemSource::Future(future) => match future.peek() {
                Some(range) => range.lids().to_vec(),
                None => panic!(
                    "[fatal] operation on family `{}` reads a FutureItemRange whose operation \
                     has not been applied",
                    f.name()
                ),
            },
            ItemSource::Range(range) => range.lids().to_vec(),
            ItemSource::Uids(uids) => return f.lookup_many(uids),
        };
        f.check_live(&lids)?;
        Ok(lids)
    }

    // ---- maintenance ------------------------------------------------------

    /// Renumber `family` densely and rewrite everything that stores its lids.
    ///
    /// Lids obtained before the call are invalid afterwards.
    ///
    /// # Errors
    /// `PendingOperations` if the queue is not empty.
    pub fn compact_family(&mut self, family: FamilyId) -> Result<LidRemap, MeshError> {
        if !self.queue.is_empty() {
            return Err(MeshError::PendingOperations {
                count: self.queue.len(),
            });
        }
        let remap = self.families[family.0].compact();
        for f in &mut self.families {
            for c in f.connectivities_mut().filter(|c| c.target() == family) {
                c.apply_target_remap(&remap);
            }
        }
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
        Ok(remap)
    }

    // ---- persistence ------------------------------------------------------

    /// Values of property `name` for every live item of `family`, keyed by uid.
    pub fn property_snapshot(
        &self,
        family: FamilyId,
        name: &str,
    ) -> Result<PropertySnapshot, MeshError> {
        let f = self.family(family);
        let items = f.all();
        let values = f.property_data(name)?.gather_column(items.lids())?;
        Ok(PropertySnapshot::new(
            format!("{}/{name}", f.name()),
            f.uids(&items)?,
            values,
        ))
    }

    /// Write snapshot values back, matching items by uid.
    ///
    /// # Errors
    /// `SnapshotFamilyMismatch` if the snapshot was taken from another
    /// family; `UidNotFound` if a snapshot uid is not live. Nothing is
    /// written in either case.
    pub fn restore_property_snapshot(
        &mut self,
        family: FamilyId,
        snapshot: &PropertySnapshot,
    ) -> Result<(), MeshError> {
        let f = &mut self.families[family.0];
        let name = snapshot.property_name_in(f.name()).ok_or_else(|| {
            MeshError::SnapshotFamilyMismatch {
                family: f.name().to_string(),
                snapshot: snapshot.full_name().to_string(),
            }
        })?;
        let lids = f.lookup_many(snapshot.uids())?;
        f.set_property_column(name, &lids, snapshot.values())
    }
}

impl DebugInvariants for Mesh {
    fn validate_invariants(&self) -> Result<(), MeshError> {
        for f in &self.families {
            f.validate_invariants()?;
            for c in f.connectivities() {
                let target = self.family(c.target()).local_ids();
                let dangling = c
                    .flat_view()
                    .into_iter()
                    .find(|&t| !t.is_null() && !target.is_live(t));
                if let Some(t) = dangling {
                    return Err(MeshError::InvariantViolation(format!(
                        "connectivity `{}` of `{}` references dead {t:?}",
                        c.name(),
                        f.name()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells_and_nodes() -> (Mesh, FamilyId, FamilyId) {
        let mut mesh = Mesh::new("unit");
        let cells = mesh.add_family(ItemKind::Cell, "CellFamily").unwrap();
        let nodes = mesh.add_family(ItemKind::Node, "NodeFamily").unwrap();
        (mesh, cells, nodes)
    }

    #[test]
    fn duplicate_family_is_rejected() {
        let (mut mesh, cells, _) = cells_and_nodes();
        assert!(matches!(
            mesh.add_family(ItemKind::Cell, "CellFamily"),
            Err(MeshError::DuplicateFamily { .. })
        ));
        assert_eq!(mesh.find_family(ItemKind::Cell, "CellFamily").unwrap(), cells);
        // Same name, other kind: distinct family.
        assert!(mesh.add_family(ItemKind::Face, "CellFamily").is_ok());
        assert!(matches!(
            mesh.find_family(ItemKind::Edge, "CellFamily"),
            Err(MeshError::FamilyNotFound { .. })
        ));
    }

    #[test]
    fn empty_apply_keeps_generation() {
        let (mut mesh, cells, _) = cells_and_nodes();
        let state = mesh.apply_scheduled_operations().unwrap();
        assert_eq!(state.generation(), 0);
        mesh.schedule_add_items(cells, [1i64]);
        assert_eq!(mesh.queue_state(), QueueState::Scheduling);
        assert_eq!(mesh.apply_scheduled_operations().unwrap().generation(), 1);
        assert_eq!(mesh.apply_scheduled_operations().unwrap().generation(), 1);
        assert_eq!(mesh.queue_state(), QueueState::Idle);
    }

    #[test]
    fn failing_operation_stops_batch() {
        let (mut mesh, cells, nodes) = cells_and_nodes();
        let first = mesh.schedule_add_items(cells, [0i64]);
        mesh.schedule_remove_items(nodes, [42i64]);
        let skipped = mesh.schedule_add_items(cells, [1i64]);
        let err = mesh.apply_scheduled_operations().unwrap_err();
        assert!(matches!(err, MeshError::UidNotFound { .. }));
        assert!(first.is_resolved());
        assert!(!skipped.is_resolved());
        assert_eq!(mesh.generation(), 1);
        assert_eq!(mesh.nb_scheduled_operations(), 0);
        assert_eq!(mesh.family(cells).nb_items(), 1);
        assert_eq!(first.get(&mesh.current_state()).size(), 1);
    }

    #[test]
    fn connectivity_size_is_validated_before_writing() {
        let (mut mesh, cells, nodes) = cells_and_nodes();
        let c = mesh.schedule_add_items(cells, [0i64]);
        mesh.schedule_add_items(nodes, [0i64, 1]);
        mesh.schedule_add_connectivity(cells, &c, nodes, 3, [0i64, 1], "cell_to_nodes");
        let err = mesh.apply_scheduled_operations().unwrap_err();
        assert_eq!(
            err,
            MeshError::SizeMismatch {
                what: "connectivity target uids",
                expected: 3,
                found: 2
            }
        );
        assert!(mesh.family(cells).connectivity("cell_to_nodes").is_err());
    }

    #[test]
    fn variable_connectivity_and_removal() {
        let (mut mesh, cells, nodes) = cells_and_nodes();
        let c = mesh.schedule_add_items(cells, [0i64, 1]);
        mesh.schedule_add_items(nodes, 0i64..5);
        mesh.schedule_add_variable_connectivity(
            cells,
            &c,
            nodes,
            vec![3, 2],
            [0i64, 1, 2, 3, 4],
            "cell_to_nodes",
        );
        mesh.apply_scheduled_operations().unwrap();
        mesh.schedule_remove_items(nodes, [1i64, 4]);
        mesh.apply_scheduled_operations().unwrap();
        let con = mesh.family(cells).connectivity("cell_to_nodes").unwrap();
        assert_eq!(con.view(Lid::new(0)), &[Lid::new(0), Lid::NULL, Lid::new(2)]);
        assert_eq!(con.view(Lid::new(1)), &[Lid::new(3), Lid::NULL]);
    }

    #[test]
    fn compaction_rewrites_incoming_connectivities() {
        let (mut mesh, cells, nodes) = cells_and_nodes();
        let c = mesh.schedule_add_items(cells, [0i64]);
        mesh.schedule_add_items(nodes, [10i64, 11, 12]);
        mesh.schedule_add_connectivity(cells, &c, nodes, 2, [10i64, 12], "cell_to_nodes");
        mesh.apply_scheduled_operations().unwrap();
        mesh.schedule_remove_items(nodes, [11i64]);
        mesh.apply_scheduled_operations().unwrap();

        mesh.schedule_add_items(nodes, [13i64]);
        assert!(matches!(
            mesh.compact_family(nodes),
            Err(MeshError::PendingOperations { count: 1 })
        ));
        mesh.apply_scheduled_operations().unwrap();
        mesh.schedule_remove_items(nodes, [13i64]);
        mesh.apply_scheduled_operations().unwrap();

        let remap = mesh.compact_family(nodes).unwrap();
        assert_eq!(remap.get(Lid::new(2)), Lid::new(1));
        let con = mesh.family(cells).connectivity("cell_to_nodes").unwrap();
        assert_eq!(con.view(Lid::new(0)), &[Lid::new(0), Lid::new(1)]);
        assert_eq!(mesh.family(nodes).lookup(Uid::new(12)).unwrap(), Lid::new(1));
    }

    #[test]
    #[should_panic(expected = "has not been applied")]
    fn reading_a_skipped_future_during_apply_panics() {
        let (mut mesh, cells, nodes) = cells_and_nodes();
        let orphan = FutureItemRange::new(mesh.id, 1);
        mesh.schedule_add_items(nodes, [0i64]);
        mesh.schedule_set_property(cells, "mass", orphan, vec![1.0f64]);
        let _ = mesh.apply_scheduled_operations();
    }

    #[test]
    fn typed_properties_follow_their_items() {
        let (mut mesh, cells, _) = cells_and_nodes();
        let added = mesh.schedule_add_items(cells, [5i64, 6, 7]);
        mesh.schedule_set_property(cells, "mass", &added, vec![1.0f64, 2.0, 3.0]);
        mesh.schedule_set_property(cells, "tag", vec![Uid::new(6)], vec![42i32]);
        let state = mesh.apply_scheduled_operations().unwrap();
        let range = added.get(&state);

        let family = mesh.family(cells);
        assert_eq!(family.property::<f64>("mass").unwrap().view(&range).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(family.property::<i32>("tag").unwrap().view(&range).unwrap(), vec![0, 42, 0]);

        mesh.schedule_set_property(cells, "mass", vec![Uid::new(5)], vec![7i64]);
        assert!(matches!(
            mesh.apply_scheduled_operations(),
            Err(MeshError::PropertyTypeMismatch { expected: "f64", found: "i64", .. })
        ));
    }
}
