//! Item families: one kind + name, its local ids, properties and outgoing
//! connectivities.

use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshError;
use crate::topology::connectivity::{Connectivity, ConnectivityLayout};
use crate::topology::item::{ItemKind, Lid, Uid};
use crate::topology::local_id::{ItemLocalIdAllocator, LidRemap};
use crate::topology::property::{Property, PropertyColumn, PropertyData, PropertyValue};
use crate::topology::range::ItemRange;
use std::collections::BTreeMap;
use std::fmt;

/// Handle to a family inside its [`Mesh`](crate::mesh::Mesh).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FamilyId(pub(crate) usize);

impl FamilyId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "family#{}", self.0)
    }
}

/// A set of items of one kind.
///
/// Every property column spans the whole lid space (`capacity()`), so a
/// lid is always a valid index into any property of the family.
#[derive(Clone, Debug)]
pub struct ItemFamily {
    id: FamilyId,
    kind: ItemKind,
    name: String,
    lids: ItemLocalIdAllocator,
    properties: BTreeMap<String, PropertyData>,
    connectivities: BTreeMap<String, Connectivity>,
}

impl ItemFamily {
    pub(crate) fn new(id: FamilyId, kind: ItemKind, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            kind,
            lids: ItemLocalIdAllocator::new(name.clone()),
            name,
            properties: BTreeMap::new(),
            connectivities: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> FamilyId {
        self.id
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live items.
    pub fn nb_items(&self) -> usize {
        self.lids.nb_items()
    }

    /// Size of the lid space, tombstones included.
    pub fn capacity(&self) -> usize {
        self.lids.capacity()
    }

    /// All live items, in lid order.
    pub fn all(&self) -> ItemRange {
        self.lids.live_lids().collect()
    }

    pub fn local_ids(&self) -> &ItemLocalIdAllocator {
        &self.lids
    }

    pub fn lookup(&self, uid: Uid) -> Result<Lid, MeshError> {
        self.lids.lookup(uid)
    }

    pub fn lookup_many(&self, uids: &[Uid]) -> Result<Vec<Lid>, MeshError> {
        self.lids.lookup_many(uids)
    }

    /// Uids of the items in `range`, in range order.
    pub fn uids(&self, range: &ItemRange) -> Result<Vec<Uid>, MeshError> {
        range
            .iter()
            .map(|lid| {
                self.lids.uid(lid).ok_or_else(|| MeshError::LidNotAllocated {
                    family: self.name.clone(),
                    lid,
                })
            })
            .collect()
    }

    /// Check that every lid of `lids` designates a live item.
    pub fn check_live(&self, lids: &[Lid]) -> Result<(), MeshError> {
        match lids.iter().find(|&&lid| !self.lids.is_live(lid)) {
            Some(&lid) => Err(MeshError::LidNotAllocated {
                family: self.name.clone(),
                lid,
            }),
            None => Ok(()),
        }
    }

    /// Allocate lids for `uids`; all-or-nothing.
    ///
    /// Properties and outgoing connectivities grow with the lid space.
    /// Recycled property slots are reset to their default value; new
    /// fixed-degree rows read as all-null until written.
    pub(crate) fn add_items(&mut self, uids: &[Uid]) -> Result<ItemRange, MeshError> {
        let old_capacity = self.capacity();
        let lids = self.lids.allocate_many(uids)?;
        let capacity = self.capacity();
        let recycled: Vec<Lid> = lids
            .iter()
            .copied()
            .filter(|lid| lid.index() < old_capacity)
            .collect();
        for property in self.properties.values_mut() {
            property.grow_to(capacity);
            property.reset(&recycled);
        }
        for connectivity in self.connectivities.values_mut() {
            connectivity.ensure_rows(capacity);
        }
        log::debug!(
            "family `{}`: added {} items ({} recycled lids)",
            self.name,
            lids.len(),
            recycled.len()
        );
        Ok(ItemRange::new(lids))
    }

    /// Release the items of `uids` and drop their outgoing connectivity rows.
    ///
    /// Connectivities of other families that point here are cleaned by the
    /// mesh, which sees all families.
    pub(crate) fn remove_items(&mut self, uids: &[Uid]) -> Result<ItemRange, MeshError> {
        let lids = self.lids.release_uids(uids)?;
        for connectivity in self.connectivities.values_mut() {
            connectivity.notify_source_removed(&lids);
        }
        log::debug!("family `{}`: removed {} items", self.name, lids.len());
        Ok(ItemRange::new(lids))
    }

    /// Renumber the lids densely; properties and outgoing rows follow.
    pub(crate) fn compact(&mut self) -> LidRemap {
        let remap = self.lids.compact();
        let capacity = self.capacity();
        for property in self.properties.values_mut() {
            property.remap(&remap, capacity);
        }
        for connectivity in self.connectivities.values_mut() {
            connectivity.apply_source_remap(&remap, capacity);
        }
        remap
    }

    // ---- properties -------------------------------------------------------

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn property_data(&self, name: &str) -> Result<&PropertyData, MeshError> {
        self.properties
            .get(name)
            .ok_or_else(|| MeshError::PropertyNotFound {
                family: self.name.clone(),
                name: name.to_owned(),
            })
    }

    /// Typed read access to a property.
    ///
    /// # Errors
    /// `PropertyNotFound`, or `PropertyTypeMismatch` if the column holds
    /// another value type than `V`.
    pub fn property<V: PropertyValue>(&self, name: &str) -> Result<&Property<V>, MeshError> {
        let data = self.property_data(name)?;
        V::downcast(data).ok_or_else(|| MeshError::PropertyTypeMismatch {
            name: name.to_owned(),
            expected: V::TYPE_NAME,
            found: data.type_name(),
        })
    }

    /// Create the property `name` with `V` values if missing.
    pub(crate) fn add_property<V: PropertyValue>(
        &mut self,
        name: &str,
    ) -> Result<&mut Property<V>, MeshError> {
        let capacity = self.capacity();
        let data = self
            .properties
            .entry(name.to_owned())
            .or_insert_with(|| V::new_property(name, capacity));
        let found = data.type_name();
        V::downcast_mut(data).ok_or_else(|| MeshError::PropertyTypeMismatch {
            name: name.to_owned(),
            expected: V::TYPE_NAME,
            found,
        })
    }

    /// Scatter a type-erased column at `lids`, creating the property from
    /// the column's value type if missing.
    pub(crate) fn set_property_column(
        &mut self,
        name: &str,
        lids: &[Lid],
        column: &PropertyColumn,
    ) -> Result<(), MeshError> {
        if lids.len() != column.len() {
            return Err(MeshError::SizeMismatch {
                what: "property values",
                expected: lids.len(),
                found: column.len(),
            });
        }
        self.check_live(lids)?;
        let capacity = self.capacity();
        let data = self
            .properties
            .entry(name.to_owned())
            .or_insert_with(|| PropertyData::for_column(name, column, capacity));
        data.set_column(lids, column)
    }

    // ---- connectivities ---------------------------------------------------

    pub fn connectivity_names(&self) -> impl Iterator<Item = &str> {
        self.connectivities.keys().map(String::as_str)
    }

    pub fn connectivities(&self) -> impl Iterator<Item = &Connectivity> {
        self.connectivities.values()
    }

    pub fn connectivity(&self, name: &str) -> Result<&Connectivity, MeshError> {
        self.connectivities
            .get(name)
            .ok_or_else(|| MeshError::ConnectivityNotFound {
                family: self.name.clone(),
                name: name.to_owned(),
            })
    }

    /// Check that `name` can hold rows of `layout` towards `target`.
    pub(crate) fn check_connectivity(
        &self,
        name: &str,
        target: FamilyId,
        layout: ConnectivityLayout,
    ) -> Result<(), MeshError> {
        let Some(existing) = self.connectivities.get(name) else {
            return Ok(());
        };
        if existing.target() != target {
            return Err(MeshError::ConnectivityMismatch {
                name: name.to_owned(),
                reason: "another target family",
            });
        }
        if existing.layout() != layout {
            return Err(MeshError::ConnectivityMismatch {
                name: name.to_owned(),
                reason: "another layout",
            });
        }
        Ok(())
    }

    /// Connectivity `name`, created empty if missing. Call
    /// [`check_connectivity`](Self::check_connectivity) first.
    pub(crate) fn connectivity_entry(
        &mut self,
        name: &str,
        target: FamilyId,
        layout: ConnectivityLayout,
    ) -> &mut Connectivity {
        let capacity = self.capacity();
        let connectivity = self
            .connectivities
            .entry(name.to_owned())
            .or_insert_with(|| Connectivity::new(name, target, layout));
        connectivity.ensure_rows(capacity);
        connectivity
    }

    pub(crate) fn connectivities_mut(&mut self) -> impl Iterator<Item = &mut Connectivity> {
        self.connectivities.values_mut()
    }
}

impl DebugInvariants for ItemFamily {
    fn validate_invariants(&self) -> Result<(), MeshError> {
        self.lids.validate_invariants()?;
        let capacity = self.capacity();
        if let Some(p) = self.properties.values().find(|p| p.len() != capacity) {
            return Err(MeshError::InvariantViolation(format!(
                "family `{}`: property `{}` has {} slots, lid space is {capacity}",
                self.name,
                p.name(),
                p.len()
            )));
        }
        for connectivity in self.connectivities.values() {
            connectivity.validate_invariants()?;
        }
        Ok(())
    }
}
