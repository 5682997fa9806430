//! Per-item properties: one value per local id.
//!
//! A family holds any number of named properties. Each property is a typed
//! column ([`Property<V>`]) wrapped in the tagged [`PropertyData`] enum so
//! families can store heterogeneous columns side by side. Scheduled
//! `SetProperty` operations and snapshots move values around as a
//! [`PropertyColumn`], the type-erased payload.

use crate::data::storage::{Storage, VecStorage};
use crate::geometry::Real3;
use crate::mesh_error::MeshError;
use crate::topology::item::Lid;
use crate::topology::local_id::LidRemap;
use crate::topology::range::ItemRange;
use bytemuck::Pod;
use std::fmt::Debug;

/// A named column of `V`, indexed by local id.
///
/// The column always spans the whole lid space of its family. Slots of
/// removed items keep their last value until the lid is recycled, at which
/// point they are reset to the property default.
#[derive(Clone, Debug)]
pub struct Property<V, S: Storage<V> = VecStorage<V>> {
    name: String,
    values: S,
    default: V,
}

impl<V, S> Property<V, S>
where
    V: Clone + Debug,
    S: Storage<V>,
{
    pub fn new(name: impl Into<String>, len: usize, default: V) -> Self {
        Self {
            name: name.into(),
            values: S::with_len(len, default.clone()),
            default,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn get(&self, lid: Lid) -> Option<&V> {
        if lid.is_null() {
            return None;
        }
        self.values.as_slice().get(lid.index())
    }

    /// Values at the items of `range`, in range order.
    pub fn view(&self, range: &ItemRange) -> Result<Vec<V>, MeshError> {
        self.values.gather(range.lids())
    }

    pub fn as_slice(&self) -> &[V] {
        self.values.as_slice()
    }

    /// Write `values[i]` at `lids[i]`.
    pub fn set(&mut self, lids: &[Lid], values: &[V]) -> Result<(), MeshError> {
        self.values.scatter(lids, values)
    }

    /// Grow the column to `len` slots; new slots get the default.
    pub(crate) fn grow_to(&mut self, len: usize) {
        if len > self.values.len() {
            self.values.resize(len, self.default.clone());
        }
    }

    /// Reset the slots of `lids` to the default (recycled lids).
    pub(crate) fn reset(&mut self, lids: &[Lid]) {
        let column = self.values.as_mut_slice();
        for lid in lids {
            if let Some(slot) = column.get_mut(lid.index()) {
                *slot = self.default.clone();
            }
        }
    }

    /// Move every live value to its compacted slot and shrink to `new_len`.
    pub(crate) fn remap(&mut self, remap: &LidRemap, new_len: usize) {
        let mut packed = S::with_len(new_len, self.default.clone());
        {
            let dst = packed.as_mut_slice();
            for (old, value) in self.values.as_slice().iter().enumerate() {
                let new = remap.get(Lid::from_index(old));
                if !new.is_null() {
                    dst[new.index()] = value.clone();
                }
            }
        }
        self.values = packed;
    }
}

/// Type-erased values for a set of items, in item order.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum PropertyColumn {
    Real(Vec<f64>),
    Real3(Vec<Real3>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
}

impl PropertyColumn {
    pub fn len(&self) -> usize {
        match self {
            PropertyColumn::Real(v) => v.len(),
            PropertyColumn::Real3(v) => v.len(),
            PropertyColumn::Int32(v) => v.len(),
            PropertyColumn::Int64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyColumn::Real(_) => f64::TYPE_NAME,
            PropertyColumn::Real3(_) => Real3::TYPE_NAME,
            PropertyColumn::Int32(_) => i32::TYPE_NAME,
            PropertyColumn::Int64(_) => i64::TYPE_NAME,
        }
    }

    /// Raw bytes of the values (native endianness).
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PropertyColumn::Real(v) => bytemuck::cast_slice(v),
            PropertyColumn::Real3(v) => bytemuck::cast_slice(v),
            PropertyColumn::Int32(v) => bytemuck::cast_slice(v),
            PropertyColumn::Int64(v) => bytemuck::cast_slice(v),
        }
    }

    /// Number of scalar components per item.
    pub fn components(&self) -> usize {
        match self {
            PropertyColumn::Real3(_) => 3,
            _ => 1,
        }
    }
}

/// Tagged property storage held by a family.
#[derive(Clone, Debug)]
pub enum PropertyData {
    Real(Property<f64>),
    Real3(Property<Real3>),
    Int32(Property<i32>),
    Int64(Property<i64>),
}

/// Apply the same expression to whichever typed property is inside.
macro_rules! with_property {
    ($data:expr, $p:ident => $body:expr) => {
        match $data {
            PropertyData::Real($p) => $body,
            PropertyData::Real3($p) => $body,
            PropertyData::Int32($p) => $body,
            PropertyData::Int64($p) => $body,
        }
    };
}

impl PropertyData {
    /// Empty property able to store `column`'s value type.
    pub fn for_column(name: &str, column: &PropertyColumn, len: usize) -> Self {
        match column {
            PropertyColumn::Real(_) => f64::new_property(name, len),
            PropertyColumn::Real3(_) => Real3::new_property(name, len),
            PropertyColumn::Int32(_) => i32::new_property(name, len),
            PropertyColumn::Int64(_) => i64::new_property(name, len),
        }
    }

    pub fn name(&self) -> &str {
        with_property!(self, p => p.name())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyData::Real(_) => f64::TYPE_NAME,
            PropertyData::Real3(_) => Real3::TYPE_NAME,
            PropertyData::Int32(_) => i32::TYPE_NAME,
            PropertyData::Int64(_) => i64::TYPE_NAME,
        }
    }

    pub fn len(&self) -> usize {
        with_property!(self, p => p.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scatter a type-erased column at `lids`.
    ///
    /// # Errors
    /// `PropertyTypeMismatch` if the column holds another value type,
    /// `SizeMismatch` on a length mismatch.
    pub fn set_column(&mut self, lids: &[Lid], column: &PropertyColumn) -> Result<(), MeshError> {
        match (self, column) {
            (PropertyData::Real(p), PropertyColumn::Real(v)) => p.set(lids, v),
            (PropertyData::Real3(p), PropertyColumn::Real3(v)) => p.set(lids, v),
            (PropertyData::Int32(p), PropertyColumn::Int32(v)) => p.set(lids, v),
            (PropertyData::Int64(p), PropertyColumn::Int64(v)) => p.set(lids, v),
            (data, column) => Err(MeshError::PropertyTypeMismatch {
                name: data.name().to_owned(),
                expected: data.type_name(),
                found: column.type_name(),
            }),
        }
    }

    /// Gather the values at `lids` into a type-erased column.
    pub fn gather_column(&self, lids: &[Lid]) -> Result<PropertyColumn, MeshError> {
        Ok(match self {
            PropertyData::Real(p) => PropertyColumn::Real(p.values.gather(lids)?),
            PropertyData::Real3(p) => PropertyColumn::Real3(p.values.gather(lids)?),
            PropertyData::Int32(p) => PropertyColumn::Int32(p.values.gather(lids)?),
            PropertyData::Int64(p) => PropertyColumn::Int64(p.values.gather(lids)?),
        })
    }

    pub(crate) fn grow_to(&mut self, len: usize) {
        with_property!(self, p => p.grow_to(len))
    }

    pub(crate) fn reset(&mut self, lids: &[Lid]) {
        with_property!(self, p => p.reset(lids))
    }

    pub(crate) fn remap(&mut self, remap: &LidRemap, new_len: usize) {
        with_property!(self, p => p.remap(remap, new_len))
    }
}

/// Value types a property can hold.
pub trait PropertyValue: Pod + Default + PartialEq + Debug + Send + Sync + 'static {
    /// Stable label used in errors and snapshots.
    const TYPE_NAME: &'static str;

    fn new_property(name: &str, len: usize) -> PropertyData;
    fn downcast(data: &PropertyData) -> Option<&Property<Self>>;
    fn downcast_mut(data: &mut PropertyData) -> Option<&mut Property<Self>>;
    fn into_column(values: Vec<Self>) -> PropertyColumn;
}

macro_rules! impl_property_value {
    ($ty:ty, $variant:ident, $label:literal) => {
        impl PropertyValue for $ty {
            const TYPE_NAME: &'static str = $label;

            fn new_property(name: &str, len: usize) -> PropertyData {
                PropertyData::$variant(Property::new(name, len, <$ty>::default()))
            }

            fn downcast(data: &PropertyData) -> Option<&Property<Self>> {
                match data {
                    PropertyData::$variant(p) => Some(p),
                    _ => None,
                }
            }

            fn downcast_mut(data: &mut PropertyData) -> Option<&mut Property<Self>> {
                match data {
                    PropertyData::$variant(p) => Some(p),
                    _ => None,
                }
            }

            fn into_column(values: Vec<Self>) -> PropertyColumn {
                PropertyColumn::$variant(values)
            }
        }
    };
}

impl_property_value!(f64, Real, "f64");
impl_property_value!(Real3, Real3, "real3");
impl_property_value!(i32, Int32, "i32");
impl_property_value!(i64, Int64, "i64");

#[cfg(test)]
mod tests {
    use super::*;

    fn lids(raw: &[i32]) -> Vec<Lid> {
        raw.iter().copied().map(Lid::new).collect()
    }

    #[test]
    fn set_and_view_typed_property() {
        let mut p: Property<Real3> = Property::new("coords", 3, Real3::ZERO);
        p.set(&lids(&[2, 0]), &[Real3::new(1.0, 0.0, 0.0), Real3::new(0.0, 1.0, 0.0)])
            .unwrap();
        let range = ItemRange::from(lids(&[0, 1, 2]));
        assert_eq!(
            p.view(&range).unwrap(),
            vec![Real3::new(0.0, 1.0, 0.0), Real3::ZERO, Real3::new(1.0, 0.0, 0.0)]
        );
    }

    #[test]
    fn column_type_mismatch() {
        let mut data = i32::new_property("flags", 2);
        let err = data
            .set_column(&lids(&[0]), &PropertyColumn::Real(vec![1.0]))
            .unwrap_err();
        assert_eq!(
            err,
            MeshError::PropertyTypeMismatch {
                name: "flags".into(),
                expected: "i32",
                found: "f64"
            }
        );
    }

    #[test]
    fn remap_moves_values_to_compacted_slots() {
        let mut alloc = crate::topology::local_id::ItemLocalIdAllocator::new("n");
        alloc
            .allocate_many(&crate::topology::item::Uid::from_raw(&[1, 2, 3]))
            .unwrap();
        alloc.release(Lid::new(0)).unwrap();
        let remap = alloc.compact();

        let mut data = i64::new_property("tag", 3);
        data.set_column(&lids(&[0, 1, 2]), &PropertyColumn::Int64(vec![10, 20, 30]))
            .unwrap();
        data.remap(&remap, 2);
        assert_eq!(
            data.gather_column(&lids(&[0, 1])).unwrap(),
            PropertyColumn::Int64(vec![20, 30])
        );
    }

    #[test]
    fn downcast_follows_variant() {
        let data = Real3::new_property("x", 1);
        assert!(Real3::downcast(&data).is_some());
        assert!(f64::downcast(&data).is_none());
        assert_eq!(data.type_name(), "real3");
    }

    #[test]
    fn column_bytes_are_native_layout() {
        let col = PropertyColumn::Int32(vec![1, -1]);
        assert_eq!(col.as_bytes().len(), 8);
        assert_eq!(col.components(), 1);
    }
}
