//! Pluggable storage for per-item property columns.
//!
//! A property stores one value per local id. This trait abstracts how that
//! flat column is held (plain `Vec`, pinned host memory, ...). The kernel
//! only needs slice access plus indexed gather/scatter.

use core::fmt::{self, Debug};

use crate::mesh_error::MeshError;
use crate::topology::item::Lid;

/// Contiguous, lid-indexable storage for `V`.
pub trait Storage<V>: Debug {
    /// Construct a column of `len` values, filled with `fill`.
    fn with_len(len: usize, fill: V) -> Self
    where
        V: Clone;

    /// Current length in elements.
    fn len(&self) -> usize;

    /// Whether the column holds no value.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resize to `new_len`, filling new cells with `fill`.
    fn resize(&mut self, new_len: usize, fill: V)
    where
        V: Clone;

    /// Entire read-only column.
    fn as_slice(&self) -> &[V];

    /// Entire mutable column.
    fn as_mut_slice(&mut self) -> &mut [V];

    /// Write `values[i]` at `lids[i]`.
    ///
    /// # Errors
    /// `SizeMismatch` if the two slices differ in length or a lid lies past
    /// the end of the column. Nothing is written on error.
    fn scatter(&mut self, lids: &[Lid], values: &[V]) -> Result<(), MeshError>
    where
        V: Clone,
    {
        if lids.len() != values.len() {
            return Err(MeshError::SizeMismatch {
                what: "property scatter",
                expected: lids.len(),
                found: values.len(),
            });
        }
        let len = self.len();
        if let Some(bad) = lids.iter().find(|l| l.is_null() || l.index() >= len) {
            return Err(MeshError::SizeMismatch {
                what: "property scatter (lid past column end)",
                expected: len,
                found: if bad.is_null() { 0 } else { bad.index() + 1 },
            });
        }
        let column = self.as_mut_slice();
        for (lid, v) in lids.iter().zip(values) {
            column[lid.index()] = v.clone();
        }
        Ok(())
    }

    /// Read the values at `lids`, in order.
    fn gather(&self, lids: &[Lid]) -> Result<Vec<V>, MeshError>
    where
        V: Clone,
    {
        let column = self.as_slice();
        lids.iter()
            .map(|lid| {
                (!lid.is_null())
                    .then(|| column.get(lid.index()))
                    .flatten()
                    .cloned()
                    .ok_or(MeshError::SizeMismatch {
                        what: "property gather (lid past column end)",
                        expected: column.len(),
                        found: if lid.is_null() { 0 } else { lid.index() + 1 },
                    })
            })
            .collect()
    }
}

/// `Vec`-backed storage (default).
#[derive(Clone)]
pub struct VecStorage<V>(pub(crate) Vec<V>);

impl<V> Debug for VecStorage<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VecStorage")
            .field("len", &self.0.len())
            .finish()
    }
}

impl<V> Storage<V> for VecStorage<V> {
    fn with_len(len: usize, fill: V) -> Self
    where
        V: Clone,
    {
        Self(vec![fill; len])
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn resize(&mut self, new_len: usize, fill: V)
    where
        V: Clone,
    {
        self.0.resize(new_len, fill);
    }

    fn as_slice(&self) -> &[V] {
        &self.0
    }

    fn as_mut_slice(&mut self) -> &mut [V] {
        &mut self.0
    }
}

impl<V> From<Vec<V>> for VecStorage<V> {
    fn from(v: Vec<V>) -> Self {
        Self(v)
    }
}

impl<V> VecStorage<V> {
    /// Unwrap the backing vector.
    pub fn into_inner(self) -> Vec<V> {
        self.0
    }
}
