//! Property snapshots handed to a persistence collaborator.
//!
//! A snapshot carries a property's values for every live item, keyed by
//! uid so it can be restored after lids changed. Writers describe the
//! payload with [`PropertySnapshot::extents`]; format version 1 stores
//! extents as 32-bit integers, version 2 as 64-bit integers. The byte
//! layout of a file is up to the writer.

use crate::mesh_error::MeshError;
use crate::topology::item::Uid;
use crate::topology::property::PropertyColumn;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Snapshot format version.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatVersion {
    /// 32-bit extents.
    V1,
    /// 64-bit extents.
    #[default]
    V2,
}

impl FormatVersion {
    pub fn number(self) -> u32 {
        match self {
            FormatVersion::V1 => 1,
            FormatVersion::V2 => 2,
        }
    }
}

impl TryFrom<u32> for FormatVersion {
    type Error = MeshError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(FormatVersion::V1),
            2 => Ok(FormatVersion::V2),
            other => Err(MeshError::UnsupportedFormatVersion(other)),
        }
    }
}

/// Dimensions of a snapshot payload, at the width of its format version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Extents {
    V1(Vec<i32>),
    V2(Vec<i64>),
}

/// Values of one property, keyed by item uid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertySnapshot {
    full_name: String,
    uids: Vec<Uid>,
    values: PropertyColumn,
}

impl PropertySnapshot {
    pub fn new(full_name: String, uids: Vec<Uid>, values: PropertyColumn) -> Self {
        debug_assert_eq!(uids.len(), values.len());
        Self {
            full_name,
            uids,
            values,
        }
    }

    /// `"<family>/<property>"`.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Everything after the first `/`; property names may contain `/`.
    pub fn property_name(&self) -> &str {
        self.full_name
            .split_once('/')
            .map_or(self.full_name.as_str(), |(_, p)| p)
    }

    /// Property name if the snapshot was taken from `family`.
    pub fn property_name_in(&self, family: &str) -> Option<&str> {
        self.full_name.strip_prefix(family)?.strip_prefix('/')
    }

    pub fn uids(&self) -> &[Uid] {
        &self.uids
    }

    pub fn values(&self) -> &PropertyColumn {
        &self.values
    }

    pub fn nb_items(&self) -> usize {
        self.uids.len()
    }

    /// `[nb_items, components per item]` at the width of `version`.
    ///
    /// # Errors
    /// `ExtentOverflow` if an extent does not fit 32 bits under version 1.
    pub fn extents(&self, version: FormatVersion) -> Result<Extents, MeshError> {
        let dims = [self.nb_items(), self.values.components()];
        match version {
            FormatVersion::V1 => dims
                .iter()
                .map(|&d| {
                    i32::try_from(d).map_err(|_| MeshError::ExtentOverflow {
                        extent: d,
                        bits: 32,
                    })
                })
                .collect::<Result<_, _>>()
                .map(Extents::V1),
            FormatVersion::V2 => dims
                .iter()
                .map(|&d| {
                    i64::try_from(d).map_err(|_| MeshError::ExtentOverflow {
                        extent: d,
                        bits: 64,
                    })
                })
                .collect::<Result<_, _>>()
                .map(Extents::V2),
        }
    }

    /// Raw value bytes in native endianness.
    pub fn payload(&self) -> Bytes {
        Bytes::copy_from_slice(self.values.as_bytes())
    }

    /// Raw uid bytes in native endianness.
    pub fn uid_payload(&self) -> Bytes {
        Bytes::copy_from_slice(bytemuck::cast_slice(&self.uids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Real3;

    fn snapshot() -> PropertySnapshot {
        PropertySnapshot::new(
            "NodeFamily/item_coordinates".into(),
            Uid::from_raw(&[4, 7]),
            PropertyColumn::Real3(vec![Real3::new(0.0, 1.0, 2.0), Real3::ZERO]),
        )
    }

    #[test]
    fn extents_follow_version_width() {
        let s = snapshot();
        assert_eq!(s.extents(FormatVersion::V1).unwrap(), Extents::V1(vec![2, 3]));
        assert_eq!(s.extents(FormatVersion::V2).unwrap(), Extents::V2(vec![2, 3]));
        assert_eq!(s.property_name(), "item_coordinates");
        assert_eq!(s.property_name_in("NodeFamily"), Some("item_coordinates"));
        assert_eq!(s.property_name_in("Node"), None);
        assert_eq!(s.property_name_in("CellFamily"), None);
        assert_eq!(s.payload().len(), 2 * 3 * 8);
        assert_eq!(s.uid_payload().len(), 2 * 8);
    }

    #[test]
    fn slash_in_property_name_is_kept() {
        let s = PropertySnapshot::new(
            "CellFamily/flux/x".into(),
            Uid::from_raw(&[1]),
            PropertyColumn::Real(vec![0.5]),
        );
        assert_eq!(s.property_name(), "flux/x");
        assert_eq!(s.property_name_in("CellFamily"), Some("flux/x"));
    }

    #[test]
    fn version_numbers() {
        assert_eq!(FormatVersion::try_from(1).unwrap(), FormatVersion::V1);
        assert_eq!(FormatVersion::try_from(2).unwrap().number(), 2);
        let err = FormatVersion::try_from(3).unwrap_err();
        assert_eq!(err, MeshError::UnsupportedFormatVersion(3));
        assert!(err.to_string().contains("(max=2)"));
    }

    #[test]
    fn serde_round_trip() {
        let s = snapshot();
        let json = serde_json::to_string(&s).unwrap();
        let back: PropertySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
