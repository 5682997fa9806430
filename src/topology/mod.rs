//! Mesh topology building blocks.
//!
//! - [`item`]: uid/lid newtypes and item kinds
//! - [`local_id`]: uid → lid allocation with lid recycling
//! - [`connectivity`]: fixed/variable degree adjacency with a reverse index
//! - [`property`]: typed per-item value columns
//! - [`family`]: a kind + name owning the three above
//! - [`range`]: item ranges, deferred ranges and validity tokens
//!
//! Families are mutated only through the scheduling API of
//! [`Mesh`](crate::mesh::Mesh); this module exposes their read side.

pub mod connectivity;
pub mod family;
pub mod item;
pub mod local_id;
pub mod property;
pub mod range;

pub use connectivity::{Connectivity, ConnectivityLayout};
pub use family::{FamilyId, ItemFamily};
pub use item::{ItemKind, Lid, NULL_ITEM_LID, Uid};
pub use local_id::{ItemLocalIdAllocator, LidRemap};
pub use property::{Property, PropertyColumn, PropertyData, PropertyValue};
pub use range::{FutureItemRange, ItemRange, ValidMeshState};
