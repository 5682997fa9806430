//! Persistence helpers.
//!
//! The mesh does not define a file format. It hands typed, uid-keyed
//! [`snapshot::PropertySnapshot`]s to whatever writer the application
//! plugs in, and takes them back on restart.

pub mod snapshot;

pub use snapshot::{Extents, FormatVersion, PropertySnapshot};
