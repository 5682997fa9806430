//! MeshError: unified error type for the recoverable neo-mesh APIs.
//!
//! Lookup failures and data mismatches (unknown uid, unknown family,
//! missing property, wrong payload length, ...) are reported through this
//! type. Broken invariants (reading an unresolved future range, re-entering
//! `apply_scheduled_operations`, launching a device kernel without device
//! support, reduce pool corruption) are not errors: they panic.

use crate::topology::item::{ItemKind, Lid, Uid};
use thiserror::Error;

/// Unified error type for neo-mesh operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// A uid was looked up in a family that does not own it.
    #[error("uid {uid} not found in family `{family}`")]
    UidNotFound { family: String, uid: Uid },
    /// A uid was added twice to the same family.
    #[error("uid {uid} already has local id {lid} in family `{family}`")]
    DuplicateUid { family: String, uid: Uid, lid: Lid },
    /// A local id does not designate a live item.
    #[error("local id {lid} is not allocated in family `{family}`")]
    LidNotAllocated { family: String, lid: Lid },
    /// No family registered under this kind and name.
    #[error("no {kind} family named `{name}`")]
    FamilyNotFound { kind: ItemKind, name: String },
    /// A family with this kind and name already exists.
    #[error("a {kind} family named `{name}` already exists")]
    DuplicateFamily { kind: ItemKind, name: String },
    /// Unknown connectivity name on a family.
    #[error("connectivity `{name}` not found in family `{family}`")]
    ConnectivityNotFound { family: String, name: String },
    /// Unknown property name on a family.
    #[error("property `{name}` not found in family `{family}`")]
    PropertyNotFound { family: String, name: String },
    /// Property exists but holds another value type.
    #[error("property `{name}` holds {found} values, {expected} requested")]
    PropertyTypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    /// Payload length does not match the item count.
    #[error("{what}: expected {expected} values, found {found}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    /// Fixed-degree connectivity row written with the wrong number of targets.
    #[error("connectivity `{name}` has degree {degree}, got {found} targets")]
    DegreeMismatch {
        name: String,
        degree: usize,
        found: usize,
    },
    /// A connectivity name is reused with another target family or layout.
    #[error("connectivity `{name}` already exists with {reason}")]
    ConnectivityMismatch { name: String, reason: &'static str },
    /// Connectivity slot index past the fixed degree.
    #[error("connectivity `{name}`: slot {slot} out of range (degree {degree})")]
    SlotOutOfRange {
        name: String,
        slot: usize,
        degree: usize,
    },
    /// An extent does not fit the integer width of the requested format version.
    #[error("extent {extent} does not fit a {bits}-bit field")]
    ExtentOverflow { extent: usize, bits: u32 },
    /// Snapshot format version other than 1 or 2.
    #[error("unsupported snapshot format version {0} (max=2)")]
    UnsupportedFormatVersion(u32),

    #[error("snapshot `{snapshot}` does not belong to family `{family}`")]
    SnapshotFamilyMismatch { family: String, snapshot: String },
    /// Renumbering requested while operations are still queued.
    #[error("{count} scheduled operations are pending; apply them first")]
    PendingOperations { count: usize },
    /// A structural self-check failed (see [`crate::DebugInvariants`]).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}
