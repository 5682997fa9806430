#![cfg_attr(docsrs, feature(doc_cfg))]
//! # neo-mesh
//!
//! neo-mesh is an incremental mesh kernel for scientific codes whose
//! topology changes during a run, plus a small execution layer that runs the
//! same loop on the calling thread, a thread pool or a device backend.
//!
//! ## Features
//! - Item families (cells, faces, edges, nodes, dofs) addressed by stable
//!   uids and dense, recyclable local ids
//! - Fixed and variable degree connectivities, cleaned automatically when
//!   their targets are removed
//! - Deferred, batched mutations: `schedule_*` calls fill a FIFO queue,
//!   [`Mesh::apply_scheduled_operations`](mesh::Mesh::apply_scheduled_operations)
//!   applies it and returns the token that unlocks the resulting ranges
//! - Typed per-item properties and uid-keyed snapshots for restart
//! - [`accelerator`]: `for_each` / `reduce` commands over Sequential, Thread
//!   (rayon), CUDA and HIP policies, with pooled device reduction memory
//!
//! ## Cargo features
//! - `rayon` (default): work-stealing Thread policy; without it the Thread
//!   policy splits the range statically over scoped threads
//! - `cuda`, `hip`: mark the device launch paths as compiled in
//! - `check-invariants`, `strict-invariants`: structural self-checks after
//!   every mutation, also in release builds
//!
//! ## Errors
//! Lookup and data mismatches are returned as [`MeshError`](mesh_error::MeshError).
//! Broken invariants (reading an unresolved future, re-entering apply,
//! launching on a device policy that is not available) panic with a
//! `[fatal]` message.

pub mod accelerator;
pub mod data;
pub mod debug_invariants;
pub mod geometry;
pub mod io;
pub mod mesh;
pub mod mesh_error;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::accelerator::{
        ExecutionPolicy, ParallelLoopOptions, ReduceMax, ReduceMin, ReduceSum, RunQueue,
        RunQueueConfig, Runner, RunnerConfig,
    };
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::geometry::Real3;
    pub use crate::io::{FormatVersion, PropertySnapshot};
    pub use crate::mesh::Mesh;
    pub use crate::mesh::schedule::ItemSource;
    pub use crate::mesh_error::MeshError;
    pub use crate::topology::{
        FamilyId, FutureItemRange, ItemKind, ItemRange, Lid, NULL_ITEM_LID, Uid, ValidMeshState,
    };
}
