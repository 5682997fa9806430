//! Deferred mesh mutations.
//!
//! Every `schedule_*` call on [`Mesh`](super::Mesh) pushes one
//! [`ScheduledOperation`] here. Nothing touches the families until
//! `apply_scheduled_operations`, which drains the queue in FIFO order.

use crate::topology::family::FamilyId;
use crate::topology::item::Uid;
use crate::topology::property::PropertyColumn;
use crate::topology::range::{FutureItemRange, ItemRange};
use std::fmt;

/// Items an operation acts on.
#[derive(Clone, Debug)]
pub enum ItemSource {
    /// Output of an earlier operation (same or previous batch).
    Future(FutureItemRange),
    /// Lids resolved by the caller.
    Range(ItemRange),
    /// Uids, looked up when the operation runs.
    Uids(Vec<Uid>),
}

impl From<FutureItemRange> for ItemSource {
    fn from(f: FutureItemRange) -> Self {
        ItemSource::Future(f)
    }
}

impl From<&FutureItemRange> for ItemSource {
    fn from(f: &FutureItemRange) -> Self {
        ItemSource::Future(f.clone())
    }
}

impl From<ItemRange> for ItemSource {
    fn from(r: ItemRange) -> Self {
        ItemSource::Range(r)
    }
}

impl From<&ItemRange> for ItemSource {
    fn from(r: &ItemRange) -> Self {
        ItemSource::Range(r.clone())
    }
}

impl From<Vec<Uid>> for ItemSource {
    fn from(uids: Vec<Uid>) -> Self {
        ItemSource::Uids(uids)
    }
}

/// Number of targets per source item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Degree {
    Fixed(usize),
    /// One count per source item, in source order.
    Variable(Vec<usize>),
}

/// One queued mutation.
#[derive(Clone, Debug)]
pub enum ScheduledOperation {
    AddItems {
        family: FamilyId,
        uids: Vec<Uid>,
        added: FutureItemRange,
    },
    RemoveItems {
        family: FamilyId,
        uids: Vec<Uid>,
        removed: FutureItemRange,
    },
    AddConnectivity {
        source: FamilyId,
        source_items: ItemSource,
        target: FamilyId,
        degree: Degree,
        target_uids: Vec<Uid>,
        name: String,
    },
    SetProperty {
        family: FamilyId,
        name: String,
        items: ItemSource,
        values: PropertyColumn,
    },
}

impl ScheduledOperation {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ScheduledOperation::AddItems { .. } => "AddItems",
            ScheduledOperation::RemoveItems { .. } => "RemoveItems",
            ScheduledOperation::AddConnectivity { .. } => "AddConnectivity",
            ScheduledOperation::SetProperty { .. } => "SetProperty",
        }
    }

    /// Family the operation mutates.
    pub fn family(&self) -> FamilyId {
        match self {
            ScheduledOperation::AddItems { family, .. }
            | ScheduledOperation::RemoveItems { family, .. }
            | ScheduledOperation::SetProperty { family, .. } => *family,
            ScheduledOperation::AddConnectivity { source, .. } => *source,
        }
    }
}

impl fmt::Display for ScheduledOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduledOperation::AddItems { uids, .. } | ScheduledOperation::RemoveItems { uids, .. } => {
                write!(f, "{}({}, {} uids)", self.label(), self.family(), uids.len())
            }
            ScheduledOperation::AddConnectivity { name, target, .. } => {
                write!(f, "AddConnectivity(`{name}`: {} -> {target})", self.family())
            }
            ScheduledOperation::SetProperty { name, values, .. } => write!(
                f,
                "SetProperty(`{name}` on {}, {} {} values)",
                self.family(),
                values.len(),
                values.type_name()
            ),
        }
    }
}

/// Lifecycle of the queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing scheduled.
    Idle,
    /// At least one operation waits for the next apply.
    Scheduling,
    /// An apply is running (or unwound by a panic).
    Applying,
}

/// FIFO buffer of pending operations.
#[derive(Debug)]
pub struct ScheduledOperationQueue {
    ops: Vec<ScheduledOperation>,
    state: QueueState,
}

impl Default for ScheduledOperationQueue {
    fn default() -> Self {
        Self {
            ops: Vec::new(),
            state: QueueState::Idle,
        }
    }
}

impl ScheduledOperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduledOperation> {
        self.ops.iter()
    }

    pub(crate) fn push(&mut self, op: ScheduledOperation) {
        self.check_not_applying();
        log::trace!("scheduled {op}");
        self.ops.push(op);
        self.state = QueueState::Scheduling;
    }

    /// Take every pending operation and enter `Applying`.
    ///
    /// # Panics
    /// If an apply is already running or a previous one panicked midway.
    pub(crate) fn begin_apply(&mut self) -> Vec<ScheduledOperation> {
        self.check_not_applying();
        self.state = QueueState::Applying;
        std::mem::take(&mut self.ops)
    }

    pub(crate) fn end_apply(&mut self) {
        self.state = if self.ops.is_empty() {
            QueueState::Idle
        } else {
            QueueState::Scheduling
        };
    }

    fn check_not_applying(&self) {
        if self.state == QueueState::Applying {
            panic!(
                "[fatal] scheduled operation queue is in Applying state: \
                 apply is not reentrant and a panicking apply leaves the mesh unusable"
            );
        }
    }
}
