//! Execution policies and device memory hints.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a command's loop body runs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionPolicy {
    /// In order, on the calling thread.
    #[default]
    Sequential,
    /// Split across worker threads.
    Thread,
    Cuda,
    Hip,
}

impl ExecutionPolicy {
    /// Whether the policy targets a device.
    pub fn is_accelerator(self) -> bool {
        matches!(self, ExecutionPolicy::Cuda | ExecutionPolicy::Hip)
    }

    /// Whether this build carries the launch path for the policy.
    pub fn is_compiled(self) -> bool {
        match self {
            ExecutionPolicy::Sequential | ExecutionPolicy::Thread => true,
            ExecutionPolicy::Cuda => cfg!(feature = "cuda"),
            ExecutionPolicy::Hip => cfg!(feature = "hip"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionPolicy::Sequential => "Sequential",
            ExecutionPolicy::Thread => "Thread",
            ExecutionPolicy::Cuda => "CUDA",
            ExecutionPolicy::Hip => "HIP",
        }
    }
}

impl fmt::Display for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How device blocks combine their partial reductions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceReducePolicy {
    /// Each block writes its partial into the grid buffer; the last block
    /// to finish folds them.
    #[default]
    Grid,
    /// Each block folds its partial straight into the result.
    Atomic,
}

/// Residency hint for device-visible memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemoryAdvice {
    PreferredLocationDevice,
    PreferredLocationHost,
    AccessedByDevice,
    AccessedByHost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_policies_are_always_compiled() {
        assert!(ExecutionPolicy::Sequential.is_compiled());
        assert!(ExecutionPolicy::Thread.is_compiled());
        assert!(!ExecutionPolicy::Thread.is_accelerator());
        assert!(ExecutionPolicy::Hip.is_accelerator());
        assert_eq!(ExecutionPolicy::Cuda.is_compiled(), cfg!(feature = "cuda"));
        assert_eq!(ExecutionPolicy::Cuda.to_string(), "CUDA");
    }
}
