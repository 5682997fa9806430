//! Loop execution across host and device policies.
//!
//! A [`Runner`] fixes the [`ExecutionPolicy`]; its [`RunQueue`]s hand out
//! [`RunCommand`]s that run one `for_each` or `reduce` each. Device policies
//! need the matching Cargo feature (`cuda`, `hip`) and a [`DeviceRuntime`]
//! attached to the runner; anything else panics at launch.

pub mod policy;
pub mod profiling;
pub mod reduce;
pub mod run_command;
pub mod run_queue;
pub mod runner;
pub mod runtime;

pub use policy::{DeviceReducePolicy, ExecutionPolicy, MemoryAdvice};
pub use profiling::{LoopStat, ProfilingRegistry};
pub use reduce::{ReduceMax, ReduceMemory, ReduceMin, ReduceOp, ReduceSum};
pub use run_command::{ParallelLoopOptions, RunCommand, TraceInfo};
pub use run_queue::{RunQueue, RunQueueConfig};
pub use runner::{Runner, RunnerConfig};
pub use runtime::{
    BlockRange, DeviceRuntime, HostStream, KernelGrid, MemoryRegion, RunQueueEvent,
    RunQueueStream, TimerEvent,
};
