//! Backend collaborators: streams, timer events and device runtimes.
//!
//! Host policies use [`HostStream`] and [`TimerEvent`]. Device policies
//! delegate to a [`DeviceRuntime`] supplied by the application; kernel
//! compilation lives there, not in this crate.

use crate::accelerator::policy::{DeviceReducePolicy, ExecutionPolicy, MemoryAdvice};
use once_cell::sync::Lazy;
use std::ops::Range;
use std::time::Instant;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Ordered submission channel of a queue.
pub trait RunQueueStream: Send + Sync {
    fn notify_begin_launch_kernel(&self, _kernel_name: &str) {}
    fn notify_end_launch_kernel(&self, _kernel_name: &str) {}

    /// Block until every submitted operation completed.
    fn barrier(&self);

    /// Copy `src` into `dst`, possibly deferred until the next barrier.
    fn copy_memory(&self, dst: &mut [u8], src: &[u8], _is_async: bool) {
        dst.copy_from_slice(src);
    }
}

/// Timestamp recorded on a stream.
pub trait RunQueueEvent: Send + Sync {
    fn record(&mut self, stream: &dyn RunQueueStream);

    /// Recorded time in nanoseconds on the event's clock; 0 if unrecorded.
    fn time_ns(&self) -> u64;

    /// Nanoseconds between `start` and `self`.
    fn elapsed_since(&self, start: &dyn RunQueueEvent) -> u64 {
        self.time_ns().saturating_sub(start.time_ns())
    }
}

/// Stream of the host policies: work completes inside the launch call.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostStream;

impl RunQueueStream for HostStream {
    fn barrier(&self) {}
}

/// Wall-clock event.
#[derive(Debug, Default, Clone)]
pub struct TimerEvent {
    recorded: Option<Instant>,
}

impl RunQueueEvent for TimerEvent {
    fn record(&mut self, _stream: &dyn RunQueueStream) {
        self.recorded = Some(Instant::now());
    }

    fn time_ns(&self) -> u64 {
        self.recorded
            .map_or(0, |t| t.saturating_duration_since(*EPOCH).as_nanos() as u64)
    }
}

/// Block/thread decomposition of a 1D launch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KernelGrid {
    pub nb_block: usize,
    pub nb_thread_per_block: usize,
    pub len: usize,
}

impl KernelGrid {
    /// Enough blocks of `nb_thread_per_block` threads to cover `len` indices.
    pub fn for_len(len: usize, nb_thread_per_block: usize) -> Self {
        let nb_thread_per_block = nb_thread_per_block.max(1);
        Self {
            nb_block: len.div_ceil(nb_thread_per_block),
            nb_thread_per_block,
            len,
        }
    }

    /// Indices handled by `block`.
    pub fn block(&self, block: usize) -> BlockRange {
        let start = (block * self.nb_thread_per_block).min(self.len);
        let end = (start + self.nb_thread_per_block).min(self.len);
        BlockRange {
            index: block,
            range: start..end,
        }
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockRange> + '_ {
        (0..self.nb_block).map(|b| self.block(b))
    }
}

/// One block of a launch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockRange {
    pub index: usize,
    pub range: Range<usize>,
}

/// Identifies a buffer passed to [`DeviceRuntime::set_memory_advice`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    pub addr: usize,
    pub len: usize,
}

impl MemoryRegion {
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            addr: bytes.as_ptr() as usize,
            len: bytes.len(),
        }
    }
}

/// Device backend (CUDA, HIP).
pub trait DeviceRuntime: Send + Sync {
    /// Policy this runtime serves.
    fn policy(&self) -> ExecutionPolicy;

    fn create_stream(&self) -> Box<dyn RunQueueStream>;

    fn create_event(&self) -> Box<dyn RunQueueEvent>;

    /// Run `kernel` once per block of `grid` on `stream`.
    fn launch(
        &self,
        stream: &dyn RunQueueStream,
        grid: KernelGrid,
        kernel: &(dyn Fn(BlockRange) + Sync),
    );

    fn set_memory_advice(&self, region: MemoryRegion, advice: MemoryAdvice);

    fn reduce_policy(&self) -> DeviceReducePolicy {
        DeviceReducePolicy::Grid
    }
}
