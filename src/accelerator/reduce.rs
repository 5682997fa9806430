//! Reduction operators and device reduction scratch memory.
//!
//! Host policies reduce directly. Device launches need somewhere to put the
//! per-block partial results and the final value: a [`ReduceMemory`] owns
//! both. Instances are pooled by the command that created them and reused
//! across launches, so buffers only ever grow.

use crate::accelerator::policy::{DeviceReducePolicy, MemoryAdvice};
use crate::accelerator::runner::Runner;
use crate::accelerator::runtime::{MemoryRegion, RunQueueStream};
use bytemuck::Pod;
use num_traits::{Bounded, Zero};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

/// Bytes reserved for the reduced value when a reduce memory is created.
pub const INITIAL_REDUCE_DATA_SIZE: usize = 128;

/// Commutative, associative combination with an identity.
pub trait ReduceOp<T>: Send + Sync {
    fn identity() -> T;
    fn combine(a: T, b: T) -> T;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct ReduceSum<T>(PhantomData<T>);

#[derive(Copy, Clone, Debug, Default)]
pub struct ReduceMin<T>(PhantomData<T>);

#[derive(Copy, Clone, Debug, Default)]
pub struct ReduceMax<T>(PhantomData<T>);

impl<T: Zero + Copy + Send + Sync> ReduceOp<T> for ReduceSum<T> {
    fn identity() -> T {
        T::zero()
    }
    fn combine(a: T, b: T) -> T {
        a + b
    }
}

impl<T: Bounded + PartialOrd + Copy + Send + Sync> ReduceOp<T> for ReduceMin<T> {
    fn identity() -> T {
        T::max_value()
    }
    fn combine(a: T, b: T) -> T {
        if b < a { b } else { a }
    }
}

impl<T: Bounded + PartialOrd + Copy + Send + Sync> ReduceOp<T> for ReduceMax<T> {
    fn identity() -> T {
        T::min_value()
    }
    fn combine(a: T, b: T) -> T {
        if b > a { b } else { a }
    }
}

#[derive(Debug, Default)]
struct ReduceBuffers {
    /// Host-visible memory holding the reduced value.
    managed: Vec<u8>,
    data_type_size: usize,
    /// Kept alive for the asynchronous identity copy.
    identity: Vec<u8>,
    grid_size: usize,
    /// One partial per block; its length is the capacity.
    grid: Vec<u8>,
    reduce_policy: DeviceReducePolicy,
}

/// Scratch memory of one device reduction.
#[derive(Debug)]
pub struct ReduceMemory {
    runner: Runner,
    buffers: Mutex<ReduceBuffers>,
}

fn grow_zeroed(buf: &mut Vec<u8>, len: usize, what: &str) {
    if let Err(e) = buf.try_reserve_exact(len.saturating_sub(buf.len())) {
        panic!("[fatal] cannot allocate {len} bytes of {what}: {e}");
    }
    buf.resize(len, 0);
}

impl ReduceMemory {
    pub(crate) fn new(runner: Runner) -> Self {
        let mut managed = Vec::new();
        grow_zeroed(&mut managed, INITIAL_REDUCE_DATA_SIZE, "reduce data memory");
        Self {
            runner,
            buffers: Mutex::new(ReduceBuffers {
                managed,
                ..ReduceBuffers::default()
            }),
        }
    }

    /// Size the result memory for `identity` and initialize it with it.
    ///
    /// The identity is copied through `stream`, so it is buffered here
    /// first.
    pub fn allocate_reduce_data_memory(&self, identity: &[u8], stream: &dyn RunQueueStream) {
        let mut b = self.buffers.lock();
        let size = identity.len();
        b.data_type_size = size;
        if size > b.managed.len() {
            b.managed.clear();
            grow_zeroed(&mut b.managed, size, "reduce data memory");
        }
        b.identity.clear();
        b.identity.extend_from_slice(identity);
        let ReduceBuffers {
            managed, identity, ..
        } = &mut *b;
        stream.copy_memory(&mut managed[..size], identity, true);
    }

    /// Record the launch's block count and grow the grid buffer if
    /// `data_type_size * grid_size` exceeds it. Never shrinks.
    pub fn set_grid_size_and_allocate(&self, grid_size: usize) {
        let mut b = self.buffers.lock();
        b.grid_size = grid_size;
        b.reduce_policy = self.runner.device_reduce_policy();
        let Some(total) = b.data_type_size.checked_mul(grid_size) else {
            panic!(
                "[fatal] cannot allocate reduce grid memory: {} x {grid_size} bytes overflows usize",
                b.data_type_size
            );
        };
        if total <= b.grid.len() {
            return;
        }
        grow_zeroed(&mut b.grid, total, "reduce grid memory");
        let region = MemoryRegion::of(&b.grid);
        self.runner
            .set_memory_advice(region, MemoryAdvice::PreferredLocationDevice);
        self.runner.set_memory_advice(region, MemoryAdvice::AccessedByHost);
        log::trace!("reduce grid buffer grown to {total} bytes");
    }

    pub fn grid_size(&self) -> usize {
        self.buffers.lock().grid_size
    }

    /// Bytes currently allocated for block partials.
    pub fn grid_capacity(&self) -> usize {
        self.buffers.lock().grid.len()
    }

    pub fn data_type_size(&self) -> usize {
        self.buffers.lock().data_type_size
    }

    /// Bytes allocated for the reduced value.
    pub fn managed_size(&self) -> usize {
        self.buffers.lock().managed.len()
    }

    pub fn reduce_policy(&self) -> DeviceReducePolicy {
        self.buffers.lock().reduce_policy
    }

    /// Fold the partial of `block` in. Under the grid policy the block
    /// that brings `counter` to `nb_block` folds all partials into the
    /// result.
    pub(crate) fn merge_block<T: Pod, Op: ReduceOp<T>>(
        &self,
        block: usize,
        partial: T,
        counter: &AtomicU32,
        nb_block: usize,
    ) {
        let mut b = self.buffers.lock();
        let size = std::mem::size_of::<T>();
        debug_assert_eq!(size, b.data_type_size);
        match b.reduce_policy {
            DeviceReducePolicy::Atomic => {
                let current: T = bytemuck::pod_read_unaligned(&b.managed[..size]);
                let merged = Op::combine(current, partial);
                b.managed[..size].copy_from_slice(bytemuck::bytes_of(&merged));
            }
            DeviceReducePolicy::Grid => {
                b.grid[block * size..(block + 1) * size]
                    .copy_from_slice(bytemuck::bytes_of(&partial));
                let done = counter.fetch_add(1, Ordering::AcqRel) as usize + 1;
                if done == nb_block {
                    let mut acc: T = bytemuck::pod_read_unaligned(&b.managed[..size]);
                    for chunk in b.grid[..nb_block * size].chunks_exact(size) {
                        acc = Op::combine(acc, bytemuck::pod_read_unaligned(chunk));
                    }
                    b.managed[..size].copy_from_slice(bytemuck::bytes_of(&acc));
                }
            }
        }
    }

    /// Reduced value, valid once the launch completed.
    pub(crate) fn result<T: Pod>(&self) -> T {
        let b = self.buffers.lock();
        bytemuck::pod_read_unaligned(&b.managed[..std::mem::size_of::<T>()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::runner::RunnerConfig;
    use crate::accelerator::runtime::HostStream;

    #[test]
    fn operators() {
        assert_eq!(<ReduceSum<i64> as ReduceOp<i64>>::identity(), 0);
        assert_eq!(<ReduceMin<f64> as ReduceOp<f64>>::combine(2.0, -1.0), -1.0);
        assert_eq!(<ReduceMax<i32> as ReduceOp<i32>>::identity(), i32::MIN);
        assert_eq!(<ReduceMax<i32> as ReduceOp<i32>>::combine(3, 7), 7);
    }

    #[test]
    fn grid_buffer_only_grows() {
        let mem = ReduceMemory::new(Runner::new(RunnerConfig::default()));
        assert_eq!(mem.managed_size(), INITIAL_REDUCE_DATA_SIZE);
        mem.allocate_reduce_data_memory(&0f64.to_ne_bytes(), &HostStream);
        mem.set_grid_size_and_allocate(0);
        assert_eq!(mem.grid_capacity(), 0);
        mem.set_grid_size_and_allocate(128);
        assert_eq!(mem.grid_capacity(), 8 * 128);
        mem.set_grid_size_and_allocate(64);
        assert_eq!(mem.grid_size(), 64);
        assert_eq!(mem.grid_capacity(), 8 * 128);
    }

    #[test]
    #[should_panic(expected = "cannot allocate reduce grid memory")]
    fn oversized_grid_is_fatal() {
        let mem = ReduceMemory::new(Runner::new(RunnerConfig::default()));
        mem.allocate_reduce_data_memory(&0f64.to_ne_bytes(), &HostStream);
        mem.set_grid_size_and_allocate(usize::MAX / 4);
    }

    #[test]
    fn large_identity_grows_managed_memory() {
        let mem = ReduceMemory::new(Runner::new(RunnerConfig::default()));
        let identity = [7u8; 200];
        mem.allocate_reduce_data_memory(&identity, &HostStream);
        assert_eq!(mem.managed_size(), 200);
        assert_eq!(mem.data_type_size(), 200);
    }

    #[test]
    fn last_block_folds_partials() {
        let mem = ReduceMemory::new(Runner::new(RunnerConfig::default()));
        mem.allocate_reduce_data_memory(bytemuck::bytes_of(&0i64), &HostStream);
        mem.set_grid_size_and_allocate(3);
        let counter = AtomicU32::new(0);
        for (block, partial) in [(2, 30i64), (0, 10), (1, 20)] {
            mem.merge_block::<i64, ReduceSum<i64>>(block, partial, &counter, 3);
        }
        assert_eq!(mem.result::<i64>(), 60);
    }
}
