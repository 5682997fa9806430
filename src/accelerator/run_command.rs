//! `RunCommand`: one loop launch on a queue.
//!
//! A command is built from [`RunQueue::command`], configured with the
//! builder methods, then consumed by [`RunCommand::for_each`] or
//! [`RunCommand::reduce`]. Its internal state is pooled by the queue and
//! recycled once the launch completed.
//!
//! ```
//! use neo_mesh::accelerator::{ExecutionPolicy, ReduceSum, Runner, RunnerConfig};
//!
//! let runner = Runner::new(RunnerConfig::with_policy(ExecutionPolicy::Thread));
//! let queue = runner.queue();
//! let total = queue
//!     .command()
//!     .add_kernel_name("sum_squares")
//!     .reduce::<u64, ReduceSum<u64>, _>(0..100, |i| (i * i) as u64);
//! assert_eq!(total, 328_350);
//! ```

use crate::accelerator::policy::ExecutionPolicy;
use crate::accelerator::profiling::ProfilingRegistry;
use crate::accelerator::reduce::{ReduceMemory, ReduceOp};
use crate::accelerator::run_queue::RunQueue;
use crate::accelerator::runner::Runner;
use crate::accelerator::runtime::{
    DeviceRuntime, KernelGrid, RunQueueEvent, RunQueueStream, TimerEvent,
};
use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Minimum non-zero device block size.
pub const MIN_NB_THREAD_PER_BLOCK: usize = 32;

/// Call site of a loop, used to label profiling entries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TraceInfo {
    pub file: &'static str,
    pub line: u32,
}

impl TraceInfo {
    /// Location of the caller.
    #[track_caller]
    pub fn here() -> Self {
        let loc = Location::caller();
        Self {
            file: loc.file(),
            line: loc.line(),
        }
    }
}

impl fmt::Display for TraceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Thread-policy tuning.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelLoopOptions {
    /// Smallest number of indices handed to one task; 0 lets the pool decide.
    pub grain_size: usize,
    /// Upper bound on worker threads; 0 means the whole pool.
    pub max_thread: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum CommandState {
    Created,
    Launched,
    Completed,
}

/// Pooled state behind a [`RunCommand`].
pub(crate) struct RunCommandImpl {
    kernel_name: String,
    trace_info: Option<TraceInfo>,
    nb_thread_per_block: usize,
    loop_options: ParallelLoopOptions,
    use_accelerator: bool,
    start_event: Box<dyn RunQueueEvent>,
    stop_event: Box<dyn RunQueueEvent>,
    state: CommandState,
    profile: bool,
    reduce_pool: Vec<Arc<ReduceMemory>>,
    active_reduce: Vec<Arc<ReduceMemory>>,
    /// Blocks done in the current reduction phase, shared by all of the
    /// command's reductions.
    grid_device_count: Arc<AtomicU32>,
}

impl RunCommandImpl {
    pub(crate) fn new(runner: &Runner) -> Self {
        let use_accelerator = runner.is_accelerator();
        // Device timers only when someone reads them.
        let use_sequential_timer_event = use_accelerator && !ProfilingRegistry::has_profiling();
        let create_event = || -> Box<dyn RunQueueEvent> {
            if use_sequential_timer_event {
                Box::new(TimerEvent::default())
            } else {
                runner.create_event_with_timer()
            }
        };
        Self {
            kernel_name: String::new(),
            trace_info: None,
            nb_thread_per_block: 0,
            loop_options: ParallelLoopOptions::default(),
            use_accelerator,
            start_event: create_event(),
            stop_event: create_event(),
            state: CommandState::Created,
            profile: false,
            reduce_pool: Vec::new(),
            active_reduce: Vec::new(),
            grid_device_count: Arc::new(AtomicU32::new(0)),
        }
    }

    pub(crate) fn state(&self) -> CommandState {
        self.state
    }

    fn notify_begin_launch_kernel(&mut self, stream: &dyn RunQueueStream) {
        stream.notify_begin_launch_kernel(&self.kernel_name);
        self.start_event.record(stream);
        self.state = CommandState::Launched;
        self.profile = ProfilingRegistry::has_profiling();
    }

    fn notify_end_launch_kernel(&mut self, stream: &dyn RunQueueStream) {
        self.stop_event.record(stream);
        stream.notify_end_launch_kernel(&self.kernel_name);
    }

    /// Account for a finished launch and make the state reusable.
    ///
    /// No-op unless the command was launched.
    pub(crate) fn notify_end_execute_kernel(&mut self, runner: &Runner) {
        if self.state != CommandState::Launched {
            return;
        }
        let elapsed_ns = self.stop_event.elapsed_since(self.start_event.as_ref());
        runner.add_command_time(elapsed_ns as f64 / 1.0e9);
        if self.profile {
            ProfilingRegistry::merge(&self.profiling_key(), elapsed_ns);
        }
        log::trace!("kernel `{}` completed in {elapsed_ns} ns", self.kernel_name);
        self.state = CommandState::Completed;
        self.reset();
    }

    fn reset(&mut self) {
        self.kernel_name.clear();
        self.trace_info = None;
        self.nb_thread_per_block = 0;
        self.loop_options = ParallelLoopOptions::default();
        self.profile = false;
        self.state = CommandState::Created;
    }

    fn profiling_key(&self) -> String {
        let name = if self.kernel_name.is_empty() {
            "<unnamed>"
        } else {
            &self.kernel_name
        };
        match &self.trace_info {
            Some(trace) => format!("{name}@{trace}"),
            None => name.to_owned(),
        }
    }

    fn block_size(&self, runner: &Runner) -> usize {
        match self.nb_thread_per_block {
            0 => runner.default_nb_thread_per_block(),
            n => n,
        }
    }

    fn get_or_create_reduce_memory(&mut self, runner: &Runner) -> Option<Arc<ReduceMemory>> {
        if !self.use_accelerator {
            return None;
        }
        let mem = self
            .reduce_pool
            .pop()
            .unwrap_or_else(|| Arc::new(ReduceMemory::new(runner.clone())));
        self.active_reduce.push(Arc::clone(&mem));
        Some(mem)
    }

    fn release_reduce_memory(&mut self, mem: &Arc<ReduceMemory>) {
        let Some(pos) = self.active_reduce.iter().position(|m| Arc::ptr_eq(m, mem)) else {
            panic!("[fatal] ReduceMemory is not in the active list of its command");
        };
        let mem = self.active_reduce.swap_remove(pos);
        self.reduce_pool.push(mem);
    }

    fn allocate_reduce_memory(&self, nb_grid: usize) {
        for mem in &self.active_reduce {
            mem.set_grid_size_and_allocate(nb_grid);
        }
    }
}

/// Single-use loop launch.
pub struct RunCommand<'q> {
    queue: &'q RunQueue,
    inner: Option<RunCommandImpl>,
}

impl<'q> RunCommand<'q> {
    pub(crate) fn new(queue: &'q RunQueue, inner: RunCommandImpl) -> Self {
        Self {
            queue,
            inner: Some(inner),
        }
    }

    fn imp(&self) -> &RunCommandImpl {
        match &self.inner {
            Some(imp) => imp,
            None => unreachable!("RunCommand used after launch"),
        }
    }

    fn imp_mut(&mut self) -> &mut RunCommandImpl {
        match &mut self.inner {
            Some(imp) => imp,
            None => unreachable!("RunCommand used after launch"),
        }
    }

    fn take_imp(&mut self) -> RunCommandImpl {
        match self.inner.take() {
            Some(imp) => imp,
            None => unreachable!("RunCommand launched twice"),
        }
    }

    pub fn add_kernel_name(mut self, name: impl Into<String>) -> Self {
        self.imp_mut().kernel_name = name.into();
        self
    }

    pub fn add_trace_info(mut self, trace: TraceInfo) -> Self {
        self.imp_mut().trace_info = Some(trace);
        self
    }

    /// Device block size. Negative values mean "default" (0); positive
    /// values below 32 are raised to 32.
    pub fn add_nb_thread_per_block(mut self, v: i32) -> Self {
        let v = usize::try_from(v).unwrap_or(0);
        self.imp_mut().nb_thread_per_block = match v {
            0 => 0,
            v => v.max(MIN_NB_THREAD_PER_BLOCK),
        };
        self
    }

    pub fn set_parallel_loop_options(mut self, options: ParallelLoopOptions) -> Self {
        self.imp_mut().loop_options = options;
        self
    }

    pub fn kernel_name(&self) -> &str {
        &self.imp().kernel_name
    }

    pub fn trace_info(&self) -> Option<TraceInfo> {
        self.imp().trace_info
    }

    /// Configured block size; 0 means the runner default.
    pub fn nb_thread_per_block(&self) -> usize {
        self.imp().nb_thread_per_block
    }

    pub fn parallel_loop_options(&self) -> ParallelLoopOptions {
        self.imp().loop_options
    }

    /// Reduce scratch memory from this command's pool; `None` on host
    /// policies, which reduce without it.
    pub fn get_or_create_reduce_memory(&mut self) -> Option<Arc<ReduceMemory>> {
        let runner = self.queue.runner().clone();
        self.imp_mut().get_or_create_reduce_memory(&runner)
    }

    /// Return `mem` to the pool.
    ///
    /// # Panics
    /// If `mem` is not currently handed out by this command.
    pub fn release_reduce_memory(&mut self, mem: &Arc<ReduceMemory>) {
        self.imp_mut().release_reduce_memory(mem);
    }

    /// Size the grid buffers of every active reduce memory for `nb_grid` blocks.
    pub fn allocate_reduce_memory(&self, nb_grid: usize) {
        self.imp().allocate_reduce_memory(nb_grid);
    }

    /// Run `body(i)` once for every `i` in `range`.
    ///
    /// # Panics
    /// On a device policy whose backend is not compiled in or not attached.
    pub fn for_each<F>(mut self, range: Range<usize>, body: F)
    where
        F: Fn(usize) + Sync + Send,
    {
        let queue = self.queue;
        let runner = queue.runner();
        let policy = runner.execution_policy();
        let device = policy.is_accelerator().then(|| device_runtime(runner));
        let mut imp = self.take_imp();
        let stream = queue.stream();
        imp.notify_begin_launch_kernel(stream);
        match (policy, device) {
            (_, Some(device)) => {
                let grid = KernelGrid::for_len(range.len(), imp.block_size(runner));
                let start = range.start;
                log::trace!("launching `{}` on {policy}: {grid:?}", imp.kernel_name);
                device.launch(stream, grid, &|block| {
                    for i in block.range {
                        body(start + i);
                    }
                });
            }
            (ExecutionPolicy::Thread, None) => thread_for_each(range, imp.loop_options, &body),
            _ => range.for_each(&body),
        }
        imp.notify_end_launch_kernel(stream);
        queue.finish_launch(imp);
    }

    /// Fold `body(i)` over `range` with `Op`.
    ///
    /// Waits for the launch to complete, even on an asynchronous queue.
    pub fn reduce<T, Op, F>(mut self, range: Range<usize>, body: F) -> T
    where
        T: Pod + Send + Sync,
        Op: ReduceOp<T>,
        F: Fn(usize) -> T + Sync + Send,
    {
        let queue = self.queue;
        let runner = queue.runner();
        let policy = runner.execution_policy();
        let device = policy.is_accelerator().then(|| device_runtime(runner));
        let mut imp = self.take_imp();
        let stream = queue.stream();
        imp.notify_begin_launch_kernel(stream);
        let value = match (policy, device) {
            (_, Some(device)) => {
                let identity = Op::identity();
                let Some(mem) = imp.get_or_create_reduce_memory(runner) else {
                    unreachable!("accelerator command without reduce memory");
                };
                mem.allocate_reduce_data_memory(bytemuck::bytes_of(&identity), stream);
                let grid = KernelGrid::for_len(range.len(), imp.block_size(runner));
                imp.allocate_reduce_memory(grid.nb_block);
                let counter = Arc::clone(&imp.grid_device_count);
                counter.store(0, Ordering::Release);
                let start = range.start;
                device.launch(stream, grid, &|block| {
                    let partial = block
                        .range
                        .clone()
                        .map(|i| body(start + i))
                        .fold(identity, Op::combine);
                    mem.merge_block::<T, Op>(block.index, partial, &counter, grid.nb_block);
                });
                stream.barrier();
                let value = mem.result::<T>();
                imp.release_reduce_memory(&mem);
                value
            }
            (ExecutionPolicy::Thread, None) => thread_reduce::<T, Op, F>(range, imp.loop_options, &body),
            _ => range.map(&body).fold(Op::identity(), Op::combine),
        };
        imp.notify_end_launch_kernel(stream);
        queue.finish_launch(imp);
        value
    }
}

impl Drop for RunCommand<'_> {
    fn drop(&mut self) {
        if let Some(mut imp) = self.inner.take() {
            imp.reset();
            self.queue.recycle(imp);
        }
    }
}

fn device_runtime(runner: &Runner) -> &Arc<dyn DeviceRuntime> {
    let policy = runner.execution_policy();
    if !policy.is_compiled() {
        panic!(
            "[fatal] Requesting {policy} kernel execution but the crate is not compiled with {policy} support"
        );
    }
    match runner.device_runtime() {
        Some(device) => device,
        None => panic!("[fatal] {policy} kernel execution requested but no device runtime is attached"),
    }
}

#[cfg(feature = "rayon")]
fn with_thread_limit<R: Send>(max_thread: usize, f: impl FnOnce() -> R + Send) -> R {
    if max_thread == 0 {
        return f();
    }
    match rayon::ThreadPoolBuilder::new().num_threads(max_thread).build() {
        Ok(pool) => pool.install(f),
        Err(e) => {
            log::warn!("cannot build a {max_thread}-thread pool ({e}); using the global pool");
            f()
        }
    }
}

#[cfg(feature = "rayon")]
fn thread_for_each<F: Fn(usize) + Sync + Send>(
    range: Range<usize>,
    options: ParallelLoopOptions,
    body: &F,
) {
    use rayon::prelude::*;
    with_thread_limit(options.max_thread, || {
        range
            .into_par_iter()
            .with_min_len(options.grain_size.max(1))
            .for_each(body)
    });
}

#[cfg(feature = "rayon")]
fn thread_reduce<T, Op, F>(range: Range<usize>, options: ParallelLoopOptions, body: &F) -> T
where
    T: Send + Sync,
    Op: ReduceOp<T>,
    F: Fn(usize) -> T + Sync + Send,
{
    use rayon::prelude::*;
    with_thread_limit(options.max_thread, || {
        range
            .into_par_iter()
            .with_min_len(options.grain_size.max(1))
            .map(body)
            .reduce(Op::identity, Op::combine)
    })
}

/// Static split of `range` for the scoped-thread fallback.
#[cfg(not(feature = "rayon"))]
fn static_chunks(range: Range<usize>, options: ParallelLoopOptions) -> Vec<Range<usize>> {
    let nb_thread = match options.max_thread {
        0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
        n => n,
    };
    let chunk = range.len().div_ceil(nb_thread).max(options.grain_size).max(1);
    (range.start..range.end)
        .step_by(chunk)
        .map(|s| s..(s + chunk).min(range.end))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn thread_for_each<F: Fn(usize) + Sync + Send>(
    range: Range<usize>,
    options: ParallelLoopOptions,
    body: &F,
) {
    std::thread::scope(|s| {
        for chunk in static_chunks(range, options) {
            s.spawn(move || chunk.for_each(body));
        }
    });
}

#[cfg(not(feature = "rayon"))]
fn thread_reduce<T, Op, F>(range: Range<usize>, options: ParallelLoopOptions, body: &F) -> T
where
    T: Send + Sync,
    Op: ReduceOp<T>,
    F: Fn(usize) -> T + Sync + Send,
{
    std::thread::scope(|s| {
        let handles: Vec<_> = static_chunks(range, options)
            .into_iter()
            .map(|chunk| s.spawn(move || chunk.map(body).fold(Op::identity(), Op::combine)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .fold(Op::identity(), Op::combine)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::reduce::{ReduceMax, ReduceSum};
    use crate::accelerator::runner::RunnerConfig;
    use std::sync::atomic::AtomicUsize;

    fn runner(policy: ExecutionPolicy) -> Runner {
        Runner::new(RunnerConfig::with_policy(policy))
    }

    #[test]
    fn block_size_is_clamped() {
        let r = runner(ExecutionPolicy::Sequential);
        let q = r.queue();
        assert_eq!(q.command().add_nb_thread_per_block(-5).nb_thread_per_block(), 0);
        assert_eq!(q.command().add_nb_thread_per_block(0).nb_thread_per_block(), 0);
        assert_eq!(q.command().add_nb_thread_per_block(7).nb_thread_per_block(), 32);
        assert_eq!(q.command().add_nb_thread_per_block(128).nb_thread_per_block(), 128);
    }

    #[test]
    fn end_execute_without_launch_is_noop() {
        let r = runner(ExecutionPolicy::Sequential);
        let mut imp = RunCommandImpl::new(&r);
        imp.kernel_name = "k".into();
        imp.notify_end_execute_kernel(&r);
        assert_eq!(imp.state(), CommandState::Created);
        assert_eq!(imp.kernel_name, "k");
        assert_eq!(r.cumulative_command_time(), 0.0);
    }

    #[test]
    fn completed_command_is_reset() {
        let r = runner(ExecutionPolicy::Sequential);
        let mut imp = RunCommandImpl::new(&r);
        imp.kernel_name = "k".into();
        imp.nb_thread_per_block = 64;
        imp.notify_begin_launch_kernel(&crate::accelerator::runtime::HostStream);
        assert_eq!(imp.state(), CommandState::Launched);
        imp.notify_end_launch_kernel(&crate::accelerator::runtime::HostStream);
        imp.notify_end_execute_kernel(&r);
        assert_eq!(imp.state(), CommandState::Created);
        assert!(imp.kernel_name.is_empty());
        assert_eq!(imp.nb_thread_per_block, 0);
    }

    #[test]
    fn host_policies_visit_every_index_once() {
        for policy in [ExecutionPolicy::Sequential, ExecutionPolicy::Thread] {
            let r = runner(policy);
            let q = r.queue();
            let hits: Vec<AtomicUsize> = (0..1000).map(|_| AtomicUsize::new(0)).collect();
            q.command()
                .set_parallel_loop_options(ParallelLoopOptions {
                    grain_size: 16,
                    max_thread: 0,
                })
                .for_each(0..1000, |i| {
                    hits[i].fetch_add(1, Ordering::Relaxed);
                });
            assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1), "{policy}");
        }
    }

    #[test]
    fn host_reductions() {
        for policy in [ExecutionPolicy::Sequential, ExecutionPolicy::Thread] {
            let q = runner(policy).queue();
            let sum = q.command().reduce::<i64, ReduceSum<i64>, _>(1..101, |i| i as i64);
            assert_eq!(sum, 5050);
            let max = q.command().reduce::<f64, ReduceMax<f64>, _>(0..10, |i| (i as f64 - 4.0).abs());
            assert_eq!(max, 5.0);
            let empty = q.command().reduce::<i32, ReduceSum<i32>, _>(0..0, |_| 1);
            assert_eq!(empty, 0);
        }
    }

    #[test]
    fn host_commands_have_no_reduce_memory() {
        let q = runner(ExecutionPolicy::Thread).queue();
        let mut cmd = q.command();
        assert!(cmd.get_or_create_reduce_memory().is_none());
    }

    #[test]
    fn trace_info_labels_profiling_key() {
        let r = runner(ExecutionPolicy::Sequential);
        let mut imp = RunCommandImpl::new(&r);
        assert_eq!(imp.profiling_key(), "<unnamed>");
        imp.kernel_name = "axpy".into();
        imp.trace_info = Some(TraceInfo {
            file: "solver.rs",
            line: 12,
        });
        assert_eq!(imp.profiling_key(), "axpy@solver.rs:12");
    }
}
