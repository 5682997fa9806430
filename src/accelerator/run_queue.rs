//! `RunQueue`: ordered launches on one stream, with pooled command state.

use crate::accelerator::policy::ExecutionPolicy;
use crate::accelerator::run_command::{RunCommand, RunCommandImpl};
use crate::accelerator::runner::Runner;
use crate::accelerator::runtime::{HostStream, RunQueueStream};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Queue settings.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunQueueConfig {
    /// Keep launched commands pending until [`RunQueue::barrier`] instead of
    /// completing them right after launch.
    pub is_async: bool,
}

pub struct RunQueue {
    runner: Runner,
    config: RunQueueConfig,
    stream: Box<dyn RunQueueStream>,
    pool: Mutex<Vec<RunCommandImpl>>,
    pending: Mutex<Vec<RunCommandImpl>>,
}

impl RunQueue {
    pub(crate) fn new(runner: Runner, config: RunQueueConfig) -> Self {
        let stream = match runner.device_runtime() {
            Some(device) => device.create_stream(),
            None => Box::new(HostStream),
        };
        Self {
            runner,
            config,
            stream,
            pool: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    pub fn execution_policy(&self) -> ExecutionPolicy {
        self.runner.execution_policy()
    }

    pub fn is_async(&self) -> bool {
        self.config.is_async
    }

    /// New command, reusing pooled state when available.
    pub fn command(&self) -> RunCommand<'_> {
        let imp = self
            .pool
            .lock()
            .pop()
            .unwrap_or_else(|| RunCommandImpl::new(&self.runner));
        RunCommand::new(self, imp)
    }

    /// Launched commands not yet completed by a barrier.
    pub fn nb_pending_commands(&self) -> usize {
        self.pending.lock().len()
    }

    /// Wait for the stream, then complete every pending command.
    pub fn barrier(&self) {
        self.stream.barrier();
        let done = std::mem::take(&mut *self.pending.lock());
        for mut imp in done {
            imp.notify_end_execute_kernel(&self.runner);
            self.recycle(imp);
        }
    }

    pub(crate) fn stream(&self) -> &dyn RunQueueStream {
        self.stream.as_ref()
    }

    pub(crate) fn finish_launch(&self, mut imp: RunCommandImpl) {
        if self.config.is_async {
            self.pending.lock().push(imp);
            return;
        }
        self.stream.barrier();
        imp.notify_end_execute_kernel(&self.runner);
        self.recycle(imp);
    }

    pub(crate) fn recycle(&self, imp: RunCommandImpl) {
        self.pool.lock().push(imp);
    }
}

impl Drop for RunQueue {
    fn drop(&mut self) {
        if self.nb_pending_commands() > 0 {
            self.barrier();
        }
    }
}

impl fmt::Debug for RunQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunQueue")
            .field("policy", &self.execution_policy())
            .field("config", &self.config)
            .field("pending", &self.nb_pending_commands())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::runner::RunnerConfig;

    #[test]
    fn async_queue_completes_on_barrier() {
        let runner = Runner::new(RunnerConfig::default());
        let queue = runner.queue_with(RunQueueConfig { is_async: true });
        queue.command().add_kernel_name("a").for_each(0..10, |_| {});
        queue.command().add_kernel_name("b").for_each(0..10, |_| {});
        assert_eq!(queue.nb_pending_commands(), 2);
        queue.barrier();
        assert_eq!(queue.nb_pending_commands(), 0);
        assert_eq!(queue.pool.lock().len(), 2);
    }

    #[test]
    fn sync_queue_recycles_immediately() {
        let runner = Runner::new(RunnerConfig::default());
        let queue = runner.queue();
        for _ in 0..3 {
            queue.command().for_each(0..4, |_| {});
        }
        assert_eq!(queue.nb_pending_commands(), 0);
        assert_eq!(queue.pool.lock().len(), 1);
        assert!(runner.cumulative_command_time() >= 0.0);
    }
}
