//! `Runner`: execution policy plus the optional device backend.

use crate::accelerator::policy::{DeviceReducePolicy, ExecutionPolicy, MemoryAdvice};
use crate::accelerator::profiling::ProfilingRegistry;
use crate::accelerator::run_queue::{RunQueue, RunQueueConfig};
use crate::accelerator::runtime::{DeviceRuntime, MemoryRegion, RunQueueEvent, TimerEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default block size of device launches.
pub const DEFAULT_NB_THREAD_PER_BLOCK: usize = 256;

/// Runner settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub policy: ExecutionPolicy,
    /// Block size used when a command does not set one.
    pub default_nb_thread_per_block: usize,
    /// Turn the global profiling registry on when the runner is created.
    pub profiling: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            policy: ExecutionPolicy::Sequential,
            default_nb_thread_per_block: DEFAULT_NB_THREAD_PER_BLOCK,
            profiling: false,
        }
    }
}

impl RunnerConfig {
    pub fn with_policy(policy: ExecutionPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }
}

struct RunnerInner {
    config: RunnerConfig,
    device: Option<Arc<dyn DeviceRuntime>>,
    /// Seconds spent in completed commands.
    command_time: Mutex<f64>,
}

/// Shared handle to an execution context; clones see the same state.
#[derive(Clone)]
pub struct Runner {
    inner: Arc<RunnerInner>,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self::build(config, None)
    }

    /// Runner for a device policy, launching through `device`.
    ///
    /// # Panics
    /// If `device` serves another policy than `config.policy`.
    pub fn with_device_runtime(config: RunnerConfig, device: Arc<dyn DeviceRuntime>) -> Self {
        if device.policy() != config.policy {
            panic!(
                "[fatal] device runtime serves {} but the runner was configured for {}",
                device.policy(),
                config.policy
            );
        }
        Self::build(config, Some(device))
    }

    fn build(config: RunnerConfig, device: Option<Arc<dyn DeviceRuntime>>) -> Self {
        if config.profiling {
            ProfilingRegistry::set_profiling(true);
        }
        log::debug!("runner created with policy {}", config.policy);
        Self {
            inner: Arc::new(RunnerInner {
                config,
                device,
                command_time: Mutex::new(0.0),
            }),
        }
    }

    pub fn execution_policy(&self) -> ExecutionPolicy {
        self.inner.config.policy
    }

    pub fn is_accelerator(&self) -> bool {
        self.inner.config.policy.is_accelerator()
    }

    pub fn default_nb_thread_per_block(&self) -> usize {
        self.inner.config.default_nb_thread_per_block
    }

    pub fn device_runtime(&self) -> Option<&Arc<dyn DeviceRuntime>> {
        self.inner.device.as_ref()
    }

    /// Total seconds spent in completed commands.
    pub fn cumulative_command_time(&self) -> f64 {
        *self.inner.command_time.lock()
    }

    pub(crate) fn add_command_time(&self, seconds: f64) {
        *self.inner.command_time.lock() += seconds;
    }

    /// Forward a residency hint to the device; ignored on host policies.
    pub fn set_memory_advice(&self, region: MemoryRegion, advice: MemoryAdvice) {
        if let Some(device) = &self.inner.device {
            device.set_memory_advice(region, advice);
        }
    }

    pub fn device_reduce_policy(&self) -> DeviceReducePolicy {
        self.inner
            .device
            .as_ref()
            .map_or(DeviceReducePolicy::default(), |d| d.reduce_policy())
    }

    /// Event on the device clock when a device is attached, else wall clock.
    pub(crate) fn create_event_with_timer(&self) -> Box<dyn RunQueueEvent> {
        match &self.inner.device {
            Some(device) => device.create_event(),
            None => Box::new(TimerEvent::default()),
        }
    }

    /// Synchronous queue.
    pub fn queue(&self) -> RunQueue {
        self.queue_with(RunQueueConfig::default())
    }

    pub fn queue_with(&self, config: RunQueueConfig) -> RunQueue {
        RunQueue::new(self.clone(), config)
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.inner.config)
            .field("has_device", &self.inner.device.is_some())
            .field("command_time", &self.cumulative_command_time())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_time_accumulates_across_clones() {
        let runner = Runner::new(RunnerConfig::with_policy(ExecutionPolicy::Thread));
        let other = runner.clone();
        runner.add_command_time(0.5);
        other.add_command_time(0.25);
        assert_eq!(runner.cumulative_command_time(), 0.75);
        assert!(!runner.is_accelerator());
        assert_eq!(runner.default_nb_thread_per_block(), 256);
        assert_eq!(runner.device_reduce_policy(), DeviceReducePolicy::Grid);
    }
}
