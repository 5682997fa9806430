//! Process-wide loop profiling.
//!
//! When enabled, every completed command merges its execution time into a
//! global registry keyed by kernel name and call site.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(false);
static STATS: Lazy<DashMap<String, LoopStat>> = Lazy::new(DashMap::new);

/// Accumulated statistics of one loop.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LoopStat {
    pub nb_launch: u64,
    pub total_ns: u64,
    pub max_ns: u64,
}

impl LoopStat {
    fn merge(&mut self, exec_ns: u64) {
        self.nb_launch += 1;
        self.total_ns += exec_ns;
        self.max_ns = self.max_ns.max(exec_ns);
    }

    pub fn mean_ns(&self) -> u64 {
        if self.nb_launch == 0 {
            0
        } else {
            self.total_ns / self.nb_launch
        }
    }
}

/// Global profiling switch and statistics.
pub struct ProfilingRegistry;

impl ProfilingRegistry {
    pub fn has_profiling() -> bool {
        ENABLED.load(Ordering::Relaxed)
    }

    pub fn set_profiling(enabled: bool) {
        ENABLED.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn merge(key: &str, exec_ns: u64) {
        STATS.entry(key.to_owned()).or_default().merge(exec_ns);
    }

    pub fn stat(key: &str) -> Option<LoopStat> {
        STATS.get(key).map(|s| *s)
    }

    /// All statistics, sorted by key.
    pub fn stats() -> Vec<(String, LoopStat)> {
        let mut all: Vec<_> = STATS
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn reset() {
        STATS.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn merge_accumulates() {
        ProfilingRegistry::reset();
        ProfilingRegistry::merge("axpy", 10);
        ProfilingRegistry::merge("axpy", 30);
        let s = ProfilingRegistry::stat("axpy").unwrap();
        assert_eq!(s.nb_launch, 2);
        assert_eq!(s.mean_ns(), 20);
        assert_eq!(s.max_ns, 30);
        ProfilingRegistry::reset();
        assert!(ProfilingRegistry::stats().is_empty());
    }
}
