// src/engine/pool.rs
//
// Worker pool configuration.
//
// Thread count:
// - RESIZE_OP_THREADS when set and positive
// - otherwise std::thread::available_parallelism(), which respects cgroup/CPU quota
// - MIN_THREADS when detection fails
//
// Memory budget is the weighted-semaphore capacity (see memory.rs).

use crate::error::{ResizeOpError, Result};
use rayon::ThreadPool;

pub const THREADS_ENV: &str = "RESIZE_OP_THREADS";
pub const MEMORY_BUDGET_ENV: &str = "RESIZE_OP_MEMORY_BUDGET";

/// Minimum number of worker threads
const MIN_THREADS: usize = 1;

/// Default memory budget for in-flight tasks
pub const DEFAULT_MEMORY_BUDGET: u64 = 1024 * 1024 * 1024; // 1GiB

/// Maximum worker count accepted from the environment
pub const MAX_THREADS: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    pub threads: usize,
    pub memory_budget: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            threads: detected_parallelism(),
            memory_budget: DEFAULT_MEMORY_BUDGET,
        }
    }
}

impl QueueConfig {
    pub fn new(threads: usize, memory_budget: u64) -> Self {
        Self {
            threads: threads.clamp(MIN_THREADS, MAX_THREADS),
            memory_budget: memory_budget.max(1),
        }
    }

    /// Defaults overridden by `RESIZE_OP_THREADS` and `RESIZE_OP_MEMORY_BUDGET`.
    /// Unparseable or zero values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let threads = parse_positive::<usize>(lookup(THREADS_ENV).as_deref())
            .map(|n| n.min(MAX_THREADS))
            .unwrap_or(defaults.threads);
        let memory_budget = parse_positive::<u64>(lookup(MEMORY_BUDGET_ENV).as_deref())
            .unwrap_or(defaults.memory_budget);
        Self {
            threads,
            memory_budget,
        }
    }
}

fn parse_positive<T: std::str::FromStr + PartialOrd + Default>(raw: Option<&str>) -> Option<T> {
    let value = raw?.trim().parse::<T>().ok()?;
    if value > T::default() {
        Some(value)
    } else {
        None
    }
}

fn detected_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_THREADS)
        .max(MIN_THREADS)
}

pub fn build_pool(config: &QueueConfig) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads.max(MIN_THREADS))
        .thread_name(|i| format!("resize-op-{i}"))
        .build()
        .map_err(|e| {
            ResizeOpError::invalid_argument(
                "threads",
                config.threads.to_string(),
                format!("failed to build worker pool: {e}"),
            )
        })
}
