// src/engine/queue.rs
//
// TaskQueue: runs ResizeTasks on a dedicated rayon pool with memory backpressure.
//
// - submit() hands back a TaskHandle; the finished task is returned through it
// - run_batch() processes a Vec in parallel and returns it in input order
// - every task holds a MemoryPermit (see memory.rs) while it runs
// - a panicking task is recorded as an Internal failure, the worker survives

use crate::engine::common::run_with_panic_policy;
use crate::engine::memory::WeightedSemaphore;
use crate::engine::pool::{build_pool, QueueConfig};
use crate::engine::tasks::{CancellationToken, ResizeTask};
use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct TaskQueue {
    pool: ThreadPool,
    memory: Arc<WeightedSemaphore>,
    config: QueueConfig,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("config", &self.config)
            .field("memory_available", &self.memory.available())
            .finish()
    }
}

#[derive(Default)]
struct Slot {
    task: Mutex<Option<ResizeTask>>,
    done: Condvar,
}

impl Slot {
    fn finish(&self, task: ResizeTask) {
        *self.task.lock() = Some(task);
        self.done.notify_all();
    }
}

/// Handle to a submitted task.
pub struct TaskHandle {
    slot: Arc<Slot>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.is_finished())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl TaskHandle {
    pub fn is_finished(&self) -> bool {
        self.slot.task.lock().is_some()
    }

    /// Take the finished task, or get the handle back if it is still running.
    pub fn try_take(self) -> std::result::Result<ResizeTask, TaskHandle> {
        let taken = self.slot.task.lock().take();
        taken.ok_or(self)
    }

    /// Block until the task has finished.
    pub fn wait(self) -> ResizeTask {
        let mut guard = self.slot.task.lock();
        loop {
            if let Some(task) = guard.take() {
                return task;
            }
            self.slot.done.wait(&mut guard);
        }
    }

    /// Like `wait`, but gives the handle back after `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<ResizeTask, TaskHandle> {
        let taken = {
            let mut guard = self.slot.task.lock();
            if guard.is_none() {
                self.slot.done.wait_for(&mut guard, timeout);
            }
            guard.take()
        };
        taken.ok_or(self)
    }

    /// Request cancellation. Takes effect at the task's next step boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Run `task`, converting a panic into a recorded Internal failure.
fn run_guarded(task: &mut ResizeTask) {
    let outcome = run_with_panic_policy("task", || task.run());
    if let Err(err) = outcome {
        if !task.is_finished() {
            warn!(target: "resize_op::queue", error = %err, "task panicked");
            task.record_failure(err);
        }
    }
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> Result<Self> {
        let pool = build_pool(&config)?;
        debug!(
            target: "resize_op::queue",
            threads = config.threads,
            memory_budget = config.memory_budget,
            "task queue created"
        );
        Ok(Self {
            pool,
            memory: Arc::new(WeightedSemaphore::new(config.memory_budget)),
            config,
        })
    }

    /// Queue configured from `RESIZE_OP_THREADS` / `RESIZE_OP_MEMORY_BUDGET`.
    pub fn from_env() -> Result<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<WeightedSemaphore> {
        &self.memory
    }

    pub fn submit(&self, task: ResizeTask) -> TaskHandle {
        let cancel = task.cancellation_token();
        let weight = task.estimated_memory();
        let slot = Arc::new(Slot::default());
        let worker_slot = Arc::clone(&slot);
        let memory = Arc::clone(&self.memory);

        debug!(target: "resize_op::queue", weight, "task submitted");
        self.pool.spawn(move || {
            let mut task = task;
            let permit = memory.acquire(weight);
            run_guarded(&mut task);
            drop(permit);
            worker_slot.finish(task);
        });

        TaskHandle { slot, cancel }
    }

    /// Run every task in parallel on the queue's pool. Output order matches input order.
    pub fn run_batch(&self, mut tasks: Vec<ResizeTask>) -> Vec<ResizeTask> {
        let memory = &self.memory;
        debug!(target: "resize_op::queue", count = tasks.len(), "batch started");
        self.pool.install(|| {
            tasks.par_iter_mut().for_each(|task| {
                let _permit = memory.acquire(task.estimated_memory());
                run_guarded(task);
            });
        });
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::codec::ImageCodec;
    use crate::engine::common::EngineResult;
    use crate::error::ErrorKind;
    use image::{DynamicImage, GenericImageView, RgbImage};

    fn queue(threads: usize) -> TaskQueue {
        TaskQueue::new(QueueConfig::new(threads, 1 << 30)).unwrap()
    }

    fn task(width: u32, height: u32) -> ResizeTask {
        ResizeTask::from_image(DynamicImage::ImageRgb8(RgbImage::new(width, height)))
    }

    struct PanickingCodec;

    impl ImageCodec for PanickingCodec {
        fn decode(&self, _bytes: &[u8]) -> EngineResult<DynamicImage> {
            panic!("decoder exploded");
        }

        fn encode(&self, _: &DynamicImage, _: u8, _: Option<&[u8]>) -> EngineResult<Vec<u8>> {
            Ok(Vec::new())
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    #[test]
    fn submit_and_wait() {
        let queue = queue(2);
        let mut t = task(100, 50);
        t.resize_to_fit_within(10, 10);
        let finished = queue.submit(t).wait();
        assert_eq!(finished.result().unwrap().dimensions(), (10, 5));
        // permit returned
        assert_eq!(queue.memory().available(), queue.memory().capacity());
    }

    #[test]
    fn batch_runs_every_task() {
        let queue = queue(4);
        let tasks: Vec<_> = (1..=12u32)
            .map(|i| {
                let mut t = task(i * 10, 10);
                t.crop_to_aspect_ratio(1.0, 1.0);
                t
            })
            .collect();
        let done = queue.run_batch(tasks);
        assert_eq!(done.len(), 12);
        for t in &done {
            assert!(t.is_finished());
            // every source is 10px tall
            assert_eq!(t.result().unwrap().dimensions(), (10, 10));
        }
    }

    #[test]
    fn batch_order_matches_distinct_outputs() {
        let queue = queue(3);
        let sizes = [(40, 20), (7, 9), (300, 1), (16, 16)];
        let tasks = sizes.iter().map(|&(w, h)| task(w, h)).collect();
        let done = queue.run_batch(tasks);
        let dims: Vec<_> = done
            .iter()
            .map(|t| t.result().unwrap().dimensions())
            .collect();
        assert_eq!(dims, sizes.to_vec());
    }

    #[test]
    fn cancel_before_start() {
        let queue = TaskQueue::new(QueueConfig::new(1, 100)).unwrap();
        // Hold the whole budget so the submitted task can't start yet
        let blocker = queue.memory().acquire(100);
        let handle = queue.submit(task(8, 8));
        handle.cancel();
        let handle = match handle.try_take() {
            Ok(_) => panic!("task ran while memory was held"),
            Err(handle) => handle,
        };
        drop(blocker);

        let finished = handle.wait();
        assert!(finished.result().is_none());
        assert_eq!(finished.error().map(|e| e.kind()), Some(ErrorKind::Cancelled));
    }

    #[test]
    fn wait_timeout_returns_handle_when_blocked() {
        let queue = TaskQueue::new(QueueConfig::new(1, 100)).unwrap();
        let blocker = queue.memory().acquire(100);
        let handle = queue.submit(task(4, 4));
        let handle = queue_wait_expect_pending(handle);
        assert!(!handle.is_finished());
        drop(blocker);
        let finished = handle.wait_timeout(Duration::from_secs(30)).unwrap();
        assert!(finished.result().is_some());
    }

    fn queue_wait_expect_pending(handle: TaskHandle) -> TaskHandle {
        match handle.wait_timeout(Duration::from_millis(20)) {
            Ok(_) => panic!("task finished while memory was held"),
            Err(handle) => handle,
        }
    }

    #[test]
    fn panicking_task_is_recorded_as_internal() {
        let queue = queue(1);
        let mut t = ResizeTask::from_bytes(vec![1, 2, 3]);
        t.with_codec(Arc::new(PanickingCodec));
        let finished = queue.submit(t).wait();
        assert!(finished.is_finished());
        assert!(finished.result().is_none());
        assert_eq!(finished.error().map(|e| e.kind()), Some(ErrorKind::Internal));

        // Worker survived
        let again = queue.submit(task(2, 2)).wait();
        assert!(again.result().is_some());
    }

    struct EncodePanicCodec;

    impl ImageCodec for EncodePanicCodec {
        fn decode(&self, _bytes: &[u8]) -> EngineResult<DynamicImage> {
            Ok(DynamicImage::ImageRgb8(RgbImage::new(40, 20)))
        }

        fn encode(&self, _: &DynamicImage, _: u8, _: Option<&[u8]>) -> EngineResult<Vec<u8>> {
            panic!("encoder exploded");
        }

        fn name(&self) -> &'static str {
            "encode-panic"
        }
    }

    #[test]
    fn encode_panic_keeps_published_result() {
        let queue = queue(1);
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.jpg");
        let mut t = ResizeTask::from_bytes(vec![1, 2, 3]);
        t.with_codec(Arc::new(EncodePanicCodec))
            .resize_to_fit_within(10, 10)
            .write_result_to_path(&out);
        let finished = queue.submit(t).wait();

        assert_eq!(finished.result().unwrap().dimensions(), (10, 5));
        assert!(finished.error().is_none());
        assert_eq!(
            finished.write_error().map(|e| e.kind()),
            Some(ErrorKind::Internal)
        );
        assert!(!out.exists());
    }
}
