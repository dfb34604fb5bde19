//! Priority-bucketed thread pool (§4.3).
//!
//! Tasks are submitted with an integer priority. For each priority there is
//! a LIFO sub-queue; buckets are worked in descending-priority order, so a
//! pool thread always drains the highest nonempty bucket before looking at
//! a lower one. The renderer uses this to keep primary-ray tracing (priority
//! 3) ahead of secondary-ray tracing (priority 2): see `gxy-render`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum ThreadPoolError {
    #[error("thread pool is shut down")]
    ShutDown,
    #[error("failed to spawn worker thread: {0}")]
    SpawnFailed(#[source] std::io::Error),
}

type Task = Box<dyn FnOnce() -> i32 + Send + 'static>;

struct Slot {
    result: Mutex<Option<i32>>,
    done: Condvar,
}

/// A handle to a task's eventual `i32` result.
pub struct TaskHandle {
    slot: Arc<Slot>,
}

impl TaskHandle {
    /// Block until the task has run and return its result.
    pub fn join(&self) -> i32 {
        let mut guard = self.slot.result.lock();
        while guard.is_none() {
            self.slot.done.wait(&mut guard);
        }
        guard.expect("result set before notifying done")
    }

    /// Return the result if the task has already completed, without blocking.
    pub fn try_result(&self) -> Option<i32> {
        *self.slot.result.lock()
    }
}

struct Queues {
    // BTreeMap keeps buckets ordered by priority; we scan from the highest
    // key down on every pop, matching "buckets ordered by descending
    // priority" without needing a separate sorted index.
    buckets: BTreeMap<i32, Vec<(Task, Arc<Slot>)>>,
    shutting_down: bool,
    pending: usize,
}

/// A pool of worker threads draining a shared priority queue.
pub struct ThreadPool {
    queues: Arc<Mutex<Queues>>,
    not_empty: Arc<Condvar>,
    drained: Arc<Condvar>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn `n_threads` workers, each named `"{name_prefix}-{i}"`.
    pub fn new(name_prefix: &str, n_threads: usize) -> Result<Self, ThreadPoolError> {
        let queues = Arc::new(Mutex::new(Queues {
            buckets: BTreeMap::new(),
            shutting_down: false,
            pending: 0,
        }));
        let not_empty = Arc::new(Condvar::new());
        let drained = Arc::new(Condvar::new());

        let mut workers = Vec::with_capacity(n_threads);
        for i in 0..n_threads {
            let queues = queues.clone();
            let not_empty = not_empty.clone();
            let drained = drained.clone();
            let name = format!("{name_prefix}-{i}");
            let handle = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(name, queues, not_empty, drained))
                .map_err(ThreadPoolError::SpawnFailed)?;
            workers.push(handle);
        }

        Ok(ThreadPool {
            queues,
            not_empty,
            drained,
            workers,
        })
    }

    /// Insert `task` into the bucket for `priority`, creating the bucket if
    /// absent, and wake one worker.
    pub fn add_task<F>(&self, priority: i32, task: F) -> Result<TaskHandle, ThreadPoolError>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let slot = Arc::new(Slot {
            result: Mutex::new(None),
            done: Condvar::new(),
        });
        {
            let mut q = self.queues.lock();
            if q.shutting_down {
                return Err(ThreadPoolError::ShutDown);
            }
            q.buckets
                .entry(priority)
                .or_default()
                .push((Box::new(task), slot.clone()));
            q.pending += 1;
        }
        self.not_empty.notify_one();
        Ok(TaskHandle { slot })
    }

    /// Block until every submitted task has been picked up and run.
    pub fn wait(&self) {
        let mut q = self.queues.lock();
        while q.pending > 0 {
            self.drained.wait(&mut q);
        }
    }

    /// Number of threads in the pool.
    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut q = self.queues.lock();
            q.shutting_down = true;
        }
        self.not_empty.notify_all();
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

fn worker_loop(
    name: String,
    queues: Arc<Mutex<Queues>>,
    not_empty: Arc<Condvar>,
    drained: Arc<Condvar>,
) {
    loop {
        let (task, slot) = {
            let mut q = queues.lock();
            loop {
                if let Some((&priority, bucket)) = q.buckets.iter_mut().next_back() {
                    if let Some(entry) = bucket.pop() {
                        trace!(worker = %name, priority, "picked task");
                        if bucket.is_empty() {
                            q.buckets.remove(&priority);
                        }
                        break entry;
                    }
                }
                if q.shutting_down {
                    debug!(worker = %name, "shutting down");
                    return;
                }
                not_empty.wait(&mut q);
            }
        };

        let result = task();

        {
            let mut r = slot.result.lock();
            *r = Some(result);
        }
        slot.done.notify_all();

        let mut q = queues.lock();
        q.pending -= 1;
        if q.pending == 0 {
            drained.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_task_and_returns_result() {
        let pool = ThreadPool::new("test", 2).unwrap();
        let h = pool.add_task(0, || 42).unwrap();
        assert_eq!(h.join(), 42);
    }

    #[test]
    fn wait_blocks_until_all_tasks_done() {
        let pool = ThreadPool::new("test", 4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let c = counter.clone();
            pool.add_task(0, move || {
                c.fetch_add(1, Ordering::SeqCst);
                0
            })
            .unwrap();
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn higher_priority_bucket_drains_first_single_worker() {
        // With a single worker, submit a blocker task first to hold the
        // thread, then fill low and high priority buckets, release the
        // blocker, and check high-priority tasks' order relative to low.
        let pool = ThreadPool::new("test", 1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        pool.add_task(0, move || {
            rx.recv().ok();
            0
        })
        .unwrap();

        for i in 0..3 {
            let order = order.clone();
            pool.add_task(2, move || {
                order.lock().push(("low", i));
                0
            })
            .unwrap();
        }
        for i in 0..3 {
            let order = order.clone();
            pool.add_task(5, move || {
                order.lock().push(("high", i));
                0
            })
            .unwrap();
        }

        tx.send(()).unwrap();
        pool.wait();

        let order = order.lock();
        let first_low = order.iter().position(|(k, _)| *k == "low").unwrap();
        let first_high = order.iter().position(|(k, _)| *k == "high").unwrap();
        assert!(first_high < first_low);
    }

    #[test]
    fn drop_joins_workers_cleanly() {
        let pool = ThreadPool::new("test", 3).unwrap();
        pool.add_task(0, || 1).unwrap();
        drop(pool);
    }
}
