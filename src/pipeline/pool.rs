//! Bounded worker pool with a single result aggregator.
//!
//! Tasks run on a dedicated rayon pool. Every task result is sent over a
//! channel to the calling thread, which is the only place results are
//! folded into shared state. A panicking task is contained and reported
//! as a failed outcome for its item alone.

use crate::error::{Result, SiftError};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use tracing::debug;

/// A task that panicked instead of returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPanic {
    pub message: String,
}

impl TaskPanic {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked".to_string()
        };
        Self { message }
    }
}

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    pool: ThreadPool,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(SiftError::InvalidConfig(
                "workers must be a positive integer".into(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("tracesift-worker-{i}"))
            .build()
            .map_err(|e| SiftError::Pool(e.to_string()))?;
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `task` on every item and hands each outcome to `sink` on the
    /// calling thread, in completion order. Returns once every item has
    /// been handed over.
    pub fn run<T, R, F, S>(&self, items: &[T], task: F, mut sink: S)
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
        S: FnMut(&T, std::result::Result<R, TaskPanic>),
    {
        let (tx, rx) = mpsc::channel();
        let task = &task;
        let pool = &self.pool;

        std::thread::scope(|scope| {
            scope.spawn(move || {
                pool.install(|| {
                    items
                        .par_iter()
                        .enumerate()
                        .for_each_with(tx, |tx, (index, item)| {
                            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(item)))
                                .map_err(TaskPanic::from_payload);
                            // the receiver outlives every sender
                            let _ = tx.send((index, outcome));
                        });
                });
            });

            let mut received = 0usize;
            for (index, outcome) in rx {
                sink(&items[index], outcome);
                received += 1;
            }
            debug!(items = items.len(), received, workers = self.workers, "Pool drained");
        });
    }
}
