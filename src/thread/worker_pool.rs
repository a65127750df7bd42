//! Shared concurrent pool for decode work

use std::fmt;
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{Sender, unbounded};
use once_cell::sync::Lazy;

use super::runner::Task;

static SHARED_POOL: Lazy<WorkerPool> = Lazy::new(|| WorkerPool::new(num_cpus::get().max(2)));

/// Fixed-size pool of worker threads fed from one queue
#[derive(Clone)]
pub struct WorkerPool {
    sender: Sender<Task>,
    threads: Arc<usize>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &*self.threads)
            .field("pending", &self.sender.len())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `threads` workers. They exit when every handle is dropped.
    pub fn new(threads: usize) -> Self {
        let (sender, receiver) = unbounded::<Task>();
        let threads = threads.max(1);
        for index in 0..threads {
            let receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("tasm-worker-{}", index))
                .spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        task();
                    }
                });
            if let Err(err) = spawned {
                log::error!("failed to spawn worker {}: {}", index, err);
            }
        }
        Self {
            sender,
            threads: Arc::new(threads),
        }
    }

    /// Process-wide pool
    pub fn shared() -> WorkerPool {
        SHARED_POOL.clone()
    }

    pub fn thread_count(&self) -> usize {
        *self.threads
    }

    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Box::new(task)).is_err() {
            log::warn!("worker pool is closed, dropping task");
        }
    }
}
