//! Task runners for the engine, script and UI threads

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{Receiver, Sender, unbounded};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

/// A unit of work posted to a runner
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct RunnerInner {
    name: String,
    sender: Sender<Task>,
    receiver: Receiver<Task>,
    owner: OnceCell<ThreadId>,
    shutdown: AtomicBool,
}

/// Handle for posting tasks to one logical thread. Cloning is cheap.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<RunnerInner>,
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("name", &self.inner.name)
            .field("pending", &self.inner.receiver.len())
            .finish()
    }
}

impl TaskRunner {
    fn with_name(name: &str) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            inner: Arc::new(RunnerInner {
                name: name.to_string(),
                sender,
                receiver,
                owner: OnceCell::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// A runner bound to the calling thread. Tasks run when the owner calls
    /// `run_until_idle`.
    pub fn current_thread(name: &str) -> Self {
        let runner = Self::with_name(name);
        let _ = runner.inner.owner.set(thread::current().id());
        runner
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue a task; dropped silently after shutdown
    pub fn post_task<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.shutdown.load(Ordering::Acquire) {
            log::debug!("runner {} is shut down, dropping task", self.inner.name);
            return;
        }
        if self.inner.sender.send(Box::new(task)).is_err() {
            log::warn!("runner {} rejected a task", self.inner.name);
        }
    }

    pub fn runs_tasks_on_current_thread(&self) -> bool {
        self.inner.owner.get() == Some(&thread::current().id())
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.receiver.len()
    }

    /// Run queued tasks on the calling thread until the queue is empty.
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut count = 0;
        while let Ok(task) = self.inner.receiver.try_recv() {
            task();
            count += 1;
        }
        count
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        // wake a blocked loop
        let _ = self.inner.sender.send(Box::new(|| {}));
    }

    fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }
}

/// A dedicated OS thread draining a `TaskRunner`
pub struct ThreadRunner {
    runner: TaskRunner,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadRunner {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let runner = TaskRunner::with_name(name);
        let loop_runner = runner.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _ = loop_runner.inner.owner.set(thread::current().id());
                log::debug!("runner thread {} started", loop_runner.name());
                while let Ok(task) = loop_runner.inner.receiver.recv() {
                    if loop_runner.is_shutdown() {
                        break;
                    }
                    task();
                }
                log::debug!("runner thread {} exited", loop_runner.name());
            })?;
        Ok(Self {
            runner,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn runner(&self) -> TaskRunner {
        self.runner.clone()
    }

    /// Stop the loop and wait for the thread
    pub fn join(&self) {
        self.runner.shutdown();
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("runner thread {} panicked", self.runner.name());
            }
        }
    }
}

impl Drop for ThreadRunner {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_current_thread_runner_order() {
        let runner = TaskRunner::current_thread("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            runner.post_task(move || log.lock().push(i));
        }
        assert!(runner.runs_tasks_on_current_thread());
        assert_eq!(runner.run_until_idle(), 3);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_thread_runner_runs_off_thread() {
        let thread = ThreadRunner::spawn("worker").unwrap();
        let runner = thread.runner();
        assert!(!runner.runs_tasks_on_current_thread());

        let (tx, rx) = crossbeam::channel::bounded(1);
        let check = runner.clone();
        runner.post_task(move || {
            let _ = tx.send(check.runs_tasks_on_current_thread());
        });
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        thread.join();
    }

    #[test]
    fn test_shutdown_drops_tasks() {
        let runner = TaskRunner::current_thread("test");
        runner.shutdown();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        runner.post_task(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        runner.run_until_idle();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
