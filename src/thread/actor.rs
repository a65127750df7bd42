//! Objects owned by one runner thread
//!
//! An `Actor<T>` keeps `T` behind a lock that only its runner thread takes.
//! Other threads reach it by posting closures. Calls are fire-and-forget
//! unless `act_sync` is used.

use std::sync::{Arc, Weak};

use crossbeam::channel::bounded;
use parking_lot::Mutex;

use super::runner::TaskRunner;

pub struct Actor<T> {
    runner: TaskRunner,
    target: Arc<Mutex<T>>,
}

impl<T> Clone for Actor<T> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            target: self.target.clone(),
        }
    }
}

impl<T: Send + 'static> Actor<T> {
    pub fn new(target: T, runner: TaskRunner) -> Self {
        Self {
            runner,
            target: Arc::new(Mutex::new(target)),
        }
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// True on the owning thread
    pub fn can_run_now(&self) -> bool {
        self.runner.runs_tasks_on_current_thread()
    }

    /// Post `f` to the owning thread
    pub fn act<F>(&self, f: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        let target = self.target.clone();
        self.runner.post_task(move || f(&mut target.lock()));
    }

    /// Run `f` inline on the owning thread, otherwise post it and wait.
    /// Must not be called from inside another call on the same actor.
    pub fn act_sync<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut T) -> R + Send + 'static,
    {
        if self.can_run_now() {
            return Some(f(&mut self.target.lock()));
        }
        let (tx, rx) = bounded(1);
        self.act(move |target| {
            let _ = tx.send(f(target));
        });
        rx.recv().ok()
    }

    /// Handle that does not keep the target alive
    pub fn downgrade(&self) -> WeakActor<T> {
        WeakActor {
            runner: self.runner.clone(),
            target: Arc::downgrade(&self.target),
        }
    }
}

/// Non-owning actor handle, for callbacks stored inside the target itself
pub struct WeakActor<T> {
    runner: TaskRunner,
    target: Weak<Mutex<T>>,
}

impl<T> Clone for WeakActor<T> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            target: self.target.clone(),
        }
    }
}

impl<T: Send + 'static> WeakActor<T> {
    /// Post `f` to the owning thread; dropped if the target is gone
    pub fn act<F>(&self, f: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        let target = self.target.clone();
        self.runner.post_task(move || {
            if let Some(target) = target.upgrade() {
                f(&mut target.lock());
            }
        });
    }
}
