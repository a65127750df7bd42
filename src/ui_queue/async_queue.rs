//! Queue for engines running off the UI thread
//!
//! The engine thread pushes into pending lanes. Status updates seal what
//! was pending into per-gate batches so a UI flush can wait for a coherent
//! frame: it blocks (bounded) for `TasmFinish`, runs that batch, blocks for
//! `LayoutFinish`, runs the second batch, then drains whatever is left.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam::queue::SegQueue;
use parking_lot::{Condvar, Mutex, MutexGuard};

use super::{
    ErrorCallback, QueueStatus, QueueStrategy, UiOperation, UiOperationQueue, drain_lanes,
    execute_batch,
};
use crate::thread::TaskRunner;
use crate::utils::error::{ErrorLevel, LynxError, code};

/// Timeouts in a row before the queue reports a failure
pub const MAX_CONSECUTIVE_TIMEOUTS: u32 = 3;

#[derive(Default)]
struct FrameGate {
    awaiting_frame: bool,
    tasm_finish: bool,
    layout_finish: bool,
    tasm_batch: Vec<UiOperation>,
    layout_batch: Vec<UiOperation>,
}

pub struct AsyncUiOperationQueue {
    weak_self: Weak<AsyncUiOperationQueue>,
    pending_high: SegQueue<UiOperation>,
    pending: SegQueue<UiOperation>,
    gate: Mutex<FrameGate>,
    tasm_cv: Condvar,
    layout_cv: Condvar,
    ui_runner: Option<TaskRunner>,
    wait_timeout: Duration,
    consecutive_timeouts: AtomicU32,
    in_flush: AtomicBool,
    destroyed: AtomicBool,
    error_callback: Mutex<Option<ErrorCallback>>,
}

impl AsyncUiOperationQueue {
    /// `ui_runner` identifies the UI thread; without one every caller is
    /// treated as the UI thread.
    pub fn new(ui_runner: Option<TaskRunner>, wait_timeout: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            pending_high: SegQueue::new(),
            pending: SegQueue::new(),
            gate: Mutex::new(FrameGate {
                awaiting_frame: true,
                ..FrameGate::default()
            }),
            tasm_cv: Condvar::new(),
            layout_cv: Condvar::new(),
            ui_runner,
            wait_timeout,
            consecutive_timeouts: AtomicU32::new(0),
            in_flush: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            error_callback: Mutex::new(None),
        })
    }

    fn on_ui_thread(&self) -> bool {
        self.ui_runner
            .as_ref()
            .is_none_or(|runner| runner.runs_tasks_on_current_thread())
    }

    fn callback(&self) -> Option<ErrorCallback> {
        self.error_callback.lock().clone()
    }

    fn seal_pending(&self, into: &mut Vec<UiOperation>) {
        into.extend(drain_lanes(&self.pending_high, &self.pending));
    }

    fn run(&self, batch: Vec<UiOperation>) -> usize {
        if batch.is_empty() {
            return 0;
        }
        if self.destroyed.load(Ordering::Acquire) {
            log::debug!("queue destroyed, dropping {} operations", batch.len());
            return 0;
        }
        execute_batch(batch, self.callback().as_ref())
    }

    fn record_wait(&self, timed_out: bool, phase: &str) {
        if !timed_out {
            self.consecutive_timeouts.store(0, Ordering::Relaxed);
            return;
        }
        let count = self.consecutive_timeouts.fetch_add(1, Ordering::Relaxed) + 1;
        log::warn!(
            "ui flush waited {}ms for {} without a signal ({} in a row)",
            self.wait_timeout.as_millis(),
            phase,
            count
        );
        if count >= MAX_CONSECUTIVE_TIMEOUTS {
            self.consecutive_timeouts.store(0, Ordering::Relaxed);
            let error = LynxError::new(
                code::UI_OPERATION_FAILED,
                format!("ui flush timed out {} times in a row", count),
            )
            .with_level(ErrorLevel::Warn)
            .with_info("phase", phase);
            match self.callback() {
                Some(callback) => callback(error),
                None => log::error!("{}", error),
            }
        }
    }

    fn flush_on_ui_thread(&self) -> usize {
        let mut executed = 0;
        let mut gate = self.gate.lock();
        if gate.awaiting_frame {
            if !gate.tasm_finish {
                let result = self
                    .tasm_cv
                    .wait_while_for(&mut gate, |g| !g.tasm_finish, self.wait_timeout);
                self.record_wait(result.timed_out(), "tasm finish");
            }
            let batch = mem::take(&mut gate.tasm_batch);
            MutexGuard::unlocked(&mut gate, || executed += self.run(batch));

            if !gate.layout_finish {
                let result = self
                    .layout_cv
                    .wait_while_for(&mut gate, |g| !g.layout_finish, self.wait_timeout);
                self.record_wait(result.timed_out(), "layout finish");
            }
            let batch = mem::take(&mut gate.layout_batch);
            MutexGuard::unlocked(&mut gate, || executed += self.run(batch));
            gate.awaiting_frame = false;
        } else {
            let mut batch = mem::take(&mut gate.tasm_batch);
            batch.append(&mut gate.layout_batch);
            MutexGuard::unlocked(&mut gate, || executed += self.run(batch));
        }
        drop(gate);
        executed + self.run(drain_lanes(&self.pending_high, &self.pending))
    }
}

impl UiOperationQueue for AsyncUiOperationQueue {
    fn enqueue_ui_operation(&self, operation: UiOperation) {
        self.pending.push(operation);
    }

    fn enqueue_high_priority_operation(&self, operation: UiOperation) {
        self.pending_high.push(operation);
    }

    fn flush(&self) -> usize {
        if !self.on_ui_thread() {
            if let (Some(runner), Some(queue)) = (&self.ui_runner, self.weak_self.upgrade()) {
                runner.post_task(move || {
                    queue.flush();
                });
            }
            return 0;
        }
        if self.in_flush.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let executed = self.flush_on_ui_thread();
        self.in_flush.store(false, Ordering::Release);
        executed
    }

    fn update_status(&self, status: QueueStatus) {
        let mut gate = self.gate.lock();
        match status {
            QueueStatus::Init => {
                // batches the UI has not flushed yet run before the new frame
                let mut leftover = mem::take(&mut gate.layout_batch);
                gate.tasm_batch.append(&mut leftover);
                gate.awaiting_frame = true;
                gate.tasm_finish = false;
                gate.layout_finish = false;
            }
            QueueStatus::TasmFinish => {
                let mut batch = mem::take(&mut gate.tasm_batch);
                self.seal_pending(&mut batch);
                gate.tasm_batch = batch;
                gate.tasm_finish = true;
                self.tasm_cv.notify_all();
            }
            QueueStatus::LayoutFinish | QueueStatus::AllFinish => {
                let mut batch = mem::take(&mut gate.layout_batch);
                self.seal_pending(&mut batch);
                gate.layout_batch = batch;
                gate.tasm_finish = true;
                gate.layout_finish = true;
                self.tasm_cv.notify_all();
                self.layout_cv.notify_all();
            }
        }
    }

    fn force_flush(&self) -> usize {
        let batch = {
            let mut gate = self.gate.lock();
            gate.awaiting_frame = false;
            gate.tasm_finish = true;
            gate.layout_finish = true;
            self.tasm_cv.notify_all();
            self.layout_cv.notify_all();
            let mut batch = mem::take(&mut gate.tasm_batch);
            batch.append(&mut gate.layout_batch);
            batch
        };
        let executed = self.run(batch);
        executed + self.run(drain_lanes(&self.pending_high, &self.pending))
    }

    fn is_in_flush(&self) -> bool {
        self.in_flush.load(Ordering::Acquire)
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.update_status(QueueStatus::AllFinish);
    }

    fn set_error_callback(&self, callback: ErrorCallback) {
        *self.error_callback.lock() = Some(callback);
    }

    fn strategy(&self) -> QueueStrategy {
        QueueStrategy::Async
    }

    fn pending_count(&self) -> usize {
        let gate = self.gate.lock();
        gate.tasm_batch.len()
            + gate.layout_batch.len()
            + self.pending_high.len()
            + self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn recorder(log: &Arc<Mutex<Vec<u32>>>, value: u32) -> UiOperation {
        let log = log.clone();
        Box::new(move || log.lock().push(value))
    }

    #[test]
    fn test_flush_without_frame_gate() {
        let queue = AsyncUiOperationQueue::new(None, Duration::from_millis(10));
        queue.update_status(QueueStatus::AllFinish);
        assert_eq!(queue.flush(), 0);

        let log = Arc::new(Mutex::new(Vec::new()));
        queue.enqueue_ui_operation(recorder(&log, 1));
        queue.enqueue_high_priority_operation(recorder(&log, 2));
        assert_eq!(queue.flush(), 2);
        assert_eq!(*log.lock(), vec![2, 1]);
    }

    #[test]
    fn test_flush_times_out_and_still_drains() {
        let queue = AsyncUiOperationQueue::new(None, Duration::from_millis(5));
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.enqueue_ui_operation(recorder(&log, 7));
        assert_eq!(queue.flush(), 1);
        assert_eq!(*log.lock(), vec![7]);
    }

    #[test]
    fn test_repeated_timeouts_are_reported() {
        let queue = AsyncUiOperationQueue::new(None, Duration::from_millis(1));
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        queue.set_error_callback(Arc::new(move |err| sink.lock().push(err)));
        // each frame waits twice, once per gate
        queue.flush();
        queue.update_status(QueueStatus::Init);
        queue.flush();
        let reported = reported.lock();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].code, code::UI_OPERATION_FAILED);
        assert_eq!(reported[0].level, ErrorLevel::Warn);
    }

    #[test]
    fn test_gated_flush_runs_batches_in_frame_order() {
        let queue = AsyncUiOperationQueue::new(None, Duration::from_secs(5));
        let log = Arc::new(Mutex::new(Vec::new()));

        let engine_queue = queue.clone();
        let engine_log = log.clone();
        let engine = thread::spawn(move || {
            while !engine_queue.is_in_flush() {
                thread::yield_now();
            }
            for i in 0..3 {
                engine_queue.enqueue_ui_operation(recorder(&engine_log, i));
            }
            engine_queue.update_status(QueueStatus::TasmFinish);
            engine_queue.enqueue_ui_operation(recorder(&engine_log, 100));
            engine_queue.update_status(QueueStatus::LayoutFinish);
        });

        assert_eq!(queue.flush(), 4);
        engine.join().unwrap();
        assert_eq!(*log.lock(), vec![0, 1, 2, 100]);
    }

    #[test]
    fn test_unflushed_frame_runs_before_next_frame() {
        let queue = AsyncUiOperationQueue::new(None, Duration::from_millis(5));
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.enqueue_ui_operation(recorder(&log, 1));
        queue.update_status(QueueStatus::TasmFinish);
        queue.enqueue_ui_operation(recorder(&log, 2));
        queue.update_status(QueueStatus::LayoutFinish);

        queue.update_status(QueueStatus::Init);
        queue.enqueue_ui_operation(recorder(&log, 3));
        queue.update_status(QueueStatus::TasmFinish);
        assert_eq!(queue.pending_count(), 3);

        // the layout gate of the second frame never opens; the wait times out
        assert_eq!(queue.flush(), 3);
        assert_eq!(*log.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_engine_thread_flush_posts_to_ui_runner() {
        let ui = TaskRunner::current_thread("ui");
        let queue = AsyncUiOperationQueue::new(Some(ui.clone()), Duration::from_millis(5));
        queue.update_status(QueueStatus::AllFinish);
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.enqueue_ui_operation(recorder(&log, 1));

        let engine_queue = queue.clone();
        thread::spawn(move || assert_eq!(engine_queue.flush(), 0))
            .join()
            .unwrap();
        assert!(log.lock().is_empty());
        ui.run_until_idle();
        assert_eq!(*log.lock(), vec![1]);
    }

    #[test]
    fn test_force_flush_ignores_gates() {
        let queue = AsyncUiOperationQueue::new(None, Duration::from_secs(5));
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.enqueue_ui_operation(recorder(&log, 1));
        queue.update_status(QueueStatus::TasmFinish);
        queue.enqueue_ui_operation(recorder(&log, 2));
        assert_eq!(queue.pending_count(), 2);
        assert_eq!(queue.force_flush(), 2);
        assert_eq!(*log.lock(), vec![1, 2]);
    }
}
