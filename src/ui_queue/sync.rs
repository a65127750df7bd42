//! Queue for engines that share the UI thread

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;

use super::{
    ErrorCallback, QueueStatus, QueueStrategy, UiOperation, UiOperationQueue, drain_lanes,
    execute_batch,
};

#[derive(Default)]
pub struct SyncUiOperationQueue {
    high_priority: SegQueue<UiOperation>,
    operations: SegQueue<UiOperation>,
    in_flush: AtomicBool,
    destroyed: AtomicBool,
    error_callback: Mutex<Option<ErrorCallback>>,
}

impl SyncUiOperationQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UiOperationQueue for SyncUiOperationQueue {
    fn enqueue_ui_operation(&self, operation: UiOperation) {
        self.operations.push(operation);
    }

    fn enqueue_high_priority_operation(&self, operation: UiOperation) {
        self.high_priority.push(operation);
    }

    fn flush(&self) -> usize {
        if self.in_flush.swap(true, Ordering::AcqRel) {
            // an operation flushed from inside a flush; the outer pass picks it up
            return 0;
        }
        let mut executed = 0;
        loop {
            let batch = drain_lanes(&self.high_priority, &self.operations);
            if batch.is_empty() {
                break;
            }
            if self.destroyed.load(Ordering::Acquire) {
                log::debug!("queue destroyed, dropping {} operations", batch.len());
                break;
            }
            let callback = self.error_callback.lock().clone();
            executed += execute_batch(batch, callback.as_ref());
        }
        self.in_flush.store(false, Ordering::Release);
        executed
    }

    fn update_status(&self, _status: QueueStatus) {}

    fn force_flush(&self) -> usize {
        self.flush()
    }

    fn is_in_flush(&self) -> bool {
        self.in_flush.load(Ordering::Acquire)
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    fn set_error_callback(&self, callback: ErrorCallback) {
        *self.error_callback.lock() = Some(callback);
    }

    fn strategy(&self) -> QueueStrategy {
        QueueStrategy::Sync
    }

    fn pending_count(&self) -> usize {
        self.high_priority.len() + self.operations.len()
    }
}
