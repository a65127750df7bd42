//! Queue whose strategy can change at runtime

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::{
    AsyncUiOperationQueue, ErrorCallback, QueueStatus, QueueStrategy, SyncUiOperationQueue,
    UiOperation, UiOperationQueue,
};
use crate::thread::TaskRunner;

/// Forwards to a sync or async queue. Producers never see a swap.
pub struct DynamicUiOperationQueue {
    current: RwLock<Arc<dyn UiOperationQueue>>,
    ui_runner: Option<TaskRunner>,
    wait_timeout: Duration,
    error_callback: Mutex<Option<ErrorCallback>>,
}

impl DynamicUiOperationQueue {
    pub fn new(strategy: QueueStrategy, ui_runner: Option<TaskRunner>, wait_timeout: Duration) -> Self {
        let current = Self::create(strategy, ui_runner.clone(), wait_timeout);
        Self {
            current: RwLock::new(current),
            ui_runner,
            wait_timeout,
            error_callback: Mutex::new(None),
        }
    }

    fn create(
        strategy: QueueStrategy,
        ui_runner: Option<TaskRunner>,
        wait_timeout: Duration,
    ) -> Arc<dyn UiOperationQueue> {
        match strategy {
            QueueStrategy::Sync => Arc::new(SyncUiOperationQueue::new()),
            QueueStrategy::Async => AsyncUiOperationQueue::new(ui_runner, wait_timeout),
        }
    }

    fn current(&self) -> Arc<dyn UiOperationQueue> {
        self.current.read().clone()
    }

    /// Switch strategy. Call on the UI thread. Returns false when the swap
    /// was skipped because the live queue is flushing or already matches.
    pub fn transfer(&self, strategy: QueueStrategy) -> bool {
        let old = self.current();
        if old.strategy() == strategy {
            return false;
        }
        if old.is_in_flush() {
            log::debug!("ui queue is flushing, transfer to {:?} skipped", strategy);
            return false;
        }
        let next = Self::create(strategy, self.ui_runner.clone(), self.wait_timeout);
        if let Some(callback) = self.error_callback.lock().clone() {
            next.set_error_callback(callback);
        }
        let old = std::mem::replace(&mut *self.current.write(), next);
        let flushed = old.force_flush();
        log::info!("ui queue transferred to {:?}, {} operations flushed", strategy, flushed);
        true
    }
}

impl UiOperationQueue for DynamicUiOperationQueue {
    fn enqueue_ui_operation(&self, operation: UiOperation) {
        self.current.read().enqueue_ui_operation(operation);
    }

    fn enqueue_high_priority_operation(&self, operation: UiOperation) {
        self.current.read().enqueue_high_priority_operation(operation);
    }

    fn flush(&self) -> usize {
        self.current().flush()
    }

    fn update_status(&self, status: QueueStatus) {
        self.current.read().update_status(status);
    }

    fn force_flush(&self) -> usize {
        self.current().force_flush()
    }

    fn is_in_flush(&self) -> bool {
        self.current.read().is_in_flush()
    }

    fn destroy(&self) {
        self.current.read().destroy();
    }

    fn set_error_callback(&self, callback: ErrorCallback) {
        *self.error_callback.lock() = Some(callback.clone());
        self.current.read().set_error_callback(callback);
    }

    fn strategy(&self) -> QueueStrategy {
        self.current.read().strategy()
    }

    fn pending_count(&self) -> usize {
        self.current.read().pending_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_flushes_old_queue() {
        let queue = DynamicUiOperationQueue::new(QueueStrategy::Async, None, Duration::from_secs(1));
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let log = log.clone();
            queue.enqueue_ui_operation(Box::new(move || log.lock().push(i)));
        }
        assert!(queue.transfer(QueueStrategy::Sync));
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
        assert_eq!(queue.strategy(), QueueStrategy::Sync);
        assert!(!queue.transfer(QueueStrategy::Sync));
    }

    #[test]
    fn test_error_callback_survives_transfer() {
        let queue = DynamicUiOperationQueue::new(QueueStrategy::Sync, None, Duration::from_millis(1));
        let codes = Arc::new(Mutex::new(Vec::new()));
        let sink = codes.clone();
        queue.set_error_callback(Arc::new(move |err| sink.lock().push(err.code)));
        assert!(queue.transfer(QueueStrategy::Async));
        queue.update_status(QueueStatus::AllFinish);
        queue.enqueue_ui_operation(Box::new(|| {
            crate::utils::error::ErrorStorage::set_error(crate::utils::error::LynxError::new(
                1401, "boom",
            ));
        }));
        queue.flush();
        assert_eq!(*codes.lock(), vec![1401]);
    }
}
