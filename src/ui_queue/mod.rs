//! UI operation queues
//!
//! The engine produces UI mutations as closures. A queue carries them to the
//! thread that owns the native widget tree. Two lanes are kept: high
//! priority operations always run before normal ones within one flush.

pub mod async_queue;
pub mod dynamic;
pub mod sync;

pub use async_queue::AsyncUiOperationQueue;
pub use dynamic::DynamicUiOperationQueue;
pub use sync::SyncUiOperationQueue;

use std::sync::Arc;

use crossbeam::queue::SegQueue;

use crate::utils::error::{ErrorStorage, LynxError};

/// A deferred UI mutation
pub type UiOperation = Box<dyn FnOnce() + Send>;

/// Receives errors raised by operations during a flush
pub type ErrorCallback = Arc<dyn Fn(LynxError) + Send + Sync>;

/// Progress of the frame currently being produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// A new frame started; UI flushes wait for the gates below
    Init,
    /// The engine finished producing element mutations
    TasmFinish,
    /// Layout results for the frame are queued
    LayoutFinish,
    /// Both gates open at once
    AllFinish,
}

/// Threading strategy of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStrategy {
    /// Engine and UI share one thread; flushes run inline
    Sync,
    /// Engine and UI threads differ; UI flushes are gated
    Async,
}

pub trait UiOperationQueue: Send + Sync {
    fn enqueue_ui_operation(&self, operation: UiOperation);

    fn enqueue_high_priority_operation(&self, operation: UiOperation);

    /// Drain queued operations. Returns the number executed.
    fn flush(&self) -> usize;

    fn update_status(&self, status: QueueStatus);

    /// Drain everything on the calling thread, ignoring gates
    fn force_flush(&self) -> usize;

    fn is_in_flush(&self) -> bool;

    /// Later flushes drop their operations
    fn destroy(&self);

    fn set_error_callback(&self, callback: ErrorCallback);

    fn strategy(&self) -> QueueStrategy;

    /// Operations waiting for the next flush
    fn pending_count(&self) -> usize;
}

/// Pop every operation, high priority lane first
pub(crate) fn drain_lanes(high: &SegQueue<UiOperation>, normal: &SegQueue<UiOperation>) -> Vec<UiOperation> {
    let mut batch = Vec::with_capacity(high.len() + normal.len());
    while let Some(op) = high.pop() {
        batch.push(op);
    }
    while let Some(op) = normal.pop() {
        batch.push(op);
    }
    batch
}

/// Run a batch and hand any error it raised to `callback`.
///
/// An error already pending on this thread belongs to the caller's scope; it
/// is set aside while the batch runs and restored afterwards.
pub(crate) fn execute_batch(batch: Vec<UiOperation>, callback: Option<&ErrorCallback>) -> usize {
    let outer = ErrorStorage::take();
    let count = batch.len();
    for op in batch {
        op();
    }
    if let Some(error) = ErrorStorage::take() {
        match callback {
            Some(callback) => callback(error),
            None => log::error!("ui operation failed: {}", error),
        }
    }
    if let Some(outer) = outer {
        ErrorStorage::set_error(outer);
    }
    count
}
