//! Performance monitoring: long tasks, batched tasks, tracked events and
//! pipeline timing marks

pub mod batched;
pub mod event_tracker;
pub mod long_task;
pub mod timing;

pub use batched::{BatchedConfig, BatchedReport, BatchedTask, LongBatchedTasksMonitor};
pub use event_tracker::{EventReporter, EventTracker, LogReporter, TrackedEvent};
pub use long_task::{LongTaskMonitor, LongTaskScope};
pub use timing::TimingCollector;
