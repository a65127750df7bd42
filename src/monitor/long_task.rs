//! Thread-local long task detection
//!
//! `LongTaskMonitor::scope` opens a measured region on the current thread.
//! Nested scopes are inert; only the outermost one is timed. A task that
//! runs for at least the threshold is reported as a long task, and every
//! finished task feeds the batched-task monitor.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;

use super::batched::{BatchedConfig, BatchedTask, LongBatchedTasksMonitor};
use super::event_tracker::{EVENT_LONG_BATCHED_TASKS, EVENT_LONG_TASK, EventTracker, TrackedEvent};
use crate::utils::time::steady_micros;

pub const DEFAULT_LONG_TASK_THRESHOLD_MS: f64 = 50.0;

pub mod task_type {
    pub const TASM_TASK: &str = "tasm_task";
    pub const UI_TASK: &str = "ui_task";
    pub const SCRIPT_TASK: &str = "script_task";
}

thread_local! {
    static MONITOR: RefCell<LongTaskMonitor> = RefCell::new(LongTaskMonitor::default());
}

fn now_ms() -> f64 {
    steady_micros() as f64 / 1000.0
}

struct ActiveTask {
    instance_id: i32,
    task_type: String,
    name: String,
    info: String,
    start_ms: f64,
}

pub struct LongTaskMonitor {
    threshold_ms: f64,
    stack: Vec<Option<ActiveTask>>,
    batched: LongBatchedTasksMonitor,
    tracker: Option<Arc<EventTracker>>,
}

impl Default for LongTaskMonitor {
    fn default() -> Self {
        Self {
            threshold_ms: DEFAULT_LONG_TASK_THRESHOLD_MS,
            stack: Vec::new(),
            batched: LongBatchedTasksMonitor::default(),
            tracker: None,
        }
    }
}

impl LongTaskMonitor {
    /// Configure the monitor of the calling thread
    pub fn configure(threshold_ms: f64, batched: BatchedConfig, tracker: Option<Arc<EventTracker>>) {
        MONITOR.with(|monitor| {
            let mut monitor = monitor.borrow_mut();
            monitor.threshold_ms = threshold_ms;
            monitor.batched = LongBatchedTasksMonitor::new(batched);
            monitor.tracker = tracker;
        });
    }

    /// Open a measured region on the calling thread
    pub fn scope(instance_id: i32, task_type: &str, name: &str, info: &str) -> LongTaskScope {
        MONITOR.with(|monitor| {
            let mut monitor = monitor.borrow_mut();
            let entry = if monitor.stack.is_empty() {
                Some(ActiveTask {
                    instance_id,
                    task_type: task_type.to_string(),
                    name: name.to_string(),
                    info: info.to_string(),
                    start_ms: now_ms(),
                })
            } else {
                None
            };
            monitor.stack.push(entry);
        });
        LongTaskScope {
            _thread_bound: PhantomData,
        }
    }

    /// Open scopes on the calling thread
    pub fn depth() -> usize {
        MONITOR.with(|monitor| monitor.borrow().stack.len())
    }

    fn end(&mut self) {
        let Some(Some(task)) = self.stack.pop() else {
            return;
        };
        let end_ms = now_ms();
        let duration = end_ms - task.start_ms;
        let is_long = duration >= self.threshold_ms;
        if is_long {
            log::debug!(
                "long task {}:{} took {:.1}ms on instance {}",
                task.task_type,
                task.name,
                duration,
                task.instance_id
            );
            if let Some(tracker) = &self.tracker {
                tracker.on_event(
                    TrackedEvent::new(EVENT_LONG_TASK, task.instance_id)
                        .with_prop("type", task.task_type.as_str())
                        .with_prop("name", task.name.as_str())
                        .with_prop("info", task.info.as_str())
                        .with_prop("duration", duration),
                );
            }
        }
        let report = self.batched.add_task(
            BatchedTask {
                instance_id: task.instance_id,
                name: task.name,
                start_ms: task.start_ms,
                end_ms,
            },
            is_long,
        );
        if let (Some(report), Some(tracker)) = (report, &self.tracker) {
            let mut event = TrackedEvent::new(EVENT_LONG_BATCHED_TASKS, report.instance_id);
            if let Value::Object(props) = report.to_value() {
                event.props = props;
            }
            tracker.on_event(event);
        }
    }
}

/// Closes its region on drop. Bound to the thread that opened it.
pub struct LongTaskScope {
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for LongTaskScope {
    fn drop(&mut self) {
        MONITOR.with(|monitor| monitor.borrow_mut().end());
    }
}
