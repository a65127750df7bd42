//! Instance-keyed telemetry events

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

pub const EVENT_CREATE_MTS_CONTEXT: &str = "lynxsdk_create_mts_context";
pub const EVENT_LONG_TASK: &str = "lynxsdk_long_task_timing";
pub const EVENT_LONG_BATCHED_TASKS: &str = "lynxsdk_long_batched_tasks";
pub const EVENT_LAZY_BUNDLE_PERF: &str = "lynxsdk_lazy_bundle_timing";

pub mod generic_key {
    pub const TEMPLATE_JS_SIZE: &str = "template_js_size";
    pub const SCREEN_WIDTH: &str = "screen_width";
    pub const SCREEN_HEIGHT: &str = "screen_height";
    pub const URL: &str = "url";
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEvent {
    pub name: String,
    pub instance_id: i32,
    pub props: Map<String, Value>,
}

impl TrackedEvent {
    pub fn new(name: impl Into<String>, instance_id: i32) -> Self {
        Self {
            name: name.into(),
            instance_id,
            props: Map::new(),
        }
    }

    pub fn with_prop(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }
}

/// Platform sink for tracked events
#[cfg_attr(test, mockall::automock)]
pub trait EventReporter: Send + Sync {
    fn report(&self, event: TrackedEvent);
}

/// Reporter that writes events to the log
#[derive(Debug, Default)]
pub struct LogReporter;

impl EventReporter for LogReporter {
    fn report(&self, event: TrackedEvent) {
        log::info!(
            "event {} instance={} {}",
            event.name,
            event.instance_id,
            Value::Object(event.props)
        );
    }
}

/// Caches events and flushes them with the instance's generic info attached
pub struct EventTracker {
    reporter: Arc<dyn EventReporter>,
    cache: Mutex<Vec<TrackedEvent>>,
    generic_info: Mutex<HashMap<i32, Map<String, Value>>>,
}

impl std::fmt::Debug for EventTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTracker")
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

impl Default for EventTracker {
    fn default() -> Self {
        Self::new(Arc::new(LogReporter))
    }
}

impl EventTracker {
    pub fn new(reporter: Arc<dyn EventReporter>) -> Self {
        Self {
            reporter,
            cache: Mutex::new(Vec::new()),
            generic_info: Mutex::new(HashMap::new()),
        }
    }

    /// Cache an event until the next flush
    pub fn on_event(&self, event: TrackedEvent) {
        self.cache.lock().push(event);
    }

    pub fn update_generic_info(&self, instance_id: i32, key: &str, value: impl Into<Value>) {
        self.generic_info
            .lock()
            .entry(instance_id)
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn generic_info(&self, instance_id: i32) -> Map<String, Value> {
        self.generic_info
            .lock()
            .get(&instance_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear_generic_info(&self, instance_id: i32) {
        self.generic_info.lock().remove(&instance_id);
    }

    pub fn pending(&self) -> usize {
        self.cache.lock().len()
    }

    /// Report every cached event. Returns the number reported.
    pub fn flush(&self) -> usize {
        let events = std::mem::take(&mut *self.cache.lock());
        let count = events.len();
        for mut event in events {
            for (key, value) in self.generic_info(event.instance_id) {
                event.props.entry(key).or_insert(value);
            }
            self.reporter.report(event);
        }
        count
    }
}
