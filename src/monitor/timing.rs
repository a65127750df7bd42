//! Named pipeline timing marks

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::utils::time::current_time_micros;

pub const LOAD_BUNDLE_START: &str = "load_bundle_start";
pub const LOAD_BUNDLE_END: &str = "load_bundle_end";
pub const PARSE_START: &str = "parse_start";
pub const PARSE_END: &str = "parse_end";
pub const VM_EXECUTE_START: &str = "vm_execute_start";
pub const VM_EXECUTE_END: &str = "vm_execute_end";
pub const MTS_RENDER_START: &str = "mts_render_start";
pub const MTS_RENDER_END: &str = "mts_render_end";
pub const SET_INIT_DATA_START: &str = "set_init_data_start";
pub const SET_INIT_DATA_END: &str = "set_init_data_end";
pub const DATA_PROCESSOR_START: &str = "data_processor_start";
pub const DATA_PROCESSOR_END: &str = "data_processor_end";

/// Marks grouped by pipeline id
#[derive(Debug, Default)]
pub struct TimingCollector {
    marks: Mutex<HashMap<String, BTreeMap<String, u64>>>,
}

impl TimingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name` now; returns the timestamp in microseconds
    pub fn mark(&self, pipeline_id: &str, name: &str) -> u64 {
        let now = current_time_micros();
        self.mark_at(pipeline_id, name, now);
        now
    }

    pub fn mark_at(&self, pipeline_id: &str, name: &str, micros: u64) {
        self.marks
            .lock()
            .entry(pipeline_id.to_string())
            .or_default()
            .insert(name.to_string(), micros);
    }

    pub fn get(&self, pipeline_id: &str, name: &str) -> Option<u64> {
        self.marks.lock().get(pipeline_id)?.get(name).copied()
    }

    pub fn marks(&self, pipeline_id: &str) -> BTreeMap<String, u64> {
        self.marks
            .lock()
            .get(pipeline_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove and return the marks of a finished pipeline
    pub fn take(&self, pipeline_id: &str) -> BTreeMap<String, u64> {
        self.marks.lock().remove(pipeline_id).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marks_per_pipeline() {
        let timing = TimingCollector::new();
        timing.mark_at("p1", PARSE_START, 10);
        timing.mark_at("p1", PARSE_END, 20);
        timing.mark_at("p2", PARSE_START, 30);
        assert_eq!(timing.get("p1", PARSE_END), Some(20));
        assert_eq!(timing.marks("p1").len(), 2);
        assert_eq!(timing.take("p1").len(), 2);
        assert!(timing.marks("p1").is_empty());
        assert_eq!(timing.get("p2", PARSE_START), Some(30));
    }

    #[test]
    fn test_mark_uses_clock() {
        let timing = TimingCollector::new();
        let at = timing.mark("p", LOAD_BUNDLE_START);
        assert!(at > 0);
        assert_eq!(timing.get("p", LOAD_BUNDLE_START), Some(at));
    }
}
