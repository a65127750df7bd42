//! Collapses clusters of back-to-back tasks into one report
//!
//! Tasks whose gap to the previous task is at most `max_task_interval_ms`
//! form a cluster. Once the cluster spans `window_threshold_ms`, or a long
//! task closes it, the cluster is reported if tasks kept the thread busy for
//! at least `busy_ratio` of the window.

use std::collections::HashMap;

use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchedConfig {
    pub max_task_interval_ms: f64,
    pub window_threshold_ms: f64,
    pub busy_ratio: f64,
}

impl Default for BatchedConfig {
    fn default() -> Self {
        Self {
            max_task_interval_ms: 16.7,
            window_threshold_ms: 1000.0,
            busy_ratio: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchedTask {
    pub instance_id: i32,
    pub name: String,
    pub start_ms: f64,
    pub end_ms: f64,
}

impl BatchedTask {
    pub fn duration_ms(&self) -> f64 {
        self.end_ms - self.start_ms
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchedReport {
    /// Instance that spent the most time in the cluster
    pub instance_id: i32,
    pub window_ms: f64,
    pub total_duration_ms: f64,
    pub task_count: usize,
    /// Up to three longest tasks, longest first
    pub top_tasks: Vec<BatchedTask>,
}

impl BatchedReport {
    pub fn to_value(&self) -> Value {
        json!({
            "instance_id": self.instance_id,
            "window_ms": self.window_ms,
            "total_duration_ms": self.total_duration_ms,
            "task_count": self.task_count,
            "top_tasks": self.top_tasks.iter().map(|task| json!({
                "name": task.name,
                "instance_id": task.instance_id,
                "duration_ms": task.duration_ms(),
            })).collect::<Vec<_>>(),
        })
    }
}

#[derive(Debug, Default)]
pub struct LongBatchedTasksMonitor {
    config: BatchedConfig,
    tasks: Vec<BatchedTask>,
}

impl LongBatchedTasksMonitor {
    pub fn new(config: BatchedConfig) -> Self {
        Self {
            config,
            tasks: Vec::new(),
        }
    }

    pub fn config(&self) -> &BatchedConfig {
        &self.config
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Feed one finished task. Returns a report when a busy cluster closes.
    pub fn add_task(&mut self, task: BatchedTask, is_long: bool) -> Option<BatchedReport> {
        if let Some(last) = self.tasks.last() {
            if task.start_ms - last.end_ms > self.config.max_task_interval_ms {
                self.tasks.clear();
            }
        }
        self.tasks.push(task);

        let window = self.window_ms();
        if window < self.config.window_threshold_ms && !is_long {
            return None;
        }
        let tasks = std::mem::take(&mut self.tasks);
        if tasks.len() < 2 || window <= 0.0 {
            return None;
        }
        let total: f64 = tasks.iter().map(BatchedTask::duration_ms).sum();
        if total / window < self.config.busy_ratio {
            return None;
        }
        Some(Self::report(tasks, window, total))
    }

    fn window_ms(&self) -> f64 {
        match (self.tasks.first(), self.tasks.last()) {
            (Some(first), Some(last)) => last.end_ms - first.start_ms,
            _ => 0.0,
        }
    }

    fn report(mut tasks: Vec<BatchedTask>, window_ms: f64, total_duration_ms: f64) -> BatchedReport {
        let mut per_instance: HashMap<i32, f64> = HashMap::new();
        for task in &tasks {
            *per_instance.entry(task.instance_id).or_default() += task.duration_ms();
        }
        let instance_id = per_instance
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
            .map(|(id, _)| id)
            .unwrap_or_default();
        let task_count = tasks.len();
        tasks.sort_by(|a, b| b.duration_ms().total_cmp(&a.duration_ms()));
        tasks.truncate(3);
        BatchedReport {
            instance_id,
            window_ms,
            total_duration_ms,
            task_count,
            top_tasks: tasks,
        }
    }
}
