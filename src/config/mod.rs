//! Engine configuration
//!
//! `TasmConfig` carries process-level switches. Per-instance flags are read
//! from the bundle's `PageConfig`.

pub mod page_config;

pub use page_config::{PageConfig, ThemedTrans};

use serde::Deserialize;

use crate::utils::error::{Result, TasmError};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TASM_";

/// Process-level configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TasmConfig {
    /// Tasks at or above this duration are reported as long tasks
    pub long_task_threshold_ms: f64,
    /// Maximum gap between two tasks in one batch
    pub batched_max_task_interval_ms: f64,
    /// Batch window that triggers an evaluation
    pub batched_window_threshold_ms: f64,
    /// Busy ratio at which a batch is reported
    pub batched_ratio: f64,
    /// Bounded wait of the async UI queue's gated flush
    pub ui_flush_wait_timeout_ms: u64,
    /// Post processed data to the script thread before updating the tree
    pub enable_post_data_before_update: bool,
    /// Force greedy CSS decoding
    pub disable_lazy_css_decode: bool,
    /// Number of contexts kept warm in the global pool
    pub global_context_pool_size: usize,
    /// Create contexts without the tracing collector; disables the global pool
    pub disable_tracing_gc: bool,
    pub devtool_attached: bool,
    pub logbox_enabled: bool,
    /// Report `lynxsdk_create_mts_context` events
    pub report_mts_context_event: bool,
    /// Threads in the concurrent decode pool
    pub worker_threads: usize,
}

impl Default for TasmConfig {
    fn default() -> Self {
        Self {
            long_task_threshold_ms: 50.0,
            batched_max_task_interval_ms: 16.7,
            batched_window_threshold_ms: 1000.0,
            batched_ratio: 0.8,
            ui_flush_wait_timeout_ms: 100,
            enable_post_data_before_update: false,
            disable_lazy_css_decode: false,
            global_context_pool_size: 2,
            disable_tracing_gc: false,
            devtool_attached: false,
            logbox_enabled: false,
            report_mts_context_event: false,
            worker_threads: num_cpus::get(),
        }
    }
}

impl TasmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing keys keep their defaults
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TasmError::Config(e.to_string()))
    }

    /// Defaults overridden by `TASM_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Apply `TASM_*` key/value pairs on top of this config
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let name = name.to_ascii_lowercase();
            log::debug!("config override {} = {}", name, value);
            match name.as_str() {
                "long_task_threshold_ms" => self.long_task_threshold_ms = parse(&key, &value)?,
                "batched_max_task_interval_ms" => {
                    self.batched_max_task_interval_ms = parse(&key, &value)?
                }
                "batched_window_threshold_ms" => {
                    self.batched_window_threshold_ms = parse(&key, &value)?
                }
                "batched_ratio" => self.batched_ratio = parse(&key, &value)?,
                "ui_flush_wait_timeout_ms" => self.ui_flush_wait_timeout_ms = parse(&key, &value)?,
                "enable_post_data_before_update" => {
                    self.enable_post_data_before_update = parse_bool(&value)
                }
                "disable_lazy_css_decode" => self.disable_lazy_css_decode = parse_bool(&value),
                "global_context_pool_size" => {
                    self.global_context_pool_size = parse(&key, &value)?
                }
                "disable_tracing_gc" => self.disable_tracing_gc = parse_bool(&value),
                "devtool_attached" => self.devtool_attached = parse_bool(&value),
                "logbox_enabled" => self.logbox_enabled = parse_bool(&value),
                "report_mts_context_event" => self.report_mts_context_event = parse_bool(&value),
                "worker_threads" => self.worker_threads = parse(&key, &value)?,
                _ => log::warn!("unknown config variable {}", key),
            }
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| TasmError::Config(format!("invalid value for {}: {}", key, value)))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
