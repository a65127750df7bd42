//! Per-request state of a lazy bundle load

use std::fmt;

use serde_json::{Value, json};

use crate::element::ElementId;
use crate::utils::time::current_time_micros;

/// How the bundle reached the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Already loaded by this page
    Cache,
    /// Parked by an earlier preload
    Preload,
    /// Fetched for this request
    Fetched,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Preload => "preload",
            Self::Fetched => "fetched",
        }
    }
}

/// Who to notify when the bundle is ready
pub enum LazyBundleCallback {
    /// Fiber: a closure handed over by the main-thread script
    Closure(Box<dyn FnOnce(Value) + Send>),
    /// Legacy: fire `bindsuccess`/`bindfail` on the element
    Component { element_id: ElementId },
    /// A component instance created synchronously; its state is set directly
    SyncInstance { element_id: ElementId },
    /// Background script callback id
    Script { callback_id: i64 },
    /// Nobody is waiting
    None,
}

impl fmt::Debug for LazyBundleCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closure(_) => f.write_str("Closure"),
            Self::Component { element_id } => write!(f, "Component({})", element_id),
            Self::SyncInstance { element_id } => write!(f, "SyncInstance({})", element_id),
            Self::Script { callback_id } => write!(f, "Script({})", callback_id),
            Self::None => f.write_str("None"),
        }
    }
}

#[derive(Debug)]
pub struct LazyBundleLifecycleOption {
    pub url: String,
    pub instance_id: i32,
    pub sync: bool,
    pub callback: LazyBundleCallback,
    pub start_require: u64,
    pub end_require: u64,
    pub start_decode: u64,
    pub end_decode: u64,
    pub binary_size: usize,
    pub mode: LoadMode,
    pub is_success: bool,
    pub error_code: i32,
    pub message: String,
    pub eval_result: Value,
}

impl LazyBundleLifecycleOption {
    pub fn new(url: impl Into<String>, instance_id: i32, sync: bool, callback: LazyBundleCallback) -> Self {
        Self {
            url: url.into(),
            instance_id,
            sync,
            callback,
            start_require: current_time_micros(),
            end_require: 0,
            start_decode: 0,
            end_decode: 0,
            binary_size: 0,
            mode: LoadMode::Fetched,
            is_success: false,
            error_code: 0,
            message: String::new(),
            eval_result: Value::Null,
        }
    }

    pub fn with_mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mark_success(&mut self, eval_result: Value) {
        self.is_success = true;
        self.error_code = 0;
        self.message.clear();
        self.eval_result = eval_result;
        self.finish_require();
    }

    pub fn mark_failure(&mut self, error_code: i32, message: impl Into<String>) {
        self.is_success = false;
        self.error_code = error_code;
        self.message = message.into();
        self.finish_require();
    }

    fn finish_require(&mut self) {
        if self.end_require == 0 {
            self.end_require = current_time_micros();
        }
    }

    /// True if dispatching this option mutates the element tree
    pub fn requests_dispatch(&self) -> bool {
        !matches!(self.callback, LazyBundleCallback::Script { .. } | LazyBundleCallback::None)
    }

    pub fn perf_info(&self) -> Value {
        json!({
            "start_require": self.start_require,
            "end_require": self.end_require,
            "start_decode": self.start_decode,
            "end_decode": self.end_decode,
            "binary_size": self.binary_size,
            "mode": self.mode.as_str(),
            "sync": self.sync,
        })
    }

    /// Payload for the main-thread script
    pub fn main_thread_message(&self) -> Value {
        json!({
            "url": self.url,
            "sync": self.sync,
            "evalResult": self.eval_result,
            "code": self.error_code,
            "detail": {
                "errMsg": self.message,
                "schema": self.url,
            },
            "mode": self.mode.as_str(),
            "perfInfo": self.perf_info(),
        })
    }

    /// Payload for the background script thread
    pub fn background_message(&self) -> Value {
        json!({
            "code": self.error_code,
            "data": {
                "url": self.url,
                "sync": self.sync,
                "error_msg": self.message,
            },
        })
    }
}
