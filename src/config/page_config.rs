//! Per-page configuration decoded from the bundle's CONFIG section

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Theme translation table: theme key -> resource id -> text
pub type ThemedTrans = HashMap<String, HashMap<String, String>>;

/// Page-level feature flags
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageConfig {
    pub version: String,
    pub dsl: String,
    /// Data processors run on the script thread instead of the engine
    pub enable_js_data_process: bool,
    /// Buffer host updates that arrive before the page loads
    pub enable_pre_update_data: bool,
    pub enable_circular_data_check: bool,
    pub enable_js_binding_api_throw_exception: bool,
    pub enable_binding_icu: bool,
    pub enable_microtask_promise_polyfill: bool,
    /// Decode lazy bundles off the engine thread
    pub enable_component_async_decode: bool,
    pub enable_use_context_pool: bool,
    pub enable_css_lazy_import: bool,
    /// Keys this engine does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,

    #[serde(skip)]
    pub target_sdk_version: String,
    #[serde(skip)]
    pub support_component_js: bool,
    #[serde(skip)]
    pub enable_fiber_arch: bool,
    #[serde(skip)]
    pub radon_mode: u8,
    #[serde(skip)]
    pub themed: Option<ThemedTrans>,
}

impl PageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the CONFIG section payload
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(text)
    }

    /// Apply a runtime update; returns true if a known flag changed
    pub fn update(&mut self, patch: &Value) -> bool {
        let Some(patch) = patch.as_object() else {
            return false;
        };
        let mut changed = false;
        for (key, value) in patch {
            let flag = value.as_bool();
            let slot = match key.as_str() {
                "enableJsDataProcess" => Some(&mut self.enable_js_data_process),
                "enablePreUpdateData" => Some(&mut self.enable_pre_update_data),
                "enableCircularDataCheck" => Some(&mut self.enable_circular_data_check),
                "enableComponentAsyncDecode" => Some(&mut self.enable_component_async_decode),
                _ => None,
            };
            match (slot, flag) {
                (Some(slot), Some(flag)) => {
                    changed |= *slot != flag;
                    *slot = flag;
                }
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
        changed
    }

    /// Translate a resource id for a theme
    pub fn translate(&self, theme_key: &str, res_id: &str) -> Option<&str> {
        self.themed
            .as_ref()?
            .get(theme_key)?
            .get(res_id)
            .map(String::as_str)
    }
}
