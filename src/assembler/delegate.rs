//! Callbacks from the assembler to its host and script thread

use std::collections::BTreeMap;

use serde_json::Value;

use crate::bundle::{JsContent, TemplateBundle};
use crate::config::PageConfig;
use crate::utils::error::LynxError;
use crate::value::TemplateData;

/// Everything the background script needs to start the app
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsSourceBundle {
    pub name: String,
    pub url: String,
    pub dsl: String,
    pub js: BTreeMap<String, JsContent>,
    pub global_props: Value,
    pub init_data: Value,
    pub cache_data: Vec<TemplateData>,
}

/// Host-side capabilities of an assembler. Every method has a no-op
/// default so hosts implement only what they observe.
pub trait TemplateAssemblerDelegate: Send + Sync {
    fn on_data_updated(&self) {}

    fn on_template_loaded(&self, _url: &str) {}

    fn on_page_config_decoded(&self, _config: &PageConfig) {}

    fn on_error_occurred(&self, error: LynxError) {
        log::error!("unhandled assembler error: {}", error);
    }

    fn on_dynamic_component_perf_ready(&self, _perf: Value) {}

    fn on_js_source_prepared(&self, _source: JsSourceBundle) {}

    fn on_data_updated_by_native(&self, _data: Value, _reset: bool) {}

    fn on_config_updated(&self, _config: &Value) {}

    fn on_card_config_data_changed(&self, _config: &Value) {}

    fn on_js_app_reload(&self, _data: Value) {}

    fn on_native_app_ready(&self) {}

    fn on_tasm_finish_by_native(&self) {}

    /// A decoded copy of the card bundle, when the host asked for one
    fn recycle_template_bundle(&self, _bundle: TemplateBundle) {}

    fn translate_resource_for_theme(&self, _res_id: &str, _theme_key: &str) -> Option<String> {
        None
    }

    fn get_i18n_resource(&self, _key: &str, _fallback_url: &str) -> Option<Value> {
        None
    }

    fn set_timing(&self, _pipeline_id: &str, _timing: BTreeMap<String, u64>) {}

    /// Global event for the background script
    fn send_global_event_to_js(&self, _name: &str, _params: Value) {}

    /// Answer a lazy bundle request made by the background script
    fn call_js_api_callback(&self, _callback_id: i64, _message: Value) {}

    /// A lazy bundle's background script is ready to run
    fn on_dynamic_js_source_prepared(&self, _url: &str) {}
}

/// Delegate that only logs
#[derive(Debug, Default)]
pub struct LogDelegate;

impl TemplateAssemblerDelegate for LogDelegate {
    fn on_template_loaded(&self, url: &str) {
        log::info!("template loaded: {:?}", url);
    }

    fn on_error_occurred(&self, error: LynxError) {
        log::warn!("assembler error: {}", error);
    }
}
