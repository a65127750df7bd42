//! Delegate that splits assembler callbacks between the host and the script
//! thread

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::ScriptRuntime;
use crate::assembler::{JsSourceBundle, TemplateAssemblerDelegate};
use crate::bundle::TemplateBundle;
use crate::config::PageConfig;
use crate::thread::Actor;
use crate::utils::error::LynxError;

/// Script-bound callbacks are posted to the script actor; the rest go to the
/// host on the engine thread
pub struct ShellDelegate {
    host: Arc<dyn TemplateAssemblerDelegate>,
    script: Actor<Box<dyn ScriptRuntime>>,
}

impl ShellDelegate {
    pub fn new(host: Arc<dyn TemplateAssemblerDelegate>, script: Actor<Box<dyn ScriptRuntime>>) -> Self {
        Self { host, script }
    }
}

impl TemplateAssemblerDelegate for ShellDelegate {
    fn on_data_updated(&self) {
        self.host.on_data_updated();
    }

    fn on_template_loaded(&self, url: &str) {
        self.host.on_template_loaded(url);
    }

    fn on_page_config_decoded(&self, config: &PageConfig) {
        self.host.on_page_config_decoded(config);
    }

    fn on_error_occurred(&self, error: LynxError) {
        self.host.on_error_occurred(error);
    }

    fn on_dynamic_component_perf_ready(&self, perf: Value) {
        self.host.on_dynamic_component_perf_ready(perf);
    }

    fn on_js_source_prepared(&self, source: JsSourceBundle) {
        self.script.act(move |runtime| runtime.on_js_source_prepared(source));
    }

    fn on_data_updated_by_native(&self, data: Value, reset: bool) {
        self.script
            .act(move |runtime| runtime.on_data_updated_by_native(data, reset));
    }

    fn on_config_updated(&self, config: &Value) {
        self.host.on_config_updated(config);
    }

    fn on_card_config_data_changed(&self, config: &Value) {
        let config = config.clone();
        self.script.act(move |runtime| runtime.on_card_config_changed(config));
    }

    fn on_js_app_reload(&self, data: Value) {
        self.script.act(move |runtime| runtime.on_app_reload(data));
    }

    fn on_native_app_ready(&self) {
        self.host.on_native_app_ready();
    }

    fn on_tasm_finish_by_native(&self) {
        self.host.on_tasm_finish_by_native();
    }

    fn recycle_template_bundle(&self, bundle: TemplateBundle) {
        self.host.recycle_template_bundle(bundle);
    }

    fn translate_resource_for_theme(&self, res_id: &str, theme_key: &str) -> Option<String> {
        self.host.translate_resource_for_theme(res_id, theme_key)
    }

    fn get_i18n_resource(&self, key: &str, fallback_url: &str) -> Option<Value> {
        self.host.get_i18n_resource(key, fallback_url)
    }

    fn set_timing(&self, pipeline_id: &str, timing: BTreeMap<String, u64>) {
        self.host.set_timing(pipeline_id, timing);
    }

    fn send_global_event_to_js(&self, name: &str, params: Value) {
        let name = name.to_string();
        self.script.act(move |runtime| runtime.on_global_event(&name, params));
    }

    fn call_js_api_callback(&self, callback_id: i64, message: Value) {
        self.script
            .act(move |runtime| runtime.on_api_callback(callback_id, message));
    }

    fn on_dynamic_js_source_prepared(&self, url: &str) {
        let url = url.to_string();
        self.script
            .act(move |runtime| runtime.on_dynamic_js_source_prepared(&url));
    }
}
