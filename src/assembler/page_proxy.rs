//! Page state for the legacy render path
//!
//! Fiber pages keep their data inside the VM. Legacy pages keep it here and
//! drive the page mould's render functions.

use std::collections::HashMap;

use serde_json::{Map, Value, json};

use super::options::UpdatePageOption;
use crate::bundle::TemplateBundle;
use crate::config::ThemedTrans;
use crate::element::ElementManager;
use crate::utils::error::Result;
use crate::value;
use crate::vm::VmContext;

pub const GLOBAL_PROPS_KEY: &str = "__globalProps";

/// Data the page proxy holds for the card
#[derive(Debug, Default)]
pub struct PageProxy {
    mould_id: u32,
    default_page_data: Value,
    default_global_props: Value,
    page_data: Value,
    global_props: Value,
    card_config: Value,
    default_processor: Option<String>,
    processors: HashMap<String, String>,
    themed: Option<ThemedTrans>,
    rendered: bool,
}

impl PageProxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick up the page mould and theme tables of a freshly decoded card
    pub fn bind_bundle(&mut self, bundle: &TemplateBundle) {
        if let Some(mould) = bundle.page_moulds().values().next() {
            self.mould_id = mould.id;
            self.default_page_data = mould.data.clone();
        }
        self.themed = bundle.themed().cloned();
    }

    pub fn default_page_data(&self) -> &Value {
        &self.default_page_data
    }

    pub fn default_global_props(&self) -> &Value {
        &self.default_global_props
    }

    pub fn set_default_global_props(&mut self, props: Value) {
        self.default_global_props = props;
    }

    pub fn page_data(&self) -> &Value {
        &self.page_data
    }

    pub fn is_rendered(&self) -> bool {
        self.rendered
    }

    pub fn render_function(&self) -> String {
        format!("$renderPage{}", self.mould_id)
    }

    pub fn update_function(&self) -> String {
        format!("$updatePage{}", self.mould_id)
    }

    /// Register the processor used for data without a processor name
    pub fn set_default_processor(&mut self, function: impl Into<String>) {
        self.default_processor = Some(function.into());
    }

    pub fn register_processor(&mut self, name: impl Into<String>, function: impl Into<String>) {
        self.processors.insert(name.into(), function.into());
    }

    /// Script function that handles data tagged with `name`
    pub fn processor_for(&self, name: &str) -> Option<&str> {
        if name.is_empty() {
            self.default_processor.as_deref()
        } else {
            self.processors.get(name).map(String::as_str)
        }
    }

    /// Fill keys the data lacks from the page mould's defaults
    pub fn apply_default_page_data(&self, data: &mut Value) {
        let Some(defaults) = self.default_page_data.as_object() else {
            return;
        };
        if !data.is_object() {
            *data = Value::Object(Map::new());
        }
        if let Value::Object(map) = data {
            for (key, value) in defaults {
                if map.get(key).is_none_or(value::is_empty) {
                    map.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// First render of the page with its initial data
    pub fn update_in_load_template(&mut self, vm: &dyn VmContext, data: &Value, option: &UpdatePageOption) -> Result<()> {
        self.page_data = json!({});
        value::merge(&mut self.page_data, data);
        self.attach_global_props();
        vm.call(&self.render_function(), &[self.page_data.clone(), option.to_value()])?;
        self.rendered = true;
        Ok(())
    }

    /// Apply an update. Returns false if nothing changed.
    pub fn update_global_data_internal(&mut self, vm: &dyn VmContext, data: &Value, option: &UpdatePageOption) -> Result<bool> {
        if option.reset_page_data {
            self.page_data = json!({});
            self.apply_default_page_data_to_page();
        } else if value::is_empty(data) || !self.changes(data) {
            log::trace!("update carries no change");
            return Ok(false);
        }
        value::merge(&mut self.page_data, data);
        self.attach_global_props();
        let name = if self.rendered {
            self.update_function()
        } else {
            self.render_function()
        };
        vm.call(&name, &[self.page_data.clone(), option.to_value()])?;
        self.rendered = true;
        Ok(true)
    }

    fn changes(&self, data: &Value) -> bool {
        let Some(patch) = data.as_object() else {
            return false;
        };
        patch
            .iter()
            .any(|(key, value)| self.page_data.get(key) != Some(value))
    }

    fn apply_default_page_data_to_page(&mut self) {
        let mut page = std::mem::take(&mut self.page_data);
        self.apply_default_page_data(&mut page);
        self.page_data = page;
    }

    fn attach_global_props(&mut self) {
        if !self.global_props.is_object() {
            return;
        }
        if let Value::Object(map) = &mut self.page_data {
            map.insert(GLOBAL_PROPS_KEY.to_string(), self.global_props.clone());
        }
    }

    pub fn update_global_props(&mut self, vm: Option<&dyn VmContext>, props: &Value, need_render: bool) -> Result<()> {
        self.global_props = props.clone();
        let Some(vm) = vm.filter(|_| need_render && self.rendered) else {
            return Ok(());
        };
        self.attach_global_props();
        vm.call(&self.update_function(), &[self.page_data.clone(), UpdatePageOption::default().to_value()])?;
        Ok(())
    }

    /// Drop the rendered components ahead of a reload
    pub fn remove_old_component_before_reload(&mut self, elements: &ElementManager) {
        elements.clear();
        self.rendered = false;
    }

    /// Merge a card config patch. Returns the config to hand to script, or
    /// `None` if nothing changed.
    pub fn update_config(&mut self, config: &Value) -> Option<Value> {
        let patch = config.as_object()?;
        let changed = patch
            .iter()
            .any(|(key, value)| self.card_config.get(key) != Some(value));
        if !changed {
            return None;
        }
        value::merge(&mut self.card_config, config);
        Some(self.card_config.clone())
    }

    pub fn card_config(&self) -> &Value {
        &self.card_config
    }

    /// Look up `res_id` in the bundle's theme tables
    pub fn translate(&self, theme_key: &str, res_id: &str) -> Option<String> {
        let themed = self.themed.as_ref()?;
        if !theme_key.is_empty() {
            return themed.get(theme_key)?.get(res_id).cloned();
        }
        let mut keys: Vec<_> = themed.keys().collect();
        keys.sort();
        keys.into_iter()
            .find_map(|key| themed.get(key).and_then(|table| table.get(res_id)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::DeclarativeVm;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_page_data_fills_missing_keys() {
        let mut proxy = PageProxy::new();
        proxy.default_page_data = json!({"title": "t", "count": 0});
        let mut data = json!({"count": 3});
        proxy.apply_default_page_data(&mut data);
        assert_eq!(data, json!({"title": "t", "count": 3}));
    }

    #[test]
    fn test_processor_lookup() {
        let mut proxy = PageProxy::new();
        assert_eq!(proxy.processor_for(""), None);
        proxy.set_default_processor("defaultDataProcessor");
        proxy.register_processor("p", "processP");
        assert_eq!(proxy.processor_for(""), Some("defaultDataProcessor"));
        assert_eq!(proxy.processor_for("p"), Some("processP"));
        assert_eq!(proxy.processor_for("q"), None);
    }

    #[test]
    fn test_update_without_change_is_skipped() {
        let vm = DeclarativeVm::new(true);
        let mut proxy = PageProxy::new();
        proxy.page_data = json!({"a": 1});
        proxy.rendered = true;
        let changed = proxy
            .update_global_data_internal(&vm, &json!({"a": 1}), &UpdatePageOption::from_native())
            .unwrap();
        assert!(!changed);
        assert!(vm.calls().is_empty());
    }

    #[test]
    fn test_update_config_reports_changes_only() {
        let mut proxy = PageProxy::new();
        assert_eq!(proxy.update_config(&json!({"theme": "dark"})), Some(json!({"theme": "dark"})));
        assert_eq!(proxy.update_config(&json!({"theme": "dark"})), None);
    }

    #[test]
    fn test_translate_with_and_without_key() {
        let mut proxy = PageProxy::new();
        let mut themed = ThemedTrans::new();
        themed.insert("dark".into(), [("title".to_string(), "Night".to_string())].into());
        proxy.themed = Some(themed);
        assert_eq!(proxy.translate("dark", "title").as_deref(), Some("Night"));
        assert_eq!(proxy.translate("", "title").as_deref(), Some("Night"));
        assert_eq!(proxy.translate("light", "title"), None);
    }
}
