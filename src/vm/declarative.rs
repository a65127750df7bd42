//! A VM that renders JSON page descriptions
//!
//! Programs are JSON documents:
//!
//! ```json
//! {
//!   "page": {"tag": "page", "children": [{"tag": "text", "text": "{{title}}"}]},
//!   "processors": {"p": {"extra": 1}},
//!   "functions": {"getName": "demo"},
//!   "exports": {"version": 1},
//!   "throws": ["someFunction"]
//! }
//! ```
//!
//! `{{key}}` in text is replaced with the top-level data field `key`.
//! Used by the demo binary and by tests; real hosts plug in their own VM.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::{Map, Value, json};

use super::{AssemblerHandle, VmContext, VmFactory};
use crate::bundle::{ContextBundle, ElementNode};
use crate::config::PageConfig;
use crate::element::{ElementId, ElementManager};
use crate::utils::error::VmError;
use crate::value;

/// Observable VM state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmState {
    pub sdk_version: String,
    pub initialized: bool,
    pub builtins_registered: bool,
    pub lynx_registered: bool,
    pub debug_info_url: String,
    pub deserialized: bool,
    pub executed: bool,
    pub program: Value,
    pub lynx_properties: Map<String, Value>,
    pub top_level: Map<String, Value>,
    pub circular_data_check: bool,
}

#[derive(Default)]
struct Inner {
    state: VmState,
    handle: AssemblerHandle,
    data: Map<String, Value>,
    bindings: Vec<(ElementId, String)>,
    calls: Vec<(String, Vec<Value>)>,
}

pub struct DeclarativeVm {
    quick: bool,
    inner: Mutex<Inner>,
}

fn interpolate(template: &str, data: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        match data.get(after[..end].trim()) {
            Some(Value::String(text)) => out.push_str(text),
            Some(Value::Null) | None => {}
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

impl DeclarativeVm {
    pub fn new(quick: bool) -> Self {
        Self {
            quick,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn state(&self) -> VmState {
        self.inner.lock().state.clone()
    }

    /// Every `call` made so far, in order
    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.inner.lock().calls.clone()
    }

    pub fn calls_named(&self, name: &str) -> Vec<Vec<Value>> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|(called, _)| called == name)
            .map(|(_, args)| args.clone())
            .collect()
    }

    /// Data the page was last rendered with
    pub fn data(&self) -> Value {
        Value::Object(self.inner.lock().data.clone())
    }

    fn elements(&self, name: &str) -> Result<Arc<ElementManager>, VmError> {
        self.inner.lock().handle.elements().ok_or_else(|| VmError::Call {
            name: name.to_string(),
            message: "no element manager attached".to_string(),
        })
    }

    fn build(
        elements: &ElementManager,
        node: &ElementNode,
        data: &Map<String, Value>,
        bindings: &mut Vec<(ElementId, String)>,
    ) -> ElementId {
        let id = elements.create_element(&node.tag);
        for (key, value) in &node.attributes {
            elements.set_attribute(id, key, value.clone());
        }
        if let Some(text) = &node.text {
            if text.contains("{{") {
                bindings.push((id, text.clone()));
            }
            elements.set_text(id, &interpolate(text, data));
        }
        for child in &node.children {
            let child_id = Self::build(elements, child, data, bindings);
            elements.append_child(id, child_id);
        }
        id
    }

    fn merge_data(&self, data: Option<&Value>) -> Map<String, Value> {
        let mut inner = self.inner.lock();
        if let Some(Value::Object(patch)) = data {
            for (key, value) in patch {
                inner.data.insert(key.clone(), value.clone());
            }
        }
        inner.data.clone()
    }

    fn render_page(&self, name: &str, args: &[Value]) -> Result<Value, VmError> {
        let elements = self.elements(name)?;
        let data = self.merge_data(args.first());
        let init_page = args
            .get(1)
            .and_then(|options| options.get("initPage"))
            .is_some_and(|flag| !flag.is_null());
        if init_page || elements.root().is_some() {
            return self.update_page(name, &[]);
        }
        let page = self.inner.lock().state.program.get("page").cloned();
        let page: ElementNode = match page {
            Some(page) => serde_json::from_value(page).map_err(|err| VmError::Call {
                name: name.to_string(),
                message: err.to_string(),
            })?,
            None => ElementNode::new("page"),
        };
        let mut bindings = Vec::new();
        let root = Self::build(&elements, &page, &data, &mut bindings);
        elements.set_root(root);
        self.inner.lock().bindings = bindings;
        Ok(Value::Null)
    }

    fn update_page(&self, name: &str, args: &[Value]) -> Result<Value, VmError> {
        let elements = self.elements(name)?;
        let data = self.merge_data(args.first());
        let bindings = self.inner.lock().bindings.clone();
        for (id, template) in bindings {
            elements.set_text(id, &interpolate(&template, &data));
        }
        Ok(Value::Null)
    }

    fn process_data(&self, args: &[Value]) -> Value {
        let mut data = args.first().cloned().unwrap_or(Value::Null);
        if !data.is_object() {
            return Value::Null;
        }
        let processor = args.get(1).and_then(Value::as_str).unwrap_or_default();
        let patch = self
            .inner
            .lock()
            .state
            .program
            .get("processors")
            .and_then(|processors| processors.get(processor))
            .cloned();
        if let Some(patch) = patch {
            value::merge(&mut data, &patch);
        }
        data
    }

    fn throws(&self, name: &str) -> bool {
        self.inner
            .lock()
            .state
            .program
            .get("throws")
            .and_then(Value::as_array)
            .is_some_and(|names| names.iter().any(|n| n.as_str() == Some(name)))
    }

    fn merge_functions(&self, program: &Value) {
        let Some(Value::Object(functions)) = program.get("functions") else {
            return;
        };
        let mut inner = self.inner.lock();
        let root = &mut inner.state.program;
        if !root.is_object() {
            *root = json!({});
        }
        if let Some(root) = root.as_object_mut() {
            let entry = root
                .entry("functions")
                .or_insert_with(|| Value::Object(Map::new()));
            value::merge(entry, &Value::Object(functions.clone()));
        }
    }
}

impl VmContext for DeclarativeVm {
    fn is_quick(&self) -> bool {
        self.quick
    }

    fn set_sdk_version(&self, version: &str) {
        self.inner.lock().state.sdk_version = version.to_string();
    }

    fn initialize(&self) -> Result<(), VmError> {
        self.inner.lock().state.initialized = true;
        Ok(())
    }

    fn register_builtin(&self) {
        self.inner.lock().state.builtins_registered = true;
    }

    fn register_lynx(&self) {
        self.inner.lock().state.lynx_registered = true;
    }

    fn set_assembler(&self, handle: AssemblerHandle) {
        self.inner.lock().handle = handle;
    }

    fn set_debug_info_url(&self, url: &str) {
        self.inner.lock().state.debug_info_url = url.to_string();
    }

    fn deserialize(&self, bundle: &ContextBundle, reuse: bool) -> Result<Option<Value>, VmError> {
        let program: Value = serde_json::from_slice(bundle.bytes())
            .map_err(|err| VmError::DeSerialize(err.to_string()))?;
        if reuse {
            self.merge_functions(&program);
            return Ok(Some(program.get("exports").cloned().unwrap_or(Value::Null)));
        }
        let mut inner = self.inner.lock();
        inner.state.program = program;
        inner.state.deserialized = true;
        Ok(None)
    }

    fn execute(&self) -> Result<(), VmError> {
        if !self.inner.lock().state.deserialized {
            return Err(VmError::Execute("no program loaded".to_string()));
        }
        if self.throws("execute") {
            return Err(VmError::Execute("program threw during execution".to_string()));
        }
        self.inner.lock().state.executed = true;
        Ok(())
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, VmError> {
        self.inner.lock().calls.push((name.to_string(), args.to_vec()));
        if self.throws(name) {
            return Err(VmError::Call {
                name: name.to_string(),
                message: "function threw".to_string(),
            });
        }
        match name {
            "renderPage" | "$createPage0" => self.render_page(name, args),
            "updatePage" => self.update_page(name, args),
            _ if name.starts_with("$renderPage") => self.render_page(name, args),
            _ if name.starts_with("$updatePage") => self.update_page(name, args),
            "processData" => Ok(self.process_data(args)),
            "removeComponents" => {
                if let Ok(elements) = self.elements(name) {
                    elements.clear();
                }
                self.inner.lock().bindings.clear();
                Ok(Value::Null)
            }
            "updateGlobalProps" => {
                let props = args.first().cloned().unwrap_or(Value::Null);
                self.inner
                    .lock()
                    .state
                    .top_level
                    .insert("__globalProps".to_string(), props);
                Ok(Value::Null)
            }
            _ => Ok(self
                .inner
                .lock()
                .state
                .program
                .get("functions")
                .and_then(|functions| functions.get(name))
                .cloned()
                .unwrap_or(Value::Null)),
        }
    }

    fn has_global(&self, name: &str) -> bool {
        self.inner
            .lock()
            .state
            .program
            .get("functions")
            .is_some_and(|functions| functions.get(name).is_some())
    }

    fn set_property_to_lynx(&self, key: &str, value: Value) {
        self.inner
            .lock()
            .state
            .lynx_properties
            .insert(key.to_string(), value);
    }

    fn update_top_level_variable(&self, name: &str, value: Value) {
        self.inner
            .lock()
            .state
            .top_level
            .insert(name.to_string(), value);
    }

    fn apply_page_config(&self, config: &PageConfig) {
        self.inner.lock().state.circular_data_check = config.enable_circular_data_check;
    }

    fn eval_chunk(&self, name: &str, chunk: &ContextBundle) -> Result<Option<Value>, VmError> {
        log::debug!("declarative vm evaluating chunk {}", name);
        self.deserialize(chunk, true)
    }
}

/// Creates `DeclarativeVm`s and keeps a handle on each
#[derive(Default)]
pub struct DeclarativeVmFactory {
    created: AtomicUsize,
    contexts: Mutex<Vec<Arc<DeclarativeVm>>>,
}

impl DeclarativeVmFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn contexts(&self) -> Vec<Arc<DeclarativeVm>> {
        self.contexts.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<DeclarativeVm>> {
        self.contexts.lock().last().cloned()
    }
}

impl VmFactory for DeclarativeVmFactory {
    fn create_context(&self, quick: bool, disable_tracing_gc: bool) -> Result<Arc<dyn VmContext>, VmError> {
        log::trace!("create declarative vm quick={} no_gc={}", quick, disable_tracing_gc);
        let vm = Arc::new(DeclarativeVm::new(quick));
        self.created.fetch_add(1, Ordering::Relaxed);
        self.contexts.lock().push(vm.clone());
        Ok(vm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{PaintRecorder, PaintingPlatform};
    use crate::ui_queue::{SyncUiOperationQueue, UiOperationQueue};
    use pretty_assertions::assert_eq;

    fn program(value: Value) -> ContextBundle {
        ContextBundle::new(serde_json::to_vec(&value).unwrap())
    }

    fn attached_vm(program_value: Value) -> (DeclarativeVm, Arc<ElementManager>) {
        let queue: Arc<dyn UiOperationQueue> = Arc::new(SyncUiOperationQueue::new());
        let platform: Arc<dyn PaintingPlatform> = Arc::new(PaintRecorder::new());
        let elements = Arc::new(ElementManager::new(queue, platform));
        let vm = DeclarativeVm::new(true);
        vm.deserialize(&program(program_value), false).unwrap();
        vm.set_assembler(AssemblerHandle::new(1, &elements));
        (vm, elements)
    }

    #[test]
    fn test_interpolate() {
        let data = json!({"name": "lynx", "count": 3}).as_object().unwrap().clone();
        assert_eq!(interpolate("hi {{name}} x{{ count }}", &data), "hi lynx x3");
        assert_eq!(interpolate("{{missing}}!", &data), "!");
        assert_eq!(interpolate("open {{name", &data), "open {{name");
    }

    #[test]
    fn test_render_then_update() {
        let (vm, elements) = attached_vm(json!({
            "page": {"tag": "page", "children": [{"tag": "text", "text": "{{msg}}"}]}
        }));
        vm.call("renderPage", &[json!({"msg": "hello"}), json!({})]).unwrap();
        let root = elements.root().unwrap();
        let snapshot = elements.snapshot(root).unwrap();
        assert_eq!(snapshot.children[0].text.as_deref(), Some("hello"));

        vm.call("updatePage", &[json!({"msg": "bye"})]).unwrap();
        let snapshot = elements.snapshot(root).unwrap();
        assert_eq!(snapshot.children[0].text.as_deref(), Some("bye"));
    }

    #[test]
    fn test_process_data_applies_named_processor() {
        let (vm, _) = attached_vm(json!({"processors": {"p": {"tagged": true}}}));
        let out = vm.call("processData", &[json!({"a": 1}), json!("p")]).unwrap();
        assert_eq!(out, json!({"a": 1, "tagged": true}));
        let out = vm.call("processData", &[json!({"a": 1}), json!("")]).unwrap();
        assert_eq!(out, json!({"a": 1}));
        assert_eq!(vm.calls_named("processData").len(), 2);
    }

    #[test]
    fn test_execute_requires_program() {
        let vm = DeclarativeVm::new(false);
        assert!(matches!(vm.execute(), Err(VmError::Execute(_))));
        let broken = ContextBundle::new(b"{".to_vec());
        assert!(matches!(vm.deserialize(&broken, false), Err(VmError::DeSerialize(_))));
    }

    #[test]
    fn test_reuse_deserialize_keeps_root_program() {
        let (vm, _) = attached_vm(json!({"page": {"tag": "page"}}));
        let exports = vm
            .deserialize(&program(json!({"exports": {"v": 2}, "functions": {"f": 7}})), true)
            .unwrap();
        assert_eq!(exports, Some(json!({"v": 2})));
        assert!(vm.state().program.get("page").is_some());
        assert_eq!(vm.call("f", &[]).unwrap(), json!(7));
    }

    #[test]
    fn test_throwing_function() {
        let (vm, _) = attached_vm(json!({"throws": ["renderPage"]}));
        let err = vm.call("renderPage", &[]).unwrap_err();
        assert!(matches!(err, VmError::Call { .. }));
    }
}
