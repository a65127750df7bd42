//! Event routing from the host into the page's scripts

use std::collections::HashMap;

use serde_json::{Value, json};

use crate::element::{ElementId, ElementManager};
use crate::utils::error::Result;
use crate::vm::VmContext;

/// Global events the main-thread script listens for
#[derive(Debug, Default)]
pub struct EventListenerMap {
    listeners: HashMap<String, Vec<String>>,
}

impl EventListenerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, handler: &str) {
        let handlers = self.listeners.entry(name.to_string()).or_default();
        if !handlers.iter().any(|existing| existing == handler) {
            handlers.push(handler.to_string());
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.listeners.remove(name).is_some()
    }

    pub fn handlers(&self, name: &str) -> &[String] {
        self.listeners.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.listeners.contains_key(name)
    }
}

/// Result of handing an event to the page
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub current_target: ElementId,
    pub handler: String,
    pub returned: Value,
}

/// Touch, custom and gesture dispatch. Air pages bind handlers on the target
/// only; other pages bubble to the nearest ancestor with a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchEventHandler {
    Bubbling,
    TargetOnly,
}

impl TouchEventHandler {
    pub fn for_air(is_air: bool) -> Self {
        if is_air { Self::TargetOnly } else { Self::Bubbling }
    }

    fn resolve(&self, elements: &ElementManager, target: ElementId, event: &str) -> Option<(ElementId, String)> {
        let found = elements.find_event_handler(target, event)?;
        match self {
            Self::Bubbling => Some(found),
            Self::TargetOnly => (found.0 == target).then_some(found),
        }
    }

    fn dispatch(
        &self,
        vm: &dyn VmContext,
        elements: &ElementManager,
        target: ElementId,
        event: &str,
        detail: Value,
    ) -> Result<Option<DispatchResult>> {
        let Some((current_target, handler)) = self.resolve(elements, target, event) else {
            log::trace!("no handler for {} on element {}", event, target);
            return Ok(None);
        };
        let payload = json!({
            "type": event,
            "target": target,
            "currentTarget": current_target,
            "detail": detail,
        });
        let returned = vm.call(&handler, &[payload])?;
        Ok(Some(DispatchResult {
            current_target,
            handler,
            returned,
        }))
    }

    pub fn handle_touch_event(
        &self,
        vm: &dyn VmContext,
        elements: &ElementManager,
        name: &str,
        target: ElementId,
        info: Value,
    ) -> Result<Option<DispatchResult>> {
        self.dispatch(vm, elements, target, name, info)
    }

    pub fn handle_custom_event(
        &self,
        vm: &dyn VmContext,
        elements: &ElementManager,
        name: &str,
        target: ElementId,
        params: Value,
        param_name: &str,
    ) -> Result<Option<DispatchResult>> {
        let detail = if param_name.is_empty() {
            params
        } else {
            json!({ param_name: params })
        };
        self.dispatch(vm, elements, target, name, detail)
    }

    pub fn handle_gesture_event(
        &self,
        vm: &dyn VmContext,
        elements: &ElementManager,
        target: ElementId,
        gesture_id: u32,
        name: &str,
        params: Value,
    ) -> Result<Option<DispatchResult>> {
        let detail = json!({ "gestureId": gesture_id, "params": params });
        self.dispatch(vm, elements, target, name, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::element::PaintRecorder;
    use crate::ui_queue::SyncUiOperationQueue;
    use crate::vm::{AssemblerHandle, DeclarativeVm};

    fn page() -> (Arc<ElementManager>, ElementId, ElementId) {
        let elements = Arc::new(ElementManager::new(
            Arc::new(SyncUiOperationQueue::default()),
            Arc::new(PaintRecorder::new()),
        ));
        let root = elements.create_element("page");
        elements.set_attribute(root, "bindtap", json!("onTap"));
        let child = elements.create_element("view");
        elements.append_child(root, child);
        elements.set_root(root);
        (elements, root, child)
    }

    #[test]
    fn test_listener_map_dedups() {
        let mut map = EventListenerMap::new();
        map.add("exposure", "onExposure");
        map.add("exposure", "onExposure");
        assert_eq!(map.handlers("exposure"), ["onExposure".to_string()]);
        assert!(map.remove("exposure"));
        assert!(map.handlers("exposure").is_empty());
    }

    #[test]
    fn test_touch_event_bubbles() {
        let (elements, root, child) = page();
        let vm = DeclarativeVm::new(true);
        vm.set_assembler(AssemblerHandle::new(1, &elements));
        let result = TouchEventHandler::Bubbling
            .handle_touch_event(&vm, &elements, "tap", child, json!({"x": 1}))
            .unwrap()
            .unwrap();
        assert_eq!(result.current_target, root);
        assert_eq!(result.handler, "onTap");
        let calls = vm.calls_named("onTap");
        assert_eq!(calls[0][0]["target"], json!(child));
    }

    #[test]
    fn test_air_handler_does_not_bubble() {
        let (elements, root, child) = page();
        let vm = DeclarativeVm::new(true);
        let handler = TouchEventHandler::for_air(true);
        assert!(handler
            .handle_touch_event(&vm, &elements, "tap", child, Value::Null)
            .unwrap()
            .is_none());
        assert!(handler
            .handle_touch_event(&vm, &elements, "tap", root, Value::Null)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_custom_event_wraps_params() {
        let (elements, root, _) = page();
        elements.set_attribute(root, "bindchange", json!("onChange"));
        let vm = DeclarativeVm::new(true);
        TouchEventHandler::Bubbling
            .handle_custom_event(&vm, &elements, "change", root, json!(5), "value")
            .unwrap();
        assert_eq!(vm.calls_named("onChange")[0][0]["detail"], json!({"value": 5}));
    }
}
