//! Element tree and the element manager
//!
//! Elements live in an arena keyed by id. Children are owned by the arena
//! and parents are plain ids. Every mutation is mirrored into the UI
//! operation queue as a closure against the painting platform.

pub mod platform;

pub use platform::{PaintOp, PaintRecorder, PaintingPlatform};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::bundle::{ElementNode, ElementTemplateInfo};
use crate::ui_queue::UiOperationQueue;

pub type ElementId = u32;

/// Attribute prefix naming an event handler, e.g. `bindtap`
pub const EVENT_BINDING_PREFIX: &str = "bind";
pub const TEXT_ATTRIBUTE: &str = "text";

#[derive(Debug, Clone)]
struct ElementData {
    tag: String,
    attributes: Map<String, Value>,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
}

#[derive(Debug, Default)]
struct ElementTree {
    nodes: HashMap<ElementId, ElementData>,
    next_id: ElementId,
    root: Option<ElementId>,
}

impl ElementTree {
    fn collect_subtree(&self, id: ElementId, out: &mut Vec<ElementId>) {
        if let Some(node) = self.nodes.get(&id) {
            for child in &node.children {
                self.collect_subtree(*child, out);
            }
            out.push(id);
        }
    }

    fn snapshot(&self, id: ElementId) -> Option<ElementNode> {
        let node = self.nodes.get(&id)?;
        let mut attributes = node.attributes.clone();
        let text = attributes
            .remove(TEXT_ATTRIBUTE)
            .and_then(|value| value.as_str().map(str::to_string));
        Some(ElementNode {
            tag: node.tag.clone(),
            attributes,
            text,
            children: node
                .children
                .iter()
                .filter_map(|child| self.snapshot(*child))
                .collect(),
        })
    }
}

/// Screen and font metrics the engine renders against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvConfig {
    pub screen_width: f64,
    pub screen_height: f64,
    pub font_scale: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            screen_width: 0.0,
            screen_height: 0.0,
            font_scale: 1.0,
            viewport_width: 0.0,
            viewport_height: 0.0,
        }
    }
}

pub struct ElementManager {
    tree: Mutex<ElementTree>,
    queue: Arc<dyn UiOperationQueue>,
    platform: Arc<dyn PaintingPlatform>,
    env: Mutex<EnvConfig>,
}

impl std::fmt::Debug for ElementManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementManager")
            .field("elements", &self.tree.lock().nodes.len())
            .finish()
    }
}

impl ElementManager {
    pub fn new(queue: Arc<dyn UiOperationQueue>, platform: Arc<dyn PaintingPlatform>) -> Self {
        Self {
            tree: Mutex::new(ElementTree::default()),
            queue,
            platform,
            env: Mutex::new(EnvConfig::default()),
        }
    }

    pub fn queue(&self) -> &Arc<dyn UiOperationQueue> {
        &self.queue
    }

    fn enqueue(&self, op: PaintOp) {
        let platform = self.platform.clone();
        self.queue.enqueue_ui_operation(Box::new(move || platform.apply(op)));
    }

    pub fn create_element(&self, tag: &str) -> ElementId {
        let id = {
            let mut tree = self.tree.lock();
            tree.next_id += 1;
            let id = tree.next_id;
            tree.nodes.insert(
                id,
                ElementData {
                    tag: tag.to_string(),
                    attributes: Map::new(),
                    parent: None,
                    children: Vec::new(),
                },
            );
            id
        };
        self.enqueue(PaintOp::Create {
            id,
            tag: tag.to_string(),
        });
        id
    }

    pub fn set_attribute(&self, id: ElementId, key: &str, value: Value) -> bool {
        {
            let mut tree = self.tree.lock();
            let Some(node) = tree.nodes.get_mut(&id) else {
                return false;
            };
            if node.attributes.get(key) == Some(&value) {
                return true;
            }
            node.attributes.insert(key.to_string(), value.clone());
        }
        self.enqueue(PaintOp::Update {
            id,
            key: key.to_string(),
            value,
        });
        true
    }

    pub fn set_text(&self, id: ElementId, text: &str) -> bool {
        self.set_attribute(id, TEXT_ATTRIBUTE, Value::String(text.to_string()))
    }

    pub fn attribute(&self, id: ElementId, key: &str) -> Option<Value> {
        self.tree.lock().nodes.get(&id)?.attributes.get(key).cloned()
    }

    pub fn append_child(&self, parent: ElementId, child: ElementId) -> bool {
        let index = {
            let mut tree = self.tree.lock();
            if !tree.nodes.contains_key(&child) {
                return false;
            }
            let Some(parent_node) = tree.nodes.get_mut(&parent) else {
                return false;
            };
            parent_node.children.push(child);
            let index = parent_node.children.len() - 1;
            if let Some(child_node) = tree.nodes.get_mut(&child) {
                child_node.parent = Some(parent);
            }
            index
        };
        self.enqueue(PaintOp::Insert {
            parent,
            child,
            index,
        });
        true
    }

    /// Detach `child` and destroy its subtree
    pub fn remove_child(&self, parent: ElementId, child: ElementId) -> bool {
        let removed = {
            let mut tree = self.tree.lock();
            let Some(parent_node) = tree.nodes.get_mut(&parent) else {
                return false;
            };
            let before = parent_node.children.len();
            parent_node.children.retain(|id| *id != child);
            if parent_node.children.len() == before {
                return false;
            }
            let mut removed = Vec::new();
            tree.collect_subtree(child, &mut removed);
            for id in &removed {
                tree.nodes.remove(id);
            }
            removed
        };
        self.enqueue(PaintOp::Remove { parent, child });
        for id in removed {
            self.enqueue(PaintOp::Destroy { id });
        }
        true
    }

    pub fn set_root(&self, id: ElementId) {
        self.tree.lock().root = Some(id);
    }

    pub fn root(&self) -> Option<ElementId> {
        self.tree.lock().root
    }

    /// Drop the whole tree, e.g. before a reload
    pub fn clear(&self) {
        let removed = {
            let mut tree = self.tree.lock();
            let Some(root) = tree.root.take() else {
                return;
            };
            let mut removed = Vec::new();
            tree.collect_subtree(root, &mut removed);
            for id in &removed {
                tree.nodes.remove(id);
            }
            removed
        };
        for id in removed {
            self.enqueue(PaintOp::Destroy { id });
        }
    }

    /// Materialize a node and its descendants
    pub fn build_tree(&self, node: &ElementNode) -> ElementId {
        let id = self.create_element(&node.tag);
        for (key, value) in &node.attributes {
            self.set_attribute(id, key, value.clone());
        }
        if let Some(text) = &node.text {
            self.set_text(id, text);
        }
        for child in &node.children {
            let child_id = self.build_tree(child);
            self.append_child(id, child_id);
        }
        id
    }

    /// Attach a prebuilt element tree as the page root
    pub fn attach_template(&self, info: &ElementTemplateInfo) -> Option<ElementId> {
        if !info.exist {
            return None;
        }
        let mut roots = info.elements.iter();
        let page = roots.next()?;
        let root = self.build_tree(page);
        self.set_root(root);
        Some(root)
    }

    pub fn snapshot(&self, id: ElementId) -> Option<ElementNode> {
        self.tree.lock().snapshot(id)
    }

    pub fn element_count(&self) -> usize {
        self.tree.lock().nodes.len()
    }

    pub fn children(&self, id: ElementId) -> Vec<ElementId> {
        self.tree
            .lock()
            .nodes
            .get(&id)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    /// First element whose attribute `key` equals `value`
    pub fn find_by_attribute(&self, key: &str, value: &Value) -> Option<ElementId> {
        let tree = self.tree.lock();
        let mut ids: Vec<_> = tree.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .find(|id| tree.nodes.get(id).and_then(|node| node.attributes.get(key)) == Some(value))
    }

    /// Walk from `id` up to the root looking for a handler bound to `event`
    pub fn find_event_handler(&self, id: ElementId, event: &str) -> Option<(ElementId, String)> {
        let key = format!("{}{}", EVENT_BINDING_PREFIX, event);
        let tree = self.tree.lock();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = tree.nodes.get(&current)?;
            if let Some(Value::String(handler)) = node.attributes.get(&key) {
                return Some((current, handler.clone()));
            }
            cursor = node.parent;
        }
        None
    }

    pub fn env(&self) -> EnvConfig {
        *self.env.lock()
    }

    pub fn set_screen_metrics(&self, width: f64, height: f64) {
        let mut env = self.env.lock();
        env.screen_width = width;
        env.screen_height = height;
    }

    pub fn set_font_scale(&self, scale: f64) {
        self.env.lock().font_scale = scale;
    }

    pub fn set_viewport(&self, width: f64, height: f64) {
        let mut env = self.env.lock();
        env.viewport_width = width;
        env.viewport_height = height;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui_queue::SyncUiOperationQueue;
    use serde_json::json;

    fn manager() -> (ElementManager, Arc<PaintRecorder>) {
        let recorder = Arc::new(PaintRecorder::new());
        let queue = Arc::new(SyncUiOperationQueue::new());
        (ElementManager::new(queue, recorder.clone()), recorder)
    }

    #[test]
    fn test_mutations_reach_platform_on_flush() {
        let (elements, recorder) = manager();
        let page = elements.create_element("page");
        let text = elements.create_element("text");
        elements.set_text(text, "hello");
        elements.append_child(page, text);
        assert!(recorder.ops().is_empty());
        assert_eq!(elements.queue().flush(), 4);
        assert_eq!(
            recorder.ops(),
            vec![
                PaintOp::Create { id: page, tag: "page".into() },
                PaintOp::Create { id: text, tag: "text".into() },
                PaintOp::Update { id: text, key: "text".into(), value: json!("hello") },
                PaintOp::Insert { parent: page, child: text, index: 0 },
            ]
        );
    }

    #[test]
    fn test_remove_child_destroys_subtree() {
        let (elements, recorder) = manager();
        let node = ElementNode::new("view").with_child(ElementNode::new("text").with_text("a"));
        let page = elements.create_element("page");
        let view = elements.build_tree(&node);
        elements.append_child(page, view);
        assert_eq!(elements.element_count(), 3);
        assert!(elements.remove_child(page, view));
        assert_eq!(elements.element_count(), 1);
        elements.queue().flush();
        let destroyed = recorder
            .ops()
            .into_iter()
            .filter(|op| matches!(op, PaintOp::Destroy { .. }))
            .count();
        assert_eq!(destroyed, 2);
    }

    #[test]
    fn test_snapshot_round_trips_template() {
        let (elements, _) = manager();
        let node = ElementNode::new("page").with_child(ElementNode::new("text").with_text("hello"));
        let info = ElementTemplateInfo {
            key: "main".into(),
            exist: true,
            elements: vec![node.clone()],
        };
        let root = elements.attach_template(&info).unwrap();
        assert_eq!(elements.root(), Some(root));
        assert_eq!(elements.snapshot(root), Some(node));
    }

    #[test]
    fn test_event_handler_bubbles_to_parent() {
        let (elements, _) = manager();
        let page = elements.create_element("page");
        let child = elements.create_element("view");
        elements.append_child(page, child);
        elements.set_attribute(page, "bindtap", json!("onTap"));
        assert_eq!(
            elements.find_event_handler(child, "tap"),
            Some((page, "onTap".to_string()))
        );
        assert_eq!(elements.find_event_handler(child, "scroll"), None);
    }
}
