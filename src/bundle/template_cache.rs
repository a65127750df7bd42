//! Keyed caches for element templates and parsed styles
//!
//! Only the router is decoded with the bundle; each entry is decoded the
//! first time its key is requested.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::css::SharedCssFragment;
use crate::codec::decoder::SectionDecoder;
use crate::codec::stream::DecodeResult;

/// One node of a prebuilt element tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementNode {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementNode>,
}

impl ElementNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: ElementNode) -> Self {
        self.children.push(child);
        self
    }

    /// Number of nodes in this subtree
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(ElementNode::node_count).sum::<usize>()
    }
}

/// A compiled element template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementTemplateInfo {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub exist: bool,
    #[serde(default)]
    pub elements: Vec<ElementNode>,
}

/// Fragments parsed ahead of time for one template key
pub type ParsedStyles = BTreeMap<i32, SharedCssFragment>;

type DecodeFn<T> = fn(&SectionDecoder, &str, Range<usize>) -> DecodeResult<T>;

/// Lazily populated keyed cache
pub struct LazyKeyedCache<T> {
    router: BTreeMap<String, Range<usize>>,
    entries: Mutex<HashMap<String, Arc<T>>>,
    decoder: Option<SectionDecoder>,
    decode: Option<DecodeFn<T>>,
}

impl<T> Default for LazyKeyedCache<T> {
    fn default() -> Self {
        Self {
            router: BTreeMap::new(),
            entries: Mutex::new(HashMap::new()),
            decoder: None,
            decode: None,
        }
    }
}

impl<T> std::fmt::Debug for LazyKeyedCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyKeyedCache")
            .field("routed", &self.router.len())
            .field("decoded", &self.entries.lock().len())
            .finish()
    }
}

impl<T> LazyKeyedCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_router(
        router: BTreeMap<String, Range<usize>>,
        decoder: SectionDecoder,
        decode: DecodeFn<T>,
    ) -> Self {
        Self {
            router,
            entries: Mutex::new(HashMap::new()),
            decoder: Some(decoder),
            decode: Some(decode),
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: T) {
        self.entries.lock().insert(key.into(), Arc::new(value));
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.router.keys().cloned().collect();
        for key in self.entries.lock().keys() {
            if !self.router.contains_key(key) {
                keys.push(key.clone());
            }
        }
        keys.sort();
        keys
    }

    pub fn is_decoded(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn get(&self, key: &str) -> DecodeResult<Option<Arc<T>>> {
        if let Some(entry) = self.entries.lock().get(key) {
            return Ok(Some(entry.clone()));
        }
        let (Some(decoder), Some(decode), Some(range)) =
            (&self.decoder, self.decode, self.router.get(key))
        else {
            return Ok(None);
        };
        let value = Arc::new(decode(decoder, key, range.clone())?);
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert(value);
        Ok(Some(entry.clone()))
    }

    pub fn decode_all(&self) -> DecodeResult<()> {
        for key in self.router.keys() {
            self.get(key)?;
        }
        Ok(())
    }
}
