//! Stylesheet fragments and the shared fragment manager
//!
//! Fragments are decoded greedily, lazily on first lookup, or on the
//! concurrent worker pool. The manager's fragment map and decoded set share
//! one lock; async decoders poll `stop_thread` between fragments.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::codec::decoder::SectionDecoder;
use crate::codec::stream::DecodeResult;
use crate::thread::WorkerPool;

/// Property id -> value
pub type StyleMap = BTreeMap<u32, Value>;

/// One selector and its declarations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CssParseToken {
    pub selector: String,
    pub attributes: StyleMap,
}

impl CssParseToken {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            attributes: StyleMap::new(),
        }
    }

    pub fn with_attribute(mut self, property: u32, value: Value) -> Self {
        self.attributes.insert(property, value);
        self
    }
}

/// Selector buckets used for matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SelectorCategory {
    Id,
    Class,
    Tag,
    Universal,
    Pseudo,
    ChildPseudo,
    Cascade,
}

impl SelectorCategory {
    pub fn classify(selector: &str) -> Self {
        let selector = selector.trim();
        if selector.contains(' ') || selector.contains('>') {
            SelectorCategory::Cascade
        } else if selector.contains("::") {
            SelectorCategory::ChildPseudo
        } else if selector.contains(':') {
            SelectorCategory::Pseudo
        } else if selector.starts_with('#') {
            SelectorCategory::Id
        } else if selector.starts_with('.') {
            SelectorCategory::Class
        } else if selector == "*" {
            SelectorCategory::Universal
        } else {
            SelectorCategory::Tag
        }
    }
}

/// A decoded stylesheet fragment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedCssFragment {
    id: i32,
    dependent_ids: Vec<i32>,
    rules: BTreeMap<SelectorCategory, BTreeMap<String, CssParseToken>>,
    rule_set: Vec<String>,
    keyframes: BTreeMap<String, Value>,
    font_faces: BTreeMap<String, Value>,
    baked: bool,
}

impl SharedCssFragment {
    pub fn new(id: i32, dependent_ids: Vec<i32>) -> Self {
        Self {
            id,
            dependent_ids,
            ..Default::default()
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn dependent_ids(&self) -> &[i32] {
        &self.dependent_ids
    }

    /// Add a rule; a repeated selector merges its declarations
    pub fn add_rule(&mut self, token: CssParseToken) {
        let category = SelectorCategory::classify(&token.selector);
        let bucket = self.rules.entry(category).or_default();
        match bucket.get_mut(&token.selector) {
            Some(existing) => existing.attributes.extend(token.attributes),
            None => {
                self.rule_set.push(token.selector.clone());
                bucket.insert(token.selector.clone(), token);
            }
        }
    }

    pub fn add_keyframes(&mut self, name: impl Into<String>, frames: Value) {
        self.keyframes.insert(name.into(), frames);
    }

    pub fn add_font_face(&mut self, family: impl Into<String>, face: Value) {
        self.font_faces.insert(family.into(), face);
    }

    pub fn rules(&self, category: SelectorCategory) -> Option<&BTreeMap<String, CssParseToken>> {
        self.rules.get(&category)
    }

    pub fn find_rule(&self, selector: &str) -> Option<&CssParseToken> {
        self.rules
            .get(&SelectorCategory::classify(selector))?
            .get(selector)
    }

    /// Selectors in declaration order
    pub fn rule_set(&self) -> &[String] {
        &self.rule_set
    }

    pub fn rule_count(&self) -> usize {
        self.rule_set.len()
    }

    pub fn keyframes(&self) -> &BTreeMap<String, Value> {
        &self.keyframes
    }

    pub fn font_faces(&self) -> &BTreeMap<String, Value> {
        &self.font_faces
    }

    pub fn is_baked(&self) -> bool {
        self.baked
    }

    pub fn mark_baked(&mut self) {
        self.baked = true;
    }

    /// Merge rules from an imported fragment. Own declarations win, so
    /// importing the same fragment twice leaves the result unchanged.
    pub fn import_other_fragment(&mut self, other: &SharedCssFragment) {
        for selector in &other.rule_set {
            let Some(token) = other.find_rule(selector) else {
                continue;
            };
            let category = SelectorCategory::classify(selector);
            let bucket = self.rules.entry(category).or_default();
            match bucket.get_mut(selector) {
                Some(existing) => {
                    for (property, value) in &token.attributes {
                        existing
                            .attributes
                            .entry(*property)
                            .or_insert_with(|| value.clone());
                    }
                }
                None => {
                    self.rule_set.push(selector.clone());
                    bucket.insert(selector.clone(), token.clone());
                }
            }
        }
        for (name, frames) in &other.keyframes {
            self.keyframes
                .entry(name.clone())
                .or_insert_with(|| frames.clone());
        }
        for (family, face) in &other.font_faces {
            self.font_faces
                .entry(family.clone())
                .or_insert_with(|| face.clone());
        }
    }
}

#[derive(Debug, Default)]
struct CssState {
    fragments: HashMap<i32, Arc<SharedCssFragment>>,
    decoded: HashSet<i32>,
}

/// Owner of every fragment in a bundle
#[derive(Debug, Default)]
pub struct CssStyleSheetManager {
    route: BTreeMap<i32, Range<usize>>,
    state: Mutex<CssState>,
    decoder: Option<SectionDecoder>,
    stop_thread: AtomicBool,
}

impl CssStyleSheetManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager that can decode fragments listed in `route`
    pub fn with_route(route: BTreeMap<i32, Range<usize>>, decoder: SectionDecoder) -> Self {
        Self {
            route,
            decoder: Some(decoder),
            ..Default::default()
        }
    }

    /// Snapshot of the fragments decoded so far, without a decoder
    pub fn copy_from(other: &CssStyleSheetManager) -> Self {
        let state = other.state.lock();
        Self {
            route: BTreeMap::new(),
            state: Mutex::new(CssState {
                fragments: state.fragments.clone(),
                decoded: state.decoded.clone(),
            }),
            decoder: None,
            stop_thread: AtomicBool::new(false),
        }
    }

    pub fn insert(&self, fragment: SharedCssFragment) {
        let mut state = self.state.lock();
        state.decoded.insert(fragment.id());
        state.fragments.insert(fragment.id(), Arc::new(fragment));
    }

    /// Route ids, including fragments not decoded yet
    pub fn fragment_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.route.keys().copied().collect();
        let state = self.state.lock();
        ids.extend(
            state
                .fragments
                .keys()
                .filter(|id| !self.route.contains_key(*id)),
        );
        ids.sort_unstable();
        ids
    }

    pub fn is_decoded(&self, id: i32) -> bool {
        self.state.lock().decoded.contains(&id)
    }

    pub fn decoded_count(&self) -> usize {
        self.state.lock().decoded.len()
    }

    /// Look up a fragment, decoding it on first access
    pub fn get_fragment(&self, id: i32) -> DecodeResult<Option<Arc<SharedCssFragment>>> {
        if let Some(fragment) = self.state.lock().fragments.get(&id) {
            return Ok(Some(fragment.clone()));
        }
        let (Some(decoder), Some(range)) = (&self.decoder, self.route.get(&id)) else {
            return Ok(None);
        };
        let fragment = Arc::new(decoder.decode_css_fragment(range.clone())?);
        let mut state = self.state.lock();
        state.decoded.insert(id);
        let entry = state.fragments.entry(id).or_insert(fragment);
        Ok(Some(entry.clone()))
    }

    /// Fragment with its dependents merged in, cached after the first call
    pub fn get_baked_fragment(&self, id: i32) -> DecodeResult<Option<Arc<SharedCssFragment>>> {
        let Some(fragment) = self.get_fragment(id)? else {
            return Ok(None);
        };
        if fragment.is_baked() {
            return Ok(Some(fragment));
        }
        let mut baked = (*fragment).clone();
        let mut visited: HashSet<i32> = HashSet::from([id]);
        let mut pending: Vec<i32> = fragment.dependent_ids().to_vec();
        while let Some(dep_id) = pending.pop() {
            if !visited.insert(dep_id) {
                continue;
            }
            if let Some(dep) = self.get_fragment(dep_id)? {
                baked.import_other_fragment(&dep);
                pending.extend(dep.dependent_ids());
            } else {
                log::warn!("css fragment {} imports missing fragment {}", id, dep_id);
            }
        }
        baked.mark_baked();
        let baked = Arc::new(baked);
        self.state.lock().fragments.insert(id, baked.clone());
        Ok(Some(baked))
    }

    /// Decode every routed fragment on the calling thread
    pub fn decode_all(&self) -> DecodeResult<()> {
        for id in self.route.keys() {
            self.get_fragment(*id)?;
        }
        Ok(())
    }

    /// Decode remaining fragments on the worker pool
    pub fn start_async_decode(self: &Arc<Self>, pool: &WorkerPool) {
        let manager = Arc::clone(self);
        pool.post(move || {
            let decoded = manager.decode_all_async();
            log::debug!("async css decode finished, {} fragments", decoded);
        });
    }

    /// Body of the async decoder. Returns the number of fragments inserted.
    pub fn decode_all_async(&self) -> usize {
        let Some(decoder) = &self.decoder else {
            return 0;
        };
        let mut inserted = 0;
        for (id, range) in &self.route {
            if self.is_stopped() {
                return inserted;
            }
            if self.is_decoded(*id) {
                continue;
            }
            let fragment = match decoder.decode_css_fragment(range.clone()) {
                Ok(fragment) => fragment,
                Err(err) => {
                    log::error!("async decode of css fragment {} failed: {}", id, err);
                    return inserted;
                }
            };
            if self.is_stopped() {
                return inserted;
            }
            let mut state = self.state.lock();
            if state.decoded.insert(*id) {
                state.fragments.insert(*id, Arc::new(fragment));
                inserted += 1;
            }
        }
        inserted
    }

    pub fn set_thread_stop_flag(&self, stop: bool) {
        self.stop_thread.store(stop, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_thread.load(Ordering::Acquire)
    }
}
