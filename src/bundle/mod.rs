//! In-memory template bundle
//!
//! A `TemplateBundle` is produced by the binary reader section by section.
//! Cloning is shallow: the CSS manager, chunk manager and template caches
//! are shared between clones.

pub mod chunk;
pub mod css;
pub mod mould;
pub mod template_cache;

pub use chunk::LepusChunkManager;
pub use css::{CssParseToken, CssStyleSheetManager, SelectorCategory, SharedCssFragment};
pub use mould::{ComponentMould, DynamicComponentMould, JsContent, PageMould};
pub use template_cache::{ElementNode, ElementTemplateInfo, LazyKeyedCache, ParsedStyles};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::codec::header::CompileOptions;
use crate::codec::section::{APP_TYPE_CARD, MAGIC_QUICK};
use crate::codec::stream::DecodeResult;
use crate::config::{PageConfig, ThemedTrans};
use crate::vm::{ContextPool, VmFactory};

/// Serialized VM image: the root program or a named chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBundle {
    bytes: Arc<[u8]>,
}

impl ContextBundle {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A decoded bundle
#[derive(Debug, Clone, Default)]
pub struct TemplateBundle {
    pub(crate) magic: u32,
    pub(crate) total_size: usize,
    pub(crate) app_type: String,
    pub(crate) app_name: String,
    pub(crate) legacy_version: String,
    pub(crate) compile_options: CompileOptions,
    pub(crate) support_component_js: bool,
    pub(crate) template_info: Option<Value>,
    pub(crate) trial_options: Option<Value>,
    pub(crate) string_pool: Arc<Vec<String>>,
    pub(crate) css: Arc<CssStyleSheetManager>,
    pub(crate) js_bundle: BTreeMap<String, JsContent>,
    pub(crate) page_config: Option<PageConfig>,
    pub(crate) context_bundle: Option<ContextBundle>,
    pub(crate) lepus_chunks: Arc<LepusChunkManager>,
    pub(crate) element_templates: Arc<LazyKeyedCache<ElementTemplateInfo>>,
    pub(crate) parsed_styles: Arc<LazyKeyedCache<ParsedStyles>>,
    pub(crate) custom_sections: Map<String, Value>,
    pub(crate) page_moulds: BTreeMap<u32, PageMould>,
    pub(crate) component_moulds: BTreeMap<u32, ComponentMould>,
    pub(crate) dynamic_component_moulds: BTreeMap<u32, DynamicComponentMould>,
    pub(crate) dynamic_component_declarations: BTreeMap<String, String>,
    pub(crate) themed: Option<ThemedTrans>,
    pub(crate) app_descriptor: Value,
    pub(crate) element_bundle: Option<Arc<ElementTemplateInfo>>,
    pub(crate) context_pool: Option<Arc<ContextPool>>,
}

impl TemplateBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_card(&self) -> bool {
        self.app_type == APP_TYPE_CARD
    }

    pub fn app_type(&self) -> &str {
        &self.app_type
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Bundle was compiled for the modern VM dialect
    pub fn is_quick(&self) -> bool {
        self.magic == MAGIC_QUICK
    }

    pub fn compile_options(&self) -> &CompileOptions {
        &self.compile_options
    }

    pub fn support_component_js(&self) -> bool {
        self.support_component_js
    }

    pub fn template_info(&self) -> Option<&Value> {
        self.template_info.as_ref()
    }

    pub fn string_pool(&self) -> &[String] {
        &self.string_pool
    }

    pub fn css_manager(&self) -> &Arc<CssStyleSheetManager> {
        &self.css
    }

    pub fn get_css_fragment(&self, id: i32) -> DecodeResult<Option<Arc<SharedCssFragment>>> {
        self.css.get_fragment(id)
    }

    pub fn js_bundle(&self) -> &BTreeMap<String, JsContent> {
        &self.js_bundle
    }

    /// Total script payload size
    pub fn js_size(&self) -> usize {
        self.js_bundle.values().map(JsContent::len).sum()
    }

    pub fn page_config(&self) -> Option<&PageConfig> {
        self.page_config.as_ref()
    }

    pub fn context_bundle(&self) -> Option<&ContextBundle> {
        self.context_bundle.as_ref()
    }

    pub fn lepus_chunk_manager(&self) -> &Arc<LepusChunkManager> {
        &self.lepus_chunks
    }

    pub fn get_lepus_chunk(&self, name: &str) -> DecodeResult<Option<Arc<ContextBundle>>> {
        self.lepus_chunks.get_chunk(name)
    }

    pub fn get_element_template(&self, key: &str) -> DecodeResult<Option<Arc<ElementTemplateInfo>>> {
        self.element_templates.get(key)
    }

    pub fn element_templates(&self) -> &LazyKeyedCache<ElementTemplateInfo> {
        &self.element_templates
    }

    pub fn get_parsed_styles(&self, key: &str) -> DecodeResult<Option<Arc<ParsedStyles>>> {
        self.parsed_styles.get(key)
    }

    pub fn parsed_styles(&self) -> &LazyKeyedCache<ParsedStyles> {
        &self.parsed_styles
    }

    pub fn custom_sections(&self) -> &Map<String, Value> {
        &self.custom_sections
    }

    /// A custom section by key, or null
    pub fn get_custom_section(&self, key: &str) -> Value {
        self.custom_sections.get(key).cloned().unwrap_or(Value::Null)
    }

    pub fn page_moulds(&self) -> &BTreeMap<u32, PageMould> {
        &self.page_moulds
    }

    pub fn component_moulds(&self) -> &BTreeMap<u32, ComponentMould> {
        &self.component_moulds
    }

    pub fn dynamic_component_moulds(&self) -> &BTreeMap<u32, DynamicComponentMould> {
        &self.dynamic_component_moulds
    }

    pub fn dynamic_component_declarations(&self) -> &BTreeMap<String, String> {
        &self.dynamic_component_declarations
    }

    pub fn add_dynamic_component_declaration(&mut self, name: &str, url: &str) {
        self.dynamic_component_declarations
            .insert(name.to_string(), url.to_string());
    }

    pub fn themed(&self) -> Option<&ThemedTrans> {
        self.themed.as_ref()
    }

    pub fn app_descriptor(&self) -> &Value {
        &self.app_descriptor
    }

    /// Attach a prebuilt element tree for first-screen reuse
    pub fn set_element_bundle(&mut self, tree: ElementTemplateInfo) {
        self.element_bundle = Some(Arc::new(tree));
    }

    pub fn element_bundle(&self) -> Option<&Arc<ElementTemplateInfo>> {
        self.element_bundle.as_ref()
    }

    pub fn contains_element_tree(&self) -> bool {
        self.element_bundle.as_ref().is_some_and(|tree| tree.exist)
    }

    pub fn enable_use_context_pool(&self) -> bool {
        self.compile_options.enable_use_context_pool
            || self
                .page_config
                .as_ref()
                .is_some_and(|config| config.enable_use_context_pool)
    }

    pub fn context_pool(&self) -> Option<&Arc<ContextPool>> {
        self.context_pool.as_ref()
    }

    /// Pre-warm `count` contexts deserialized from this bundle
    pub fn prepare_context_pool(&mut self, factory: &dyn VmFactory, count: usize) {
        if !self.enable_use_context_pool() || count == 0 {
            return;
        }
        let Some(context_bundle) = &self.context_bundle else {
            return;
        };
        let pool = ContextPool::new(count);
        pool.warm(
            factory,
            self.is_quick(),
            &self.compile_options.target_sdk_version,
            context_bundle,
        );
        self.context_pool = Some(Arc::new(pool));
    }

    /// Stop async decoders working on this bundle
    pub fn stop_async_decoding(&self) {
        self.css.set_thread_stop_flag(true);
        self.lepus_chunks.set_thread_stop_flag(true);
    }

    /// Copy with an independent CSS manager holding the fragments decoded
    /// so far
    pub fn with_copied_css(&self) -> Self {
        let mut copy = self.clone();
        copy.css = Arc::new(CssStyleSheetManager::copy_from(&self.css));
        copy
    }
}
