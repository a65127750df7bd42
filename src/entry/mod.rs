//! Binding of one bundle to one VM context
//!
//! A page has one card entry plus one entry per loaded lazy bundle. The
//! entry owns the VM; data it produced is declared first so it drops before
//! the context does.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::bundle::{ContextBundle, ElementTemplateInfo, JsContent, ParsedStyles, SharedCssFragment, TemplateBundle};
use crate::codec::{CompileOptions, ReaderOptions, TemplateBinaryReader, TemplateBundleRecycler};
use crate::config::PageConfig;
use crate::utils::error::{Result, TasmError, VmError};
use crate::value::TemplateData;
use crate::vm::{AssemblerHandle, ContextSource, GlobalContextPool, VmContext, VmFactory};

/// Name of the card entry
pub const DEFAULT_ENTRY_NAME: &str = "__Card__";

pub const PROCESS_EVAL_RESULT: &str = "processEvalResult";

/// Owner of the page-level config shared by the card and its lazy bundles
pub trait PageConfigger: Send + Sync {
    fn page_config(&self) -> Option<PageConfig>;
    fn set_page_config(&self, config: PageConfig);
}

#[derive(Debug, Default)]
pub struct PageConfigHolder {
    config: Mutex<Option<PageConfig>>,
}

impl PageConfigHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Edit the config in place; a default is created if none was set
    pub fn update<R>(&self, f: impl FnOnce(&mut PageConfig) -> R) -> R {
        let mut config = self.config.lock();
        f(config.get_or_insert_with(PageConfig::default))
    }
}

impl PageConfigger for PageConfigHolder {
    fn page_config(&self) -> Option<PageConfig> {
        self.config.lock().clone()
    }

    fn set_page_config(&self, config: PageConfig) {
        *self.config.lock() = Some(config);
    }
}

/// How an entry obtains its VM context
#[derive(Clone)]
pub struct VmProvider {
    pub factory: Arc<dyn VmFactory>,
    pub global_pool: Option<Arc<GlobalContextPool>>,
    pub disable_tracing_gc: bool,
}

impl VmProvider {
    pub fn new(factory: Arc<dyn VmFactory>) -> Self {
        Self {
            factory,
            global_pool: None,
            disable_tracing_gc: false,
        }
    }

    pub fn with_global_pool(mut self, pool: Arc<GlobalContextPool>) -> Self {
        self.global_pool = Some(pool);
        self
    }
}

pub struct TemplateEntry {
    name: String,
    init_data: Value,
    cache_data: Vec<TemplateData>,
    eval_result: Option<Value>,
    bundle: TemplateBundle,
    recycler: Option<TemplateBundleRecycler>,
    reuse_context: bool,
    vm_source: ContextSource,
    vm: Option<Arc<dyn VmContext>>,
}

impl std::fmt::Debug for TemplateEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEntry")
            .field("name", &self.name)
            .field("is_card", &self.is_card())
            .field("vm_source", &self.vm_source)
            .field("has_vm", &self.vm.is_some())
            .finish()
    }
}

impl TemplateEntry {
    /// Entry over an already decoded bundle
    pub fn with_bundle(name: impl Into<String>, bundle: TemplateBundle) -> Self {
        Self {
            name: name.into(),
            init_data: Value::Null,
            cache_data: Vec::new(),
            eval_result: None,
            bundle,
            recycler: None,
            reuse_context: false,
            vm_source: ContextSource::FromRuntime,
            vm: None,
        }
    }

    /// Decode `bytes` into a new entry
    pub fn from_binary(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>, options: ReaderOptions) -> Result<Self> {
        let name = name.into();
        let mut reader = TemplateBinaryReader::with_options(bytes, options);
        let bundle = reader.decode().map_err(|err| {
            log::error!("decode of {} failed: {}", name, reader.error_message());
            TasmError::Decode(err)
        })?;
        let mut entry = Self::with_bundle(name, bundle);
        entry.recycler = Some(reader.create_recycler());
        Ok(entry)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_card(&self) -> bool {
        self.bundle.is_card()
    }

    pub fn bundle(&self) -> &TemplateBundle {
        &self.bundle
    }

    pub fn bundle_mut(&mut self) -> &mut TemplateBundle {
        &mut self.bundle
    }

    pub fn compile_options(&self) -> &CompileOptions {
        self.bundle.compile_options()
    }

    pub fn vm(&self) -> Option<&Arc<dyn VmContext>> {
        self.vm.as_ref()
    }

    pub fn vm_source(&self) -> ContextSource {
        self.vm_source
    }

    pub fn is_reuse_context(&self) -> bool {
        self.reuse_context
    }

    pub fn init_data(&self) -> &Value {
        &self.init_data
    }

    pub fn set_init_data(&mut self, data: Value) {
        self.init_data = data;
    }

    pub fn cache_data(&self) -> &[TemplateData] {
        &self.cache_data
    }

    pub fn push_cache_data(&mut self, data: TemplateData) {
        self.cache_data.push(data);
    }

    pub fn eval_result(&self) -> Option<&Value> {
        self.eval_result.as_ref()
    }

    pub fn js_bundle(&self) -> &std::collections::BTreeMap<String, JsContent> {
        self.bundle.js_bundle()
    }

    /// Url the VM reports in stack traces
    pub fn debug_info_url(&self) -> String {
        let configured = &self.bundle.compile_options().template_debug_url;
        if !configured.is_empty() {
            return configured.clone();
        }
        format!("file://{}/main-thread.js", self.name)
    }

    fn vm_or_err(&self) -> Result<&Arc<dyn VmContext>> {
        self.vm
            .as_ref()
            .ok_or_else(|| TasmError::Protocol(format!("entry {} has no vm context", self.name)))
    }

    fn program(&self) -> Option<&ContextBundle> {
        self.bundle.context_bundle()
    }

    /// Bind the entry to a VM and publish or adopt the page config
    pub fn init_with_page_configger(
        &mut self,
        configger: &dyn PageConfigger,
        provider: &VmProvider,
        handle: AssemblerHandle,
        expect_card: bool,
    ) -> Result<PageConfig> {
        if self.is_card() != expect_card {
            return Err(TasmError::Protocol(format!(
                "bundle {} has app type {}, expected {}",
                self.name,
                self.bundle.app_type(),
                if expect_card { "card" } else { "dynamic_component" }
            )));
        }

        let config = if self.is_card() {
            let config = self.bundle.page_config().cloned().unwrap_or_default();
            configger.set_page_config(config.clone());
            config
        } else {
            configger.page_config().unwrap_or_default()
        };

        self.construct_context(provider, handle)?;

        let vm = self.vm_or_err()?;
        vm.apply_page_config(&config);
        if config.enable_binding_icu {
            vm.set_property_to_lynx("enableBindingICU", Value::Bool(true));
        }
        Ok(config)
    }

    /// Pick a context: local pool, then global pool, then a fresh one
    fn construct_context(&mut self, provider: &VmProvider, handle: AssemblerHandle) -> Result<()> {
        let quick = self.bundle.is_quick();
        let (vm, source) = if let Some(vm) = self.bundle.context_pool().and_then(|pool| pool.take()) {
            (vm, ContextSource::FromLocalPool)
        } else if let Some(vm) = provider
            .global_pool
            .as_ref()
            .filter(|_| quick && !provider.disable_tracing_gc)
            .and_then(|pool| pool.take())
        {
            (vm, ContextSource::FromGlobalPool)
        } else {
            let vm = provider.factory.create_context(quick, provider.disable_tracing_gc)?;
            (vm, ContextSource::FromRuntime)
        };
        log::debug!("entry {} uses a context from {}", self.name, source.as_str());

        if !source.is_prepared() {
            vm.set_sdk_version(&self.bundle.compile_options().target_sdk_version);
            vm.initialize()?;
            vm.register_builtin();
            vm.register_lynx();
        }
        vm.set_assembler(handle);
        vm.set_debug_info_url(&self.debug_info_url());
        if !source.is_prepared() {
            match self.program() {
                Some(program) => {
                    vm.deserialize(program, false)?;
                }
                None if self.is_card() => {
                    return Err(VmError::DeSerialize(format!("bundle {} carries no program", self.name)).into());
                }
                None => log::debug!("lazy bundle {} carries no program", self.name),
            }
        }
        self.vm = Some(vm);
        self.vm_source = source;
        Ok(())
    }

    /// Share the card's VM. The program is evaluated during deserialize and
    /// its result kept for `process_binary_eval_result`.
    pub fn init_with_reused_context(&mut self, root_vm: Arc<dyn VmContext>, handle: AssemblerHandle) -> Result<()> {
        root_vm.set_assembler(handle);
        root_vm.set_debug_info_url(&self.debug_info_url());
        if let Some(program) = self.program() {
            self.eval_result = root_vm.deserialize(program, true)?;
        }
        self.vm = Some(root_vm);
        self.reuse_context = true;
        Ok(())
    }

    pub fn execute(&mut self) -> Result<()> {
        if self.reuse_context {
            return Ok(());
        }
        if !self.is_card() && self.program().is_none() {
            return Ok(());
        }
        self.vm_or_err()?.execute()?;
        Ok(())
    }

    /// Hand the captured evaluation result to the running application
    pub fn process_binary_eval_result(&mut self) -> Result<Option<Value>> {
        let Some(result) = self.eval_result.take() else {
            return Ok(None);
        };
        let vm = self.vm_or_err()?;
        if !vm.has_global(PROCESS_EVAL_RESULT) {
            return Ok(Some(result));
        }
        let processed = vm.call(PROCESS_EVAL_RESULT, &[result, json!(self.name)])?;
        Ok(Some(processed))
    }

    /// Sub-bundles must agree with the card on how the page is built
    pub fn check_compatibility(&self, root: &CompileOptions) -> Result<()> {
        let own = self.bundle.compile_options();
        let mismatch = if own.radon_mode != root.radon_mode {
            Some(("radon mode", own.radon_mode.to_string(), root.radon_mode.to_string()))
        } else if own.front_end_dsl != root.front_end_dsl {
            Some(("front-end dsl", own.front_end_dsl.to_string(), root.front_end_dsl.to_string()))
        } else if own.arch_option != root.arch_option {
            Some(("arch option", format!("{:?}", own.arch_option), format!("{:?}", root.arch_option)))
        } else if own.enable_css_parser != root.enable_css_parser {
            Some((
                "css parser",
                own.enable_css_parser.to_string(),
                root.enable_css_parser.to_string(),
            ))
        } else {
            None
        };
        match mismatch {
            Some((what, own, root)) => Err(TasmError::Protocol(format!(
                "lazy bundle {} is incompatible with the page: {} is {} but the page uses {}",
                self.name, what, own, root
            ))),
            None => Ok(()),
        }
    }

    pub fn load_lepus_chunk(&self, name: &str) -> Result<Option<Value>> {
        let Some(chunk) = self.bundle.get_lepus_chunk(name)? else {
            return Ok(None);
        };
        Ok(self.vm_or_err()?.eval_chunk(name, &chunk)?)
    }

    pub fn template_bundle_recycler(&self) -> Option<&TemplateBundleRecycler> {
        self.recycler.as_ref()
    }

    /// Fully decoded copy of the bundle for other instances
    pub fn create_recycled_bundle(&self) -> Result<TemplateBundle> {
        match &self.recycler {
            Some(recycler) => Ok(recycler.complete_decode()?),
            None => {
                let copy = self.bundle.with_copied_css();
                copy.css_manager().decode_all()?;
                copy.lepus_chunk_manager().decode_all()?;
                copy.element_templates().decode_all()?;
                copy.parsed_styles().decode_all()?;
                Ok(copy)
            }
        }
    }

    /// Prebuilt page tree, when the bundle ships one
    pub fn try_get_element_cache(&self) -> Option<Arc<ElementTemplateInfo>> {
        if !self.bundle.contains_element_tree() {
            return None;
        }
        self.bundle.element_bundle().cloned()
    }

    pub fn get_element_template_info(&self, key: &str) -> Result<Option<Arc<ElementTemplateInfo>>> {
        Ok(self.bundle.get_element_template(key)?)
    }

    pub fn get_parsed_styles(&self, key: &str) -> Result<Option<Arc<ParsedStyles>>> {
        Ok(self.bundle.get_parsed_styles(key)?)
    }

    pub fn decode_css_fragment_by_id(&self, id: i32) -> Result<Option<Arc<SharedCssFragment>>> {
        Ok(self.bundle.css_manager().get_baked_fragment(id)?)
    }

    /// Publish global props and system info on the `lynx` object
    pub fn update_global_props_to_context(&self, props: &Value, system_info: &Value, post_before_update: bool) -> Result<()> {
        let vm = self.vm_or_err()?;
        vm.set_property_to_lynx("__globalProps", props.clone());
        vm.set_property_to_lynx("SystemInfo", system_info.clone());
        vm.set_property_to_lynx("triggerReadyWhenReload", Value::Bool(true));
        if post_before_update {
            vm.set_property_to_lynx("postDataBeforeUpdate", Value::Bool(true));
        }
        Ok(())
    }
}

impl Drop for TemplateEntry {
    fn drop(&mut self) {
        self.bundle.stop_async_decoding();
        log::trace!("entry {} released", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::section::ArchOption;
    use crate::codec::TemplateBinaryWriter;
    use crate::vm::{DeclarativeVmFactory, VmState};

    const PROGRAM: &[u8] = br#"{"page": {"tag": "page"}, "functions": {"processEvalResult": {"handled": true}}}"#;

    fn card_bytes(pool: bool) -> Vec<u8> {
        let options = CompileOptions {
            enable_use_context_pool: pool,
            target_sdk_version: "3.2".into(),
            ..CompileOptions::default()
        };
        TemplateBinaryWriter::card()
            .compile_options(options)
            .root_lepus(PROGRAM.to_vec())
            .encode()
    }

    fn provider(factory: &Arc<DeclarativeVmFactory>) -> VmProvider {
        VmProvider::new(factory.clone())
    }

    #[test]
    fn test_init_card_from_runtime() {
        let factory = Arc::new(DeclarativeVmFactory::new());
        let mut entry = TemplateEntry::from_binary(DEFAULT_ENTRY_NAME, card_bytes(false), ReaderOptions::default()).unwrap();
        let configger = PageConfigHolder::new();
        entry
            .init_with_page_configger(&configger, &provider(&factory), AssemblerHandle::default(), true)
            .unwrap();
        assert_eq!(entry.vm_source(), ContextSource::FromRuntime);
        assert!(configger.page_config().is_some());
        entry.execute().unwrap();

        let state = factory.last().unwrap().state();
        assert!(state.initialized && state.deserialized && state.executed);
        assert_eq!(state.sdk_version, "3.2");
        assert_eq!(state.debug_info_url, "file://__Card__/main-thread.js");
    }

    #[test]
    fn test_card_type_mismatch_rejected() {
        let factory = Arc::new(DeclarativeVmFactory::new());
        let mut entry = TemplateEntry::from_binary("x", card_bytes(false), ReaderOptions::default()).unwrap();
        let err = entry
            .init_with_page_configger(&PageConfigHolder::new(), &provider(&factory), AssemblerHandle::default(), false)
            .unwrap_err();
        assert!(matches!(err, TasmError::Protocol(_)));
        assert_eq!(factory.created(), 0);
    }

    #[test]
    fn test_local_pool_context_matches_fresh_one() {
        let factory = Arc::new(DeclarativeVmFactory::new());
        let mut pooled = TemplateEntry::from_binary(DEFAULT_ENTRY_NAME, card_bytes(true), ReaderOptions::default()).unwrap();
        pooled.bundle_mut().prepare_context_pool(factory.as_ref(), 1);
        pooled
            .init_with_page_configger(&PageConfigHolder::new(), &provider(&factory), AssemblerHandle::default(), true)
            .unwrap();
        assert_eq!(pooled.vm_source(), ContextSource::FromLocalPool);
        let pooled_state: VmState = factory.last().unwrap().state();

        let mut fresh = TemplateEntry::from_binary(DEFAULT_ENTRY_NAME, card_bytes(false), ReaderOptions::default()).unwrap();
        fresh
            .init_with_page_configger(&PageConfigHolder::new(), &provider(&factory), AssemblerHandle::default(), true)
            .unwrap();
        assert_eq!(fresh.vm_source(), ContextSource::FromRuntime);
        assert_eq!(factory.last().unwrap().state(), pooled_state);
    }

    #[test]
    fn test_global_pool_used_for_quick_bundles() {
        let factory = Arc::new(DeclarativeVmFactory::new());
        let pool = Arc::new(GlobalContextPool::new());
        pool.fill(factory.as_ref(), 1);
        let provider = provider(&factory).with_global_pool(pool.clone());
        let mut entry = TemplateEntry::from_binary(DEFAULT_ENTRY_NAME, card_bytes(false), ReaderOptions::default()).unwrap();
        entry
            .init_with_page_configger(&PageConfigHolder::new(), &provider, AssemblerHandle::default(), true)
            .unwrap();
        assert_eq!(entry.vm_source(), ContextSource::FromGlobalPool);
        assert!(pool.is_empty());
        // global contexts still go through the full init sequence
        let state = factory.contexts()[0].state();
        assert!(state.initialized && state.deserialized);
    }

    #[test]
    fn test_reused_context_captures_eval_result() {
        let factory = Arc::new(DeclarativeVmFactory::new());
        let mut card = TemplateEntry::from_binary(DEFAULT_ENTRY_NAME, card_bytes(false), ReaderOptions::default()).unwrap();
        let configger = PageConfigHolder::new();
        card.init_with_page_configger(&configger, &provider(&factory), AssemblerHandle::default(), true)
            .unwrap();

        let lazy = TemplateBinaryWriter::dynamic_component()
            .root_lepus(br#"{"exports": {"answer": 42}}"#.to_vec())
            .encode();
        let mut sub = TemplateEntry::from_binary("u://a", lazy, ReaderOptions::default()).unwrap();
        sub.init_with_reused_context(card.vm().unwrap().clone(), AssemblerHandle::default())
            .unwrap();
        assert!(sub.is_reuse_context());
        sub.execute().unwrap();
        assert_eq!(sub.eval_result(), Some(&json!({"answer": 42})));
        assert_eq!(sub.process_binary_eval_result().unwrap(), Some(json!({"handled": true})));
        assert_eq!(factory.created(), 1);
    }

    #[test]
    fn test_compatibility_check() {
        let entry = TemplateEntry::with_bundle("u://b", TemplateBundle::new());
        let mut root = CompileOptions::default();
        assert!(entry.check_compatibility(&root).is_ok());
        root.arch_option = ArchOption::Fiber;
        let err = entry.check_compatibility(&root).unwrap_err().to_string();
        assert!(err.contains("arch option"), "{}", err);
    }

    #[test]
    fn test_recycled_bundle_is_independent() {
        let entry = TemplateEntry::from_binary(DEFAULT_ENTRY_NAME, card_bytes(false), ReaderOptions::default()).unwrap();
        let recycled = entry.create_recycled_bundle().unwrap();
        assert!(recycled.is_card());
        assert!(!Arc::ptr_eq(recycled.css_manager(), entry.bundle().css_manager()));
    }
}
