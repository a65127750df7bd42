//! The template assembler
//!
//! Owns one page on the engine thread. It decodes the card bundle, binds it
//! to a VM, drives the load, update and reload pipelines, resolves lazy
//! bundles, and hands element mutations to the UI operation queue.

mod delegate;
mod events;
mod init_data;
mod lazy_bundle;
mod options;
mod page_proxy;
mod scope;

pub use delegate::{JsSourceBundle, LogDelegate, TemplateAssemblerDelegate};
pub use events::{DispatchResult, EventListenerMap, TouchEventHandler};
pub use init_data::merge_init_data;
pub use options::{CARD_COMPONENT_ID, LoadOptions, PipelineOptions, UpdateDataTask, UpdateDataType, UpdatePageOption};
pub use page_proxy::{GLOBAL_PROPS_KEY, PageProxy};
pub use scope::{ErrorPolicy, Scope};

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::bundle::TemplateBundle;
use crate::codec::section::{APP_TYPE_CARD, ArchOption};
use crate::codec::{CompileOptions, ReaderOptions};
use crate::config::{PageConfig, TasmConfig};
use crate::element::{ElementId, ElementManager, PaintingPlatform};
use crate::entry::{DEFAULT_ENTRY_NAME, PROCESS_EVAL_RESULT, PageConfigHolder, PageConfigger, TemplateEntry, VmProvider};
use crate::monitor::event_tracker::{EVENT_CREATE_MTS_CONTEXT, generic_key};
use crate::monitor::long_task::task_type;
use crate::monitor::timing::{self, TimingCollector};
use crate::monitor::{EventTracker, LongTaskMonitor, TrackedEvent};
use crate::resource::{LazyBundleLoader, ResourceLoader};
use crate::thread::WorkerPool;
use crate::ui_queue::{QueueStatus, UiOperationQueue};
use crate::utils::error::{DecodeError, ErrorStorage, LynxError, Result, TasmError};
use crate::utils::time::current_time_millis;
use crate::utils::version::CURRENT_ENGINE_VERSION;
use crate::value::{self, TemplateData};
use crate::vm::{AssemblerHandle, GlobalContextPool, VmContext, VmFactory};

/// Processor name script registers to override screen metrics
pub const SCREEN_METRICS_OVERRIDER: &str = "getScreenMetricsOverride";
/// Key marking a script update as a card config change
pub const CARD_CONFIG_KEY: &str = "__card_config_";
/// Key marking the update that completes the first meaningful paint
pub const ACTUAL_FIRST_SCREEN_KEY: &str = "__isActualFirstScreen";

const ACTUAL_FMP_END: &str = "actual_fmp_end";

/// Script functions that cannot be registered as data processors
const RESERVED_FUNCTIONS: &[&str] = &[
    "renderPage",
    "updatePage",
    "processData",
    "removeComponents",
    "updateGlobalProps",
    PROCESS_EVAL_RESULT,
];

/// How the card builds its element tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RenderArch {
    /// Page moulds driven through the page proxy
    #[default]
    Radon,
    /// Element construction inside the VM
    Fiber,
    /// Strict Air pages, no background script
    Air,
}

impl RenderArch {
    pub fn from_compile_options(options: &CompileOptions) -> Self {
        if options.is_air() {
            Self::Air
        } else if options.enable_fiber_arch || options.arch_option == ArchOption::Fiber {
            Self::Fiber
        } else {
            Self::Radon
        }
    }
}

/// Where the card comes from
enum CardSource {
    Binary { bytes: Vec<u8>, recycle: bool },
    Bundle(TemplateBundle),
}

/// Collaborators an assembler is built from
pub struct AssemblerParts {
    pub delegate: Arc<dyn TemplateAssemblerDelegate>,
    pub vm_factory: Arc<dyn VmFactory>,
    pub queue: Arc<dyn UiOperationQueue>,
    pub platform: Arc<dyn PaintingPlatform>,
    pub resource_loader: Arc<dyn ResourceLoader>,
    pub worker_pool: WorkerPool,
    pub global_pool: Option<Arc<GlobalContextPool>>,
    pub tracker: Arc<EventTracker>,
}

pub struct TemplateAssembler {
    instance_id: i32,
    config: TasmConfig,
    delegate: Arc<dyn TemplateAssemblerDelegate>,
    vm_provider: VmProvider,
    /// Page config published by the card, read by lazy bundles
    page_configger: Arc<PageConfigHolder>,
    entries: HashMap<String, TemplateEntry>,
    page_proxy: PageProxy,
    elements: Arc<ElementManager>,
    lazy_bundles: LazyBundleLoader,
    listeners: EventListenerMap,
    /// Created on the first event
    touch_handler: Option<TouchEventHandler>,
    arch: RenderArch,
    url: String,
    source_size: usize,
    global_props: Value,
    /// Host updates buffered before the first load
    cache_data: Vec<TemplateData>,
    i18n_resources: HashMap<String, Value>,
    font_scale: f64,
    ssr_data: Option<Vec<u8>>,
    is_loading_template: bool,
    template_loaded: bool,
    destroyed: bool,
    pre_painting: bool,
    enable_pre_update_data: bool,
    actual_fmp_end: u64,
    worker_pool: WorkerPool,
    timing: TimingCollector,
    tracker: Arc<EventTracker>,
}

impl std::fmt::Debug for TemplateAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateAssembler")
            .field("instance_id", &self.instance_id)
            .field("url", &self.url)
            .field("arch", &self.arch)
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .field("template_loaded", &self.template_loaded)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl TemplateAssembler {
    pub fn new(instance_id: i32, config: TasmConfig, parts: AssemblerParts) -> Self {
        let AssemblerParts {
            delegate,
            vm_factory,
            queue,
            platform,
            resource_loader,
            worker_pool,
            global_pool,
            tracker,
        } = parts;

        let reporter = delegate.clone();
        queue.set_error_callback(Arc::new(move |error| reporter.on_error_occurred(error)));

        let mut vm_provider = VmProvider::new(vm_factory);
        if let Some(pool) = global_pool {
            vm_provider = vm_provider.with_global_pool(pool);
        }
        vm_provider.disable_tracing_gc = config.disable_tracing_gc;

        log::info!("template assembler {} created", instance_id);
        Self {
            instance_id,
            config,
            delegate,
            vm_provider,
            page_configger: Arc::new(PageConfigHolder::new()),
            entries: HashMap::new(),
            page_proxy: PageProxy::new(),
            elements: Arc::new(ElementManager::new(queue, platform)),
            lazy_bundles: LazyBundleLoader::new(resource_loader, worker_pool.clone()),
            listeners: EventListenerMap::new(),
            touch_handler: None,
            arch: RenderArch::default(),
            url: String::new(),
            source_size: 0,
            global_props: Value::Null,
            cache_data: Vec::new(),
            i18n_resources: HashMap::new(),
            font_scale: 1.0,
            ssr_data: None,
            is_loading_template: false,
            template_loaded: false,
            destroyed: false,
            pre_painting: false,
            enable_pre_update_data: false,
            actual_fmp_end: 0,
            worker_pool,
            timing: TimingCollector::new(),
            tracker,
        }
    }

    pub fn instance_id(&self) -> i32 {
        self.instance_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn arch(&self) -> RenderArch {
        self.arch
    }

    pub fn is_template_loaded(&self) -> bool {
        self.template_loaded
    }

    pub fn is_loading_template(&self) -> bool {
        self.is_loading_template
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn global_props(&self) -> &Value {
        &self.global_props
    }

    pub fn font_scale(&self) -> f64 {
        self.font_scale
    }

    pub fn page_config(&self) -> Option<PageConfig> {
        self.page_configger.page_config()
    }

    pub fn elements(&self) -> &Arc<ElementManager> {
        &self.elements
    }

    pub fn page_proxy(&self) -> &PageProxy {
        &self.page_proxy
    }

    pub fn entry(&self, name: &str) -> Option<&TemplateEntry> {
        self.entries.get(name)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn lazy_bundles(&self) -> &LazyBundleLoader {
        &self.lazy_bundles
    }

    /// Host updates buffered while waiting for the first load
    pub fn pending_cache_data(&self) -> &[TemplateData] {
        &self.cache_data
    }

    /// Wall-clock millis of the first update flagged as the actual first screen
    pub fn actual_fmp_end(&self) -> u64 {
        self.actual_fmp_end
    }

    pub fn card_vm(&self) -> Option<Arc<dyn VmContext>> {
        self.card().and_then(|card| card.vm().cloned())
    }

    /// Buffer host updates that arrive before `load_template`
    pub fn set_enable_pre_update_data(&mut self, enable: bool) {
        self.enable_pre_update_data = enable;
    }

    pub fn set_default_global_props(&mut self, props: Value) {
        self.page_proxy.set_default_global_props(props);
    }

    /// Processor used for data that names none
    pub fn set_default_data_processor(&mut self, function: &str) {
        self.page_proxy.set_default_processor(function);
    }

    pub fn register_data_processor(&mut self, name: &str, function: &str) {
        self.page_proxy.register_processor(name, function);
    }

    fn card(&self) -> Option<&TemplateEntry> {
        self.entries.get(DEFAULT_ENTRY_NAME)
    }

    fn card_vm_or_err(&self) -> Result<Arc<dyn VmContext>> {
        self.card_vm()
            .ok_or_else(|| TasmError::Protocol("the card has no vm context".to_string()))
    }

    fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy {
            devtool_attached: self.config.devtool_attached,
            logbox_enabled: self.config.logbox_enabled,
        }
    }

    fn scope(&self) -> Scope {
        Scope::enter(&self.delegate, self.error_policy())
    }

    /// Hand `error` to the delegate now instead of through the scope's slot
    fn report_to_delegate(&self, error: LynxError) {
        if let Some(error) = self.error_policy().apply(error) {
            self.delegate.on_error_occurred(error);
        }
    }

    fn handle(&self) -> AssemblerHandle {
        AssemblerHandle::new(self.instance_id, &self.elements)
    }

    fn enable_js_data_process(&self) -> bool {
        self.page_configger
            .page_config()
            .is_some_and(|config| config.enable_js_data_process)
    }

    fn should_post_data_to_js(&self) -> bool {
        self.arch != RenderArch::Air
    }

    fn report(err: &TasmError, suggestion: &str) {
        log::error!("{}", err);
        let mut error = LynxError::from(err);
        if !suggestion.is_empty() {
            error = error.with_suggestion(suggestion);
        }
        ErrorStorage::set_error(error);
    }

    pub fn system_info(&self) -> Value {
        let env = self.elements.env();
        json!({
            "platform": std::env::consts::OS,
            "engineVersion": CURRENT_ENGINE_VERSION,
            "pixelWidth": env.screen_width,
            "pixelHeight": env.screen_height,
            "fontScale": self.font_scale,
        })
    }

    fn begin_pipeline(&self) {
        self.elements.queue().update_status(QueueStatus::Init);
    }

    /// Open both frame gates and flush what the pipeline produced
    fn flush_ui(&self) -> usize {
        let queue = self.elements.queue();
        queue.update_status(QueueStatus::TasmFinish);
        queue.update_status(QueueStatus::LayoutFinish);
        queue.flush()
    }

    fn finish_pipeline(&self, pipeline: &PipelineOptions) {
        let flushed = self.flush_ui();
        log::trace!("pipeline {} flushed {} ui operations", pipeline.pipeline_id, flushed);
        let marks = self.timing.take(&pipeline.pipeline_id);
        if !marks.is_empty() {
            self.delegate.set_timing(&pipeline.pipeline_id, marks);
        }
        self.tracker.flush();
    }

    fn mark(&self, pipeline: &PipelineOptions, name: &str) {
        self.timing.mark(&pipeline.pipeline_id, name);
    }

    // ---- load -----------------------------------------------------------

    /// Decode `bytes` as the card and render it. Returns false if the load
    /// failed; the error reaches the delegate when the call returns.
    pub fn load_template(&mut self, url: &str, bytes: Vec<u8>, data: Option<TemplateData>, options: LoadOptions) -> bool {
        let source = CardSource::Binary {
            bytes,
            recycle: options.recycle_bundle,
        };
        self.load_template_from(url, source, data, options)
    }

    /// Render a card that was decoded ahead of time
    pub fn load_template_bundle(
        &mut self,
        url: &str,
        bundle: TemplateBundle,
        data: Option<TemplateData>,
        options: LoadOptions,
    ) -> bool {
        self.load_template_from(url, CardSource::Bundle(bundle), data, options)
    }

    fn load_template_from(&mut self, url: &str, source: CardSource, data: Option<TemplateData>, options: LoadOptions) -> bool {
        if self.destroyed {
            return false;
        }
        let _scope = self.scope();
        let _long_task = LongTaskMonitor::scope(self.instance_id, task_type::TASM_TASK, "LoadTemplate", url);
        log::info!("load template {} (instance {})", url, self.instance_id);

        self.url = url.to_string();
        self.pre_painting = options.pre_painting;
        let pipeline = options.pipeline;
        let result = self.load_template_internal(source, data, &pipeline);
        self.cache_data.clear();
        match result {
            Ok(()) => true,
            Err(err) => {
                Self::report(&err, "Please check the bundle and the main thread script");
                self.is_loading_template = false;
                if !self.template_loaded {
                    self.entries.remove(DEFAULT_ENTRY_NAME);
                }
                false
            }
        }
    }

    fn load_template_internal(&mut self, source: CardSource, data: Option<TemplateData>, pipeline: &PipelineOptions) -> Result<()> {
        // 1. on load
        self.on_load_template(&source, pipeline)?;
        let js_posted_before_vm = data.is_none()
            && self.global_props.is_null()
            && value::is_empty(self.page_proxy.default_page_data());

        // 2. decode
        self.mark(pipeline, timing::PARSE_START);
        let config = self.decode_card(source)?;

        // 3. did decode
        self.did_decode_template(&config, js_posted_before_vm, pipeline);

        // 4. vm execute
        self.on_vm_execute(pipeline)?;

        // 5. did vm execute
        self.mark(pipeline, timing::VM_EXECUTE_END);
        self.delegate.on_page_config_decoded(&config);

        // 6. on render
        let data = self.on_render_template(data, js_posted_before_vm, pipeline)?;

        // 7. render
        self.render_template(&data, pipeline)?;

        // 8. did render
        if let Some(ssr) = self.ssr_data.take() {
            log::info!("hydrating {} bytes of server-rendered state", ssr.len());
        }
        self.template_loaded = true;

        // 9. did load
        if !self.pre_painting {
            self.delegate.on_native_app_ready();
        }
        self.delegate.on_template_loaded(&self.url);
        self.send_font_scale_changed(self.font_scale);
        self.is_loading_template = false;
        self.mark(pipeline, timing::LOAD_BUNDLE_END);
        self.finish_pipeline(pipeline);
        self.delegate.on_tasm_finish_by_native();
        log::info!("template {} loaded", self.url);
        Ok(())
    }

    fn on_load_template(&mut self, source: &CardSource, pipeline: &PipelineOptions) -> Result<()> {
        self.mark(pipeline, timing::LOAD_BUNDLE_START);
        if self.is_loading_template {
            return Err(TasmError::Render("LoadTemplate in another loading process".to_string()));
        }
        if self.template_loaded {
            return Err(TasmError::Protocol("LoadTemplate called twice on one instance".to_string()));
        }
        self.is_loading_template = true;
        self.begin_pipeline();

        self.source_size = match source {
            CardSource::Binary { bytes, .. } => bytes.len(),
            CardSource::Bundle(bundle) => bundle.total_size(),
        };
        self.tracker
            .update_generic_info(self.instance_id, generic_key::TEMPLATE_JS_SIZE, self.source_size);
        self.tracker
            .update_generic_info(self.instance_id, generic_key::URL, self.url.clone());

        let defaults = self.page_proxy.default_global_props();
        if !value::is_empty(defaults) {
            let mut merged = defaults.clone();
            value::merge(&mut merged, &self.global_props);
            self.global_props = merged;
        }
        Ok(())
    }

    fn decode_card(&mut self, source: CardSource) -> Result<PageConfig> {
        let mut entry = match source {
            CardSource::Binary { bytes, recycle } => {
                if bytes.is_empty() {
                    return Err(TasmError::Decode(DecodeError::Invalid(
                        "the template file size is 0. Maybe the device is not connected to the network.".to_string(),
                    )));
                }
                let options = ReaderOptions {
                    expected_app_type: Some(APP_TYPE_CARD.to_string()),
                    disable_lazy_css_decode: self.config.disable_lazy_css_decode,
                    force_greedy: false,
                    worker_pool: Some(self.worker_pool.clone()),
                };
                let entry = TemplateEntry::from_binary(DEFAULT_ENTRY_NAME, bytes, options)?;
                if recycle {
                    let mut recycled = entry.create_recycled_bundle()?;
                    if recycled.enable_use_context_pool() {
                        recycled.prepare_context_pool(self.vm_provider.factory.as_ref(), 1);
                    }
                    self.delegate.recycle_template_bundle(recycled);
                }
                entry
            }
            CardSource::Bundle(bundle) => TemplateEntry::with_bundle(DEFAULT_ENTRY_NAME, bundle),
        };

        let config = entry.init_with_page_configger(self.page_configger.as_ref(), &self.vm_provider, self.handle(), true)?;
        if self.config.report_mts_context_event {
            self.tracker.on_event(
                TrackedEvent::new(EVENT_CREATE_MTS_CONTEXT, self.instance_id)
                    .with_prop("source", entry.vm_source().as_str())
                    .with_prop("is_card", true),
            );
        }
        self.arch = RenderArch::from_compile_options(entry.compile_options());
        self.page_proxy.bind_bundle(entry.bundle());
        self.entries.insert(DEFAULT_ENTRY_NAME.to_string(), entry);
        Ok(config)
    }

    fn did_decode_template(&mut self, config: &PageConfig, js_posted_before_vm: bool, pipeline: &PipelineOptions) {
        self.lazy_bundles
            .set_enable_async_decode(config.enable_component_async_decode);
        let post_early = config.enable_js_data_process || js_posted_before_vm;
        if post_early && self.should_post_data_to_js() {
            if config.enable_js_data_process {
                let cache = std::mem::take(&mut self.cache_data);
                if let Some(card) = self.entries.get_mut(DEFAULT_ENTRY_NAME) {
                    for item in &cache {
                        card.push_cache_data(item.clone());
                    }
                }
                self.cache_data = cache;
            }
            if !self.pre_painting {
                self.on_js_prepared();
            }
        }
        self.mark(pipeline, timing::PARSE_END);
    }

    fn on_vm_execute(&mut self, pipeline: &PipelineOptions) -> Result<()> {
        self.update_global_props_to_context(&self.global_props.clone());
        self.mark(pipeline, timing::VM_EXECUTE_START);
        let card = self
            .entries
            .get_mut(DEFAULT_ENTRY_NAME)
            .ok_or_else(|| TasmError::Protocol("card entry missing".to_string()))?;
        card.execute().map_err(|err| {
            log::error!("vm execute failed: {}", err);
            TasmError::Render(format!("vm execute failed: {}", err))
        })
    }

    fn on_render_template(
        &mut self,
        data: Option<TemplateData>,
        js_posted_before_vm: bool,
        pipeline: &PipelineOptions,
    ) -> Result<TemplateData> {
        if !self.global_props.is_null() {
            self.page_proxy.update_global_props(None, &self.global_props, false)?;
        }
        self.mark(pipeline, timing::SET_INIT_DATA_START);
        let mut data = self.process_init_data(data.unwrap_or_default(), pipeline)?;
        let js_data_process = self.enable_js_data_process();
        if data.is_empty() {
            data.set_value(json!({}));
        } else if self.should_post_data_to_js() && !js_data_process {
            if let Some(card) = self.entries.get_mut(DEFAULT_ENTRY_NAME) {
                card.set_init_data(data.value().clone());
            }
        }
        self.mark(pipeline, timing::SET_INIT_DATA_END);

        let env = self.elements.env();
        self.on_screen_metrics_set(env.screen_width, env.screen_height);

        let post_late = !js_data_process && !js_posted_before_vm && self.should_post_data_to_js();
        if post_late && !self.pre_painting {
            self.on_js_prepared();
        }
        Ok(data)
    }

    fn render_template(&mut self, data: &TemplateData, pipeline: &PipelineOptions) -> Result<()> {
        let vm = self.card_vm_or_err()?;
        match self.arch {
            RenderArch::Fiber => self.render_template_for_fiber(vm.as_ref(), data, pipeline),
            RenderArch::Air => self.render_template_for_air(vm.as_ref(), data),
            RenderArch::Radon => {
                let option = UpdatePageOption {
                    update_first_time: true,
                    ..UpdatePageOption::from_native()
                };
                self.page_proxy.update_in_load_template(vm.as_ref(), data.value(), &option)
            }
        }
    }

    fn render_template_for_fiber(&self, vm: &dyn VmContext, data: &TemplateData, pipeline: &PipelineOptions) -> Result<()> {
        self.mark(pipeline, timing::MTS_RENDER_START);
        let mut options = serde_json::Map::new();
        if self.enable_js_data_process() {
            options.insert("processorName".to_string(), json!(data.preprocessor_name()));
            if !self.cache_data.is_empty() {
                let cache: Vec<Value> = self
                    .cache_data
                    .iter()
                    .map(|item| json!({"data": item.value(), "processorName": item.preprocessor_name()}))
                    .collect();
                options.insert("cacheData".to_string(), Value::Array(cache));
            }
        }
        options.insert("preLoadTemplate".to_string(), json!(self.pre_painting));
        options.insert("pipelineOptions".to_string(), pipeline.to_value());
        if let Some(cache) = self.card().and_then(TemplateEntry::try_get_element_cache) {
            log::debug!("first screen reuses the prebuilt element tree");
            self.elements.attach_template(&cache);
            options.insert("initPage".to_string(), json!(true));
        }
        vm.call("renderPage", &[data.value().clone(), Value::Object(options)])?;
        self.mark(pipeline, timing::MTS_RENDER_END);
        Ok(())
    }

    fn render_template_for_air(&self, vm: &dyn VmContext, data: &TemplateData) -> Result<()> {
        let option = UpdatePageOption::from_native().to_value();
        if vm.has_global("$renderPage0") {
            vm.call("$renderPage0", &[data.value().clone(), option])?;
        } else {
            vm.call("$createPage0", &[data.value().clone(), option.clone()])?;
            vm.call("$updatePage0", &[data.value().clone(), option])?;
        }
        self.elements.queue().update_status(QueueStatus::TasmFinish);
        Ok(())
    }

    /// Store server-rendered state. The bytes are opaque to this engine; the
    /// supplied data is rendered the regular way.
    pub fn render_page_with_ssr_data(&mut self, ssr: Vec<u8>, data: Option<TemplateData>, pipeline: PipelineOptions) {
        if self.destroyed {
            return;
        }
        log::info!("received {} bytes of server-rendered state", ssr.len());
        self.ssr_data = Some(ssr);
        let Some(data) = data else {
            return;
        };
        if self.template_loaded {
            self.update_data_by_pre_parsed_data(data, UpdatePageOption::from_native(), pipeline);
        } else {
            self.cache_data.push(data);
        }
    }

    fn on_js_prepared(&self) {
        let Some(card) = self.card() else {
            return;
        };
        let dsl = self.page_configger.page_config().map(|config| config.dsl).unwrap_or_default();
        self.delegate.on_js_source_prepared(JsSourceBundle {
            name: DEFAULT_ENTRY_NAME.to_string(),
            url: self.url.clone(),
            dsl,
            js: card.js_bundle().clone(),
            global_props: self.global_props.clone(),
            init_data: card.init_data().clone(),
            cache_data: card.cache_data().to_vec(),
        });
    }

    fn update_global_props_to_context(&self, props: &Value) {
        let system_info = self.system_info();
        for entry in self.entries.values().filter(|entry| !entry.is_reuse_context()) {
            if let Err(err) =
                entry.update_global_props_to_context(props, &system_info, self.config.enable_post_data_before_update)
            {
                log::warn!("cannot publish global props to {}: {}", entry.name(), err);
            }
        }
    }

    // ---- data processing ------------------------------------------------

    fn process_init_data(&self, init: TemplateData, pipeline: &PipelineOptions) -> Result<TemplateData> {
        if self.enable_js_data_process() || self.cache_data.is_empty() {
            return self.process_template_data(&init, true, pipeline);
        }
        log::debug!("merging {} buffered updates into the first screen", self.cache_data.len());
        merge_init_data(&self.cache_data, &init, |data, first_screen| {
            self.process_template_data(data, first_screen, pipeline)
        })
    }

    fn process_template_data(&self, data: &TemplateData, first_screen: bool, pipeline: &PipelineOptions) -> Result<TemplateData> {
        if self.enable_js_data_process() {
            return Ok(data.clone());
        }
        self.mark(pipeline, timing::DATA_PROCESSOR_START);
        let result = match self.arch {
            RenderArch::Fiber => self.process_data_in_vm(data),
            _ => self.process_data_with_processor(data, first_screen),
        };
        self.mark(pipeline, timing::DATA_PROCESSOR_END);
        result
    }

    fn process_data_in_vm(&self, data: &TemplateData) -> Result<TemplateData> {
        let vm = self.card_vm_or_err()?;
        let processed = vm.call("processData", &[data.value().clone(), json!(data.preprocessor_name())])?;
        let mut out = data.clone();
        if processed.is_object() {
            out.set_value(processed);
        }
        Ok(out)
    }

    fn process_data_with_processor(&self, data: &TemplateData, first_screen: bool) -> Result<TemplateData> {
        let mut out = data.clone();
        self.page_proxy.apply_default_page_data(out.value_mut());
        if self.global_props.is_object() && (first_screen || self.pre_painting) {
            if let Value::Object(map) = out.value_mut() {
                map.insert(GLOBAL_PROPS_KEY.to_string(), self.global_props.clone());
            }
        }

        let Some(function) = self.page_proxy.processor_for(data.preprocessor_name()) else {
            return Ok(out);
        };
        if RESERVED_FUNCTIONS.contains(&function) {
            Self::report(
                &TasmError::Protocol(format!("{} is built in and cannot run as a data processor", function)),
                "Register the processor under another function name",
            );
            return Ok(out);
        }
        let vm = self.card_vm_or_err()?;
        let env = json!({
            GLOBAL_PROPS_KEY: self.global_props,
            "SystemInfo": self.system_info(),
        });
        let processed = vm.call(function, &[out.value().clone(), env])?;
        if processed.is_object() {
            out.set_value(processed);
        }
        Ok(out)
    }

    // ---- updates --------------------------------------------------------

    /// Apply an update the host already parsed
    pub fn update_data_by_pre_parsed_data(&mut self, data: TemplateData, option: UpdatePageOption, pipeline: PipelineOptions) {
        if self.destroyed {
            return;
        }
        let _scope = self.scope();
        let _long_task = LongTaskMonitor::scope(self.instance_id, task_type::TASM_TASK, "UpdateDataByPreParsedData", &self.url);

        if !self.template_loaded {
            if !self.enable_pre_update_data {
                log::debug!("update before load ignored");
            } else if option.reset_page_data {
                log::debug!("reset update before load dropped");
            } else {
                self.cache_data.push(data);
            }
            return;
        }
        if let Err(err) = self.update_loaded_data(data, &option, &pipeline) {
            Self::report(&err, "");
        }
    }

    fn update_loaded_data(&mut self, data: TemplateData, option: &UpdatePageOption, pipeline: &PipelineOptions) -> Result<()> {
        self.begin_pipeline();
        let data = self.process_template_data(&data, false, pipeline)?;
        let post_before = self.enable_js_data_process() && self.config.enable_post_data_before_update;
        if self.pre_painting {
            if let Some(card) = self.entries.get_mut(DEFAULT_ENTRY_NAME) {
                card.set_init_data(data.value().clone());
            }
            self.on_js_prepared();
        } else if post_before {
            self.delegate
                .on_data_updated_by_native(data.value().clone(), option.reset_page_data);
        }

        self.update_template(&data, option, pipeline)?;

        if self.pre_painting {
            self.delegate.on_native_app_ready();
            self.pre_painting = false;
        } else if !post_before {
            self.delegate
                .on_data_updated_by_native(data.value().clone(), option.reset_page_data);
        }
        self.finish_pipeline(pipeline);
        self.delegate.on_tasm_finish_by_native();
        Ok(())
    }

    fn update_template(&mut self, data: &TemplateData, option: &UpdatePageOption, pipeline: &PipelineOptions) -> Result<()> {
        let vm = self.card_vm_or_err()?;
        if self.arch != RenderArch::Fiber {
            let changed = self.page_proxy.update_global_data_internal(vm.as_ref(), data.value(), option)?;
            if changed && option.notifies_host() {
                self.delegate.on_data_updated();
            }
            return Ok(());
        }

        if option.reload_template || pipeline.need_timestamps {
            self.mark(pipeline, timing::MTS_RENDER_START);
        }
        let mut options = option.to_value();
        if let Value::Object(map) = &mut options {
            map.insert("pipelineOptions".to_string(), pipeline.to_value());
            if self.pre_painting {
                map.insert("triggerLifeCycle".to_string(), json!(true));
            }
            if self.enable_js_data_process() {
                map.insert("processorName".to_string(), json!(data.preprocessor_name()));
            }
        }
        vm.call("updatePage", &[data.value().clone(), options])?;
        if option.reload_template || pipeline.need_timestamps {
            self.mark(pipeline, timing::MTS_RENDER_END);
        }
        if option.reset_page_data {
            self.delegate.on_data_updated();
        }
        Ok(())
    }

    /// Update data and global props in one call
    pub fn update_meta_data(
        &mut self,
        data: Option<TemplateData>,
        global_props: Option<Value>,
        option: UpdatePageOption,
        pipeline: PipelineOptions,
    ) {
        if let Some(props) = global_props {
            self.update_global_props(props, data.is_none(), pipeline.clone());
        }
        if let Some(data) = data {
            self.update_data_by_pre_parsed_data(data, option, pipeline);
        }
    }

    /// Merge a card config patch. Returns true if the config changed.
    pub fn update_config(&mut self, config: &Value, notify: bool) -> bool {
        if self.destroyed {
            return false;
        }
        let _scope = self.scope();
        if notify {
            self.delegate.on_config_updated(config);
        }
        match self.page_proxy.update_config(config) {
            Some(to_script) => {
                self.delegate.on_card_config_data_changed(&to_script);
                true
            }
            None => false,
        }
    }

    pub fn update_global_props(&mut self, props: Value, need_render: bool, pipeline: PipelineOptions) {
        if self.destroyed {
            return;
        }
        let _scope = self.scope();
        if let Err(err) = self.update_global_props_internal(props, need_render, &pipeline) {
            Self::report(&err, "");
        }
    }

    fn update_global_props_internal(&mut self, props: Value, need_render: bool, pipeline: &PipelineOptions) -> Result<()> {
        self.global_props = props;
        if self.template_loaded {
            self.delegate
                .send_global_event_to_js("onGlobalPropsChanged", self.global_props.clone());
            self.update_global_props_to_context(&self.global_props.clone());
        }

        if self.arch == RenderArch::Fiber {
            if !self.template_loaded {
                return Ok(());
            }
            self.begin_pipeline();
            self.card_vm_or_err()?
                .call("updateGlobalProps", &[self.global_props.clone()])?;
            self.finish_pipeline(pipeline);
            return Ok(());
        }

        for entry in self.entries.values().filter(|entry| !entry.is_card()) {
            if let Some(vm) = entry.vm() {
                vm.update_top_level_variable(GLOBAL_PROPS_KEY, self.global_props.clone());
            }
        }
        let need_render = need_render && self.template_loaded;
        if need_render {
            self.begin_pipeline();
        }
        let vm = self.card_vm();
        self.page_proxy
            .update_global_props(vm.as_deref(), &self.global_props, need_render)?;
        if need_render {
            self.finish_pipeline(pipeline);
        }
        Ok(())
    }

    /// Apply an update produced by the background script
    pub fn update_data_by_js(&mut self, task: UpdateDataTask, pipeline: PipelineOptions) {
        if self.destroyed {
            return;
        }
        let _scope = self.scope();
        log::info!(
            "update data by js, url: {}, type: {:?}, stacks: {}",
            self.url,
            task.update_type,
            task.stacks
        );
        if let Some(config) = task.data.get(CARD_CONFIG_KEY) {
            let config = config.clone();
            self.update_config(&config, true);
            return;
        }
        self.mark_actual_first_screen(&task.data);
        if let Err(err) = self.update_data_by_js_internal(&task, &pipeline) {
            Self::report(&err, "");
        }
    }

    fn update_data_by_js_internal(&mut self, task: &UpdateDataTask, pipeline: &PipelineOptions) -> Result<()> {
        self.begin_pipeline();
        let option = UpdatePageOption::default();
        let vm = self.card_vm_or_err()?;
        let changed = if self.arch == RenderArch::Fiber {
            let mut options = option.to_value();
            if let Value::Object(map) = &mut options {
                map.insert("pipelineOptions".to_string(), pipeline.to_value());
            }
            vm.call("updatePage", &[task.data.clone(), options])?;
            true
        } else {
            self.page_proxy
                .update_global_data_internal(vm.as_ref(), &task.data, &option)?
        };
        if changed {
            self.delegate.on_data_updated();
        }
        self.finish_pipeline(pipeline);
        if task.callback_id >= 0 {
            self.delegate.call_js_api_callback(task.callback_id, json!({}));
        }
        Ok(())
    }

    /// Route a script update to the page or to one component
    pub fn update_component_data(&mut self, task: UpdateDataTask, pipeline: PipelineOptions) {
        if task.is_root() {
            self.update_data_by_js(task, pipeline);
            return;
        }
        if self.destroyed {
            return;
        }
        let _scope = self.scope();
        self.mark_actual_first_screen(&task.data);
        let result = self.card_vm_or_err().and_then(|vm| {
            self.begin_pipeline();
            vm.call(
                "updateComponentData",
                &[json!(task.component_id), task.data.clone(), pipeline.to_value()],
            )?;
            self.finish_pipeline(&pipeline);
            Ok(())
        });
        match result {
            Ok(()) if task.callback_id >= 0 => self.delegate.call_js_api_callback(task.callback_id, json!({})),
            Ok(()) => {}
            Err(err) => Self::report(&err, ""),
        }
    }

    fn mark_actual_first_screen(&mut self, data: &Value) {
        let flagged = data
            .get(ACTUAL_FIRST_SCREEN_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if flagged && self.actual_fmp_end == 0 {
            self.actual_fmp_end = current_time_millis();
            log::debug!("actual first screen at {}", self.actual_fmp_end);
            self.tracker
                .update_generic_info(self.instance_id, ACTUAL_FMP_END, self.actual_fmp_end);
        }
    }

    // ---- reload ---------------------------------------------------------

    /// Rebuild the page with new data without decoding the bundle again
    pub fn reload_template(&mut self, data: TemplateData, option: UpdatePageOption, pipeline: PipelineOptions) -> bool {
        if self.destroyed {
            return false;
        }
        let _scope = self.scope();
        let _long_task = LongTaskMonitor::scope(self.instance_id, task_type::TASM_TASK, "ReloadTemplate", &self.url);
        log::info!("reload template {}", self.url);
        match self.reload_template_internal(data, option, &pipeline) {
            Ok(()) => true,
            Err(err) => {
                let suggestion = match &err {
                    TasmError::Protocol(_) => "Please loadTemplate first",
                    _ => "",
                };
                Self::report(&err, suggestion);
                false
            }
        }
    }

    /// Reload with new global props applied first
    pub fn reload_template_with_global_props(
        &mut self,
        data: TemplateData,
        global_props: Value,
        option: UpdatePageOption,
        pipeline: PipelineOptions,
    ) -> bool {
        if !global_props.is_null() {
            self.update_global_props(global_props, false, pipeline.clone());
        }
        self.reload_template(data, option, pipeline)
    }

    fn reload_template_internal(&mut self, data: TemplateData, mut option: UpdatePageOption, pipeline: &PipelineOptions) -> Result<()> {
        if self.is_loading_template {
            return Err(TasmError::Render("ReloadTemplate in another loading process".to_string()));
        }
        if !self.template_loaded {
            return Err(TasmError::Protocol("ReloadTemplate before LoadTemplate!".to_string()));
        }
        self.is_loading_template = true;
        self.begin_pipeline();
        self.mark(pipeline, timing::LOAD_BUNDLE_START);

        let result = self.rebuild_page(&data, &mut option, pipeline);
        self.is_loading_template = false;
        result?;

        self.delegate.on_native_app_ready();
        self.delegate.on_template_loaded(&self.url);
        self.send_font_scale_changed(self.font_scale);
        self.mark(pipeline, timing::LOAD_BUNDLE_END);
        self.finish_pipeline(pipeline);
        self.delegate.on_tasm_finish_by_native();
        Ok(())
    }

    fn rebuild_page(&mut self, data: &TemplateData, option: &mut UpdatePageOption, pipeline: &PipelineOptions) -> Result<()> {
        let data = self.process_template_data(data, true, pipeline)?;
        self.remove_components()?;
        self.delegate.on_js_app_reload(data.value().clone());
        option.from_native = true;
        option.reload_template = true;
        self.update_template(&data, option, pipeline)
    }

    fn remove_components(&mut self) -> Result<()> {
        if self.arch == RenderArch::Fiber {
            self.card_vm_or_err()?.call("removeComponents", &[])?;
        } else {
            self.page_proxy.remove_old_component_before_reload(&self.elements);
        }
        Ok(())
    }

    /// Reload requested by the background script
    pub fn reload_from_js(&mut self, task: UpdateDataTask, pipeline: PipelineOptions) {
        if self.destroyed {
            return;
        }
        let _scope = self.scope();
        log::info!("reload from js, url: {}", self.url);
        let result = self.remove_components().and_then(|()| {
            self.begin_pipeline();
            let data = TemplateData::new(task.data.clone());
            self.delegate.on_js_app_reload(data.value().clone());
            let option = UpdatePageOption {
                reload_from_js: true,
                reload_template: true,
                ..UpdatePageOption::default()
            };
            self.update_template(&data, &option, &pipeline)?;
            self.finish_pipeline(&pipeline);
            Ok(())
        });
        if let Err(err) = result {
            Self::report(&err, "");
        }
        self.send_font_scale_changed(self.font_scale);
    }

    // ---- environment ----------------------------------------------------

    pub fn update_viewport(&mut self, width: f64, width_mode: i32, height: f64, height_mode: i32) {
        if self.destroyed {
            return;
        }
        let _scope = self.scope();
        log::debug!(
            "viewport {}x{} (modes {}/{})",
            width,
            height,
            width_mode,
            height_mode
        );
        self.elements.set_viewport(width, height);
    }

    /// Let script override the screen size before the element tree sees it
    pub fn on_screen_metrics_set(&mut self, width: f64, height: f64) {
        let input = json!({"width": width, "height": height});
        let result = match self.card_vm() {
            Some(vm) if self.arch == RenderArch::Fiber => vm
                .call("processData", &[input.clone(), json!(SCREEN_METRICS_OVERRIDER)])
                .unwrap_or_else(|err| {
                    log::warn!("screen metrics override failed: {}", err);
                    input.clone()
                }),
            Some(vm) => match self.page_proxy.processor_for(SCREEN_METRICS_OVERRIDER) {
                Some(function) => vm.call(function, &[input.clone()]).unwrap_or_else(|err| {
                    log::warn!("screen metrics override failed: {}", err);
                    input.clone()
                }),
                None => input.clone(),
            },
            None => input.clone(),
        };

        let (width, height) = match (
            result.get("width").and_then(Value::as_f64),
            result.get("height").and_then(Value::as_f64),
        ) {
            (Some(w), Some(h)) => (w, h),
            _ => {
                log::error!("getScreenMetricsOverride should return width and height as numbers");
                (width, height)
            }
        };
        self.tracker
            .update_generic_info(self.instance_id, generic_key::SCREEN_HEIGHT, height);
        self.tracker
            .update_generic_info(self.instance_id, generic_key::SCREEN_WIDTH, width);
        self.elements.set_screen_metrics(width, height);
    }

    pub fn set_font_scale(&mut self, scale: f64) {
        log::info!("font scale set to {}", scale);
        self.font_scale = scale;
        self.elements.set_font_scale(scale);
    }

    pub fn on_font_scale_changed(&mut self, scale: f64) {
        if scale == self.font_scale {
            return;
        }
        self.set_font_scale(scale);
        self.send_font_scale_changed(scale);
    }

    fn send_font_scale_changed(&self, scale: f64) {
        self.delegate
            .send_global_event_to_js("onFontScaleChanged", json!([{"scale": scale}]));
    }

    /// Store an i18n resource and tell both script sides it is ready
    pub fn update_i18n_resource(&mut self, key: &str, new_data: &str) {
        if self.destroyed {
            return;
        }
        let _scope = self.scope();
        if new_data.is_empty() {
            self.delegate
                .send_global_event_to_js("onI18nResourceFailed", json!({"key": key}));
            return;
        }
        let resource = serde_json::from_str(new_data).unwrap_or_else(|_| Value::String(new_data.to_string()));
        self.i18n_resources.insert(key.to_string(), resource.clone());
        self.delegate
            .send_global_event_to_js("onI18nResourceReady", json!([resource]));
        self.send_global_event_to_lepus("i18nResourceReady", &json!({"key": key}));
        self.flush_ui();
    }

    pub fn get_i18n_resource(&self, key: &str, fallback_url: &str) -> Option<Value> {
        self.i18n_resources
            .get(key)
            .cloned()
            .or_else(|| self.delegate.get_i18n_resource(key, fallback_url))
    }

    /// Theme lookup: the bundle's tables first, then the host
    pub fn translate_resource_for_theme(&self, res_id: &str, theme_key: &str) -> Option<String> {
        self.page_proxy
            .translate(theme_key, res_id)
            .or_else(|| self.delegate.translate_resource_for_theme(res_id, theme_key))
    }

    // ---- events ---------------------------------------------------------

    fn touch_handler(&mut self) -> TouchEventHandler {
        let is_air = self.arch == RenderArch::Air;
        *self
            .touch_handler
            .get_or_insert_with(|| TouchEventHandler::for_air(is_air))
    }

    fn dispatch_event<F>(&mut self, dispatch: F) -> bool
    where
        F: FnOnce(TouchEventHandler, &dyn VmContext, &ElementManager) -> Result<Option<DispatchResult>>,
    {
        if self.destroyed || !self.template_loaded {
            return false;
        }
        let _scope = self.scope();
        let handler = self.touch_handler();
        let result = self
            .card_vm_or_err()
            .and_then(|vm| dispatch(handler, vm.as_ref(), self.elements.as_ref()));
        match result {
            Ok(Some(dispatched)) => {
                log::trace!("event handled by {}", dispatched.handler);
                self.flush_ui();
                true
            }
            Ok(None) => false,
            Err(err) => {
                Self::report(&err, "");
                false
            }
        }
    }

    pub fn send_touch_event(&mut self, name: &str, target: ElementId, info: Value) -> bool {
        self.dispatch_event(|handler, vm, elements| handler.handle_touch_event(vm, elements, name, target, info))
    }

    pub fn send_custom_event(&mut self, name: &str, target: ElementId, params: Value, param_name: &str) -> bool {
        self.dispatch_event(|handler, vm, elements| {
            handler.handle_custom_event(vm, elements, name, target, params, param_name)
        })
    }

    pub fn send_gesture_event(&mut self, target: ElementId, gesture_id: u32, name: &str, params: Value) -> bool {
        self.dispatch_event(|handler, vm, elements| {
            handler.handle_gesture_event(vm, elements, target, gesture_id, name, params)
        })
    }

    /// Forward a global event to the background script and to main-thread
    /// listeners registered for it
    pub fn send_global_event(&mut self, name: &str, info: Value) {
        if self.destroyed {
            return;
        }
        let _scope = self.scope();
        if self.listeners.contains(name) {
            self.send_global_event_to_lepus(name, &info);
        }
        self.delegate.send_global_event_to_js(name, info);
    }

    pub fn set_lepus_event_listener(&mut self, name: &str, handler: &str) {
        self.listeners.add(name, handler);
    }

    pub fn remove_lepus_event_listener(&mut self, name: &str) {
        self.listeners.remove(name);
    }

    /// Call the main-thread listeners of `name`. Returns how many ran.
    pub fn send_global_event_to_lepus(&self, name: &str, params: &Value) -> usize {
        let handlers = self.listeners.handlers(name);
        if handlers.is_empty() {
            return 0;
        }
        let Some(vm) = self.card_vm() else {
            return 0;
        };
        let mut called = 0;
        for handler in handlers {
            match vm.call(handler, &[params.clone()]) {
                Ok(_) => called += 1,
                Err(err) => Self::report(&TasmError::Vm(err), ""),
            }
        }
        called
    }

    // ---- teardown -------------------------------------------------------

    /// Release the page. Every later call is a no-op.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        log::info!("template assembler {} destroyed", self.instance_id);
        self.destroyed = true;
        self.entries.clear();
        self.elements.queue().destroy();
        self.tracker.clear_generic_info(self.instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use crate::codec::TemplateBinaryWriter;
    use crate::element::PaintRecorder;
    use crate::resource::MemoryResourceLoader;
    use crate::ui_queue::SyncUiOperationQueue;
    use crate::utils::error::code;
    use crate::vm::DeclarativeVmFactory;

    #[derive(Default)]
    struct Recorder {
        loaded: Mutex<Vec<String>>,
        errors: Mutex<Vec<LynxError>>,
        data_updated: Mutex<usize>,
        js_sources: Mutex<Vec<JsSourceBundle>>,
        global_events: Mutex<Vec<(String, Value)>>,
    }

    impl TemplateAssemblerDelegate for Recorder {
        fn on_data_updated(&self) {
            *self.data_updated.lock() += 1;
        }

        fn on_template_loaded(&self, url: &str) {
            self.loaded.lock().push(url.to_string());
        }

        fn on_error_occurred(&self, error: LynxError) {
            self.errors.lock().push(error);
        }

        fn on_js_source_prepared(&self, source: JsSourceBundle) {
            self.js_sources.lock().push(source);
        }

        fn send_global_event_to_js(&self, name: &str, params: Value) {
            self.global_events.lock().push((name.to_string(), params));
        }
    }

    struct Fixture {
        tasm: TemplateAssembler,
        recorder: Arc<Recorder>,
        factory: Arc<DeclarativeVmFactory>,
    }

    fn fixture() -> Fixture {
        let recorder = Arc::new(Recorder::default());
        let factory = Arc::new(DeclarativeVmFactory::new());
        let tasm = TemplateAssembler::new(
            1,
            TasmConfig::default(),
            AssemblerParts {
                delegate: recorder.clone(),
                vm_factory: factory.clone(),
                queue: Arc::new(SyncUiOperationQueue::new()),
                platform: Arc::new(PaintRecorder::new()),
                resource_loader: Arc::new(MemoryResourceLoader::new()),
                worker_pool: WorkerPool::new(1),
                global_pool: None,
                tracker: Arc::new(EventTracker::default()),
            },
        );
        Fixture { tasm, recorder, factory }
    }

    fn card(fiber: bool, program: Value) -> Vec<u8> {
        let options = CompileOptions {
            enable_fiber_arch: fiber,
            arch_option: if fiber { ArchOption::Fiber } else { ArchOption::Radon },
            ..CompileOptions::default()
        };
        TemplateBinaryWriter::card()
            .compile_options(options)
            .root_lepus(program.to_string().into_bytes())
            .encode()
    }

    fn hello_program() -> Value {
        json!({"page": {"tag": "page", "children": [{"tag": "text", "text": "{{msg}}"}]}})
    }

    #[test]
    fn test_arch_from_compile_options() {
        let mut options = CompileOptions::default();
        assert_eq!(RenderArch::from_compile_options(&options), RenderArch::Radon);
        options.enable_fiber_arch = true;
        assert_eq!(RenderArch::from_compile_options(&options), RenderArch::Fiber);
    }

    #[test]
    fn test_second_load_is_rejected() {
        let mut f = fixture();
        assert!(f.tasm.load_template("a", card(true, hello_program()), None, LoadOptions::default()));
        assert!(!f.tasm.load_template("a", card(true, hello_program()), None, LoadOptions::default()));
        let errors = f.recorder.errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, code::APP_BUNDLE_PROTOCOL);
        assert!(f.tasm.is_template_loaded());
    }

    #[test]
    fn test_empty_source_reports_parse_failure() {
        let mut f = fixture();
        assert!(!f.tasm.load_template("a", Vec::new(), None, LoadOptions::default()));
        assert_eq!(f.recorder.errors.lock()[0].code, code::APP_BUNDLE_LOAD_PARSE_FAILED);
        assert!(!f.tasm.is_loading_template());
        assert_eq!(f.tasm.entry_count(), 0);
    }

    #[test]
    fn test_execute_failure_reports_render_failed() {
        let mut f = fixture();
        let program = json!({"throws": ["execute"]});
        assert!(!f.tasm.load_template("a", card(true, program), None, LoadOptions::default()));
        assert_eq!(f.recorder.errors.lock()[0].code, code::APP_BUNDLE_LOAD_RENDER_FAILED);
    }

    #[test]
    fn test_legacy_load_renders_through_page_proxy() {
        let mut f = fixture();
        let data = TemplateData::new(json!({"msg": "hi"}));
        assert!(f.tasm.load_template("a", card(false, hello_program()), Some(data), LoadOptions::default()));
        let vm = f.factory.last().unwrap();
        assert_eq!(vm.calls_named("$renderPage0").len(), 1);
        assert!(f.tasm.page_proxy().is_rendered());
        // init data was supplied, so script hears about the app after render
        assert_eq!(f.recorder.js_sources.lock().len(), 1);
        assert_eq!(f.recorder.js_sources.lock()[0].init_data, json!({"msg": "hi"}));
    }

    #[test]
    fn test_update_before_load_is_buffered_only_when_enabled() {
        let mut f = fixture();
        f.tasm
            .update_data_by_pre_parsed_data(TemplateData::new(json!({"a": 1})), UpdatePageOption::from_native(), PipelineOptions::default());
        assert!(f.tasm.pending_cache_data().is_empty());

        f.tasm.set_enable_pre_update_data(true);
        f.tasm
            .update_data_by_pre_parsed_data(TemplateData::new(json!({"a": 1})), UpdatePageOption::from_native(), PipelineOptions::default());
        f.tasm
            .update_data_by_pre_parsed_data(TemplateData::new(json!({})), UpdatePageOption::reset(), PipelineOptions::default());
        assert_eq!(f.tasm.pending_cache_data().len(), 1);
    }

    #[test]
    fn test_reload_before_load_fails_with_suggestion() {
        let mut f = fixture();
        assert!(!f.tasm.reload_template(TemplateData::default(), UpdatePageOption::default(), PipelineOptions::default()));
        let errors = f.recorder.errors.lock();
        assert_eq!(errors[0].suggestion, "Please loadTemplate first");
    }

    #[test]
    fn test_script_update_routes_card_config() {
        let mut f = fixture();
        assert!(f.tasm.load_template("a", card(false, hello_program()), None, LoadOptions::default()));
        let task = UpdateDataTask::new(CARD_COMPONENT_ID, json!({CARD_CONFIG_KEY: {"theme": "dark"}}));
        f.tasm.update_data_by_js(task, PipelineOptions::default());
        assert_eq!(f.tasm.page_proxy().card_config(), &json!({"theme": "dark"}));
        assert_eq!(*f.recorder.data_updated.lock(), 0);

        let task = UpdateDataTask::new(CARD_COMPONENT_ID, json!({"msg": "x", ACTUAL_FIRST_SCREEN_KEY: true}));
        f.tasm.update_data_by_js(task, PipelineOptions::default());
        assert_eq!(*f.recorder.data_updated.lock(), 1);
        assert!(f.tasm.actual_fmp_end() > 0);
    }

    #[test]
    fn test_font_scale_change_notifies_script_once() {
        let mut f = fixture();
        f.tasm.on_font_scale_changed(1.0);
        f.tasm.on_font_scale_changed(1.5);
        let events = f.recorder.global_events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], ("onFontScaleChanged".to_string(), json!([{"scale": 1.5}])));
    }

    #[test]
    fn test_screen_metrics_override_in_fiber() {
        let mut f = fixture();
        let program = json!({
            "page": {"tag": "page"},
            "processors": {SCREEN_METRICS_OVERRIDER: {"width": 200.0}}
        });
        assert!(f.tasm.load_template("a", card(true, program), None, LoadOptions::default()));
        f.tasm.on_screen_metrics_set(400.0, 800.0);
        let env = f.tasm.elements().env();
        assert_eq!((env.screen_width, env.screen_height), (200.0, 800.0));
    }

    #[test]
    fn test_global_event_reaches_lepus_listeners() {
        let mut f = fixture();
        assert!(f.tasm.load_template("a", card(true, hello_program()), None, LoadOptions::default()));
        f.tasm.set_lepus_event_listener("ping", "onPing");
        f.tasm.send_global_event("ping", json!({"n": 1}));
        let vm = f.factory.last().unwrap();
        assert_eq!(vm.calls_named("onPing"), vec![vec![json!({"n": 1})]]);

        f.tasm.remove_lepus_event_listener("ping");
        f.tasm.send_global_event("ping", json!({"n": 2}));
        assert_eq!(vm.calls_named("onPing").len(), 1);
    }

    #[test]
    fn test_destroy_turns_entry_points_into_no_ops() {
        let mut f = fixture();
        f.tasm.destroy();
        assert!(!f.tasm.load_template("a", card(true, hello_program()), None, LoadOptions::default()));
        assert!(f.recorder.errors.lock().is_empty());
        assert!(f.recorder.loaded.lock().is_empty());
    }
}
