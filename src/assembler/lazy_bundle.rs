//! Lazy bundle requests of a page
//!
//! Requests are coalesced by `LazyBundleLoader`. Results come back as
//! inbox events and are applied here, on the engine thread, by
//! `run_pending_tasks`.

use serde_json::{Value, json};

use super::{RenderArch, TemplateAssembler};
use crate::bundle::TemplateBundle;
use crate::entry::{DEFAULT_ENTRY_NAME, TemplateEntry};
use crate::monitor::event_tracker::EVENT_LAZY_BUNDLE_PERF;
use crate::monitor::long_task::task_type;
use crate::monitor::{LongTaskMonitor, TrackedEvent};
use crate::resource::lazy_bundle::{WakeHook, decode_lazy_bundle};
use crate::resource::{
    FetchKind, FetchedBundle, LazyBundleCallback, LazyBundleLifecycleOption, LoadMode, LoaderEvent, RequireOutcome,
};
use crate::utils::error::{ErrorLevel, LazyBundleError, LynxError, Result, TasmError, code};

/// Element attribute carrying the load state of a synchronously created
/// lazy component
pub const LAZY_BUNDLE_STATE_ATTRIBUTE: &str = "lazyBundleState";

const NETWORK_SUGGESTION: &str = "Please check the network or the url of the lazy bundle";

impl TemplateAssembler {
    /// Hook invoked when a fetch result lands; the host uses it to schedule
    /// `run_pending_tasks` on the engine thread
    pub fn set_lazy_bundle_wake_hook(&mut self, wake: WakeHook) {
        self.lazy_bundles.set_wake_hook(wake);
    }

    /// Start fetches for bundles the page will probably need
    pub fn preload_lazy_bundles(&mut self, urls: &[String]) -> Vec<String> {
        if self.destroyed {
            return Vec::new();
        }
        self.lazy_bundles.preload(urls.iter().map(String::as_str))
    }

    /// Request the lazy bundle at `url`. Returns true if the bundle is usable
    /// when the call returns.
    pub fn require_template_entry(&mut self, url: &str, callback: LazyBundleCallback) -> bool {
        self.require(url, callback, true)
    }

    /// Request made by the background script; it always answers
    /// asynchronously through `call_js_api_callback`
    pub fn load_lazy_bundle_from_js(&mut self, url: &str, callback_id: i64) {
        self.require(url, LazyBundleCallback::Script { callback_id }, false);
    }

    /// True if the bundle is loaded. Otherwise a load is started.
    pub fn query_component(&mut self, url: &str) -> bool {
        if self.entries.contains_key(url) {
            return true;
        }
        if !self.lazy_bundles.is_requiring(url) {
            self.require(url, LazyBundleCallback::None, false);
        }
        false
    }

    /// Resolve a component name through the declarations of `current`, then
    /// of the card. Unknown names are used as urls.
    pub fn get_target_url(&self, current: &str, target: &str) -> String {
        [current, DEFAULT_ENTRY_NAME]
            .iter()
            .filter_map(|name| self.entries.get(*name))
            .find_map(|entry| entry.bundle().dynamic_component_declarations().get(target).cloned())
            .unwrap_or_else(|| target.to_string())
    }

    fn require(&mut self, url: &str, callback: LazyBundleCallback, on_engine_thread: bool) -> bool {
        if self.destroyed {
            return false;
        }
        let _scope = self.scope();

        if self.entries.contains_key(url) {
            log::debug!("lazy bundle {} already loaded", url);
            let mut option = LazyBundleLifecycleOption::new(url, self.instance_id, on_engine_thread, callback)
                .with_mode(LoadMode::Cache);
            option.mark_success(Value::Null);
            self.dispatch_lazy_bundle_options(vec![option]);
            return true;
        }

        match self.lazy_bundles.require(url, self.instance_id, callback, on_engine_thread) {
            RequireOutcome::Preloaded(bundle, option) => {
                let result = self.build_component_entry(url, *bundle);
                let options = self.resolve_lazy_bundle_options(url, vec![option], result);
                self.dispatch_lazy_bundle_options(options);
            }
            RequireOutcome::Pending { fetch_issued, sync } => {
                if fetch_issued && sync {
                    self.run_pending_tasks();
                }
            }
        }
        self.entries.contains_key(url)
    }

    /// Apply every fetch result that arrived. Returns how many were applied.
    pub fn run_pending_tasks(&mut self) -> usize {
        let events = self.lazy_bundles.drain_events();
        if events.is_empty() || self.destroyed {
            return 0;
        }
        let _scope = self.scope();
        let count = events.len();
        for event in events {
            let _long_task = LongTaskMonitor::scope(self.instance_id, task_type::TASM_TASK, "LazyBundleLoaded", &event.url);
            match event.kind {
                FetchKind::Require => self.did_load_component(event),
                FetchKind::Preload => self.did_preload_component(event),
            }
        }
        count
    }

    fn did_load_component(&mut self, event: LoaderEvent) {
        let LoaderEvent {
            url,
            binary_size,
            result,
            ..
        } = event;
        let mut options = self.lazy_bundles.did_load_component(&url);
        let (result, decode_span) = match result.and_then(into_bundle) {
            Ok((bundle, span)) => (self.build_component_entry(&url, bundle), span),
            Err(err) => (Err(TasmError::LazyBundle(err)), None),
        };
        for option in &mut options {
            option.binary_size = binary_size;
            if let Some((start, end)) = decode_span {
                option.start_decode = start;
                option.end_decode = end;
            }
        }
        let options = self.resolve_lazy_bundle_options(&url, options, result);
        self.dispatch_lazy_bundle_options(options);
    }

    fn did_preload_component(&mut self, event: LoaderEvent) {
        let LoaderEvent { url, result, .. } = event;
        let bundle = match result.and_then(into_bundle) {
            Ok((bundle, _)) => bundle,
            Err(err) => {
                log::warn!("preload of {} failed: {}", url, err);
                self.report_to_delegate(
                    LynxError::new(err.code(), err.to_string())
                        .with_level(ErrorLevel::Warn)
                        .with_suggestion(NETWORK_SUGGESTION)
                        .with_info("url", url.clone()),
                );
                self.lazy_bundles.on_preloaded(&url, None);
                return;
            }
        };
        if self.lazy_bundles.pending_options(&url) == 0 {
            log::debug!("lazy bundle {} preloaded", url);
            self.lazy_bundles.on_preloaded(&url, Some(bundle));
            return;
        }
        let waiting = self.lazy_bundles.on_preloaded(&url, None);
        let result = self.build_component_entry(&url, bundle);
        let options = self.resolve_lazy_bundle_options(&url, waiting, result);
        self.dispatch_lazy_bundle_options(options);
    }

    /// Bind a decoded lazy bundle to a VM and register its entry. Returns
    /// the bundle's evaluation result.
    fn build_component_entry(&mut self, url: &str, bundle: TemplateBundle) -> Result<Value> {
        let (card_options, card_vm) = match self.card() {
            Some(card) => (card.compile_options().clone(), card.vm().cloned()),
            None => {
                return Err(TasmError::Protocol(format!(
                    "lazy bundle {} arrived before the page was loaded",
                    url
                )));
            }
        };

        let mut entry = TemplateEntry::with_bundle(url, bundle);
        let reused_vm = card_vm.filter(|vm| card_options.enable_reuse_context && vm.is_quick());
        match reused_vm {
            Some(vm) => entry.init_with_reused_context(vm, self.handle())?,
            None => {
                entry.init_with_page_configger(self.page_configger.as_ref(), &self.vm_provider, self.handle(), false)?;
            }
        }
        entry.check_compatibility(&card_options)?;
        if !entry.is_reuse_context() {
            entry.update_global_props_to_context(&self.global_props, &self.system_info(), false)?;
        }
        entry.execute()?;
        let eval_result = entry.process_binary_eval_result()?.unwrap_or(Value::Null);

        if entry.bundle().support_component_js() && self.arch != RenderArch::Air {
            self.delegate.on_dynamic_js_source_prepared(url);
        }
        log::info!("lazy bundle {} ready ({})", url, entry.vm_source().as_str());
        self.entries.insert(url.to_string(), entry);
        Ok(eval_result)
    }

    fn resolve_lazy_bundle_options(
        &mut self,
        url: &str,
        mut options: Vec<LazyBundleLifecycleOption>,
        result: Result<Value>,
    ) -> Vec<LazyBundleLifecycleOption> {
        match result {
            Ok(eval_result) => {
                self.lazy_bundles.mark_component_loaded(url);
                for option in &mut options {
                    option.mark_success(eval_result.clone());
                }
            }
            Err(err) => {
                let error_code = match &err {
                    TasmError::LazyBundle(err) => err.code(),
                    _ => code::LAZY_BUNDLE_LOAD_DECODE_FAILED,
                };
                let message = err.to_string();
                log::error!("lazy bundle {} failed: {}", url, message);
                self.report_to_delegate(
                    LynxError::new(error_code, message.clone())
                        .with_suggestion(NETWORK_SUGGESTION)
                        .with_info("url", url),
                );
                self.lazy_bundles.mark_component_failed(url, message.clone());
                for option in &mut options {
                    option.mark_failure(error_code, message.clone());
                    self.delegate
                        .send_global_event_to_js("onDynamicComponentEvent", json!([option.main_thread_message()]));
                }
            }
        }
        options
    }

    fn dispatch_lazy_bundle_options(&mut self, options: Vec<LazyBundleLifecycleOption>) {
        let mut need_flush = false;
        for mut option in options {
            need_flush |= option.requests_dispatch();
            let perf = option.perf_info();
            self.tracker.on_event(
                TrackedEvent::new(EVENT_LAZY_BUNDLE_PERF, self.instance_id)
                    .with_prop("url", option.url.as_str())
                    .with_prop("mode", option.mode.as_str())
                    .with_prop("is_success", option.is_success),
            );
            self.delegate.on_dynamic_component_perf_ready(perf);

            match std::mem::replace(&mut option.callback, LazyBundleCallback::None) {
                LazyBundleCallback::Closure(callback) => callback(option.main_thread_message()),
                LazyBundleCallback::SyncInstance { element_id } => {
                    let state = if option.is_success { "success" } else { "fail" };
                    self.elements
                        .set_attribute(element_id, LAZY_BUNDLE_STATE_ATTRIBUTE, json!(state));
                }
                LazyBundleCallback::Component { element_id } => self.fire_component_event(element_id, &option),
                LazyBundleCallback::Script { callback_id } => {
                    self.delegate
                        .call_js_api_callback(callback_id, option.background_message());
                }
                LazyBundleCallback::None => {}
            }
        }
        if need_flush {
            self.flush_ui();
        }
    }

    /// Mount the bundle's element tree under `element_id` and fire
    /// `success` or `fail` on the element
    fn fire_component_event(&mut self, element_id: crate::element::ElementId, option: &LazyBundleLifecycleOption) {
        if option.is_success {
            if let Some(tree) = self.entries.get(&option.url).and_then(TemplateEntry::try_get_element_cache) {
                for node in &tree.elements {
                    let child = self.elements.build_tree(node);
                    self.elements.append_child(element_id, child);
                }
            }
        }
        let name = if option.is_success { "success" } else { "fail" };
        let Some(vm) = self.card_vm() else {
            return;
        };
        let handler = self.touch_handler();
        let dispatched = handler.handle_custom_event(
            vm.as_ref(),
            self.elements.as_ref(),
            name,
            element_id,
            option.main_thread_message(),
            "detail",
        );
        if let Err(err) = dispatched {
            Self::report(&err, "");
        }
    }
}

/// Decoded bundle and, when decoded on a worker, its decode span
fn into_bundle(fetched: FetchedBundle) -> std::result::Result<(TemplateBundle, Option<(u64, u64)>), LazyBundleError> {
    match fetched {
        FetchedBundle::Bytes(bytes) => decode_lazy_bundle(bytes).map(|bundle| (bundle, None)),
        FetchedBundle::Decoded {
            bundle,
            start_decode,
            end_decode,
        } => Ok((*bundle, Some((start_decode, end_decode)))),
    }
}
