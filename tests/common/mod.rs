//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};

use tasm::assembler::{AssemblerParts, JsSourceBundle, TemplateAssembler, TemplateAssemblerDelegate};
use tasm::codec::{ArchOption, CompileOptions, TemplateBinaryWriter};
use tasm::config::{PageConfig, TasmConfig};
use tasm::element::PaintRecorder;
use tasm::monitor::EventTracker;
use tasm::resource::{ResourceCallback, ResourceLoader, ResourceRequest, ResourceResponse};
use tasm::thread::WorkerPool;
use tasm::ui_queue::{
    ErrorCallback, QueueStatus, QueueStrategy, SyncUiOperationQueue, UiOperation, UiOperationQueue,
};
use tasm::utils::error::LynxError;
use tasm::vm::DeclarativeVmFactory;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Delegate that keeps every callback it receives
#[derive(Default)]
pub struct Recorder {
    pub loaded: Mutex<Vec<String>>,
    pub page_configs: Mutex<Vec<PageConfig>>,
    pub errors: Mutex<Vec<LynxError>>,
    pub js_sources: Mutex<Vec<JsSourceBundle>>,
    pub global_events: Mutex<Vec<(String, Value)>>,
    pub perf: Mutex<Vec<Value>>,
}

impl TemplateAssemblerDelegate for Recorder {
    fn on_template_loaded(&self, url: &str) {
        self.loaded.lock().push(url.to_string());
    }

    fn on_page_config_decoded(&self, config: &PageConfig) {
        self.page_configs.lock().push(config.clone());
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

    fn on_dynamic_component_perf_ready(&self, perf: Value) {
        self.perf.lock().push(perf);
    }
}

/// Sync queue that counts flushes which executed something
#[derive(Default)]
pub struct CountingQueue {
    inner: SyncUiOperationQueue,
    productive_flushes: AtomicUsize,
}

impl CountingQueue {
    pub fn productive_flushes(&self) -> usize {
        self.productive_flushes.load(Ordering::SeqCst)
    }
}

impl UiOperationQueue for CountingQueue {
    fn enqueue_ui_operation(&self, operation: UiOperation) {
        self.inner.enqueue_ui_operation(operation);
    }

    fn enqueue_high_priority_operation(&self, operation: UiOperation) {
        self.inner.enqueue_high_priority_operation(operation);
    }

    fn flush(&self) -> usize {
        let executed = self.inner.flush();
        if executed > 0 {
            self.productive_flushes.fetch_add(1, Ordering::SeqCst);
        }
        executed
    }

    fn update_status(&self, status: QueueStatus) {
        self.inner.update_status(status);
    }

    fn force_flush(&self) -> usize {
        self.inner.force_flush()
    }

    fn is_in_flush(&self) -> bool {
        self.inner.is_in_flush()
    }

    fn destroy(&self) {
        self.inner.destroy();
    }

    fn set_error_callback(&self, callback: ErrorCallback) {
        self.inner.set_error_callback(callback);
    }

    fn strategy(&self) -> QueueStrategy {
        QueueStrategy::Sync
    }

    fn pending_count(&self) -> usize {
        self.inner.pending_count()
    }
}

/// Loader that parks every request until the test answers it
#[derive(Default)]
pub struct DeferredLoader {
    parked: Mutex<Vec<(ResourceRequest, ResourceCallback)>>,
    calls: AtomicUsize,
}

impl DeferredLoader {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn parked(&self) -> usize {
        self.parked.lock().len()
    }

    /// Answer every parked request with `response`
    pub fn answer_all(&self, response: ResourceResponse) -> usize {
        let parked = std::mem::take(&mut *self.parked.lock());
        let count = parked.len();
        for (_, callback) in parked {
            callback(response.clone());
        }
        count
    }
}

impl ResourceLoader for DeferredLoader {
    fn load(&self, request: ResourceRequest, callback: ResourceCallback) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.parked.lock().push((request, callback));
    }
}

pub struct Page {
    pub tasm: TemplateAssembler,
    pub recorder: Arc<Recorder>,
    pub factory: Arc<DeclarativeVmFactory>,
    pub platform: Arc<PaintRecorder>,
    pub queue: Arc<CountingQueue>,
}

pub fn page(loader: Arc<dyn ResourceLoader>) -> Page {
    let recorder = Arc::new(Recorder::default());
    let factory = Arc::new(DeclarativeVmFactory::new());
    let platform = Arc::new(PaintRecorder::new());
    let queue = Arc::new(CountingQueue::default());
    let tasm = TemplateAssembler::new(
        1,
        TasmConfig {
            worker_threads: 1,
            ..TasmConfig::default()
        },
        AssemblerParts {
            delegate: recorder.clone(),
            vm_factory: factory.clone(),
            queue: queue.clone(),
            platform: platform.clone(),
            resource_loader: loader,
            worker_pool: WorkerPool::new(1),
            global_pool: None,
            tracker: Arc::new(EventTracker::default()),
        },
    );
    Page {
        tasm,
        recorder,
        factory,
        platform,
        queue,
    }
}

pub fn fiber_options() -> CompileOptions {
    CompileOptions {
        enable_fiber_arch: true,
        arch_option: ArchOption::Fiber,
        ..CompileOptions::default()
    }
}

/// Fiber card running `program` on the declarative VM
pub fn fiber_card(program: Value) -> Vec<u8> {
    TemplateBinaryWriter::card()
        .compile_options(fiber_options())
        .root_lepus(program.to_string().into_bytes())
        .encode()
}

/// Lazy bundle exporting `name`
pub fn component(name: &str) -> Vec<u8> {
    TemplateBinaryWriter::dynamic_component()
        .compile_options(fiber_options())
        .root_lepus(json!({"exports": {"name": name}}).to_string().into_bytes())
        .encode()
}
