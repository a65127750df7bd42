//! Three-thread pipeline wiring
//!
//! The engine thread owns the `TemplateAssembler`, the script thread owns
//! the host's `ScriptRuntime`, and the UI thread drains the UI operation
//! queue. Every host call is posted to the engine thread; the engine never
//! waits on script.

mod delegate;

pub use delegate::ShellDelegate;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;

use crate::assembler::{
    AssemblerParts, JsSourceBundle, LoadOptions, PipelineOptions, TemplateAssembler, TemplateAssemblerDelegate,
    UpdateDataTask, UpdatePageOption,
};
use crate::config::TasmConfig;
use crate::element::{ElementId, PaintingPlatform};
use crate::monitor::{BatchedConfig, EventTracker, LongTaskMonitor};
use crate::resource::{LazyBundleCallback, ResourceLoader};
use crate::thread::{Actor, ThreadRunner, WeakActor, WorkerPool};
use crate::ui_queue::{DynamicUiOperationQueue, QueueStrategy, UiOperationQueue};
use crate::value::TemplateData;
use crate::vm::{GlobalContextPool, VmFactory};

/// The background script thread as seen by the engine
pub trait ScriptRuntime: Send {
    /// Called once on the script thread before any other call
    fn attach(&mut self, _engine: EngineHandle) {}

    fn on_js_source_prepared(&mut self, source: JsSourceBundle);

    fn on_global_event(&mut self, _name: &str, _params: Value) {}

    fn on_api_callback(&mut self, _callback_id: i64, _message: Value) {}

    fn on_data_updated_by_native(&mut self, _data: Value, _reset: bool) {}

    fn on_app_reload(&mut self, _data: Value) {}

    fn on_card_config_changed(&mut self, _config: Value) {}

    fn on_dynamic_js_source_prepared(&mut self, _url: &str) {}
}

/// Script-side entry points into the engine
#[derive(Clone)]
pub struct EngineHandle {
    tasm: WeakActor<TemplateAssembler>,
}

impl EngineHandle {
    pub fn update_data(&self, task: UpdateDataTask) {
        self.tasm
            .act(move |tasm| tasm.update_component_data(task, PipelineOptions::default()));
    }

    pub fn reload(&self, task: UpdateDataTask) {
        self.tasm
            .act(move |tasm| tasm.reload_from_js(task, PipelineOptions::default()));
    }

    pub fn load_lazy_bundle(&self, url: &str, callback_id: i64) {
        let url = url.to_string();
        self.tasm
            .act(move |tasm| tasm.load_lazy_bundle_from_js(&url, callback_id));
    }

    pub fn send_global_event(&self, name: &str, params: Value) {
        let name = name.to_string();
        self.tasm.act(move |tasm| tasm.send_global_event(&name, params));
    }
}

/// Everything the host plugs into a shell
pub struct ShellParts {
    pub host: Arc<dyn TemplateAssemblerDelegate>,
    pub script: Box<dyn ScriptRuntime>,
    pub vm_factory: Arc<dyn VmFactory>,
    pub platform: Arc<dyn PaintingPlatform>,
    pub resource_loader: Arc<dyn ResourceLoader>,
    pub global_pool: Option<Arc<GlobalContextPool>>,
    pub tracker: Arc<EventTracker>,
}

pub struct Shell {
    instance_id: i32,
    engine_thread: ThreadRunner,
    script_thread: ThreadRunner,
    ui_thread: ThreadRunner,
    tasm: Actor<TemplateAssembler>,
    queue: Arc<DynamicUiOperationQueue>,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("instance_id", &self.instance_id)
            .field("strategy", &self.queue.strategy())
            .finish()
    }
}

impl Shell {
    /// Spawn the engine, script and UI threads and build the assembler on
    /// the engine thread
    pub fn new(instance_id: i32, config: TasmConfig, strategy: QueueStrategy, parts: ShellParts) -> std::io::Result<Self> {
        let ShellParts {
            host,
            script,
            vm_factory,
            platform,
            resource_loader,
            global_pool,
            tracker,
        } = parts;

        let global_pool = if config.global_context_pool_size > 0 && !config.disable_tracing_gc {
            let pool = global_pool.unwrap_or_else(GlobalContextPool::shared);
            let added = pool.fill(vm_factory.as_ref(), config.global_context_pool_size);
            log::debug!("global context pool warmed {} contexts ({} available)", added, pool.len());
            Some(pool)
        } else {
            global_pool
        };

        let engine_thread = ThreadRunner::spawn(&format!("tasm-engine-{}", instance_id))?;
        let script_thread = ThreadRunner::spawn(&format!("tasm-script-{}", instance_id))?;
        let ui_thread = ThreadRunner::spawn(&format!("tasm-ui-{}", instance_id))?;

        let wait_timeout = Duration::from_millis(config.ui_flush_wait_timeout_ms);
        let queue = Arc::new(DynamicUiOperationQueue::new(strategy, Some(ui_thread.runner()), wait_timeout));
        let script = Actor::new(script, script_thread.runner());
        let delegate = Arc::new(ShellDelegate::new(host, script.clone()));
        let worker_pool = if config.worker_threads == 0 {
            WorkerPool::shared()
        } else {
            WorkerPool::new(config.worker_threads)
        };

        let batched = BatchedConfig {
            max_task_interval_ms: config.batched_max_task_interval_ms,
            window_threshold_ms: config.batched_window_threshold_ms,
            busy_ratio: config.batched_ratio,
        };
        let threshold = config.long_task_threshold_ms;
        let monitor_tracker = tracker.clone();
        engine_thread
            .runner()
            .post_task(move || LongTaskMonitor::configure(threshold, batched, Some(monitor_tracker)));

        let tasm = TemplateAssembler::new(
            instance_id,
            config,
            AssemblerParts {
                delegate,
                vm_factory,
                queue: queue.clone(),
                platform,
                resource_loader,
                worker_pool,
                global_pool,
                tracker,
            },
        );
        let tasm = Actor::new(tasm, engine_thread.runner());

        let wake_target = tasm.downgrade();
        tasm.act(move |tasm| {
            let target = wake_target.clone();
            tasm.set_lazy_bundle_wake_hook(Arc::new(move || {
                target.act(|tasm| {
                    tasm.run_pending_tasks();
                });
            }));
        });
        let engine = EngineHandle { tasm: tasm.downgrade() };
        script.act(move |runtime| runtime.attach(engine));

        log::info!("shell {} started with {:?} ui strategy", instance_id, strategy);
        Ok(Self {
            instance_id,
            engine_thread,
            script_thread,
            ui_thread,
            tasm,
            queue,
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn instance_id(&self) -> i32 {
        self.instance_id
    }

    pub fn ui_queue(&self) -> &Arc<DynamicUiOperationQueue> {
        &self.queue
    }

    /// Run `f` on the engine thread and wait for its result
    pub fn with_assembler<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut TemplateAssembler) -> R + Send + 'static,
    {
        self.tasm.act_sync(f)
    }

    pub fn load_template(&self, url: &str, bytes: Vec<u8>, data: Option<TemplateData>, options: LoadOptions) {
        let url = url.to_string();
        self.tasm.act(move |tasm| {
            tasm.load_template(&url, bytes, data, options);
        });
    }

    pub fn update_data(&self, data: TemplateData, option: UpdatePageOption) {
        self.tasm
            .act(move |tasm| tasm.update_data_by_pre_parsed_data(data, option, PipelineOptions::default()));
    }

    pub fn reload_template(&self, data: TemplateData, option: UpdatePageOption) {
        self.tasm.act(move |tasm| {
            tasm.reload_template(data, option, PipelineOptions::default());
        });
    }

    pub fn update_global_props(&self, props: Value) {
        self.tasm
            .act(move |tasm| tasm.update_global_props(props, true, PipelineOptions::default()));
    }

    pub fn update_config(&self, config: Value) {
        self.tasm.act(move |tasm| {
            tasm.update_config(&config, true);
        });
    }

    pub fn update_viewport(&self, width: f64, width_mode: i32, height: f64, height_mode: i32) {
        self.tasm
            .act(move |tasm| tasm.update_viewport(width, width_mode, height, height_mode));
    }

    pub fn on_screen_metrics_set(&self, width: f64, height: f64) {
        self.tasm.act(move |tasm| tasm.on_screen_metrics_set(width, height));
    }

    pub fn on_font_scale_changed(&self, scale: f64) {
        self.tasm.act(move |tasm| tasm.on_font_scale_changed(scale));
    }

    pub fn send_touch_event(&self, name: &str, target: ElementId, info: Value) {
        let name = name.to_string();
        self.tasm.act(move |tasm| {
            tasm.send_touch_event(&name, target, info);
        });
    }

    pub fn send_global_event(&self, name: &str, params: Value) {
        let name = name.to_string();
        self.tasm.act(move |tasm| tasm.send_global_event(&name, params));
    }

    pub fn preload_lazy_bundles(&self, urls: Vec<String>) {
        self.tasm.act(move |tasm| {
            tasm.preload_lazy_bundles(&urls);
        });
    }

    pub fn require_lazy_bundle(&self, url: &str, callback: LazyBundleCallback) {
        let url = url.to_string();
        self.tasm.act(move |tasm| {
            tasm.require_template_entry(&url, callback);
        });
    }

    /// Switch the UI queue strategy on the UI thread
    pub fn transfer_ui_strategy(&self, strategy: QueueStrategy) {
        let queue = self.queue.clone();
        self.ui_thread.runner().post_task(move || {
            if !queue.transfer(strategy) {
                log::warn!("ui queue is flushing, strategy stays {:?}", queue.strategy());
            }
        });
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Destroy the assembler and stop every thread. Later calls do nothing.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.tasm.act_sync(|tasm| tasm.destroy()).is_none() {
            log::warn!("shell {}: engine thread gone before the assembler was destroyed", self.instance_id);
        }
        log::info!("shell {} destroyed", self.instance_id);
        self.engine_thread.join();
        self.script_thread.join();
        self.ui_thread.join();
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.destroy();
    }
}
