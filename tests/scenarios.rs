//! End-to-end scenarios across the assembler, lazy bundles and UI queues

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::unbounded;
use mockall::mock;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use common::{component, fiber_card, init_logger, page};
use tasm::assembler::{LoadOptions, PipelineOptions, UpdatePageOption};
use tasm::element::PaintOp;
use tasm::resource::{
    LazyBundleCallback, MemoryResourceLoader, ResourceCallback, ResourceLoader, ResourceRequest, ResourceResponse,
};
use tasm::thread::ThreadRunner;
use tasm::ui_queue::{AsyncUiOperationQueue, DynamicUiOperationQueue, QueueStatus, QueueStrategy, UiOperationQueue};
use tasm::utils::error::code;
use tasm::value::TemplateData;

mock! {
    pub Loader {}

    impl ResourceLoader for Loader {
        fn load(&self, request: ResourceRequest, callback: ResourceCallback);
    }
}

fn logged(log: &Arc<Mutex<Vec<u32>>>, value: u32) -> Box<dyn FnOnce() + Send> {
    let log = log.clone();
    Box::new(move || log.lock().push(value))
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while !done() {
        if start.elapsed() > deadline {
            return false;
        }
        thread::yield_now();
    }
    true
}

#[test]
fn test_cold_fiber_load() {
    init_logger();
    let mut p = page(Arc::new(MemoryResourceLoader::new()));
    let program = json!({"page": {"tag": "page", "children": [{"tag": "text", "text": "hello"}]}});

    assert!(p.tasm.load_template("", fiber_card(program), None, LoadOptions::default()));

    assert!(p.tasm.is_template_loaded());
    assert_eq!(p.recorder.page_configs.lock().len(), 1);
    assert_eq!(*p.recorder.loaded.lock(), vec![String::new()]);
    assert_eq!(p.recorder.js_sources.lock().len(), 1);
    assert!(p.recorder.errors.lock().is_empty());

    assert_eq!(p.queue.productive_flushes(), 1);
    assert_eq!(
        p.platform.ops(),
        vec![
            PaintOp::Create { id: 1, tag: "page".to_string() },
            PaintOp::Create { id: 2, tag: "text".to_string() },
            PaintOp::Update {
                id: 2,
                key: "text".to_string(),
                value: json!("hello"),
            },
            PaintOp::Insert {
                parent: 1,
                child: 2,
                index: 0,
            },
        ]
    );
}

#[test]
fn test_require_hits_preloaded_bundle() {
    init_logger();
    let loader = Arc::new(MemoryResourceLoader::new());
    loader.insert("u://a", component("a"));
    let mut p = page(loader.clone());
    let program = json!({"page": {"tag": "page", "children": [{"tag": "view", "attributes": {"id": "slot"}}]}});
    assert!(p.tasm.load_template("card", fiber_card(program), None, LoadOptions::default()));

    assert_eq!(p.tasm.preload_lazy_bundles(&["u://a".to_string()]), vec!["u://a".to_string()]);
    assert_eq!(p.tasm.run_pending_tasks(), 1);
    assert!(p.tasm.lazy_bundles().has_preloaded("u://a"));
    assert_eq!(loader.request_count(), 1);

    let slot = p.tasm.elements().find_by_attribute("id", &json!("slot")).unwrap();
    p.platform.take();
    assert!(p.tasm.require_template_entry("u://a", LazyBundleCallback::SyncInstance { element_id: slot }));

    assert_eq!(loader.request_count(), 1);
    let perf = p.recorder.perf.lock();
    assert_eq!(perf.len(), 1);
    assert_eq!(perf[0]["mode"], json!("preload"));
    assert_eq!(
        p.platform.ops(),
        vec![PaintOp::Update {
            id: slot,
            key: "lazyBundleState".to_string(),
            value: json!("success"),
        }]
    );
}

#[test]
fn test_overlapping_requires_share_one_failed_fetch() {
    init_logger();
    let parked: Arc<Mutex<Vec<ResourceCallback>>> = Arc::new(Mutex::new(Vec::new()));
    let mut loader = MockLoader::new();
    let sink = parked.clone();
    loader
        .expect_load()
        .withf(|request, _| request.url == "u://b")
        .times(1)
        .returning(move |_, callback| sink.lock().push(callback));

    let mut p = page(Arc::new(loader));
    let program = json!({"page": {"tag": "page"}});
    assert!(p.tasm.load_template("card", fiber_card(program), None, LoadOptions::default()));
    let painted = p.platform.len();

    let fired: Arc<Mutex<Vec<(usize, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3 {
        let fired = fired.clone();
        let callback = LazyBundleCallback::Closure(Box::new(move |message| fired.lock().push((i, message))));
        assert!(!p.tasm.require_template_entry("u://b", callback));
    }
    assert!(fired.lock().is_empty());

    let callback = parked.lock().pop().unwrap();
    callback(ResourceResponse::ok(Vec::new()));
    assert_eq!(p.tasm.run_pending_tasks(), 1);

    let fired = fired.lock();
    assert_eq!(fired.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2]);
    for (_, message) in fired.iter() {
        assert_eq!(message["code"], json!(code::LAZY_BUNDLE_LOAD_EMPTY_FILE));
        assert_eq!(message["url"], json!("u://b"));
    }

    let errors = p.recorder.errors.lock();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, code::LAZY_BUNDLE_LOAD_EMPTY_FILE);
    assert_eq!(p.tasm.entry_count(), 1);
    assert!(!p.tasm.lazy_bundles().is_requiring("u://b"));
    assert_eq!(p.platform.len(), painted);
}

#[test]
fn test_buffered_updates_fold_into_first_screen() {
    init_logger();
    let mut p = page(Arc::new(MemoryResourceLoader::new()));
    p.tasm.set_enable_pre_update_data(true);
    let updates = [
        TemplateData::with_processor(json!({"a": 1}), "p"),
        TemplateData::with_processor(json!({"a": 2}), "p"),
        TemplateData::with_processor(json!({"b": 3}), "q"),
    ];
    for data in updates {
        p.tasm
            .update_data_by_pre_parsed_data(data, UpdatePageOption::from_native(), PipelineOptions::default());
    }
    assert_eq!(p.tasm.pending_cache_data().len(), 3);

    let program = json!({
        "page": {"tag": "page"},
        "processors": {"p": {"fromP": true}, "q": {"fromQ": true}}
    });
    let init = TemplateData::new(json!({"c": 4}));
    assert!(p.tasm.load_template("card", fiber_card(program), Some(init), LoadOptions::default()));

    let vm = p.factory.last().unwrap();
    let processed: Vec<Vec<Value>> = vm
        .calls_named("processData")
        .into_iter()
        .filter(|args| matches!(args[1].as_str(), Some("p" | "q" | "")))
        .collect();
    assert_eq!(
        processed,
        vec![
            vec![json!({"a": 2}), json!("p")],
            vec![json!({"b": 3}), json!("q")],
            vec![json!({"c": 4}), json!("")],
        ]
    );
    assert_eq!(
        vm.data(),
        json!({"a": 2, "fromP": true, "b": 3, "fromQ": true, "c": 4})
    );
    assert!(p.tasm.pending_cache_data().is_empty());
}

#[test]
fn test_async_queue_waits_for_both_frame_gates() {
    init_logger();
    let queue = AsyncUiOperationQueue::new(None, Duration::from_secs(5));
    let log = Arc::new(Mutex::new(Vec::new()));

    let engine_queue = queue.clone();
    let engine_log = log.clone();
    let engine = thread::spawn(move || {
        assert!(wait_until(Duration::from_secs(5), || engine_queue.is_in_flush()));
        for i in 0..5 {
            engine_queue.enqueue_ui_operation(logged(&engine_log, i));
        }
        engine_queue.update_status(QueueStatus::TasmFinish);
        // the first batch must land before layout finishes
        assert!(wait_until(Duration::from_secs(5), || engine_log.lock().len() == 5));
        for i in 5..7 {
            engine_queue.enqueue_ui_operation(logged(&engine_log, i));
        }
        engine_queue.update_status(QueueStatus::LayoutFinish);
    });

    assert_eq!(queue.flush(), 7);
    engine.join().unwrap();
    assert_eq!(*log.lock(), (0..7).collect::<Vec<_>>());
    assert_eq!(queue.flush(), 0);
}

#[test]
fn test_dynamic_queue_swaps_to_sync() {
    init_logger();
    let ui = ThreadRunner::spawn("scenario-ui").unwrap();
    let queue = Arc::new(DynamicUiOperationQueue::new(
        QueueStrategy::Async,
        Some(ui.runner()),
        Duration::from_millis(20),
    ));
    let log = Arc::new(Mutex::new(Vec::new()));

    for i in 0..5 {
        queue.enqueue_ui_operation(logged(&log, i));
    }
    queue.update_status(QueueStatus::TasmFinish);
    for i in 5..10 {
        queue.enqueue_ui_operation(logged(&log, i));
    }
    assert_eq!(queue.pending_count(), 10);

    let (tx, rx) = unbounded();
    let ui_queue = queue.clone();
    let ui_log = log.clone();
    ui.runner().post_task(move || {
        let swapped = ui_queue.transfer(QueueStrategy::Sync);
        let flushed_by_swap = ui_log.lock().len();
        for i in 10..13 {
            ui_queue.enqueue_ui_operation(logged(&ui_log, i));
        }
        let flushed = ui_queue.flush();
        let _ = tx.send((swapped, flushed_by_swap, flushed, ui_queue.strategy()));
    });

    let (swapped, flushed_by_swap, flushed, strategy) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(swapped);
    assert_eq!(flushed_by_swap, 10);
    assert_eq!(flushed, 3);
    assert_eq!(strategy, QueueStrategy::Sync);
    assert_eq!(*log.lock(), (0..13).collect::<Vec<_>>());
    ui.join();
}

