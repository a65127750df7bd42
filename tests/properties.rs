//! Property tests for decoding, lazy bundles, pools, queues and data merging

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{Value, json};

use common::{DeferredLoader, component, fiber_card, fiber_options, page};
use tasm::assembler::{LoadOptions, merge_init_data};
use tasm::bundle::{CssParseToken, SharedCssFragment, TemplateBundle};
use tasm::codec::{CompileOptions, FeOption, ReaderOptions, TemplateBinaryReader, TemplateBinaryWriter};
use tasm::element::{ElementManager, PaintRecorder};
use tasm::entry::{PageConfigHolder, TemplateEntry, VmProvider};
use tasm::resource::{LazyBundleCallback, ResourceResponse};
use tasm::thread::WorkerPool;
use tasm::ui_queue::{AsyncUiOperationQueue, QueueStatus, SyncUiOperationQueue, UiOperation, UiOperationQueue};
use tasm::utils::error::{DecodeError, code};
use tasm::value::{self, TemplateData};
use tasm::vm::{AssemblerHandle, DeclarativeVmFactory};

fn fragment(id: i32, rules: &[(u32, i64)]) -> SharedCssFragment {
    let mut fragment = SharedCssFragment::new(id, Vec::new());
    for (index, (property, value)) in rules.iter().enumerate() {
        fragment.add_rule(CssParseToken::new(format!(".c{}-{}", id, index)).with_attribute(*property, json!(value)));
    }
    fragment
}

fn lazy_css_options(flexible: bool) -> CompileOptions {
    CompileOptions {
        enable_flexible_template: flexible,
        enable_lazy_css_decode: FeOption::Enable,
        ..fiber_options()
    }
}

/// A card with `css` fragments, `chunks` lepus chunks and `js` files
fn rich_card(flexible: bool, css: &[Vec<(u32, i64)>], chunks: &[Vec<u8>], js: &[String]) -> Vec<u8> {
    let mut writer = TemplateBinaryWriter::card()
        .compile_options(lazy_css_options(flexible))
        .root_lepus(json!({"page": {"tag": "page"}}).to_string().into_bytes());
    for (id, rules) in css.iter().enumerate() {
        writer = writer.css_fragment(fragment(id as i32, rules));
    }
    for (index, chunk) in chunks.iter().enumerate() {
        writer = writer.lepus_chunk(&format!("chunk-{}", index), chunk.clone());
    }
    for (index, source) in js.iter().enumerate() {
        writer = writer.js(&format!("/js/{}.js", index), source);
    }
    writer.encode()
}

fn decode(bytes: &[u8], force_greedy: bool) -> TemplateBundle {
    let options = ReaderOptions {
        force_greedy,
        worker_pool: Some(WorkerPool::new(1)),
        ..ReaderOptions::default()
    };
    TemplateBinaryReader::with_options(bytes.to_vec(), options)
        .decode()
        .unwrap()
}

fn css_rules() -> impl Strategy<Value = Vec<Vec<(u32, i64)>>> {
    prop::collection::vec(prop::collection::vec((0u32..64, -1000i64..1000), 0..4), 0..6)
}

fn chunk_bytes() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 0..4)
}

fn js_sources() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z(); ]{0,24}", 0..4)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_greedy_and_lazy_decode_agree(css in css_rules(), chunks in chunk_bytes(), flexible in any::<bool>()) {
        let bytes = rich_card(flexible, &css, &chunks, &[]);
        let greedy = decode(&bytes, true);
        let lazy = decode(&bytes, false);

        prop_assert_eq!(greedy.css_manager().decoded_count(), css.len());
        for id in 0..css.len() as i32 {
            let eager = greedy.get_css_fragment(id).unwrap().unwrap();
            let on_demand = lazy.get_css_fragment(id).unwrap().unwrap();
            prop_assert_eq!(&*eager, &*on_demand);
        }
        for index in 0..chunks.len() {
            let name = format!("chunk-{}", index);
            prop_assert!(greedy.lepus_chunk_manager().is_decoded(&name));
            let eager = greedy.get_lepus_chunk(&name).unwrap().unwrap();
            let on_demand = lazy.get_lepus_chunk(&name).unwrap().unwrap();
            prop_assert_eq!(&*eager, &*on_demand);
        }
    }

    #[test]
    fn test_section_route_points_at_section_tags(css in css_rules(), chunks in chunk_bytes(), js in js_sources()) {
        let bytes = rich_card(true, &css, &chunks, &js);
        let mut reader = TemplateBinaryReader::new(bytes.clone());
        let routed = reader.decode().unwrap();

        let mut previous_end = 0;
        let mut ranges: Vec<_> = reader.section_route().iter().collect();
        ranges.sort_by_key(|(_, range)| range.start);
        for (section, range) in ranges {
            prop_assert!(range.start < range.end);
            prop_assert!(range.end <= bytes.len());
            prop_assert!(range.start >= previous_end);
            prop_assert_eq!(bytes[range.start], section.as_u8());
            previous_end = range.end;
        }

        let flat = decode(&rich_card(false, &css, &chunks, &js), true);
        prop_assert_eq!(routed.js_bundle(), flat.js_bundle());
    }

    #[test]
    fn test_version_gate(major in 0u32..5, minor in 0u32..10, patch in prop::option::of(0u32..3)) {
        let version = match patch {
            Some(patch) => format!("{}.{}.{}", major, minor, patch),
            None => format!("{}.{}", major, minor),
        };
        let triple = (major, minor, patch.unwrap_or(0));
        let supported = triple >= (1, 0, 0) && triple <= (3, 2, 0);

        let bytes = TemplateBinaryWriter::card()
            .engine_version(&version)
            .root_lepus(b"{}".to_vec())
            .encode();
        let result = TemplateBinaryReader::new(bytes).decode();
        if supported {
            prop_assert!(result.is_ok(), "{} should load: {:?}", version, result.err());
        } else {
            prop_assert!(matches!(result, Err(DecodeError::Version(_))), "{} should be rejected", version);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_lazy_requires_share_one_fetch(callers in 1usize..6, succeed in any::<bool>()) {
        let loader = Arc::new(DeferredLoader::default());
        let mut p = page(loader.clone());
        let loaded = p.tasm.load_template("card", fiber_card(json!({"page": {"tag": "page"}})), None, LoadOptions::default());
        prop_assert!(loaded);

        let fired: Arc<Mutex<Vec<(usize, Value)>>> = Arc::new(Mutex::new(Vec::new()));
        for caller in 0..callers {
            let fired = fired.clone();
            let callback = LazyBundleCallback::Closure(Box::new(move |message| fired.lock().push((caller, message))));
            p.tasm.require_template_entry("u://lazy", callback);
        }
        prop_assert_eq!(loader.calls(), 1);

        let response = if succeed {
            ResourceResponse::ok(component("lazy"))
        } else {
            ResourceResponse::failed("offline")
        };
        prop_assert_eq!(loader.answer_all(response), 1);
        prop_assert_eq!(p.tasm.run_pending_tasks(), 1);

        let fired = fired.lock();
        prop_assert_eq!(fired.iter().map(|(caller, _)| *caller).collect::<Vec<_>>(), (0..callers).collect::<Vec<_>>());
        let expected_code = if succeed { 0 } else { code::LAZY_BUNDLE_LOAD_BAD_RESPONSE };
        for (_, message) in fired.iter() {
            prop_assert_eq!(&message["code"], &json!(expected_code));
        }
        prop_assert_eq!(p.tasm.entry_count(), if succeed { 2 } else { 1 });
        prop_assert_eq!(loader.calls(), 1);
    }

    #[test]
    fn test_pooled_context_matches_fresh_context(functions in prop::collection::btree_map("[a-z]{1,8}", any::<i32>(), 0..5)) {
        let functions: serde_json::Map<String, Value> = functions.into_iter().map(|(k, v)| (k, json!(v))).collect();
        let program = json!({"page": {"tag": "page"}, "functions": functions});
        let bytes = TemplateBinaryWriter::card()
            .compile_options(CompileOptions {
                enable_use_context_pool: true,
                ..fiber_options()
            })
            .root_lepus(program.to_string().into_bytes())
            .encode();

        let factory = Arc::new(DeclarativeVmFactory::new());
        let provider = VmProvider::new(factory.clone());
        let elements = Arc::new(ElementManager::new(
            Arc::new(SyncUiOperationQueue::new()),
            Arc::new(PaintRecorder::new()),
        ));

        let mut pooled = TemplateEntry::from_binary("pooled", bytes.clone(), ReaderOptions::default()).unwrap();
        pooled.bundle_mut().prepare_context_pool(factory.as_ref(), 1);
        pooled
            .init_with_page_configger(&PageConfigHolder::new(), &provider, AssemblerHandle::new(1, &elements), true)
            .unwrap();

        let mut fresh = TemplateEntry::from_binary("fresh", bytes, ReaderOptions::default()).unwrap();
        fresh
            .init_with_page_configger(&PageConfigHolder::new(), &provider, AssemblerHandle::new(1, &elements), true)
            .unwrap();

        prop_assert_eq!(pooled.vm_source().as_str(), "local_pool");
        prop_assert_eq!(fresh.vm_source().as_str(), "runtime");
        pooled.execute().unwrap();
        fresh.execute().unwrap();

        let contexts = factory.contexts();
        prop_assert_eq!(contexts.len(), 2);
        let (mut pooled_state, mut fresh_state) = (contexts[0].state(), contexts[1].state());
        // debug urls carry the entry name
        pooled_state.debug_info_url.clear();
        fresh_state.debug_info_url.clear();
        prop_assert_eq!(pooled_state, fresh_state);
        for name in functions.keys() {
            let pooled_vm = pooled.vm().unwrap();
            let fresh_vm = fresh.vm().unwrap();
            prop_assert_eq!(pooled_vm.call(name, &[]).unwrap(), fresh_vm.call(name, &[]).unwrap());
        }
    }
}

fn logged(log: &Arc<Mutex<Vec<usize>>>, value: usize) -> UiOperation {
    let log = log.clone();
    Box::new(move || log.lock().push(value))
}

/// Push `lanes` (true = high priority) and return the expected run order
fn push_interleaved(queue: &dyn UiOperationQueue, log: &Arc<Mutex<Vec<usize>>>, lanes: &[bool]) -> Vec<usize> {
    for (index, high) in lanes.iter().enumerate() {
        if *high {
            queue.enqueue_high_priority_operation(logged(log, index));
        } else {
            queue.enqueue_ui_operation(logged(log, index));
        }
    }
    let highs = lanes.iter().enumerate().filter(|(_, high)| **high).map(|(i, _)| i);
    let normals = lanes.iter().enumerate().filter(|(_, high)| !**high).map(|(i, _)| i);
    highs.chain(normals).collect()
}

const PROCESSORS: [&str; 3] = ["", "p", "q"];

fn template_data((processor, key, value): (usize, usize, i64)) -> TemplateData {
    TemplateData::with_processor(json!({format!("k{}", key): value}), PROCESSORS[processor])
}

fn tagged(data: &TemplateData) -> Value {
    let mut out = data.value().clone();
    value::merge(&mut out, &json!({format!("by{}", data.preprocessor_name()): true}));
    out
}

/// Reference grouping: runs of equal processor names, `init` joining the
/// last run when names match
fn expected_merge(cache: &[TemplateData], init: &TemplateData) -> (Vec<String>, Value) {
    let mut groups: Vec<TemplateData> = Vec::new();
    for item in cache {
        match groups.last_mut() {
            Some(group) if group.preprocessor_name() == item.preprocessor_name() => {
                value::merge(group.value_mut(), item.value());
            }
            _ => groups.push(TemplateData::with_processor(
                item.value().clone(),
                item.preprocessor_name(),
            )),
        }
    }
    match groups.last_mut() {
        Some(group) if group.preprocessor_name() == init.preprocessor_name() => {
            value::merge(group.value_mut(), init.value());
        }
        _ => groups.push(init.clone()),
    }
    let names = groups.iter().map(|g| g.preprocessor_name().to_string()).collect();
    let merged = value::merge_all(groups.iter().map(tagged).collect::<Vec<_>>().iter());
    (names, merged)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_sync_queue_runs_high_priority_first(lanes in prop::collection::vec(any::<bool>(), 0..32)) {
        let queue = SyncUiOperationQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let expected = push_interleaved(&queue, &log, &lanes);
        prop_assert_eq!(queue.flush(), lanes.len());
        prop_assert_eq!(&*log.lock(), &expected);
    }

    #[test]
    fn test_async_queue_runs_high_priority_first(lanes in prop::collection::vec(any::<bool>(), 0..32)) {
        let queue = AsyncUiOperationQueue::new(None, Duration::from_secs(1));
        let log = Arc::new(Mutex::new(Vec::new()));
        let expected = push_interleaved(queue.as_ref(), &log, &lanes);
        queue.update_status(QueueStatus::AllFinish);
        prop_assert_eq!(queue.flush(), lanes.len());
        prop_assert_eq!(&*log.lock(), &expected);
    }

    #[test]
    fn test_init_data_merge_order(
        cache in prop::collection::vec((0usize..3, 0usize..4, -50i64..50), 0..8),
        init in (0usize..3, 0usize..4, -50i64..50),
    ) {
        let cache: Vec<TemplateData> = cache.into_iter().map(template_data).collect();
        let init = template_data(init);

        let mut seen = Vec::new();
        let merged = merge_init_data(&cache, &init, |data, _| {
            seen.push(data.preprocessor_name().to_string());
            Ok(TemplateData::new(tagged(data)))
        })
        .unwrap();

        let (names, expected) = expected_merge(&cache, &init);
        prop_assert_eq!(seen, names);
        prop_assert_eq!(merged.value(), &expected);
    }
}

fn lazy_css_bundle(fragments: usize) -> TemplateBundle {
    let rules = vec![vec![(1u32, 1i64)]; fragments];
    decode(&rich_card(false, &rules, &[], &[]), false)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_async_queue_sync_flush_drains_both_batches(first in 0usize..12, second in 0usize..12) {
        let queue = AsyncUiOperationQueue::new(None, Duration::from_secs(5));
        let log = Arc::new(Mutex::new(Vec::new()));

        let engine_queue = queue.clone();
        let engine_log = log.clone();
        let engine = thread::spawn(move || {
            let start = Instant::now();
            while !engine_queue.is_in_flush() && start.elapsed() < Duration::from_secs(5) {
                thread::yield_now();
            }
            for i in 0..first {
                engine_queue.enqueue_ui_operation(logged(&engine_log, i));
            }
            engine_queue.update_status(QueueStatus::TasmFinish);
            for i in first..first + second {
                engine_queue.enqueue_ui_operation(logged(&engine_log, i));
            }
            engine_queue.update_status(QueueStatus::LayoutFinish);
        });

        let started = Instant::now();
        let flushed = queue.flush();
        engine.join().unwrap();
        prop_assert!(started.elapsed() < Duration::from_secs(5));
        prop_assert_eq!(flushed + queue.flush(), first + second);
        prop_assert_eq!(&*log.lock(), &(0..first + second).collect::<Vec<_>>());
    }

    #[test]
    fn test_stopped_css_decoder_inserts_nothing(fragments in 1usize..8, touched in 0usize..8) {
        let bundle = lazy_css_bundle(fragments);
        let touched = touched.min(fragments);
        for id in 0..touched as i32 {
            bundle.get_css_fragment(id).unwrap();
        }
        bundle.stop_async_decoding();

        let manager = bundle.css_manager();
        prop_assert_eq!(manager.decode_all_async(), 0);
        prop_assert_eq!(manager.decoded_count(), touched);

        let pool = WorkerPool::new(1);
        manager.start_async_decode(&pool);
        let (tx, rx) = crossbeam::channel::bounded(1);
        pool.post(move || {
            let _ = tx.send(());
        });
        prop_assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        prop_assert_eq!(manager.decoded_count(), touched);

        // on-demand decoding ignores the flag
        if fragments > touched {
            prop_assert!(bundle.get_css_fragment(touched as i32).unwrap().is_some());
            prop_assert_eq!(manager.decoded_count(), touched + 1);
        }
    }
}
