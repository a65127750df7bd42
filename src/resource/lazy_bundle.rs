//! Lazy bundle request coalescing
//!
//! Bookkeeping lives on the engine thread. Loader callbacks may fire on any
//! thread; they only push a `LoaderEvent` into the inbox and poke the wake
//! hook, so the engine applies results when it drains the inbox.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender, unbounded};

use super::lifecycle::{LazyBundleCallback, LazyBundleLifecycleOption, LoadMode};
use super::{ResourceLoader, ResourceRequest, ResourceResponse};
use crate::bundle::TemplateBundle;
use crate::codec::section::APP_TYPE_DYNAMIC_COMPONENT;
use crate::codec::{ReaderOptions, TemplateBinaryReader};
use crate::thread::WorkerPool;
use crate::utils::error::LazyBundleError;
use crate::utils::time::current_time_micros;

pub type WakeHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Require,
    Preload,
}

#[derive(Debug)]
pub enum FetchedBundle {
    /// Raw bytes, decoded on the engine thread
    Bytes(Arc<[u8]>),
    /// Decoded on a worker
    Decoded {
        bundle: Box<TemplateBundle>,
        start_decode: u64,
        end_decode: u64,
    },
}

#[derive(Debug)]
pub struct LoaderEvent {
    pub url: String,
    pub kind: FetchKind,
    pub binary_size: usize,
    pub result: Result<FetchedBundle, LazyBundleError>,
}

#[derive(Debug)]
pub enum RequireOutcome {
    /// A preloaded bundle was waiting; the option is already in preload mode
    Preloaded(Box<TemplateBundle>, LazyBundleLifecycleOption),
    /// The request joined the queue for this url
    Pending { fetch_issued: bool, sync: bool },
}

/// Decode a lazy bundle payload
pub fn decode_lazy_bundle(bytes: Arc<[u8]>) -> Result<TemplateBundle, LazyBundleError> {
    let options = ReaderOptions {
        expected_app_type: Some(APP_TYPE_DYNAMIC_COMPONENT.to_string()),
        ..ReaderOptions::default()
    };
    let mut reader = TemplateBinaryReader::with_options(bytes, options);
    reader
        .decode()
        .map_err(|err| LazyBundleError::DecodeFailed(err.to_string()))
}

fn classify(response: ResourceResponse) -> Result<Vec<u8>, LazyBundleError> {
    if let Some(error) = response.error {
        return Err(LazyBundleError::BadResponse(error));
    }
    if response.data.is_empty() {
        return Err(LazyBundleError::EmptyFile);
    }
    Ok(response.data)
}

pub struct LazyBundleLoader {
    loader: Arc<dyn ResourceLoader>,
    sender: Sender<LoaderEvent>,
    inbox: Receiver<LoaderEvent>,
    wake: Option<WakeHook>,
    worker_pool: WorkerPool,
    enable_async_decode: bool,
    requiring: HashSet<String>,
    options: HashMap<String, Vec<LazyBundleLifecycleOption>>,
    preloading: HashSet<String>,
    preloaded: HashMap<String, TemplateBundle>,
    failures: HashMap<String, String>,
    fetch_count: usize,
}

impl std::fmt::Debug for LazyBundleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyBundleLoader")
            .field("requiring", &self.requiring)
            .field("preloading", &self.preloading)
            .field("preloaded", &self.preloaded.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LazyBundleLoader {
    pub fn new(loader: Arc<dyn ResourceLoader>, worker_pool: WorkerPool) -> Self {
        let (sender, inbox) = unbounded();
        Self {
            loader,
            sender,
            inbox,
            wake: None,
            worker_pool,
            enable_async_decode: false,
            requiring: HashSet::new(),
            options: HashMap::new(),
            preloading: HashSet::new(),
            preloaded: HashMap::new(),
            failures: HashMap::new(),
            fetch_count: 0,
        }
    }

    /// Called after an event lands in the inbox
    pub fn set_wake_hook(&mut self, wake: WakeHook) {
        self.wake = Some(wake);
    }

    pub fn set_enable_async_decode(&mut self, enable: bool) {
        self.enable_async_decode = enable;
    }

    /// Fetches issued to the resource loader so far
    pub fn fetch_count(&self) -> usize {
        self.fetch_count
    }

    pub fn is_requiring(&self, url: &str) -> bool {
        self.requiring.contains(url)
    }

    pub fn has_preloaded(&self, url: &str) -> bool {
        self.preloaded.contains_key(url)
    }

    pub fn pending_options(&self, url: &str) -> usize {
        self.options.get(url).map_or(0, Vec::len)
    }

    /// Queue a request for `url`. `on_engine_thread` is false for requests
    /// relayed from another thread.
    pub fn require(
        &mut self,
        url: &str,
        instance_id: i32,
        callback: LazyBundleCallback,
        on_engine_thread: bool,
    ) -> RequireOutcome {
        if let Some(bundle) = self.preloaded.remove(url) {
            log::debug!("lazy bundle {} served from preload", url);
            let option = LazyBundleLifecycleOption::new(url, instance_id, on_engine_thread, callback)
                .with_mode(LoadMode::Preload);
            return RequireOutcome::Preloaded(Box::new(bundle), option);
        }
        let in_flight = self.requiring.contains(url) || self.preloading.contains(url);
        let sync = on_engine_thread && !in_flight;
        let option = LazyBundleLifecycleOption::new(url, instance_id, sync, callback);
        self.options.entry(url.to_string()).or_default().push(option);
        if in_flight {
            log::debug!("lazy bundle {} already in flight, callback queued", url);
            return RequireOutcome::Pending {
                fetch_issued: false,
                sync,
            };
        }
        self.requiring.insert(url.to_string());
        self.fetch(url, FetchKind::Require, sync);
        RequireOutcome::Pending {
            fetch_issued: true,
            sync,
        }
    }

    /// Start fetches for bundles not seen yet. Returns the urls fetched.
    pub fn preload<'a, I>(&mut self, urls: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut issued = Vec::new();
        for url in urls {
            if self.preloaded.contains_key(url) || self.preloading.contains(url) || self.requiring.contains(url) {
                continue;
            }
            self.preloading.insert(url.to_string());
            self.fetch(url, FetchKind::Preload, false);
            issued.push(url.to_string());
        }
        issued
    }

    fn fetch(&mut self, url: &str, kind: FetchKind, sync: bool) {
        self.fetch_count += 1;
        let sender = self.sender.clone();
        let wake = self.wake.clone();
        let pool = self.worker_pool.clone();
        let decode_off_thread = self.enable_async_decode && !sync;
        let event_url = url.to_string();
        log::info!("lazy bundle fetch {} ({:?})", url, kind);
        self.loader.load(
            ResourceRequest::lazy_bundle(url),
            Box::new(move |response| {
                let deliver = move |event: LoaderEvent| {
                    if sender.send(event).is_err() {
                        log::debug!("lazy bundle loader gone, dropping result");
                        return;
                    }
                    if let Some(wake) = &wake {
                        wake();
                    }
                };
                let bytes = match classify(response) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        deliver(LoaderEvent {
                            url: event_url,
                            kind,
                            binary_size: 0,
                            result: Err(err),
                        });
                        return;
                    }
                };
                let binary_size = bytes.len();
                let bytes: Arc<[u8]> = bytes.into();
                if !decode_off_thread {
                    deliver(LoaderEvent {
                        url: event_url,
                        kind,
                        binary_size,
                        result: Ok(FetchedBundle::Bytes(bytes)),
                    });
                    return;
                }
                pool.post(move || {
                    let start_decode = current_time_micros();
                    let result = decode_lazy_bundle(bytes).map(|bundle| FetchedBundle::Decoded {
                        bundle: Box::new(bundle),
                        start_decode,
                        end_decode: current_time_micros(),
                    });
                    deliver(LoaderEvent {
                        url: event_url,
                        kind,
                        binary_size,
                        result,
                    });
                });
            }),
        );
    }

    /// Take every event that arrived since the last drain
    pub fn drain_events(&self) -> Vec<LoaderEvent> {
        self.inbox.try_iter().collect()
    }

    /// A required fetch finished: the url is no longer in flight and the
    /// queued options are handed back in request order
    pub fn did_load_component(&mut self, url: &str) -> Vec<LazyBundleLifecycleOption> {
        self.requiring.remove(url);
        self.preloading.remove(url);
        self.options.remove(url).unwrap_or_default()
    }

    /// A preload finished. Options that queued up meanwhile are returned so
    /// the caller resolves them with this bundle.
    pub fn on_preloaded(&mut self, url: &str, bundle: Option<TemplateBundle>) -> Vec<LazyBundleLifecycleOption> {
        self.preloading.remove(url);
        let waiting = self.options.remove(url).unwrap_or_default();
        if waiting.is_empty() {
            if let Some(bundle) = bundle {
                self.preloaded.insert(url.to_string(), bundle);
            }
        }
        waiting
    }

    pub fn mark_component_failed(&mut self, url: &str, message: impl Into<String>) {
        self.failures.insert(url.to_string(), message.into());
    }

    pub fn mark_component_loaded(&mut self, url: &str) {
        self.failures.remove(url);
    }

    /// Last failure message recorded for `url`
    pub fn failure_message(&self, url: &str) -> Option<&str> {
        self.failures.get(url).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TemplateBinaryWriter;
    use crate::resource::MemoryResourceLoader;

    fn lazy_bundle_bytes() -> Vec<u8> {
        TemplateBinaryWriter::dynamic_component()
            .root_lepus(br#"{"exports":{"ok":true}}"#.to_vec())
            .encode()
    }

    fn loader_with(resources: &[(&str, Vec<u8>)]) -> (LazyBundleLoader, Arc<MemoryResourceLoader>) {
        let memory = Arc::new(MemoryResourceLoader::new());
        for (url, bytes) in resources {
            memory.insert(*url, bytes.clone());
        }
        (LazyBundleLoader::new(memory.clone(), WorkerPool::new(1)), memory)
    }

    #[test]
    fn test_requests_coalesce_per_url() {
        let (mut loader, memory) = loader_with(&[("u://a", lazy_bundle_bytes())]);
        // the memory loader answers inline; the url stays in flight until drained
        let first = loader.require("u://a", 1, LazyBundleCallback::None, true);
        let second = loader.require("u://a", 1, LazyBundleCallback::None, true);
        assert!(matches!(first, RequireOutcome::Pending { fetch_issued: true, sync: true }));
        assert!(matches!(second, RequireOutcome::Pending { fetch_issued: false, sync: false }));
        assert_eq!(memory.request_count(), 1);
        assert_eq!(loader.pending_options("u://a"), 2);

        let events = loader.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].result, Ok(FetchedBundle::Bytes(_))));
        let options = loader.did_load_component("u://a");
        assert_eq!(options.len(), 2);
        assert!(options[0].sync && !options[1].sync);
        assert!(!loader.is_requiring("u://a"));
    }

    #[test]
    fn test_empty_and_missing_responses() {
        let (mut loader, _) = loader_with(&[("u://empty", Vec::new())]);
        loader.require("u://empty", 1, LazyBundleCallback::None, true);
        loader.require("u://missing", 1, LazyBundleCallback::None, true);
        let events = loader.drain_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].result.as_ref().unwrap_err(), &LazyBundleError::EmptyFile);
        assert!(matches!(events[1].result, Err(LazyBundleError::BadResponse(_))));
    }

    #[test]
    fn test_preload_then_require() {
        let (mut loader, memory) = loader_with(&[("u://a", lazy_bundle_bytes())]);
        assert_eq!(loader.preload(["u://a", "u://a"]), vec!["u://a".to_string()]);
        let event = loader.drain_events().pop().unwrap();
        let Ok(FetchedBundle::Bytes(bytes)) = event.result else {
            panic!("expected bytes");
        };
        let bundle = decode_lazy_bundle(bytes).unwrap();
        assert!(loader.on_preloaded("u://a", Some(bundle)).is_empty());
        assert!(loader.has_preloaded("u://a"));

        match loader.require("u://a", 1, LazyBundleCallback::None, true) {
            RequireOutcome::Preloaded(_, option) => assert_eq!(option.mode, LoadMode::Preload),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(memory.request_count(), 1);
        assert!(!loader.has_preloaded("u://a"));
    }

    #[test]
    fn test_async_decode_runs_on_worker() {
        let (mut loader, _) = loader_with(&[("u://a", lazy_bundle_bytes())]);
        loader.set_enable_async_decode(true);
        let (tx, rx) = crossbeam::channel::unbounded();
        loader.set_wake_hook(Arc::new(move || {
            let _ = tx.send(());
        }));
        // off the engine thread the request is async
        loader.require("u://a", 1, LazyBundleCallback::None, false);
        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        let event = loader.drain_events().pop().unwrap();
        assert!(matches!(event.result, Ok(FetchedBundle::Decoded { .. })));
    }

    #[test]
    fn test_decode_rejects_card() {
        let card = TemplateBinaryWriter::card().encode();
        assert!(matches!(
            decode_lazy_bundle(card.into()),
            Err(LazyBundleError::DecodeFailed(_))
        ));
    }
}
