//! Resource loader implementations

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tokio::runtime::Handle;
use url::Url;

use super::{ResourceCallback, ResourceLoader, ResourceRequest, ResourceResponse};

/// Serves registered byte blobs synchronously
#[derive(Debug, Default)]
pub struct MemoryResourceLoader {
    resources: RwLock<HashMap<String, Vec<u8>>>,
    requests: AtomicUsize,
}

impl MemoryResourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.resources.write().insert(url.into(), data.into());
    }

    pub fn get(&self, url: &str) -> Option<Vec<u8>> {
        self.resources.read().get(url).cloned()
    }

    /// Number of `load` calls served so far
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

impl ResourceLoader for MemoryResourceLoader {
    fn load(&self, request: ResourceRequest, callback: ResourceCallback) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let response = match self.get(&request.url) {
            Some(data) => ResourceResponse::ok(data),
            None => ResourceResponse::failed(format!("no resource registered for {}", request.url)),
        };
        callback(response);
    }
}

/// Fetches on a tokio runtime. `file://` URLs are read from disk; other
/// schemes fall back to an in-memory table.
#[derive(Debug, Clone)]
pub struct TokioResourceLoader {
    handle: Handle,
    fallback: Arc<MemoryResourceLoader>,
}

type ResponseFuture = Pin<Box<dyn Future<Output = ResourceResponse> + Send>>;

impl TokioResourceLoader {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            fallback: Arc::new(MemoryResourceLoader::new()),
        }
    }

    pub fn with_fallback(handle: Handle, fallback: Arc<MemoryResourceLoader>) -> Self {
        Self { handle, fallback }
    }

    /// Resolve one request
    pub async fn fetch(fallback: Arc<MemoryResourceLoader>, request: ResourceRequest) -> ResourceResponse {
        let url = match Url::parse(&request.url) {
            Ok(url) => url,
            Err(err) => return ResourceResponse::failed(format!("invalid url {}: {}", request.url, err)),
        };
        match url.scheme() {
            "file" => {
                let Ok(path) = url.to_file_path() else {
                    return ResourceResponse::failed(format!("bad file url {}", url));
                };
                match tokio::fs::read(&path).await {
                    Ok(data) => ResourceResponse::ok(data),
                    Err(err) => ResourceResponse::failed(format!("read {}: {}", path.display(), err)),
                }
            }
            _ => match fallback.get(url.as_str()).or_else(|| fallback.get(&request.url)) {
                Some(data) => ResourceResponse::ok(data),
                None => ResourceResponse::failed(format!("unsupported resource {}", url)),
            },
        }
    }

    fn spawn(&self, future: ResponseFuture, callback: ResourceCallback) {
        self.handle.spawn(async move {
            let response = future.await;
            callback(response);
        });
    }
}

impl ResourceLoader for TokioResourceLoader {
    fn load(&self, request: ResourceRequest, callback: ResourceCallback) {
        log::debug!("fetching {}", request.url);
        let future = Box::pin(Self::fetch(self.fallback.clone(), request));
        self.spawn(future, callback);
    }
}
