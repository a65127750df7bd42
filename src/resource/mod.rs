//! Resource loading and lazy bundles
//!
//! The engine asks a host `ResourceLoader` for bytes. Loaders answer through
//! a callback, from any thread, possibly before `load` returns.

pub mod lazy_bundle;
pub mod lifecycle;
pub mod loader;

pub use lazy_bundle::{FetchKind, FetchedBundle, LazyBundleLoader, LoaderEvent, RequireOutcome};
pub use lifecycle::{LazyBundleCallback, LazyBundleLifecycleOption, LoadMode};
pub use loader::{MemoryResourceLoader, TokioResourceLoader};

/// What the requested bytes are for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    LazyBundle,
    Template,
    I18n,
    Font,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub url: String,
    pub kind: ResourceKind,
}

impl ResourceRequest {
    pub fn lazy_bundle(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: ResourceKind::LazyBundle,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceResponse {
    pub data: Vec<u8>,
    /// Set when the loader failed; `data` is ignored then
    pub error: Option<String>,
}

impl ResourceResponse {
    pub fn ok(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            data: Vec::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub type ResourceCallback = Box<dyn FnOnce(ResourceResponse) + Send + 'static>;

/// Host resource fetcher. Timeouts are the loader's business.
pub trait ResourceLoader: Send + Sync {
    fn load(&self, request: ResourceRequest, callback: ResourceCallback);
}
