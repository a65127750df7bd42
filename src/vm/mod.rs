//! Scripting VM contract
//!
//! The engine never interprets bundle programs itself. It talks to a
//! `VmContext` created by a host-supplied `VmFactory`.

pub mod declarative;
pub mod pool;

pub use declarative::{DeclarativeVm, DeclarativeVmFactory, VmState};
pub use pool::{ContextPool, GlobalContextPool, PoolStats};

use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::bundle::ContextBundle;
use crate::config::PageConfig;
use crate::element::ElementManager;
use crate::utils::error::VmError;

/// Back-pointer a VM uses to reach the engine that owns it
#[derive(Debug, Clone, Default)]
pub struct AssemblerHandle {
    pub instance_id: i32,
    pub elements: Weak<ElementManager>,
}

impl AssemblerHandle {
    pub fn new(instance_id: i32, elements: &Arc<ElementManager>) -> Self {
        Self {
            instance_id,
            elements: Arc::downgrade(elements),
        }
    }

    pub fn elements(&self) -> Option<Arc<ElementManager>> {
        self.elements.upgrade()
    }
}

/// Where an entry's context came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSource {
    FromRuntime,
    FromLocalPool,
    FromGlobalPool,
}

impl ContextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FromRuntime => "runtime",
            Self::FromLocalPool => "local_pool",
            Self::FromGlobalPool => "global_pool",
        }
    }

    /// Pooled contexts from the bundle are already deserialized
    pub fn is_prepared(&self) -> bool {
        matches!(self, Self::FromLocalPool)
    }
}

/// A running VM instance. Implementations synchronize internally; the
/// engine only calls them from its own thread.
pub trait VmContext: Send + Sync {
    /// Modern dialect (QUCK magic)
    fn is_quick(&self) -> bool;

    fn set_sdk_version(&self, version: &str);

    fn initialize(&self) -> Result<(), VmError>;

    fn register_builtin(&self);

    fn register_lynx(&self);

    fn set_assembler(&self, handle: AssemblerHandle);

    fn set_debug_info_url(&self, url: &str);

    /// Load a serialized program. With `reuse` the program is evaluated
    /// right away and its result returned.
    fn deserialize(&self, bundle: &ContextBundle, reuse: bool) -> Result<Option<Value>, VmError>;

    fn execute(&self) -> Result<(), VmError>;

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, VmError>;

    fn has_global(&self, name: &str) -> bool;

    fn set_property_to_lynx(&self, key: &str, value: Value);

    fn update_top_level_variable(&self, name: &str, value: Value);

    fn apply_page_config(&self, config: &PageConfig);

    /// Evaluate a named chunk program
    fn eval_chunk(&self, name: &str, chunk: &ContextBundle) -> Result<Option<Value>, VmError> {
        log::debug!("eval chunk {}", name);
        self.deserialize(chunk, true)
    }
}

pub trait VmFactory: Send + Sync {
    fn create_context(&self, quick: bool, disable_tracing_gc: bool) -> Result<Arc<dyn VmContext>, VmError>;
}
