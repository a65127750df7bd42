//! # Tasm - Template Assembler Engine
//!
//! The engine side of a cross-platform UI framework: it decodes compiled
//! template bundles, binds them to a scripting VM, builds the element tree
//! and hands UI mutations to the thread that owns the native widgets.
//!
//! ## Architecture
//!
//! - **codec**: binary bundle format, reader and writer
//! - **bundle**: decoded bundle with lazily decoded CSS, chunks and templates
//! - **vm**: scripting VM contract and context pools
//! - **entry**: binding of one bundle to one VM context
//! - **resource**: resource loading and lazy bundle coalescing
//! - **element**: element tree producing UI operations
//! - **ui_queue**: sync, async and switchable UI operation queues
//! - **assembler**: the page orchestrator and its pipelines
//! - **monitor**: long tasks, batched tasks, tracked events and timing
//! - **thread**: task runners, actors and the decode worker pool
//! - **shell**: engine, script and UI thread wiring
//! - **utils**: error types, clocks and version comparison

pub mod assembler;
pub mod bundle;
pub mod codec;
pub mod config;
pub mod element;
pub mod entry;
pub mod monitor;
pub mod resource;
pub mod shell;
pub mod thread;
pub mod ui_queue;
pub mod utils;
pub mod value;
pub mod vm;

// Re-export main types for convenience
pub use assembler::{TemplateAssembler, TemplateAssemblerDelegate};
pub use bundle::TemplateBundle;
pub use config::TasmConfig;
pub use shell::Shell;
pub use utils::error::{LynxError, Result, TasmError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = "Tasm";
