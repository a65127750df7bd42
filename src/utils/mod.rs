//! Shared utilities: error types, clocks and version comparison

pub mod error;
pub mod time;
pub mod version;

pub use error::{
    DecodeError, ErrorLevel, ErrorStorage, LazyBundleError, LynxError, Result, TasmError,
    UiQueueError, VmError,
};
pub use version::Version;
