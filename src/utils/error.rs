//! Error types for the template assembler

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Numeric error codes surfaced to the host
pub mod code {
    pub const APP_BUNDLE_LOAD_PARSE_FAILED: i32 = 1001;
    pub const APP_BUNDLE_LOAD_RENDER_FAILED: i32 = 1002;
    pub const APP_BUNDLE_LOAD_BAD_VERSION: i32 = 1003;
    pub const APP_BUNDLE_PROTOCOL: i32 = 1004;
    pub const MTS_RUNTIME_ERROR: i32 = 1101;
    pub const UI_OPERATION_FAILED: i32 = 1401;
    pub const LAZY_BUNDLE_LOAD_BAD_RESPONSE: i32 = 1601;
    pub const LAZY_BUNDLE_LOAD_EMPTY_FILE: i32 = 1602;
    pub const LAZY_BUNDLE_LOAD_DECODE_FAILED: i32 = 1603;
}

/// Main error type for assembler operations
#[derive(Debug, Error)]
pub enum TasmError {
    /// Bundle decoding errors
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    /// Lazy bundle fetch/decode errors
    #[error("lazy bundle error: {0}")]
    LazyBundle(#[from] LazyBundleError),
    /// Scripting VM errors
    #[error("vm error: {0}")]
    Vm(#[from] VmError),
    /// UI operation errors
    #[error("ui operation error: {0}")]
    UiQueue(#[from] UiQueueError),
    /// A load or reload could not produce the page
    #[error("render failed: {0}")]
    Render(String),
    /// Misuse of the assembler API
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Configuration errors
    #[error("config error: {0}")]
    Config(String),
}

/// Bundle-format errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Tried to read past the end of the stream
    #[error("unexpected end of stream at offset {offset}, wanted {wanted} bytes")]
    ShortRead { offset: usize, wanted: usize },
    /// Header size does not match the byte length
    #[error("template file has broken. Expected size is {expected}. Actual size is {actual}")]
    SizeMismatch { expected: u32, actual: usize },
    /// Unknown magic word
    #[error("unknown binary magic: {0:#x}")]
    BadMagic(u32),
    /// Version gate failure
    #[error("{0}")]
    Version(String),
    /// Unknown or unsupported section tag
    #[error("unknown section: {0}")]
    UnknownSection(u8),
    /// A structural invariant was violated
    #[error("{0}")]
    Invalid(String),
}

/// Errors from lazy bundle loading
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LazyBundleError {
    #[error("template binary is empty")]
    EmptyFile,
    #[error("bad response: {0}")]
    BadResponse(String),
    #[error("Decoder error: {0}")]
    DecodeFailed(String),
}

impl LazyBundleError {
    /// Error code reported to the host for this failure
    pub fn code(&self) -> i32 {
        match self {
            Self::EmptyFile => code::LAZY_BUNDLE_LOAD_EMPTY_FILE,
            Self::BadResponse(_) => code::LAZY_BUNDLE_LOAD_BAD_RESPONSE,
            Self::DecodeFailed(_) => code::LAZY_BUNDLE_LOAD_DECODE_FAILED,
        }
    }
}

/// Errors raised by the scripting VM
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("context construct failed: {0}")]
    Construct(String),
    #[error("context deserialize failed: {0}")]
    DeSerialize(String),
    #[error("vm execute failed: {0}")]
    Execute(String),
    #[error("function {name} failed: {message}")]
    Call { name: String, message: String },
}

/// Errors raised while executing UI operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UiQueueError {
    #[error("operation failed: {0}")]
    Operation(String),
    #[error("flush wait timed out after {0}ms")]
    Timeout(u64),
}

/// Severity of a host-visible error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    Fatal,
    Error,
    Warn,
}

/// A host-visible error with code, message and fix suggestion
#[derive(Debug, Clone, PartialEq)]
pub struct LynxError {
    pub code: i32,
    pub message: String,
    pub suggestion: String,
    pub level: ErrorLevel,
    pub should_abort: bool,
    pub custom_info: HashMap<String, String>,
}

impl LynxError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            suggestion: String::new(),
            level: ErrorLevel::Error,
            should_abort: false,
            custom_info: HashMap::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }

    pub fn with_level(mut self, level: ErrorLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_abort(mut self, should_abort: bool) -> Self {
        self.should_abort = should_abort;
        self
    }

    pub fn with_info(mut self, key: &str, value: impl Into<String>) -> Self {
        self.custom_info.insert(key.to_string(), value.into());
        self
    }
}

impl fmt::Display for LynxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.suggestion.is_empty() {
            write!(f, " (suggestion: {})", self.suggestion)?;
        }
        Ok(())
    }
}

impl From<&TasmError> for LynxError {
    fn from(err: &TasmError) -> Self {
        let code = match err {
            TasmError::Decode(DecodeError::Version(_)) => code::APP_BUNDLE_LOAD_BAD_VERSION,
            TasmError::Decode(_) => code::APP_BUNDLE_LOAD_PARSE_FAILED,
            TasmError::LazyBundle(e) => e.code(),
            TasmError::Vm(_) => code::MTS_RUNTIME_ERROR,
            TasmError::UiQueue(_) => code::UI_OPERATION_FAILED,
            TasmError::Render(_) => code::APP_BUNDLE_LOAD_RENDER_FAILED,
            TasmError::Protocol(_) | TasmError::Config(_) => code::APP_BUNDLE_PROTOCOL,
        };
        LynxError::new(code, err.to_string())
    }
}

thread_local! {
    static ERROR_SLOT: RefCell<Option<LynxError>> = const { RefCell::new(None) };
}

/// Thread-local slot holding the first error raised on this thread
pub struct ErrorStorage;

impl ErrorStorage {
    /// Store an error if the slot is empty
    pub fn set_error(error: LynxError) {
        ERROR_SLOT.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.is_none() {
                *slot = Some(error);
            } else {
                log::debug!("error storage occupied, dropping: {}", error);
            }
        });
    }

    /// Take the stored error, leaving the slot empty
    pub fn take() -> Option<LynxError> {
        ERROR_SLOT.with(|slot| slot.borrow_mut().take())
    }

    /// Check whether an error is pending
    pub fn has_error() -> bool {
        ERROR_SLOT.with(|slot| slot.borrow().is_some())
    }

    /// Clear the slot
    pub fn reset() {
        ERROR_SLOT.with(|slot| *slot.borrow_mut() = None);
    }
}

/// Convenience Result type for assembler operations
pub type Result<T> = std::result::Result<T, TasmError>;
