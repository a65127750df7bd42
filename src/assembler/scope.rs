//! Error scope of one assembler entry point
//!
//! Only the outermost scope on a thread is live. When it ends, the error
//! raised on this thread (if any) is handed to the delegate.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

use super::delegate::TemplateAssemblerDelegate;
use crate::utils::error::{ErrorLevel, ErrorStorage, LynxError};

thread_local! {
    static ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// What to do with errors flagged `should_abort`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorPolicy {
    pub devtool_attached: bool,
    pub logbox_enabled: bool,
}

impl ErrorPolicy {
    /// Returns the error to report, or `None` if it is swallowed
    pub fn apply(&self, mut error: LynxError) -> Option<LynxError> {
        if !error.should_abort {
            return Some(error);
        }
        if self.devtool_attached && !self.logbox_enabled {
            log::error!("fatal error kept local while a devtool is attached: {}", error);
            return None;
        }
        error.should_abort = false;
        error.level = ErrorLevel::Error;
        Some(error)
    }
}

pub struct Scope {
    delegate: Option<Arc<dyn TemplateAssemblerDelegate>>,
    policy: ErrorPolicy,
    _not_send: PhantomData<*const ()>,
}

impl Scope {
    pub fn enter(delegate: &Arc<dyn TemplateAssemblerDelegate>, policy: ErrorPolicy) -> Self {
        let outermost = ACTIVE.with(|active| !active.replace(true));
        Self {
            delegate: outermost.then(|| delegate.clone()),
            policy,
            _not_send: PhantomData,
        }
    }

    pub fn is_outermost(&self) -> bool {
        self.delegate.is_some()
    }

    pub fn is_active() -> bool {
        ACTIVE.with(Cell::get)
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        let Some(delegate) = self.delegate.take() else {
            return;
        };
        ACTIVE.with(|active| active.set(false));
        if let Some(error) = ErrorStorage::take().and_then(|error| self.policy.apply(error)) {
            delegate.on_error_occurred(error);
        }
    }
}
