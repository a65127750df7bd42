//! Context pools
//!
//! A local pool belongs to one bundle and holds contexts that already ran
//! the whole init sequence against that bundle's program. The global pool
//! is process-wide and only holds freshly created modern contexts.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::{VmContext, VmFactory};
use crate::bundle::ContextBundle;
use crate::utils::error::VmError;

static GLOBAL_POOL: Lazy<Arc<GlobalContextPool>> = Lazy::new(|| Arc::new(GlobalContextPool::new()));

#[derive(Debug, Default)]
pub struct PoolStats {
    /// Contexts created for the pool
    pub created: AtomicUsize,
    /// Takes served from the pool
    pub reused: AtomicUsize,
    /// Takes that found the pool empty
    pub misses: AtomicUsize,
}

impl PoolStats {
    pub fn hit_rate(&self) -> f64 {
        let reused = self.reused.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = reused + misses;
        if total == 0 {
            0.0
        } else {
            (reused as f64 / total as f64) * 100.0
        }
    }
}

fn take_from(contexts: &Mutex<VecDeque<Arc<dyn VmContext>>>, stats: &PoolStats) -> Option<Arc<dyn VmContext>> {
    let context = contexts.lock().pop_front();
    let counter = if context.is_some() { &stats.reused } else { &stats.misses };
    counter.fetch_add(1, Ordering::Relaxed);
    context
}

/// Contexts pre-warmed against one bundle
pub struct ContextPool {
    contexts: Mutex<VecDeque<Arc<dyn VmContext>>>,
    capacity: usize,
    stats: PoolStats,
}

impl fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPool")
            .field("available", &self.contexts.lock().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl ContextPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            contexts: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            stats: PoolStats::default(),
        }
    }

    fn prepare(
        factory: &dyn VmFactory,
        quick: bool,
        sdk_version: &str,
        program: &ContextBundle,
    ) -> Result<Arc<dyn VmContext>, VmError> {
        let context = factory.create_context(quick, false)?;
        context.set_sdk_version(sdk_version);
        context.initialize()?;
        context.register_builtin();
        context.register_lynx();
        context.deserialize(program, false)?;
        Ok(context)
    }

    /// Fill the pool up to capacity. Returns the number of contexts added.
    pub fn warm(&self, factory: &dyn VmFactory, quick: bool, sdk_version: &str, program: &ContextBundle) -> usize {
        let missing = self.capacity.saturating_sub(self.len());
        let mut added = 0;
        for _ in 0..missing {
            match Self::prepare(factory, quick, sdk_version, program) {
                Ok(context) => {
                    self.contexts.lock().push_back(context);
                    self.stats.created.fetch_add(1, Ordering::Relaxed);
                    added += 1;
                }
                Err(err) => {
                    log::warn!("context pool warm-up failed: {}", err);
                    break;
                }
            }
        }
        log::debug!("context pool warmed {} contexts", added);
        added
    }

    pub fn take(&self) -> Option<Arc<dyn VmContext>> {
        take_from(&self.contexts, &self.stats)
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}

/// Process-wide pool of modern-dialect contexts
pub struct GlobalContextPool {
    contexts: Mutex<VecDeque<Arc<dyn VmContext>>>,
    stats: PoolStats,
}

impl fmt::Debug for GlobalContextPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalContextPool")
            .field("available", &self.contexts.lock().len())
            .finish()
    }
}

impl Default for GlobalContextPool {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalContextPool {
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(VecDeque::new()),
            stats: PoolStats::default(),
        }
    }

    pub fn shared() -> Arc<GlobalContextPool> {
        GLOBAL_POOL.clone()
    }

    /// Top the pool up to `count` contexts
    pub fn fill(&self, factory: &dyn VmFactory, count: usize) -> usize {
        let missing = count.saturating_sub(self.len());
        let mut added = 0;
        for _ in 0..missing {
            match factory.create_context(true, false) {
                Ok(context) => {
                    self.contexts.lock().push_back(context);
                    self.stats.created.fetch_add(1, Ordering::Relaxed);
                    added += 1;
                }
                Err(err) => {
                    log::warn!("global context pool fill failed: {}", err);
                    break;
                }
            }
        }
        added
    }

    pub fn take(&self) -> Option<Arc<dyn VmContext>> {
        take_from(&self.contexts, &self.stats)
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.contexts.lock().clear();
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}
