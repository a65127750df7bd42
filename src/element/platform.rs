//! Native view layer contract

use parking_lot::Mutex;
use serde_json::Value;

use super::ElementId;

/// One mutation of the native view tree
#[derive(Debug, Clone, PartialEq)]
pub enum PaintOp {
    Create { id: ElementId, tag: String },
    Update { id: ElementId, key: String, value: Value },
    Insert { parent: ElementId, child: ElementId, index: usize },
    Remove { parent: ElementId, child: ElementId },
    Destroy { id: ElementId },
}

/// Host view layer. Called on the UI thread only.
pub trait PaintingPlatform: Send + Sync {
    fn apply(&self, op: PaintOp);
}

/// Platform that keeps every operation it receives
#[derive(Debug, Default)]
pub struct PaintRecorder {
    ops: Mutex<Vec<PaintOp>>,
}

impl PaintRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<PaintOp> {
        self.ops.lock().clone()
    }

    pub fn take(&self) -> Vec<PaintOp> {
        std::mem::take(&mut *self.ops.lock())
    }

    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }
}

impl PaintingPlatform for PaintRecorder {
    fn apply(&self, op: PaintOp) {
        log::trace!("paint {:?}", op);
        self.ops.lock().push(op);
    }
}
