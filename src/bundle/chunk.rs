//! Script chunks decoded on demand or on the worker pool

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::ContextBundle;
use crate::codec::decoder::SectionDecoder;
use crate::codec::stream::DecodeResult;
use crate::thread::WorkerPool;

/// Named script chunks of one bundle
#[derive(Debug, Default)]
pub struct LepusChunkManager {
    route: BTreeMap<String, Range<usize>>,
    chunks: Mutex<HashMap<String, Arc<ContextBundle>>>,
    decoder: Option<SectionDecoder>,
    stop_thread: AtomicBool,
}

impl LepusChunkManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(route: BTreeMap<String, Range<usize>>, decoder: SectionDecoder) -> Self {
        Self {
            route,
            decoder: Some(decoder),
            ..Default::default()
        }
    }

    pub fn insert(&self, name: impl Into<String>, chunk: ContextBundle) {
        self.chunks.lock().insert(name.into(), Arc::new(chunk));
    }

    pub fn names(&self) -> Vec<String> {
        self.route.keys().cloned().collect()
    }

    pub fn is_decoded(&self, name: &str) -> bool {
        self.chunks.lock().contains_key(name)
    }

    /// Look up a chunk, decoding it on first access
    pub fn get_chunk(&self, name: &str) -> DecodeResult<Option<Arc<ContextBundle>>> {
        if let Some(chunk) = self.chunks.lock().get(name) {
            return Ok(Some(chunk.clone()));
        }
        let (Some(decoder), Some(range)) = (&self.decoder, self.route.get(name)) else {
            return Ok(None);
        };
        let chunk = Arc::new(decoder.decode_context_bundle(range.clone())?);
        let mut chunks = self.chunks.lock();
        let entry = chunks.entry(name.to_string()).or_insert(chunk);
        Ok(Some(entry.clone()))
    }

    pub fn decode_all(&self) -> DecodeResult<()> {
        for name in self.route.keys() {
            self.get_chunk(name)?;
        }
        Ok(())
    }

    pub fn start_async_decode(self: &Arc<Self>, pool: &WorkerPool) {
        let manager = Arc::clone(self);
        pool.post(move || {
            let decoded = manager.decode_all_async();
            log::debug!("async chunk decode finished, {} chunks", decoded);
        });
    }

    /// Body of the async decoder; stops between chunks once flagged
    pub fn decode_all_async(&self) -> usize {
        let Some(decoder) = &self.decoder else {
            return 0;
        };
        let mut inserted = 0;
        for (name, range) in &self.route {
            if self.is_stopped() {
                break;
            }
            if self.is_decoded(name) {
                continue;
            }
            match decoder.decode_context_bundle(range.clone()) {
                Ok(chunk) if !self.is_stopped() => {
                    self.chunks
                        .lock()
                        .entry(name.clone())
                        .or_insert_with(|| Arc::new(chunk));
                    inserted += 1;
                }
                Ok(_) => break,
                Err(err) => {
                    log::error!("async decode of chunk {} failed: {}", name, err);
                    break;
                }
            }
        }
        inserted
    }

    pub fn set_thread_stop_flag(&self, stop: bool) {
        self.stop_thread.store(stop, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_thread.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserted_chunk_lookup() {
        let manager = LepusChunkManager::new();
        manager.insert("a", ContextBundle::new(vec![1, 2, 3]));
        let chunk = manager.get_chunk("a").unwrap().unwrap();
        assert_eq!(chunk.bytes(), &[1, 2, 3]);
        assert!(manager.get_chunk("b").unwrap().is_none());
    }

    #[test]
    fn test_async_without_decoder() {
        let manager = LepusChunkManager::new();
        assert_eq!(manager.decode_all_async(), 0);
    }
}
