//! In-process cache tier.
//!
//! Entries are either resolved (audio present) or placeholders that point at
//! the in-flight operation producing them. Every entry carries a generation
//! number; eviction timers and rollbacks only act on the generation they were
//! created for, so a timer that fires after the key was overwritten is a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::{BoxFuture, Shared};
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::Result;
use crate::filename;
use crate::key::CacheKey;

/// Shared handle to one in-flight synthesis or disk promotion.
pub(crate) type SharedFlight = Shared<BoxFuture<'static, Result<CachedAudio>>>;

/// Called by an eviction timer with the key and generation it was armed for.
pub(crate) type ExpireFn = Arc<dyn Fn(CacheKey, u64) + Send + Sync>;

/// Resolved audio for one cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAudio {
    pub filename: String,
    pub audio: Bytes,
}

impl CachedAudio {
    /// Lowercase extension; legacy files may carry an upper-case name.
    pub fn extension(&self) -> String {
        filename::extension_of(&self.filename).to_ascii_lowercase()
    }
}

#[derive(Clone)]
pub(crate) struct PendingAudio {
    pub flight: u64,
    pub task: SharedFlight,
}

pub(crate) struct MemoryEntry {
    pub filename: String,
    pub audio: Bytes,
    pub pending: Option<PendingAudio>,
    generation: u64,
    timer: Option<AbortHandle>,
}

impl MemoryEntry {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

pub(crate) struct MemoryCache {
    entries: HashMap<CacheKey, MemoryEntry>,
    next_generation: u64,
    time_memory: Duration,
    on_expire: ExpireFn,
}

impl MemoryCache {
    pub fn new(time_memory: Duration, on_expire: ExpireFn) -> Self {
        Self {
            entries: HashMap::new(),
            next_generation: 0,
            time_memory,
            on_expire,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<&MemoryEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Publish a file name for audio that is still being produced.
    pub fn put_placeholder(&mut self, key: CacheKey, filename: String, pending: PendingAudio) -> u64 {
        let generation = self.next_generation();
        let entry = MemoryEntry {
            filename,
            audio: Bytes::new(),
            pending: Some(pending),
            generation,
            timer: None,
        };
        if let Some(mut old) = self.entries.insert(key, entry) {
            old.cancel_timer();
        }
        generation
    }

    /// Install resolved audio and arm its eviction timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn put_resolved(&mut self, key: CacheKey, filename: String, audio: Bytes) -> u64 {
        let generation = self.next_generation();

        let on_expire = Arc::clone(&self.on_expire);
        let ttl = self.time_memory;
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            on_expire(timer_key, generation);
        })
        .abort_handle();

        let entry = MemoryEntry {
            filename,
            audio,
            pending: None,
            generation,
            timer: Some(timer),
        };
        if let Some(mut old) = self.entries.insert(key, entry) {
            old.cancel_timer();
        }
        generation
    }

    /// Timer callback: drop the entry only if it is still the one the timer was armed for.
    pub fn expire(&mut self, key: &CacheKey, generation: u64) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.generation == generation && entry.pending.is_none() => {
                self.entries.remove(key);
                debug!(%key, "Removed TTS audio from memory");
                true
            }
            _ => false,
        }
    }

    /// Roll back a placeholder left by a failed flight.
    pub fn remove_pending(&mut self, key: &CacheKey, flight: u64) -> bool {
        let is_placeholder = matches!(
            self.entries.get(key),
            Some(MemoryEntry { pending: Some(p), .. }) if p.flight == flight
        );
        if is_placeholder {
            self.remove(key);
        }
        is_placeholder
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<MemoryEntry> {
        let mut entry = self.entries.remove(key)?;
        entry.cancel_timer();
        Some(entry)
    }

    pub fn clear(&mut self) {
        for (_, mut entry) in self.entries.drain() {
            entry.cancel_timer();
        }
    }
}
