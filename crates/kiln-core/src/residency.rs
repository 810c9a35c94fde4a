//! Pipeline cache and GPU residency manager.
//!
//! The single shared mutable resource in the core. All placement mutation
//! (acquire, evict, demote, flush) goes through this object; no model wrapper
//! may move a handle between host and accelerator memory on its own, or the
//! single-resident invariant breaks silently.
//!
//! Invariants enforced here:
//! * at most one entry is accelerator-resident at any instant;
//! * the resident footprint never exceeds the configured budget — by
//!   eviction, not merely accounting;
//! * acquisition and eviction are serialized by one mutex, so no two
//!   requests can concurrently believe they are the sole resident.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::ResidencyError;
use crate::pipeline::{Pipeline, PipelineKey, PipelineLoader};

/// Where a cached handle currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Accelerator,
    Host,
}

struct Entry {
    handle: Arc<dyn Pipeline>,
    placement: Placement,
    footprint_gib: f32,
    last_used: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<PipelineKey, Entry>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Cache hit/miss/eviction counters, exposed for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Error surface of [`PipelineCache::run_resident`]: either the residency
/// layer failed, or the pipeline itself raised during inference.
#[derive(Debug, Error)]
pub enum ResidencyRunError {
    #[error(transparent)]
    Residency(#[from] ResidencyError),
    #[error("pipeline raised during inference")]
    Pipeline(#[source] anyhow::Error),
}

/// Keyed cache of loaded local pipelines with single-resident accelerator
/// placement.
///
/// Explicitly constructed and injected (no process-wide singleton); tests
/// build their own instance or call [`flush`] between cases.
///
/// [`flush`]: PipelineCache::flush
pub struct PipelineCache {
    budget_gib: f32,
    max_entries: usize,
    inner: Mutex<Inner>,
}

impl PipelineCache {
    /// * `budget_gib` — accelerator memory budget for resident pipelines.
    /// * `max_entries` — how many pipelines may stay cached in host memory;
    ///   the oldest beyond this are dropped entirely on the next acquire.
    pub fn new(budget_gib: f32, max_entries: usize) -> Self {
        Self {
            budget_gib,
            max_entries: max_entries.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Return the pipeline for `key`, loading it via `loader` on a miss, and
    /// promote it to the accelerator.
    ///
    /// Any currently resident entry is demoted to host memory first, so the
    /// single-resident invariant holds across the whole call. Loading and
    /// promotion happen under the cache lock: this is the deliberate
    /// serialization point of the core, not an accident.
    ///
    /// # Errors
    ///
    /// [`ResidencyError::ResourceExhausted`] when the candidate footprint
    /// exceeds the budget even with every other entry evicted, and
    /// [`ResidencyError::LoadFailed`] when `loader` fails.
    pub fn acquire(
        &self,
        key: &PipelineKey,
        loader: &PipelineLoader,
    ) -> Result<Arc<dyn Pipeline>, ResidencyError> {
        let mut guard = self.inner.lock().expect("pipeline cache lock poisoned");
        let inner = &mut *guard;
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.entries.contains_key(key) {
            inner.misses += 1;
            debug!(%key, "cache miss, loading pipeline");
            let loaded = loader(key).map_err(|source| ResidencyError::LoadFailed {
                key: key.to_string(),
                source,
            })?;
            if loaded.footprint_gib > self.budget_gib {
                // Nothing to evict would help; the candidate alone is too big.
                return Err(ResidencyError::ResourceExhausted {
                    key: key.to_string(),
                    needed: loaded.footprint_gib,
                    budget: self.budget_gib,
                });
            }
            inner.entries.insert(
                *key,
                Entry {
                    handle: loaded.handle,
                    placement: Placement::Host,
                    footprint_gib: loaded.footprint_gib,
                    last_used: tick,
                },
            );
        } else {
            inner.hits += 1;
            debug!(%key, "cache hit");
        }

        // Budget check for the candidate before touching placement.
        let footprint = inner.entries[key].footprint_gib;
        if footprint > self.budget_gib {
            return Err(ResidencyError::ResourceExhausted {
                key: key.to_string(),
                needed: footprint,
                budget: self.budget_gib,
            });
        }

        // Demote whichever entry is resident before promoting the candidate:
        // never both resident, not even transiently.
        for (other, entry) in inner.entries.iter_mut() {
            if entry.placement == Placement::Accelerator && other != key {
                entry.placement = Placement::Host;
                inner.evictions += 1;
                info!(evicted = %other, incoming = %key, "demoted resident pipeline to host");
            }
        }

        if let Some(entry) = inner.entries.get_mut(key) {
            entry.placement = Placement::Accelerator;
            entry.last_used = tick;
        }

        // Trim host cache beyond capacity, oldest first, never the resident.
        while inner.entries.len() > self.max_entries {
            let oldest = inner
                .entries
                .iter()
                .filter(|(_, e)| e.placement == Placement::Host)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| *k);
            match oldest {
                Some(stale) => {
                    inner.entries.remove(&stale);
                    inner.evictions += 1;
                    warn!(evicted = %stale, "dropped pipeline from host cache");
                }
                None => break,
            }
        }

        Ok(Arc::clone(&inner.entries[key].handle))
    }

    /// Explicitly demote `key` to host memory, freeing accelerator memory
    /// immediately rather than waiting for the next acquisition.
    pub fn release_to_host(&self, key: &PipelineKey) {
        let mut inner = self.inner.lock().expect("pipeline cache lock poisoned");
        if let Some(entry) = inner.entries.get_mut(key) {
            if entry.placement == Placement::Accelerator {
                entry.placement = Placement::Host;
                debug!(%key, "released pipeline to host");
            }
        }
    }

    /// Acquire, run `work` against the handle, and release to host on every
    /// path — cleanup-on-error is a contract of the local execution path,
    /// a failed request must not pin accelerator memory.
    pub fn run_resident<T>(
        &self,
        key: &PipelineKey,
        loader: &PipelineLoader,
        work: impl FnOnce(&dyn Pipeline) -> anyhow::Result<T>,
    ) -> Result<T, ResidencyRunError> {
        let handle = self.acquire(key, loader)?;
        let result = work(handle.as_ref());
        self.release_to_host(key);
        result.map_err(ResidencyRunError::Pipeline)
    }

    /// Drop every cached handle and reset placement. Used at shutdown and in
    /// test teardown so memory behavior is observable between cases.
    pub fn flush(&self) {
        let mut inner = self.inner.lock().expect("pipeline cache lock poisoned");
        let dropped = inner.entries.len();
        inner.entries.clear();
        if dropped > 0 {
            info!(dropped, "pipeline cache flushed");
        }
    }

    /// Number of accelerator-resident entries (0 or 1 by invariant).
    pub fn resident_count(&self) -> usize {
        let inner = self.inner.lock().expect("pipeline cache lock poisoned");
        inner
            .entries
            .values()
            .filter(|e| e.placement == Placement::Accelerator)
            .count()
    }

    /// Placement of `key`, if cached.
    pub fn placement(&self, key: &PipelineKey) -> Option<Placement> {
        let inner = self.inner.lock().expect("pipeline cache lock poisoned");
        inner.entries.get(key).map(|e| e.placement)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("pipeline cache lock poisoned");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            entries: inner.entries.len(),
        }
    }
}

impl std::fmt::Debug for PipelineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCache")
            .field("budget_gib", &self.budget_gib)
            .field("max_entries", &self.max_entries)
            .field("stats", &self.stats())
            .finish()
    }
}
