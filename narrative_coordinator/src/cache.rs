//! Response cache - process-wide memo of worker responses.
//!
//! Entries are keyed by worker and context fingerprint and expire by TTL.
//! Concurrent misses on the same key are collapsed: one caller computes while
//! the others wait on the key's in-flight gate and then read the stored result.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::context_assembler::{ContextFingerprint, WorkerContext};
use crate::workers::{WorkerId, WorkerResponse};

/// Cache key: which worker, for which context content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub worker: WorkerId,
    pub fingerprint: ContextFingerprint,
}

impl CacheKey {
    pub fn new(worker: WorkerId, context: &WorkerContext) -> Self {
        Self {
            worker,
            fingerprint: context.fingerprint(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: WorkerResponse,
    expires_at: Instant,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Concurrency-safe TTL cache of successful worker responses.
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<CacheKey, CacheEntry>,
    in_flight: DashMap<CacheKey, Arc<Mutex<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    default_ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            default_ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl(), config.max_entries)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live entry, counting the hit or miss.
    pub fn get(&self, worker: WorkerId, context: &WorkerContext) -> Option<WorkerResponse> {
        let key = CacheKey::new(worker, context);
        let found = self.lookup(&key);
        self.count(found.is_some());
        found
    }

    /// Store a response. Failed responses are never stored.
    pub fn set(
        &self,
        worker: WorkerId,
        context: &WorkerContext,
        response: WorkerResponse,
        ttl: Duration,
    ) {
        self.insert(CacheKey::new(worker, context), response, ttl);
    }

    /// Return the cached response or compute it, at most once per key at a time.
    ///
    /// While one caller computes, others asking for the same key wait and then
    /// read its result. A failed computation is not stored, so a waiter that
    /// finds nothing computes for itself.
    pub async fn get_or_compute<F, Fut>(
        &self,
        worker: WorkerId,
        context: &WorkerContext,
        ttl: Duration,
        compute: F,
    ) -> WorkerResponse
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = WorkerResponse>,
    {
        let key = CacheKey::new(worker, context);
        if let Some(hit) = self.lookup(&key) {
            self.count(true);
            trace!(worker = %worker, key = %key.fingerprint, "cache hit");
            return hit;
        }

        let slot = InFlightSlot::claim(&self.in_flight, key.clone());
        let _guard = slot.gate.lock().await;

        let response = match self.lookup(&key) {
            Some(hit) => {
                self.count(true);
                debug!(worker = %worker, key = %key.fingerprint, "cache filled while waiting");
                hit
            }
            None => {
                self.count(false);
                let response = compute().await;
                self.insert(key.clone(), response.clone(), ttl);
                response
            }
        };

        response
    }

    /// Fraction of lookups that were hits. Zero before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
        }
    }

    fn lookup(&self, key: &CacheKey) -> Option<WorkerResponse> {
        let now = Instant::now();
        // The map guard must be released before removing.
        let found = self
            .entries
            .get(key)
            .map(|entry| (entry.expires_at > now).then(|| entry.response.clone()));

        match found {
            Some(Some(response)) => Some(response),
            Some(None) => {
                self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
                None
            }
            None => None,
        }
    }

    fn insert(&self, key: CacheKey, response: WorkerResponse, ttl: Duration) {
        if !response.success {
            return;
        }
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.make_room();
        }
        self.entries.insert(
            key,
            CacheEntry {
                response,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Purge expired entries; if still full, evict the one closest to expiry.
    fn make_room(&self) {
        let purged = self.purge_expired();
        if self.entries.len() < self.max_entries {
            trace!(purged, "cache purged expired entries");
            return;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());
        if let Some(victim) = victim {
            debug!(worker = %victim.worker, key = %victim.fingerprint, "cache full, evicting");
            self.entries.remove(&victim);
        }
    }

    fn count(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A caller's hold on a key's in-flight gate.
///
/// Dropping it removes the gate once no other caller holds one, including
/// when the owning future is dropped mid-compute by a deadline or cancellation.
struct InFlightSlot<'a> {
    map: &'a DashMap<CacheKey, Arc<Mutex<()>>>,
    key: CacheKey,
    gate: Arc<Mutex<()>>,
}

impl<'a> InFlightSlot<'a> {
    fn claim(map: &'a DashMap<CacheKey, Arc<Mutex<()>>>, key: CacheKey) -> Self {
        let gate = map
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self { map, key, gate }
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        // Map entry plus our clone means nobody else is queued on the gate.
        self.map.remove_if(&self.key, |_, gate| Arc::strong_count(gate) <= 2);
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_assembler::test_context;
    use crate::error::WorkerError;
    use std::sync::atomic::AtomicUsize;

    const TTL: Duration = Duration::from_secs(300);

    fn response(text: &str) -> WorkerResponse {
        WorkerResponse::new(WorkerId::NarrativeWriter).with_narrative(text)
    }

    #[test]
    fn test_get_set() {
        let cache = ResponseCache::new(TTL, 16);
        let context = test_context("look");

        assert!(cache.get(WorkerId::NarrativeWriter, &context).is_none());
        cache.set(WorkerId::NarrativeWriter, &context, response("hello"), TTL);

        let hit = cache.get(WorkerId::NarrativeWriter, &context).unwrap();
        assert_eq!(hit.narrative_text(), Some("hello"));
        // Same context, different worker.
        assert!(cache.get(WorkerId::Historian, &context).is_none());
        assert!((cache.hit_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_responses_are_not_cached() {
        let cache = ResponseCache::new(TTL, 16);
        let context = test_context("look");
        let failed =
            WorkerResponse::failed(WorkerId::NarrativeWriter, &WorkerError::Failed("x".into()));

        cache.set(WorkerId::NarrativeWriter, &context, failed, TTL);

        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_invocation_within_ttl() {
        let cache = ResponseCache::new(TTL, 16);
        let context = test_context("look");
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let compute = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            response("fresh")
        };

        cache.get_or_compute(WorkerId::NarrativeWriter, &context, TTL, compute).await;
        tokio::time::advance(Duration::from_secs(299)).await;
        let second = cache.get_or_compute(WorkerId::NarrativeWriter, &context, TTL, compute).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.narrative_text(), Some("fresh"));

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.get_or_compute(WorkerId::NarrativeWriter, &context, TTL, compute).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_compute_once() {
        let cache = ResponseCache::new(TTL, 16);
        let context = test_context("look");
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let compute = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            response("slow")
        };

        let (a, b) = tokio::join!(
            cache.get_or_compute(WorkerId::NarrativeWriter, &context, TTL, compute),
            cache.get_or_compute(WorkerId::NarrativeWriter, &context, TTL, compute),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a, b);
        assert!(cache.in_flight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_computes_release_their_gates() {
        let cache = ResponseCache::new(TTL, 64);
        let stalled = || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            response("too late")
        };

        for i in 0..20 {
            let context = test_context(&format!("look {i}"));
            let attempt = tokio::time::timeout(
                Duration::from_secs(1),
                cache.get_or_compute(WorkerId::WorldSimulator, &context, TTL, stalled),
            )
            .await;
            assert!(attempt.is_err());
        }

        assert!(cache.in_flight.is_empty());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_holder_keeps_gate_for_waiter() {
        let cache = ResponseCache::new(TTL, 16);
        let context = test_context("look");
        let slow = || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            response("slow")
        };
        let quick = || async { response("quick") };

        let (abandoned, waited) = tokio::join!(
            tokio::time::timeout(
                Duration::from_secs(1),
                cache.get_or_compute(WorkerId::WorldSimulator, &context, TTL, slow),
            ),
            async {
                tokio::task::yield_now().await;
                cache.get_or_compute(WorkerId::WorldSimulator, &context, TTL, quick).await
            },
        );

        assert!(abandoned.is_err());
        assert_eq!(waited.narrative_text(), Some("quick"));
        assert!(cache.in_flight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_prefers_expired_then_soonest() {
        let cache = ResponseCache::new(TTL, 2);
        let a = test_context("a");
        let b = test_context("b");
        let c = test_context("c");

        cache.set(WorkerId::NarrativeWriter, &a, response("a"), Duration::from_secs(10));
        cache.set(WorkerId::NarrativeWriter, &b, response("b"), Duration::from_secs(100));
        cache.set(WorkerId::NarrativeWriter, &c, response("c"), Duration::from_secs(100));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(WorkerId::NarrativeWriter, &a).is_none());
        assert!(cache.get(WorkerId::NarrativeWriter, &b).is_some());

        tokio::time::advance(Duration::from_secs(150)).await;
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_resets_counters() {
        let cache = ResponseCache::new(TTL, 16);
        let context = test_context("look");
        cache.set(WorkerId::NarrativeWriter, &context, response("x"), TTL);
        cache.get(WorkerId::NarrativeWriter, &context);

        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.hits + stats.misses, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }
}
