//! Response cache: fingerprint-keyed, LRU-by-byte-budget with per-entry
//! TTL, single-flight de-duplication, per `spec.md` §4.5.
//!
//! The teacher's cost/analytics modules track a running byte counter
//! alongside an `lru::LruCache`; this module follows the same shape but
//! additionally single-flights concurrent identical requests via a
//! per-fingerprint `Notify`, which the teacher's cache does not need since
//! it has no concept of in-flight upstream calls.

use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

use crate::envelope::{GenerationRequest, GenerationResponse, Input};

#[derive(Clone)]
struct CacheEntry {
    response: GenerationResponse,
    inserted_at: Instant,
    size_bytes: usize,
}

enum Slot {
    Ready(CacheEntry),
    /// Another caller is already computing this fingerprint; waiters park
    /// on the shared `Notify` and re-check the map once woken.
    InFlight(Arc<Notify>),
}

struct Inner {
    lru: LruCache<String, Slot>,
    total_bytes: usize,
}

/// Byte-budgeted, TTL'd response cache shared across the router. Always
/// held behind an `Arc` so [`ComputeGuard`] can outlive the call that
/// created it.
pub struct ResponseCache {
    inner: Mutex<Inner>,
    max_bytes: usize,
    ttl: Duration,
}

/// RAII guard returned when this call became the one responsible for
/// computing a miss. Dropping it without calling [`Self::complete`]
/// releases the other waiters with nothing cached, so a panicking or
/// cancelled computer never wedges its followers.
pub struct ComputeGuard {
    cache: Arc<ResponseCache>,
    fingerprint: String,
    notify: Arc<Notify>,
    completed: bool,
}

impl ComputeGuard {
    pub async fn complete(mut self, response: GenerationResponse) {
        self.cache.clone().insert(&self.fingerprint, response).await;
        self.completed = true;
    }
}

impl Drop for ComputeGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let cache = self.cache.clone();
        let fingerprint = std::mem::take(&mut self.fingerprint);
        let notify = self.notify.clone();
        tokio::spawn(async move {
            let mut inner = cache.inner.lock().await;
            inner.lru.pop(&fingerprint);
            drop(inner);
            notify.notify_waiters();
        });
    }
}

impl ResponseCache {
    pub fn new(max_bytes: usize, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                lru: LruCache::new(NonZeroUsize::new(usize::MAX).unwrap()),
                total_bytes: 0,
            }),
            max_bytes,
            ttl,
        })
    }

    /// `spec.md` §4.5: a request is cacheable only when it is non-streaming
    /// and carries no tool definitions.
    pub fn is_cacheable(req: &GenerationRequest) -> bool {
        req.is_cacheable()
    }

    pub fn fingerprint(model_id: &str, req: &GenerationRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model_id.as_bytes());
        match &req.input {
            Input::Prompt(p) => {
                hasher.update(b"prompt:");
                hasher.update(p.as_bytes());
            }
            Input::Messages(msgs) => {
                hasher.update(b"messages:");
                for m in msgs {
                    hasher.update(format!("{:?}", m.role).as_bytes());
                    hasher.update(m.content.as_bytes());
                }
            }
        }
        hasher.update(req.max_tokens.to_le_bytes());
        hasher.update(req.temperature.to_le_bytes());
        hasher.update(req.top_p.to_le_bytes());
        if let Some(k) = req.top_k {
            hasher.update(k.to_le_bytes());
        }
        let mut stops: Vec<&String> = req.stop.iter().collect();
        stops.sort();
        for s in stops {
            hasher.update(s.as_bytes());
        }
        if let Some(seed) = req.seed {
            hasher.update(seed.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Looks up `fingerprint`. On a miss, returns a [`ComputeGuard`] the
    /// caller must eventually `complete`; concurrent misses on the same
    /// fingerprint park here until the first caller completes or drops.
    pub async fn get_or_begin(
        self: &Arc<Self>,
        fingerprint: &str,
    ) -> Result<GenerationResponse, ComputeGuard> {
        loop {
            let notify_to_wait = {
                let mut inner = self.inner.lock().await;
                match inner.lru.get(fingerprint) {
                    Some(Slot::Ready(entry)) => {
                        if entry.inserted_at.elapsed() < self.ttl {
                            return Ok(entry.response.clone());
                        }
                        let entry = entry.clone();
                        inner.lru.pop(fingerprint);
                        inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_bytes);
                        None
                    }
                    Some(Slot::InFlight(notify)) => Some(notify.clone()),
                    None => None,
                }
            };

            if let Some(notify) = notify_to_wait {
                notify.notified().await;
                continue;
            }

            let mut inner = self.inner.lock().await;
            if let Some(Slot::InFlight(notify)) = inner.lru.peek(fingerprint) {
                let notify = notify.clone();
                drop(inner);
                notify.notified().await;
                continue;
            }
            let notify = Arc::new(Notify::new());
            inner
                .lru
                .put(fingerprint.to_string(), Slot::InFlight(notify.clone()));
            return Err(ComputeGuard {
                cache: self.clone(),
                fingerprint: fingerprint.to_string(),
                notify,
                completed: false,
            });
        }
    }

    async fn insert(self: Arc<Self>, fingerprint: &str, response: GenerationResponse) {
        let size_bytes = serde_json::to_vec(&response).map(|v| v.len()).unwrap_or(0);
        let mut inner = self.inner.lock().await;

        let notify = match inner.lru.pop(fingerprint) {
            Some(Slot::InFlight(n)) => Some(n),
            _ => None,
        };

        inner.lru.put(
            fingerprint.to_string(),
            Slot::Ready(CacheEntry {
                response,
                inserted_at: Instant::now(),
                size_bytes,
            }),
        );
        inner.total_bytes += size_bytes;

        while inner.total_bytes > self.max_bytes {
            match inner.lru.pop_lru() {
                Some((_, Slot::Ready(evicted))) => {
                    inner.total_bytes = inner.total_bytes.saturating_sub(evicted.size_bytes);
                }
                Some((_, Slot::InFlight(_))) => {}
                None => break,
            }
        }

        drop(inner);
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.lru.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::FinishReason;
    use std::collections::HashMap;

    fn req(prompt: &str) -> GenerationRequest {
        GenerationRequest::new_prompt(prompt, 64)
    }

    fn resp() -> GenerationResponse {
        GenerationResponse {
            text: "hello".to_string(),
            model_id: "openai:gpt-4".to_string(),
            provider: "openai".to_string(),
            usage: crate::envelope::Usage::new(1, 1),
            cost_usd: 0.0,
            finish_reason: FinishReason::Stop,
            latency_ms: 10,
            cached: false,
            metadata: HashMap::new(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn miss_then_complete_then_hit() {
        let cache = ResponseCache::new(1_000_000, Duration::from_secs(60));
        let fp = ResponseCache::fingerprint("openai:gpt-4", &req("hi"));
        let guard = match cache.get_or_begin(&fp).await {
            Err(g) => g,
            Ok(_) => panic!("expected miss"),
        };
        guard.complete(resp()).await;
        match cache.get_or_begin(&fp).await {
            Ok(r) => assert_eq!(r.text, "hello"),
            Err(_) => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn concurrent_misses_single_flight() {
        let cache = ResponseCache::new(1_000_000, Duration::from_secs(60));
        let fp = ResponseCache::fingerprint("openai:gpt-4", &req("hi"));

        let c1 = cache.clone();
        let fp1 = fp.clone();
        let first = tokio::spawn(async move {
            let guard = match c1.get_or_begin(&fp1).await {
                Err(g) => g,
                Ok(_) => panic!("expected miss"),
            };
            tokio::time::sleep(Duration::from_millis(20)).await;
            guard.complete(resp()).await;
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        let c2 = cache.clone();
        let fp2 = fp.clone();
        let second = tokio::spawn(async move { c2.get_or_begin(&fp2).await.is_ok() });

        first.await.unwrap();
        let second_saw_hit = second.await.unwrap();
        assert!(second_saw_hit);
    }

    #[tokio::test]
    async fn expired_entry_is_treated_as_a_miss() {
        let cache = ResponseCache::new(1_000_000, Duration::from_millis(10));
        let fp = ResponseCache::fingerprint("openai:gpt-4", &req("hi"));
        let guard = match cache.get_or_begin(&fp).await {
            Err(g) => g,
            Ok(_) => panic!("expected miss"),
        };
        guard.complete(resp()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        match cache.get_or_begin(&fp).await {
            Err(g) => g.complete(resp()).await,
            Ok(_) => panic!("expected expired entry to miss"),
        }
    }
}
