use crate::types::{Audience, NewsItem, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A cached ranking. Shared read-only between the cache and its readers.
pub type RankedList = Arc<Vec<NewsItem>>;

#[derive(Default)]
struct CacheState {
    generation: u64,
    entries: HashMap<Audience, RankedList>,
}

/// Per-audience ranking cache with no expiry. Entries live until `evict_all`.
///
/// Every eviction bumps a generation counter. A value computed while an
/// eviction happened is handed back to its caller but never stored, so a
/// ranking built from pre-change data cannot outlive the change.
#[derive(Default)]
pub struct NewsCache {
    state: RwLock<CacheState>,
    evictions: AtomicU64,
}

impl NewsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, audience: Audience) -> Option<RankedList> {
        self.state.read().await.entries.get(&audience).cloned()
    }

    /// Return the cached list for `audience`, or run `producer` and cache its
    /// result. Concurrent misses each run their producer. Errors are returned
    /// as-is and leave the cache untouched.
    pub async fn compute_if_absent<F, Fut>(&self, audience: Audience, producer: F) -> Result<RankedList>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<NewsItem>>>,
    {
        let generation = {
            let state = self.state.read().await;
            if let Some(hit) = state.entries.get(&audience) {
                debug!("Cache hit for {}", audience);
                return Ok(hit.clone());
            }
            state.generation
        };

        debug!("Cache miss for {}, computing", audience);
        let computed: RankedList = Arc::new(producer().await?);

        let mut state = self.state.write().await;
        if state.generation != generation {
            info!("Cache evicted while computing {}; result not stored", audience);
            return Ok(computed);
        }
        let stored = state.entries.entry(audience).or_insert_with(|| computed.clone());
        Ok(stored.clone())
    }

    pub async fn evict_all(&self) {
        let mut state = self.state.write().await;
        state.generation += 1;
        let cleared = state.entries.len();
        state.entries.clear();
        self.evictions.fetch_add(1, Ordering::SeqCst);
        info!("Evicted news cache ({} audiences cleared)", cleared);
    }

    /// Number of `evict_all` calls so far.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::SeqCst)
    }
}
