//! In-memory cache tier with optional age-based expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::resolver::{ResolveOutcome, Resolver, ResolverRole};

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// Cache-role resolver backed by a plain map.
///
/// With [`with_expiry`](MemoryResolver::with_expiry), a background sweep
/// evicts entries older than `max_age` proactively, not only on access. The
/// sweeper holds a weak reference and stops once the resolver is dropped.
pub struct MemoryResolver<V> {
    name: String,
    entries: Mutex<HashMap<String, Entry<V>>>,
    max_age: Option<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<V> MemoryResolver<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// A resolver whose entries never expire.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(HashMap::new()),
            max_age: None,
        }
    }

    /// A resolver that evicts entries older than `max_age`, sweeping every
    /// `sweep_interval`. Must be called from within a tokio runtime.
    pub fn with_expiry(
        name: impl Into<String>,
        max_age: Duration,
        sweep_interval: Duration,
    ) -> Arc<Self> {
        let resolver = Arc::new(Self {
            name: name.into(),
            entries: Mutex::new(HashMap::new()),
            max_age: Some(max_age),
        });

        let weak: Weak<Self> = Arc::downgrade(&resolver);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(this) => this.sweep(),
                    None => return,
                }
            }
        });

        resolver
    }

    fn is_expired(&self, entry: &Entry<V>) -> bool {
        match self.max_age {
            Some(max_age) => entry.stored_at.elapsed() > max_age,
            None => false,
        }
    }

    fn sweep(&self) {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, entry| {
            self.max_age
                .map(|max_age| entry.stored_at.elapsed() <= max_age)
                .unwrap_or(true)
        });
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::trace!(resolver = %self.name, evicted, "swept expired entries");
        }
    }

    /// Number of stored entries, including not-yet-swept expired ones.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

#[async_trait]
impl<K, V> Resolver<K, V> for MemoryResolver<V>
where
    K: Send + Sync,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> ResolverRole {
        ResolverRole::Cache
    }

    async fn resolve(&self, _key: &K, cache_key: &str) -> ResolveOutcome<V> {
        let mut entries = lock(&self.entries);
        match entries.get(cache_key) {
            Some(entry) if self.is_expired(entry) => {
                entries.remove(cache_key);
                ResolveOutcome::Miss
            }
            Some(entry) => ResolveOutcome::Hit {
                value: entry.value.clone(),
                invalidates_after: self.max_age,
            },
            None => ResolveOutcome::Miss,
        }
    }

    async fn cached(&self, _key: &K, cache_key: &str) -> bool {
        let entries = lock(&self.entries);
        entries
            .get(cache_key)
            .map(|entry| !self.is_expired(entry))
            .unwrap_or(false)
    }

    async fn save(&self, _key: &K, cache_key: &str, value: &V) {
        lock(&self.entries).insert(
            cache_key.to_string(),
            Entry {
                value: value.clone(),
                stored_at: Instant::now(),
            },
        );
    }

    async fn delete(&self, cache_key: &str) {
        lock(&self.entries).remove(cache_key);
    }
}
