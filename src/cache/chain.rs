//! Ordered resolver chain with single-flight deduplication and back-fill.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;

use super::resolver::{ResolveOutcome, Resolver, ResolverRole};

/// Which resolver roles participate in a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// All resolvers participate.
    #[default]
    Normal,
    /// Skip resolver-role entries; only consult caches.
    CacheOnly,
    /// Skip cache-role entries; go straight to authoritative sources.
    NoCache,
}

impl CacheMode {
    fn skips(self, role: ResolverRole) -> bool {
        match self {
            CacheMode::Normal => false,
            CacheMode::CacheOnly => role == ResolverRole::Resolver,
            CacheMode::NoCache => role == ResolverRole::Cache,
        }
    }
}

/// Per-call resolution options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    pub cache_mode: CacheMode,
}

/// Terminal result of a chain resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveStatus<V> {
    /// Some resolver produced the value.
    Resolved(V),
    /// Every consulted resolver missed.
    Missing,
    /// No resolver hit and at least one failed; carries the last failure.
    Error(String),
}

impl<V> ResolveStatus<V> {
    /// Unwrap to a value, substituting `default` for missing/error.
    pub fn unwrap_or(self, default: V) -> V {
        match self {
            ResolveStatus::Resolved(value) => value,
            ResolveStatus::Missing | ResolveStatus::Error(_) => default,
        }
    }
}

type FlightMap<V> = Mutex<HashMap<String, broadcast::Sender<ResolveStatus<V>>>>;

/// A keyed cache that walks resolvers in registration order.
///
/// The fastest tier should be registered first: it is consulted first and
/// back-filled when a later tier hits. Concurrent resolutions of the same
/// cache key share one walk; waiters receive the winner's result.
pub struct ResolverChain<K, V> {
    name: String,
    cache_key_fn: Box<dyn Fn(&K) -> String + Send + Sync>,
    resolvers: Vec<Arc<dyn Resolver<K, V>>>,
    in_flight: FlightMap<V>,
}

/// Removes the in-flight marker when the leading resolution unwinds, so
/// queued waiters observe a closed channel and retry instead of hanging.
struct FlightGuard<'a, V> {
    flights: &'a FlightMap<V>,
    cache_key: &'a str,
}

impl<V> Drop for FlightGuard<'_, V> {
    fn drop(&mut self) {
        lock(self.flights).remove(self.cache_key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<K, V> ResolverChain<K, V>
where
    K: Send + Sync,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty chain. `cache_key_fn` must be deterministic: equal
    /// raw keys must always map to equal cache keys.
    pub fn new(
        name: impl Into<String>,
        cache_key_fn: impl Fn(&K) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            cache_key_fn: Box::new(cache_key_fn),
            resolvers: Vec::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Append a resolver. Order is significant.
    pub fn push<R>(&mut self, resolver: R)
    where
        R: Resolver<K, V> + 'static,
    {
        self.resolvers.push(Arc::new(resolver));
    }

    /// Append an already-shared resolver.
    pub fn push_shared(&mut self, resolver: Arc<dyn Resolver<K, V>>) {
        self.resolvers.push(resolver);
    }

    /// The cache key the chain derives for a raw key.
    pub fn cache_key(&self, key: &K) -> String {
        (self.cache_key_fn)(key)
    }

    /// Resolve with default options.
    pub async fn resolve(&self, key: &K) -> ResolveStatus<V> {
        self.resolve_with(key, ResolveOptions::default()).await
    }

    /// Resolve, substituting `default` for any non-resolved status. Callers
    /// that need error detail must use [`resolve`](Self::resolve).
    pub async fn resolve_or(&self, key: &K, default: V) -> V {
        self.resolve(key).await.unwrap_or(default)
    }

    /// Resolve with explicit options.
    pub async fn resolve_with(&self, key: &K, options: ResolveOptions) -> ResolveStatus<V> {
        let cache_key = self.cache_key(key);
        loop {
            let subscribed = {
                let mut flights = lock(&self.in_flight);
                match flights.entry(cache_key.clone()) {
                    Entry::Occupied(entry) => Err(entry.get().subscribe()),
                    Entry::Vacant(entry) => {
                        let (tx, _) = broadcast::channel(1);
                        entry.insert(tx.clone());
                        Ok(tx)
                    }
                }
            };
            let leader = match subscribed {
                Err(mut rx) => match rx.recv().await {
                    Ok(status) => return status,
                    // The leading resolution unwound without a
                    // result; take over.
                    Err(_) => continue,
                },
                Ok(tx) => tx,
            };

            let guard = FlightGuard {
                flights: &self.in_flight,
                cache_key: &cache_key,
            };
            let status = self.run_chain(key, &cache_key, options).await;
            // Clear the marker before publishing so a caller arriving after
            // the result starts a fresh resolution.
            drop(guard);
            let _ = leader.send(status.clone());
            return status;
        }
    }

    /// Walk the chain once: first hit wins and back-fills earlier misses.
    async fn run_chain(&self, key: &K, cache_key: &str, options: ResolveOptions) -> ResolveStatus<V> {
        let mut missed: Vec<&Arc<dyn Resolver<K, V>>> = Vec::new();
        let mut last_error: Option<String> = None;

        for resolver in &self.resolvers {
            if options.cache_mode.skips(resolver.role()) {
                continue;
            }
            match resolver.resolve(key, cache_key).await {
                ResolveOutcome::Hit { value, .. } => {
                    tracing::trace!(
                        chain = %self.name,
                        resolver = resolver.name(),
                        cache_key,
                        "resolved"
                    );
                    for tier in &missed {
                        tier.save(key, cache_key, &value).await;
                    }
                    return ResolveStatus::Resolved(value);
                }
                ResolveOutcome::Miss => missed.push(resolver),
                ResolveOutcome::Error(message) => {
                    tracing::debug!(
                        chain = %self.name,
                        resolver = resolver.name(),
                        cache_key,
                        error = %message,
                        "resolver failed, trying next tier"
                    );
                    last_error = Some(message);
                }
            }
        }

        match last_error {
            Some(message) => ResolveStatus::Error(message),
            None => ResolveStatus::Missing,
        }
    }

    /// Best-effort check whether any resolver currently holds the key.
    pub async fn cached(&self, key: &K) -> bool {
        let cache_key = self.cache_key(key);
        for resolver in &self.resolvers {
            if resolver.cached(key, &cache_key).await {
                return true;
            }
        }
        false
    }

    /// Propagate deletion to every resolver unconditionally.
    pub async fn delete(&self, key: &K) {
        let cache_key = self.cache_key(key);
        for resolver in &self.resolvers {
            resolver.delete(&cache_key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted tier that records how it was driven.
    struct Scripted {
        name: &'static str,
        role: ResolverRole,
        outcome: Box<dyn Fn() -> ResolveOutcome<String> + Send + Sync>,
        resolve_calls: AtomicUsize,
        saves: Mutex<Vec<(String, String)>>,
        deletes: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl Scripted {
        fn new(
            name: &'static str,
            role: ResolverRole,
            outcome: impl Fn() -> ResolveOutcome<String> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                role,
                outcome: Box::new(outcome),
                resolve_calls: AtomicUsize::new(0),
                saves: Mutex::new(Vec::new()),
                deletes: Mutex::new(Vec::new()),
                delay: None,
            })
        }

        fn slow(
            name: &'static str,
            delay: Duration,
            outcome: impl Fn() -> ResolveOutcome<String> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                role: ResolverRole::Resolver,
                outcome: Box::new(outcome),
                resolve_calls: AtomicUsize::new(0),
                saves: Mutex::new(Vec::new()),
                deletes: Mutex::new(Vec::new()),
                delay: Some(delay),
            })
        }

        fn calls(&self) -> usize {
            self.resolve_calls.load(Ordering::SeqCst)
        }

        fn saved(&self) -> Vec<(String, String)> {
            lock(&self.saves).clone()
        }
    }

    #[async_trait]
    impl Resolver<String, String> for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn role(&self) -> ResolverRole {
            self.role
        }

        async fn resolve(&self, _key: &String, _cache_key: &str) -> ResolveOutcome<String> {
            self.resolve_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.outcome)()
        }

        async fn save(&self, _key: &String, cache_key: &str, value: &String) {
            lock(&self.saves).push((cache_key.to_string(), value.clone()));
        }

        async fn delete(&self, cache_key: &str) {
            lock(&self.deletes).push(cache_key.to_string());
        }
    }

    fn identity_chain() -> ResolverChain<String, String> {
        ResolverChain::new("test", |key: &String| key.clone())
    }

    #[tokio::test]
    async fn test_first_hit_wins() {
        let first = Scripted::new("first", ResolverRole::Cache, || {
            ResolveOutcome::hit("from-first".to_string())
        });
        let second = Scripted::new("second", ResolverRole::Resolver, || {
            ResolveOutcome::hit("from-second".to_string())
        });

        let mut chain = identity_chain();
        chain.push_shared(first.clone());
        chain.push_shared(second.clone());

        let status = chain.resolve(&"k".to_string()).await;
        assert_eq!(status, ResolveStatus::Resolved("from-first".to_string()));
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_miss_then_hit_backfills_missed_tier() {
        let cache = Scripted::new("cache", ResolverRole::Cache, || ResolveOutcome::Miss);
        let source = Scripted::new("source", ResolverRole::Resolver, || {
            ResolveOutcome::hit("value".to_string())
        });

        let mut chain = identity_chain();
        chain.push_shared(cache.clone());
        chain.push_shared(source.clone());

        let status = chain.resolve(&"k".to_string()).await;
        assert_eq!(status, ResolveStatus::Resolved("value".to_string()));
        // Back-fill completed before resolve returned.
        assert_eq!(cache.saved(), vec![("k".to_string(), "value".to_string())]);
        assert!(source.saved().is_empty());
    }

    #[tokio::test]
    async fn test_error_tier_continues_chain_and_gets_no_backfill() {
        let broken = Scripted::new("broken", ResolverRole::Cache, || {
            ResolveOutcome::Error("disk on fire".to_string())
        });
        let source = Scripted::new("source", ResolverRole::Resolver, || {
            ResolveOutcome::hit("value".to_string())
        });

        let mut chain = identity_chain();
        chain.push_shared(broken.clone());
        chain.push_shared(source.clone());

        let status = chain.resolve(&"k".to_string()).await;
        assert_eq!(status, ResolveStatus::Resolved("value".to_string()));
        assert!(broken.saved().is_empty());
    }

    #[tokio::test]
    async fn test_all_miss_is_missing() {
        let mut chain = identity_chain();
        chain.push_shared(Scripted::new("a", ResolverRole::Cache, || {
            ResolveOutcome::Miss
        }));
        chain.push_shared(Scripted::new("b", ResolverRole::Resolver, || {
            ResolveOutcome::Miss
        }));

        assert_eq!(chain.resolve(&"k".to_string()).await, ResolveStatus::Missing);
    }

    #[tokio::test]
    async fn test_last_error_surfaces_when_nothing_hits() {
        let mut chain = identity_chain();
        chain.push_shared(Scripted::new("a", ResolverRole::Cache, || {
            ResolveOutcome::Error("first failure".to_string())
        }));
        chain.push_shared(Scripted::new("b", ResolverRole::Resolver, || {
            ResolveOutcome::Error("second failure".to_string())
        }));

        assert_eq!(
            chain.resolve(&"k".to_string()).await,
            ResolveStatus::Error("second failure".to_string())
        );
    }

    #[tokio::test]
    async fn test_cache_only_never_invokes_resolver_role() {
        let cache = Scripted::new("cache", ResolverRole::Cache, || ResolveOutcome::Miss);
        let source = Scripted::new("source", ResolverRole::Resolver, || {
            ResolveOutcome::hit("value".to_string())
        });
        let hybrid = Scripted::new("hybrid", ResolverRole::Hybrid, || ResolveOutcome::Miss);

        let mut chain = identity_chain();
        chain.push_shared(cache.clone());
        chain.push_shared(source.clone());
        chain.push_shared(hybrid.clone());

        let status = chain
            .resolve_with(
                &"k".to_string(),
                ResolveOptions {
                    cache_mode: CacheMode::CacheOnly,
                },
            )
            .await;
        assert_eq!(status, ResolveStatus::Missing);
        assert_eq!(source.calls(), 0);
        assert_eq!(cache.calls(), 1);
        assert_eq!(hybrid.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_cache_never_invokes_cache_role() {
        let cache = Scripted::new("cache", ResolverRole::Cache, || {
            ResolveOutcome::hit("stale".to_string())
        });
        let source = Scripted::new("source", ResolverRole::Resolver, || {
            ResolveOutcome::hit("fresh".to_string())
        });

        let mut chain = identity_chain();
        chain.push_shared(cache.clone());
        chain.push_shared(source.clone());

        let status = chain
            .resolve_with(
                &"k".to_string(),
                ResolveOptions {
                    cache_mode: CacheMode::NoCache,
                },
            )
            .await;
        assert_eq!(status, ResolveStatus::Resolved("fresh".to_string()));
        assert_eq!(cache.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_flight() {
        let source = Scripted::slow("slow", Duration::from_millis(100), || {
            ResolveOutcome::hit("shared".to_string())
        });

        let mut chain = identity_chain();
        chain.push_shared(source.clone());
        let chain = Arc::new(chain);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let chain = chain.clone();
            tasks.push(tokio::spawn(
                async move { chain.resolve(&"k".to_string()).await },
            ));
        }

        for task in tasks {
            assert_eq!(
                task.await.unwrap(),
                ResolveStatus::Resolved("shared".to_string())
            );
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_resolve_independently() {
        let source = Scripted::slow("slow", Duration::from_millis(50), || {
            ResolveOutcome::hit("v".to_string())
        });

        let mut chain = identity_chain();
        chain.push_shared(source.clone());
        let chain = Arc::new(chain);

        let a = {
            let chain = chain.clone();
            tokio::spawn(async move { chain.resolve(&"a".to_string()).await })
        };
        let b = {
            let chain = chain.clone();
            tokio::spawn(async move { chain.resolve(&"b".to_string()).await })
        };
        a.await.unwrap();
        b.await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_colliding_cache_keys_share_identity() {
        // Deliberately collapse every raw key onto one cache key.
        let source = Scripted::slow("slow", Duration::from_millis(100), || {
            ResolveOutcome::hit("collided".to_string())
        });

        let mut chain: ResolverChain<String, String> =
            ResolverChain::new("colliding", |_: &String| "constant".to_string());
        chain.push_shared(source.clone());
        let chain = Arc::new(chain);

        let a = {
            let chain = chain.clone();
            tokio::spawn(async move { chain.resolve(&"first".to_string()).await })
        };
        let b = {
            let chain = chain.clone();
            tokio::spawn(async move { chain.resolve(&"second".to_string()).await })
        };

        assert_eq!(
            a.await.unwrap(),
            ResolveStatus::Resolved("collided".to_string())
        );
        assert_eq!(
            b.await.unwrap(),
            ResolveStatus::Resolved("collided".to_string())
        );
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_leader_does_not_strand_waiters() {
        let source = Scripted::slow("slow", Duration::from_secs(10), || {
            ResolveOutcome::hit("never".to_string())
        });
        let mut chain = identity_chain();
        chain.push_shared(source.clone());
        let chain = Arc::new(chain);

        let leader = {
            let chain = chain.clone();
            tokio::spawn(async move { chain.resolve(&"k".to_string()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();
        let _ = leader.await;

        // The marker is gone; a new resolution can start.
        assert!(lock(&chain.in_flight).is_empty());
    }

    #[tokio::test]
    async fn test_resolve_or_maps_missing_and_error_to_default() {
        let mut chain = identity_chain();
        chain.push_shared(Scripted::new("miss", ResolverRole::Cache, || {
            ResolveOutcome::Miss
        }));
        assert_eq!(
            chain.resolve_or(&"k".to_string(), "fallback".to_string()).await,
            "fallback"
        );

        let mut chain = identity_chain();
        chain.push_shared(Scripted::new("err", ResolverRole::Cache, || {
            ResolveOutcome::Error("boom".to_string())
        }));
        assert_eq!(
            chain.resolve_or(&"k".to_string(), "fallback".to_string()).await,
            "fallback"
        );
    }

    #[tokio::test]
    async fn test_delete_propagates_to_all_resolvers() {
        let a = Scripted::new("a", ResolverRole::Cache, || ResolveOutcome::Miss);
        let b = Scripted::new("b", ResolverRole::Resolver, || ResolveOutcome::Miss);

        let mut chain = identity_chain();
        chain.push_shared(a.clone());
        chain.push_shared(b.clone());
        chain.delete(&"k".to_string()).await;

        assert_eq!(lock(&a.deletes).clone(), vec!["k".to_string()]);
        assert_eq!(lock(&b.deletes).clone(), vec!["k".to_string()]);
    }
}
