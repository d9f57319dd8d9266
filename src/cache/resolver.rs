//! The resolver capability set: role, resolve, cached, save, delete.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

/// How a resolver participates in a chain.
///
/// The role decides which cache modes skip the resolver; back-fill targets
/// are chosen by outcome (tiers that reported a miss), not by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverRole {
    /// Fast, always-available store (e.g. memory). Skipped under
    /// [`CacheMode::NoCache`](super::CacheMode::NoCache).
    Cache,
    /// Authoritative or expensive source (e.g. network). Skipped under
    /// [`CacheMode::CacheOnly`](super::CacheMode::CacheOnly).
    Resolver,
    /// Behaves as both; never filtered out.
    Hybrid,
}

/// Result of asking a single resolver for a key.
#[derive(Debug)]
pub enum ResolveOutcome<V> {
    /// The resolver has the value. `invalidates_after` is an advisory
    /// freshness hint; the chain does not act on it.
    Hit {
        value: V,
        invalidates_after: Option<Duration>,
    },
    /// The resolver does not have the value.
    Miss,
    /// The resolver failed. The chain continues to later tiers; the message
    /// surfaces only if no tier hits.
    Error(String),
}

impl<V> ResolveOutcome<V> {
    /// A hit with no freshness hint.
    pub fn hit(value: V) -> Self {
        ResolveOutcome::Hit {
            value,
            invalidates_after: None,
        }
    }
}

/// A pluggable source/sink of cached values.
///
/// `cache_key` is the deterministic string identity computed by the owning
/// chain; storage-oriented resolvers key on it and may ignore the raw key.
#[async_trait]
pub trait Resolver<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send + Sync,
{
    /// Name used in log output.
    fn name(&self) -> &str;

    /// Role used for cache-mode filtering.
    fn role(&self) -> ResolverRole;

    /// Try to produce the value for a key.
    async fn resolve(&self, key: &K, cache_key: &str) -> ResolveOutcome<V>;

    /// Best-effort check whether the key is currently stored here.
    async fn cached(&self, _key: &K, _cache_key: &str) -> bool {
        false
    }

    /// Store a value resolved by a later tier. No-op for pure resolvers.
    async fn save(&self, _key: &K, _cache_key: &str, _value: &V) {}

    /// Remove any stored value for the key. No-op for pure resolvers.
    async fn delete(&self, _cache_key: &str) {}
}

/// Adapter wrapping a bare async function as a resolver-role entry, for
/// chains that only need a single fallback source.
pub struct FnResolver<F> {
    name: String,
    f: F,
}

impl<F> FnResolver<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<K, V, F, Fut> Resolver<K, V> for FnResolver<F>
where
    K: Send + Sync,
    V: Send + Sync,
    F: Fn(&K) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<V>, String>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> ResolverRole {
        ResolverRole::Resolver
    }

    async fn resolve(&self, key: &K, _cache_key: &str) -> ResolveOutcome<V> {
        match (self.f)(key).await {
            Ok(Some(value)) => ResolveOutcome::hit(value),
            Ok(None) => ResolveOutcome::Miss,
            Err(message) => ResolveOutcome::Error(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_resolver_maps_results() {
        let resolver = FnResolver::new("double", |key: &u32| {
            let key = *key;
            async move {
                match key {
                    0 => Err("zero is not allowed".to_string()),
                    k if k > 100 => Ok(None),
                    k => Ok(Some(k * 2)),
                }
            }
        });

        assert_eq!(resolver.role(), ResolverRole::Resolver);
        assert!(matches!(
            resolver.resolve(&21, "21").await,
            ResolveOutcome::Hit { value: 42, .. }
        ));
        assert!(matches!(
            resolver.resolve(&200, "200").await,
            ResolveOutcome::Miss
        ));
        assert!(matches!(
            resolver.resolve(&0, "0").await,
            ResolveOutcome::Error(_)
        ));
    }

    #[tokio::test]
    async fn test_default_capabilities_are_noops() {
        let resolver = FnResolver::new("noop", |_: &u32| async { Ok(Some(1u32)) });
        assert!(!resolver.cached(&1, "1").await);
        resolver.save(&1, "1", &1).await;
        resolver.delete("1").await;
    }
}
