//! Tiered cache resolution.
//!
//! A [`ResolverChain`] walks [`Resolver`] tiers in registration order until
//! one hits, back-fills the cache tiers that missed, and deduplicates
//! concurrent lookups of the same cache key. Concrete tiers cover memory,
//! disk, the proxy channel, and plain async functions.

mod chain;
mod disk;
mod memory;
mod remote;
mod resolver;

pub use chain::{CacheMode, ResolveOptions, ResolveStatus, ResolverChain};
pub use disk::DiskResolver;
pub use memory::MemoryResolver;
pub use remote::RemoteFetchResolver;
pub use resolver::{FnResolver, ResolveOutcome, Resolver, ResolverRole};
