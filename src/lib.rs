//! Multiplexed request proxy transport with tiered cache resolution.
//!
//! Two halves, usable together or alone:
//!
//! - A binary request/response protocol over one persistent TCP socket. A
//!   [`RequestChannel`] multiplexes concurrent calls by request id with
//!   per-request timeouts; a [`ProxyServer`] is the remote peer that
//!   executes them, including outbound HTTP fetches on behalf of clients
//!   without direct network access.
//! - A generic tiered cache. A [`cache::ResolverChain`] walks pluggable
//!   resolver tiers (memory, disk, the proxy channel, plain functions) in
//!   order, back-fills cheaper tiers on a hit, and collapses concurrent
//!   lookups of the same key into one resolution.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use relaywire::cache::{FnResolver, MemoryResolver, ResolverChain};
//!
//! # async fn demo() {
//! let mut chain: ResolverChain<String, Bytes> =
//!     ResolverChain::new("pages", |url: &String| url.clone());
//! chain.push(MemoryResolver::new("memory"));
//! chain.push(FnResolver::new("fallback", |url: &String| {
//!     let url = url.clone();
//!     async move { Ok::<_, String>(Some(Bytes::from(format!("fetched {}", url)))) }
//! }));
//!
//! let page = chain
//!     .resolve_or(&"https://example.com".to_string(), Bytes::new())
//!     .await;
//! # let _ = page;
//! # }
//! ```

pub mod cache;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;

mod writer;

pub use channel::{ChannelConfig, RequestChannel};
pub use config::AppConfig;
pub use error::{RelaywireError, Result};
pub use handler::DispatchTable;
pub use server::{ProxyServer, ServerConfig};
