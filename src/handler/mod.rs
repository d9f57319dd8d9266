//! Request dispatch for the proxy server.
//!
//! A [`DispatchTable`] maps u32 request-type opcodes to handlers. The table
//! is built once at startup and shared read-only across connections.

mod http;

pub use http::{HttpExecuteConfig, HttpExecuteHandler};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::Result;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for request handlers.
///
/// A handler receives the raw request payload and produces the raw response
/// payload. A returned error becomes an execute-exception response carrying
/// the error message.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle a request payload.
    fn call(&self, payload: Bytes) -> BoxFuture<'static, Result<Bytes>>;
}

/// Adapter turning a plain async function into a [`RequestHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    /// Wrap a function.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes>> + Send + 'static,
{
    fn call(&self, payload: Bytes) -> BoxFuture<'static, Result<Bytes>> {
        Box::pin((self.f)(payload))
    }
}

/// Read-only table of handlers keyed by request-type opcode.
pub struct DispatchTable {
    handlers: HashMap<u32, Box<dyn RequestHandler>>,
}

impl DispatchTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for an opcode, replacing any existing entry.
    pub fn register<H: RequestHandler>(&mut self, opcode: u32, handler: H) {
        self.handlers.insert(opcode, Box::new(handler));
    }

    /// Register a plain async function for an opcode.
    pub fn register_fn<F, Fut>(&mut self, opcode: u32, f: F)
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.register(opcode, FnHandler::new(f));
    }

    /// Look up the handler for an opcode.
    pub fn get(&self, opcode: u32) -> Option<&dyn RequestHandler> {
        self.handlers.get(&opcode).map(|h| h.as_ref())
    }

    /// Check whether an opcode has a handler.
    pub fn contains(&self, opcode: u32) -> bool {
        self.handlers.contains_key(&opcode)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}
