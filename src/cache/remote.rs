//! Resolver-role tier that fetches values over the request channel.

use async_trait::async_trait;
use bytes::Bytes;

use super::resolver::{ResolveOutcome, Resolver, ResolverRole};
use crate::channel::RequestChannel;
use crate::protocol::http::{HttpExecRequest, HttpExecResponse, HttpRequestHead};

/// Fetches URL-keyed values through the proxy channel.
///
/// Transport failures (not connected, timeout, peer exception) become
/// resolver errors so the owning chain can keep trying other tiers; a
/// completed exchange with a non-success HTTP status is also an error, since
/// the error body is not the value the chain is resolving.
pub struct RemoteFetchResolver {
    name: String,
    channel: RequestChannel,
}

impl RemoteFetchResolver {
    pub fn new(name: impl Into<String>, channel: RequestChannel) -> Self {
        Self {
            name: name.into(),
            channel,
        }
    }
}

#[async_trait]
impl<K> Resolver<K, Bytes> for RemoteFetchResolver
where
    K: AsRef<str> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> ResolverRole {
        ResolverRole::Resolver
    }

    async fn resolve(&self, key: &K, _cache_key: &str) -> ResolveOutcome<Bytes> {
        let url = key.as_ref();
        let request = HttpExecRequest::new(HttpRequestHead::get(url));

        let response = match self.channel.execute_http(&request).await {
            Ok(response) => response,
            Err(e) => return ResolveOutcome::Error(format!("fetch of {} failed: {}", url, e)),
        };

        match response {
            HttpExecResponse::Exchange(exchange) if exchange.ok => {
                ResolveOutcome::hit(exchange.body)
            }
            HttpExecResponse::Exchange(exchange) => ResolveOutcome::Error(format!(
                "remote returned {} {} for {}",
                exchange.status, exchange.status_text, url
            )),
            HttpExecResponse::Exception(message) => {
                ResolveOutcome::Error(format!("remote fetch exception for {}: {}", url, message))
            }
        }
    }
}
