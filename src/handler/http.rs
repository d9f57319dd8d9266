//! Handler performing outbound HTTP fetches on behalf of channel clients.
//!
//! The client environment may not have raw outbound network access; this
//! handler is where the real fetch happens. The exchange outcome (including
//! remote failure statuses) is always encoded as a successful response
//! payload; only an exception inside the fetch itself produces the
//! exception result byte.

use std::time::Duration;

use bytes::Bytes;

use super::{BoxFuture, RequestHandler};
use crate::error::Result;
use crate::protocol::http::{HttpExchange, HttpExecRequest, HttpExecResponse};

/// Configuration for the HTTP execute handler.
#[derive(Debug, Clone)]
pub struct HttpExecuteConfig {
    /// User-Agent string for outbound requests.
    pub user_agent: String,
    /// Outbound request timeout. Keep below the channel's 15-second request
    /// deadline so the client sees the real failure, not a timeout.
    pub timeout: Duration,
    /// Maximum response body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for HttpExecuteConfig {
    fn default() -> Self {
        Self {
            user_agent: "relaywire/0.1".to_string(),
            timeout: Duration::from_secs(10),
            max_body_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Executes HTTP requests described by [`HttpExecRequest`] payloads.
#[derive(Clone)]
pub struct HttpExecuteHandler {
    http: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpExecuteHandler {
    /// Build the handler and its HTTP client.
    pub fn new(config: &HttpExecuteConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .use_rustls_tls()
            .gzip(true)
            .build()?;

        Ok(Self {
            http,
            max_body_bytes: config.max_body_bytes,
        })
    }

    async fn perform(&self, request: HttpExecRequest) -> HttpExecResponse {
        let method = match reqwest::Method::from_bytes(request.head.method.as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return HttpExecResponse::Exception(format!(
                    "invalid HTTP method {:?}",
                    request.head.method
                ))
            }
        };

        let mut builder = self.http.request(method, &request.head.url);
        for (key, value) in &request.head.headers {
            builder = builder.header(key, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return HttpExecResponse::Exception(format!("fetch failed: {}", e)),
        };

        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or_default().to_string();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(key, value)| {
                (
                    key.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect();

        if let Some(length) = response.content_length() {
            if length as usize > self.max_body_bytes {
                return HttpExecResponse::Exception(format!(
                    "response of {} bytes exceeds limit {}",
                    length, self.max_body_bytes
                ));
            }
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                return HttpExecResponse::Exception(format!("failed to read response body: {}", e))
            }
        };
        if body.len() > self.max_body_bytes {
            return HttpExecResponse::Exception(format!(
                "response of {} bytes exceeds limit {}",
                body.len(),
                self.max_body_bytes
            ));
        }

        HttpExecResponse::Exchange(HttpExchange {
            status: status.as_u16() as u32,
            status_text,
            headers,
            body,
            ok: status.is_success(),
        })
    }
}

impl RequestHandler for HttpExecuteHandler {
    fn call(&self, payload: Bytes) -> BoxFuture<'static, Result<Bytes>> {
        let this = self.clone();
        Box::pin(async move {
            let request = HttpExecRequest::decode(payload)?;
            tracing::debug!(
                url = %request.head.url,
                method = %request.head.method,
                body_len = request.body.len(),
                "executing HTTP request"
            );
            Ok(this.perform(request).await.encode())
        })
    }
}
