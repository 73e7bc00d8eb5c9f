use async_trait::async_trait;
use futures::TryStreamExt;
use once_cell::sync::OnceCell;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Proxy;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{HttpRequest, HttpResponse, ResponseBody, Transport, TransportError};

static SHARED: OnceCell<Arc<HttpTransport>> = OnceCell::new();

/// reqwest-backed [`Transport`].
///
/// No whole-request timeout is set on the client: streams are long lived and the
/// executors own every timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    connect_timeout: Duration,
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|s| s.parse::<u64>().ok())
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        // Minimal production-friendly defaults (env-overridable).
        let connect_timeout =
            Duration::from_secs(env_u64("AI_HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(10));

        let mut builder = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(
                env_u64("AI_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .map(|n| n as usize)
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(
                env_u64("AI_HTTP_POOL_IDLE_TIMEOUT_SECS").unwrap_or(90),
            )))
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Some(Duration::from_secs(30)))
            .http2_keep_alive_timeout(Duration::from_secs(10));

        if let Ok(proxy_url) = env::var("AI_PROXY_URL") {
            match Proxy::all(&proxy_url) {
                Ok(proxy) => builder = builder.proxy(proxy),
                Err(e) => warn!(error = %e, "ignoring invalid AI_PROXY_URL"),
            }
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(Self {
            client,
            connect_timeout,
        })
    }

    /// Process-wide instance so adapters share one connection pool.
    pub fn shared() -> Result<Arc<HttpTransport>, TransportError> {
        SHARED
            .get_or_try_init(|| HttpTransport::new().map(Arc::new))
            .cloned()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut req = self.client.request(request.method, &request.url);

        for (name, value) in &request.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => req = req.header(n, v),
                // The value may be a credential, so only the name is logged.
                _ => warn!(header = name.as_str(), "skipping invalid request header"),
            }
        }

        if let Some(body) = &request.body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.connect_timeout)
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Http(e)
            }
        })?;

        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp
            .bytes_stream()
            .map_err(|e| TransportError::Body(e.to_string()));

        Ok(HttpResponse {
            status,
            headers,
            body: ResponseBody::Streaming(Box::pin(body)),
        })
    }
}
