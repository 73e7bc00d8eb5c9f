//! Mock HTTP server setup for integration tests

use ai_lib_relay::transport::HttpTransport;
use ai_lib_relay::{
    get_adapter_with_transport, CallConfig, EventEmitter, Message, ModelOptions, ProviderAdapter,
    RetryPolicy, StreamEvent,
};
use mockito::{Mock, Server, ServerGuard};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Test fixture that manages a mock server
pub struct MockServerFixture {
    pub server: Arc<Mutex<ServerGuard>>,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        Self {
            server: Arc::new(Mutex::new(server)),
            base_url,
        }
    }

    /// Adapter for `provider` over a real reqwest transport
    pub fn adapter(&self, provider: &str) -> Arc<dyn ProviderAdapter> {
        let transport = HttpTransport::new().expect("transport");
        get_adapter_with_transport(provider, Arc::new(transport)).expect("adapter")
    }

    /// Call config pointed at the mock server, with fast retries
    pub fn config(&self, path_prefix: &str) -> CallConfig {
        CallConfig::new()
            .with_base_url(format!("{}{}", self.base_url, path_prefix))
            .with_retry(RetryPolicy::default().with_delays(5, 20))
    }

    /// Create a mock for a successful streaming response (SSE)
    pub async fn mock_sse_stream(&self, path: &str, chunks: &[&str]) -> Mock {
        let mut server = self.server.lock().await;
        let body = chunks
            .iter()
            .map(|chunk| {
                if has_field_line(chunk) {
                    format!("{}\n\n", chunk)
                } else {
                    format!("data: {}\n\n", chunk)
                }
            })
            .collect::<Vec<_>>()
            .join("");
        server
            .mock("POST", path)
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await
    }

    /// Create a mock for an NDJSON streaming response
    pub async fn mock_ndjson_stream(&self, path: &str, lines: &[&str]) -> Mock {
        let mut server = self.server.lock().await;
        let body = lines.iter().map(|l| format!("{}\n", l)).collect::<String>();
        server
            .mock("POST", path)
            .with_status(200)
            .with_header("content-type", "application/x-ndjson")
            .with_body(body)
            .create_async()
            .await
    }

    /// Create a mock for a JSON response
    pub async fn mock_json_response(&self, method: &str, path: &str, status: usize, body: &str) -> Mock {
        let mut server = self.server.lock().await;
        server
            .mock(method, path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    /// Create a mock for an error response that must be hit exactly `hits` times
    pub async fn mock_error_response(&self, path: &str, status: usize, body: &str, hits: usize) -> Mock {
        let mut server = self.server.lock().await;
        server
            .mock("POST", path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }
}

/// True when the chunk already spells out its SSE fields (including `:` comments)
fn has_field_line(chunk: &str) -> bool {
    chunk.lines().any(|line| {
        line.starts_with(':')
            || ["data:", "event:", "id:", "retry:"]
                .iter()
                .any(|field| line.starts_with(field))
    })
}

/// Run one streaming call to completion and collect every event it produced
pub async fn collect_stream(
    adapter: &dyn ProviderAdapter,
    config: &CallConfig,
    options: &ModelOptions,
    messages: &[Message],
) -> Vec<StreamEvent> {
    let (events, rx) = EventEmitter::channel("it");
    adapter
        .stream(CancellationToken::new(), config, options, messages, &events)
        .await;
    drop(events);
    UnboundedReceiverStream::new(rx).collect().await
}
