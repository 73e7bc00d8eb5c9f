//! Fetch-like HTTP primitive consumed by the executors.
//!
//! [`Transport`] is the seam: [`HttpTransport`] speaks real HTTP through reqwest, tests
//! plug in scripted transports. Cancellation is not part of the trait; executors race the
//! returned future against their cancellation token and drop it to abort.

pub mod http;
#[cfg(test)]
pub(crate) mod scripted;

pub use http::HttpTransport;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::Method;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error_code::TransportErrorKind;

/// Raw body chunks as they arrive from the network.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Issue one request and return as soon as the status line and headers are known.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Response body: either readable incrementally or already buffered in full.
pub enum ResponseBody {
    Streaming(ByteStream),
    Buffered(Bytes),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Streaming(_) => f.write_str("ResponseBody::Streaming(..)"),
            ResponseBody::Buffered(b) => write!(f, "ResponseBody::Buffered({} bytes)", b.len()),
        }
    }
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Read the whole body.
    pub async fn bytes(self) -> Result<Bytes, TransportError> {
        match self.body {
            ResponseBody::Buffered(b) => Ok(b),
            ResponseBody::Streaming(mut s) => {
                let mut buf = Vec::new();
                while let Some(chunk) = s.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(Bytes::from(buf))
            }
        }
    }

    /// Read the whole body as (lossy) UTF-8 text.
    pub async fn text(self) -> Result<String, TransportError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The caller's token fired.
    #[error("request cancelled")]
    Cancelled,

    /// An executor-owned timer fired first.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection error: {0}")]
    Connect(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("body read error: {0}")]
    Body(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            TransportError::Cancelled => TransportErrorKind::Aborted,
            TransportError::Timeout(_) => TransportErrorKind::Timeout,
            TransportError::Connect(_) | TransportError::Body(_) => TransportErrorKind::Network,
            TransportError::Http(e) if e.is_timeout() => TransportErrorKind::Timeout,
            TransportError::Http(e) if e.is_decode() => TransportErrorKind::Parse,
            TransportError::Http(_) => TransportErrorKind::Network,
            TransportError::Other(_) => TransportErrorKind::Unknown,
        }
    }
}

/// Race `fut` against the caller's token and an optional deadline.
///
/// Dropping `fut` on the losing side is what aborts the underlying request.
pub async fn guarded<F, T>(
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    fut: F,
) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    let deadline = async {
        match timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        r = fut => r,
        _ = deadline => Err(TransportError::Timeout(timeout.unwrap_or_default())),
    }
}

/// Backoff sleep that ends early (with `Cancelled`) when the token fires.
pub async fn sleep_or_cancel(
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Incremental UTF-8 decoding that never splits a multi-byte character across chunks.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the tail: wait for the next chunk.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush bytes left at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}
