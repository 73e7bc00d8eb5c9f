//! Streaming request executor.
//!
//! One logical call may span several attempts. Each attempt goes through:
//!
//! ```text
//! connect ──fail──► Error(network|timeout|cancelled)                       (terminal)
//!    │
//!    ├─ non-2xx ──► classify ──retry?──► backoff ──► next attempt
//!    │                          └─no──► Error(...)                            (terminal)
//!    └─ 2xx ──► Open ─► FirstByte ─► Message* ─► (flush) Message* ─► Done     (terminal)
//! ```
//!
//! The open timeout is armed when the attempt starts, re-armed when headers arrive and
//! disarmed by the first non-empty body chunk. Dropping the returned stream aborts the
//! in-flight request.

use bytes::Bytes;
use futures::StreamExt;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::error_classification::{classify_status, classify_transport, retry_after_ms};
use super::may_retry;
use crate::error::Error;
use crate::pipeline::{FrameDecoder, ParsedSseEvent, RetryPolicy, SseParser};
use crate::transport::{
    guarded, sleep_or_cancel, HttpRequest, ResponseBody, Transport, TransportError, Utf8Decoder,
};
use crate::BoxStream;

/// Default open timeout.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Lifecycle frame emitted by the stream executor.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame<F> {
    /// A 2xx response arrived; decoding starts.
    Open { status: u16 },
    /// The first non-empty body chunk arrived.
    FirstByte,
    /// One decoded frame, in wire order. Sentinels such as `[DONE]` pass through untouched.
    Message(F),
    /// Terminal failure.
    Error(Error),
    /// Terminal success: the body ended and the decoder was flushed.
    Done,
}

impl<F> StreamFrame<F> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Error(_) | StreamFrame::Done)
    }
}

/// Frames of an event-stream body.
pub type SseEvent = StreamFrame<ParsedSseEvent>;

/// Cancels one logical streaming call, whichever attempt or backoff it is in.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Caller token; the executor derives a child so [`CancelHandle`] never cancels the parent.
    pub cancel: Option<CancellationToken>,
    pub open_timeout: Duration,
    pub retry: RetryPolicy,
    pub provider: Option<String>,
    pub trace: bool,
}

impl StreamRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            cancel: None,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            retry: RetryPolicy::default(),
            provider: None,
            trace: false,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn cancel(mut self, token: Option<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    fn to_http(&self) -> HttpRequest {
        let mut req = HttpRequest::new(self.method.clone(), self.url.clone())
            .headers(self.headers.iter().cloned());
        if let Some(body) = &self.body {
            req = req.json(body.clone());
        }
        req
    }
}

enum Read {
    Cancelled,
    OpenTimeout,
    Chunk(Option<Result<Bytes, TransportError>>),
}

async fn open_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

fn open_timeout_error(timeout: Duration, provider: Option<&str>) -> Error {
    let err = Error::timeout(format!(
        "no response activity within {}ms",
        timeout.as_millis()
    ));
    match provider {
        Some(p) => err.with_provider(p),
        None => err,
    }
}

/// Event-stream call: [`request_stream`] with an [`SseParser`] per attempt.
pub fn request_sse(
    transport: Arc<dyn Transport>,
    req: StreamRequest,
) -> (BoxStream<'static, SseEvent>, CancelHandle) {
    request_stream(transport, req, SseParser::new)
}

/// Run one logical streaming call, decoding bodies with a fresh decoder per attempt.
///
/// The stream ends right after its single terminal frame ([`StreamFrame::Done`] or
/// [`StreamFrame::Error`]).
pub fn request_stream<D, M>(
    transport: Arc<dyn Transport>,
    req: StreamRequest,
    make_decoder: M,
) -> (BoxStream<'static, StreamFrame<D::Frame>>, CancelHandle)
where
    D: FrameDecoder,
    M: Fn() -> D + Send + 'static,
{
    let token = req
        .cancel
        .as_ref()
        .map(|t| t.child_token())
        .unwrap_or_default();
    let handle = CancelHandle {
        token: token.clone(),
    };

    let frames = async_stream::stream! {
        let provider = req.provider.clone();
        let p = provider.as_deref();
        let open_timeout = req.open_timeout;
        let mut attempt: u32 = 0;

        loop {
            diag!(req.trace, provider = p.unwrap_or("-"), attempt, url = %req.url, "stream attempt");
            let deadline = Instant::now() + open_timeout;

            let sent = tokio::select! {
                biased;
                _ = token.cancelled() => Err(TransportError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => Err(TransportError::Timeout(open_timeout)),
                r = transport.send(req.to_http()) => r,
            };
            let resp = match sent {
                Ok(r) => r,
                Err(TransportError::Timeout(_)) => {
                    yield StreamFrame::Error(open_timeout_error(open_timeout, p));
                    return;
                }
                // Connectivity trouble before any response is reported once, not retried.
                Err(e) => {
                    yield StreamFrame::Error(classify_transport(&e, p));
                    return;
                }
            };

            if !resp.is_success() {
                let status = resp.status;
                let hint = retry_after_ms(&resp.headers);
                let body = match guarded(&token, Some(open_timeout), resp.text()).await {
                    Ok(b) => b,
                    Err(TransportError::Cancelled) => {
                        yield StreamFrame::Error(classify_transport(&TransportError::Cancelled, p));
                        return;
                    }
                    Err(_) => String::new(),
                };
                let err = classify_status(status, hint, &body, p);
                if !may_retry(&req.retry, attempt, &err) {
                    diag!(req.trace, code = %err.code, status, attempt, "stream failed");
                    yield StreamFrame::Error(err);
                    return;
                }
                let delay = req.retry.delay_for(attempt, err.retry_after_ms());
                warn!(
                    provider = p.unwrap_or("-"),
                    code = %err.code,
                    category = err.code.category(),
                    status,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying stream"
                );
                if sleep_or_cancel(delay, &token).await.is_err() {
                    yield StreamFrame::Error(classify_transport(&TransportError::Cancelled, p));
                    return;
                }
                attempt += 1;
                continue;
            }

            yield StreamFrame::Open { status: resp.status };

            let mut decoder = make_decoder();
            let mut utf8 = Utf8Decoder::new();

            match resp.body {
                ResponseBody::Buffered(bytes) => {
                    let mut text = utf8.decode(&bytes);
                    text.push_str(&utf8.finish());
                    if !text.is_empty() {
                        yield StreamFrame::FirstByte;
                    }
                    let mut frames = decoder.feed(&text);
                    frames.extend(decoder.flush_remainder());
                    for frame in frames {
                        if token.is_cancelled() {
                            yield StreamFrame::Error(classify_transport(&TransportError::Cancelled, p));
                            return;
                        }
                        yield StreamFrame::Message(frame);
                    }
                }
                ResponseBody::Streaming(mut body) => {
                    let mut armed = Some(Instant::now() + open_timeout);
                    loop {
                        let read = tokio::select! {
                            biased;
                            _ = token.cancelled() => Read::Cancelled,
                            _ = open_deadline(armed) => Read::OpenTimeout,
                            chunk = body.next() => Read::Chunk(chunk),
                        };
                        let bytes = match read {
                            Read::Cancelled => {
                                yield StreamFrame::Error(classify_transport(&TransportError::Cancelled, p));
                                return;
                            }
                            Read::OpenTimeout => {
                                yield StreamFrame::Error(open_timeout_error(open_timeout, p));
                                return;
                            }
                            Read::Chunk(None) => break,
                            Read::Chunk(Some(Err(e))) => {
                                yield StreamFrame::Error(classify_transport(&e, p));
                                return;
                            }
                            Read::Chunk(Some(Ok(bytes))) => bytes,
                        };
                        if bytes.is_empty() {
                            continue;
                        }
                        if armed.take().is_some() {
                            yield StreamFrame::FirstByte;
                        }
                        let text = utf8.decode(&bytes);
                        for frame in decoder.feed(&text) {
                            if token.is_cancelled() {
                                yield StreamFrame::Error(classify_transport(&TransportError::Cancelled, p));
                                return;
                            }
                            yield StreamFrame::Message(frame);
                        }
                    }

                    let mut frames = decoder.feed(&utf8.finish());
                    frames.extend(decoder.flush_remainder());
                    for frame in frames {
                        yield StreamFrame::Message(frame);
                    }
                }
            }

            diag!(req.trace, provider = p.unwrap_or("-"), attempt, "stream complete");
            yield StreamFrame::Done;
            return;
        }
    };

    (Box::pin(frames), handle)
}
