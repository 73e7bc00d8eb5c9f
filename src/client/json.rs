//! Single-shot JSON request executor.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::error_classification::{classify_status, classify_transport, parse_error, retry_after_ms};
use super::may_retry;
use crate::pipeline::RetryPolicy;
use crate::transport::{guarded, sleep_or_cancel, HttpRequest, Transport, TransportError};
use crate::Result;

/// One logical JSON call: what to send and how hard to try.
#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Caller-owned token; firing it ends the call with `cancelled`.
    pub cancel: Option<CancellationToken>,
    /// Per-attempt deadline covering connect and the full body read.
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
    /// Provider key recorded on produced errors
    pub provider: Option<String>,
    pub trace: bool,
}

impl JsonRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            cancel: None,
            timeout: None,
            retry: RetryPolicy::default(),
            provider: None,
            trace: false,
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

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn cancel(mut self, token: Option<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
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

/// Issue `req` and decode a successful body as `T`.
///
/// Non-success statuses and transport failures are classified and retried while the policy
/// allows it; backoff sleeps end early when the caller cancels. Cancellation is returned
/// immediately without consulting the policy.
pub async fn request_json<T: DeserializeOwned>(
    transport: &dyn Transport,
    req: &JsonRequest,
) -> Result<T> {
    let caller = req.cancel.clone().unwrap_or_default();
    let provider = req.provider.as_deref();
    let mut attempt: u32 = 0;

    loop {
        diag!(
            req.trace,
            provider = provider.unwrap_or("-"),
            attempt,
            method = %req.method,
            url = %req.url,
            "json request attempt"
        );

        let outcome = guarded(&caller, req.timeout, async {
            let resp = transport.send(req.to_http()).await?;
            let status = resp.status;
            let headers = resp.headers.clone();
            let body = resp.text().await?;
            Ok::<_, TransportError>((status, headers, body))
        })
        .await;

        let err = match outcome {
            Ok((status, _, body)) if (200..300).contains(&status) => {
                return serde_json::from_str::<T>(&body).map_err(|e| {
                    parse_error(format!("invalid JSON response: {}", e), provider)
                        .with_status(status)
                });
            }
            Ok((status, headers, body)) => {
                classify_status(status, retry_after_ms(&headers), &body, provider)
            }
            Err(e) => classify_transport(&e, provider),
        };

        if err.is_cancelled() || !may_retry(&req.retry, attempt, &err) {
            diag!(req.trace, code = %err.code, attempt, "json request failed");
            return Err(err);
        }

        let delay = req.retry.delay_for(attempt, err.retry_after_ms());
        warn!(
            provider = provider.unwrap_or("-"),
            code = %err.code,
            category = err.code.category(),
            status = ?err.status(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "retrying json request"
        );
        if sleep_or_cancel(delay, &caller).await.is_err() {
            return Err(classify_transport(&TransportError::Cancelled, provider));
        }
        attempt += 1;
    }
}
