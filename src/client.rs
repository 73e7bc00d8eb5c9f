//! Request executors.
//!
//! Two entry points share one retry policy and one error classifier:
//!
//! - [`request_json`]: single-shot request/response with per-attempt timeout.
//! - [`request_stream`] / [`request_sse`]: streaming attempts with open-timeout, lifecycle
//!   frames and backoff-driven re-attempts.
//!
//! Cancellation always wins over retry: an aborted attempt is never re-issued.

pub mod error_classification;
pub mod json;
pub mod stream;

pub use error_classification::{classify_status, classify_transport, retry_after_ms};
pub use json::{request_json, JsonRequest};
pub use stream::{request_sse, request_stream, CancelHandle, SseEvent, StreamFrame, StreamRequest};

use crate::error::Error;
use crate::error_code::ErrorCode;
use crate::pipeline::RetryPolicy;

/// Whether `err`, observed on 0-based `attempt`, may be followed by another attempt.
pub(crate) fn may_retry(policy: &RetryPolicy, attempt: u32, err: &Error) -> bool {
    if attempt >= policy.retries || err.is_cancelled() {
        return false;
    }
    // Forced by the classifier (quota exhaustion).
    if err.context.retryable == Some(false) {
        return false;
    }
    if matches!(err.code, ErrorCode::Auth | ErrorCode::Permission) {
        return false;
    }
    let status = err.status();
    policy.should_retry(status, Some(err.code)) && (status.is_some() || err.is_retryable())
}
