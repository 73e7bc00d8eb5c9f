use crate::error_code::ErrorCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured annotations attached to an [`Error`].
///
/// Every field is optional; correct handling never depends on any of them being present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Provider key (`"openai"`, `"anthropic"`, ...) the failure came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// HTTP status, when a response was received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Provider-specific error code or type (e.g. `"insufficient_quota"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_code: Option<String>,
    /// Transport-level category (e.g. `"http_5xx"`, `"parse"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Free-text detail, e.g. the provider's own message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Provider-supplied retry hint, already converted to milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Explicit retryability override (e.g. quota exhaustion under 429)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Raw provider error body, when it parsed as JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_retry_after_ms(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

/// Unified error for every failure the relay can observe.
///
/// Immutable once constructed: the `with_*` helpers consume and return a new value.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}{}", format_context(.context))]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub context: ErrorContext,
}

/// Name used by callers that think in terms of "the unified error".
pub type UnifiedError = Error;

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref provider) = ctx.provider {
        parts.push(format!("provider: {}", provider));
    }
    if let Some(status) = ctx.status {
        parts.push(format!("status: {}", status));
    }
    if let Some(ref code) = ctx.provider_code {
        parts.push(format!("provider_code: {}", code));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.context.provider = Some(provider.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.context.status = Some(status);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.context.detail = Some(detail.into());
        self
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message).with_context(
            ErrorContext::new()
                .with_category("aborted")
                .with_retryable(false),
        )
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
            .with_context(ErrorContext::new().with_category("timeout"))
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn status(&self) -> Option<u16> {
        self.context.status
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        self.context.retry_after_ms
    }

    /// Explicit override from the normalizer wins; otherwise the code's default.
    pub fn is_retryable(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.context.retryable.unwrap_or_else(|| self.code.retryable())
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }
}
