//! Error classification logic
//!
//! Collapses transport failures, HTTP statuses and provider error bodies into one [`Error`].

use reqwest::header::HeaderMap;
use serde_json::Value;

use crate::error::{Error, ErrorContext};
use crate::error_code::{ErrorCode, TransportErrorKind};
use crate::transport::TransportError;

const DETAIL_MAX_CHARS: usize = 512;

/// First non-empty value among `names`.
pub(crate) fn header_first(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    for name in names {
        if let Some(v) = headers.get(*name) {
            if let Ok(s) = v.to_str() {
                let s = s.trim();
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            }
        }
    }
    None
}

/// Provider retry hint in milliseconds.
///
/// `retry-after-ms` wins over `retry-after`; the latter is read as (possibly fractional)
/// seconds. HTTP-date values are ignored.
pub fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    if let Some(raw) = header_first(headers, &["retry-after-ms"]) {
        if let Ok(ms) = raw.parse::<f64>() {
            if ms.is_finite() && ms >= 0.0 {
                return Some(ms.round() as u64);
            }
        }
    }
    let raw = header_first(headers, &["retry-after"])?;
    let secs: f64 = raw.parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some((secs * 1000.0).round() as u64)
}

/// Error fields recovered from a provider's error body.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct ProviderErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
    pub raw: Option<Value>,
}

impl ProviderErrorBody {
    /// Understands `{error:{code,type,message}}`, Gemini's `{error:{status,message}}` and
    /// the flat `{error:"..."}` form. Anything else yields an empty result.
    pub fn parse(body: &str) -> Self {
        let Ok(json) = serde_json::from_str::<Value>(body) else {
            return Self::default();
        };
        let mut out = Self::default();
        match json.get("error") {
            Some(Value::String(s)) => out.message = Some(s.clone()),
            Some(err @ Value::Object(_)) => {
                out.code = ["code", "type", "status"].iter().find_map(|k| {
                    err.get(*k).and_then(|v| match v {
                        Value::String(s) if !s.is_empty() => Some(s.clone()),
                        _ => None,
                    })
                });
                out.message = err
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
            }
            _ => {
                out.message = json
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
            }
        }
        out.raw = Some(json);
        out
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= DETAIL_MAX_CHARS {
        s.to_string()
    } else {
        s.chars().take(DETAIL_MAX_CHARS).collect()
    }
}

/// Classify a non-success HTTP response.
///
/// Status decides the class (5xx, 429, 401/403, other 4xx, in that order). A provider code
/// may only sharpen a client-side class into `permission` or `content_blocked`, and quota
/// exhaustion is never retryable even under 429.
pub fn classify_status(
    status: u16,
    retry_after: Option<u64>,
    body: &str,
    provider: Option<&str>,
) -> Error {
    let parsed = ProviderErrorBody::parse(body);
    let mut code = ErrorCode::from_http_status(status);

    if matches!(code, ErrorCode::Auth | ErrorCode::InvalidRequest) {
        if let Some(refined) = parsed.code.as_deref().and_then(ErrorCode::from_provider_code) {
            if matches!(refined, ErrorCode::Permission | ErrorCode::ContentBlocked) {
                code = refined;
            }
        }
    }

    let mut ctx = ErrorContext::new()
        .with_status(status)
        .with_category(TransportErrorKind::from_status(status).name());
    if let Some(p) = provider {
        ctx = ctx.with_provider(p);
    }
    if let Some(pc) = &parsed.code {
        if ErrorCode::is_quota_exhausted(pc) {
            ctx = ctx.with_retryable(false);
        }
        ctx = ctx.with_provider_code(pc.clone());
    }
    if let Some(ms) = retry_after {
        ctx = ctx.with_retry_after_ms(ms);
    }
    if parsed.raw.is_none() && !body.trim().is_empty() {
        ctx = ctx.with_detail(truncate(body.trim()));
    }
    if let Some(raw) = parsed.raw {
        ctx = ctx.with_raw(raw);
    }

    let message = parsed
        .message
        .unwrap_or_else(|| format!("HTTP {}", status));
    Error::new(code, message).with_context(ctx)
}

/// Classify a failure that produced no HTTP status.
pub fn classify_transport(err: &TransportError, provider: Option<&str>) -> Error {
    let kind = err.kind();
    let mut error = match ErrorCode::from(kind) {
        ErrorCode::Cancelled => Error::cancelled("request cancelled"),
        ErrorCode::Timeout => Error::timeout(err.to_string()),
        code => Error::new(code, err.to_string())
            .with_context(ErrorContext::new().with_category(kind.name())),
    };
    if let Some(p) = provider {
        error = error.with_provider(p);
    }
    error
}

/// Classify an error object delivered inside a successful (2xx) stream.
pub(crate) fn classify_in_band(payload: &str, provider: Option<&str>) -> Error {
    let parsed = ProviderErrorBody::parse(payload);
    let code = parsed
        .code
        .as_deref()
        .and_then(ErrorCode::from_provider_code)
        .unwrap_or(ErrorCode::Server);
    let mut ctx = ErrorContext::new();
    if let Some(p) = provider {
        ctx = ctx.with_provider(p);
    }
    if let Some(pc) = &parsed.code {
        if ErrorCode::is_quota_exhausted(pc) {
            ctx = ctx.with_retryable(false);
        }
        ctx = ctx.with_provider_code(pc.clone());
    }
    if let Some(raw) = parsed.raw {
        ctx = ctx.with_raw(raw);
    }
    let message = parsed
        .message
        .unwrap_or_else(|| "provider reported an error mid-stream".to_string());
    Error::new(code, message).with_context(ctx)
}

/// A body that arrived but could not be decoded.
pub(crate) fn parse_error(message: impl Into<String>, provider: Option<&str>) -> Error {
    let mut ctx = ErrorContext::new().with_category(TransportErrorKind::Parse.name());
    if let Some(p) = provider {
        ctx = ctx.with_provider(p);
    }
    Error::new(ErrorCode::Unknown, message).with_context(ctx)
}
