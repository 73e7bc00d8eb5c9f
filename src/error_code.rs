//! Error taxonomy shared by every executor and adapter.
//!
//! Two layers exist:
//!
//! | Layer | Type | Values |
//! |-------|------|--------|
//! | transport | [`TransportErrorKind`] | network, timeout, aborted, http_4xx, http_5xx, parse, unknown |
//! | adapter   | [`ErrorCode`] | network, timeout, rate_limit, auth, permission, content_blocked, invalid_request, server, cancelled, unknown |
//!
//! Call sites only ever see [`ErrorCode`]; the transport kind is kept so logs can say what
//! the wire actually did.
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_relay::error_code::ErrorCode;
//!
//! let code = ErrorCode::from_http_status(429);
//! assert_eq!(code, ErrorCode::RateLimit);
//! assert!(code.retryable());
//! assert_eq!(code.name(), "rate_limit");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Adapter-facing error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Connection refused, reset, DNS failure, or a body that broke off mid-read
    Network,
    /// No response (or no first sign of life) within the allotted time
    Timeout,
    /// HTTP 429 from the provider
    RateLimit,
    /// Missing, invalid, or rejected credentials (401/403)
    Auth,
    /// Credentials are valid but the action is not allowed
    Permission,
    /// The provider refused to produce content for safety reasons
    ContentBlocked,
    /// Malformed request, unknown model, unknown provider
    InvalidRequest,
    /// Provider-side failure (5xx)
    Server,
    /// The caller cancelled the request
    Cancelled,
    /// Could not be classified
    Unknown,
}

impl ErrorCode {
    /// Short machine code, e.g. `"rate_limit"`.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::Permission => "permission",
            Self::ContentBlocked => "content_blocked",
            Self::InvalidRequest => "invalid_request",
            Self::Server => "server",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this class is transient and retried by default.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimit | Self::Server
        )
    }

    /// Coarse grouping used in log fields: `"transport"`, `"client"`, `"rate"`, `"server"`,
    /// `"operational"` or `"unknown"`.
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Network | Self::Timeout => "transport",
            Self::Auth | Self::Permission | Self::ContentBlocked | Self::InvalidRequest => {
                "client"
            }
            Self::RateLimit => "rate",
            Self::Server => "server",
            Self::Cancelled => "operational",
            Self::Unknown => "unknown",
        }
    }

    /// Maps an HTTP status to the adapter-facing code.
    ///
    /// 401 and 403 both map to [`ErrorCode::Auth`]; a provider body can refine 403 into
    /// [`ErrorCode::Permission`] (see [`ErrorCode::from_provider_code`]).
    pub fn from_http_status(status: u16) -> Self {
        match status {
            s if s >= 500 => Self::Server,
            429 => Self::RateLimit,
            401 | 403 => Self::Auth,
            s if (400..500).contains(&s) => Self::InvalidRequest,
            _ => Self::Unknown,
        }
    }

    /// Maps a provider error `code`/`type`/`status` string to a code when the string is
    /// more specific than the HTTP status alone.
    pub fn from_provider_code(provider_code: &str) -> Option<Self> {
        let code = match provider_code {
            "invalid_api_key" | "authentication_error" | "UNAUTHENTICATED" => Self::Auth,
            "permission_error" | "permission_denied" | "PERMISSION_DENIED" => Self::Permission,
            "content_filter" | "content_policy_violation" | "SAFETY" | "PROHIBITED_CONTENT" => {
                Self::ContentBlocked
            }
            "rate_limit_error" | "rate_limit_exceeded" | "RESOURCE_EXHAUSTED" => Self::RateLimit,
            "overloaded_error" | "server_error" | "api_error" | "INTERNAL" | "UNAVAILABLE" => {
                Self::Server
            }
            "invalid_request_error" | "model_not_found" | "INVALID_ARGUMENT" | "NOT_FOUND" => {
                Self::InvalidRequest
            }
            _ => return None,
        };
        Some(code)
    }

    /// Provider codes that mean "the account cannot pay for this"; retrying cannot help,
    /// even when the provider reports them under status 429.
    pub fn is_quota_exhausted(provider_code: &str) -> bool {
        matches!(
            provider_code,
            "insufficient_quota"
                | "billing_hard_limit_reached"
                | "quota_exceeded"
                | "billing_not_active"
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the transport observed before any provider semantics are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Network,
    Timeout,
    Aborted,
    #[serde(rename = "http_4xx")]
    Http4xx,
    #[serde(rename = "http_5xx")]
    Http5xx,
    Parse,
    Unknown,
}

impl TransportErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            400..=499 => Self::Http4xx,
            500..=599 => Self::Http5xx,
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
            Self::Http4xx => "http_4xx",
            Self::Http5xx => "http_5xx",
            Self::Parse => "parse",
            Self::Unknown => "unknown",
        }
    }
}

impl From<TransportErrorKind> for ErrorCode {
    fn from(kind: TransportErrorKind) -> Self {
        match kind {
            // A failure the wire could not explain still counts as connectivity trouble.
            TransportErrorKind::Network | TransportErrorKind::Unknown => ErrorCode::Network,
            TransportErrorKind::Timeout => ErrorCode::Timeout,
            TransportErrorKind::Aborted => ErrorCode::Cancelled,
            TransportErrorKind::Http4xx => ErrorCode::InvalidRequest,
            TransportErrorKind::Http5xx => ErrorCode::Server,
            TransportErrorKind::Parse => ErrorCode::Unknown,
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
