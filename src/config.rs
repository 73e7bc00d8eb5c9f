//! Per-call configuration supplied by the embedding application.
//!
//! The API key is only ever placed into request headers; it is never logged and is
//! redacted from `Debug` output.

use std::fmt;
use std::time::Duration;

use crate::client::stream::DEFAULT_OPEN_TIMEOUT;
use crate::pipeline::RetryPolicy;
use crate::registry::Provider;

#[derive(Clone)]
pub struct CallConfig {
    /// Overrides the adapter's default base URL
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Per-attempt timeout for non-streaming calls
    pub timeout: Option<Duration>,
    /// Time allowed from attempt start to first sign of life on streaming calls
    pub open_timeout: Duration,
    pub retry: RetryPolicy,
    /// Raises request diagnostics from `debug` to `info`; never changes behavior
    pub trace: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout: None,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            retry: RetryPolicy::default(),
            trace: false,
        }
    }
}

impl fmt::Debug for CallConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("open_timeout", &self.open_timeout)
            .field("retry", &self.retry)
            .field("trace", &self.trace)
            .finish()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl CallConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `<PROVIDER>_API_KEY`, `<PROVIDER>_BASE_URL` and `AI_TRACE` from the environment.
    pub fn from_env(provider: Provider) -> Self {
        let prefix = provider.key().to_uppercase();
        let trace = non_empty_env("AI_TRACE")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        Self {
            base_url: non_empty_env(&format!("{}_BASE_URL", prefix)),
            api_key: non_empty_env(&format!("{}_API_KEY", prefix)),
            trace,
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Base URL with any trailing slash removed.
    pub(crate) fn base_url_or(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    /// The API key, when present and non-blank.
    pub(crate) fn key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}
