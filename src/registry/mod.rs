//! Adapter registry: resolves a provider key or alias to a concrete adapter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::drivers::{AnthropicAdapter, GeminiAdapter, OllamaAdapter, OpenAiAdapter, ProviderAdapter};
use crate::error::Error;
use crate::error_code::ErrorCode;
use crate::transport::{HttpTransport, Transport};
use crate::Result;

/// The four backend wire shapes this crate speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Gemini,
        Provider::Ollama,
    ];

    /// Canonical key, also the prefix of the provider's environment variables.
    pub fn key(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::Ollama => "ollama",
        }
    }

    /// Case- and whitespace-insensitive lookup of a key or known alias.
    pub fn from_alias(key: &str) -> Option<Provider> {
        match key.trim().to_ascii_lowercase().as_str() {
            "openai" | "oai" | "chatgpt" => Some(Provider::OpenAi),
            "anthropic" | "claude" => Some(Provider::Anthropic),
            "gemini" | "google" | "vertex" | "generativeai" => Some(Provider::Gemini),
            "ollama" | "local" => Some(Provider::Ollama),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

fn resolve(key: &str) -> Result<Provider> {
    Provider::from_alias(key)
        .ok_or_else(|| Error::invalid_request(format!("unknown provider: {}", key.trim())))
}

/// Adapter for `key` over the process-wide HTTP transport.
///
/// Unknown keys fail with an `invalid_request` error before any transport is touched.
pub fn get_adapter(key: &str) -> Result<Arc<dyn ProviderAdapter>> {
    let provider = resolve(key)?;
    let transport = HttpTransport::shared().map_err(|e| {
        Error::new(
            ErrorCode::Network,
            format!("failed to initialise HTTP transport: {}", e),
        )
        .with_provider(provider.key())
    })?;
    Ok(adapter_for(provider, transport))
}

/// Adapter for `key` over a caller-supplied transport.
pub fn get_adapter_with_transport(
    key: &str,
    transport: Arc<dyn Transport>,
) -> Result<Arc<dyn ProviderAdapter>> {
    Ok(adapter_for(resolve(key)?, transport))
}

fn adapter_for(provider: Provider, transport: Arc<dyn Transport>) -> Arc<dyn ProviderAdapter> {
    match provider {
        Provider::OpenAi => Arc::new(OpenAiAdapter::new(transport)),
        Provider::Anthropic => Arc::new(AnthropicAdapter::new(transport)),
        Provider::Gemini => Arc::new(GeminiAdapter::new(transport)),
        Provider::Ollama => Arc::new(OllamaAdapter::new(transport)),
    }
}
