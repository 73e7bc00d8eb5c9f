//! Gemini `generateContent` adapter.
//!
//! Only whole-response generation is used, so `stream` is simulated: the returned text is
//! sliced into fixed-size pieces emitted with a short pacing gap, keeping the same event
//! ordering as the truly incremental adapters.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{json_request, missing_key, Completion, ProviderAdapter};
use crate::client::error_classification::classify_transport;
use crate::client::{request_json, JsonRequest};
use crate::config::CallConfig;
use crate::error::{Error, ErrorContext};
use crate::error_code::ErrorCode;
use crate::registry::Provider;
use crate::transport::{sleep_or_cancel, Transport, TransportError};
use crate::types::message::{first_system, fold_prompt};
use crate::types::{EventEmitter, Message, ModelOptions, StreamEvent, Usage};
use crate::Result;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Characters per simulated delta.
pub const SLICE_CHARS: usize = 60;
/// Gap between simulated deltas.
pub const SLICE_PACING: Duration = Duration::from_millis(16);

#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    transport: Arc<dyn Transport>,
}

impl GeminiAdapter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    fn url(config: &CallConfig, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            config.base_url_or(DEFAULT_BASE_URL),
            model
        )
    }

    async fn generate(
        &self,
        config: &CallConfig,
        options: &ModelOptions,
        messages: &[Message],
        cancel: Option<CancellationToken>,
        timeout: Option<Duration>,
    ) -> Result<Completion> {
        let key = config.key().ok_or_else(|| missing_key(Provider::Gemini))?;
        let req = json_request(
            Provider::Gemini,
            config,
            JsonRequest::post(Self::url(config, &options.model))
                .header("x-goog-api-key", key)
                .json(build_body(options, messages)),
            cancel,
        )
        .timeout(timeout);
        let body: Value = request_json(self.transport.as_ref(), &req).await?;
        parse_response(&body)
    }
}

pub(crate) fn build_body(options: &ModelOptions, messages: &[Message]) -> Value {
    let system = first_system(messages)
        .or(options.system.as_deref())
        .unwrap_or("");
    let mut parts = vec![json!({ "text": fold_prompt(system, messages) })];
    for image in &options.images {
        parts.push(json!({
            "inline_data": { "mime_type": image.media_type, "data": image.data }
        }));
    }

    let mut generation = serde_json::Map::new();
    if let Some(t) = options.temperature {
        generation.insert("temperature".into(), json!(t));
    }
    if let Some(p) = options.top_p {
        generation.insert("topP".into(), json!(p));
    }
    if let Some(mt) = options.max_tokens {
        generation.insert("maxOutputTokens".into(), json!(mt));
    }
    if !options.stop.is_empty() {
        generation.insert("stopSequences".into(), json!(options.stop));
    }
    if options.json_mode {
        generation.insert("responseMimeType".into(), json!("application/json"));
    }

    let mut body = json!({ "contents": [{ "role": "user", "parts": parts }] });
    if !generation.is_empty() {
        body["generationConfig"] = Value::Object(generation);
    }
    body
}

/// `STOP` → `stop`, `MAX_TOKENS` → `length`; anything else lowercased.
pub(crate) fn normalize_finish_reason(reason: &str) -> String {
    match reason {
        "STOP" => "stop".to_string(),
        "MAX_TOKENS" => "length".to_string(),
        other => other.to_lowercase(),
    }
}

fn blocked(reason: &str) -> Error {
    Error::new(
        ErrorCode::ContentBlocked,
        format!("response blocked: {}", reason),
    )
    .with_context(
        ErrorContext::new()
            .with_provider(Provider::Gemini.key())
            .with_provider_code(reason),
    )
}

pub(crate) fn parse_response(body: &Value) -> Result<Completion> {
    if let Some(reason) = body
        .pointer("/promptFeedback/blockReason")
        .and_then(|v| v.as_str())
    {
        return Err(blocked(reason));
    }

    let candidate = body.pointer("/candidates/0");
    let text: String = candidate
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();
    let finish = candidate
        .and_then(|c| c.get("finishReason"))
        .and_then(|v| v.as_str());

    if text.is_empty() {
        if let Some(r @ ("SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST")) = finish {
            return Err(blocked(r));
        }
    }

    let usage = body.get("usageMetadata").map(|u| {
        Usage::new(
            u["promptTokenCount"].as_u64().unwrap_or(0),
            u["candidatesTokenCount"].as_u64().unwrap_or(0),
        )
    });

    Ok(Completion {
        text,
        usage,
        finish_reason: Some(finish.map(normalize_finish_reason).unwrap_or_else(|| "stop".into())),
        tool_calls: Vec::new(),
    })
}

/// Split on character (not byte) boundaries.
pub(crate) fn slices(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size.max(1)).map(|c| c.iter().collect()).collect()
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn stream(
        &self,
        cancel: CancellationToken,
        config: &CallConfig,
        options: &ModelOptions,
        messages: &[Message],
        events: &EventEmitter,
    ) {
        events.emit(StreamEvent::Start);
        diag!(
            config.trace,
            request_id = events.request_id(),
            model = %options.model,
            "gemini simulated stream"
        );
        // Untimed calls are bounded by the open timeout.
        let timeout = config.timeout.or(Some(config.open_timeout));
        let completion = match self
            .generate(config, options, messages, Some(cancel.clone()), timeout)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                events.emit(StreamEvent::Error(e));
                return;
            }
        };
        events.emit(StreamEvent::Handshake);

        let cancelled = || {
            StreamEvent::Error(classify_transport(
                &TransportError::Cancelled,
                Some(Provider::Gemini.key()),
            ))
        };
        let pieces = slices(&completion.text, SLICE_CHARS);
        let last = pieces.len().saturating_sub(1);
        for (i, piece) in pieces.into_iter().enumerate() {
            if cancel.is_cancelled() {
                events.emit(cancelled());
                return;
            }
            events.emit(StreamEvent::delta(piece));
            if i < last && sleep_or_cancel(SLICE_PACING, &cancel).await.is_err() {
                events.emit(cancelled());
                return;
            }
        }
        if let Some(usage) = completion.usage {
            events.emit(StreamEvent::Usage(usage));
        }
        events.emit(StreamEvent::Done {
            finish_reason: completion.finish_reason,
        });
    }

    async fn complete(
        &self,
        config: &CallConfig,
        options: &ModelOptions,
        messages: &[Message],
        cancel: Option<CancellationToken>,
    ) -> Result<Completion> {
        self.generate(config, options, messages, cancel, config.timeout)
            .await
    }
}
