//! Anthropic Messages API adapter.
//!
//! Handles the differences from the OpenAI shape:
//! - The system prompt and every user turn are folded into one synthetic user turn.
//! - Streaming text arrives as `delta.text` (on `content_block_delta` events) or as a
//!   nested `content_block_delta.text`, depending on chunk shape.
//! - `message_delta` carries the stop reason; `message_stop` ends the stream.
//! - `max_tokens` is required, not optional.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    drive, json_request, missing_key, stream_request, Completion, FrameMapper, ProviderAdapter,
};
use crate::client::error_classification::classify_in_band;
use crate::client::{request_json, request_sse, JsonRequest};
use crate::config::CallConfig;
use crate::pipeline::ParsedSseEvent;
use crate::registry::Provider;
use crate::transport::Transport;
use crate::types::message::{first_system, fold_prompt};
use crate::types::{EventEmitter, Message, ModelOptions, StreamEvent};
use crate::Result;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const JSON_MODE_INSTRUCTION: &str =
    "Respond with a single valid JSON value only. Do not include prose or code fences.";

#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    transport: Arc<dyn Transport>,
}

impl AnthropicAdapter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    fn url(config: &CallConfig) -> String {
        format!("{}/messages", config.base_url_or(DEFAULT_BASE_URL))
    }
}

/// `end_turn` → `stop`, `max_tokens` → `length`, `tool_use` → `tool_calls`.
pub(crate) fn normalize_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    }
}

fn system_text(options: &ModelOptions, messages: &[Message]) -> String {
    let mut system = first_system(messages)
        .or(options.system.as_deref())
        .unwrap_or("")
        .to_string();
    if options.json_mode {
        if !system.is_empty() {
            system.push_str("\n\n");
        }
        system.push_str(JSON_MODE_INSTRUCTION);
    }
    system
}

pub(crate) fn build_body(options: &ModelOptions, messages: &[Message], stream: bool) -> Value {
    let text = fold_prompt(&system_text(options, messages), messages);

    let content = if options.images.is_empty() {
        Value::String(text)
    } else {
        let mut blocks: Vec<Value> = options
            .images
            .iter()
            .map(|img| {
                json!({
                    "type": "image",
                    "source": { "type": "base64", "media_type": img.media_type, "data": img.data }
                })
            })
            .collect();
        blocks.push(json!({ "type": "text", "text": text }));
        Value::Array(blocks)
    };

    let mut body = json!({
        "model": options.model,
        "messages": [{ "role": "user", "content": content }],
        "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "stream": stream,
    });
    if let Some(t) = options.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = options.top_p {
        body["top_p"] = json!(p);
    }
    if !options.stop.is_empty() {
        body["stop_sequences"] = json!(options.stop);
    }
    body
}

#[derive(Debug, Default)]
struct AnthropicStream {
    stop_reason: Option<String>,
}

impl FrameMapper<ParsedSseEvent> for AnthropicStream {
    fn on_frame(&mut self, frame: ParsedSseEvent, events: &EventEmitter) {
        let data = frame.data.trim();
        if data.is_empty() {
            return;
        }
        if data == "[DONE]" {
            self.on_end(events);
            return;
        }
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "skipping undecodable chunk");
                return;
            }
        };
        let kind = v
            .get("type")
            .and_then(|t| t.as_str())
            .or(frame.event.as_deref())
            .unwrap_or("");

        if kind == "error" || v.get("error").is_some() {
            events.emit(StreamEvent::Error(classify_in_band(
                data,
                Some(Provider::Anthropic.key()),
            )));
            return;
        }

        let text = v
            .pointer("/delta/text")
            .or_else(|| v.pointer("/content_block_delta/text"))
            .and_then(|t| t.as_str());
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            events.emit(StreamEvent::delta(text));
        }

        match kind {
            "message_delta" => {
                if let Some(r) = v.pointer("/delta/stop_reason").and_then(|r| r.as_str()) {
                    self.stop_reason = Some(normalize_stop_reason(r));
                }
            }
            "message_stop" => self.on_end(events),
            _ => {}
        }
    }

    fn on_end(&mut self, events: &EventEmitter) {
        let reason = self.stop_reason.take().unwrap_or_else(|| "stop".to_string());
        events.emit(StreamEvent::done(reason));
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
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
        let Some(key) = config.key() else {
            events.emit(StreamEvent::Error(missing_key(Provider::Anthropic)));
            return;
        };
        diag!(
            config.trace,
            request_id = events.request_id(),
            model = %options.model,
            "anthropic stream"
        );
        let req = stream_request(Provider::Anthropic, config, Self::url(config), cancel)
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .header("accept", "text/event-stream")
            .json(build_body(options, messages, true));
        let (frames, _cancel) = request_sse(self.transport.clone(), req);
        drive(frames, events, &mut AnthropicStream::default()).await;
    }

    async fn complete(
        &self,
        config: &CallConfig,
        options: &ModelOptions,
        messages: &[Message],
        cancel: Option<CancellationToken>,
    ) -> Result<Completion> {
        let key = config.key().ok_or_else(|| missing_key(Provider::Anthropic))?;
        let req = json_request(
            Provider::Anthropic,
            config,
            JsonRequest::post(Self::url(config))
                .header("x-api-key", key)
                .header("anthropic-version", API_VERSION)
                .json(build_body(options, messages, false)),
            cancel,
        );
        let body: Value = request_json(self.transport.as_ref(), &req).await?;
        Ok(Completion {
            text: body
                .pointer("/content/0/text")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            usage: None,
            finish_reason: Some("stop".to_string()),
            tool_calls: Vec::new(),
        })
    }
}
