//! Provider adapters: one per backend wire shape, behind a single trait.
//!
//! Each adapter translates the unified [`Message`]/[`ModelOptions`] contract into its
//! backend's request, runs it through the JSON or stream executor, and maps the backend's
//! response back into [`StreamEvent`]s or a [`Completion`].
//!
//! | Adapter | Streaming | Wire format |
//! |---------|-----------|-------------|
//! | [`OpenAiAdapter`] | true | SSE, `[DONE]` sentinel |
//! | [`AnthropicAdapter`] | true | SSE, typed delta events |
//! | [`GeminiAdapter`] | simulated | one JSON body, sliced client-side |
//! | [`OllamaAdapter`] | true | NDJSON |

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::client::{JsonRequest, StreamFrame, StreamRequest};
use crate::config::CallConfig;
use crate::error::Error;
use crate::registry::Provider;
use crate::types::{EventEmitter, Message, ModelOptions, StreamEvent, ToolCall, Usage};
use crate::{BoxStream, Result};

/// Result of a non-streaming call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

/// Core trait for provider-specific API adaptation.
///
/// `stream` never returns an error: every outcome, including misconfiguration, is reported
/// through `events`, which receives `Start` first and exactly one terminal event last.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + fmt::Debug {
    fn provider(&self) -> Provider;

    async fn stream(
        &self,
        cancel: CancellationToken,
        config: &CallConfig,
        options: &ModelOptions,
        messages: &[Message],
        events: &EventEmitter,
    );

    async fn complete(
        &self,
        config: &CallConfig,
        options: &ModelOptions,
        messages: &[Message],
        cancel: Option<CancellationToken>,
    ) -> Result<Completion>;

    /// Model identifiers the backend reports. Never fails; an unreachable backend yields
    /// an empty list.
    async fn list_models(&self, _config: &CallConfig) -> Vec<String> {
        Vec::new()
    }
}

pub(crate) fn missing_key(provider: Provider) -> Error {
    Error::auth(format!("missing API key for {}", provider.key())).with_provider(provider.key())
}

pub(crate) fn stream_request(
    provider: Provider,
    config: &CallConfig,
    url: String,
    cancel: CancellationToken,
) -> StreamRequest {
    StreamRequest::post(url)
        .cancel(Some(cancel))
        .open_timeout(config.open_timeout)
        .retry(config.retry)
        .provider(provider.key())
        .trace(config.trace)
}

pub(crate) fn json_request(
    provider: Provider,
    config: &CallConfig,
    request: JsonRequest,
    cancel: Option<CancellationToken>,
) -> JsonRequest {
    request
        .cancel(cancel)
        .timeout(config.timeout)
        .retry(config.retry)
        .provider(provider.key())
        .trace(config.trace)
}

/// Per-stream mapping from decoded frames to unified events.
pub(crate) trait FrameMapper<F> {
    fn on_frame(&mut self, frame: F, events: &EventEmitter);

    /// The body ended without an in-band terminal event.
    fn on_end(&mut self, events: &EventEmitter) {
        events.emit(StreamEvent::Done {
            finish_reason: None,
        });
    }
}

/// Drain executor frames into `events` until a terminal event has been emitted.
///
/// Returning drops `frames`, which aborts any request still in flight.
pub(crate) async fn drive<F, M>(
    mut frames: BoxStream<'static, StreamFrame<F>>,
    events: &EventEmitter,
    mapper: &mut M,
) where
    M: FrameMapper<F> + Send,
    F: Send + 'static,
{
    while let Some(frame) = frames.next().await {
        match frame {
            StreamFrame::Open { .. } => {
                events.emit(StreamEvent::Handshake);
            }
            StreamFrame::FirstByte => {
                events.emit(StreamEvent::FirstByte);
            }
            StreamFrame::Message(f) => mapper.on_frame(f, events),
            StreamFrame::Error(e) => {
                events.emit(StreamEvent::Error(e));
            }
            StreamFrame::Done => mapper.on_end(events),
        }
        if events.is_terminated() {
            return;
        }
    }
    if !events.is_terminated() {
        mapper.on_end(events);
    }
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Collects streamed tool-call fragments (keyed by their index) into final [`ToolCall`]s.
/// Arguments that are not valid JSON are kept as a raw string.
#[derive(Debug, Default)]
pub(crate) struct ToolCallAssembler {
    calls: BTreeMap<u64, PartialCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_fragment(
        &mut self,
        index: u64,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            call.id = id.to_string();
        }
        if let Some(name) = name.filter(|s| !s.is_empty()) {
            call.name.push_str(name);
        }
        if let Some(args) = arguments {
            call.arguments.push_str(args);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn finalize(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.calls)
            .into_iter()
            .map(|(index, c)| {
                let trimmed = c.arguments.trim();
                let arguments = if trimmed.is_empty() {
                    serde_json::Value::Object(Default::default())
                } else {
                    serde_json::from_str(trimmed)
                        .unwrap_or_else(|_| serde_json::Value::String(c.arguments.clone()))
                };
                ToolCall {
                    id: if c.id.is_empty() {
                        format!("call_{}", index)
                    } else {
                        c.id
                    },
                    name: c.name,
                    arguments,
                }
            })
            .collect()
    }
}

/// Emit the assembled tool calls, then a result request when the model stopped for them.
pub(crate) fn emit_tool_calls(
    assembler: &mut ToolCallAssembler,
    finish_reason: Option<&str>,
    events: &EventEmitter,
) {
    if assembler.is_empty() {
        return;
    }
    let calls = assembler.finalize();
    let ids: Vec<String> = calls.iter().map(|c| c.id.clone()).collect();
    for call in calls {
        events.emit(StreamEvent::ToolCall { call });
    }
    if finish_reason == Some("tool_calls") {
        events.emit(StreamEvent::ToolResultRequest { call_ids: ids });
    }
}
