//! Ollama adapter (local inference, NDJSON bodies).
//!
//! `/api/chat` is preferred; a 404 from it falls back to the flattened `/api/generate`
//! endpoint. Each body line is one JSON record; malformed lines are skipped.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    drive, emit_tool_calls, json_request, stream_request, Completion, FrameMapper,
    ProviderAdapter, ToolCallAssembler,
};
use crate::client::error_classification::classify_in_band;
use crate::client::{request_json, request_stream, JsonRequest, StreamFrame, StreamRequest};
use crate::config::CallConfig;
use crate::pipeline::{NdjsonDecoder, RetryPolicy};
use crate::registry::Provider;
use crate::transport::Transport;
use crate::types::message::first_system;
use crate::types::{EventEmitter, Message, MessageRole, ModelOptions, StreamEvent, Usage};
use crate::{BoxStream, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const LIST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct OllamaAdapter {
    transport: Arc<dyn Transport>,
}

fn model_options(options: &ModelOptions) -> Option<Value> {
    let mut map = serde_json::Map::new();
    if let Some(t) = options.temperature {
        map.insert("temperature".into(), json!(t));
    }
    if let Some(p) = options.top_p {
        map.insert("top_p".into(), json!(p));
    }
    if let Some(n) = options.max_tokens {
        map.insert("num_predict".into(), json!(n));
    }
    if !options.stop.is_empty() {
        map.insert("stop".into(), json!(options.stop));
    }
    (!map.is_empty()).then(|| Value::Object(map))
}

fn apply_common(body: &mut Value, options: &ModelOptions) {
    if let Some(opts) = model_options(options) {
        body["options"] = opts;
    }
    if options.json_mode {
        body["format"] = json!("json");
    }
}

pub(crate) fn chat_body(options: &ModelOptions, messages: &[Message], stream: bool) -> Value {
    let mut out: Vec<Value> = Vec::new();
    if first_system(messages).is_none() {
        if let Some(system) = &options.system {
            out.push(json!({ "role": "system", "content": system }));
        }
    }
    for m in messages {
        out.push(json!({ "role": m.role.as_str(), "content": m.content }));
    }
    if !options.images.is_empty() {
        if let Some(last_user) = out.iter_mut().rev().find(|m| m["role"] == "user") {
            last_user["images"] = json!(options.images.iter().map(|i| &i.data).collect::<Vec<_>>());
        }
    }
    let mut body = json!({ "model": options.model, "messages": out, "stream": stream });
    if !options.tools.is_empty() {
        body["tools"] = json!(options
            .tools
            .iter()
            .map(|t| t.to_function_json())
            .collect::<Vec<_>>());
    }
    apply_common(&mut body, options);
    body
}

/// Non-system turns as `Role: text` paragraphs.
fn flatten_prompt(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .map(|m| {
            let label = match m.role {
                MessageRole::Assistant => "Assistant",
                MessageRole::Tool => "Tool",
                _ => "User",
            };
            format!("{}: {}", label, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub(crate) fn generate_body(options: &ModelOptions, messages: &[Message], stream: bool) -> Value {
    let mut body = json!({
        "model": options.model,
        "prompt": flatten_prompt(messages),
        "stream": stream,
    });
    if let Some(system) = first_system(messages).or(options.system.as_deref()) {
        body["system"] = json!(system);
    }
    if !options.images.is_empty() {
        body["images"] = json!(options.images.iter().map(|i| &i.data).collect::<Vec<_>>());
    }
    apply_common(&mut body, options);
    body
}

fn record_text(v: &Value) -> Option<&str> {
    v.pointer("/message/content")
        .and_then(|c| c.as_str())
        .or_else(|| v.get("response").and_then(|r| r.as_str()))
}

/// Ollama sends whole tool calls (object arguments) rather than fragments.
fn collect_tool_calls(record: &Value, tools: &mut ToolCallAssembler, next_index: &mut u64) {
    let Some(calls) = record.pointer("/message/tool_calls").and_then(|v| v.as_array()) else {
        return;
    };
    for tc in calls {
        let arguments = match tc.pointer("/function/arguments") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        tools.on_fragment(
            *next_index,
            tc.get("id").and_then(|v| v.as_str()),
            tc.pointer("/function/name").and_then(|v| v.as_str()),
            Some(&arguments),
        );
        *next_index += 1;
    }
}

/// `done_reason`, or `tool_calls` when the turn produced calls.
fn finish_reason(record: &Value, has_tools: bool) -> String {
    if has_tools {
        return "tool_calls".to_string();
    }
    record
        .get("done_reason")
        .and_then(|r| r.as_str())
        .filter(|r| !r.is_empty())
        .unwrap_or("stop")
        .to_string()
}

#[derive(Debug, Default)]
struct OllamaStream {
    usage: Option<Usage>,
    tools: ToolCallAssembler,
    next_tool: u64,
}

impl FrameMapper<Value> for OllamaStream {
    fn on_frame(&mut self, record: Value, events: &EventEmitter) {
        if record.get("error").is_some() {
            events.emit(StreamEvent::Error(classify_in_band(
                &record.to_string(),
                Some(Provider::Ollama.key()),
            )));
            return;
        }
        if let Some(text) = record_text(&record).filter(|t| !t.is_empty()) {
            events.emit(StreamEvent::delta(text));
        }
        collect_tool_calls(&record, &mut self.tools, &mut self.next_tool);

        let prompt = record.get("prompt_eval_count").and_then(|v| v.as_u64());
        let completion = record.get("eval_count").and_then(|v| v.as_u64());
        if prompt.is_some() || completion.is_some() {
            let usage = self.usage.get_or_insert_with(Usage::default);
            usage.prompt_tokens += prompt.unwrap_or(0);
            usage.completion_tokens += completion.unwrap_or(0);
        }

        if record.get("done").and_then(|d| d.as_bool()) == Some(true) {
            let reason = finish_reason(&record, !self.tools.is_empty());
            emit_tool_calls(&mut self.tools, Some(&reason), events);
            if let Some(usage) = self.usage.take() {
                events.emit(StreamEvent::Usage(usage));
            }
            events.emit(StreamEvent::done(reason));
        }
    }
}

impl OllamaAdapter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    fn with_auth<R>(config: &CallConfig, req: R, header: impl Fn(R, String) -> R) -> R {
        match config.key() {
            Some(key) => header(req, format!("Bearer {}", key)),
            None => req,
        }
    }

    fn open(&self, req: StreamRequest, config: &CallConfig) -> BoxStream<'static, StreamFrame<Value>> {
        let req = Self::with_auth(config, req, |r, v| r.header("authorization", v));
        request_stream(self.transport.clone(), req, NdjsonDecoder::new).0
    }

    async fn fetch(&self, config: &CallConfig, req: JsonRequest) -> Result<Value> {
        let req = Self::with_auth(config, req, |r, v| r.header("authorization", v));
        request_json(self.transport.as_ref(), &req).await
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn provider(&self) -> Provider {
        Provider::Ollama
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
        let base = config.base_url_or(DEFAULT_BASE_URL);
        diag!(
            config.trace,
            request_id = events.request_id(),
            model = %options.model,
            "ollama stream"
        );

        let chat = stream_request(
            Provider::Ollama,
            config,
            format!("{}/api/chat", base),
            cancel.clone(),
        )
        .json(chat_body(options, messages, true));
        let mut frames = self.open(chat, config);

        let mut mapper = OllamaStream::default();
        match frames.next().await {
            Some(StreamFrame::Error(e)) if e.status() == Some(404) => {
                drop(frames);
                diag!(config.trace, "chat endpoint not found, using /api/generate");
                let generate = stream_request(
                    Provider::Ollama,
                    config,
                    format!("{}/api/generate", base),
                    cancel,
                )
                .json(generate_body(options, messages, true));
                drive(self.open(generate, config), events, &mut mapper).await;
            }
            Some(first) => {
                let frames = futures::stream::once(async move { first }).chain(frames);
                drive(Box::pin(frames), events, &mut mapper).await;
            }
            None => mapper.on_end(events),
        }
    }

    async fn complete(
        &self,
        config: &CallConfig,
        options: &ModelOptions,
        messages: &[Message],
        cancel: Option<CancellationToken>,
    ) -> Result<Completion> {
        let base = config.base_url_or(DEFAULT_BASE_URL);
        let chat = json_request(
            Provider::Ollama,
            config,
            JsonRequest::post(format!("{}/api/chat", base)).json(chat_body(options, messages, false)),
            cancel.clone(),
        );
        let body = match self.fetch(config, chat).await {
            Err(e) if e.status() == Some(404) => {
                let generate = json_request(
                    Provider::Ollama,
                    config,
                    JsonRequest::post(format!("{}/api/generate", base))
                        .json(generate_body(options, messages, false)),
                    cancel,
                );
                self.fetch(config, generate).await?
            }
            other => other?,
        };

        let prompt = body.get("prompt_eval_count").and_then(|v| v.as_u64());
        let completion = body.get("eval_count").and_then(|v| v.as_u64());
        let usage = (prompt.is_some() || completion.is_some())
            .then(|| Usage::new(prompt.unwrap_or(0), completion.unwrap_or(0)));
        let mut tools = ToolCallAssembler::new();
        collect_tool_calls(&body, &mut tools, &mut 0);
        Ok(Completion {
            text: record_text(&body).unwrap_or("").to_string(),
            usage,
            finish_reason: Some(finish_reason(&body, !tools.is_empty())),
            tool_calls: tools.finalize(),
        })
    }

    /// Union of `/api/tags` and `/v1/models`, first-seen order, duplicates removed.
    async fn list_models(&self, config: &CallConfig) -> Vec<String> {
        let base = config.base_url_or(DEFAULT_BASE_URL);
        let endpoint = |path: &str| {
            JsonRequest::get(format!("{}{}", base, path))
                .timeout(Some(config.timeout.unwrap_or(LIST_TIMEOUT)))
                .retry(RetryPolicy::none())
                .provider(Provider::Ollama.key())
                .trace(config.trace)
        };

        let mut names: Vec<String> = Vec::new();
        match self.fetch(config, endpoint("/api/tags")).await {
            Ok(v) => {
                for m in v["models"].as_array().into_iter().flatten() {
                    if let Some(name) = m
                        .get("name")
                        .or_else(|| m.get("model"))
                        .and_then(|n| n.as_str())
                    {
                        names.push(name.to_string());
                    }
                }
            }
            Err(e) => debug!(error = %e, "ollama /api/tags lookup failed"),
        }
        match self.fetch(config, endpoint("/v1/models")).await {
            Ok(v) => {
                for m in v["data"].as_array().into_iter().flatten() {
                    if let Some(id) = m.get("id").and_then(|n| n.as_str()) {
                        names.push(id.to_string());
                    }
                }
            }
            Err(e) => debug!(error = %e, "ollama /v1/models lookup failed"),
        }

        let mut seen = HashSet::new();
        names.retain(|n| seen.insert(n.clone()));
        names
    }
}
