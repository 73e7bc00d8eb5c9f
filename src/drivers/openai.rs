//! OpenAI-shaped chat completions (`/chat/completions`, SSE with a `[DONE]` sentinel).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    drive, emit_tool_calls, json_request, missing_key, stream_request, Completion, FrameMapper,
    ProviderAdapter, ToolCallAssembler,
};
use crate::client::error_classification::classify_in_band;
use crate::client::{request_json, request_sse, JsonRequest};
use crate::config::CallConfig;
use crate::pipeline::ParsedSseEvent;
use crate::registry::Provider;
use crate::transport::Transport;
use crate::types::message::first_system;
use crate::types::{EventEmitter, Message, MessageRole, ModelOptions, StreamEvent, ToolCall, Usage};
use crate::Result;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    transport: Arc<dyn Transport>,
}

impl OpenAiAdapter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    fn url(config: &CallConfig) -> String {
        format!("{}/chat/completions", config.base_url_or(DEFAULT_BASE_URL))
    }
}

/// Text of a `content` field that is either a plain string or an array of typed parts.
pub(crate) fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|p| matches!(p.get("type").and_then(|t| t.as_str()), None | Some("text")))
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect(),
        _ => String::new(),
    }
}

pub(crate) fn parse_usage(usage: &Value) -> Option<Usage> {
    if !usage.is_object() {
        return None;
    }
    Some(Usage::new(
        usage["prompt_tokens"].as_u64().unwrap_or(0),
        usage["completion_tokens"].as_u64().unwrap_or(0),
    ))
}

pub(crate) fn build_body(options: &ModelOptions, messages: &[Message], stream: bool) -> Value {
    let mut out: Vec<Value> = Vec::new();
    if first_system(messages).is_none() {
        if let Some(system) = &options.system {
            out.push(json!({ "role": "system", "content": system }));
        }
    }
    // Tool results are not replayed to this endpoint.
    for m in messages.iter().filter(|m| m.role != MessageRole::Tool) {
        let mut obj = json!({ "role": m.role.as_str(), "content": m.content });
        if let Some(name) = &m.name {
            obj["name"] = json!(name);
        }
        out.push(obj);
    }

    if !options.images.is_empty() {
        if let Some(last_user) = out.iter_mut().rev().find(|m| m["role"] == "user") {
            let mut parts = vec![json!({ "type": "text", "text": last_user["content"].clone() })];
            for image in &options.images {
                parts.push(json!({
                    "type": "image_url",
                    "image_url": { "url": image.data_url() }
                }));
            }
            last_user["content"] = Value::Array(parts);
        }
    }

    let mut body = json!({
        "model": options.model,
        "messages": out,
        "stream": stream,
    });
    if let Some(t) = options.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = options.top_p {
        body["top_p"] = json!(p);
    }
    if let Some(mt) = options.max_tokens {
        body["max_tokens"] = json!(mt);
    }
    if !options.stop.is_empty() {
        body["stop"] = json!(options.stop);
    }
    if options.json_mode {
        body["response_format"] = json!({ "type": "json_object" });
    }
    if !options.tools.is_empty() {
        body["tools"] = Value::Array(options.tools.iter().map(|t| t.to_function_json()).collect());
        if let Some(choice) = &options.tool_choice {
            body["tool_choice"] = choice.clone();
        }
    }
    body
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    let mut assembler = ToolCallAssembler::new();
    for (i, tc) in calls.iter().enumerate() {
        assembler.on_fragment(
            i as u64,
            tc.get("id").and_then(|v| v.as_str()),
            tc.pointer("/function/name").and_then(|v| v.as_str()),
            tc.pointer("/function/arguments").and_then(|v| v.as_str()),
        );
    }
    assembler.finalize()
}

pub(crate) fn parse_completion(body: &Value) -> Completion {
    let message = body.pointer("/choices/0/message").cloned().unwrap_or(Value::Null);
    Completion {
        text: content_text(message.get("content")),
        usage: body.get("usage").and_then(parse_usage),
        finish_reason: body
            .pointer("/choices/0/finish_reason")
            .and_then(|v| v.as_str())
            .map(String::from),
        tool_calls: parse_tool_calls(&message),
    }
}

#[derive(Debug, Default)]
struct OpenAiStream {
    assembler: ToolCallAssembler,
    /// Held until `[DONE]` so a trailing usage chunk is still delivered.
    finish_reason: Option<String>,
}

impl OpenAiStream {
    fn finish(&mut self, events: &EventEmitter) {
        emit_tool_calls(&mut self.assembler, self.finish_reason.as_deref(), events);
        events.emit(StreamEvent::Done {
            finish_reason: self.finish_reason.take(),
        });
    }
}

impl FrameMapper<ParsedSseEvent> for OpenAiStream {
    fn on_frame(&mut self, frame: ParsedSseEvent, events: &EventEmitter) {
        let data = frame.data.trim();
        if data.is_empty() {
            return;
        }
        if data == "[DONE]" {
            self.finish(events);
            return;
        }
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "skipping undecodable chunk");
                return;
            }
        };
        if v.get("error").is_some() {
            events.emit(StreamEvent::Error(classify_in_band(
                data,
                Some(Provider::OpenAi.key()),
            )));
            return;
        }
        if let Some(usage) = v.get("usage").and_then(parse_usage) {
            events.emit(StreamEvent::Usage(usage));
        }

        let choice = v.pointer("/choices/0");
        if let Some(delta) = choice.and_then(|c| c.get("delta")) {
            let text = content_text(delta.get("content"));
            if !text.is_empty() {
                events.emit(StreamEvent::delta(text));
            }
            if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                for (pos, tc) in calls.iter().enumerate() {
                    self.assembler.on_fragment(
                        tc.get("index").and_then(|v| v.as_u64()).unwrap_or(pos as u64),
                        tc.get("id").and_then(|v| v.as_str()),
                        tc.pointer("/function/name").and_then(|v| v.as_str()),
                        tc.pointer("/function/arguments").and_then(|v| v.as_str()),
                    );
                }
            }
        }
        if let Some(reason) = choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(|r| r.as_str())
        {
            self.finish_reason = Some(reason.to_string());
        }
    }

    fn on_end(&mut self, events: &EventEmitter) {
        self.finish(events);
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAi
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
            events.emit(StreamEvent::Error(missing_key(Provider::OpenAi)));
            return;
        };
        diag!(
            config.trace,
            request_id = events.request_id(),
            model = %options.model,
            "openai stream"
        );
        let req = stream_request(Provider::OpenAi, config, Self::url(config), cancel)
            .header("authorization", format!("Bearer {}", key))
            .header("accept", "text/event-stream")
            .json(build_body(options, messages, true));
        let (frames, _cancel) = request_sse(self.transport.clone(), req);
        drive(frames, events, &mut OpenAiStream::default()).await;
    }

    async fn complete(
        &self,
        config: &CallConfig,
        options: &ModelOptions,
        messages: &[Message],
        cancel: Option<CancellationToken>,
    ) -> Result<Completion> {
        let key = config.key().ok_or_else(|| missing_key(Provider::OpenAi))?;
        let req = json_request(
            Provider::OpenAi,
            config,
            JsonRequest::post(Self::url(config))
                .header("authorization", format!("Bearer {}", key))
                .json(build_body(options, messages, false)),
            cancel,
        );
        let body: Value = request_json(self.transport.as_ref(), &req).await?;
        Ok(parse_completion(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_code::ErrorCode;
    use crate::transport::scripted::{Chunk, Scripted, ScriptedTransport};
    use crate::types::ToolDefinition;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn cfg() -> CallConfig {
        CallConfig::new()
            .with_api_key("sk-test")
            .with_base_url("http://mock/v1")
    }

    #[test]
    fn test_body_filters_tool_role_and_keeps_name() {
        let msgs = vec![
            Message::system("sys"),
            Message::user("hi").with_name("alice"),
            Message::tool("{\"ok\":true}"),
            Message::assistant("hello"),
        ];
        let opts = ModelOptions::new("gpt-4o-mini")
            .temperature(0.2)
            .top_p(0.9)
            .max_tokens(64)
            .stop(vec!["END".into()])
            .json_mode(true);
        let body = build_body(&opts, &msgs, true);
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
        assert_eq!(body["messages"][1]["name"], "alice");
        assert_eq!(body["stream"], true);
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["top_p"], 0.9);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stop"], json!(["END"]));
        assert_eq!(body["response_format"], json!({"type": "json_object"}));
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_body_tools_and_options_system() {
        let opts = ModelOptions::new("m")
            .system("be terse")
            .tools(vec![ToolDefinition::new("lookup")])
            .tool_choice(json!("auto"));
        let body = build_body(&opts, &[Message::user("q")], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be terse");
        assert_eq!(body["tools"][0]["function"]["name"], "lookup");
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn test_content_parts() {
        let parts = json!([
            {"type": "text", "text": "a"},
            {"type": "image_url", "image_url": {"url": "x"}},
            {"type": "text", "text": "b"}
        ]);
        assert_eq!(content_text(Some(&parts)), "ab");
        assert_eq!(content_text(Some(&json!("plain"))), "plain");
        assert_eq!(content_text(None), "");
    }

    #[tokio::test]
    async fn test_missing_key_short_circuits() {
        let transport = ScriptedTransport::new(vec![]);
        let adapter = OpenAiAdapter::new(transport.clone());
        let (events, mut rx) = EventEmitter::channel("r1");
        adapter
            .stream(
                CancellationToken::new(),
                &CallConfig::new(),
                &ModelOptions::new("m"),
                &[Message::user("hi")],
                &events,
            )
            .await;
        let evs = drain(&mut rx);
        assert_eq!(evs[0], StreamEvent::Start);
        match &evs[1] {
            StreamEvent::Error(e) => assert_eq!(e.code, ErrorCode::Auth),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(evs.len(), 2);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_deltas_usage_done() {
        let transport = ScriptedTransport::new(vec![Scripted::ok(vec![
            Chunk::data("data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n"),
            Chunk::data("data: {\"choices\":[{\"delta\":{\"content\":[{\"type\":\"text\",\"text\":\"lo\"}]}}]}\n\n"),
            Chunk::data("data: {\"choices\":[{\"delta\":{}}],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2}}\n\n"),
            Chunk::data("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n"),
            Chunk::data("data: [DONE]\n\n"),
        ])]);
        let adapter = OpenAiAdapter::new(transport.clone());
        let (events, mut rx) = EventEmitter::channel("r2");
        adapter
            .stream(
                CancellationToken::new(),
                &cfg(),
                &ModelOptions::new("m"),
                &[Message::user("hi")],
                &events,
            )
            .await;
        let evs = drain(&mut rx);
        assert_eq!(
            evs,
            vec![
                StreamEvent::Start,
                StreamEvent::Handshake,
                StreamEvent::FirstByte,
                StreamEvent::delta("Hel"),
                StreamEvent::delta("lo"),
                StreamEvent::Usage(Usage::new(3, 2)),
                StreamEvent::done("stop"),
            ]
        );

        let sent = transport.requests();
        assert_eq!(sent[0].url, "http://mock/v1/chat/completions");
        assert!(sent[0]
            .headers
            .iter()
            .any(|(k, v)| k == "authorization" && v == "Bearer sk-test"));
    }

    #[tokio::test]
    async fn test_stream_done_sentinel_without_finish_reason() {
        let transport = ScriptedTransport::new(vec![Scripted::ok(vec![Chunk::data(
            "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\ndata: [DONE]\n\n",
        )])]);
        let adapter = OpenAiAdapter::new(transport);
        let (events, mut rx) = EventEmitter::channel("r3");
        adapter
            .stream(
                CancellationToken::new(),
                &cfg(),
                &ModelOptions::new("m"),
                &[Message::user("hi")],
                &events,
            )
            .await;
        let evs = drain(&mut rx);
        assert_eq!(
            evs.last(),
            Some(&StreamEvent::Done {
                finish_reason: None
            })
        );
        assert_eq!(evs.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_stream_tool_calls() {
        let transport = ScriptedTransport::new(vec![Scripted::ok(vec![
            Chunk::data("data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"lookup\",\"arguments\":\"{\\\"q\\\":\"}}]}}]}\n\n"),
            Chunk::data("data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"rust\\\"}\"}}]}}]}\n\n"),
            Chunk::data("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n"),
        ])]);
        let adapter = OpenAiAdapter::new(transport);
        let (events, mut rx) = EventEmitter::channel("r4");
        adapter
            .stream(
                CancellationToken::new(),
                &cfg(),
                &ModelOptions::new("m"),
                &[Message::user("hi")],
                &events,
            )
            .await;
        let evs = drain(&mut rx);
        let n = evs.len();
        assert_eq!(
            evs[n - 3],
            StreamEvent::ToolCall {
                call: ToolCall {
                    id: "call_1".into(),
                    name: "lookup".into(),
                    arguments: json!({"q": "rust"}),
                }
            }
        );
        assert_eq!(
            evs[n - 2],
            StreamEvent::ToolResultRequest {
                call_ids: vec!["call_1".into()]
            }
        );
        assert_eq!(evs[n - 1], StreamEvent::done("tool_calls"));
    }

    #[tokio::test]
    async fn test_usage_after_finish_reason_is_kept() {
        let transport = ScriptedTransport::new(vec![Scripted::ok(vec![Chunk::data(concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"},\"finish_reason\":\"length\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":1}}\n\n",
            "data: [DONE]\n\n",
        ))])]);
        let adapter = OpenAiAdapter::new(transport);
        let (events, mut rx) = EventEmitter::channel("r6");
        adapter
            .stream(
                CancellationToken::new(),
                &cfg(),
                &ModelOptions::new("m"),
                &[Message::user("hi")],
                &events,
            )
            .await;
        let evs = drain(&mut rx);
        assert_eq!(
            &evs[evs.len() - 3..],
            &[
                StreamEvent::delta("ok"),
                StreamEvent::Usage(Usage::new(7, 1)),
                StreamEvent::done("length"),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_in_band_error() {
        let transport = ScriptedTransport::new(vec![Scripted::ok(vec![Chunk::data(
            "data: {\"error\":{\"message\":\"boom\",\"type\":\"server_error\"}}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        )])]);
        let adapter = OpenAiAdapter::new(transport);
        let (events, mut rx) = EventEmitter::channel("r5");
        adapter
            .stream(
                CancellationToken::new(),
                &cfg(),
                &ModelOptions::new("m"),
                &[Message::user("hi")],
                &events,
            )
            .await;
        let evs = drain(&mut rx);
        match evs.last() {
            Some(StreamEvent::Error(e)) => {
                assert_eq!(e.code, ErrorCode::Server);
                assert_eq!(e.message, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!evs.contains(&StreamEvent::delta("late")));
    }

    #[tokio::test]
    async fn test_complete() {
        let body = r#"{"choices":[{"message":{"content":"Hi there!","tool_calls":[{"id":"c1","function":{"name":"f","arguments":"{\"a\":1}"}}]},"finish_reason":"stop"}],"usage":{"prompt_tokens":10,"completion_tokens":5}}"#;
        let transport = ScriptedTransport::new(vec![Scripted::buffered(200, body)]);
        let adapter = OpenAiAdapter::new(transport.clone());
        let out = adapter
            .complete(&cfg(), &ModelOptions::new("m"), &[Message::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(out.text, "Hi there!");
        assert_eq!(out.finish_reason.as_deref(), Some("stop"));
        assert_eq!(out.usage, Some(Usage::new(10, 5)));
        assert_eq!(out.tool_calls[0].arguments, json!({"a": 1}));
        assert_eq!(transport.requests()[0].body.as_ref().unwrap()["stream"], false);
    }
}
