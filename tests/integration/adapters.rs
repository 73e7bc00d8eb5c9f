//! End-to-end adapter tests against a mock HTTP server

use crate::mock_server::{collect_stream, MockServerFixture};
use ai_lib_relay::{
    get_adapter, ErrorCode, Message, ModelOptions, Provider, StreamEvent, Usage,
};
use mockito::Matcher;

#[tokio::test]
async fn test_openai_stream_end_to_end() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJsonString(
                r#"{"model":"gpt-4o-mini","stream":true}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"}}]}\n\n",
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" there\"}}]}\n\n",
                "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
                "data: [DONE]\n\n",
            ))
            .create_async()
            .await
    };

    let adapter = fixture.adapter("openai");
    let config = fixture.config("/v1").with_api_key("sk-test");
    let events = collect_stream(
        adapter.as_ref(),
        &config,
        &ModelOptions::new("gpt-4o-mini"),
        &[Message::user("hi")],
    )
    .await;

    mock.assert_async().await;
    assert_eq!(
        events,
        vec![
            StreamEvent::Start,
            StreamEvent::Handshake,
            StreamEvent::FirstByte,
            StreamEvent::delta("Hello"),
            StreamEvent::delta(" there"),
            StreamEvent::done("stop"),
        ]
    );
}

#[tokio::test]
async fn test_openai_missing_key_sends_nothing() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_error_response("/v1/chat/completions", 500, "{}", 0)
        .await;

    let adapter = fixture.adapter("oai");
    let events = collect_stream(
        adapter.as_ref(),
        &fixture.config("/v1"),
        &ModelOptions::new("gpt-4o-mini"),
        &[Message::user("hi")],
    )
    .await;

    mock.assert_async().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], StreamEvent::Start);
    match &events[1] {
        StreamEvent::Error(e) => assert_eq!(e.code, ErrorCode::Auth),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_openai_stream_server_errors_retry_then_fail() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_error_response(
            "/v1/chat/completions",
            503,
            r#"{"error":{"message":"overloaded"}}"#,
            3,
        )
        .await;

    let adapter = fixture.adapter("openai");
    let events = collect_stream(
        adapter.as_ref(),
        &fixture.config("/v1").with_api_key("sk-test"),
        &ModelOptions::new("gpt-4o-mini"),
        &[Message::user("hi")],
    )
    .await;

    mock.assert_async().await;
    let errors: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Error(_)))
        .collect();
    assert_eq!(errors.len(), 1);
    match events.last() {
        Some(StreamEvent::Error(e)) => {
            assert_eq!(e.code, ErrorCode::Server);
            assert_eq!(e.status(), Some(503));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_anthropic_stream_headers_and_stop_reason() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "ak")
            .match_header("anthropic-version", "2023-06-01")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "event: message_start\ndata: {\"type\":\"message_start\"}\n\n",
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Bonjour\"}}\n\n",
                "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"max_tokens\"}}\n\n",
                "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
            ))
            .create_async()
            .await
    };

    let adapter = fixture.adapter("claude");
    let events = collect_stream(
        adapter.as_ref(),
        &fixture.config("/v1").with_api_key("ak"),
        &ModelOptions::new("claude-3-5-sonnet"),
        &[Message::user("salut")],
    )
    .await;

    mock.assert_async().await;
    assert!(events.contains(&StreamEvent::delta("Bonjour")));
    assert_eq!(events.last(), Some(&StreamEvent::done("length")));
}

#[tokio::test]
async fn test_gemini_complete_and_simulated_stream() {
    let fixture = MockServerFixture::new().await;
    let body = r#"{
        "candidates":[{"content":{"parts":[{"text":"Hi from Gemini"}]},"finishReason":"STOP"}],
        "usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":3}
    }"#;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .match_header("x-goog-api-key", "gk")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(2)
            .create_async()
            .await
    };

    let adapter = fixture.adapter("Google");
    let config = fixture.config("").with_api_key("gk");
    let options = ModelOptions::new("gemini-1.5-flash");
    let messages = [Message::user("hello")];

    let out = adapter
        .complete(&config, &options, &messages, None)
        .await
        .unwrap();
    assert_eq!(out.text, "Hi from Gemini");
    assert_eq!(out.usage, Some(Usage::new(4, 3)));
    assert_eq!(out.finish_reason.as_deref(), Some("stop"));

    let events = collect_stream(adapter.as_ref(), &config, &options, &messages).await;
    mock.assert_async().await;
    let text: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Delta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "Hi from Gemini");
    assert!(events.contains(&StreamEvent::Usage(Usage::new(4, 3))));
    assert_eq!(events.last(), Some(&StreamEvent::done("stop")));
}

#[tokio::test]
async fn test_ollama_stream_usage_and_done() {
    let fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_ndjson_stream(
            "/api/chat",
            &[
                r#"{"message":{"content":"Hi"},"done":false}"#,
                r#"{"message":{"content":""},"done":true,"prompt_eval_count":5,"eval_count":2}"#,
            ],
        )
        .await;

    let adapter = fixture.adapter("ollama");
    let events = collect_stream(
        adapter.as_ref(),
        &fixture.config(""),
        &ModelOptions::new("llama3"),
        &[Message::user("hi")],
    )
    .await;

    assert_eq!(
        &events[3..],
        &[
            StreamEvent::delta("Hi"),
            StreamEvent::Usage(Usage::new(5, 2)),
            StreamEvent::done("stop"),
        ]
    );
}

#[tokio::test]
async fn test_ollama_falls_back_to_generate() {
    let fixture = MockServerFixture::new().await;
    let chat = fixture
        .mock_error_response("/api/chat", 404, "404 page not found", 1)
        .await;
    let generate = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/api/generate")
            .match_body(Matcher::PartialJsonString(
                r#"{"prompt":"User: hi"}"#.to_string(),
            ))
            .with_status(200)
            .with_body("{\"response\":\"Hey\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n")
            .create_async()
            .await
    };

    let adapter = fixture.adapter("local");
    let events = collect_stream(
        adapter.as_ref(),
        &fixture.config(""),
        &ModelOptions::new("llama3"),
        &[Message::user("hi")],
    )
    .await;

    chat.assert_async().await;
    generate.assert_async().await;
    assert!(events.contains(&StreamEvent::delta("Hey")));
    assert_eq!(events.last(), Some(&StreamEvent::done("stop")));
}

#[tokio::test]
async fn test_ollama_list_models_union() {
    let fixture = MockServerFixture::new().await;
    let _tags = fixture
        .mock_json_response(
            "GET",
            "/api/tags",
            200,
            r#"{"models":[{"name":"llama3:latest"},{"name":"mistral"}]}"#,
        )
        .await;
    let _v1 = fixture
        .mock_json_response(
            "GET",
            "/v1/models",
            200,
            r#"{"object":"list","data":[{"id":"mistral"},{"id":"phi3"}]}"#,
        )
        .await;

    let adapter = fixture.adapter("ollama");
    let models = adapter.list_models(&fixture.config("")).await;
    assert_eq!(models, vec!["llama3:latest", "mistral", "phi3"]);
}

#[tokio::test]
async fn test_ollama_list_models_unreachable_is_empty() {
    let fixture = MockServerFixture::new().await;
    let adapter = fixture.adapter("ollama");
    // Nothing mocked: both lookups get mockito's 501.
    assert!(adapter.list_models(&fixture.config("")).await.is_empty());
}

#[test]
fn test_registry_aliasing() {
    let google = get_adapter("Google").unwrap();
    let gemini = get_adapter("gemini").unwrap();
    assert_eq!(google.provider(), Provider::Gemini);
    assert_eq!(google.provider(), gemini.provider());

    let err = get_adapter("not-a-provider").err().unwrap();
    assert_eq!(err.code, ErrorCode::InvalidRequest);
}
