//! Integration tests for the JSON and stream executors over real HTTP

use crate::mock_server::MockServerFixture;
use ai_lib_relay::client::{request_json, request_sse, JsonRequest, StreamFrame, StreamRequest};
use ai_lib_relay::transport::HttpTransport;
use ai_lib_relay::{ErrorCode, RetryPolicy};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;

fn fast_retry() -> RetryPolicy {
    RetryPolicy::default().with_delays(5, 20)
}

#[tokio::test]
async fn test_server_error_is_retried_then_surfaced() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_error_response("/v1/echo", 500, r#"{"error":{"message":"boom"}}"#, 3)
        .await;

    let transport = HttpTransport::new().unwrap();
    let req = JsonRequest::post(format!("{}/v1/echo", fixture.base_url))
        .json(json!({"ping": true}))
        .retry(fast_retry())
        .provider("openai");
    let err = request_json::<Value>(&transport, &req).await.unwrap_err();

    mock.assert_async().await;
    assert_eq!(err.code, ErrorCode::Server);
    assert_eq!(err.status(), Some(500));
    assert_eq!(err.message, "boom");
    assert_eq!(err.context.provider.as_deref(), Some("openai"));
}

#[tokio::test]
async fn test_auth_failure_is_attempted_once() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_error_response(
            "/v1/echo",
            401,
            r#"{"error":{"message":"Incorrect API key provided","code":"invalid_api_key"}}"#,
            1,
        )
        .await;

    let transport = HttpTransport::new().unwrap();
    let req = JsonRequest::post(format!("{}/v1/echo", fixture.base_url)).retry(fast_retry());
    let err = request_json::<Value>(&transport, &req).await.unwrap_err();

    mock.assert_async().await;
    assert_eq!(err.code, ErrorCode::Auth);
    assert!(!err.is_retryable());
    assert_eq!(err.context.provider_code.as_deref(), Some("invalid_api_key"));
}

#[tokio::test]
async fn test_rate_limit_honours_retry_after_then_succeeds() {
    let fixture = MockServerFixture::new().await;
    let limited = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/v1/echo")
            .with_status(429)
            .with_header("retry-after-ms", "15")
            .with_body(r#"{"error":{"message":"slow down","code":"rate_limit_exceeded"}}"#)
            .expect(1)
            .create_async()
            .await
    };
    let ok = fixture
        .mock_json_response("POST", "/v1/echo", 200, r#"{"answer":42}"#)
        .await;

    let transport = HttpTransport::new().unwrap();
    let req = JsonRequest::post(format!("{}/v1/echo", fixture.base_url)).retry(fast_retry());
    let body: Value = request_json(&transport, &req).await.unwrap();

    limited.assert_async().await;
    ok.assert_async().await;
    assert_eq!(body["answer"], 42);
}

#[tokio::test]
async fn test_quota_exhaustion_is_not_retried() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_error_response(
            "/v1/echo",
            429,
            r#"{"error":{"message":"You exceeded your current quota","code":"insufficient_quota"}}"#,
            1,
        )
        .await;

    let transport = HttpTransport::new().unwrap();
    let req = JsonRequest::post(format!("{}/v1/echo", fixture.base_url)).retry(fast_retry());
    let err = request_json::<Value>(&transport, &req).await.unwrap_err();

    mock.assert_async().await;
    assert_eq!(err.code, ErrorCode::RateLimit);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_connection_refused_is_network() {
    let transport = HttpTransport::new().unwrap();
    // Port 9 (discard) on loopback is not expected to be listening.
    let req = JsonRequest::get("http://127.0.0.1:9/none").retry(RetryPolicy::none());
    let err = request_json::<Value>(&transport, &req).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Network);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_sse_lifecycle_over_http() {
    let fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_sse_stream(
            "/v1/stream",
            &[
                "event: greeting\ndata: hello",
                ": keepalive",
                "id: 7\ndata: world",
                "data: [DONE]",
            ],
        )
        .await;

    let req = StreamRequest::post(format!("{}/v1/stream", fixture.base_url)).json(json!({}));
    let (frames, _handle) = request_sse(Arc::new(HttpTransport::new().unwrap()), req);
    let frames: Vec<_> = frames.collect().await;

    assert_eq!(frames[0], StreamFrame::Open { status: 200 });
    assert_eq!(frames[1], StreamFrame::FirstByte);
    let messages: Vec<_> = frames
        .iter()
        .filter_map(|f| match f {
            StreamFrame::Message(ev) => Some(ev.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].event.as_deref(), Some("greeting"));
    assert_eq!(messages[0].data, "hello");
    assert_eq!(messages[1].id.as_deref(), Some("7"));
    assert_eq!(messages[2].data, "[DONE]");
    assert_eq!(frames.last(), Some(&StreamFrame::Done));
}

#[tokio::test]
async fn test_sse_bad_request_is_single_terminal_error() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_error_response("/v1/stream", 400, r#"{"error":{"message":"bad model"}}"#, 1)
        .await;

    let req = StreamRequest::post(format!("{}/v1/stream", fixture.base_url)).retry(fast_retry());
    let (frames, _handle) = request_sse(Arc::new(HttpTransport::new().unwrap()), req);
    let frames: Vec<_> = frames.collect().await;

    mock.assert_async().await;
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        StreamFrame::Error(e) => {
            assert_eq!(e.code, ErrorCode::InvalidRequest);
            assert_eq!(e.status(), Some(400));
            assert_eq!(e.message, "bad model");
        }
        other => panic!("unexpected frame {:?}", other),
    }
}
