//! Chat endpoint integration tests
//!
//! POST /api/chat with `{ baseUrl, apiKey, payload }`:
//! - Validation happens before any upstream call
//! - Payload, bearer credential and content type reach the upstream
//! - Status, content type and SSE bytes come back unchanged and in order

use std::time::Duration;

use axum::http::{header, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header as header_matcher, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    chat_body, constants::*, read_at_least, spawn_relay, stream_payload, test_app_with,
    test_config, test_server, unreachable_base_url, StreamEnd, StreamingUpstream,
};
use chat_relay::Config;

const SSE_BODY: &str = concat!(
    "data: {\"id\":\"chatcmpl-1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
    "data: {\"id\":\"chatcmpl-1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"}}]}\n\n",
    "data: {\"id\":\"chatcmpl-1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n"
);

/// Mount a catch-all that must never be hit
async fn forbid_upstream_calls(server: &MockServer) {
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_missing_payload_never_reaches_upstream() {
    let upstream = MockServer::start().await;
    forbid_upstream_calls(&upstream).await;

    let response = test_server()
        .post("/api/chat")
        .json(&json!({ "baseUrl": upstream.uri(), "apiKey": TEST_API_KEY }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>(),
        json!({ "error": "Missing baseUrl/apiKey/payload" })
    );
}

#[tokio::test]
async fn test_missing_credentials_rejected() {
    let upstream = MockServer::start().await;
    forbid_upstream_calls(&upstream).await;
    let server = test_server();

    for body in [
        json!({ "baseUrl": upstream.uri(), "payload": stream_payload() }),
        json!({ "apiKey": TEST_API_KEY, "payload": stream_payload() }),
        json!({ "baseUrl": "", "apiKey": TEST_API_KEY, "payload": stream_payload() }),
        json!({ "baseUrl": upstream.uri(), "apiKey": TEST_API_KEY, "payload": null }),
        json!({}),
    ] {
        let response = server.post("/api/chat").json(&body).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(
            response.json::<Value>()["error"],
            "Missing baseUrl/apiKey/payload"
        );
    }
}

#[tokio::test]
async fn test_invalid_json_rejected() {
    let response = test_server()
        .post("/api/chat")
        .text("{\"baseUrl\": ")
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let message = response.json::<Value>()["error"].as_str().unwrap().to_string();
    assert!(message.starts_with("Invalid JSON body"), "got {}", message);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let upstream = MockServer::start().await;
    forbid_upstream_calls(&upstream).await;

    let config = Config {
        body_limit_bytes: 1024,
        ..test_config()
    };
    let server = axum_test::TestServer::new(test_app_with(config)).unwrap();

    let payload = json!({ "model": "gpt-x", "messages": [{ "role": "user", "content": "x".repeat(4096) }] });
    let response = server
        .post("/api/chat")
        .json(&chat_body(&upstream.uri(), payload))
        .await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert!(response.json::<Value>()["error"].is_string());
}

#[tokio::test]
async fn test_payload_forwarded_to_resolved_endpoint() {
    let upstream = MockServer::start().await;
    let payload = json!({ "model": "gpt-x", "messages": [] });

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header_matcher("authorization", TEST_BEARER))
        .and(header_matcher("content-type", "application/json"))
        .and(body_json(&payload))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(SSE_BODY.as_bytes().to_vec(), "text/event-stream"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let response = test_server()
        .post("/api/chat")
        .json(&chat_body(&format!("{}/v1", upstream.uri()), payload))
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    assert_eq!(response.text(), SSE_BODY);
}

#[tokio::test]
async fn test_payload_is_not_reinterpreted() {
    let upstream = MockServer::start().await;
    let payload = json!({
        "model": "gpt-x",
        "messages": [{ "role": "user", "content": "hi" }],
        "temperature": 0.25,
        "vendor_extension": { "nested": [1, 2, { "deep": null }] }
    });

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_json(&payload))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "chatcmpl-1" })))
        .expect(1)
        .mount(&upstream)
        .await;

    let response = test_server()
        .post("/api/chat")
        .json(&chat_body(&upstream.uri(), payload))
        .await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>(), json!({ "id": "chatcmpl-1" }));
}

#[tokio::test]
async fn test_upstream_error_passed_through() {
    let upstream = MockServer::start().await;
    let error_body = r#"{"error":{"message":"Rate limit reached","type":"rate_limit_error"}}"#;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429).set_body_raw(error_body.as_bytes().to_vec(), "application/json"),
        )
        .mount(&upstream)
        .await;

    let response = test_server()
        .post("/api/chat")
        .json(&chat_body(&upstream.uri(), stream_payload()))
        .await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(response.text(), error_body);
}

#[tokio::test]
async fn test_transport_failure_before_headers_is_500() {
    let response = test_server()
        .post("/api/chat")
        .json(&chat_body(&unreachable_base_url().await, stream_payload()))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let message = response.json::<Value>()["error"].as_str().unwrap().to_string();
    assert!(!message.is_empty());
}

#[tokio::test]
async fn test_stream_chunks_relayed_in_order() {
    let mut upstream = StreamingUpstream::start().await;
    let relay = spawn_relay().await;

    let chunks: Vec<String> = (0..20)
        .map(|i| format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{}\"}}}}]}}\n\n", i))
        .collect();
    let expected = chunks.concat();

    let mut response = reqwest::Client::new()
        .post(format!("{}/api/chat", relay))
        .json(&chat_body(&upstream.base_url, stream_payload()))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );

    for (i, chunk) in chunks.iter().enumerate() {
        upstream.push(chunk.clone());
        if i % 5 == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
    upstream.finish();

    let received = read_at_least(&mut response, expected.len() + 1).await;
    assert_eq!(String::from_utf8(received).unwrap(), expected);

    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/v1/chat/completions");
    assert_eq!(requests[0].authorization.as_deref(), Some(TEST_BEARER));
    assert_eq!(requests[0].content_type.as_deref(), Some("application/json"));
    assert_eq!(
        serde_json::from_slice::<Value>(&requests[0].body).unwrap(),
        stream_payload()
    );
}

#[tokio::test]
async fn test_chunk_reaches_client_before_stream_ends() {
    let mut upstream = StreamingUpstream::start().await;
    let relay = spawn_relay().await;

    let mut response = reqwest::Client::new()
        .post(format!("{}/api/chat", relay))
        .json(&chat_body(&upstream.base_url, stream_payload()))
        .send()
        .await
        .unwrap();

    let first = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n";
    upstream.push(first);

    // The upstream stream is still open, so this only passes if the relay
    // forwards without buffering the whole body.
    let received = read_at_least(&mut response, first.len()).await;
    assert_eq!(String::from_utf8(received).unwrap(), first);

    upstream.finish();
    assert_eq!(
        upstream.wait_for_end(Duration::from_secs(5)).await,
        Some(StreamEnd::Completed)
    );
}
