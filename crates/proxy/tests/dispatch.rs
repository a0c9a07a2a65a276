//! End-to-end dispatch tests against loopback mock upstreams.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::post,
};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use proxy::{
    channel::{Channel, ChannelMetrics, ChannelStore, InMemoryChannelStore},
    format::ApiFormat,
    logging::{RequestLogEntry, RequestLogger, RequestOutcome},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

#[derive(Default)]
struct CapturingLogger {
    entries: Mutex<Vec<RequestLogEntry>>,
}

#[async_trait]
impl RequestLogger for CapturingLogger {
    async fn record(&self, entry: RequestLogEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

fn channel(id: &str, provider: ApiFormat, base_url: String) -> Channel {
    Channel {
        id: id.to_string(),
        name: id.to_string(),
        provider,
        base_url,
        api_key: "upstream-key".to_string().into(),
        custom_key: None,
        timeout_s: Some(5),
        max_retries: 0,
        enabled: true,
        weight: 50,
        priority: 5,
        models_mapping: BTreeMap::new(),
        metrics: ChannelMetrics::default(),
    }
}

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    address
}

async fn spawn_proxy(channels: Vec<Channel>, logger: Arc<dyn RequestLogger>) -> SocketAddr {
    let store: Arc<dyn ChannelStore> = Arc::new(InMemoryChannelStore::seeded(channels));
    let config: Arc<dyn config::ConfigProvider> = Arc::new(config::Config::default());

    let (router, _dispatcher) = proxy::router(config, store, logger, reqwest::Client::new())
        .await
        .unwrap();

    serve(router).await
}

#[derive(Clone)]
struct Captured {
    bodies: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
}

impl Captured {
    fn new() -> Self {
        Self {
            bodies: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn last(&self) -> (HeaderMap, Value) {
        self.bodies.lock().unwrap().last().cloned().expect("captured request")
    }
}

#[tokio::test]
async fn anthropic_caller_openai_upstream_buffered() {
    // Mock OpenAI upstream replying with a plain completion.
    let captured = Captured::new();

    let upstream = Router::new()
        .route(
            "/v1/chat/completions",
            post(
                |State(captured): State<Captured>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    captured.bodies.lock().unwrap().push((headers, body));

                    Json(json!({
                        "id": "chatcmpl-1",
                        "object": "chat.completion",
                        "created": 1700000000,
                        "model": "gpt-4o-mini",
                        "choices": [{
                            "index": 0,
                            "message": {"role": "assistant", "content": "Hello!"},
                            "finish_reason": "stop"
                        }],
                        "usage": {"prompt_tokens": 8, "completion_tokens": 2, "total_tokens": 10}
                    }))
                },
            ),
        )
        .with_state(captured.clone());

    let upstream_address = serve(upstream).await;

    let proxy_address = spawn_proxy(
        vec![channel(
            "openai-mock",
            ApiFormat::Openai,
            format!("http://{upstream_address}/v1"),
        )],
        Arc::new(CapturingLogger::default()),
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("http://{proxy_address}/v1/messages"))
        .header("x-api-key", "caller-key")
        .header("anthropic-version", "2023-06-01")
        .json(&json!({
            "model": "claude-3-haiku",
            "max_tokens": 50,
            "messages": [{"role": "user", "content": "Hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();

    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["model"], "claude-3-haiku");
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "Hello!");
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(body["usage"]["input_tokens"], 8);
    assert_eq!(body["usage"]["output_tokens"], 2);

    // The alias routed to the configured small model and the upstream saw
    // the channel credential.
    let (headers, upstream_body) = captured.last();
    assert_eq!(upstream_body["model"], "gpt-4o-mini");
    assert_eq!(upstream_body["messages"][0]["role"], "user");
    assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer upstream-key");
    assert!(headers.get(header::USER_AGENT).unwrap().to_str().unwrap().starts_with("ccproxy/"));
}

fn sse_frames(frames: &[Value]) -> String {
    let mut body = String::new();

    for frame in frames {
        body.push_str(&format!("data: {frame}\n\n"));
    }

    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn anthropic_caller_openai_upstream_streaming_tool_call() {
    let frames = sse_frames(&[
        json!({
            "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"role": "assistant"}, "finish_reason": null}]
        }),
        json!({
            "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": "c1", "function": {"name": "get_weather"}}
            ]}, "finish_reason": null}]
        }),
        json!({
            "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"loc"}}
            ]}, "finish_reason": null}]
        }),
        json!({
            "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "ation\":\"Paris\"}"}}
            ]}, "finish_reason": null}]
        }),
        json!({
            "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]
        }),
    ]);

    let upstream = Router::new().route(
        "/v1/chat/completions",
        post(move || async move {
            ([(header::CONTENT_TYPE, "text/event-stream")], frames).into_response()
        }),
    );

    let upstream_address = serve(upstream).await;

    let proxy_address = spawn_proxy(
        vec![channel(
            "openai-mock",
            ApiFormat::Openai,
            format!("http://{upstream_address}/v1"),
        )],
        Arc::new(CapturingLogger::default()),
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("http://{proxy_address}/v1/messages"))
        .json(&json!({
            "model": "claude-3-5-sonnet-20241022",
            "max_tokens": 100,
            "stream": true,
            "messages": [{"role": "user", "content": "Weather in Paris?"}],
            "tools": [{
                "name": "get_weather",
                "description": "Get the weather",
                "input_schema": {"type": "object", "properties": {"location": {"type": "string"}}}
            }]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let mut events = Vec::new();
    let mut stream = response.bytes_stream().eventsource();

    while let Some(event) = stream.next().await {
        let event = event.unwrap();
        events.push((event.event, serde_json::from_str::<Value>(&event.data).unwrap()));
    }

    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        [
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    let (_, start) = &events[1];
    assert_eq!(start["content_block"]["type"], "tool_use");
    assert_eq!(start["content_block"]["id"], "c1");
    assert_eq!(start["content_block"]["name"], "get_weather");
    assert_eq!(start["index"], 0);

    let arguments: String = events
        .iter()
        .filter(|(name, _)| name == "content_block_delta")
        .map(|(_, data)| data["delta"]["partial_json"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        serde_json::from_str::<Value>(&arguments).unwrap(),
        json!({"location": "Paris"})
    );

    let (_, message_delta) = &events[5];
    assert_eq!(message_delta["delta"]["stop_reason"], "tool_use");
}

#[tokio::test]
async fn openai_caller_gemini_upstream_buffered() {
    let captured = Captured::new();

    let upstream = Router::new()
        .route(
            "/models/{model}",
            post(
                |State(captured): State<Captured>, headers: HeaderMap, body: String| async move {
                    let body: Value = serde_json::from_str(&body).unwrap();
                    captured.bodies.lock().unwrap().push((headers, body));

                    Json(json!({
                        "candidates": [{
                            "content": {"role": "model", "parts": [{"text": "4"}]},
                            "finishReason": "STOP"
                        }],
                        "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 1, "totalTokenCount": 10}
                    }))
                },
            ),
        )
        .with_state(captured.clone());

    let upstream_address = serve(upstream).await;

    let mut gemini_channel = channel(
        "gemini-mock",
        ApiFormat::Gemini,
        format!("http://{upstream_address}"),
    );
    gemini_channel
        .models_mapping
        .insert("gpt-4o-mini".to_string(), "gemini-2.0-flash".to_string());
    // Pin selection to the Gemini channel through a custom key.
    gemini_channel.custom_key = Some("gemini-key".to_string());

    let proxy_address = spawn_proxy(vec![gemini_channel], Arc::new(CapturingLogger::default())).await;

    let response = reqwest::Client::new()
        .post(format!("http://{proxy_address}/v1/chat/completions"))
        .header(header::AUTHORIZATION, "Bearer gemini-key")
        .json(&json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "2+2?"}
            ],
            "max_tokens": 5
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();

    assert_eq!(body["choices"][0]["index"], 0);
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "4");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["model"], "gpt-4o");

    let (_, upstream_body) = captured.last();
    assert_eq!(upstream_body["systemInstruction"]["parts"][0]["text"], "Be terse.");
    assert_eq!(upstream_body["contents"][0]["role"], "user");
    assert_eq!(upstream_body["contents"][0]["parts"][0]["text"], "2+2?");
    assert_eq!(upstream_body["generationConfig"]["maxOutputTokens"], 5);
}

#[tokio::test]
async fn count_tokens_uses_local_estimator() {
    let proxy_address = spawn_proxy(
        vec![channel("unused", ApiFormat::Openai, "http://127.0.0.1:9".to_string())],
        Arc::new(CapturingLogger::default()),
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("http://{proxy_address}/v1/messages/count_tokens"))
        .json(&json!({
            "model": "claude-3-haiku",
            "messages": [{"role": "user", "content": "abcdefgh"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    // ceil(8/4) + 8 per message
    assert_eq!(body["input_tokens"], 10);
}

#[tokio::test]
async fn invalid_requests_are_rejected_in_caller_format() {
    let proxy_address = spawn_proxy(
        vec![channel("unused", ApiFormat::Openai, "http://127.0.0.1:9".to_string())],
        Arc::new(CapturingLogger::default()),
    )
    .await;

    let client = reqwest::Client::new();

    // Empty message list.
    let response = client
        .post(format!("http://{proxy_address}/v1/messages"))
        .json(&json!({"model": "m", "max_tokens": 10, "messages": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");

    // Zero max_tokens.
    let response = client
        .post(format!("http://{proxy_address}/v1/messages"))
        .json(&json!({"model": "m", "max_tokens": 0, "messages": [{"role": "user", "content": "x"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Undetectable unified body.
    let response = client
        .post(format!("http://{proxy_address}/api/v1/unified/chat"))
        .json(&json!({"foo": "bar"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request");
}

#[tokio::test]
async fn unified_endpoint_honors_source_format() {
    let upstream = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            Json(json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 1700000000,
                "model": "gpt-4o-mini",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "ok"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
            }))
        }),
    );

    let upstream_address = serve(upstream).await;

    let proxy_address = spawn_proxy(
        vec![channel(
            "openai-mock",
            ApiFormat::Openai,
            format!("http://{upstream_address}/v1"),
        )],
        Arc::new(CapturingLogger::default()),
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("http://{proxy_address}/api/v1/unified/completion"))
        .json(&json!({
            "source_format": "anthropic",
            "model": "claude-3-haiku",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "Hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    // Anthropic-shaped reply proves the declared format drove both sides.
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["content"][0]["text"], "ok");
}

#[tokio::test]
async fn upstream_failure_feeds_health_metrics() {
    let upstream = Router::new().route(
        "/v1/chat/completions",
        post(|| async { (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded") }),
    );

    let upstream_address = serve(upstream).await;

    let logger = Arc::new(CapturingLogger::default());
    let proxy_address = spawn_proxy(
        vec![channel(
            "openai-mock",
            ApiFormat::Openai,
            format!("http://{upstream_address}/v1"),
        )],
        logger.clone(),
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("http://{proxy_address}/v1/chat/completions"))
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "Hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "rate_limit");

    // The failure lands in the request log.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        {
            let entries = logger.entries.lock().unwrap();
            if let Some(entry) = entries.last() {
                assert_eq!(entry.outcome, RequestOutcome::Failed);
                assert_eq!(entry.channel_id.as_deref(), Some("openai-mock"));
                break;
            }
        }

        assert!(std::time::Instant::now() < deadline, "log entry never arrived");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn client_disconnect_cancels_stream() {
    // An upstream that sends two text deltas and then stalls forever.
    let upstream = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            let head = futures::stream::iter(vec![
                Ok::<_, std::convert::Infallible>(
                    "data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"He\"},\"finish_reason\":null}]}\n\n"
                        .to_string(),
                ),
                Ok(
                    "data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"llo\"},\"finish_reason\":null}]}\n\n"
                        .to_string(),
                ),
            ]);

            let body = Body::from_stream(head.chain(futures::stream::pending()));

            ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
        }),
    );

    let upstream_address = serve(upstream).await;

    let logger = Arc::new(CapturingLogger::default());
    let proxy_address = spawn_proxy(
        vec![channel(
            "openai-mock",
            ApiFormat::Openai,
            format!("http://{upstream_address}/v1"),
        )],
        logger.clone(),
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("http://{proxy_address}/v1/messages"))
        .json(&json!({
            "model": "claude-3-haiku",
            "max_tokens": 50,
            "stream": true,
            "messages": [{"role": "user", "content": "Hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    // Read the first events, then hang up.
    let mut stream = response.bytes_stream().eventsource();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.event, "message_start");
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.event, "content_block_start");

    drop(stream);

    // The pump notices the disconnect and records a cancelled request.
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    loop {
        {
            let entries = logger.entries.lock().unwrap();
            if let Some(entry) = entries.last() {
                assert_eq!(entry.outcome, RequestOutcome::Cancelled);
                assert!(entry.stream);
                break;
            }
        }

        assert!(std::time::Instant::now() < deadline, "cancellation never recorded");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
