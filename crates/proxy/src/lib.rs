//! ccproxy core: protocol translation and streaming dispatch.
//!
//! Accepts requests in one vendor's wire format and serves them through
//! whichever upstream channel is healthiest, translating request bodies,
//! buffered replies, and SSE streams between formats on the fly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::{get, post},
};
use axum_serde::Sonic;
use serde_json::Value;
use tokio::sync::mpsc;

pub mod channel;
pub mod convert;
pub mod detect;
pub mod dispatch;
pub mod endpoint;
mod error;
pub mod format;
pub mod logging;
pub mod messages;
pub mod route;
pub mod streaming;
pub mod upstream;
mod validate;

pub use error::{AnthropicErrorResponse, AnthropicResult, GeminiErrorResponse, ProxyError, ProxyResult as Result};

use crate::{
    channel::{ChannelManager, ChannelStore},
    dispatch::{DispatchReply, Dispatcher, ProxyRequest, ProxyResponse},
    format::ApiFormat,
    logging::RequestLogger,
    messages::{anthropic, gemini, openai},
};

/// Build the axum router for the proxy endpoints.
///
/// Returns the dispatcher too so the binary can wire shutdown.
pub async fn router(
    config: Arc<dyn config::ConfigProvider>,
    store: Arc<dyn ChannelStore>,
    logger: Arc<dyn RequestLogger>,
    transport: reqwest::Client,
) -> Result<(Router, Arc<Dispatcher>)> {
    let channels = Arc::new(ChannelManager::new(store).await?);
    let dispatcher = Arc::new(Dispatcher::new(config, channels, logger, transport));

    let router = Router::new()
        .route("/v1/messages", post(anthropic_messages))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/api/v1/unified/{mode}", post(unified))
        .with_state(dispatcher.clone());

    Ok((router, dispatcher))
}

fn extract_credential(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION)
        && let Ok(value) = value.to_str()
        && let Some(token) = value.strip_prefix("Bearer ")
    {
        return Some(token.to_string());
    }

    headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn json_response(response: ProxyResponse) -> Response {
    match response {
        ProxyResponse::Anthropic(reply) => Json(reply).into_response(),
        ProxyResponse::OpenAi(reply) => Json(reply).into_response(),
        ProxyResponse::Gemini(reply) => Json(reply).into_response(),
    }
}

fn sse_response(rx: mpsc::Receiver<Event>) -> Response {
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, Infallible>(event), rx))
    });

    let mut response = Sse::new(stream).into_response();

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, header::HeaderValue::from_static("keep-alive"));
    // Tell intermediary proxies not to buffer the event stream.
    headers.insert("x-accel-buffering", header::HeaderValue::from_static("no"));

    response
}

fn reply_to_response(reply: DispatchReply) -> Response {
    match reply {
        DispatchReply::Json(response) => json_response(response),
        DispatchReply::Stream(rx) => sse_response(rx),
    }
}

/// Handle Anthropic messages requests.
///
/// Supports both streaming and non-streaming responses. With `stream: true`
/// the response is sent as Server-Sent Events with named event frames.
async fn anthropic_messages(
    State(dispatcher): State<Arc<Dispatcher>>,
    headers: HeaderMap,
    Sonic(request): Sonic<anthropic::MessagesRequest>,
) -> AnthropicResult<Response> {
    log::debug!(
        "Anthropic messages handler called for model {} with {} messages",
        request.model,
        request.messages.len()
    );

    let credential = extract_credential(&headers);

    let reply = dispatcher
        .dispatch(ProxyRequest::Anthropic(request), credential)
        .await
        .map_err(AnthropicErrorResponse::from)?;

    Ok(reply_to_response(reply))
}

/// Handle token counting without touching any upstream.
async fn count_tokens(
    Sonic(request): Sonic<anthropic::CountTokensRequest>,
) -> AnthropicResult<Json<anthropic::CountTokensResponse>> {
    let request = request.into_messages_request();
    let input_tokens = route::estimate_tokens(&request);

    Ok(Json(anthropic::CountTokensResponse { input_tokens }))
}

/// Handle OpenAI chat completion requests.
///
/// Supports both streaming and non-streaming responses. With `stream: true`
/// the response is sent as bare `data:` frames terminated by `[DONE]`.
async fn chat_completions(
    State(dispatcher): State<Arc<Dispatcher>>,
    headers: HeaderMap,
    Sonic(request): Sonic<openai::ChatCompletionRequest>,
) -> Result<Response> {
    log::debug!(
        "OpenAI chat completions handler called for model {} with {} messages",
        request.model,
        request.messages.len()
    );

    let credential = extract_credential(&headers);

    let reply = dispatcher.dispatch(ProxyRequest::OpenAi(request), credential).await?;

    Ok(reply_to_response(reply))
}

/// List the models reachable through this proxy.
///
/// Callers presenting Anthropic headers get the Anthropic listing shape;
/// everyone else gets the OpenAI shape.
async fn list_models(State(dispatcher): State<Arc<Dispatcher>>, headers: HeaderMap) -> Response {
    use config::ConfigProviderExt;
    use itertools::Itertools;

    let mut ids: Vec<(String, ApiFormat)> = Vec::new();

    let config = dispatcher.config();
    ids.push((config.big_model(), ApiFormat::Openai));
    ids.push((config.small_model(), ApiFormat::Openai));

    for channel in dispatcher.channels().snapshot() {
        if !channel.enabled {
            continue;
        }

        for alias in channel.models_mapping.keys() {
            ids.push((alias.clone(), channel.provider));
        }
    }

    let ids: Vec<(String, ApiFormat)> = ids
        .into_iter()
        .sorted_by(|a, b| a.0.cmp(&b.0))
        .unique_by(|(id, _)| id.clone())
        .collect();

    let anthropic_caller = headers.contains_key("anthropic-version") || headers.contains_key("x-api-key");

    if anthropic_caller {
        let data = ids
            .into_iter()
            .map(|(id, _)| anthropic::Model {
                display_name: id.clone(),
                id,
                model_type: "model".to_string(),
                created_at: 0,
            })
            .collect();

        return Json(anthropic::ModelsResponse { data, has_more: false }).into_response();
    }

    let data = ids
        .into_iter()
        .map(|(id, provider)| openai::Model {
            id,
            object: "model".to_string(),
            created: 0,
            owned_by: provider.to_string(),
        })
        .collect();

    Json(openai::ModelsResponse {
        object: "list".to_string(),
        data,
    })
    .into_response()
}

/// Handle explicit-format requests.
///
/// The body's `source_format` field wins; otherwise the detector runs and an
/// unclassifiable body is rejected. The path segment picks the reply mode:
/// `chat` honors the body's stream flag, `completion` buffers, `stream`
/// streams.
async fn unified(
    State(dispatcher): State<Arc<Dispatcher>>,
    Path(mode): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let value: Value = match sonic_rs::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return ProxyError::InvalidRequest(format!("request body is not valid JSON: {e}")).into_response();
        }
    };

    let stream_override = match mode.as_str() {
        "chat" => None,
        "completion" => Some(false),
        "stream" => Some(true),
        other => {
            return ProxyError::NotFound(format!("unknown unified mode '{other}'")).into_response();
        }
    };

    let declared = value
        .get("source_format")
        .and_then(Value::as_str)
        .and_then(ApiFormat::parse);

    let format = match declared {
        Some(format) => format,
        None => {
            let detection = detect::detect("/api/v1/unified", &headers, &value);

            match detection.format {
                Some(format) => {
                    log::debug!(
                        "unified request detected as {format} (confidence {:.2}): {:?}",
                        detection.confidence,
                        detection.reasons
                    );
                    format
                }
                None => {
                    return ProxyError::InvalidRequest(
                        "unable to determine the request format; pass source_format".to_string(),
                    )
                    .into_response();
                }
            }
        }
    };

    let request = match build_unified_request(format, value, stream_override) {
        Ok(request) => request,
        Err(error) => return error_in_format(format, error),
    };

    let credential = extract_credential(&headers);

    match dispatcher.dispatch(request, credential).await {
        Ok(reply) => reply_to_response(reply),
        Err(error) => error_in_format(format, error),
    }
}

fn build_unified_request(
    format: ApiFormat,
    mut value: Value,
    stream_override: Option<bool>,
) -> Result<ProxyRequest> {
    // Foreign to every wire format; remove before typed parsing.
    if let Some(object) = value.as_object_mut() {
        object.remove("source_format");
    }

    let invalid = |e: serde_json::Error| ProxyError::InvalidRequest(format!("malformed {format} request: {e}"));

    Ok(match format {
        ApiFormat::Anthropic => {
            let mut request: anthropic::MessagesRequest = serde_json::from_value(value).map_err(invalid)?;

            if let Some(stream) = stream_override {
                request.stream = Some(stream);
            }

            ProxyRequest::Anthropic(request)
        }
        ApiFormat::Openai => {
            let mut request: openai::ChatCompletionRequest = serde_json::from_value(value).map_err(invalid)?;

            if let Some(stream) = stream_override {
                request.stream = Some(stream);
            }

            ProxyRequest::OpenAi(request)
        }
        ApiFormat::Gemini => {
            let model = value
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let stream = stream_override
                .or_else(|| value.get("stream").and_then(Value::as_bool))
                .unwrap_or(false);

            if let Some(object) = value.as_object_mut() {
                object.remove("model");
                object.remove("stream");
            }

            let request: gemini::GenerateRequest = serde_json::from_value(value).map_err(invalid)?;

            ProxyRequest::Gemini { model, stream, request }
        }
    })
}

fn error_in_format(format: ApiFormat, error: ProxyError) -> Response {
    match format {
        ApiFormat::Anthropic => AnthropicErrorResponse::from(error).into_response(),
        ApiFormat::Openai => error.into_response(),
        ApiFormat::Gemini => GeminiErrorResponse::from(error).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn credential_extraction_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer sk-custom".parse().unwrap());
        headers.insert("x-api-key", "other-key".parse().unwrap());

        assert_eq!(extract_credential(&headers).as_deref(), Some("sk-custom"));

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "only-key".parse().unwrap());
        assert_eq!(extract_credential(&headers).as_deref(), Some("only-key"));

        assert_eq!(extract_credential(&HeaderMap::new()), None);
    }

    #[test]
    fn unified_body_builds_typed_requests() {
        let request = build_unified_request(
            ApiFormat::Anthropic,
            json!({
                "source_format": "anthropic",
                "model": "claude-3-haiku-20240307",
                "max_tokens": 10,
                "messages": [{"role": "user", "content": "Hi"}]
            }),
            Some(true),
        )
        .unwrap();

        let ProxyRequest::Anthropic(request) = request else {
            unreachable!("expected Anthropic request");
        };
        assert_eq!(request.stream, Some(true));

        let request = build_unified_request(
            ApiFormat::Gemini,
            json!({
                "model": "gemini-2.0-flash",
                "contents": [{"role": "user", "parts": [{"text": "Hi"}]}]
            }),
            None,
        )
        .unwrap();

        let ProxyRequest::Gemini { model, stream, .. } = request else {
            unreachable!("expected Gemini request");
        };
        assert_eq!(model, "gemini-2.0-flash");
        assert!(!stream);
    }

    #[test]
    fn unified_rejects_malformed_bodies() {
        let error = build_unified_request(ApiFormat::Openai, json!({"model": 42}), None).unwrap_err();
        assert!(matches!(error, ProxyError::InvalidRequest(_)));
    }
}
