//! OpenAI-compatible upstream adapter.

use eventsource_stream::Eventsource;
use futures::StreamExt;
use http::header;
use reqwest::Client;
use secrecy::ExposeSecret;

use super::{EventStream, USER_AGENT, error_from_response};
use crate::{
    channel::Channel,
    endpoint::normalize_base_url,
    error::{ProxyError, ProxyResult},
    messages::openai,
    streaming::UpstreamEvent,
};

pub struct OpenAiUpstream {
    client: Client,
}

impl OpenAiUpstream {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn url(channel: &Channel) -> String {
        format!("{}/chat/completions", normalize_base_url(&channel.base_url))
    }

    fn post(&self, channel: &Channel, body: Vec<u8>) -> reqwest::RequestBuilder {
        self.client
            .post(Self::url(channel))
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", channel.api_key.expose_secret()),
            )
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, USER_AGENT)
            .body(body)
    }

    /// Non-streaming chat completion.
    pub async fn chat(
        &self,
        channel: &Channel,
        mut request: openai::ChatCompletionRequest,
    ) -> ProxyResult<openai::ChatCompletionResponse> {
        request.stream = Some(false);

        let body = sonic_rs::to_vec(&request)
            .map_err(|e| ProxyError::InvalidRequest(format!("Failed to serialize request: {e}")))?;

        let response = self
            .post(channel, body)
            .send()
            .await
            .map_err(|e| ProxyError::Upstream {
                status: 502,
                message: format!("Failed to send request to OpenAI upstream: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let text = response.text().await.map_err(|e| {
            log::error!("Failed to read OpenAI response body: {e}");
            ProxyError::Internal(None)
        })?;

        sonic_rs::from_str(&text).map_err(|e| {
            log::error!("Failed to parse OpenAI chat completion response: {e}");
            log::debug!("Response parsing failed, length: {} bytes", text.len());
            ProxyError::Internal(None)
        })
    }

    /// Streaming chat completion; yields parsed chunks and a terminator.
    pub async fn chat_stream(
        &self,
        channel: &Channel,
        mut request: openai::ChatCompletionRequest,
    ) -> ProxyResult<EventStream> {
        request.stream = Some(true);

        let body = sonic_rs::to_vec(&request)
            .map_err(|e| ProxyError::InvalidRequest(format!("Failed to serialize request: {e}")))?;

        let response = self
            .post(channel, body)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ProxyError::Upstream {
                status: 502,
                message: format!("Failed to send streaming request to OpenAI upstream: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let event_stream = response.bytes_stream().eventsource().filter_map(|event| async move {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("SSE parsing error in OpenAI stream: {e}");
                    return None;
                }
            };

            if event.data == "[DONE]" {
                return Some(Ok(UpstreamEvent::Terminated));
            }

            match sonic_rs::from_str::<openai::ChatCompletionChunk>(&event.data) {
                Ok(chunk) => Some(Ok(UpstreamEvent::OpenAi(chunk))),
                Err(e) => {
                    log::warn!("Failed to parse OpenAI streaming chunk: {e}");
                    None
                }
            }
        });

        Ok(Box::pin(event_stream))
    }
}
