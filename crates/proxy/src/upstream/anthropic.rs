//! Anthropic Messages upstream adapter.

use eventsource_stream::Eventsource;
use futures::StreamExt;
use http::header;
use reqwest::Client;
use secrecy::ExposeSecret;

use super::{EventStream, USER_AGENT, error_from_response};
use crate::{
    channel::Channel,
    endpoint::anthropic_messages_base,
    error::{ProxyError, ProxyResult},
    messages::anthropic,
    streaming::UpstreamEvent,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicUpstream {
    client: Client,
}

impl AnthropicUpstream {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn url(channel: &Channel) -> String {
        format!("{}/messages", anthropic_messages_base(&channel.base_url))
    }

    fn post(&self, channel: &Channel, body: Vec<u8>) -> reqwest::RequestBuilder {
        self.client
            .post(Self::url(channel))
            .header("x-api-key", channel.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, USER_AGENT)
            .body(body)
    }

    /// Non-streaming message creation.
    pub async fn chat(
        &self,
        channel: &Channel,
        mut request: anthropic::MessagesRequest,
    ) -> ProxyResult<anthropic::MessagesResponse> {
        request.stream = Some(false);

        let body = sonic_rs::to_vec(&request).map_err(|e| {
            log::error!("Failed to serialize Anthropic request: {e}");
            ProxyError::Internal(None)
        })?;

        let response = self
            .post(channel, body)
            .send()
            .await
            .map_err(|e| ProxyError::Upstream {
                status: 502,
                message: format!("Failed to send request to Anthropic upstream: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let text = response.text().await.map_err(|e| {
            log::error!("Failed to read Anthropic response body: {e}");
            ProxyError::Internal(None)
        })?;

        sonic_rs::from_str(&text).map_err(|e| {
            log::error!("Failed to parse Anthropic messages response: {e}");
            log::debug!("Response parsing failed, length: {} bytes", text.len());
            ProxyError::Internal(None)
        })
    }

    /// Streaming message creation; yields parsed named events.
    pub async fn chat_stream(
        &self,
        channel: &Channel,
        mut request: anthropic::MessagesRequest,
    ) -> ProxyResult<EventStream> {
        request.stream = Some(true);

        let body = sonic_rs::to_vec(&request).map_err(|e| {
            log::error!("Failed to serialize Anthropic streaming request: {e}");
            ProxyError::Internal(None)
        })?;

        let response = self
            .post(channel, body)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ProxyError::Upstream {
                status: 502,
                message: format!("Failed to send streaming request to Anthropic upstream: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let event_stream = response.bytes_stream().eventsource().filter_map(|event| async move {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("SSE parsing error in Anthropic stream: {e}");
                    return None;
                }
            };

            match sonic_rs::from_str::<anthropic::StreamEvent>(&event.data) {
                Ok(parsed) => Some(Ok(UpstreamEvent::Anthropic(parsed))),
                Err(e) => {
                    log::warn!("Failed to parse Anthropic streaming event: {e}");
                    None
                }
            }
        });

        Ok(Box::pin(event_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{channel::test_channel, format::ApiFormat};

    #[test]
    fn url_appends_version_segment_once() {
        let mut channel = test_channel("a", ApiFormat::Anthropic);
        channel.base_url = "https://api.anthropic.com".to_string();

        assert_eq!(
            AnthropicUpstream::url(&channel),
            "https://api.anthropic.com/v1/messages"
        );

        channel.base_url = "https://gateway.example.com/v1".to_string();
        assert_eq!(
            AnthropicUpstream::url(&channel),
            "https://gateway.example.com/v1/messages"
        );
    }
}
