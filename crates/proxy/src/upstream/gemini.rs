//! Gemini GenerateContent upstream adapter.
//!
//! Streaming requests ask for `alt=sse`, but some Gemini-compatible proxies
//! ignore that and send the raw progressively-filled JSON array instead. The
//! reader accepts both framings: `data:` lines go through the SSE parser,
//! everything else through an incremental top-level-object splitter.

use eventsource_stream::Eventsource;
use futures::StreamExt;
use http::header;
use reqwest::Client;
use secrecy::ExposeSecret;

use super::{EventStream, USER_AGENT, error_from_response};
use crate::{
    channel::Channel,
    error::{ProxyError, ProxyResult},
    messages::gemini,
    streaming::UpstreamEvent,
};

pub struct GeminiUpstream {
    client: Client,
}

impl GeminiUpstream {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn base(channel: &Channel) -> &str {
        channel.base_url.strip_suffix('/').unwrap_or(&channel.base_url)
    }

    fn generate_url(channel: &Channel, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            Self::base(channel),
            model,
            channel.api_key.expose_secret()
        )
    }

    fn stream_url(channel: &Channel, model: &str) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            Self::base(channel),
            model,
            channel.api_key.expose_secret()
        )
    }

    /// Non-streaming content generation.
    pub async fn chat(
        &self,
        channel: &Channel,
        model: &str,
        request: &gemini::GenerateRequest,
    ) -> ProxyResult<gemini::GenerateResponse> {
        let body = sonic_rs::to_vec(request).map_err(|e| {
            log::error!("Failed to serialize Gemini request: {e}");
            ProxyError::Internal(None)
        })?;

        let response = self
            .client
            .post(Self::generate_url(channel, model))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, USER_AGENT)
            .body(body)
            .send()
            .await
            .map_err(|e| ProxyError::Upstream {
                status: 502,
                message: format!("Failed to send request to Gemini upstream: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let text = response.text().await.map_err(|e| {
            log::error!("Failed to read Gemini response body: {e}");
            ProxyError::Internal(None)
        })?;

        let parsed: gemini::GenerateResponse = sonic_rs::from_str(&text).map_err(|e| {
            log::error!("Failed to parse Gemini generate response: {e}");
            ProxyError::Internal(None)
        })?;

        if parsed.candidates.is_empty() {
            log::error!("Gemini upstream returned an empty candidates array");
            return Err(ProxyError::Internal(None));
        }

        Ok(parsed)
    }

    /// Streaming content generation; yields parsed chunks.
    pub async fn chat_stream(
        &self,
        channel: &Channel,
        model: &str,
        request: &gemini::GenerateRequest,
    ) -> ProxyResult<EventStream> {
        let body = sonic_rs::to_vec(request).map_err(|e| {
            log::error!("Failed to serialize Gemini streaming request: {e}");
            ProxyError::Internal(None)
        })?;

        let response = self
            .client
            .post(Self::stream_url(channel, model))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "text/event-stream")
            .header(header::USER_AGENT, USER_AGENT)
            .body(body)
            .send()
            .await
            .map_err(|e| ProxyError::Upstream {
                status: 502,
                message: format!("Failed to send streaming request to Gemini upstream: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let is_sse = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"));

        if is_sse {
            let event_stream = response.bytes_stream().eventsource().filter_map(|event| async move {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        log::warn!("SSE parsing error in Gemini stream: {e}");
                        return None;
                    }
                };

                parse_chunk(&event.data)
            });

            return Ok(Box::pin(event_stream));
        }

        // Raw JSON-array framing: split top-level objects out of the byte
        // stream as they complete.
        let byte_stream = response.bytes_stream();

        let chunk_stream = futures::stream::unfold(
            (Box::pin(byte_stream), JsonObjectSplitter::new(), Vec::new()),
            |(mut stream, mut splitter, mut queue): (_, _, Vec<String>)| async move {
                loop {
                    if let Some(data) = queue.pop() {
                        if let Some(event) = parse_chunk(&data) {
                            return Some((event, (stream, splitter, queue)));
                        }
                        continue;
                    }

                    let bytes = stream.next().await?;

                    match bytes {
                        Ok(bytes) => {
                            let mut objects = splitter.push(&bytes);
                            // pop() takes from the back; keep arrival order.
                            objects.reverse();
                            queue = objects;
                        }
                        Err(e) => {
                            log::warn!("Gemini stream read error: {e}");
                            return None;
                        }
                    }
                }
            },
        );

        Ok(Box::pin(chunk_stream))
    }
}

fn parse_chunk(data: &str) -> Option<ProxyResult<UpstreamEvent>> {
    match sonic_rs::from_str::<gemini::StreamChunk>(data) {
        Ok(chunk) => Some(Ok(UpstreamEvent::Gemini(chunk))),
        Err(e) => {
            log::warn!("Failed to parse Gemini streaming chunk: {e}");
            None
        }
    }
}

/// Incremental splitter extracting complete top-level JSON objects from a
/// byte stream, ignoring the array brackets and commas around them.
pub(crate) struct JsonObjectSplitter {
    buffer: Vec<u8>,
    depth: u32,
    in_string: bool,
    escaped: bool,
    object_start: Option<usize>,
    scan_position: usize,
}

impl JsonObjectSplitter {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Vec::new(),
            depth: 0,
            in_string: false,
            escaped: false,
            object_start: None,
            scan_position: 0,
        }
    }

    /// Feed bytes; returns every object completed by them, in order.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut complete = Vec::new();

        while self.scan_position < self.buffer.len() {
            let byte = self.buffer[self.scan_position];

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
            } else {
                match byte {
                    b'"' if self.depth > 0 => self.in_string = true,
                    b'{' => {
                        if self.depth == 0 {
                            self.object_start = Some(self.scan_position);
                        }
                        self.depth += 1;
                    }
                    b'}' => {
                        self.depth = self.depth.saturating_sub(1);

                        if self.depth == 0
                            && let Some(start) = self.object_start.take()
                        {
                            let object = &self.buffer[start..=self.scan_position];
                            complete.push(String::from_utf8_lossy(object).into_owned());
                        }
                    }
                    // Array brackets, commas, and whitespace between objects.
                    _ => {}
                }
            }

            self.scan_position += 1;
        }

        // Drop consumed bytes once no object spans them.
        if self.depth == 0 && self.object_start.is_none() {
            self.buffer.clear();
            self.scan_position = 0;
        }

        complete
    }
}
