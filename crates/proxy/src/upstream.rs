//! Thin HTTP adapters for the three upstream protocols.
//!
//! Each adapter assembles its provider's URL and auth headers, sends the
//! already-converted body, and returns either a parsed reply or a stream of
//! parsed events. HTTP-level failures surface as typed [`ProxyError`]s before
//! the first event.

pub mod anthropic;
pub mod gemini;
pub mod http_client;
pub mod openai;

use std::pin::Pin;

use futures::Stream;

pub use anthropic::AnthropicUpstream;
pub use gemini::GeminiUpstream;
pub use http_client::build_transport;
pub use openai::OpenAiUpstream;

use crate::{error::ProxyResult, streaming::UpstreamEvent};

/// Stream of parsed upstream events.
pub type EventStream = Pin<Box<dyn Stream<Item = ProxyResult<UpstreamEvent>> + Send>>;

pub(crate) const USER_AGENT: &str = concat!("ccproxy/", env!("CARGO_PKG_VERSION"));

/// Read the body of a non-2xx reply and classify it.
pub(crate) async fn error_from_response(response: reqwest::Response) -> crate::error::ProxyError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());

    log::error!("Upstream API error ({status}): {body}");

    crate::error::ProxyError::from_upstream(status, body)
}
