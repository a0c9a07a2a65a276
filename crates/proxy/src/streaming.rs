//! Streaming translation between upstream and caller grammars.
//!
//! Each direction is a small state machine consuming upstream events and
//! emitting events in the caller's grammar. The contracts every translator
//! upholds, whatever the upstream does:
//!
//! - the caller grammar's framing events come first and last
//!   (`message_start`/`message_stop`, terminal `[DONE]`);
//! - at most one content block is open at any time, and every opened block is
//!   closed;
//! - concatenating deltas reproduces the upstream text and tool arguments;
//! - an upstream abort still produces a grammatically complete stream, with
//!   the stop reason marked as an error.

mod anthropic_to_openai;
mod from_gemini;
mod openai_to_anthropic;
mod passthrough;
mod to_gemini;

use axum::response::sse::Event;

pub use anthropic_to_openai::AnthropicToOpenAi;
pub use from_gemini::{GeminiToAnthropic, GeminiToOpenAi};
pub use openai_to_anthropic::OpenAiToAnthropic;
pub use passthrough::{AnthropicPassthrough, GeminiPassthrough, OpenAiPassthrough};
pub use to_gemini::{AnthropicToGemini, OpenAiToGemini};

use crate::{
    format::ApiFormat,
    messages::{anthropic, gemini, openai},
};

/// One parsed event read from an upstream stream.
#[derive(Debug)]
pub enum UpstreamEvent {
    /// An OpenAI-compatible chunk.
    OpenAi(openai::ChatCompletionChunk),
    /// An Anthropic SSE event.
    Anthropic(anthropic::StreamEvent),
    /// A Gemini stream chunk.
    Gemini(gemini::StreamChunk),
    /// The upstream announced a clean end of stream (`[DONE]`).
    Terminated,
}

/// One event to write to the caller, knowing its SSE framing rules.
#[derive(Debug)]
pub enum OutboundEvent {
    /// A named Anthropic event: `event: <name>\ndata: <json>\n\n`.
    Anthropic(anthropic::StreamEvent),
    /// A bare OpenAI data frame.
    OpenAi(openai::ChatCompletionChunk),
    /// An in-stream OpenAI error frame.
    OpenAiError {
        /// Caller-visible message.
        message: String,
        /// Taxonomy name for the error type field.
        kind: String,
    },
    /// The literal `data: [DONE]` terminator.
    OpenAiDone,
    /// A comment-framed keepalive: `: ping`.
    PingComment,
    /// A bare Gemini data frame.
    Gemini(gemini::StreamChunk),
}

impl OutboundEvent {
    /// Render the event with its format's SSE framing.
    pub fn into_sse_event(self) -> Event {
        match self {
            OutboundEvent::Anthropic(event) => {
                let name = event.name();
                let json = sonic_rs::to_string(&event).unwrap_or_else(|e| {
                    log::error!("Failed to serialize Anthropic streaming event: {e}");
                    r#"{"type":"error","error":{"type":"api_error","message":"serialization failed"}}"#.to_string()
                });

                Event::default().event(name).data(json)
            }
            OutboundEvent::OpenAi(chunk) => {
                let json = sonic_rs::to_string(&chunk).unwrap_or_else(|e| {
                    log::error!("Failed to serialize chunk: {e}");
                    r#"{"error":"serialization failed"}"#.to_string()
                });

                Event::default().data(json)
            }
            OutboundEvent::OpenAiError { message, kind } => {
                let json = serde_json::json!({
                    "error": { "message": message, "type": kind }
                });

                Event::default().data(json.to_string())
            }
            OutboundEvent::OpenAiDone => Event::default().data("[DONE]"),
            OutboundEvent::PingComment => Event::default().comment("ping"),
            OutboundEvent::Gemini(chunk) => {
                let json = sonic_rs::to_string(&chunk).unwrap_or_else(|e| {
                    log::error!("Failed to serialize Gemini streaming chunk: {e}");
                    "{}".to_string()
                });

                Event::default().data(json)
            }
        }
    }
}

/// Seed values a translator needs before the first upstream event arrives.
#[derive(Debug, Clone)]
pub struct StreamSeed {
    /// Message/completion id presented to the caller.
    pub id: String,

    /// The model name the caller asked for.
    pub model: String,

    /// Whether the caller requested thinking blocks.
    pub wants_thinking: bool,
}

/// How the upstream stream ended when no terminal event was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The upstream signalled completion; synthesize a natural stop.
    Clean,
    /// The socket closed mid-stream; synthesize an error stop.
    Aborted,
}

/// A running translation for one (upstream, caller) direction.
pub enum Translator {
    OpenAiToAnthropic(OpenAiToAnthropic),
    AnthropicToOpenAi(AnthropicToOpenAi),
    GeminiToAnthropic(GeminiToAnthropic),
    GeminiToOpenAi(GeminiToOpenAi),
    OpenAiToGemini(OpenAiToGemini),
    AnthropicToGemini(AnthropicToGemini),
    AnthropicPassthrough(AnthropicPassthrough),
    OpenAiPassthrough(OpenAiPassthrough),
    GeminiPassthrough(GeminiPassthrough),
}

impl Translator {
    /// Build the translator for an upstream format feeding a caller format.
    pub fn new(upstream: ApiFormat, caller: ApiFormat, seed: StreamSeed) -> Self {
        match (upstream, caller) {
            (ApiFormat::Openai, ApiFormat::Anthropic) => {
                Translator::OpenAiToAnthropic(OpenAiToAnthropic::new(seed))
            }
            (ApiFormat::Anthropic, ApiFormat::Openai) => {
                Translator::AnthropicToOpenAi(AnthropicToOpenAi::new(seed))
            }
            (ApiFormat::Gemini, ApiFormat::Anthropic) => {
                Translator::GeminiToAnthropic(GeminiToAnthropic::new(seed))
            }
            (ApiFormat::Gemini, ApiFormat::Openai) => Translator::GeminiToOpenAi(GeminiToOpenAi::new(seed)),
            (ApiFormat::Openai, ApiFormat::Gemini) => Translator::OpenAiToGemini(OpenAiToGemini::new(seed)),
            (ApiFormat::Anthropic, ApiFormat::Gemini) => {
                Translator::AnthropicToGemini(AnthropicToGemini::new(seed))
            }
            (ApiFormat::Anthropic, ApiFormat::Anthropic) => {
                Translator::AnthropicPassthrough(AnthropicPassthrough::new(seed))
            }
            (ApiFormat::Openai, ApiFormat::Openai) => {
                Translator::OpenAiPassthrough(OpenAiPassthrough::new(seed))
            }
            (ApiFormat::Gemini, ApiFormat::Gemini) => {
                Translator::GeminiPassthrough(GeminiPassthrough::new(seed))
            }
        }
    }

    /// Translate one upstream event into zero or more caller events.
    pub fn on_event(&mut self, event: UpstreamEvent) -> Vec<OutboundEvent> {
        match (self, event) {
            (Translator::OpenAiToAnthropic(t), UpstreamEvent::OpenAi(chunk)) => t.on_chunk(chunk),
            (Translator::OpenAiToAnthropic(t), UpstreamEvent::Terminated) => t.finish(StreamEnd::Clean),
            (Translator::AnthropicToOpenAi(t), UpstreamEvent::Anthropic(event)) => t.on_upstream_event(event),
            (Translator::AnthropicToOpenAi(t), UpstreamEvent::Terminated) => t.finish(StreamEnd::Clean),
            (Translator::GeminiToAnthropic(t), UpstreamEvent::Gemini(chunk)) => t.on_chunk(chunk),
            (Translator::GeminiToAnthropic(t), UpstreamEvent::Terminated) => t.finish(StreamEnd::Clean),
            (Translator::GeminiToOpenAi(t), UpstreamEvent::Gemini(chunk)) => t.on_chunk(chunk),
            (Translator::GeminiToOpenAi(t), UpstreamEvent::Terminated) => t.finish(StreamEnd::Clean),
            (Translator::OpenAiToGemini(t), UpstreamEvent::OpenAi(chunk)) => t.on_chunk(chunk),
            (Translator::OpenAiToGemini(t), UpstreamEvent::Terminated) => t.finish(StreamEnd::Clean),
            (Translator::AnthropicToGemini(t), UpstreamEvent::Anthropic(event)) => t.on_upstream_event(event),
            (Translator::AnthropicToGemini(t), UpstreamEvent::Terminated) => t.finish(StreamEnd::Clean),
            (Translator::AnthropicPassthrough(t), UpstreamEvent::Anthropic(event)) => t.on_upstream_event(event),
            (Translator::AnthropicPassthrough(t), UpstreamEvent::Terminated) => t.finish(StreamEnd::Clean),
            (Translator::OpenAiPassthrough(t), UpstreamEvent::OpenAi(chunk)) => t.on_chunk(chunk),
            (Translator::OpenAiPassthrough(t), UpstreamEvent::Terminated) => t.finish(StreamEnd::Clean),
            (Translator::GeminiPassthrough(t), UpstreamEvent::Gemini(chunk)) => t.on_chunk(chunk),
            (Translator::GeminiPassthrough(t), UpstreamEvent::Terminated) => t.finish(StreamEnd::Clean),
            (_, event) => {
                log::warn!("Dropping upstream event of mismatched format: {event:?}");
                Vec::new()
            }
        }
    }

    /// The upstream stream ended; complete the caller stream if necessary.
    pub fn finish(&mut self, end: StreamEnd) -> Vec<OutboundEvent> {
        match self {
            Translator::OpenAiToAnthropic(t) => t.finish(end),
            Translator::AnthropicToOpenAi(t) => t.finish(end),
            Translator::GeminiToAnthropic(t) => t.finish(end),
            Translator::GeminiToOpenAi(t) => t.finish(end),
            Translator::OpenAiToGemini(t) => t.finish(end),
            Translator::AnthropicToGemini(t) => t.finish(end),
            Translator::AnthropicPassthrough(t) => t.finish(end),
            Translator::OpenAiPassthrough(t) => t.finish(end),
            Translator::GeminiPassthrough(t) => t.finish(end),
        }
    }

    /// Surface an error in the caller's grammar and terminate the stream.
    pub fn fail(&mut self, kind: &str, message: &str) -> Vec<OutboundEvent> {
        match self {
            Translator::OpenAiToAnthropic(t) => t.fail(kind, message),
            Translator::AnthropicToOpenAi(t) => t.fail(kind, message),
            Translator::GeminiToAnthropic(t) => t.fail(kind, message),
            Translator::GeminiToOpenAi(t) => t.fail(kind, message),
            Translator::OpenAiToGemini(t) => t.fail(kind, message),
            Translator::AnthropicToGemini(t) => t.fail(kind, message),
            Translator::AnthropicPassthrough(t) => t.fail(kind, message),
            Translator::OpenAiPassthrough(t) => t.fail(kind, message),
            Translator::GeminiPassthrough(t) => t.fail(kind, message),
        }
    }

    /// A liveness ping in the caller's grammar, or `None` when a ping is not
    /// allowed right now (between a block start and its first delta).
    pub fn ping(&self) -> Option<OutboundEvent> {
        match self {
            Translator::OpenAiToAnthropic(t) => t.ping(),
            Translator::GeminiToAnthropic(t) => t.ping(),
            Translator::AnthropicPassthrough(t) => t.ping(),
            Translator::AnthropicToOpenAi(_)
            | Translator::GeminiToOpenAi(_)
            | Translator::OpenAiPassthrough(_)
            | Translator::OpenAiToGemini(_)
            | Translator::AnthropicToGemini(_)
            | Translator::GeminiPassthrough(_) => Some(OutboundEvent::PingComment),
        }
    }

    /// Token totals observed in upstream usage data, `(input, output)`.
    pub fn usage(&self) -> (u32, u32) {
        match self {
            Translator::OpenAiToAnthropic(t) => t.usage(),
            Translator::AnthropicToOpenAi(t) => t.usage(),
            Translator::GeminiToAnthropic(t) => t.usage(),
            Translator::GeminiToOpenAi(t) => t.usage(),
            Translator::OpenAiToGemini(t) => t.usage(),
            Translator::AnthropicToGemini(t) => t.usage(),
            Translator::AnthropicPassthrough(t) => t.usage(),
            Translator::OpenAiPassthrough(t) => t.usage(),
            Translator::GeminiPassthrough(t) => t.usage(),
        }
    }
}
