//! Same-format streaming.
//!
//! Even a passthrough owes the caller a complete stream: upstream aborts are
//! patched with a synthesized terminal sequence, and usage is captured for
//! metrics on the way through.

use std::collections::BTreeSet;

use super::{OutboundEvent, StreamEnd, StreamSeed};
use crate::messages::{anthropic, gemini, openai};

pub struct AnthropicPassthrough {
    seed: StreamSeed,
    started: bool,
    finalized: bool,
    open_blocks: BTreeSet<u32>,
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicPassthrough {
    pub fn new(seed: StreamSeed) -> Self {
        Self {
            seed,
            started: false,
            finalized: false,
            open_blocks: BTreeSet::new(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn usage(&self) -> (u32, u32) {
        (self.input_tokens, self.output_tokens)
    }

    pub fn ping(&self) -> Option<OutboundEvent> {
        if self.finalized {
            return None;
        }

        Some(OutboundEvent::Anthropic(anthropic::StreamEvent::Ping))
    }

    pub fn on_upstream_event(&mut self, event: anthropic::StreamEvent) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        match &event {
            anthropic::StreamEvent::MessageStart { message } => {
                self.started = true;
                self.input_tokens = message.usage.input_tokens;
            }
            anthropic::StreamEvent::ContentBlockStart { index, .. } => {
                self.open_blocks.insert(*index);
            }
            anthropic::StreamEvent::ContentBlockStop { index } => {
                self.open_blocks.remove(index);
            }
            anthropic::StreamEvent::MessageDelta { usage, .. } => {
                self.output_tokens = usage.output_tokens;
                if usage.input_tokens > 0 {
                    self.input_tokens = usage.input_tokens;
                }
            }
            anthropic::StreamEvent::MessageStop => {
                self.finalized = true;
            }
            _ => {}
        }

        vec![OutboundEvent::Anthropic(event)]
    }

    /// Synthesize the terminal sequence the upstream never sent.
    fn complete(&mut self, stop_reason: anthropic::StopReason) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        self.finalized = true;

        let mut out = Vec::new();

        if !self.started {
            out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::MessageStart {
                message: anthropic::StreamMessageStart::new(self.seed.id.clone(), self.seed.model.clone()),
            }));
        }

        for index in std::mem::take(&mut self.open_blocks) {
            out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::ContentBlockStop {
                index,
            }));
        }

        out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::MessageDelta {
            delta: anthropic::MessageDeltaBody {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage: anthropic::Usage {
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
            },
        }));
        out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::MessageStop));

        out
    }

    pub fn finish(&mut self, end: StreamEnd) -> Vec<OutboundEvent> {
        let stop_reason = match end {
            StreamEnd::Clean => anthropic::StopReason::EndTurn,
            StreamEnd::Aborted => anthropic::StopReason::Error,
        };

        self.complete(stop_reason)
    }

    pub fn fail(&mut self, kind: &str, message: &str) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        let mut out = vec![OutboundEvent::Anthropic(anthropic::StreamEvent::Error {
            error: anthropic::ErrorBody {
                error_type: kind.to_string(),
                message: message.to_string(),
            },
        })];

        out.extend(self.complete(anthropic::StopReason::Error));

        out
    }
}

pub struct OpenAiPassthrough {
    seed: StreamSeed,
    created: u64,
    finalized: bool,
    saw_finish_reason: bool,
    input_tokens: u32,
    output_tokens: u32,
}

impl OpenAiPassthrough {
    pub fn new(seed: StreamSeed) -> Self {
        Self {
            seed,
            created: crate::convert::unix_timestamp(),
            finalized: false,
            saw_finish_reason: false,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn usage(&self) -> (u32, u32) {
        (self.input_tokens, self.output_tokens)
    }

    pub fn on_chunk(&mut self, chunk: openai::ChatCompletionChunk) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        if let Some(usage) = chunk.usage {
            self.input_tokens = usage.prompt_tokens;
            self.output_tokens = usage.completion_tokens;
        }

        if chunk.choices.iter().any(|choice| choice.finish_reason.is_some()) {
            self.saw_finish_reason = true;
        }

        vec![OutboundEvent::OpenAi(chunk)]
    }

    pub fn finish(&mut self, end: StreamEnd) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        self.finalized = true;

        let mut out = Vec::new();

        if !self.saw_finish_reason {
            let reason = match end {
                StreamEnd::Clean => openai::FinishReason::Stop,
                StreamEnd::Aborted => openai::FinishReason::Other("error".to_string()),
            };

            let mut chunk = openai::ChatCompletionChunk::of_delta(
                &self.seed.id,
                &self.seed.model,
                self.created,
                openai::MessageDelta::default(),
            );
            chunk.choices[0].finish_reason = Some(reason);
            chunk.usage = Some(openai::Usage::new(self.input_tokens, self.output_tokens));

            out.push(OutboundEvent::OpenAi(chunk));
        }

        out.push(OutboundEvent::OpenAiDone);

        out
    }

    pub fn fail(&mut self, kind: &str, message: &str) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        self.finalized = true;

        vec![
            OutboundEvent::OpenAiError {
                message: message.to_string(),
                kind: kind.to_string(),
            },
            OutboundEvent::OpenAiDone,
        ]
    }
}

pub struct GeminiPassthrough {
    finalized: bool,
    saw_finish_reason: bool,
    input_tokens: u32,
    output_tokens: u32,
}

impl GeminiPassthrough {
    pub fn new(_seed: StreamSeed) -> Self {
        Self {
            finalized: false,
            saw_finish_reason: false,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn usage(&self) -> (u32, u32) {
        (self.input_tokens, self.output_tokens)
    }

    pub fn on_chunk(&mut self, chunk: gemini::StreamChunk) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        if let Some(usage) = chunk.usage_metadata {
            self.input_tokens = usage.prompt_token_count;
            self.output_tokens = usage.candidates_token_count;
        }

        if chunk
            .candidates
            .iter()
            .any(|candidate| candidate.finish_reason.is_some())
        {
            self.saw_finish_reason = true;
        }

        vec![OutboundEvent::Gemini(chunk)]
    }

    pub fn finish(&mut self, end: StreamEnd) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        self.finalized = true;

        if self.saw_finish_reason {
            return Vec::new();
        }

        let reason = match end {
            StreamEnd::Clean => gemini::FinishReason::Stop,
            StreamEnd::Aborted => gemini::FinishReason::Other("OTHER".to_string()),
        };

        vec![OutboundEvent::Gemini(gemini::StreamChunk {
            candidates: vec![gemini::Candidate {
                content: None,
                finish_reason: Some(reason),
                index: Some(0),
            }],
            usage_metadata: Some(gemini::UsageMetadata {
                prompt_token_count: self.input_tokens,
                candidates_token_count: self.output_tokens,
                total_token_count: self.input_tokens + self.output_tokens,
            }),
        })]
    }

    pub fn fail(&mut self, _kind: &str, message: &str) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        self.finalized = true;

        vec![OutboundEvent::Gemini(gemini::StreamChunk {
            candidates: vec![gemini::Candidate {
                content: Some(gemini::Content {
                    role: Some(gemini::GeminiRole::Model),
                    parts: vec![gemini::Part::text(format!("[stream error: {message}]"))],
                }),
                finish_reason: Some(gemini::FinishReason::Other("OTHER".to_string())),
                index: Some(0),
            }],
            usage_metadata: None,
        })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seed() -> StreamSeed {
        StreamSeed {
            id: "msg_test".to_string(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            wants_thinking: false,
        }
    }

    #[test]
    fn upstream_abort_after_message_start_is_patched() {
        let mut translator = AnthropicPassthrough::new(seed());

        translator.on_upstream_event(
            serde_json::from_value(json!({
                "type": "message_start",
                "message": {
                    "id": "msg_1", "type": "message", "role": "assistant", "content": [],
                    "model": "m", "usage": {"input_tokens": 4, "output_tokens": 0}
                }
            }))
            .unwrap(),
        );

        let events = translator.finish(StreamEnd::Aborted);

        let names: Vec<_> = events
            .iter()
            .map(|event| match event {
                OutboundEvent::Anthropic(event) => event.name(),
                other => unreachable!("unexpected event: {other:?}"),
            })
            .collect();

        assert_eq!(names, ["message_delta", "message_stop"]);

        let OutboundEvent::Anthropic(anthropic::StreamEvent::MessageDelta { delta, usage }) = &events[0] else {
            unreachable!("expected message_delta");
        };
        assert_eq!(delta.stop_reason, Some(anthropic::StopReason::Error));
        assert_eq!(usage.input_tokens, 4);
    }

    #[test]
    fn abort_with_open_block_closes_it_first() {
        let mut translator = AnthropicPassthrough::new(seed());

        for event in [
            json!({
                "type": "message_start",
                "message": {
                    "id": "msg_1", "type": "message", "role": "assistant", "content": [],
                    "model": "m", "usage": {"input_tokens": 4, "output_tokens": 0}
                }
            }),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "He"}}),
        ] {
            translator.on_upstream_event(serde_json::from_value(event).unwrap());
        }

        let events = translator.finish(StreamEnd::Aborted);

        assert!(matches!(
            events[0],
            OutboundEvent::Anthropic(anthropic::StreamEvent::ContentBlockStop { index: 0 })
        ));
    }

    #[test]
    fn clean_upstream_needs_no_patching() {
        let mut translator = AnthropicPassthrough::new(seed());

        for event in [
            json!({
                "type": "message_start",
                "message": {
                    "id": "msg_1", "type": "message", "role": "assistant", "content": [],
                    "model": "m", "usage": {"input_tokens": 4, "output_tokens": 0}
                }
            }),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 2}}),
            json!({"type": "message_stop"}),
        ] {
            translator.on_upstream_event(serde_json::from_value(event).unwrap());
        }

        assert!(translator.finish(StreamEnd::Clean).is_empty());
        assert_eq!(translator.usage(), (4, 2));
    }

    #[test]
    fn openai_passthrough_appends_done() {
        let mut translator = OpenAiPassthrough::new(seed());

        translator.on_chunk(
            serde_json::from_value(json!({
                "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"content": "Hi"}, "finish_reason": "stop"}]
            }))
            .unwrap(),
        );

        let events = translator.finish(StreamEnd::Clean);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], OutboundEvent::OpenAiDone));
    }

    #[test]
    fn openai_passthrough_synthesizes_finish_on_abort() {
        let mut translator = OpenAiPassthrough::new(seed());

        translator.on_chunk(
            serde_json::from_value(json!({
                "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"content": "Hi"}, "finish_reason": null}]
            }))
            .unwrap(),
        );

        let events = translator.finish(StreamEnd::Aborted);

        let OutboundEvent::OpenAi(chunk) = &events[0] else {
            unreachable!("expected chunk");
        };
        assert_eq!(
            chunk.choices[0].finish_reason,
            Some(openai::FinishReason::Other("error".to_string()))
        );
        assert!(matches!(events[1], OutboundEvent::OpenAiDone));
    }
}
