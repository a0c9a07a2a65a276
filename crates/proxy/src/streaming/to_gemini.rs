//! OpenAI or Anthropic upstream → Gemini caller.
//!
//! The Gemini stream grammar is a sequence of whole JSON chunks, so tool
//! arguments must be fully reassembled before a `functionCall` part can be
//! emitted. Text flows through immediately.

use std::collections::HashMap;

use serde_json::json;

use super::{OutboundEvent, StreamEnd, StreamSeed};
use crate::{
    convert::response::{anthropic_stop_to_gemini, openai_finish_to_gemini},
    messages::{anthropic, gemini, openai},
};

fn part_chunk(part: gemini::Part) -> gemini::StreamChunk {
    gemini::StreamChunk {
        candidates: vec![gemini::Candidate {
            content: Some(gemini::Content {
                role: Some(gemini::GeminiRole::Model),
                parts: vec![part],
            }),
            finish_reason: None,
            index: Some(0),
        }],
        usage_metadata: None,
    }
}

fn final_chunk(
    parts: Vec<gemini::Part>,
    reason: gemini::FinishReason,
    input_tokens: u32,
    output_tokens: u32,
) -> gemini::StreamChunk {
    gemini::StreamChunk {
        candidates: vec![gemini::Candidate {
            content: (!parts.is_empty()).then(|| gemini::Content {
                role: Some(gemini::GeminiRole::Model),
                parts,
            }),
            finish_reason: Some(reason),
            index: Some(0),
        }],
        usage_metadata: Some(gemini::UsageMetadata {
            prompt_token_count: input_tokens,
            candidates_token_count: output_tokens,
            total_token_count: input_tokens + output_tokens,
        }),
    }
}

#[derive(Default)]
struct PendingCall {
    name: String,
    arguments: String,
}

impl PendingCall {
    fn into_part(self) -> gemini::Part {
        let args = if self.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&self.arguments).unwrap_or_else(|_| json!({}))
        };

        gemini::Part::function_call(self.name, args)
    }
}

pub struct OpenAiToGemini {
    finalized: bool,
    /// Upstream tool-call index → accumulating call.
    pending: HashMap<u32, PendingCall>,
    order: Vec<u32>,
    finish_reason: Option<gemini::FinishReason>,
    input_tokens: u32,
    output_tokens: u32,
}

impl OpenAiToGemini {
    pub fn new(_seed: StreamSeed) -> Self {
        Self {
            finalized: false,
            pending: HashMap::new(),
            order: Vec::new(),
            finish_reason: None,
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

        let mut out = Vec::new();

        if let Some(usage) = chunk.usage {
            self.input_tokens = usage.prompt_tokens;
            self.output_tokens = usage.completion_tokens;
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return out;
        };

        if let Some(text) = choice.delta.content
            && !text.is_empty()
        {
            out.push(OutboundEvent::Gemini(part_chunk(gemini::Part::text(text))));
        }

        for call in choice.delta.tool_calls.unwrap_or_default() {
            let entry = self.pending.entry(call.index).or_insert_with(|| {
                self.order.push(call.index);
                PendingCall::default()
            });

            if let Some(function) = call.function {
                if let Some(name) = function.name {
                    entry.name = name;
                }
                if let Some(arguments) = function.arguments {
                    entry.arguments.push_str(&arguments);
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(openai_finish_to_gemini(&reason));
            out.extend(self.finalize());
        }

        out
    }

    fn finalize(&mut self) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        self.finalized = true;

        let parts: Vec<gemini::Part> = std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|k| self.pending.remove(&k))
            .map(PendingCall::into_part)
            .collect();

        let reason = self
            .finish_reason
            .clone()
            .unwrap_or(gemini::FinishReason::Other("OTHER".to_string()));

        vec![OutboundEvent::Gemini(final_chunk(
            parts,
            reason,
            self.input_tokens,
            self.output_tokens,
        ))]
    }

    pub fn finish(&mut self, end: StreamEnd) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        if self.finish_reason.is_none() && end == StreamEnd::Clean {
            self.finish_reason = Some(gemini::FinishReason::Stop);
        }

        self.finalize()
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

pub struct AnthropicToGemini {
    seed: StreamSeed,
    finalized: bool,
    /// Anthropic block index → accumulating call.
    pending: HashMap<u32, PendingCall>,
    stop_reason: Option<anthropic::StopReason>,
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicToGemini {
    pub fn new(seed: StreamSeed) -> Self {
        Self {
            seed,
            finalized: false,
            pending: HashMap::new(),
            stop_reason: None,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn usage(&self) -> (u32, u32) {
        (self.input_tokens, self.output_tokens)
    }

    pub fn on_upstream_event(&mut self, event: anthropic::StreamEvent) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        let mut out = Vec::new();

        match event {
            anthropic::StreamEvent::MessageStart { message } => {
                self.input_tokens = message.usage.input_tokens;
            }

            anthropic::StreamEvent::ContentBlockStart { index, content_block } => {
                if let anthropic::ContentBlock::ToolUse { name, .. } = content_block {
                    self.pending.insert(
                        index,
                        PendingCall {
                            name,
                            arguments: String::new(),
                        },
                    );
                }
            }

            anthropic::StreamEvent::ContentBlockDelta { index, delta } => match delta {
                anthropic::ContentDelta::TextDelta { text } => {
                    out.push(OutboundEvent::Gemini(part_chunk(gemini::Part::text(text))));
                }
                anthropic::ContentDelta::ThinkingDelta { thinking } => {
                    if self.seed.wants_thinking {
                        out.push(OutboundEvent::Gemini(part_chunk(gemini::Part {
                            text: Some(thinking),
                            thought: Some(true),
                            ..Default::default()
                        })));
                    }
                }
                anthropic::ContentDelta::InputJsonDelta { partial_json } => {
                    if let Some(pending) = self.pending.get_mut(&index) {
                        pending.arguments.push_str(&partial_json);
                    }
                }
            },

            anthropic::StreamEvent::ContentBlockStop { index } => {
                if let Some(pending) = self.pending.remove(&index) {
                    out.push(OutboundEvent::Gemini(part_chunk(pending.into_part())));
                }
            }

            anthropic::StreamEvent::MessageDelta { delta, usage } => {
                self.output_tokens = usage.output_tokens;
                if usage.input_tokens > 0 {
                    self.input_tokens = usage.input_tokens;
                }
                self.stop_reason = delta.stop_reason;
            }

            anthropic::StreamEvent::MessageStop => {
                out.extend(self.finalize());
            }

            anthropic::StreamEvent::Ping => {}

            anthropic::StreamEvent::Error { error } => {
                log::error!("Anthropic upstream stream error: {} - {}", error.error_type, error.message);
                out.extend(self.fail(&error.error_type, &error.message));
            }
        }

        out
    }

    fn finalize(&mut self) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        self.finalized = true;

        let reason = self
            .stop_reason
            .as_ref()
            .map(anthropic_stop_to_gemini)
            .unwrap_or(gemini::FinishReason::Stop);

        vec![OutboundEvent::Gemini(final_chunk(
            Vec::new(),
            reason,
            self.input_tokens,
            self.output_tokens,
        ))]
    }

    pub fn finish(&mut self, end: StreamEnd) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        if self.stop_reason.is_none() && end == StreamEnd::Aborted {
            self.stop_reason = Some(anthropic::StopReason::Error);
        }

        self.finalize()
    }

    pub fn fail(&mut self, _kind: &str, message: &str) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        self.stop_reason = Some(anthropic::StopReason::Error);

        let mut out = vec![OutboundEvent::Gemini(part_chunk(gemini::Part::text(format!(
            "[stream error: {message}]"
        ))))];

        out.extend(self.finalize());

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn seed() -> StreamSeed {
        StreamSeed {
            id: "test".to_string(),
            model: "gemini-2.0-flash".to_string(),
            wants_thinking: false,
        }
    }

    #[test]
    fn openai_tool_fragments_reassemble_into_function_call() {
        let mut translator = OpenAiToGemini::new(seed());
        let mut out = Vec::new();

        let chunks = [
            json!({
                "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"tool_calls": [
                    {"index": 0, "id": "call_1", "function": {"name": "get_weather"}}
                ]}, "finish_reason": null}]
            }),
            json!({
                "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"tool_calls": [
                    {"index": 0, "function": {"arguments": "{\"location\":\"Paris\"}"}}
                ]}, "finish_reason": null}]
            }),
            json!({
                "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]
            }),
        ];

        for chunk in chunks {
            out.extend(translator.on_chunk(serde_json::from_value(chunk).unwrap()));
        }

        // Fragments buffer silently; only the final chunk carries the call.
        assert_eq!(out.len(), 1);

        let OutboundEvent::Gemini(final_chunk) = &out[0] else {
            unreachable!("expected Gemini chunk");
        };

        let candidate = &final_chunk.candidates[0];
        assert_eq!(candidate.finish_reason, Some(gemini::FinishReason::Stop));

        let call = candidate.content.as_ref().unwrap().parts[0].function_call.as_ref().unwrap();
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.args, json!({"location": "Paris"}));
    }

    #[test]
    fn anthropic_text_flows_through_as_parts() {
        let mut translator = AnthropicToGemini::new(seed());
        let mut out = Vec::new();

        let events = [
            json!({
                "type": "message_start",
                "message": {
                    "id": "msg_1", "type": "message", "role": "assistant", "content": [],
                    "model": "m", "usage": {"input_tokens": 3, "output_tokens": 0}
                }
            }),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "4"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 1}}),
            json!({"type": "message_stop"}),
        ];

        for event in events {
            out.extend(translator.on_upstream_event(serde_json::from_value(event).unwrap()));
        }

        assert_eq!(out.len(), 2);

        let OutboundEvent::Gemini(text_chunk) = &out[0] else {
            unreachable!("expected Gemini chunk");
        };
        assert_eq!(
            text_chunk.candidates[0].content.as_ref().unwrap().parts[0]
                .text
                .as_deref(),
            Some("4")
        );

        let OutboundEvent::Gemini(last) = &out[1] else {
            unreachable!("expected Gemini chunk");
        };
        assert_eq!(last.candidates[0].finish_reason, Some(gemini::FinishReason::Stop));
        assert_eq!(last.usage_metadata.unwrap().total_token_count, 4);
    }

    #[test]
    fn empty_arguments_become_empty_object() {
        let pending = PendingCall {
            name: "f".to_string(),
            arguments: String::new(),
        };

        let part = pending.into_part();
        assert_eq!(part.function_call.unwrap().args, Value::Object(Default::default()));
    }
}
