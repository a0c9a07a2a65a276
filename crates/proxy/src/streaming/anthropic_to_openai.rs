//! Anthropic upstream → OpenAI caller.
//!
//! Anthropic's bracketed block events flatten into OpenAI delta chunks. Tool
//! arguments accumulate across `input_json_delta` events and are emitted as a
//! single `tool_calls` fragment when the block closes, so the caller always
//! receives syntactically complete argument JSON per fragment sequence.

use std::collections::HashMap;

use super::{OutboundEvent, StreamEnd, StreamSeed};
use crate::{
    convert::{response::anthropic_stop_to_openai, unix_timestamp},
    messages::{anthropic, openai},
};

struct ToolCallBuilder {
    /// Position in the caller-visible tool_calls array.
    openai_index: u32,
    id: String,
    name: String,
    arguments: String,
}

pub struct AnthropicToOpenAi {
    seed: StreamSeed,
    created: u64,
    started: bool,
    finalized: bool,
    message_id: Option<String>,
    /// Anthropic block index → accumulating tool call.
    tools: HashMap<u32, ToolCallBuilder>,
    next_tool_index: u32,
    finish_reason: Option<openai::FinishReason>,
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicToOpenAi {
    pub fn new(seed: StreamSeed) -> Self {
        Self {
            seed,
            created: unix_timestamp(),
            started: false,
            finalized: false,
            message_id: None,
            tools: HashMap::new(),
            next_tool_index: 0,
            finish_reason: None,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn usage(&self) -> (u32, u32) {
        (self.input_tokens, self.output_tokens)
    }

    fn id(&self) -> &str {
        self.message_id.as_deref().unwrap_or(&self.seed.id)
    }

    fn chunk(&self, delta: openai::MessageDelta) -> openai::ChatCompletionChunk {
        openai::ChatCompletionChunk::of_delta(self.id(), &self.seed.model, self.created, delta)
    }

    fn role_chunk(&mut self) -> Option<OutboundEvent> {
        if self.started {
            return None;
        }

        self.started = true;

        Some(OutboundEvent::OpenAi(self.chunk(openai::MessageDelta {
            role: Some(openai::ChatRole::Assistant),
            ..Default::default()
        })))
    }

    pub fn on_upstream_event(&mut self, event: anthropic::StreamEvent) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        let mut out = Vec::new();

        match event {
            anthropic::StreamEvent::MessageStart { message } => {
                self.message_id = Some(message.id);
                self.input_tokens = message.usage.input_tokens;

                out.extend(self.role_chunk());
            }

            anthropic::StreamEvent::ContentBlockStart { index, content_block } => {
                out.extend(self.role_chunk());

                if let anthropic::ContentBlock::ToolUse { id, name, .. } = content_block {
                    let openai_index = self.next_tool_index;
                    self.next_tool_index += 1;

                    self.tools.insert(
                        index,
                        ToolCallBuilder {
                            openai_index,
                            id,
                            name,
                            arguments: String::new(),
                        },
                    );
                }
            }

            anthropic::StreamEvent::ContentBlockDelta { index, delta } => {
                out.extend(self.role_chunk());

                match delta {
                    anthropic::ContentDelta::TextDelta { text } => {
                        out.push(OutboundEvent::OpenAi(self.chunk(openai::MessageDelta {
                            content: Some(text),
                            ..Default::default()
                        })));
                    }
                    anthropic::ContentDelta::ThinkingDelta { thinking } => {
                        out.push(OutboundEvent::OpenAi(self.chunk(openai::MessageDelta {
                            reasoning_content: Some(thinking),
                            ..Default::default()
                        })));
                    }
                    anthropic::ContentDelta::InputJsonDelta { partial_json } => {
                        if let Some(builder) = self.tools.get_mut(&index) {
                            builder.arguments.push_str(&partial_json);
                        } else {
                            log::warn!("input_json_delta for unknown block index {index}");
                        }
                    }
                }
            }

            anthropic::StreamEvent::ContentBlockStop { index } => {
                // Tool arguments are complete once the block closes; emit the
                // whole call as one fragment.
                if let Some(builder) = self.tools.remove(&index) {
                    out.push(OutboundEvent::OpenAi(self.chunk(openai::MessageDelta {
                        tool_calls: Some(vec![openai::ToolCallDelta {
                            index: builder.openai_index,
                            id: Some(builder.id),
                            r#type: Some(openai::ToolType::Function),
                            function: Some(openai::FunctionDelta {
                                name: Some(builder.name),
                                arguments: Some(builder.arguments),
                            }),
                        }]),
                        ..Default::default()
                    })));
                }
            }

            anthropic::StreamEvent::MessageDelta { delta, usage } => {
                self.output_tokens = usage.output_tokens;
                if usage.input_tokens > 0 {
                    self.input_tokens = usage.input_tokens;
                }

                self.finish_reason = Some(
                    delta
                        .stop_reason
                        .as_ref()
                        .map(anthropic_stop_to_openai)
                        .unwrap_or(openai::FinishReason::Stop),
                );
            }

            anthropic::StreamEvent::MessageStop => {
                out.extend(self.emit_final(self.finish_reason.clone().unwrap_or(openai::FinishReason::Stop)));
            }

            anthropic::StreamEvent::Ping => {}

            anthropic::StreamEvent::Error { error } => {
                log::error!("Anthropic upstream stream error: {} - {}", error.error_type, error.message);
                out.extend(self.fail(&error.error_type, &error.message));
            }
        }

        out
    }

    fn emit_final(&mut self, reason: openai::FinishReason) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        self.finalized = true;

        let mut chunk = self.chunk(openai::MessageDelta::default());
        chunk.choices[0].finish_reason = Some(reason);
        chunk.usage = Some(openai::Usage::new(self.input_tokens, self.output_tokens));

        vec![OutboundEvent::OpenAi(chunk), OutboundEvent::OpenAiDone]
    }

    pub fn finish(&mut self, end: StreamEnd) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        let reason = self.finish_reason.clone().unwrap_or(match end {
            StreamEnd::Clean => openai::FinishReason::Stop,
            StreamEnd::Aborted => openai::FinishReason::Other("error".to_string()),
        });

        self.emit_final(reason)
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn seed() -> StreamSeed {
        StreamSeed {
            id: "chatcmpl-test".to_string(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            wants_thinking: false,
        }
    }

    fn event(body: Value) -> anthropic::StreamEvent {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn text_stream_flattens_to_chunks() {
        let mut translator = AnthropicToOpenAi::new(seed());
        let mut out = Vec::new();

        out.extend(translator.on_upstream_event(event(json!({
            "type": "message_start",
            "message": {
                "id": "msg_1", "type": "message", "role": "assistant", "content": [],
                "model": "claude-3-5-sonnet-20241022",
                "usage": {"input_tokens": 12, "output_tokens": 0}
            }
        }))));
        out.extend(translator.on_upstream_event(event(json!({
            "type": "content_block_start", "index": 0,
            "content_block": {"type": "text", "text": ""}
        }))));
        out.extend(translator.on_upstream_event(event(json!({
            "type": "content_block_delta", "index": 0,
            "delta": {"type": "text_delta", "text": "Hello"}
        }))));
        out.extend(translator.on_upstream_event(event(json!({
            "type": "content_block_stop", "index": 0
        }))));
        out.extend(translator.on_upstream_event(event(json!({
            "type": "message_delta",
            "delta": {"stop_reason": "end_turn"},
            "usage": {"output_tokens": 5}
        }))));
        out.extend(translator.on_upstream_event(event(json!({"type": "message_stop"}))));

        // role chunk, text chunk, final chunk, [DONE]
        assert_eq!(out.len(), 4);
        assert!(matches!(out.last(), Some(OutboundEvent::OpenAiDone)));

        let OutboundEvent::OpenAi(first) = &out[0] else {
            unreachable!("expected chunk");
        };
        assert_eq!(first.choices[0].delta.role, Some(openai::ChatRole::Assistant));
        assert_eq!(first.id, "msg_1");

        let OutboundEvent::OpenAi(text) = &out[1] else {
            unreachable!("expected chunk");
        };
        assert_eq!(text.choices[0].delta.content.as_deref(), Some("Hello"));

        let OutboundEvent::OpenAi(last) = &out[2] else {
            unreachable!("expected chunk");
        };
        assert_eq!(last.choices[0].finish_reason, Some(openai::FinishReason::Stop));
        assert_eq!(last.usage.unwrap().total_tokens, 17);

        assert_eq!(translator.usage(), (12, 5));
    }

    #[test]
    fn tool_arguments_accumulate_until_block_stop() {
        let mut translator = AnthropicToOpenAi::new(seed());
        let mut out = Vec::new();

        out.extend(translator.on_upstream_event(event(json!({
            "type": "message_start",
            "message": {
                "id": "msg_1", "type": "message", "role": "assistant", "content": [],
                "model": "claude-3-5-sonnet-20241022",
                "usage": {"input_tokens": 30, "output_tokens": 0}
            }
        }))));
        out.extend(translator.on_upstream_event(event(json!({
            "type": "content_block_start", "index": 0,
            "content_block": {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {}}
        }))));
        out.extend(translator.on_upstream_event(event(json!({
            "type": "content_block_delta", "index": 0,
            "delta": {"type": "input_json_delta", "partial_json": "{\"loc"}
        }))));
        out.extend(translator.on_upstream_event(event(json!({
            "type": "content_block_delta", "index": 0,
            "delta": {"type": "input_json_delta", "partial_json": "ation\":\"Paris\"}"}
        }))));
        out.extend(translator.on_upstream_event(event(json!({
            "type": "content_block_stop", "index": 0
        }))));

        // role chunk + one tool_calls fragment; partial deltas emit nothing.
        assert_eq!(out.len(), 2);

        let OutboundEvent::OpenAi(tool_chunk) = &out[1] else {
            unreachable!("expected chunk");
        };
        let calls = tool_chunk.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].index, 0);
        assert_eq!(calls[0].id.as_deref(), Some("toolu_1"));

        let function = calls[0].function.as_ref().unwrap();
        assert_eq!(function.name.as_deref(), Some("get_weather"));
        assert_eq!(
            serde_json::from_str::<Value>(function.arguments.as_deref().unwrap()).unwrap(),
            json!({"location": "Paris"})
        );
    }

    #[test]
    fn upstream_error_becomes_error_frame_and_done() {
        let mut translator = AnthropicToOpenAi::new(seed());

        translator.on_upstream_event(event(json!({
            "type": "message_start",
            "message": {
                "id": "msg_1", "type": "message", "role": "assistant", "content": [],
                "model": "m", "usage": {"input_tokens": 1, "output_tokens": 0}
            }
        })));

        let out = translator.on_upstream_event(event(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })));

        assert!(matches!(out[0], OutboundEvent::OpenAiError { .. }));
        assert!(matches!(out[1], OutboundEvent::OpenAiDone));

        // Nothing further after termination.
        assert!(translator.finish(StreamEnd::Aborted).is_empty());
    }

    #[test]
    fn abrupt_eof_terminates_with_error_reason() {
        let mut translator = AnthropicToOpenAi::new(seed());

        translator.on_upstream_event(event(json!({
            "type": "message_start",
            "message": {
                "id": "msg_1", "type": "message", "role": "assistant", "content": [],
                "model": "m", "usage": {"input_tokens": 1, "output_tokens": 0}
            }
        })));

        let out = translator.finish(StreamEnd::Aborted);

        let OutboundEvent::OpenAi(chunk) = &out[0] else {
            unreachable!("expected chunk");
        };
        assert_eq!(
            chunk.choices[0].finish_reason,
            Some(openai::FinishReason::Other("error".to_string()))
        );
        assert!(matches!(out[1], OutboundEvent::OpenAiDone));
    }
}
