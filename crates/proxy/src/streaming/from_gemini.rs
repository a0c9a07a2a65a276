//! Gemini upstream → Anthropic or OpenAI callers.
//!
//! Gemini chunks arrive as whole JSON objects whose parts are already
//! complete. Text parts stream into one open text block; each `functionCall`
//! part opens and closes a tool block in the same step, emitting its full
//! arguments as a single `partial_json` (or `tool_calls` fragment).

use uuid::Uuid;

use super::{OutboundEvent, StreamEnd, StreamSeed};
use crate::{
    convert::{
        response::{gemini_finish_to_anthropic, gemini_finish_to_openai},
        unix_timestamp,
    },
    messages::{anthropic, gemini, openai},
};

pub struct GeminiToAnthropic {
    seed: StreamSeed,
    started: bool,
    finalized: bool,
    next_index: u32,
    open_text: Option<u32>,
    open_thinking: Option<u32>,
    saw_tool_call: bool,
    finish_reason: Option<gemini::FinishReason>,
    input_tokens: u32,
    output_tokens: u32,
}

impl GeminiToAnthropic {
    pub fn new(seed: StreamSeed) -> Self {
        Self {
            seed,
            started: false,
            finalized: false,
            next_index: 0,
            open_text: None,
            open_thinking: None,
            saw_tool_call: false,
            finish_reason: None,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn usage(&self) -> (u32, u32) {
        (self.input_tokens, self.output_tokens)
    }

    pub fn ping(&self) -> Option<OutboundEvent> {
        // Blocks here always receive a delta in the same batch as their
        // start, so pings are safe whenever the stream is live.
        if self.finalized {
            return None;
        }

        Some(OutboundEvent::Anthropic(anthropic::StreamEvent::Ping))
    }

    fn ensure_started(&mut self, out: &mut Vec<OutboundEvent>) {
        if self.started {
            return;
        }

        self.started = true;

        out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::MessageStart {
            message: anthropic::StreamMessageStart::new(self.seed.id.clone(), self.seed.model.clone()),
        }));
    }

    fn close_open_blocks(&mut self, out: &mut Vec<OutboundEvent>) {
        for index in [self.open_thinking.take(), self.open_text.take()].into_iter().flatten() {
            out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::ContentBlockStop {
                index,
            }));
        }
    }

    pub fn on_chunk(&mut self, chunk: gemini::StreamChunk) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        let mut out = Vec::new();
        self.ensure_started(&mut out);

        if let Some(usage) = chunk.usage_metadata {
            self.input_tokens = usage.prompt_token_count;
            self.output_tokens = usage.candidates_token_count;
        }

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return out;
        };

        for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
            if let Some(text) = part.text {
                if part.thought == Some(true) {
                    if self.seed.wants_thinking {
                        self.stream_delta(
                            &mut out,
                            true,
                            anthropic::ContentBlock::Thinking {
                                thinking: String::new(),
                            },
                            anthropic::ContentDelta::ThinkingDelta { thinking: text },
                        );
                    }
                } else {
                    self.stream_delta(
                        &mut out,
                        false,
                        anthropic::ContentBlock::Text { text: String::new() },
                        anthropic::ContentDelta::TextDelta { text },
                    );
                }
            }

            if let Some(call) = part.function_call {
                self.saw_tool_call = true;
                self.close_open_blocks(&mut out);

                let index = self.next_index;
                self.next_index += 1;

                // Arguments are already complete: open, emit once, close.
                out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::ContentBlockStart {
                    index,
                    content_block: anthropic::ContentBlock::ToolUse {
                        id: format!("toolu_{}", Uuid::new_v4().simple()),
                        name: call.name,
                        input: serde_json::json!({}),
                    },
                }));
                out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::ContentBlockDelta {
                    index,
                    delta: anthropic::ContentDelta::InputJsonDelta {
                        partial_json: call.args.to_string(),
                    },
                }));
                out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::ContentBlockStop {
                    index,
                }));
            }
        }

        if let Some(reason) = candidate.finish_reason {
            self.finish_reason = Some(reason);
            out.extend(self.finalize());
        }

        out
    }

    /// Append a delta to the open block of the right kind, opening it first
    /// when necessary.
    fn stream_delta(
        &mut self,
        out: &mut Vec<OutboundEvent>,
        thinking: bool,
        fresh_block: anthropic::ContentBlock,
        delta: anthropic::ContentDelta,
    ) {
        let slot = if thinking { self.open_thinking } else { self.open_text };

        let index = match slot {
            Some(index) => index,
            None => {
                self.close_open_blocks(out);

                let index = self.next_index;
                self.next_index += 1;

                if thinking {
                    self.open_thinking = Some(index);
                } else {
                    self.open_text = Some(index);
                }

                out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::ContentBlockStart {
                    index,
                    content_block: fresh_block,
                }));

                index
            }
        };

        out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::ContentBlockDelta {
            index,
            delta,
        }));
    }

    fn finalize(&mut self) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        self.finalized = true;

        let mut out = Vec::new();
        self.ensure_started(&mut out);
        self.close_open_blocks(&mut out);

        let stop_reason = self
            .finish_reason
            .as_ref()
            .map(|reason| gemini_finish_to_anthropic(reason, self.saw_tool_call))
            .unwrap_or(anthropic::StopReason::Error);

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
        if self.finalized {
            return Vec::new();
        }

        if self.finish_reason.is_none() && end == StreamEnd::Clean {
            self.finish_reason = Some(gemini::FinishReason::Stop);
        }

        self.finalize()
    }

    pub fn fail(&mut self, kind: &str, message: &str) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        let mut out = Vec::new();
        self.ensure_started(&mut out);
        self.close_open_blocks(&mut out);

        out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::Error {
            error: anthropic::ErrorBody {
                error_type: kind.to_string(),
                message: message.to_string(),
            },
        }));

        out.extend(self.finalize());

        out
    }
}

pub struct GeminiToOpenAi {
    seed: StreamSeed,
    created: u64,
    started: bool,
    finalized: bool,
    next_tool_index: u32,
    saw_tool_call: bool,
    finish_reason: Option<gemini::FinishReason>,
    input_tokens: u32,
    output_tokens: u32,
}

impl GeminiToOpenAi {
    pub fn new(seed: StreamSeed) -> Self {
        Self {
            seed,
            created: unix_timestamp(),
            started: false,
            finalized: false,
            next_tool_index: 0,
            saw_tool_call: false,
            finish_reason: None,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn usage(&self) -> (u32, u32) {
        (self.input_tokens, self.output_tokens)
    }

    fn chunk(&self, delta: openai::MessageDelta) -> openai::ChatCompletionChunk {
        openai::ChatCompletionChunk::of_delta(&self.seed.id, &self.seed.model, self.created, delta)
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

    pub fn on_chunk(&mut self, chunk: gemini::StreamChunk) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        let mut out = Vec::new();
        out.extend(self.role_chunk());

        if let Some(usage) = chunk.usage_metadata {
            self.input_tokens = usage.prompt_token_count;
            self.output_tokens = usage.candidates_token_count;
        }

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return out;
        };

        for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
            if let Some(text) = part.text
                && part.thought != Some(true)
            {
                out.push(OutboundEvent::OpenAi(self.chunk(openai::MessageDelta {
                    content: Some(text),
                    ..Default::default()
                })));
            }

            if let Some(call) = part.function_call {
                self.saw_tool_call = true;

                let index = self.next_tool_index;
                self.next_tool_index += 1;

                out.push(OutboundEvent::OpenAi(self.chunk(openai::MessageDelta {
                    tool_calls: Some(vec![openai::ToolCallDelta {
                        index,
                        id: Some(format!("call_{}", Uuid::new_v4().simple())),
                        r#type: Some(openai::ToolType::Function),
                        function: Some(openai::FunctionDelta {
                            name: Some(call.name),
                            arguments: Some(call.args.to_string()),
                        }),
                    }]),
                    ..Default::default()
                })));
            }
        }

        if let Some(reason) = candidate.finish_reason {
            self.finish_reason = Some(reason);
            out.extend(self.finalize());
        }

        out
    }

    fn finalize(&mut self) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        self.finalized = true;

        let reason = self
            .finish_reason
            .as_ref()
            .map(|reason| gemini_finish_to_openai(reason, self.saw_tool_call))
            .unwrap_or(openai::FinishReason::Other("error".to_string()));

        let mut chunk = self.chunk(openai::MessageDelta::default());
        chunk.choices[0].finish_reason = Some(reason);
        chunk.usage = Some(openai::Usage::new(self.input_tokens, self.output_tokens));

        vec![OutboundEvent::OpenAi(chunk), OutboundEvent::OpenAiDone]
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
            id: "msg_test".to_string(),
            model: "gemini-2.0-flash".to_string(),
            wants_thinking: false,
        }
    }

    fn chunk(body: Value) -> gemini::StreamChunk {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn function_call_opens_and_closes_in_one_step() {
        let mut translator = GeminiToAnthropic::new(seed());

        let events = translator.on_chunk(chunk(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"functionCall": {"name": "get_weather", "args": {"location": "Paris"}}}]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15}
        })));

        let names: Vec<_> = events
            .iter()
            .map(|event| match event {
                OutboundEvent::Anthropic(event) => event.name(),
                other => unreachable!("unexpected event: {other:?}"),
            })
            .collect();

        assert_eq!(
            names,
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        // The single partial_json carries the whole argument object.
        let OutboundEvent::Anthropic(anthropic::StreamEvent::ContentBlockDelta {
            delta: anthropic::ContentDelta::InputJsonDelta { partial_json },
            ..
        }) = &events[2]
        else {
            unreachable!("expected input_json_delta");
        };
        assert_eq!(
            serde_json::from_str::<Value>(partial_json).unwrap(),
            json!({"location": "Paris"})
        );

        // functionCall parts with STOP map to tool_use.
        let OutboundEvent::Anthropic(anthropic::StreamEvent::MessageDelta { delta, .. }) =
            &events[events.len() - 2]
        else {
            unreachable!("expected message_delta");
        };
        assert_eq!(delta.stop_reason, Some(anthropic::StopReason::ToolUse));
    }

    #[test]
    fn text_parts_share_one_block() {
        let mut translator = GeminiToAnthropic::new(seed());
        let mut events = Vec::new();

        events.extend(translator.on_chunk(chunk(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}]}}]
        }))));
        events.extend(translator.on_chunk(chunk(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "lo"}]}, "finishReason": "STOP"}]
        }))));

        let starts = events
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    OutboundEvent::Anthropic(anthropic::StreamEvent::ContentBlockStart { .. })
                )
            })
            .count();
        assert_eq!(starts, 1);

        let text: String = events
            .iter()
            .filter_map(|event| match event {
                OutboundEvent::Anthropic(anthropic::StreamEvent::ContentBlockDelta {
                    delta: anthropic::ContentDelta::TextDelta { text },
                    ..
                }) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello");
    }

    #[test]
    fn openai_caller_gets_tool_fragment_and_done() {
        let mut translator = GeminiToOpenAi::new(seed());

        let events = translator.on_chunk(chunk(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"functionCall": {"name": "get_weather", "args": {"location": "Paris"}}}]
                },
                "finishReason": "STOP"
            }]
        })));

        assert!(matches!(events.last(), Some(OutboundEvent::OpenAiDone)));

        let OutboundEvent::OpenAi(final_chunk) = &events[events.len() - 2] else {
            unreachable!("expected chunk");
        };
        assert_eq!(final_chunk.choices[0].finish_reason, Some(openai::FinishReason::ToolCalls));

        let OutboundEvent::OpenAi(tool_chunk) = &events[1] else {
            unreachable!("expected chunk");
        };
        let calls = tool_chunk.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.as_ref().unwrap().name.as_deref(), Some("get_weather"));
    }

    #[test]
    fn abrupt_eof_is_an_error_stop() {
        let mut translator = GeminiToAnthropic::new(seed());

        translator.on_chunk(chunk(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}]}}]
        })));

        let events = translator.finish(StreamEnd::Aborted);

        let OutboundEvent::Anthropic(anthropic::StreamEvent::MessageDelta { delta, .. }) =
            &events[events.len() - 2]
        else {
            unreachable!("expected message_delta");
        };
        assert_eq!(delta.stop_reason, Some(anthropic::StopReason::Error));
    }
}
