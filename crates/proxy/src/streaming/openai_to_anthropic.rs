//! OpenAI-compatible upstream → Anthropic caller.
//!
//! OpenAI chunks are flat deltas; the Anthropic grammar is a bracketed
//! sequence of content blocks. This machine opens and closes blocks so that
//! at most one is open at any time, assigns ascending block indexes, and
//! reassembles tool arguments per upstream tool-call index.

use std::collections::HashMap;

use serde_json::json;
use uuid::Uuid;

use super::{OutboundEvent, StreamEnd, StreamSeed};
use crate::{
    convert::response::openai_finish_to_anthropic,
    messages::{anthropic, openai},
};

#[derive(Debug, Clone, Copy, PartialEq)]
enum BlockKind {
    Text,
    Thinking,
    Tool,
}

#[derive(Debug, Clone, Copy)]
struct OpenBlock {
    index: u32,
    kind: BlockKind,
    /// Upstream tool-call index this block belongs to, for Tool blocks.
    tool_k: u32,
}

pub struct OpenAiToAnthropic {
    seed: StreamSeed,
    started: bool,
    finalized: bool,
    next_index: u32,
    open: Option<OpenBlock>,
    /// Upstream tool-call index → anthropic block index, for blocks already
    /// opened (open or closed).
    seen_tools: HashMap<u32, u32>,
    /// A block start was emitted whose first delta has not arrived yet; pings
    /// must hold off.
    awaiting_first_delta: bool,
    stop_reason: Option<anthropic::StopReason>,
    input_tokens: u32,
    output_tokens: u32,
}

impl OpenAiToAnthropic {
    pub fn new(seed: StreamSeed) -> Self {
        Self {
            seed,
            started: false,
            finalized: false,
            next_index: 0,
            open: None,
            seen_tools: HashMap::new(),
            awaiting_first_delta: false,
            stop_reason: None,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn usage(&self) -> (u32, u32) {
        (self.input_tokens, self.output_tokens)
    }

    pub fn ping(&self) -> Option<OutboundEvent> {
        if self.awaiting_first_delta || self.finalized {
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

    fn close_open_block(&mut self, out: &mut Vec<OutboundEvent>) {
        if let Some(block) = self.open.take() {
            out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::ContentBlockStop {
                index: block.index,
            }));
        }

        self.awaiting_first_delta = false;
    }

    /// Open a block of the given kind, closing whatever is open first.
    fn open_block(&mut self, kind: BlockKind, content_block: anthropic::ContentBlock, tool_k: u32) -> Vec<OutboundEvent> {
        let mut out = Vec::new();

        self.close_open_block(&mut out);

        let index = self.next_index;
        self.next_index += 1;

        self.open = Some(OpenBlock { index, kind, tool_k });
        self.awaiting_first_delta = true;

        out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::ContentBlockStart {
            index,
            content_block,
        }));

        out
    }

    fn push_delta(&mut self, out: &mut Vec<OutboundEvent>, index: u32, delta: anthropic::ContentDelta) {
        self.awaiting_first_delta = false;

        out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::ContentBlockDelta {
            index,
            delta,
        }));
    }

    pub fn on_chunk(&mut self, chunk: openai::ChatCompletionChunk) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        let mut out = Vec::new();
        self.ensure_started(&mut out);

        if let Some(usage) = chunk.usage {
            self.input_tokens = usage.prompt_tokens;
            self.output_tokens = usage.completion_tokens;
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return out;
        };

        let delta = choice.delta;

        // Reasoning deltas come first: the thinking block precedes text.
        if let Some(reasoning) = delta.reasoning_content
            && !reasoning.is_empty()
            && self.seed.wants_thinking
        {
            let index = match self.open {
                Some(block) if block.kind == BlockKind::Thinking => block.index,
                _ => {
                    let opened = self.open_block(
                        BlockKind::Thinking,
                        anthropic::ContentBlock::Thinking {
                            thinking: String::new(),
                        },
                        0,
                    );
                    out.extend(opened);
                    self.open.map(|block| block.index).unwrap_or_default()
                }
            };

            self.push_delta(&mut out, index, anthropic::ContentDelta::ThinkingDelta { thinking: reasoning });
        }

        if let Some(text) = delta.content
            && !text.is_empty()
        {
            let index = match self.open {
                Some(block) if block.kind == BlockKind::Text => block.index,
                _ => {
                    let opened = self.open_block(
                        BlockKind::Text,
                        anthropic::ContentBlock::Text { text: String::new() },
                        0,
                    );
                    out.extend(opened);
                    self.open.map(|block| block.index).unwrap_or_default()
                }
            };

            self.push_delta(&mut out, index, anthropic::ContentDelta::TextDelta { text });
        }

        for call in delta.tool_calls.unwrap_or_default() {
            let k = call.index;

            if !self.seen_tools.contains_key(&k) {
                let id = call
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("toolu_{}", Uuid::new_v4().simple()));

                let name = call
                    .function
                    .as_ref()
                    .and_then(|function| function.name.clone())
                    .unwrap_or_default();

                let opened = self.open_block(
                    BlockKind::Tool,
                    anthropic::ContentBlock::ToolUse {
                        id,
                        name,
                        input: json!({}),
                    },
                    k,
                );
                out.extend(opened);

                let index = self.open.map(|block| block.index).unwrap_or_default();
                self.seen_tools.insert(k, index);
            }

            if let Some(arguments) = call.function.and_then(|function| function.arguments)
                && !arguments.is_empty()
            {
                match self.open {
                    Some(block) if block.kind == BlockKind::Tool && block.tool_k == k => {
                        self.push_delta(
                            &mut out,
                            block.index,
                            anthropic::ContentDelta::InputJsonDelta {
                                partial_json: arguments,
                            },
                        );
                    }
                    _ => {
                        // The block for this index already closed; a late
                        // fragment cannot be replayed without reopening it.
                        log::warn!("Dropping tool argument fragment for closed tool call {k}");
                    }
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.stop_reason = Some(openai_finish_to_anthropic(&reason));
            out.extend(self.finalize());
        }

        out
    }

    fn finalize(&mut self) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        self.finalized = true;

        let mut out = Vec::new();
        self.ensure_started(&mut out);
        self.close_open_block(&mut out);

        out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::MessageDelta {
            delta: anthropic::MessageDeltaBody {
                stop_reason: Some(self.stop_reason.clone().unwrap_or(anthropic::StopReason::EndTurn)),
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

        if self.stop_reason.is_none() {
            self.stop_reason = Some(match end {
                StreamEnd::Clean => anthropic::StopReason::EndTurn,
                StreamEnd::Aborted => anthropic::StopReason::Error,
            });
        }

        self.finalize()
    }

    pub fn fail(&mut self, kind: &str, message: &str) -> Vec<OutboundEvent> {
        if self.finalized {
            return Vec::new();
        }

        let mut out = Vec::new();
        self.ensure_started(&mut out);
        self.close_open_block(&mut out);

        out.push(OutboundEvent::Anthropic(anthropic::StreamEvent::Error {
            error: anthropic::ErrorBody {
                error_type: kind.to_string(),
                message: message.to_string(),
            },
        }));

        self.stop_reason = Some(anthropic::StopReason::Error);
        out.extend(self.finalize());

        out
    }
}
