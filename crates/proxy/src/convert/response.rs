//! Pairwise buffered-response translation.
//!
//! Symmetric to [`super::request`]. The dispatcher overwrites the `model`
//! field afterwards so the caller sees the alias it asked for.

use uuid::Uuid;

use super::{parse_tool_arguments, unix_timestamp};
use crate::{
    error::{ProxyError, ProxyResult},
    messages::{anthropic, gemini, openai},
};

pub(crate) fn openai_finish_to_anthropic(reason: &openai::FinishReason) -> anthropic::StopReason {
    match reason {
        openai::FinishReason::Stop => anthropic::StopReason::EndTurn,
        openai::FinishReason::Length => anthropic::StopReason::MaxTokens,
        openai::FinishReason::ToolCalls => anthropic::StopReason::ToolUse,
        openai::FinishReason::ContentFilter => anthropic::StopReason::Error,
        openai::FinishReason::Other(other) => anthropic::StopReason::Other(other.clone()),
    }
}

pub(crate) fn anthropic_stop_to_openai(reason: &anthropic::StopReason) -> openai::FinishReason {
    match reason {
        anthropic::StopReason::EndTurn => openai::FinishReason::Stop,
        anthropic::StopReason::MaxTokens => openai::FinishReason::Length,
        anthropic::StopReason::StopSequence => openai::FinishReason::Stop,
        anthropic::StopReason::ToolUse => openai::FinishReason::ToolCalls,
        anthropic::StopReason::Error => openai::FinishReason::Other("error".to_string()),
        anthropic::StopReason::Other(other) => openai::FinishReason::Other(other.clone()),
    }
}

pub(crate) fn gemini_finish_to_anthropic(
    reason: &gemini::FinishReason,
    has_tool_calls: bool,
) -> anthropic::StopReason {
    match reason {
        gemini::FinishReason::Stop if has_tool_calls => anthropic::StopReason::ToolUse,
        gemini::FinishReason::Stop => anthropic::StopReason::EndTurn,
        gemini::FinishReason::MaxTokens => anthropic::StopReason::MaxTokens,
        gemini::FinishReason::Safety | gemini::FinishReason::Recitation => anthropic::StopReason::Error,
        gemini::FinishReason::Other(other) => anthropic::StopReason::Other(other.to_lowercase()),
    }
}

pub(crate) fn gemini_finish_to_openai(reason: &gemini::FinishReason, has_tool_calls: bool) -> openai::FinishReason {
    match reason {
        gemini::FinishReason::Stop if has_tool_calls => openai::FinishReason::ToolCalls,
        gemini::FinishReason::Stop => openai::FinishReason::Stop,
        gemini::FinishReason::MaxTokens => openai::FinishReason::Length,
        gemini::FinishReason::Safety | gemini::FinishReason::Recitation => openai::FinishReason::ContentFilter,
        gemini::FinishReason::Other(other) => openai::FinishReason::Other(other.to_lowercase()),
    }
}

pub(crate) fn anthropic_stop_to_gemini(reason: &anthropic::StopReason) -> gemini::FinishReason {
    match reason {
        anthropic::StopReason::EndTurn
        | anthropic::StopReason::StopSequence
        | anthropic::StopReason::ToolUse => gemini::FinishReason::Stop,
        anthropic::StopReason::MaxTokens => gemini::FinishReason::MaxTokens,
        anthropic::StopReason::Error => gemini::FinishReason::Other("OTHER".to_string()),
        anthropic::StopReason::Other(other) => gemini::FinishReason::Other(other.to_uppercase()),
    }
}

pub(crate) fn openai_finish_to_gemini(reason: &openai::FinishReason) -> gemini::FinishReason {
    match reason {
        openai::FinishReason::Stop | openai::FinishReason::ToolCalls => gemini::FinishReason::Stop,
        openai::FinishReason::Length => gemini::FinishReason::MaxTokens,
        openai::FinishReason::ContentFilter => gemini::FinishReason::Safety,
        openai::FinishReason::Other(other) => gemini::FinishReason::Other(other.to_uppercase()),
    }
}

fn first_choice(response: openai::ChatCompletionResponse) -> ProxyResult<(openai::ChatChoice, openai::Usage, String)> {
    let usage = response.usage.unwrap_or_default();
    let id = response.id;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProxyError::Internal(Some("upstream returned no choices".to_string())))?;

    Ok((choice, usage, id))
}

/// OpenAI upstream reply → Anthropic caller.
pub fn openai_to_anthropic(response: openai::ChatCompletionResponse) -> ProxyResult<anthropic::MessagesResponse> {
    let (choice, usage, id) = first_choice(response)?;

    let mut content = Vec::new();

    if let Some(reasoning) = choice.message.reasoning_content.clone()
        && !reasoning.is_empty()
    {
        content.push(anthropic::ContentBlock::Thinking { thinking: reasoning });
    }

    let text = choice.message.content_text();
    if !text.is_empty() {
        content.push(anthropic::ContentBlock::Text { text });
    }

    for call in choice.message.tool_calls.unwrap_or_default() {
        content.push(anthropic::ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input: parse_tool_arguments(&call.function.arguments)?,
        });
    }

    if content.is_empty() {
        content.push(anthropic::ContentBlock::Text { text: String::new() });
    }

    Ok(anthropic::MessagesResponse {
        id,
        r#type: "message".to_string(),
        role: anthropic::Role::Assistant,
        content,
        model: String::new(),
        stop_reason: Some(
            choice
                .finish_reason
                .as_ref()
                .map(openai_finish_to_anthropic)
                .unwrap_or(anthropic::StopReason::EndTurn),
        ),
        stop_sequence: None,
        usage: anthropic::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    })
}

/// Anthropic upstream reply → OpenAI caller.
pub fn anthropic_to_openai(response: anthropic::MessagesResponse) -> openai::ChatCompletionResponse {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            anthropic::ContentBlock::Text { text: fragment } => text.push_str(&fragment),
            anthropic::ContentBlock::Thinking { thinking } => reasoning.push_str(&thinking),
            anthropic::ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(openai::ToolCall {
                    id,
                    r#type: openai::ToolType::Function,
                    function: openai::FunctionCall {
                        name,
                        arguments: input.to_string(),
                    },
                });
            }
            anthropic::ContentBlock::Image { .. } | anthropic::ContentBlock::ToolResult { .. } => {}
        }
    }

    openai::ChatCompletionResponse {
        id: response.id,
        object: "chat.completion".to_string(),
        created: unix_timestamp(),
        model: String::new(),
        choices: vec![openai::ChatChoice {
            index: 0,
            message: openai::ChatMessage {
                role: openai::ChatRole::Assistant,
                content: (!text.is_empty()).then(|| openai::MessageContent::Text(text)),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
            },
            finish_reason: Some(
                response
                    .stop_reason
                    .as_ref()
                    .map(anthropic_stop_to_openai)
                    .unwrap_or(openai::FinishReason::Stop),
            ),
        }],
        usage: Some(openai::Usage::new(
            response.usage.input_tokens,
            response.usage.output_tokens,
        )),
    }
}

fn first_candidate(response: gemini::GenerateResponse) -> ProxyResult<(gemini::Candidate, gemini::UsageMetadata)> {
    let usage = response.usage_metadata.unwrap_or_default();

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProxyError::Internal(Some("upstream returned no candidates".to_string())))?;

    Ok((candidate, usage))
}

/// Gemini upstream reply → Anthropic caller.
pub fn gemini_to_anthropic(response: gemini::GenerateResponse) -> ProxyResult<anthropic::MessagesResponse> {
    let (candidate, usage) = first_candidate(response)?;

    let mut content = Vec::new();
    let mut has_tool_calls = false;

    for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
        if let Some(text) = part.text {
            if part.thought == Some(true) {
                content.push(anthropic::ContentBlock::Thinking { thinking: text });
            } else {
                content.push(anthropic::ContentBlock::Text { text });
            }
        }

        if let Some(call) = part.function_call {
            has_tool_calls = true;
            content.push(anthropic::ContentBlock::ToolUse {
                id: format!("toolu_{}", Uuid::new_v4().simple()),
                name: call.name,
                input: call.args,
            });
        }
    }

    if content.is_empty() {
        content.push(anthropic::ContentBlock::Text { text: String::new() });
    }

    Ok(anthropic::MessagesResponse {
        id: format!("msg_{}", Uuid::new_v4().simple()),
        r#type: "message".to_string(),
        role: anthropic::Role::Assistant,
        content,
        model: String::new(),
        stop_reason: Some(
            candidate
                .finish_reason
                .as_ref()
                .map(|reason| gemini_finish_to_anthropic(reason, has_tool_calls))
                .unwrap_or(anthropic::StopReason::EndTurn),
        ),
        stop_sequence: None,
        usage: anthropic::Usage {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        },
    })
}

/// Gemini upstream reply → OpenAI caller.
pub fn gemini_to_openai(response: gemini::GenerateResponse) -> ProxyResult<openai::ChatCompletionResponse> {
    let (candidate, usage) = first_candidate(response)?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
        if let Some(fragment) = part.text {
            text.push_str(&fragment);
        }

        if let Some(call) = part.function_call {
            tool_calls.push(openai::ToolCall {
                id: format!("call_{}", Uuid::new_v4().simple()),
                r#type: openai::ToolType::Function,
                function: openai::FunctionCall {
                    name: call.name,
                    arguments: call.args.to_string(),
                },
            });
        }
    }

    let has_tool_calls = !tool_calls.is_empty();

    Ok(openai::ChatCompletionResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
        object: "chat.completion".to_string(),
        created: unix_timestamp(),
        model: String::new(),
        choices: vec![openai::ChatChoice {
            index: 0,
            message: openai::ChatMessage {
                role: openai::ChatRole::Assistant,
                content: (!text.is_empty()).then(|| openai::MessageContent::Text(text)),
                tool_calls: has_tool_calls.then_some(tool_calls),
                tool_call_id: None,
                reasoning_content: None,
            },
            finish_reason: Some(
                candidate
                    .finish_reason
                    .as_ref()
                    .map(|reason| gemini_finish_to_openai(reason, has_tool_calls))
                    .unwrap_or(openai::FinishReason::Stop),
            ),
        }],
        usage: Some(openai::Usage::new(usage.prompt_token_count, usage.candidates_token_count)),
    })
}

/// Anthropic upstream reply → Gemini caller.
pub fn anthropic_to_gemini(response: anthropic::MessagesResponse) -> gemini::GenerateResponse {
    let mut parts = Vec::new();

    for block in response.content {
        match block {
            anthropic::ContentBlock::Text { text } => parts.push(gemini::Part::text(text)),
            anthropic::ContentBlock::Thinking { thinking } => {
                parts.push(gemini::Part {
                    text: Some(thinking),
                    thought: Some(true),
                    ..Default::default()
                });
            }
            anthropic::ContentBlock::ToolUse { name, input, .. } => {
                parts.push(gemini::Part::function_call(name, input));
            }
            anthropic::ContentBlock::Image { .. } | anthropic::ContentBlock::ToolResult { .. } => {}
        }
    }

    gemini::GenerateResponse {
        candidates: vec![gemini::Candidate {
            content: Some(gemini::Content {
                role: Some(gemini::GeminiRole::Model),
                parts,
            }),
            finish_reason: Some(
                response
                    .stop_reason
                    .as_ref()
                    .map(anthropic_stop_to_gemini)
                    .unwrap_or(gemini::FinishReason::Stop),
            ),
            index: Some(0),
        }],
        usage_metadata: Some(gemini::UsageMetadata {
            prompt_token_count: response.usage.input_tokens,
            candidates_token_count: response.usage.output_tokens,
            total_token_count: response.usage.input_tokens + response.usage.output_tokens,
        }),
    }
}

/// OpenAI upstream reply → Gemini caller.
pub fn openai_to_gemini(response: openai::ChatCompletionResponse) -> ProxyResult<gemini::GenerateResponse> {
    let (choice, usage, _) = first_choice(response)?;

    let mut parts = Vec::new();

    let text = choice.message.content_text();
    if !text.is_empty() {
        parts.push(gemini::Part::text(text));
    }

    for call in choice.message.tool_calls.unwrap_or_default() {
        parts.push(gemini::Part::function_call(
            call.function.name,
            parse_tool_arguments(&call.function.arguments)?,
        ));
    }

    Ok(gemini::GenerateResponse {
        candidates: vec![gemini::Candidate {
            content: Some(gemini::Content {
                role: Some(gemini::GeminiRole::Model),
                parts,
            }),
            finish_reason: Some(
                choice
                    .finish_reason
                    .as_ref()
                    .map(openai_finish_to_gemini)
                    .unwrap_or(gemini::FinishReason::Stop),
            ),
            index: Some(0),
        }],
        usage_metadata: Some(gemini::UsageMetadata {
            prompt_token_count: usage.prompt_tokens,
            candidates_token_count: usage.completion_tokens,
            total_token_count: usage.prompt_tokens + usage.completion_tokens,
        }),
    })
}
