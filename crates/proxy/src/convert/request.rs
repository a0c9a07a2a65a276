//! Pairwise request translation.
//!
//! Six directions between Anthropic, OpenAI, and Gemini. When the caller and
//! channel formats coincide, the dispatcher skips this module entirely.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::json;

use super::{
    DEFAULT_MAX_TOKENS, clamp_temperature, ensure_object_schema, parse_data_url, parse_tool_arguments,
    sanitize_gemini_schema, to_data_url, unwrap_function_response, wrap_function_response,
};
use crate::{
    error::{ProxyError, ProxyResult},
    messages::{anthropic, gemini, openai},
};

/// Anthropic → OpenAI.
///
/// The system prompt becomes a leading system message; `tool_use` blocks
/// become the assistant's parallel `tool_calls`; `tool_result` blocks become
/// separate `role=tool` messages preceding the user's own content.
pub fn anthropic_to_openai(request: anthropic::MessagesRequest) -> ProxyResult<openai::ChatCompletionRequest> {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        messages.push(openai::ChatMessage::text(openai::ChatRole::System, system.flattened()));
    }

    let mut known_tool_ids = HashSet::new();

    for message in &request.messages {
        match message.role {
            anthropic::Role::Assistant => {
                let mut text = String::new();
                let mut tool_calls = Vec::new();

                for block in message.content.to_blocks() {
                    match block {
                        anthropic::ContentBlock::Text { text: fragment } => text.push_str(&fragment),
                        // Not representable on the OpenAI request side.
                        anthropic::ContentBlock::Thinking { .. } => {}
                        anthropic::ContentBlock::ToolUse { id, name, input } => {
                            known_tool_ids.insert(id.clone());

                            tool_calls.push(openai::ToolCall {
                                id,
                                r#type: openai::ToolType::Function,
                                function: openai::FunctionCall {
                                    name,
                                    arguments: input.to_string(),
                                },
                            });
                        }
                        anthropic::ContentBlock::Image { .. } => {
                            return Err(ProxyError::InvalidRequest(
                                "assistant messages cannot carry images".to_string(),
                            ));
                        }
                        anthropic::ContentBlock::ToolResult { .. } => {
                            return Err(ProxyError::InvalidRequest(
                                "tool_result blocks belong to user messages".to_string(),
                            ));
                        }
                    }
                }

                messages.push(openai::ChatMessage {
                    role: openai::ChatRole::Assistant,
                    content: (!text.is_empty()).then(|| openai::MessageContent::Text(text)),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                    reasoning_content: None,
                });
            }
            anthropic::Role::User => {
                let mut parts = Vec::new();
                let mut tool_results = Vec::new();

                for block in message.content.to_blocks() {
                    match block {
                        anthropic::ContentBlock::Text { text } => {
                            parts.push(openai::ContentPart::Text { text });
                        }
                        anthropic::ContentBlock::Image { source } => {
                            let url = match source {
                                anthropic::ImageSource::Base64 { media_type, data } => {
                                    to_data_url(&media_type, &data)?
                                }
                                anthropic::ImageSource::Url { url } => url,
                            };

                            parts.push(openai::ContentPart::ImageUrl {
                                image_url: openai::ImageUrl { url, detail: None },
                            });
                        }
                        anthropic::ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error: _,
                        } => {
                            if !known_tool_ids.contains(&tool_use_id) {
                                return Err(ProxyError::InvalidRequest(format!(
                                    "tool_result references unknown tool_use_id '{tool_use_id}'"
                                )));
                            }

                            let text = content.map(|content| content.flattened()).unwrap_or_default();

                            tool_results.push(openai::ChatMessage {
                                role: openai::ChatRole::Tool,
                                content: Some(openai::MessageContent::Text(text)),
                                tool_calls: None,
                                tool_call_id: Some(tool_use_id),
                                reasoning_content: None,
                            });
                        }
                        anthropic::ContentBlock::ToolUse { .. } => {
                            return Err(ProxyError::InvalidRequest(
                                "tool_use blocks belong to assistant messages".to_string(),
                            ));
                        }
                        anthropic::ContentBlock::Thinking { .. } => {}
                    }
                }

                messages.extend(tool_results);

                if !parts.is_empty() {
                    let content = match parts.as_slice() {
                        [openai::ContentPart::Text { text }] => openai::MessageContent::Text(text.clone()),
                        _ => openai::MessageContent::Parts(parts),
                    };

                    messages.push(openai::ChatMessage {
                        role: openai::ChatRole::User,
                        content: Some(content),
                        tool_calls: None,
                        tool_call_id: None,
                        reasoning_content: None,
                    });
                }
            }
        }
    }

    let tools = request
        .tools
        .map(|tools| {
            tools
                .into_iter()
                .map(|tool| {
                    ensure_object_schema(&tool.name, &tool.input_schema)?;

                    Ok(openai::Tool {
                        r#type: openai::ToolType::Function,
                        function: openai::FunctionDefinition {
                            name: tool.name,
                            description: tool.description,
                            parameters: Some(tool.input_schema),
                        },
                    })
                })
                .collect::<ProxyResult<Vec<_>>>()
        })
        .transpose()?;

    let tool_choice = request.tool_choice.map(|choice| match choice {
        anthropic::ToolChoice::Auto => openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto),
        anthropic::ToolChoice::Any => openai::ToolChoice::Mode(openai::ToolChoiceMode::Required),
        anthropic::ToolChoice::Tool { name } => openai::ToolChoice::Specific {
            r#type: openai::ToolType::Function,
            function: openai::FunctionName { name },
        },
    });

    Ok(openai::ChatCompletionRequest {
        model: request.model,
        messages,
        max_tokens: Some(request.max_tokens),
        temperature: clamp_temperature(request.temperature, 2.0),
        top_p: request.top_p,
        frequency_penalty: None,
        presence_penalty: None,
        stop: request.stop_sequences.map(openai::StopSequences::Many),
        stream: request.stream,
        tools,
        tool_choice,
    })
}

/// OpenAI → Anthropic.
///
/// Leading system messages lift into the top-level system prompt; assistant
/// messages carrying both content and tool_calls split into an ordered block
/// list; consecutive `role=tool` messages fold into one user message of
/// `tool_result` blocks.
pub fn openai_to_anthropic(request: openai::ChatCompletionRequest) -> ProxyResult<anthropic::MessagesRequest> {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<anthropic::Message> = Vec::new();
    let mut pending_tool_results: Vec<anthropic::ContentBlock> = Vec::new();

    fn flush_tool_results(
        pending: &mut Vec<anthropic::ContentBlock>,
        messages: &mut Vec<anthropic::Message>,
    ) {
        if pending.is_empty() {
            return;
        }

        messages.push(anthropic::Message {
            role: anthropic::Role::User,
            content: anthropic::MessageContent::Blocks(std::mem::take(pending)),
        });
    }

    for message in request.messages {
        match message.role {
            openai::ChatRole::System => {
                system_parts.push(message.content_text());
            }
            openai::ChatRole::User => {
                flush_tool_results(&mut pending_tool_results, &mut messages);

                let content = match message.content {
                    Some(openai::MessageContent::Text(text)) => anthropic::MessageContent::Text(text),
                    Some(openai::MessageContent::Parts(parts)) => {
                        let blocks = parts
                            .into_iter()
                            .map(|part| match part {
                                openai::ContentPart::Text { text } => Ok(anthropic::ContentBlock::Text { text }),
                                openai::ContentPart::ImageUrl { image_url } => {
                                    let source = match parse_data_url(&image_url.url) {
                                        Some((media_type, data)) => {
                                            super::check_image_size(&data)?;
                                            anthropic::ImageSource::Base64 { media_type, data }
                                        }
                                        None => anthropic::ImageSource::Url { url: image_url.url },
                                    };

                                    Ok(anthropic::ContentBlock::Image { source })
                                }
                            })
                            .collect::<ProxyResult<Vec<_>>>()?;

                        anthropic::MessageContent::Blocks(blocks)
                    }
                    None => anthropic::MessageContent::Text(String::new()),
                };

                messages.push(anthropic::Message {
                    role: anthropic::Role::User,
                    content,
                });
            }
            openai::ChatRole::Assistant => {
                flush_tool_results(&mut pending_tool_results, &mut messages);

                let mut blocks = Vec::new();

                let text = message.content_text();
                if !text.is_empty() {
                    blocks.push(anthropic::ContentBlock::Text { text });
                }

                for call in message.tool_calls.unwrap_or_default() {
                    blocks.push(anthropic::ContentBlock::ToolUse {
                        id: call.id,
                        name: call.function.name,
                        input: parse_tool_arguments(&call.function.arguments)?,
                    });
                }

                if blocks.is_empty() {
                    blocks.push(anthropic::ContentBlock::Text { text: String::new() });
                }

                messages.push(anthropic::Message {
                    role: anthropic::Role::Assistant,
                    content: anthropic::MessageContent::Blocks(blocks),
                });
            }
            openai::ChatRole::Tool => {
                let tool_call_id = message.tool_call_id.clone().ok_or_else(|| {
                    ProxyError::InvalidRequest("tool message is missing tool_call_id".to_string())
                })?;

                pending_tool_results.push(anthropic::ContentBlock::ToolResult {
                    tool_use_id: tool_call_id,
                    content: Some(anthropic::ToolResultContent::Text(message.content_text())),
                    is_error: None,
                });
            }
            openai::ChatRole::Other(role) => {
                return Err(ProxyError::InvalidRequest(format!("unsupported message role '{role}'")));
            }
        }
    }

    flush_tool_results(&mut pending_tool_results, &mut messages);

    // "none" means the model must not call tools; the closest Anthropic
    // equivalent is to not offer any.
    let suppress_tools = matches!(
        &request.tool_choice,
        Some(openai::ToolChoice::Mode(openai::ToolChoiceMode::None))
    );

    let tools = if suppress_tools {
        None
    } else {
        request
            .tools
            .map(|tools| {
                tools
                    .into_iter()
                    .map(|tool| {
                        let input_schema = tool
                            .function
                            .parameters
                            .unwrap_or_else(|| json!({"type": "object", "properties": {}}));

                        ensure_object_schema(&tool.function.name, &input_schema)?;

                        Ok(anthropic::Tool {
                            name: tool.function.name,
                            description: tool.function.description,
                            input_schema,
                        })
                    })
                    .collect::<ProxyResult<Vec<_>>>()
            })
            .transpose()?
    };

    let tool_choice = if suppress_tools {
        None
    } else {
        request.tool_choice.and_then(|choice| match choice {
            openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto) => Some(anthropic::ToolChoice::Auto),
            openai::ToolChoice::Mode(openai::ToolChoiceMode::Required) => Some(anthropic::ToolChoice::Any),
            openai::ToolChoice::Mode(_) => None,
            openai::ToolChoice::Specific { function, .. } => {
                Some(anthropic::ToolChoice::Tool { name: function.name })
            }
        })
    };

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(anthropic::SystemPrompt::Text(system_parts.join("\n")))
    };

    Ok(anthropic::MessagesRequest {
        model: request.model,
        messages,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system,
        temperature: clamp_temperature(request.temperature, 1.0),
        top_p: request.top_p,
        top_k: None,
        stop_sequences: request.stop.map(|stop| stop.to_vec()),
        stream: request.stream,
        metadata: None,
        tools,
        tool_choice,
        thinking: None,
    })
}

/// Anthropic → Gemini.
pub fn anthropic_to_gemini(request: anthropic::MessagesRequest) -> ProxyResult<gemini::GenerateRequest> {
    let system_instruction = request.system.as_ref().map(|system| gemini::Content {
        role: None,
        parts: vec![gemini::Part::text(system.flattened())],
    });

    // Gemini has no tool-call ids; results are matched back by function name.
    let mut id_to_name: HashMap<String, String> = HashMap::new();
    let mut contents = Vec::new();

    for message in &request.messages {
        let (role, mut parts) = match message.role {
            anthropic::Role::User => (gemini::GeminiRole::User, Vec::new()),
            anthropic::Role::Assistant => (gemini::GeminiRole::Model, Vec::new()),
        };

        for block in message.content.to_blocks() {
            match block {
                anthropic::ContentBlock::Text { text } => parts.push(gemini::Part::text(text)),
                anthropic::ContentBlock::Thinking { .. } => {}
                anthropic::ContentBlock::Image { source } => match source {
                    anthropic::ImageSource::Base64 { media_type, data } => {
                        super::check_image_size(&data)?;
                        parts.push(gemini::Part::inline_data(media_type, data));
                    }
                    anthropic::ImageSource::Url { .. } => {
                        return Err(ProxyError::InvalidRequest(
                            "Gemini upstreams require inline image data".to_string(),
                        ));
                    }
                },
                anthropic::ContentBlock::ToolUse { id, name, input } => {
                    id_to_name.insert(id, name.clone());
                    parts.push(gemini::Part::function_call(name, input));
                }
                anthropic::ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error: _,
                } => {
                    let name = id_to_name.get(&tool_use_id).cloned().ok_or_else(|| {
                        ProxyError::InvalidRequest(format!(
                            "tool_result references unknown tool_use_id '{tool_use_id}'"
                        ))
                    })?;

                    let text = content.map(|content| content.flattened()).unwrap_or_default();
                    parts.push(gemini::Part::function_response(name, wrap_function_response(&text)));
                }
            }
        }

        if !parts.is_empty() {
            contents.push(gemini::Content {
                role: Some(role),
                parts,
            });
        }
    }

    let tools = request.tools.as_ref().map(|tools| {
        vec![gemini::Tool {
            function_declarations: Some(
                tools
                    .iter()
                    .map(|tool| gemini::FunctionDeclaration {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: Some(sanitize_gemini_schema(tool.input_schema.clone())),
                    })
                    .collect(),
            ),
        }]
    });

    let tool_config = request.tool_choice.as_ref().map(|choice| {
        let (mode, allowed) = match choice {
            anthropic::ToolChoice::Auto => (gemini::FunctionCallingMode::Auto, None),
            anthropic::ToolChoice::Any => (gemini::FunctionCallingMode::Any, None),
            anthropic::ToolChoice::Tool { name } => {
                (gemini::FunctionCallingMode::Any, Some(vec![name.clone()]))
            }
        };

        gemini::ToolConfig {
            function_calling_config: Some(gemini::FunctionCallingConfig {
                mode,
                allowed_function_names: allowed,
            }),
        }
    });

    Ok(gemini::GenerateRequest {
        contents,
        system_instruction,
        generation_config: Some(gemini::GenerationConfig {
            stop_sequences: request.stop_sequences.clone(),
            max_output_tokens: Some(request.max_tokens),
            temperature: clamp_temperature(request.temperature, 2.0),
            top_p: request.top_p,
            top_k: request.top_k,
            candidate_count: Some(1),
        }),
        tools,
        tool_config,
    })
}

/// Gemini → Anthropic.
///
/// Gemini function calls carry no ids, so synthetic ids are minted in order
/// and function responses are matched back by name, FIFO.
pub fn gemini_to_anthropic(request: gemini::GenerateRequest) -> ProxyResult<anthropic::MessagesRequest> {
    let system = request.system_instruction.as_ref().map(|content| {
        let text = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        anthropic::SystemPrompt::Text(text)
    });

    let mut pending_ids: HashMap<String, VecDeque<String>> = HashMap::new();
    let mut counter = 0u32;
    let mut messages = Vec::new();

    for content in &request.contents {
        let role = match content.role {
            Some(gemini::GeminiRole::Model) => anthropic::Role::Assistant,
            _ => anthropic::Role::User,
        };

        let mut blocks = Vec::new();

        for part in &content.parts {
            if let Some(text) = &part.text {
                blocks.push(anthropic::ContentBlock::Text { text: text.clone() });
            }

            if let Some(inline) = &part.inline_data {
                super::check_image_size(&inline.data)?;
                blocks.push(anthropic::ContentBlock::Image {
                    source: anthropic::ImageSource::Base64 {
                        media_type: inline.mime_type.clone(),
                        data: inline.data.clone(),
                    },
                });
            }

            if let Some(call) = &part.function_call {
                counter += 1;
                let id = format!("toolu_{counter:04}");
                pending_ids.entry(call.name.clone()).or_default().push_back(id.clone());

                blocks.push(anthropic::ContentBlock::ToolUse {
                    id,
                    name: call.name.clone(),
                    input: call.args.clone(),
                });
            }

            if let Some(response) = &part.function_response {
                let id = pending_ids
                    .get_mut(&response.name)
                    .and_then(VecDeque::pop_front)
                    .ok_or_else(|| {
                        ProxyError::InvalidRequest(format!(
                            "functionResponse '{}' has no matching functionCall",
                            response.name
                        ))
                    })?;

                blocks.push(anthropic::ContentBlock::ToolResult {
                    tool_use_id: id,
                    content: Some(anthropic::ToolResultContent::Text(unwrap_function_response(
                        &response.response,
                    ))),
                    is_error: None,
                });
            }
        }

        if !blocks.is_empty() {
            messages.push(anthropic::Message {
                role,
                content: anthropic::MessageContent::Blocks(blocks),
            });
        }
    }

    let generation = request.generation_config.as_ref();

    let tools = request
        .tools
        .as_ref()
        .map(|tools| {
            tools
                .iter()
                .flat_map(|tool| tool.function_declarations.iter().flatten())
                .map(|declaration| {
                    let input_schema = declaration
                        .parameters
                        .clone()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}}));

                    ensure_object_schema(&declaration.name, &input_schema)?;

                    Ok(anthropic::Tool {
                        name: declaration.name.clone(),
                        description: declaration.description.clone(),
                        input_schema,
                    })
                })
                .collect::<ProxyResult<Vec<_>>>()
        })
        .transpose()?;

    let tool_choice = request
        .tool_config
        .as_ref()
        .and_then(|config| config.function_calling_config.as_ref())
        .and_then(|config| match config.mode {
            gemini::FunctionCallingMode::Auto => Some(anthropic::ToolChoice::Auto),
            gemini::FunctionCallingMode::Any => match config.allowed_function_names.as_deref() {
                Some([name]) => Some(anthropic::ToolChoice::Tool { name: name.clone() }),
                _ => Some(anthropic::ToolChoice::Any),
            },
            gemini::FunctionCallingMode::None => None,
        });

    Ok(anthropic::MessagesRequest {
        model: String::new(),
        messages,
        max_tokens: generation
            .and_then(|config| config.max_output_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        system,
        temperature: clamp_temperature(generation.and_then(|config| config.temperature), 1.0),
        top_p: generation.and_then(|config| config.top_p),
        top_k: generation.and_then(|config| config.top_k),
        stop_sequences: generation.and_then(|config| config.stop_sequences.clone()),
        stream: None,
        metadata: None,
        tools,
        tool_choice,
        thinking: None,
    })
}

/// OpenAI → Gemini.
pub fn openai_to_gemini(request: openai::ChatCompletionRequest) -> ProxyResult<gemini::GenerateRequest> {
    let mut contents = Vec::new();
    let mut system_texts: Vec<String> = Vec::new();

    // Map tool_call_id back to the function name for function responses.
    let mut call_names: HashMap<String, String> = HashMap::new();

    for message in &request.messages {
        match &message.role {
            openai::ChatRole::System => system_texts.push(message.content_text()),
            openai::ChatRole::User => {
                let mut parts = Vec::new();

                match &message.content {
                    Some(openai::MessageContent::Text(text)) => parts.push(gemini::Part::text(text.clone())),
                    Some(openai::MessageContent::Parts(message_parts)) => {
                        for part in message_parts {
                            match part {
                                openai::ContentPart::Text { text } => {
                                    parts.push(gemini::Part::text(text.clone()));
                                }
                                openai::ContentPart::ImageUrl { image_url } => {
                                    let (media_type, data) =
                                        parse_data_url(&image_url.url).ok_or_else(|| {
                                            ProxyError::InvalidRequest(
                                                "Gemini upstreams require inline image data".to_string(),
                                            )
                                        })?;

                                    super::check_image_size(&data)?;
                                    parts.push(gemini::Part::inline_data(media_type, data));
                                }
                            }
                        }
                    }
                    None => {}
                }

                if !parts.is_empty() {
                    contents.push(gemini::Content {
                        role: Some(gemini::GeminiRole::User),
                        parts,
                    });
                }
            }
            openai::ChatRole::Assistant => {
                let mut parts = Vec::new();

                let text = message.content_text();
                if !text.is_empty() {
                    parts.push(gemini::Part::text(text));
                }

                for call in message.tool_calls.iter().flatten() {
                    call_names.insert(call.id.clone(), call.function.name.clone());
                    parts.push(gemini::Part::function_call(
                        call.function.name.clone(),
                        parse_tool_arguments(&call.function.arguments)?,
                    ));
                }

                if !parts.is_empty() {
                    contents.push(gemini::Content {
                        role: Some(gemini::GeminiRole::Model),
                        parts,
                    });
                }
            }
            openai::ChatRole::Tool => {
                let tool_call_id = message.tool_call_id.as_deref().ok_or_else(|| {
                    ProxyError::InvalidRequest("tool message is missing tool_call_id".to_string())
                })?;

                let name = call_names.get(tool_call_id).cloned().ok_or_else(|| {
                    ProxyError::InvalidRequest(format!(
                        "tool message references unknown tool_call_id '{tool_call_id}'"
                    ))
                })?;

                contents.push(gemini::Content {
                    role: Some(gemini::GeminiRole::User),
                    parts: vec![gemini::Part::function_response(
                        name,
                        wrap_function_response(&message.content_text()),
                    )],
                });
            }
            openai::ChatRole::Other(role) => {
                return Err(ProxyError::InvalidRequest(format!("unsupported message role '{role}'")));
            }
        }
    }

    let system_instruction = (!system_texts.is_empty()).then(|| gemini::Content {
        role: None,
        parts: vec![gemini::Part::text(system_texts.join("\n"))],
    });

    let tools = request.tools.as_ref().map(|tools| {
        vec![gemini::Tool {
            function_declarations: Some(
                tools
                    .iter()
                    .map(|tool| gemini::FunctionDeclaration {
                        name: tool.function.name.clone(),
                        description: tool.function.description.clone(),
                        parameters: tool.function.parameters.clone().map(sanitize_gemini_schema),
                    })
                    .collect(),
            ),
        }]
    });

    let tool_config = request.tool_choice.as_ref().map(|choice| {
        let (mode, allowed) = match choice {
            openai::ToolChoice::Mode(openai::ToolChoiceMode::None) => (gemini::FunctionCallingMode::None, None),
            openai::ToolChoice::Mode(openai::ToolChoiceMode::Required) => (gemini::FunctionCallingMode::Any, None),
            openai::ToolChoice::Mode(_) => (gemini::FunctionCallingMode::Auto, None),
            openai::ToolChoice::Specific { function, .. } => {
                (gemini::FunctionCallingMode::Any, Some(vec![function.name.clone()]))
            }
        };

        gemini::ToolConfig {
            function_calling_config: Some(gemini::FunctionCallingConfig {
                mode,
                allowed_function_names: allowed,
            }),
        }
    });

    Ok(gemini::GenerateRequest {
        contents,
        system_instruction,
        generation_config: Some(gemini::GenerationConfig {
            stop_sequences: request.stop.as_ref().map(|stop| stop.to_vec()),
            max_output_tokens: request.max_tokens,
            temperature: clamp_temperature(request.temperature, 2.0),
            top_p: request.top_p,
            top_k: None,
            candidate_count: Some(1),
        }),
        tools,
        tool_config,
    })
}

/// Gemini → OpenAI.
pub fn gemini_to_openai(request: gemini::GenerateRequest) -> ProxyResult<openai::ChatCompletionRequest> {
    let mut messages = Vec::new();

    if let Some(system) = &request.system_instruction {
        let text = system
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        messages.push(openai::ChatMessage::text(openai::ChatRole::System, text));
    }

    let mut pending_ids: HashMap<String, VecDeque<String>> = HashMap::new();
    let mut counter = 0u32;

    for content in &request.contents {
        match content.role {
            Some(gemini::GeminiRole::Model) => {
                let mut text = String::new();
                let mut tool_calls = Vec::new();

                for part in &content.parts {
                    if let Some(fragment) = &part.text {
                        text.push_str(fragment);
                    }

                    if let Some(call) = &part.function_call {
                        counter += 1;
                        let id = format!("call_{counter:04}");
                        pending_ids.entry(call.name.clone()).or_default().push_back(id.clone());

                        tool_calls.push(openai::ToolCall {
                            id,
                            r#type: openai::ToolType::Function,
                            function: openai::FunctionCall {
                                name: call.name.clone(),
                                arguments: call.args.to_string(),
                            },
                        });
                    }
                }

                messages.push(openai::ChatMessage {
                    role: openai::ChatRole::Assistant,
                    content: (!text.is_empty()).then(|| openai::MessageContent::Text(text)),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                    reasoning_content: None,
                });
            }
            _ => {
                let mut parts = Vec::new();

                for part in &content.parts {
                    if let Some(text) = &part.text {
                        parts.push(openai::ContentPart::Text { text: text.clone() });
                    }

                    if let Some(inline) = &part.inline_data {
                        parts.push(openai::ContentPart::ImageUrl {
                            image_url: openai::ImageUrl {
                                url: to_data_url(&inline.mime_type, &inline.data)?,
                                detail: None,
                            },
                        });
                    }

                    if let Some(response) = &part.function_response {
                        let id = pending_ids
                            .get_mut(&response.name)
                            .and_then(VecDeque::pop_front)
                            .ok_or_else(|| {
                                ProxyError::InvalidRequest(format!(
                                    "functionResponse '{}' has no matching functionCall",
                                    response.name
                                ))
                            })?;

                        messages.push(openai::ChatMessage {
                            role: openai::ChatRole::Tool,
                            content: Some(openai::MessageContent::Text(unwrap_function_response(
                                &response.response,
                            ))),
                            tool_calls: None,
                            tool_call_id: Some(id),
                            reasoning_content: None,
                        });
                    }
                }

                if !parts.is_empty() {
                    let content = match parts.as_slice() {
                        [openai::ContentPart::Text { text }] => openai::MessageContent::Text(text.clone()),
                        _ => openai::MessageContent::Parts(parts),
                    };

                    messages.push(openai::ChatMessage {
                        role: openai::ChatRole::User,
                        content: Some(content),
                        tool_calls: None,
                        tool_call_id: None,
                        reasoning_content: None,
                    });
                }
            }
        }
    }

    let generation = request.generation_config.as_ref();

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .flat_map(|tool| tool.function_declarations.iter().flatten())
            .map(|declaration| openai::Tool {
                r#type: openai::ToolType::Function,
                function: openai::FunctionDefinition {
                    name: declaration.name.clone(),
                    description: declaration.description.clone(),
                    parameters: declaration.parameters.clone(),
                },
            })
            .collect::<Vec<_>>()
    });

    let tool_choice = request
        .tool_config
        .as_ref()
        .and_then(|config| config.function_calling_config.as_ref())
        .map(|config| match (&config.mode, config.allowed_function_names.as_deref()) {
            (gemini::FunctionCallingMode::Any, Some([name])) => openai::ToolChoice::Specific {
                r#type: openai::ToolType::Function,
                function: openai::FunctionName { name: name.clone() },
            },
            (gemini::FunctionCallingMode::Any, _) => {
                openai::ToolChoice::Mode(openai::ToolChoiceMode::Required)
            }
            (gemini::FunctionCallingMode::None, _) => openai::ToolChoice::Mode(openai::ToolChoiceMode::None),
            (gemini::FunctionCallingMode::Auto, _) => openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto),
        });

    Ok(openai::ChatCompletionRequest {
        model: String::new(),
        messages,
        max_tokens: generation.and_then(|config| config.max_output_tokens),
        temperature: clamp_temperature(generation.and_then(|config| config.temperature), 2.0),
        top_p: generation.and_then(|config| config.top_p),
        frequency_penalty: None,
        presence_penalty: None,
        stop: generation
            .and_then(|config| config.stop_sequences.clone())
            .map(openai::StopSequences::Many),
        stream: None,
        tools,
        tool_choice,
    })
}
