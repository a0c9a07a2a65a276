use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProxyError;

/// Request body for the Anthropic Messages API.
///
/// The format differs from OpenAI's in several key ways:
/// - messages carry content arrays rather than plain strings
/// - the system prompt is separate from the messages array
/// - tool use is expressed as `tool_use`/`tool_result` content blocks
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessagesRequest {
    /// The model to use for the completion.
    pub model: String,

    /// The conversation so far. Roles alternate between "user" and "assistant".
    pub messages: Vec<Message>,

    /// Maximum number of tokens to generate. Required by the wire format.
    pub max_tokens: u32,

    /// System prompt, either a plain string or an array of text blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    /// Controls randomness in the response. Range: 0.0 to 1.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Only sample from the top K tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Sequences that will cause the model to stop generating.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Whether to stream the response as Server-Sent Events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Custom metadata to attach to the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Tools available for the model to use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// Controls how the model uses tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Extended thinking configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
}

impl MessagesRequest {
    /// Whether the caller asked for reasoning content.
    pub fn wants_thinking(&self) -> bool {
        matches!(self.thinking, Some(ThinkingConfig::Enabled { .. }))
    }
}

/// System prompt: a bare string or a list of text blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    /// Plain string form.
    Text(String),
    /// Block-list form.
    Blocks(Vec<SystemBlock>),
}

impl SystemPrompt {
    /// Flatten either form into one string.
    pub fn flattened(&self) -> String {
        match self {
            SystemPrompt::Text(text) => text.clone(),
            SystemPrompt::Blocks(blocks) => blocks
                .iter()
                .map(|block| {
                    let SystemBlock::Text { text } = block;
                    text.as_str()
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One block of a block-form system prompt.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemBlock {
    /// Text system content.
    Text {
        /// The text content.
        text: String,
    },
}

/// An Anthropic message with role and content.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    /// The role of the message sender.
    pub role: Role,

    /// Either a plain string or an array of content blocks.
    pub content: MessageContent,
}

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message.
    User,
    /// Assistant message.
    Assistant,
}

/// Message content: the wire accepts both a bare string and a block array.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Shorthand string form, equivalent to one text block.
    Text(String),
    /// Full block-array form.
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// View the content as a block slice, promoting the string shorthand.
    pub fn to_blocks(&self) -> Vec<ContentBlock> {
        match self {
            MessageContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            MessageContent::Blocks(blocks) => blocks.clone(),
        }
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// Content block in an Anthropic message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text content.
    Text {
        /// The text content.
        text: String,
    },

    /// Reasoning content surfaced as a distinct block.
    Thinking {
        /// The reasoning text.
        thinking: String,
    },

    /// Image content.
    Image {
        /// The image source.
        source: ImageSource,
    },

    /// Tool use request from the assistant.
    ToolUse {
        /// Unique identifier for this tool use.
        id: String,
        /// Name of the tool to use.
        name: String,
        /// Input parameters for the tool.
        input: Value,
    },

    /// Result from a tool execution, carried on a user message.
    ToolResult {
        /// The tool use ID this result corresponds to.
        tool_use_id: String,
        /// The result content.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ToolResultContent>,
        /// Whether the tool execution failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Content of a tool result: a bare string or nested blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    /// Shorthand string form.
    Text(String),
    /// Nested block form.
    Blocks(Vec<ContentBlock>),
}

impl ToolResultContent {
    /// Flatten either form into one string.
    pub fn flattened(&self) -> String {
        match self {
            ToolResultContent::Text(text) => text.clone(),
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// Image source for image content blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// Inline base64 payload.
    Base64 {
        /// The media type, e.g. "image/png".
        media_type: String,
        /// Base64-encoded image data.
        data: String,
    },
    /// Remote image by URL.
    Url {
        /// The image URL.
        url: String,
    },
}

/// Metadata for the request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Metadata {
    /// Optional user identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Tool definition in Anthropic format.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tool {
    /// The name of the tool.
    pub name: String,

    /// Description of what the tool does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

/// Tool choice configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// Let the model decide whether to use tools.
    Auto,

    /// Force the model to use any available tool.
    Any,

    /// Force the model to use a specific tool.
    Tool {
        /// The name of the tool to use.
        name: String,
    },
}

/// Extended thinking configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThinkingConfig {
    /// Reasoning requested, with an optional token budget.
    Enabled {
        /// Token budget for the reasoning phase.
        #[serde(skip_serializing_if = "Option::is_none")]
        budget_tokens: Option<u32>,
    },
    /// Reasoning explicitly disabled.
    Disabled,
}

/// Response from the Anthropic Messages API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Unique identifier for this completion.
    pub id: String,

    /// The type of response, always "message" for completions.
    pub r#type: String,

    /// The role of the response, always "assistant".
    pub role: Role,

    /// The content of the response.
    pub content: Vec<ContentBlock>,

    /// The model that generated the response.
    pub model: String,

    /// Stop reason for the completion.
    pub stop_reason: Option<StopReason>,

    /// Stop sequence that caused the model to stop, if any.
    pub stop_sequence: Option<String>,

    /// Token usage statistics.
    pub usage: Usage,
}

/// The reason why the model stopped generating tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model reached a natural stopping point.
    EndTurn,
    /// The generation exceeded the maximum token limit.
    MaxTokens,
    /// The model encountered a stop sequence from the request.
    StopSequence,
    /// The model invoked a tool.
    ToolUse,
    /// The stream was cut short by an upstream failure.
    Error,
    /// Any other stop reason not yet known.
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndTurn => write!(f, "end_turn"),
            StopReason::MaxTokens => write!(f, "max_tokens"),
            StopReason::StopSequence => write!(f, "stop_sequence"),
            StopReason::ToolUse => write!(f, "tool_use"),
            StopReason::Error => write!(f, "error"),
            StopReason::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Token usage statistics in Anthropic format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Number of input tokens.
    #[serde(default)]
    pub input_tokens: u32,

    /// Number of output tokens.
    #[serde(default)]
    pub output_tokens: u32,
}

/// Body of the count_tokens endpoint.
///
/// Same shape as [`MessagesRequest`] minus the generation parameters, which
/// the wire format does not require for counting.
#[derive(Debug, Clone, Deserialize)]
pub struct CountTokensRequest {
    /// The model the count is for.
    pub model: String,

    /// The conversation to count.
    pub messages: Vec<Message>,

    /// System prompt included in the count.
    #[serde(default)]
    pub system: Option<SystemPrompt>,

    /// Tools included in the count.
    #[serde(default)]
    pub tools: Option<Vec<Tool>>,
}

impl CountTokensRequest {
    /// Promote to a full request so routing heuristics can run.
    pub fn into_messages_request(self) -> MessagesRequest {
        MessagesRequest {
            model: self.model,
            messages: self.messages,
            max_tokens: 1,
            system: self.system,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            stream: None,
            metadata: None,
            tools: self.tools,
            tool_choice: None,
            thinking: None,
        }
    }
}

/// Reply of the count_tokens endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountTokensResponse {
    /// Estimated number of input tokens.
    pub input_tokens: u32,
}

/// Error details in Anthropic format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The type of error that occurred.
    #[serde(rename = "type")]
    pub error_type: String,

    /// Human-readable error message.
    pub message: String,
}

/// Error response envelope in Anthropic format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always "error".
    #[serde(rename = "type")]
    pub response_type: String,

    /// Error details.
    pub error: ErrorBody,
}

impl From<ProxyError> for ErrorResponse {
    fn from(error: ProxyError) -> Self {
        Self {
            response_type: "error".to_string(),
            error: ErrorBody {
                error_type: error.anthropic_type().to_string(),
                message: error.client_message(),
            },
        }
    }
}

/// Model information in Anthropic format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// The model identifier.
    pub id: String,

    /// Always "model".
    #[serde(rename = "type")]
    pub model_type: String,

    /// Display name for the model.
    pub display_name: String,

    /// Unix timestamp when the model was created.
    pub created_at: u64,
}

/// Response for listing available models in Anthropic format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    /// List of available models.
    pub data: Vec<Model>,

    /// Whether there are more models to fetch.
    pub has_more: bool,
}

/// Streaming event types for Anthropic SSE responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// Start of a message.
    #[serde(rename = "message_start")]
    MessageStart {
        /// The initial message metadata.
        message: StreamMessageStart,
    },

    /// Content block start.
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        /// The index of the content block.
        index: u32,
        /// The content block being started.
        content_block: ContentBlock,
    },

    /// Incremental content update.
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta {
        /// The index of the content block.
        index: u32,
        /// The delta update.
        delta: ContentDelta,
    },

    /// Content block finished.
    #[serde(rename = "content_block_stop")]
    ContentBlockStop {
        /// The index of the content block.
        index: u32,
    },

    /// Final message metadata: stop reason and usage.
    #[serde(rename = "message_delta")]
    MessageDelta {
        /// Delta update for the message.
        delta: MessageDeltaBody,
        /// Updated usage statistics.
        usage: Usage,
    },

    /// End of message stream.
    #[serde(rename = "message_stop")]
    MessageStop,

    /// Ping event to keep the connection alive.
    #[serde(rename = "ping")]
    Ping,

    /// Error event.
    #[serde(rename = "error")]
    Error {
        /// The error that occurred.
        error: ErrorBody,
    },
}

impl StreamEvent {
    /// SSE `event:` field name for this event.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::ContentBlockStop { .. } => "content_block_stop",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Ping => "ping",
            StreamEvent::Error { .. } => "error",
        }
    }
}

/// Initial message metadata for streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessageStart {
    /// Unique message ID.
    pub id: String,

    /// Always "message".
    #[serde(rename = "type")]
    pub message_type: String,

    /// Always "assistant".
    pub role: Role,

    /// Initial empty content array.
    pub content: Vec<ContentBlock>,

    /// The model being used.
    pub model: String,

    /// Initial usage statistics.
    pub usage: Usage,
}

impl StreamMessageStart {
    /// Fresh assistant message envelope for the start of a stream.
    pub fn new(id: String, model: String) -> Self {
        Self {
            id,
            message_type: "message".to_string(),
            role: Role::Assistant,
            content: Vec::new(),
            model,
            usage: Usage::default(),
        }
    }
}

/// Delta update for content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentDelta {
    /// Text delta.
    #[serde(rename = "text_delta")]
    TextDelta {
        /// Additional text content.
        text: String,
    },

    /// Tool use input delta.
    #[serde(rename = "input_json_delta")]
    InputJsonDelta {
        /// Partial JSON string for tool input.
        partial_json: String,
    },

    /// Reasoning delta.
    #[serde(rename = "thinking_delta")]
    ThinkingDelta {
        /// Additional reasoning text.
        thinking: String,
    },
}

/// Message delta for streaming responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    /// Stop reason if the message is complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,

    /// Stop sequence if one was encountered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}
