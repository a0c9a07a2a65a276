use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for OpenAI-compatible Chat Completions.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    /// The model to use for the completion.
    pub model: String,

    /// The conversation so far, including the optional leading system message.
    pub messages: Vec<ChatMessage>,

    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Controls randomness in the response. Range: 0.0 to 2.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Penalize new tokens based on their frequency so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    /// Penalize new tokens that already appeared at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    /// Up to 4 sequences where generation stops.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,

    /// Whether to stream the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Tools available for the model to use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// Controls how the model uses tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

/// Stop sequences: the wire accepts a bare string or a list.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum StopSequences {
    /// Single stop sequence.
    One(String),
    /// Multiple stop sequences, at most 4.
    Many(Vec<String>),
}

impl StopSequences {
    /// Normalize to a list.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StopSequences::One(stop) => vec![stop.clone()],
            StopSequences::Many(stops) => stops.clone(),
        }
    }
}

/// One message of an OpenAI conversation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    /// The role of the message sender.
    pub role: ChatRole,

    /// Message content, a plain string or multimodal parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,

    /// Tool calls issued by the assistant, parallel to the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// For role=tool messages: which call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Reasoning content, surfaced by providers that expose chain-of-thought.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl ChatMessage {
    /// Plain-text message constructor.
    pub fn text(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: None,
            reasoning_content: None,
        }
    }

    /// Concatenated text of the content, ignoring non-text parts.
    pub fn content_text(&self) -> String {
        match &self.content {
            Some(content) => content.text(),
            None => String::new(),
        }
    }
}

/// Role of a message sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System prompt message.
    System,
    /// User message.
    User,
    /// Assistant message.
    Assistant,
    /// Tool result message.
    Tool,
    /// Any other role not yet known.
    #[serde(untagged)]
    Other(String),
}

/// Message content: the wire accepts both a string and a part array.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain string form.
    Text(String),
    /// Multimodal part array.
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// One part of a multimodal message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text part.
    Text {
        /// The text content.
        text: String,
    },

    /// Image part, referenced by URL or `data:` URL.
    ImageUrl {
        /// The image reference.
        image_url: ImageUrl,
    },
}

/// Image reference within a content part.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageUrl {
    /// Plain URL or a `data:<media>;base64,<payload>` URL.
    pub url: String,

    /// Optional detail hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Tool definition in OpenAI format.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tool {
    /// Always "function".
    pub r#type: ToolType,

    /// The function declaration.
    pub function: FunctionDefinition,
}

/// The only tool type OpenAI defines today.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    /// A callable function.
    Function,
}

/// Function declaration within a tool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionDefinition {
    /// The function name.
    pub name: String,

    /// Description of what the function does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the function parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Tool choice configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// One of the mode keywords.
    Mode(ToolChoiceMode),

    /// Force a specific function.
    Specific {
        /// Always "function".
        r#type: ToolType,
        /// The function to force.
        function: FunctionName,
    },
}

/// Tool choice mode keywords.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    /// Model cannot call tools.
    None,
    /// Model decides whether to call tools.
    Auto,
    /// Model must call at least one tool.
    Required,
    /// Any other mode not yet known.
    #[serde(untagged)]
    Other(String),
}

/// Function reference inside a specific tool choice.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionName {
    /// The function name.
    pub name: String,
}

/// A completed tool call on an assistant message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolCall {
    /// Unique identifier for this call.
    pub id: String,

    /// Always "function".
    pub r#type: ToolType,

    /// The invoked function with its serialized arguments.
    pub function: FunctionCall,
}

/// Function name and arguments of a tool call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionCall {
    /// The function name.
    pub name: String,

    /// The arguments as a JSON-encoded string.
    pub arguments: String,
}

/// Response from OpenAI-compatible Chat Completions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Unique identifier for this completion.
    pub id: String,

    /// Always "chat.completion".
    pub object: String,

    /// Unix timestamp of creation.
    pub created: u64,

    /// The model that generated the response.
    pub model: String,

    /// Generated choices; exactly one for this proxy.
    pub choices: Vec<ChatChoice>,

    /// Token usage statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One generated choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    /// Choice index, 0-based.
    pub index: u32,

    /// The generated message.
    pub message: ChatMessage,

    /// Why generation stopped.
    pub finish_reason: Option<FinishReason>,
}

/// The reason why the model stopped generating tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop or stop sequence hit.
    Stop,
    /// Maximum token limit reached.
    Length,
    /// The model invoked tools.
    ToolCalls,
    /// Content was filtered.
    ContentFilter,
    /// Any other finish reason not yet known.
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::Length => write!(f, "length"),
            FinishReason::ToolCalls => write!(f, "tool_calls"),
            FinishReason::ContentFilter => write!(f, "content_filter"),
            FinishReason::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Token usage statistics in OpenAI format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Number of prompt tokens.
    #[serde(default)]
    pub prompt_tokens: u32,

    /// Number of completion tokens.
    #[serde(default)]
    pub completion_tokens: u32,

    /// Sum of the two.
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Build usage from the two counters, recomputing the total.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// One streamed chunk of a chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Unique identifier, stable across all chunks of a stream.
    pub id: String,

    /// Always "chat.completion.chunk".
    pub object: String,

    /// Unix timestamp of creation.
    pub created: u64,

    /// The model that generated the response.
    pub model: String,

    /// Incremental choices; exactly one for this proxy.
    pub choices: Vec<ChunkChoice>,

    /// Usage statistics, present on the final chunk when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletionChunk {
    /// A chunk carrying one delta for choice 0.
    pub fn of_delta(id: &str, model: &str, created: u64, delta: MessageDelta) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
        }
    }
}

/// One incremental choice within a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Choice index, 0-based.
    pub index: u32,

    /// The incremental delta.
    pub delta: MessageDelta,

    /// Set on the final content chunk.
    pub finish_reason: Option<FinishReason>,
}

/// Incremental message delta within a chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDelta {
    /// The role, present on the first chunk only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,

    /// Text fragment to append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Reasoning fragment, surfaced by providers that expose chain-of-thought.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    /// Incremental tool call fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Incremental tool call fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position within the parallel tool call array.
    pub index: u32,

    /// The call id, present on the opening fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Always "function" when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<ToolType>,

    /// Name/argument fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

/// Function fragments of a streamed tool call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionDelta {
    /// The function name, present on the opening fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Argument fragment to append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Model information in OpenAI format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// The model identifier.
    pub id: String,

    /// Always "model".
    pub object: String,

    /// Unix timestamp when the model was created.
    pub created: u64,

    /// Organization owning the model.
    pub owned_by: String,
}

/// Response for listing available models in OpenAI format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    /// Always "list".
    pub object: String,

    /// List of available models.
    pub data: Vec<Model>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialize_request_with_tools() {
        let json = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "What's the weather in Paris?"}
            ],
            "max_tokens": 100,
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_weather",
                    "description": "Get the weather for a location",
                    "parameters": {
                        "type": "object",
                        "properties": {"location": {"type": "string"}},
                        "required": ["location"]
                    }
                }
            }],
            "tool_choice": "auto"
        });

        let request: ChatCompletionRequest = serde_json::from_value(json).unwrap();

        assert_eq!(request.messages[0].role, ChatRole::System);
        assert_eq!(request.tools.as_ref().unwrap()[0].function.name, "get_weather");
        assert!(matches!(
            request.tool_choice,
            Some(ToolChoice::Mode(ToolChoiceMode::Auto))
        ));
    }

    #[test]
    fn deserialize_specific_tool_choice() {
        let choice: ToolChoice = serde_json::from_value(json!({
            "type": "function",
            "function": {"name": "get_weather"}
        }))
        .unwrap();

        let ToolChoice::Specific { function, .. } = choice else {
            unreachable!("Expected specific tool choice");
        };
        assert_eq!(function.name, "get_weather");
    }

    #[test]
    fn deserialize_streaming_tool_call_fragments() {
        let chunk: ChatCompletionChunk = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "delta": {
                    "tool_calls": [{
                        "index": 0,
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": ""}
                    }]
                },
                "finish_reason": null
            }]
        }))
        .unwrap();

        let delta = &chunk.choices[0].delta;
        let call = &delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id.as_deref(), Some("call_1"));
        assert_eq!(call.function.as_ref().unwrap().name.as_deref(), Some("get_weather"));
    }

    #[test]
    fn stop_forms() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [],
            "stop": "END"
        }))
        .unwrap();
        assert_eq!(request.stop.unwrap().to_vec(), vec!["END"]);

        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [],
            "stop": ["a", "b"]
        }))
        .unwrap();
        assert_eq!(request.stop.unwrap().to_vec().len(), 2);
    }

    #[test]
    fn unknown_finish_reason_is_preserved() {
        let reason: FinishReason = serde_json::from_value(json!("pause")).unwrap();
        assert_eq!(reason, FinishReason::Other("pause".to_string()));
    }

    #[test]
    fn multimodal_content_text() {
        let message: ChatMessage = serde_json::from_value(json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "What is "},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,aWhvb3A="}},
                {"type": "text", "text": "this?"}
            ]
        }))
        .unwrap();

        assert_eq!(message.content_text(), "What is this?");
    }
}
