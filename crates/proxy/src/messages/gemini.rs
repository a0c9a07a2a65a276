use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the Gemini GenerateContent API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// The conversation so far. Roles alternate between "user" and "model".
    pub contents: Vec<Content>,

    /// System prompt, separate from the contents.
    #[serde(default, alias = "system_instruction", skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,

    /// Sampling and output configuration.
    #[serde(default, alias = "generation_config", skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,

    /// Tools the model may use to generate the next response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// Configuration for the tools specified in the request.
    #[serde(default, alias = "tool_config", skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
}

/// A content entry: one turn of the conversation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Content {
    /// The producer of this content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<GeminiRole>,

    /// Ordered parts of this turn.
    pub parts: Vec<Part>,
}

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeminiRole {
    /// Caller-provided content, including tool responses.
    User,
    /// Model-generated content.
    Model,
}

/// One part of a content entry.
///
/// Gemini multiplexes part kinds through optional fields rather than a tag;
/// exactly one of the fields is expected to be set.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Plain text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Inline binary data, e.g. an image.
    #[serde(default, alias = "inline_data", skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,

    /// A function call issued by the model.
    #[serde(default, alias = "function_call", skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,

    /// A function result provided by the caller.
    #[serde(default, alias = "function_response", skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,

    /// Marks reasoning parts when the model exposes them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

impl Part {
    /// A plain text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// An inline data part.
    pub fn inline_data(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
            ..Default::default()
        }
    }

    /// A function call part.
    pub fn function_call(name: impl Into<String>, args: Value) -> Self {
        Self {
            function_call: Some(FunctionCall {
                name: name.into(),
                args,
            }),
            ..Default::default()
        }
    }

    /// A function response part.
    pub fn function_response(name: impl Into<String>, response: Value) -> Self {
        Self {
            function_response: Some(FunctionResponse {
                name: name.into(),
                response,
            }),
            ..Default::default()
        }
    }
}

/// Inline binary data.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// The media type, e.g. "image/png".
    pub mime_type: String,

    /// Base64-encoded payload.
    pub data: String,
}

/// A function call issued by the model.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionCall {
    /// The function name.
    pub name: String,

    /// Arguments as a JSON object, already parsed.
    #[serde(default)]
    pub args: Value,
}

/// A function result provided by the caller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionResponse {
    /// The function name the result answers.
    pub name: String,

    /// The result as a JSON object.
    pub response: Value,
}

/// Sampling and output configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Sequences that stop output generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Maximum number of tokens in a candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Controls randomness. Range: 0.0 to 2.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Top-K sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Number of candidates to generate; this proxy always asks for 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,
}

/// Tool declarations for function calling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// The function declarations the model can call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_declarations: Option<Vec<FunctionDeclaration>>,
}

/// Declaration of a callable function.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionDeclaration {
    /// The function name.
    pub name: String,

    /// Description of what the function does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Parameters in JSON Schema format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Configuration for function calling behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    /// How the model should use the provided functions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_calling_config: Option<FunctionCallingConfig>,
}

/// Mode and allowed functions for function calling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallingConfig {
    /// The calling mode.
    pub mode: FunctionCallingMode,

    /// Functions the model may call. Empty means any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_function_names: Option<Vec<String>>,
}

/// Function calling modes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionCallingMode {
    /// Model cannot call functions.
    None,
    /// Model decides whether to call functions.
    Auto,
    /// Model must call at least one function.
    Any,
}

/// Response from the Gemini GenerateContent API.
///
/// Streaming chunks reuse this exact shape, progressively filled.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// Generated candidates; this proxy always requests exactly one.
    #[serde(default)]
    pub candidates: Vec<Candidate>,

    /// Token usage, present on the final chunk of a stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
}

/// A streamed Gemini chunk carries the same shape as a full response.
pub type StreamChunk = GenerateResponse;

/// One generated candidate.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// The generated content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    /// Why generation stopped, present on the final chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,

    /// Candidate index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

/// The reason why the model stopped generating tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    /// Natural stop or stop sequence hit.
    Stop,
    /// Maximum token limit reached.
    MaxTokens,
    /// Content blocked for safety.
    Safety,
    /// Content blocked for recitation.
    Recitation,
    /// Any other finish reason not yet known.
    #[serde(untagged)]
    Other(String),
}

/// Token usage statistics in Gemini format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    /// Number of prompt tokens.
    #[serde(default)]
    pub prompt_token_count: u32,

    /// Number of generated tokens across candidates.
    #[serde(default)]
    pub candidates_token_count: u32,

    /// Sum of the two.
    #[serde(default)]
    pub total_token_count: u32,
}

/// Error response envelope in Gemini format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorStatus,
}

/// Error details in Gemini format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorStatus {
    /// Numeric HTTP status.
    pub code: u16,

    /// Human-readable error message.
    pub message: String,

    /// Canonical status name.
    pub status: String,
}

impl ErrorResponse {
    /// Build an error envelope from a status code and message.
    pub fn new(code: u16, message: String) -> Self {
        let status = match code {
            400 => "INVALID_ARGUMENT",
            401 => "UNAUTHENTICATED",
            403 => "PERMISSION_DENIED",
            404 => "NOT_FOUND",
            429 => "RESOURCE_EXHAUSTED",
            500 => "INTERNAL",
            503 => "UNAVAILABLE",
            504 => "DEADLINE_EXCEEDED",
            _ => "UNKNOWN",
        };

        Self {
            error: ErrorStatus {
                code,
                message,
                status: status.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialize_request_uses_camel_case() {
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some(GeminiRole::User),
                parts: vec![Part::text("2+2?")],
            }],
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::text("Be terse.")],
            }),
            generation_config: Some(GenerationConfig {
                max_output_tokens: Some(5),
                ..Default::default()
            }),
            tools: None,
            tool_config: None,
        };

        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Be terse.");
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 5);
    }

    #[test]
    fn deserialize_function_call_chunk() {
        let chunk: StreamChunk = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"functionCall": {"name": "get_weather", "args": {"location": "Paris"}}}]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 7, "totalTokenCount": 19}
        }))
        .unwrap();

        let candidate = &chunk.candidates[0];
        assert_eq!(candidate.finish_reason, Some(FinishReason::Stop));

        let part = &candidate.content.as_ref().unwrap().parts[0];
        let call = part.function_call.as_ref().unwrap();
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.args["location"], "Paris");
    }

    #[test]
    fn unknown_finish_reason_is_preserved() {
        let reason: FinishReason = serde_json::from_value(json!("BLOCKLIST")).unwrap();
        assert_eq!(reason, FinishReason::Other("BLOCKLIST".to_string()));
    }

    #[test]
    fn error_envelope_status_names() {
        let error = ErrorResponse::new(429, "slow down".to_string());
        assert_eq!(error.error.status, "RESOURCE_EXHAUSTED");
    }
}
