//! Pairwise request and response translation between the three formats.
//!
//! The caller's format is ground truth for the outer envelope of the reply;
//! conversions never route through a shared intermediate representation.

pub mod request;
pub mod response;

use base64::Engine as _;
use serde_json::{Value, json};

use crate::error::{ProxyError, ProxyResult};

/// Hard cap on decoded image payloads.
pub(crate) const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Fallback when a format that requires max_tokens receives a request without one.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

pub(crate) fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Render an inline image as an OpenAI `data:` URL.
pub(crate) fn to_data_url(media_type: &str, data: &str) -> ProxyResult<String> {
    check_image_size(data)?;
    Ok(format!("data:{media_type};base64,{data}"))
}

/// Split a `data:<media>;base64,<payload>` URL back into its pieces.
pub(crate) fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (media_type, payload) = rest.split_once(";base64,")?;

    Some((media_type.to_string(), payload.to_string()))
}

pub(crate) fn check_image_size(base64_data: &str) -> ProxyResult<()> {
    // 4 base64 chars encode 3 bytes; close enough without decoding.
    let decoded_len = base64_data.len() / 4 * 3;

    if decoded_len > MAX_IMAGE_BYTES {
        return Err(ProxyError::InvalidRequest(format!(
            "image exceeds the {} MiB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }

    // Reject payloads that are not actually base64 early, before the upstream does.
    if base64_data.len() < 4096 {
        base64::engine::general_purpose::STANDARD
            .decode(base64_data)
            .map_err(|_| ProxyError::InvalidRequest("image data is not valid base64".to_string()))?;
    }

    Ok(())
}

/// Parse the JSON-string arguments of an OpenAI tool call.
///
/// An empty string means "no arguments" and becomes `{}`.
pub(crate) fn parse_tool_arguments(arguments: &str) -> ProxyResult<Value> {
    if arguments.trim().is_empty() {
        return Ok(json!({}));
    }

    serde_json::from_str(arguments)
        .map_err(|e| ProxyError::InvalidRequest(format!("tool call arguments are not valid JSON: {e}")))
}

/// Require a tool input schema to be a JSON object.
pub(crate) fn ensure_object_schema(name: &str, schema: &Value) -> ProxyResult<()> {
    if !schema.is_object() {
        return Err(ProxyError::InvalidRequest(format!(
            "tool '{name}': input schema must be a JSON object"
        )));
    }

    Ok(())
}

/// Gemini requires function_response.response to be a JSON object; wrap
/// anything else under a "result" key.
pub(crate) fn wrap_function_response(content: &str) -> Value {
    match serde_json::from_str::<Value>(content) {
        Ok(value) if value.is_object() => value,
        _ => json!({ "result": content }),
    }
}

/// Inverse of [`wrap_function_response`]: unwrap a bare `{"result": ...}`
/// envelope back to its string payload.
pub(crate) fn unwrap_function_response(response: &Value) -> String {
    if let Some(object) = response.as_object()
        && object.len() == 1
        && let Some(Value::String(result)) = object.get("result")
    {
        return result.clone();
    }

    response.to_string()
}

/// Recursively remove JSON Schema fields Gemini rejects.
pub(crate) fn sanitize_gemini_schema(mut value: Value) -> Value {
    if let Some(obj) = value.as_object_mut() {
        obj.remove("additionalProperties");
        obj.remove("$schema");
        obj.remove("default");

        // Gemini only understands "enum" and "date-time" string formats.
        if obj.get("type").and_then(|v| v.as_str()) == Some("string")
            && let Some(format) = obj.get("format").and_then(|v| v.as_str())
            && format != "enum"
            && format != "date-time"
        {
            obj.remove("format");
        }

        if let Some(properties) = obj.get_mut("properties")
            && let Some(props_obj) = properties.as_object_mut()
        {
            for (_, prop_value) in props_obj.iter_mut() {
                *prop_value = sanitize_gemini_schema(prop_value.take());
            }
        }

        if let Some(items) = obj.get_mut("items") {
            *items = sanitize_gemini_schema(items.take());
        }
    }

    value
}

pub(crate) fn clamp_temperature(temperature: Option<f32>, max: f32) -> Option<f32> {
    temperature.map(|t| t.clamp(0.0, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_strips_unsupported_schema_fields() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "properties": {
                "field1": {"type": "string", "format": "uri"},
                "nested": {
                    "type": "object",
                    "properties": {"subfield": {"type": "number", "default": 1}},
                    "additionalProperties": false
                },
                "array_field": {
                    "type": "array",
                    "items": {"type": "object", "additionalProperties": true}
                }
            },
            "additionalProperties": false
        });

        let cleaned = sanitize_gemini_schema(schema);

        assert!(cleaned.get("$schema").is_none());
        assert!(cleaned.get("additionalProperties").is_none());
        assert!(cleaned["properties"]["nested"].get("additionalProperties").is_none());
        assert!(cleaned["properties"]["nested"]["properties"]["subfield"].get("default").is_none());
        assert!(cleaned["properties"]["array_field"]["items"].get("additionalProperties").is_none());
        assert!(cleaned["properties"]["field1"].get("format").is_none());
        assert_eq!(cleaned["type"], "object");
    }

    #[test]
    fn tool_arguments_edge_cases() {
        assert_eq!(parse_tool_arguments("").unwrap(), json!({}));
        assert_eq!(parse_tool_arguments("  ").unwrap(), json!({}));
        assert_eq!(
            parse_tool_arguments(r#"{"location":"Paris"}"#).unwrap(),
            json!({"location": "Paris"})
        );
        assert!(parse_tool_arguments("{not json").is_err());
    }

    #[test]
    fn function_response_round_trip() {
        let wrapped = wrap_function_response("22°C and sunny");
        assert_eq!(wrapped, json!({"result": "22°C and sunny"}));
        assert_eq!(unwrap_function_response(&wrapped), "22°C and sunny");

        let object = wrap_function_response(r#"{"temp": 22}"#);
        assert_eq!(object, json!({"temp": 22}));
    }

    #[test]
    fn data_url_round_trip() {
        let url = to_data_url("image/png", "aWhvb3A=").unwrap();
        assert_eq!(url, "data:image/png;base64,aWhvb3A=");

        let (media_type, data) = parse_data_url(&url).unwrap();
        assert_eq!(media_type, "image/png");
        assert_eq!(data, "aWhvb3A=");
    }

    #[test]
    fn oversized_image_rejected() {
        let data = "A".repeat(MAX_IMAGE_BYTES * 4 / 3 + 8);
        assert!(check_image_size(&data).is_err());
    }
}
