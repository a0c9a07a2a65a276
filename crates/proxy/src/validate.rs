//! Inbound request validation shared by all entry points.
//!
//! Conversion assumes these invariants already hold, so every inbound path
//! runs its format's check before anything else touches the request.

use crate::{
    error::{ProxyError, ProxyResult},
    messages::{anthropic, gemini, openai},
};

const MAX_STOP_SEQUENCES: usize = 4;

/// The shared inbound invariant. Formats with a tighter wire range get
/// narrowed during conversion, not rejected here.
const MAX_TEMPERATURE: f32 = 2.0;

fn check_temperature(temperature: Option<f32>) -> ProxyResult<()> {
    if let Some(t) = temperature
        && !(0.0..=MAX_TEMPERATURE).contains(&t)
    {
        return Err(ProxyError::InvalidRequest(format!(
            "temperature must be within 0..={MAX_TEMPERATURE}, got {t}"
        )));
    }

    Ok(())
}

fn check_stop_sequences(count: usize) -> ProxyResult<()> {
    if count > MAX_STOP_SEQUENCES {
        return Err(ProxyError::InvalidRequest(format!(
            "at most {MAX_STOP_SEQUENCES} stop sequences are supported, got {count}"
        )));
    }

    Ok(())
}

pub fn validate_anthropic(request: &anthropic::MessagesRequest) -> ProxyResult<()> {
    if request.messages.is_empty() {
        return Err(ProxyError::InvalidRequest("messages must not be empty".to_string()));
    }

    if request.max_tokens == 0 {
        return Err(ProxyError::InvalidRequest("max_tokens must be at least 1".to_string()));
    }

    check_temperature(request.temperature)?;
    check_stop_sequences(request.stop_sequences.as_ref().map_or(0, Vec::len))?;

    for tool in request.tools.iter().flatten() {
        if !tool.input_schema.is_object() {
            return Err(ProxyError::InvalidRequest(format!(
                "tool '{}': input_schema must be a JSON object",
                tool.name
            )));
        }
    }

    Ok(())
}

pub fn validate_openai(request: &openai::ChatCompletionRequest) -> ProxyResult<()> {
    if request.messages.is_empty() {
        return Err(ProxyError::InvalidRequest("messages must not be empty".to_string()));
    }

    if request.max_tokens == Some(0) {
        return Err(ProxyError::InvalidRequest("max_tokens must be at least 1".to_string()));
    }

    check_temperature(request.temperature)?;
    check_stop_sequences(request.stop.as_ref().map_or(0, |stop| stop.to_vec().len()))?;

    for tool in request.tools.iter().flatten() {
        if let Some(parameters) = &tool.function.parameters
            && !parameters.is_object()
        {
            return Err(ProxyError::InvalidRequest(format!(
                "tool '{}': parameters must be a JSON object",
                tool.function.name
            )));
        }
    }

    Ok(())
}

pub fn validate_gemini(request: &gemini::GenerateRequest) -> ProxyResult<()> {
    if request.contents.is_empty() {
        return Err(ProxyError::InvalidRequest("contents must not be empty".to_string()));
    }

    if let Some(config) = &request.generation_config {
        if config.max_output_tokens == Some(0) {
            return Err(ProxyError::InvalidRequest(
                "maxOutputTokens must be at least 1".to_string(),
            ));
        }

        check_temperature(config.temperature)?;
        check_stop_sequences(config.stop_sequences.as_ref().map_or(0, Vec::len))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_messages_rejected() {
        let request: anthropic::MessagesRequest = serde_json::from_value(json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 10,
            "messages": []
        }))
        .unwrap();

        assert!(matches!(
            validate_anthropic(&request),
            Err(ProxyError::InvalidRequest(_))
        ));
    }

    #[test]
    fn zero_max_tokens_rejected() {
        let request: anthropic::MessagesRequest = serde_json::from_value(json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 0,
            "messages": [{"role": "user", "content": "Hi"}]
        }))
        .unwrap();

        assert!(matches!(
            validate_anthropic(&request),
            Err(ProxyError::InvalidRequest(_))
        ));
    }

    #[test]
    fn too_many_stop_sequences_rejected() {
        let request: openai::ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "Hi"}],
            "stop": ["a", "b", "c", "d", "e"]
        }))
        .unwrap();

        assert!(validate_openai(&request).is_err());
    }

    #[test]
    fn non_object_schema_rejected() {
        let request: anthropic::MessagesRequest = serde_json::from_value(json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "Hi"}],
            "tools": [{"name": "f", "input_schema": "not an object"}]
        }))
        .unwrap();

        assert!(validate_anthropic(&request).is_err());
    }

    #[test]
    fn out_of_range_temperature_rejected() {
        // 1.5 is within the shared 0..=2 invariant for every format; the
        // conversion layer narrows it for targets with a tighter range.
        let request: anthropic::MessagesRequest = serde_json::from_value(json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "Hi"}],
            "temperature": 1.5
        }))
        .unwrap();

        assert!(validate_anthropic(&request).is_ok());

        let request: openai::ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "Hi"}],
            "temperature": 1.5
        }))
        .unwrap();

        assert!(validate_openai(&request).is_ok());

        let request: anthropic::MessagesRequest = serde_json::from_value(json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "Hi"}],
            "temperature": 2.5
        }))
        .unwrap();

        assert!(validate_anthropic(&request).is_err());

        let request: openai::ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "Hi"}],
            "temperature": 2.5
        }))
        .unwrap();

        assert!(validate_openai(&request).is_err());
    }
}
