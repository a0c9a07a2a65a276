//! Inbound format classification.
//!
//! Signals are weighted by reliability: the request path is near-definitive,
//! headers are strong hints, body keys discriminate the rest. The highest
//! scorer wins when its weight clears the bar.

use http::HeaderMap;
use serde_json::Value;

use crate::format::ApiFormat;

/// Minimum score a format must reach to be claimed.
const DETECTION_BAR: u32 = 2;

/// Highest achievable score, used to scale confidence into [0, 1].
const MAX_SCORE: u32 = 8;

/// Outcome of a detection pass.
#[derive(Debug, Clone)]
pub struct Detection {
    /// The claimed format, or `None` when no signal cleared the bar.
    pub format: Option<ApiFormat>,

    /// How certain the classification is, in [0, 1].
    pub confidence: f32,

    /// The signals that contributed to the verdict.
    pub reasons: Vec<String>,
}

#[derive(Default)]
struct Scores {
    anthropic: u32,
    openai: u32,
    gemini: u32,
    reasons: Vec<String>,
}

impl Scores {
    fn add(&mut self, format: ApiFormat, weight: u32, reason: &str) {
        match format {
            ApiFormat::Anthropic => self.anthropic += weight,
            ApiFormat::Openai => self.openai += weight,
            ApiFormat::Gemini => self.gemini += weight,
        }

        self.reasons.push(format!("{reason} (+{weight} {format})"));
    }
}

/// Classify an inbound request from its path, headers, and parsed body.
pub fn detect(path: &str, headers: &HeaderMap, body: &Value) -> Detection {
    let mut scores = Scores::default();

    score_path(path, &mut scores);
    score_headers(headers, &mut scores);
    score_body(body, &mut scores);

    // max_by keeps the last maximum, so ties resolve anthropic > openai > gemini.
    let (format, score) = [
        (ApiFormat::Gemini, scores.gemini),
        (ApiFormat::Openai, scores.openai),
        (ApiFormat::Anthropic, scores.anthropic),
    ]
    .into_iter()
    .max_by(|a, b| a.1.cmp(&b.1))
    .unwrap_or((ApiFormat::Openai, 0));

    if score < DETECTION_BAR {
        return Detection {
            format: None,
            confidence: 0.0,
            reasons: scores.reasons,
        };
    }

    Detection {
        format: Some(format),
        confidence: (score as f32 / MAX_SCORE as f32).min(1.0),
        reasons: scores.reasons,
    }
}

fn score_path(path: &str, scores: &mut Scores) {
    if path.contains("/v1/messages") {
        scores.add(ApiFormat::Anthropic, 3, "path contains /v1/messages");
    } else if path.contains("/chat/completions") {
        scores.add(ApiFormat::Openai, 3, "path contains /chat/completions");
    } else if path.contains(":generateContent") || path.contains(":streamGenerateContent") {
        scores.add(ApiFormat::Gemini, 3, "path contains :generateContent");
    }
}

fn score_headers(headers: &HeaderMap, scores: &mut Scores) {
    let has_api_key = headers.contains_key("x-api-key");
    let has_version = headers.contains_key("anthropic-version");

    if has_api_key && has_version {
        scores.add(ApiFormat::Anthropic, 2, "x-api-key with anthropic-version");
    } else if has_api_key {
        scores.add(ApiFormat::Anthropic, 1, "x-api-key header");
    }

    let bearer = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("Bearer "));

    if bearer && !has_api_key {
        scores.add(ApiFormat::Openai, 1, "Authorization: Bearer");
    }
}

fn score_body(body: &Value, scores: &mut Scores) {
    let Some(object) = body.as_object() else {
        return;
    };

    if let Some(contents) = object.get("contents").and_then(Value::as_array) {
        let has_parts = contents
            .iter()
            .any(|content| content.get("parts").is_some_and(Value::is_array));

        if has_parts {
            scores.add(ApiFormat::Gemini, 3, "contents[] with parts[]");
        }
    }

    if object.contains_key("system_instruction") || object.contains_key("systemInstruction") {
        scores.add(ApiFormat::Gemini, 2, "system_instruction present");
        return;
    }

    let Some(messages) = object.get("messages").and_then(Value::as_array) else {
        return;
    };

    scores.add(ApiFormat::Openai, 1, "messages[] present");

    let openai_roles = messages.iter().any(|message| {
        matches!(
            message.get("role").and_then(Value::as_str),
            Some("system") | Some("tool")
        ) || message.get("tool_calls").is_some()
    });

    let openai_tools = object
        .get("tools")
        .and_then(Value::as_array)
        .is_some_and(|tools| tools.iter().any(|tool| tool.get("function").is_some()));

    if openai_roles || openai_tools {
        scores.add(ApiFormat::Openai, 2, "OpenAI-style roles or tools[].function");
        return;
    }

    if object.contains_key("max_tokens") {
        scores.add(ApiFormat::Anthropic, 2, "messages[] with required max_tokens");
    }

    if object.contains_key("system") {
        scores.add(ApiFormat::Anthropic, 1, "top-level system prompt");
    }

    let anthropic_tools = object
        .get("tools")
        .and_then(Value::as_array)
        .is_some_and(|tools| tools.iter().any(|tool| tool.get("input_schema").is_some()));

    if anthropic_tools {
        scores.add(ApiFormat::Anthropic, 2, "tools[].input_schema");
    }
}
