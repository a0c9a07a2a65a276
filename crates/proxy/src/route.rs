//! Model routing: command overrides, big/small alias substitution, and the
//! deterministic token estimator that drives the size heuristic.

use crate::{
    format::ApiFormat,
    messages::{anthropic, gemini, openai},
};

/// Estimated-input threshold above which a request counts as heavy.
const BIG_MODEL_TOKEN_THRESHOLD: u32 = 8000;

/// Aliases that participate in big/small substitution.
const ROUTED_ALIAS_PREFIXES: [&str; 2] = ["claude-3-5-sonnet", "claude-3-haiku"];
const ROUTED_ALIAS_EXACT: [&str; 1] = ["gpt-4o"];

/// Why the router picked the model it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteReason {
    /// An embedded `/model provider:name` command won.
    Command,
    /// The alias map routed to the big model.
    AliasBig,
    /// The alias map routed to the small model.
    AliasSmall,
    /// The requested model passed through untouched.
    Passthrough,
}

/// Outcome of a routing pass. The request's model has already been rewritten.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    /// The effective model after substitution.
    pub model: String,

    /// Provider named by a command override, if any.
    pub provider_hint: Option<ApiFormat>,

    /// Why this model was chosen.
    pub reason: RouteReason,
}

/// Request-shape accessors the router needs, implemented per wire format.
pub trait RoutableRequest {
    fn model(&self) -> &str;
    fn set_model(&mut self, model: String);
    fn has_tools(&self) -> bool;
    fn wants_thinking(&self) -> bool;
    fn message_count(&self) -> usize;
    fn tool_count(&self) -> usize;
    /// Total UTF-8 bytes of all text content, including the system prompt.
    fn text_bytes(&self) -> usize;
    /// The first user-authored text, for command detection.
    fn first_user_text(&self) -> Option<String>;
    /// Remove the leading command line from the first user text.
    fn strip_first_user_line(&mut self);
}

/// Deterministic input-size approximation.
///
/// `ceil(total_utf8_bytes_of_all_text / 4) + 8·messages + 50·tools`
pub fn estimate_tokens<R: RoutableRequest + ?Sized>(request: &R) -> u32 {
    let text = request.text_bytes() as u32;

    text.div_ceil(4) + 8 * request.message_count() as u32 + 50 * request.tool_count() as u32
}

/// Resolve the effective model for a request, mutating it in place.
///
/// Precedence: embedded command > alias map > passthrough. A per-channel
/// models_mapping is applied later, after channel selection.
pub fn route_model<R: RoutableRequest + ?Sized>(
    request: &mut R,
    big_model: &str,
    small_model: &str,
) -> RouteOutcome {
    if let Some(first_text) = request.first_user_text()
        && let Some((provider_hint, model)) = parse_model_command(&first_text)
    {
        request.strip_first_user_line();
        request.set_model(model.clone());

        return RouteOutcome {
            model,
            provider_hint,
            reason: RouteReason::Command,
        };
    }

    let requested = request.model();

    let is_alias = ROUTED_ALIAS_PREFIXES.iter().any(|prefix| requested.starts_with(prefix))
        || ROUTED_ALIAS_EXACT.contains(&requested);

    if !is_alias {
        return RouteOutcome {
            model: requested.to_string(),
            provider_hint: None,
            reason: RouteReason::Passthrough,
        };
    }

    let heavy = request.has_tools()
        || request.wants_thinking()
        || estimate_tokens(request) > BIG_MODEL_TOKEN_THRESHOLD;

    let (model, reason) = if heavy {
        (big_model.to_string(), RouteReason::AliasBig)
    } else {
        (small_model.to_string(), RouteReason::AliasSmall)
    };

    request.set_model(model.clone());

    RouteOutcome {
        model,
        provider_hint: None,
        reason,
    }
}

/// Parse a `/model <provider>:<name>` command at the head of the user text.
fn parse_model_command(text: &str) -> Option<(Option<ApiFormat>, String)> {
    let trimmed = text.trim_start();

    let rest = trimmed
        .get(..7)
        .filter(|head| head.eq_ignore_ascii_case("/model "))
        .map(|_| &trimmed[7..])?;

    let line = rest.lines().next().unwrap_or(rest).trim();
    if line.is_empty() {
        return None;
    }

    match line.split_once(':') {
        Some((provider, name)) if !name.trim().is_empty() => {
            Some((ApiFormat::parse(provider.trim()), name.trim().to_string()))
        }
        _ => Some((None, line.to_string())),
    }
}

fn strip_first_line(text: &str) -> String {
    match text.split_once('\n') {
        Some((_, rest)) => rest.trim_start_matches('\n').to_string(),
        None => String::new(),
    }
}

impl RoutableRequest for anthropic::MessagesRequest {
    fn model(&self) -> &str {
        &self.model
    }

    fn set_model(&mut self, model: String) {
        self.model = model;
    }

    fn has_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|tools| !tools.is_empty())
    }

    fn wants_thinking(&self) -> bool {
        matches!(self.thinking, Some(anthropic::ThinkingConfig::Enabled { .. }))
    }

    fn message_count(&self) -> usize {
        self.messages.len()
    }

    fn tool_count(&self) -> usize {
        self.tools.as_ref().map_or(0, Vec::len)
    }

    fn text_bytes(&self) -> usize {
        let system = self.system.as_ref().map_or(0, |system| system.flattened().len());

        let messages: usize = self
            .messages
            .iter()
            .map(|message| message.content.text().len())
            .sum();

        system + messages
    }

    fn first_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|message| message.role == anthropic::Role::User)
            .map(|message| message.content.text())
            .filter(|text| !text.is_empty())
    }

    fn strip_first_user_line(&mut self) {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|message| message.role == anthropic::Role::User)
        else {
            return;
        };

        match &mut message.content {
            anthropic::MessageContent::Text(text) => {
                *text = strip_first_line(text);
            }
            anthropic::MessageContent::Blocks(blocks) => {
                for block in blocks {
                    if let anthropic::ContentBlock::Text { text } = block {
                        *text = strip_first_line(text);
                        break;
                    }
                }
            }
        }
    }
}

impl RoutableRequest for openai::ChatCompletionRequest {
    fn model(&self) -> &str {
        &self.model
    }

    fn set_model(&mut self, model: String) {
        self.model = model;
    }

    fn has_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|tools| !tools.is_empty())
    }

    fn wants_thinking(&self) -> bool {
        false
    }

    fn message_count(&self) -> usize {
        self.messages.len()
    }

    fn tool_count(&self) -> usize {
        self.tools.as_ref().map_or(0, Vec::len)
    }

    fn text_bytes(&self) -> usize {
        self.messages.iter().map(|message| message.content_text().len()).sum()
    }

    fn first_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|message| message.role == openai::ChatRole::User)
            .map(|message| message.content_text())
            .filter(|text| !text.is_empty())
    }

    fn strip_first_user_line(&mut self) {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|message| message.role == openai::ChatRole::User)
        else {
            return;
        };

        match &mut message.content {
            Some(openai::MessageContent::Text(text)) => {
                *text = strip_first_line(text);
            }
            Some(openai::MessageContent::Parts(parts)) => {
                for part in parts {
                    if let openai::ContentPart::Text { text } = part {
                        *text = strip_first_line(text);
                        break;
                    }
                }
            }
            None => {}
        }
    }
}

impl RoutableRequest for gemini::GenerateRequest {
    fn model(&self) -> &str {
        // Gemini carries the model in the URL, not the body; the dispatcher
        // stores it separately and only consults the heuristics here.
        ""
    }

    fn set_model(&mut self, _model: String) {}

    fn has_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|tools| !tools.is_empty())
    }

    fn wants_thinking(&self) -> bool {
        false
    }

    fn message_count(&self) -> usize {
        self.contents.len()
    }

    fn tool_count(&self) -> usize {
        self.tools
            .as_ref()
            .map_or(0, |tools| {
                tools
                    .iter()
                    .map(|tool| tool.function_declarations.as_ref().map_or(0, Vec::len))
                    .sum()
            })
    }

    fn text_bytes(&self) -> usize {
        let system = self.system_instruction.as_ref().map_or(0, |content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_ref())
                .map(String::len)
                .sum()
        });

        let contents: usize = self
            .contents
            .iter()
            .flat_map(|content| &content.parts)
            .filter_map(|part| part.text.as_ref())
            .map(String::len)
            .sum();

        system + contents
    }

    fn first_user_text(&self) -> Option<String> {
        self.contents
            .iter()
            .find(|content| content.role != Some(gemini::GeminiRole::Model))
            .and_then(|content| content.parts.iter().find_map(|part| part.text.clone()))
            .filter(|text| !text.is_empty())
    }

    fn strip_first_user_line(&mut self) {
        let Some(content) = self
            .contents
            .iter_mut()
            .find(|content| content.role != Some(gemini::GeminiRole::Model))
        else {
            return;
        };

        for part in &mut content.parts {
            if let Some(text) = &mut part.text {
                *text = strip_first_line(text);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BIG: &str = "gpt-4o";
    const SMALL: &str = "gpt-4o-mini";

    fn request(body: serde_json::Value) -> anthropic::MessagesRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn estimator_is_deterministic() {
        let request = request(json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 10,
            "system": "abcd",
            "messages": [
                {"role": "user", "content": "abcdefgh"},
                {"role": "assistant", "content": "ab"}
            ],
            "tools": [{"name": "f", "input_schema": {"type": "object"}}]
        }));

        // ceil(14/4)=4 text + 2*8 messages + 1*50 tools
        assert_eq!(estimate_tokens(&request), 4 + 16 + 50);
    }

    #[test]
    fn alias_routes_small_by_default() {
        let mut request = request(json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "Hi"}]
        }));

        let outcome = route_model(&mut request, BIG, SMALL);

        assert_eq!(outcome.reason, RouteReason::AliasSmall);
        assert_eq!(request.model, SMALL);
    }

    #[test]
    fn tools_route_big() {
        let mut request = request(json!({
            "model": "claude-3-5-sonnet-20241022",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "Hi"}],
            "tools": [{"name": "f", "input_schema": {"type": "object"}}]
        }));

        let outcome = route_model(&mut request, BIG, SMALL);

        assert_eq!(outcome.reason, RouteReason::AliasBig);
        assert_eq!(request.model, BIG);
    }

    #[test]
    fn thinking_routes_big() {
        let mut request = request(json!({
            "model": "gpt-4o",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "Hi"}],
            "thinking": {"type": "enabled"}
        }));

        let outcome = route_model(&mut request, BIG, SMALL);
        assert_eq!(outcome.reason, RouteReason::AliasBig);
    }

    #[test]
    fn long_input_routes_big() {
        let mut request = request(json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "x".repeat(40_000)}]
        }));

        let outcome = route_model(&mut request, BIG, SMALL);
        assert_eq!(outcome.reason, RouteReason::AliasBig);
    }

    #[test]
    fn unknown_model_passes_through() {
        let mut request = request(json!({
            "model": "grok-3",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "Hi"}]
        }));

        let outcome = route_model(&mut request, BIG, SMALL);

        assert_eq!(outcome.reason, RouteReason::Passthrough);
        assert_eq!(request.model, "grok-3");
    }

    #[test]
    fn command_override_wins_and_is_stripped() {
        let mut request = request(json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "/model openai:gpt-4.1\nWhat is 2+2?"}]
        }));

        let outcome = route_model(&mut request, BIG, SMALL);

        assert_eq!(outcome.reason, RouteReason::Command);
        assert_eq!(outcome.model, "gpt-4.1");
        assert_eq!(outcome.provider_hint, Some(ApiFormat::Openai));
        assert_eq!(request.model, "gpt-4.1");
        assert_eq!(request.messages[0].content.text(), "What is 2+2?");
    }

    #[test]
    fn command_is_case_insensitive() {
        let mut request = request(json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "/MODEL Gemini:gemini-2.0-flash\nHi"}]
        }));

        let outcome = route_model(&mut request, BIG, SMALL);

        assert_eq!(outcome.model, "gemini-2.0-flash");
        assert_eq!(outcome.provider_hint, Some(ApiFormat::Gemini));
    }

    #[test]
    fn command_without_provider_keeps_model_verbatim() {
        let mut request = request(json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "/model deepseek-chat\nHi"}]
        }));

        let outcome = route_model(&mut request, BIG, SMALL);

        assert_eq!(outcome.model, "deepseek-chat");
        assert_eq!(outcome.provider_hint, None);
    }
}
