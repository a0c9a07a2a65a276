//! Upstream base-URL normalization.
//!
//! Users paste base URLs in wildly different shapes: bare hosts, hosts with a
//! version prefix, or full proxy routes. The normalizer derives the base the
//! adapters append their method paths to (`/chat/completions`, `/messages`).

pub const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Normalize a user-provided base URL for OpenAI-style upstreams.
///
/// Rules, applied in order:
/// 1. empty input falls back to the official endpoint;
/// 2. exactly one trailing slash is stripped;
/// 3. a path that already contains a `v1` segment is trusted as-is;
/// 4. the official host always gets `/v1`;
/// 5. otherwise two or more path segments mean a proxy route (kept as-is),
///    fewer get `/v1` appended.
pub fn normalize_base_url(raw: &str) -> String {
    if raw.is_empty() {
        return DEFAULT_OPENAI_API_URL.to_string();
    }

    let trimmed = raw.strip_suffix('/').unwrap_or(raw);

    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);

    let (host, path) = match without_scheme.split_once('/') {
        Some((host, path)) => (host, path),
        None => (without_scheme, ""),
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if segments.iter().any(|s| *s == "v1") {
        return trimmed.to_string();
    }

    if host == "api.openai.com" {
        return format!("{trimmed}/v1");
    }

    if segments.len() >= 2 {
        return trimmed.to_string();
    }

    format!("{trimmed}/v1")
}

/// Derive the Anthropic messages base: `<base>/v1` unless already versioned.
pub fn anthropic_messages_base(raw: &str) -> String {
    if raw.is_empty() {
        return format!("{DEFAULT_ANTHROPIC_API_URL}/v1");
    }

    let trimmed = raw.strip_suffix('/').unwrap_or(raw);

    if trimmed.ends_with("/v1") {
        return trimmed.to_string();
    }

    format!("{trimmed}/v1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_falls_back_to_official_endpoint() {
        assert_eq!(normalize_base_url(""), "https://api.openai.com/v1");
    }

    #[test]
    fn official_host_gets_version_suffix() {
        assert_eq!(normalize_base_url("https://api.openai.com"), "https://api.openai.com/v1");
    }

    #[test]
    fn bare_host_gets_version_suffix() {
        assert_eq!(normalize_base_url("https://api.x.ai"), "https://api.x.ai/v1");
    }

    #[test]
    fn proxy_route_kept_as_is() {
        assert_eq!(
            normalize_base_url("https://kilocode.ai/api/openrouter"),
            "https://kilocode.ai/api/openrouter"
        );
    }

    #[test]
    fn versioned_path_kept_as_is() {
        assert_eq!(
            normalize_base_url("https://example.com/v1"),
            "https://example.com/v1"
        );
        assert_eq!(
            normalize_base_url("https://example.com/openai/v1/"),
            "https://example.com/openai/v1"
        );
    }

    #[test]
    fn ark_style_route_kept_after_slash_strip() {
        assert_eq!(
            normalize_base_url("https://ark.cn-beijing.volces.com/api/v3/"),
            "https://ark.cn-beijing.volces.com/api/v3"
        );
    }

    #[test]
    fn single_segment_gets_version_suffix() {
        assert_eq!(
            normalize_base_url("https://gateway.example.com/openai"),
            "https://gateway.example.com/openai/v1"
        );
    }

    #[test]
    fn idempotent() {
        for input in [
            "",
            "https://api.openai.com",
            "https://api.x.ai",
            "https://kilocode.ai/api/openrouter",
            "https://ark.cn-beijing.volces.com/api/v3/",
            "https://gateway.example.com/openai",
        ] {
            let once = normalize_base_url(input);
            assert_eq!(normalize_base_url(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn anthropic_base_versioning() {
        assert_eq!(
            anthropic_messages_base("https://api.anthropic.com"),
            "https://api.anthropic.com/v1"
        );
        assert_eq!(
            anthropic_messages_base("https://gateway.example.com/v1"),
            "https://gateway.example.com/v1"
        );
    }
}
