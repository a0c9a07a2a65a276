use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::messages::{anthropic, gemini};

pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// Proxy errors with appropriate HTTP status codes.
///
/// The variants mirror the caller-visible taxonomy: every error carries a
/// stable `kind` string which is rendered in the envelope of whichever wire
/// format the caller speaks.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Malformed JSON, unknown format, schema violation, unsupported input.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or invalid credential.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Unknown model or channel.
    #[error("{0}")]
    NotFound(String),

    /// No enabled channel serves the requested provider.
    #[error("No channel available for provider '{provider}'")]
    NoChannelAvailable {
        /// The provider that had no healthy channel.
        provider: String,
    },

    /// Upstream 429 or local policy.
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        /// Upstream-provided detail.
        message: String,
    },

    /// Upstream quota exhaustion.
    #[error("Insufficient quota: {0}")]
    InsufficientQuota(String),

    /// Any other non-2xx from upstream.
    #[error("Upstream error ({status}): {message}")]
    Upstream {
        /// HTTP status returned by the upstream.
        status: u16,
        /// Upstream-provided body.
        message: String,
    },

    /// The upstream exceeded the channel deadline.
    #[error("Upstream timed out: {0}")]
    Timeout(String),

    /// The caller disconnected before the reply finished.
    #[error("Request cancelled by caller")]
    Cancelled,

    /// Bug. If Some(message), it came from a provider and can be shown.
    /// If None, details must not leak.
    #[error("Internal server error")]
    Internal(Option<String>),
}

impl ProxyError {
    /// Get the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) | Self::NoChannelAvailable { .. } => StatusCode::NOT_FOUND,
            Self::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InsufficientQuota(_) => StatusCode::FORBIDDEN,
            Self::Upstream { status, .. } => match *status {
                400 => StatusCode::BAD_REQUEST,
                401 => StatusCode::UNAUTHORIZED,
                403 => StatusCode::FORBIDDEN,
                404 => StatusCode::NOT_FOUND,
                429 => StatusCode::TOO_MANY_REQUESTS,
                503 => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable taxonomy name used as the `type` field in error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Authentication(_) => "authentication",
            Self::NotFound(_) | Self::NoChannelAvailable { .. } => "not_found",
            Self::RateLimit { .. } => "rate_limit",
            Self::InsufficientQuota(_) => "insufficient_quota",
            Self::Upstream { .. } => "upstream",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    /// Anthropic wire convention for the inner error type.
    pub fn anthropic_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::Authentication(_) => "authentication_error",
            Self::NotFound(_) | Self::NoChannelAvailable { .. } => "not_found_error",
            Self::RateLimit { .. } => "rate_limit_error",
            Self::InsufficientQuota(_) => "permission_error",
            Self::Upstream { .. } | Self::Timeout(_) | Self::Cancelled => "api_error",
            Self::Internal(_) => "api_error",
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(Some(provider_msg)) => provider_msg.clone(),
            Self::Internal(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Classify a non-2xx upstream reply from its status and body.
    ///
    /// Bodies are matched on well-known substrings because the three vendors
    /// disagree on error envelopes.
    pub fn from_upstream(status: u16, body: String) -> Self {
        let lowered = body.to_lowercase();

        if status == 429 || lowered.contains("rate limit") || lowered.contains("rate_limit") {
            return Self::RateLimit { message: body };
        }

        if lowered.contains("insufficient_quota") || lowered.contains("insufficient quota") {
            return Self::InsufficientQuota(body);
        }

        if status == 401 || lowered.contains("authentication") || lowered.contains("invalid x-api-key") {
            return Self::Authentication(body);
        }

        if status == 404 || lowered.contains("model_not_found") {
            return Self::NotFound(body);
        }

        if lowered.contains("context_length") || lowered.contains("context length") {
            return Self::InvalidRequest(body);
        }

        Self::Upstream { status, message: body }
    }
}

/// Error response format compatible with the OpenAI API.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    code: u16,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = ErrorResponse {
            error: ErrorDetails {
                message: self.client_message(),
                r#type: self.kind().to_string(),
                code: status.as_u16(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// An error rendered in the Anthropic envelope.
pub struct AnthropicErrorResponse {
    status: StatusCode,
    body: anthropic::ErrorResponse,
}

impl From<ProxyError> for AnthropicErrorResponse {
    fn from(error: ProxyError) -> Self {
        let status = error.status_code();
        let body = anthropic::ErrorResponse::from(error);

        Self { status, body }
    }
}

impl IntoResponse for AnthropicErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type AnthropicResult<T> = std::result::Result<T, AnthropicErrorResponse>;

/// An error rendered in the Gemini envelope.
pub struct GeminiErrorResponse {
    status: StatusCode,
    body: gemini::ErrorResponse,
}

impl From<ProxyError> for GeminiErrorResponse {
    fn from(error: ProxyError) -> Self {
        let status = error.status_code();
        let body = gemini::ErrorResponse::new(status.as_u16(), error.client_message());

        Self { status, body }
    }
}

impl IntoResponse for GeminiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_classification() {
        let error = ProxyError::from_upstream(429, "slow down".to_string());
        assert!(matches!(error, ProxyError::RateLimit { .. }));

        let error = ProxyError::from_upstream(500, "Rate limit reached for tokens".to_string());
        assert!(matches!(error, ProxyError::RateLimit { .. }));

        let error = ProxyError::from_upstream(403, "insufficient_quota: top up".to_string());
        assert!(matches!(error, ProxyError::InsufficientQuota(_)));

        let error = ProxyError::from_upstream(401, "bad key".to_string());
        assert!(matches!(error, ProxyError::Authentication(_)));

        let error = ProxyError::from_upstream(400, "context_length_exceeded".to_string());
        assert!(matches!(error, ProxyError::InvalidRequest(_)));

        let error = ProxyError::from_upstream(502, "bad gateway".to_string());
        assert!(matches!(error, ProxyError::Upstream { status: 502, .. }));
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            ProxyError::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::NoChannelAvailable {
                provider: "openai".into()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ProxyError::Timeout("x".into()).status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn internal_errors_do_not_leak() {
        assert_eq!(ProxyError::Internal(None).client_message(), "Internal server error");
        assert_eq!(
            ProxyError::Internal(Some("upstream said no".into())).client_message(),
            "upstream said no"
        );
    }
}
