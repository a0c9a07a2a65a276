//! Request logging collaborator.
//!
//! The dispatcher hands one entry per request to whatever implements
//! [`RequestLogger`]; delivery is best-effort and must never block dispatch.

use async_trait::async_trait;

use crate::format::ApiFormat;

/// Final status of a proxied request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The reply completed normally.
    Success,
    /// The caller disconnected before the reply finished.
    Cancelled,
    /// The request failed; see the error field.
    Failed,
}

impl RequestOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestOutcome::Success => "success",
            RequestOutcome::Cancelled => "cancelled",
            RequestOutcome::Failed => "failed",
        }
    }
}

/// One structured record per proxied request.
#[derive(Debug, Clone)]
pub struct RequestLogEntry {
    /// UUIDv4 assigned at dispatch entry.
    pub request_id: String,

    /// Channel the request was dispatched through, when one was selected.
    pub channel_id: Option<String>,

    /// The caller's wire format.
    pub source_format: ApiFormat,

    /// The upstream's wire format, when a channel was selected.
    pub target_format: Option<ApiFormat>,

    /// The effective model after routing.
    pub model: String,

    /// Whether the reply streamed.
    pub stream: bool,

    /// How the request ended.
    pub outcome: RequestOutcome,

    /// Error detail for failed requests.
    pub error: Option<String>,

    /// Input tokens drawn from upstream usage, 0 when unavailable.
    pub input_tokens: u32,

    /// Output tokens drawn from upstream usage, 0 when unavailable.
    pub output_tokens: u32,

    /// Wall time spent serving the request.
    pub duration_ms: u64,
}

/// Asynchronous request log sink.
#[async_trait]
pub trait RequestLogger: Send + Sync {
    /// Record one entry. Implementations must return promptly; queue and
    /// flush elsewhere if durable delivery is slow.
    async fn record(&self, entry: RequestLogEntry);
}

/// Logger that writes structured lines through the `log` facade.
#[derive(Default)]
pub struct LogFacadeLogger;

#[async_trait]
impl RequestLogger for LogFacadeLogger {
    async fn record(&self, entry: RequestLogEntry) {
        log::info!(
            "request {} {} source={} target={} channel={} model={} stream={} tokens={}/{} duration_ms={}{}",
            entry.request_id,
            entry.outcome.as_str(),
            entry.source_format,
            entry.target_format.map(|f| f.to_string()).unwrap_or_else(|| "-".to_string()),
            entry.channel_id.as_deref().unwrap_or("-"),
            entry.model,
            entry.stream,
            entry.input_tokens,
            entry.output_tokens,
            entry.duration_ms,
            entry
                .error
                .as_deref()
                .map(|error| format!(" error={error:?}"))
                .unwrap_or_default(),
        );
    }
}
