//! Per-request orchestration.
//!
//! One task serves one request end to end: detect (done by the handlers),
//! route the model, pick a channel, convert, call the upstream, translate or
//! convert the reply back, then feed metrics and the request log. Within a
//! streaming request the upstream read loop, the ping cadence, and the
//! cancellation watcher run cooperatively in one select loop, feeding the
//! response writer through a bounded channel.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use axum::response::sse::Event;
use config::{ConfigProvider, ConfigProviderExt};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use uuid::Uuid;

use crate::{
    channel::{Channel, ChannelManager},
    convert,
    error::{ProxyError, ProxyResult},
    format::ApiFormat,
    logging::{RequestLogEntry, RequestLogger, RequestOutcome},
    messages::{anthropic, gemini, openai},
    route::{self, RoutableRequest},
    streaming::{StreamEnd, StreamSeed, Translator, UpstreamEvent},
    upstream::{AnthropicUpstream, EventStream, GeminiUpstream, OpenAiUpstream},
    validate,
};

const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Buffered events between the translator and the response writer.
const STREAM_CHANNEL_CAPACITY: usize = 32;

/// An inbound request in its native shape.
#[derive(Debug)]
pub enum ProxyRequest {
    Anthropic(anthropic::MessagesRequest),
    OpenAi(openai::ChatCompletionRequest),
    Gemini {
        /// Gemini carries the model in the URL, not the body.
        model: String,
        /// Whether the caller hit the streaming surface.
        stream: bool,
        request: gemini::GenerateRequest,
    },
}

impl ProxyRequest {
    /// The caller's wire format.
    pub fn format(&self) -> ApiFormat {
        match self {
            ProxyRequest::Anthropic(_) => ApiFormat::Anthropic,
            ProxyRequest::OpenAi(_) => ApiFormat::Openai,
            ProxyRequest::Gemini { .. } => ApiFormat::Gemini,
        }
    }

    fn stream_requested(&self) -> bool {
        match self {
            ProxyRequest::Anthropic(request) => request.stream.unwrap_or(false),
            ProxyRequest::OpenAi(request) => request.stream.unwrap_or(false),
            ProxyRequest::Gemini { stream, .. } => *stream,
        }
    }

    fn wants_thinking(&self) -> bool {
        match self {
            ProxyRequest::Anthropic(request) => request.wants_thinking(),
            _ => false,
        }
    }

    fn validate(&self) -> ProxyResult<()> {
        match self {
            ProxyRequest::Anthropic(request) => validate::validate_anthropic(request),
            ProxyRequest::OpenAi(request) => validate::validate_openai(request),
            ProxyRequest::Gemini { model, request, .. } => {
                if model.is_empty() {
                    return Err(ProxyError::InvalidRequest("model is required".to_string()));
                }

                validate::validate_gemini(request)
            }
        }
    }

    /// Fill in the configured default temperature when the caller omitted one.
    ///
    /// Only the uniform 0..=2 invariant is enforced here; narrowing to the
    /// target wire's range is the conversion layer's job.
    fn apply_default_temperature(&mut self, temperature: f32) {
        let temperature = temperature.clamp(0.0, 2.0);

        match self {
            ProxyRequest::Anthropic(request) => {
                request.temperature.get_or_insert(temperature);
            }
            ProxyRequest::OpenAi(request) => {
                request.temperature.get_or_insert(temperature);
            }
            ProxyRequest::Gemini { request, .. } => {
                request
                    .generation_config
                    .get_or_insert_with(Default::default)
                    .temperature
                    .get_or_insert(temperature);
            }
        }
    }

    fn clamp_max_tokens(&mut self, limit: u32) {
        match self {
            ProxyRequest::Anthropic(request) => {
                request.max_tokens = request.max_tokens.min(limit);
            }
            ProxyRequest::OpenAi(request) => {
                if let Some(max_tokens) = request.max_tokens.as_mut() {
                    *max_tokens = (*max_tokens).min(limit);
                }
            }
            ProxyRequest::Gemini { request, .. } => {
                if let Some(config) = request.generation_config.as_mut()
                    && let Some(max_tokens) = config.max_output_tokens.as_mut()
                {
                    *max_tokens = (*max_tokens).min(limit);
                }
            }
        }
    }
}

impl RoutableRequest for ProxyRequest {
    fn model(&self) -> &str {
        match self {
            ProxyRequest::Anthropic(request) => &request.model,
            ProxyRequest::OpenAi(request) => &request.model,
            ProxyRequest::Gemini { model, .. } => model,
        }
    }

    fn set_model(&mut self, model: String) {
        match self {
            ProxyRequest::Anthropic(request) => request.model = model,
            ProxyRequest::OpenAi(request) => request.model = model,
            ProxyRequest::Gemini { model: slot, .. } => *slot = model,
        }
    }

    fn has_tools(&self) -> bool {
        match self {
            ProxyRequest::Anthropic(request) => request.has_tools(),
            ProxyRequest::OpenAi(request) => request.has_tools(),
            ProxyRequest::Gemini { request, .. } => request.has_tools(),
        }
    }

    fn wants_thinking(&self) -> bool {
        ProxyRequest::wants_thinking(self)
    }

    fn message_count(&self) -> usize {
        match self {
            ProxyRequest::Anthropic(request) => request.message_count(),
            ProxyRequest::OpenAi(request) => request.message_count(),
            ProxyRequest::Gemini { request, .. } => request.message_count(),
        }
    }

    fn tool_count(&self) -> usize {
        match self {
            ProxyRequest::Anthropic(request) => request.tool_count(),
            ProxyRequest::OpenAi(request) => request.tool_count(),
            ProxyRequest::Gemini { request, .. } => request.tool_count(),
        }
    }

    fn text_bytes(&self) -> usize {
        match self {
            ProxyRequest::Anthropic(request) => request.text_bytes(),
            ProxyRequest::OpenAi(request) => request.text_bytes(),
            ProxyRequest::Gemini { request, .. } => request.text_bytes(),
        }
    }

    fn first_user_text(&self) -> Option<String> {
        match self {
            ProxyRequest::Anthropic(request) => request.first_user_text(),
            ProxyRequest::OpenAi(request) => request.first_user_text(),
            ProxyRequest::Gemini { request, .. } => request.first_user_text(),
        }
    }

    fn strip_first_user_line(&mut self) {
        match self {
            ProxyRequest::Anthropic(request) => request.strip_first_user_line(),
            ProxyRequest::OpenAi(request) => request.strip_first_user_line(),
            ProxyRequest::Gemini { request, .. } => request.strip_first_user_line(),
        }
    }
}

/// The request converted to the selected channel's format.
enum TargetRequest {
    Anthropic(anthropic::MessagesRequest),
    OpenAi(openai::ChatCompletionRequest),
    Gemini(gemini::GenerateRequest),
}

impl TargetRequest {
    fn set_model(&mut self, model: &str) {
        match self {
            TargetRequest::Anthropic(request) => request.model = model.to_string(),
            TargetRequest::OpenAi(request) => request.model = model.to_string(),
            // The model travels in the URL for Gemini.
            TargetRequest::Gemini(_) => {}
        }
    }
}

fn convert_for_target(request: ProxyRequest, target: ApiFormat) -> ProxyResult<TargetRequest> {
    Ok(match (request, target) {
        (ProxyRequest::Anthropic(request), ApiFormat::Anthropic) => TargetRequest::Anthropic(request),
        (ProxyRequest::Anthropic(request), ApiFormat::Openai) => {
            TargetRequest::OpenAi(convert::request::anthropic_to_openai(request)?)
        }
        (ProxyRequest::Anthropic(request), ApiFormat::Gemini) => {
            TargetRequest::Gemini(convert::request::anthropic_to_gemini(request)?)
        }
        (ProxyRequest::OpenAi(request), ApiFormat::Openai) => TargetRequest::OpenAi(request),
        (ProxyRequest::OpenAi(request), ApiFormat::Anthropic) => {
            TargetRequest::Anthropic(convert::request::openai_to_anthropic(request)?)
        }
        (ProxyRequest::OpenAi(request), ApiFormat::Gemini) => {
            TargetRequest::Gemini(convert::request::openai_to_gemini(request)?)
        }
        (ProxyRequest::Gemini { request, .. }, ApiFormat::Gemini) => TargetRequest::Gemini(request),
        (ProxyRequest::Gemini { request, .. }, ApiFormat::Anthropic) => {
            TargetRequest::Anthropic(convert::request::gemini_to_anthropic(request)?)
        }
        (ProxyRequest::Gemini { request, .. }, ApiFormat::Openai) => {
            TargetRequest::OpenAi(convert::request::gemini_to_openai(request)?)
        }
    })
}

/// A buffered upstream reply, still in the channel's format.
enum TargetReply {
    Anthropic(anthropic::MessagesResponse),
    OpenAi(openai::ChatCompletionResponse),
    Gemini(gemini::GenerateResponse),
}

impl TargetReply {
    fn usage(&self) -> (u32, u32) {
        match self {
            TargetReply::Anthropic(reply) => (reply.usage.input_tokens, reply.usage.output_tokens),
            TargetReply::OpenAi(reply) => {
                let usage = reply.usage.unwrap_or_default();
                (usage.prompt_tokens, usage.completion_tokens)
            }
            TargetReply::Gemini(reply) => {
                let usage = reply.usage_metadata.unwrap_or_default();
                (usage.prompt_token_count, usage.candidates_token_count)
            }
        }
    }
}

/// A reply in the caller's format, ready to serialize.
pub enum ProxyResponse {
    Anthropic(anthropic::MessagesResponse),
    OpenAi(openai::ChatCompletionResponse),
    Gemini(gemini::GenerateResponse),
}

fn convert_reply(reply: TargetReply, caller: ApiFormat, model: &str) -> ProxyResult<ProxyResponse> {
    let mut response = match (reply, caller) {
        (TargetReply::Anthropic(reply), ApiFormat::Anthropic) => ProxyResponse::Anthropic(reply),
        (TargetReply::Anthropic(reply), ApiFormat::Openai) => {
            ProxyResponse::OpenAi(convert::response::anthropic_to_openai(reply))
        }
        (TargetReply::Anthropic(reply), ApiFormat::Gemini) => {
            ProxyResponse::Gemini(convert::response::anthropic_to_gemini(reply))
        }
        (TargetReply::OpenAi(reply), ApiFormat::Openai) => ProxyResponse::OpenAi(reply),
        (TargetReply::OpenAi(reply), ApiFormat::Anthropic) => {
            ProxyResponse::Anthropic(convert::response::openai_to_anthropic(reply)?)
        }
        (TargetReply::OpenAi(reply), ApiFormat::Gemini) => {
            ProxyResponse::Gemini(convert::response::openai_to_gemini(reply)?)
        }
        (TargetReply::Gemini(reply), ApiFormat::Gemini) => ProxyResponse::Gemini(reply),
        (TargetReply::Gemini(reply), ApiFormat::Anthropic) => {
            ProxyResponse::Anthropic(convert::response::gemini_to_anthropic(reply)?)
        }
        (TargetReply::Gemini(reply), ApiFormat::Openai) => {
            ProxyResponse::OpenAi(convert::response::gemini_to_openai(reply)?)
        }
    };

    // The caller sees the alias it asked for, not the routed upstream model.
    match &mut response {
        ProxyResponse::Anthropic(reply) => reply.model = model.to_string(),
        ProxyResponse::OpenAi(reply) => reply.model = model.to_string(),
        ProxyResponse::Gemini(_) => {}
    }

    Ok(response)
}

/// A finished dispatch: either a buffered JSON reply or a live event stream.
pub enum DispatchReply {
    Json(ProxyResponse),
    Stream(mpsc::Receiver<Event>),
}

/// Owns the shared state a request needs: channel cache, collaborators, and
/// the upstream adapters sharing one transport.
pub struct Dispatcher {
    config: Arc<dyn ConfigProvider>,
    channels: Arc<ChannelManager>,
    logger: Arc<dyn RequestLogger>,
    openai: OpenAiUpstream,
    anthropic: AnthropicUpstream,
    gemini: GeminiUpstream,
    accepting: AtomicBool,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        channels: Arc<ChannelManager>,
        logger: Arc<dyn RequestLogger>,
        transport: reqwest::Client,
    ) -> Self {
        Self {
            config,
            channels,
            logger,
            openai: OpenAiUpstream::new(transport.clone()),
            anthropic: AnthropicUpstream::new(transport.clone()),
            gemini: GeminiUpstream::new(transport),
            accepting: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// The channel manager, for the model listing and admin surfaces.
    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    /// The configuration provider backing routing decisions.
    pub fn config(&self) -> &Arc<dyn ConfigProvider> {
        &self.config
    }

    /// Serve one request.
    pub async fn dispatch(&self, request: ProxyRequest, credential: Option<String>) -> ProxyResult<DispatchReply> {
        if !self.accepting.load(Ordering::Relaxed) {
            return Err(ProxyError::Upstream {
                status: 503,
                message: "server is shutting down".to_string(),
            });
        }

        let started_at = Instant::now();
        let request_id = Uuid::new_v4();
        let source = request.format();

        request.validate()?;

        let original_model = RoutableRequest::model(&request).to_string();
        let wants_thinking = request.wants_thinking();

        let stream = request.stream_requested() && self.config.stream_enabled();
        if request.stream_requested() && !stream {
            log::debug!("Streaming disabled by configuration; serving {request_id} buffered");
        }

        let mut request = request;

        let route = route::route_model(&mut request, &self.config.big_model(), &self.config.small_model());

        // A matching custom key pins the channel; otherwise the provider is
        // inferred and the healthiest channel wins.
        let channel = match credential.as_deref().and_then(|key| self.channels.find_by_custom_key(key)) {
            Some(channel) => channel,
            None => {
                let provider = route.provider_hint.unwrap_or_else(|| provider_for_model(&route.model));
                self.channels.select(provider, None)?
            }
        };

        let target = channel.provider;

        // Per-channel rename applies last.
        let effective_model = channel
            .models_mapping
            .get(&route.model)
            .cloned()
            .unwrap_or_else(|| route.model.clone());
        request.set_model(effective_model.clone());

        request.clamp_max_tokens(self.config.max_tokens_limit() as u32);

        if let Some(temperature) = self.config.get_f32(config::ConfigKey::Temperature) {
            request.apply_default_temperature(temperature);
        }

        let timeout = Duration::from_secs(channel.timeout_s.unwrap_or_else(|| self.config.request_timeout()));

        let mut converted = convert_for_target(request, target)?;
        converted.set_model(&effective_model);

        log::debug!(
            "request {request_id}: {source} -> {target} via channel '{}' model '{effective_model}' stream={stream}",
            channel.id
        );

        if stream {
            self.dispatch_stream(
                StreamJob {
                    request_id,
                    source,
                    channel,
                    converted,
                    effective_model,
                    original_model,
                    wants_thinking,
                    timeout,
                    started_at,
                },
            )
            .await
        } else {
            self.dispatch_buffered(
                request_id,
                source,
                &channel,
                converted,
                &effective_model,
                &original_model,
                timeout,
                started_at,
            )
            .await
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_buffered(
        &self,
        request_id: Uuid,
        source: ApiFormat,
        channel: &Channel,
        converted: TargetRequest,
        effective_model: &str,
        original_model: &str,
        timeout: Duration,
        started_at: Instant,
    ) -> ProxyResult<DispatchReply> {
        let call = async {
            Ok::<TargetReply, ProxyError>(match converted {
                TargetRequest::OpenAi(request) => TargetReply::OpenAi(self.openai.chat(channel, request).await?),
                TargetRequest::Anthropic(request) => {
                    TargetReply::Anthropic(self.anthropic.chat(channel, request).await?)
                }
                TargetRequest::Gemini(request) => {
                    TargetReply::Gemini(self.gemini.chat(channel, effective_model, &request).await?)
                }
            })
        };

        let reply = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => {
                self.settle(
                    request_id,
                    source,
                    Some(channel),
                    effective_model,
                    false,
                    RequestOutcome::Failed,
                    Some(error.client_message()),
                    (0, 0),
                    started_at,
                );
                return Err(error);
            }
            Err(_) => {
                let error = ProxyError::Timeout(format!("upstream did not reply within {}s", timeout.as_secs()));
                self.settle(
                    request_id,
                    source,
                    Some(channel),
                    effective_model,
                    false,
                    RequestOutcome::Failed,
                    Some(error.client_message()),
                    (0, 0),
                    started_at,
                );
                return Err(error);
            }
        };

        let usage = reply.usage();

        let response = match convert_reply(reply, source, original_model) {
            Ok(response) => response,
            Err(error) => {
                self.settle(
                    request_id,
                    source,
                    Some(channel),
                    effective_model,
                    false,
                    RequestOutcome::Failed,
                    Some(error.client_message()),
                    usage,
                    started_at,
                );
                return Err(error);
            }
        };

        self.settle(
            request_id,
            source,
            Some(channel),
            effective_model,
            false,
            RequestOutcome::Success,
            None,
            usage,
            started_at,
        );

        Ok(DispatchReply::Json(response))
    }

    async fn dispatch_stream(&self, job: StreamJob) -> ProxyResult<DispatchReply> {
        let connect = async {
            Ok::<EventStream, ProxyError>(match &job.converted {
                TargetRequest::OpenAi(request) => {
                    self.openai.chat_stream(&job.channel, request.clone()).await?
                }
                TargetRequest::Anthropic(request) => {
                    self.anthropic.chat_stream(&job.channel, request.clone()).await?
                }
                TargetRequest::Gemini(request) => {
                    self.gemini
                        .chat_stream(&job.channel, &job.effective_model, request)
                        .await?
                }
            })
        };

        let upstream = match tokio::time::timeout(job.timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(error)) => {
                self.settle(
                    job.request_id,
                    job.source,
                    Some(&job.channel),
                    &job.effective_model,
                    true,
                    RequestOutcome::Failed,
                    Some(error.client_message()),
                    (0, 0),
                    job.started_at,
                );
                return Err(error);
            }
            Err(_) => {
                let error = ProxyError::Timeout(format!(
                    "upstream did not reply within {}s",
                    job.timeout.as_secs()
                ));
                self.settle(
                    job.request_id,
                    job.source,
                    Some(&job.channel),
                    &job.effective_model,
                    true,
                    RequestOutcome::Failed,
                    Some(error.client_message()),
                    (0, 0),
                    job.started_at,
                );
                return Err(error);
            }
        };

        let seed = StreamSeed {
            id: format!("msg_{}", job.request_id.simple()),
            model: job.original_model.clone(),
            wants_thinking: job.wants_thinking,
        };

        let translator = Translator::new(job.channel.provider, job.source, seed);
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        let channels = self.channels.clone();
        let logger = self.logger.clone();
        let shutdown = self.shutdown.child_token();
        let deadline = tokio::time::Instant::now() + job.timeout;

        self.tracker.spawn(async move {
            let result = pump_stream(upstream, translator, &tx, deadline, shutdown).await;

            let elapsed = job.started_at.elapsed();
            let (input_tokens, output_tokens) = result.usage;

            channels.record(
                &job.channel.id,
                elapsed.as_secs_f64(),
                (input_tokens + output_tokens) as u64,
                result.outcome == RequestOutcome::Success,
            );

            logger
                .record(RequestLogEntry {
                    request_id: job.request_id.to_string(),
                    channel_id: Some(job.channel.id.clone()),
                    source_format: job.source,
                    target_format: Some(job.channel.provider),
                    model: job.effective_model.clone(),
                    stream: true,
                    outcome: result.outcome,
                    error: result.error,
                    input_tokens,
                    output_tokens,
                    duration_ms: elapsed.as_millis() as u64,
                })
                .await;
        });

        Ok(DispatchReply::Stream(rx))
    }

    /// Record metrics and emit the request log for a finished buffered call.
    #[allow(clippy::too_many_arguments)]
    fn settle(
        &self,
        request_id: Uuid,
        source: ApiFormat,
        channel: Option<&Channel>,
        model: &str,
        stream: bool,
        outcome: RequestOutcome,
        error: Option<String>,
        usage: (u32, u32),
        started_at: Instant,
    ) {
        let elapsed = started_at.elapsed();

        if let Some(channel) = channel {
            self.channels.record(
                &channel.id,
                elapsed.as_secs_f64(),
                (usage.0 + usage.1) as u64,
                outcome == RequestOutcome::Success,
            );
        }

        let entry = RequestLogEntry {
            request_id: request_id.to_string(),
            channel_id: channel.map(|channel| channel.id.clone()),
            source_format: source,
            target_format: channel.map(|channel| channel.provider),
            model: model.to_string(),
            stream,
            outcome,
            error,
            input_tokens: usage.0,
            output_tokens: usage.1,
            duration_ms: elapsed.as_millis() as u64,
        };

        let logger = self.logger.clone();
        tokio::spawn(async move {
            logger.record(entry).await;
        });
    }

    /// Stop accepting new requests, let in-flight streams drain until the
    /// deadline, then cancel the rest.
    pub async fn shutdown(&self, deadline: Duration) {
        self.accepting.store(false, Ordering::Relaxed);
        self.tracker.close();

        if tokio::time::timeout(deadline, self.tracker.wait()).await.is_err() {
            log::warn!("Shutdown deadline reached; cancelling in-flight streams");
            self.shutdown.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(1), self.tracker.wait()).await;
        }
    }
}

struct StreamJob {
    request_id: Uuid,
    source: ApiFormat,
    channel: Channel,
    converted: TargetRequest,
    effective_model: String,
    original_model: String,
    wants_thinking: bool,
    timeout: Duration,
    started_at: Instant,
}

struct PumpResult {
    outcome: RequestOutcome,
    error: Option<String>,
    usage: (u32, u32),
}

/// Drive one upstream stream to completion.
///
/// Returns when the upstream finishes, the deadline passes, the caller
/// disconnects, or shutdown cancels the request. Dropping the upstream stream
/// closes its HTTP connection.
async fn pump_stream(
    mut upstream: EventStream,
    mut translator: Translator,
    tx: &mpsc::Sender<Event>,
    deadline: tokio::time::Instant,
    shutdown: CancellationToken,
) -> PumpResult {
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + PING_INTERVAL, PING_INTERVAL);

    let result = loop {
        tokio::select! {
            _ = tx.closed() => {
                break PumpResult {
                    outcome: RequestOutcome::Cancelled,
                    error: Some("caller disconnected".to_string()),
                    usage: (0, 0),
                };
            }

            _ = shutdown.cancelled() => {
                send_all(tx, translator.fail("api_error", "server shutting down")).await;

                break PumpResult {
                    outcome: RequestOutcome::Cancelled,
                    error: Some("cancelled by shutdown".to_string()),
                    usage: (0, 0),
                };
            }

            _ = tokio::time::sleep_until(deadline) => {
                send_all(tx, translator.fail("api_error", "upstream timed out")).await;

                break PumpResult {
                    outcome: RequestOutcome::Failed,
                    error: Some("upstream timed out".to_string()),
                    usage: (0, 0),
                };
            }

            _ = ping.tick() => {
                if let Some(event) = translator.ping()
                    && tx.send(event.into_sse_event()).await.is_err()
                {
                    break PumpResult {
                        outcome: RequestOutcome::Cancelled,
                        error: Some("caller disconnected".to_string()),
                        usage: (0, 0),
                    };
                }
            }

            next = upstream.next() => match next {
                Some(Ok(event)) => {
                    let terminated = matches!(event, UpstreamEvent::Terminated);

                    if !send_all(tx, translator.on_event(event)).await {
                        break PumpResult {
                            outcome: RequestOutcome::Cancelled,
                            error: Some("caller disconnected".to_string()),
                            usage: (0, 0),
                        };
                    }

                    if terminated {
                        break PumpResult {
                            outcome: RequestOutcome::Success,
                            error: None,
                            usage: (0, 0),
                        };
                    }
                }

                Some(Err(error)) => {
                    send_all(tx, translator.fail(error.anthropic_type(), &error.client_message())).await;

                    break PumpResult {
                        outcome: RequestOutcome::Failed,
                        error: Some(error.client_message()),
                        usage: (0, 0),
                    };
                }

                None => {
                    // A clean upstream already finalized the translator; an
                    // abrupt close needs a synthesized terminal sequence.
                    let synthesized = translator.finish(StreamEnd::Aborted);
                    let clean = synthesized.is_empty();

                    send_all(tx, synthesized).await;

                    break PumpResult {
                        outcome: if clean { RequestOutcome::Success } else { RequestOutcome::Failed },
                        error: (!clean).then(|| "upstream closed the stream early".to_string()),
                        usage: (0, 0),
                    };
                }
            }
        }
    };

    PumpResult {
        usage: translator.usage(),
        ..result
    }
}

/// Send every event; false when the caller is gone.
async fn send_all(tx: &mpsc::Sender<Event>, events: Vec<crate::streaming::OutboundEvent>) -> bool {
    for event in events {
        if tx.send(event.into_sse_event()).await.is_err() {
            return false;
        }
    }

    true
}

fn provider_for_model(model: &str) -> ApiFormat {
    let lowered = model.to_ascii_lowercase();

    if lowered.starts_with("claude") {
        ApiFormat::Anthropic
    } else if lowered.starts_with("gemini") {
        ApiFormat::Gemini
    } else {
        ApiFormat::Openai
    }
}
