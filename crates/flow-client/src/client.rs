use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::StreamExt as _;
use futures::stream;
use tracing::{debug, info, warn};

use crate::config::FlowClientConfig;
use crate::decoder::{EventReconstructor, Framing};
use crate::errors::FlowError;
use crate::event::StreamEvent;
use crate::request::{
    RunFlowRequest, TokenCallback, TweakTargets, UploadedFileRef, build_run_payload,
};
use crate::retry::{Sleeper, TokioSleeper, parse_retry_after};
use crate::transport::{ByteStream, FlowTransport, HttpReply, ReqwestTransport};

type EventStream = Pin<Box<dyn futures::Stream<Item = Result<StreamEvent, FlowError>> + Send>>;

/// Client for one flow-execution endpoint.
///
/// Cloning is cheap; clones share the transport (and its connection pool).
/// Concurrent calls share no other state.
#[derive(Clone)]
pub struct FlowClient {
    transport: Arc<dyn FlowTransport>,
    sleeper: Arc<dyn Sleeper>,
    targets: TweakTargets,
    run_timeout: Duration,
}

impl FlowClient {
    /// Creates a client that talks HTTP through `reqwest`.
    pub fn new(config: FlowClientConfig) -> Result<Self, FlowError> {
        let transport = ReqwestTransport::new(config.clone())?;
        Ok(Self::with_transport(&config, Arc::new(transport)))
    }

    /// Creates a client from `FlowClientConfig::from_env`.
    pub fn from_env() -> Result<Self, FlowError> {
        Self::new(FlowClientConfig::from_env()?)
    }

    /// Creates a client over a custom transport.
    pub fn with_transport(config: &FlowClientConfig, transport: Arc<dyn FlowTransport>) -> Self {
        Self {
            transport,
            sleeper: Arc::new(TokioSleeper),
            targets: TweakTargets {
                chat_input_id: config.chat_input_id.clone(),
                file_input_id: config.file_input_id.clone(),
            },
            run_timeout: config.timeout,
        }
    }

    /// Replaces the backoff sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Uploads one file and returns the server path to attach to a run.
    ///
    /// Single attempt: a non-2xx answer fails with `FlowError::Upload`.
    pub async fn upload_file(
        &self,
        bytes: impl Into<Vec<u8>>,
        filename: &str,
    ) -> Result<UploadedFileRef, FlowError> {
        if filename.trim().is_empty() {
            return Err(FlowError::Validation("filename must not be empty".into()));
        }
        let bytes = bytes.into();
        debug!(event = "flow.upload_started", filename, bytes = bytes.len() as u64);
        let reply = self.transport.post_upload(filename, bytes).await?;
        let status = reply.status;
        let success = reply.is_success();
        let body = reply.text().await?;
        if !success {
            warn!(event = "flow.upload_failed", filename, status);
            return Err(FlowError::Upload { status, body });
        }
        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| FlowError::protocol(format!("upload response is not JSON: {e}")))?;
        let path = value
            .get("path")
            .and_then(|v| v.as_str())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| FlowError::protocol("upload response has no `path`"))?;
        debug!(event = "flow.upload_succeeded", filename, server_path = path);
        Ok(UploadedFileRef::new(path))
    }

    /// Starts a run and returns its events as they arrive.
    ///
    /// HTTP 429 answers are retried per `request.retry`; every other failure
    /// is returned immediately. All attempts and backoff together must finish
    /// within the configured run timeout. Errors while reading the body are
    /// yielded by the stream. Dropping the stream closes the connection.
    pub async fn run_flow_stream(&self, request: RunFlowRequest) -> Result<RunStream, FlowError> {
        request.validate()?;
        let session_id = request
            .session_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let payload = build_run_payload(&request, &session_id, &self.targets);

        let reply = tokio::time::timeout(
            self.run_timeout,
            self.open_run(&request, &payload, &session_id),
        )
        .await
        .map_err(|_| {
            warn!(event = "flow.run_timed_out", session_id = %session_id, timeout_ms = self.run_timeout.as_millis() as u64);
            FlowError::transport(format!(
                "run did not start within {}s",
                self.run_timeout.as_secs_f64()
            ))
        })??;

        debug!(event = "flow.stream_opened", session_id = %session_id, framing = ?request.framing);
        Ok(RunStream {
            session_id: session_id.clone(),
            events: Box::pin(event_stream(
                session_id,
                reply,
                request.framing,
                request.on_token,
            )),
        })
    }

    /// Posts the run, retrying HTTP 429 answers, until a 2xx head arrives.
    async fn open_run(
        &self,
        request: &RunFlowRequest,
        payload: &serde_json::Value,
        session_id: &str,
    ) -> Result<HttpReply, FlowError> {
        let mut state = request.retry.start();
        let mut last_hint: Option<Duration> = None;
        loop {
            debug!(event = "flow.run_attempt", session_id = %session_id, attempt = state.attempt + 1);
            let reply = self.transport.post_run(payload).await?;
            match reply.status {
                200..=299 => return Ok(reply),
                429 => {
                    let hint = reply
                        .retry_after
                        .as_deref()
                        .and_then(|v| parse_retry_after(v, chrono::Utc::now()));
                    if hint.is_some() {
                        last_hint = hint;
                    }
                    drop(reply);
                    if !state.can_retry() {
                        warn!(event = "flow.rate_limit_exhausted", session_id = %session_id, attempts = state.attempt + 1);
                        return Err(FlowError::RateLimitExceeded {
                            retry_after: last_hint,
                        });
                    }
                    let delay = state.backoff(hint);
                    info!(
                        event = "flow.retry_scheduled",
                        session_id = %session_id,
                        attempt = state.attempt + 1,
                        next_attempt = state.attempt + 2,
                        backoff_ms = delay.as_millis() as u64
                    );
                    self.sleeper.sleep(delay).await;
                    state = state.next();
                }
                status => {
                    let body = reply
                        .text()
                        .await
                        .unwrap_or_else(|_| "<unreadable body>".to_string());
                    warn!(event = "flow.run_failed", session_id = %session_id, status);
                    return Err(FlowError::Http { status, body });
                }
            }
        }
    }
}

/// Events of one run, in arrival order.
///
/// Implements `futures::Stream`; `next_event` is a shorthand for `next()`.
pub struct RunStream {
    session_id: String,
    events: EventStream,
}

impl RunStream {
    /// Session id sent with the request (supplied or generated).
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn next_event(&mut self) -> Option<Result<StreamEvent, FlowError>> {
        self.events.next().await
    }
}

impl futures::Stream for RunStream {
    type Item = Result<StreamEvent, FlowError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.as_mut().poll_next(cx)
    }
}

fn event_stream(
    session_id: String,
    reply: HttpReply,
    framing: Framing,
    on_token: Option<TokenCallback>,
) -> impl futures::Stream<Item = Result<StreamEvent, FlowError>> + Send {
    struct State {
        session_id: String,
        body: ByteStream,
        decoder: EventReconstructor,
        pending: VecDeque<StreamEvent>,
        on_token: Option<TokenCallback>,
        yielded: u64,
        done: bool,
    }

    stream::try_unfold(
        State {
            session_id,
            body: reply.body,
            decoder: EventReconstructor::new(framing),
            pending: VecDeque::new(),
            on_token,
            yielded: 0,
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    if let (Some(callback), Some(chunk)) = (&state.on_token, event.token_chunk()) {
                        callback(chunk);
                    }
                    state.yielded += 1;
                    return Ok(Some((event, state)));
                }
                if state.done {
                    debug!(event = "flow.stream_completed", session_id = %state.session_id, events = state.yielded);
                    return Ok(None);
                }

                match state.body.next().await {
                    Some(Ok(chunk)) => {
                        let events = state.decoder.push_chunk(&chunk);
                        state.pending.extend(events);
                    }
                    Some(Err(e)) => {
                        warn!(event = "flow.stream_failed", session_id = %state.session_id, error = %e);
                        return Err(e);
                    }
                    None => {
                        let events = state.decoder.finish();
                        state.pending.extend(events);
                        state.done = true;
                    }
                }
            }
        },
    )
}
