use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::availability::ModelAvailabilityChecker;
use crate::config::endpoint;
use crate::coordinator::Coordinator;
use crate::stream::{
    ChunkStream, ClosableStream, LineStream, closable_stream, parse_generate_stream,
};
use crate::types::wire::GenerateBody;
use crate::types::{GenerateRequest, Outcome};
use crate::utils::http::{MAX_RESPONSE_BODY_BYTES, response_text_truncated, send_checked};
use crate::utils::ndjson::ndjson_line_stream_from_response;
use crate::utils::task::AbortOnDrop;
use crate::{ConductorError, Result};

pub const LOADING_NOTICE: &str = "Loading model ...";
pub const LOAD_FAILED_NOTICE: &str = "Error loading model.";
pub const EMPTY_RESPONSE: &str = "(empty response)";
pub const THINKING_NOTICE: &str = "Thinking...";
pub const WAIT_STREAM_NOTICE: &str = "Wait stream ...";
pub const WAIT_COMPLETE_NOTICE: &str = "Wait complete ...";
pub const ANALYZING_PICTURE_NOTICE: &str = "Analyzing picture ...";

/// Progress line shown once the model is resident and the call goes out.
fn dispatch_notice(request: &GenerateRequest) -> String {
    if request.stream {
        format!("{WAIT_STREAM_NOTICE} {}", request.prompt)
    } else if !request.images.is_empty() {
        ANALYZING_PICTURE_NOTICE.to_string()
    } else {
        WAIT_COMPLETE_NOTICE.to_string()
    }
}

/// Text extracted from a buffered `/api/generate` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Model output from `response` or `message`.
    Answer(String),
    /// Successful call with nothing to show.
    Notice(String),
    /// Server-reported error or unsuccessful status.
    Failure(String),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Self::Answer(text) | Self::Notice(text) | Self::Failure(text) => text,
        }
    }
}

fn non_blank(text: &str) -> Option<String> {
    (!text.trim().is_empty()).then(|| text.to_string())
}

fn message_text(value: &Value) -> Option<String> {
    match value.get("message")? {
        Value::String(text) => non_blank(text),
        Value::Object(message) => message
            .get("content")
            .and_then(Value::as_str)
            .and_then(non_blank),
        _ => None,
    }
}

/// Picks the text to show for a buffered response.
///
/// `response`, then `message`, then `error` (as `"Error: ..."`); otherwise a
/// placeholder on success or `"HTTP <code>: <body>"` on failure. A body that
/// is not JSON is shown as-is when the status is successful.
pub fn extract_reply(status: StatusCode, body: &str) -> Reply {
    let http_failure = || Reply::Failure(format!("HTTP {}: {}", status.as_u16(), body));

    let Ok(value) = serde_json::from_str::<Value>(body) else {
        if !status.is_success() {
            return http_failure();
        }
        return match non_blank(body) {
            Some(raw) => Reply::Answer(raw),
            None => Reply::Notice(EMPTY_RESPONSE.to_string()),
        };
    };

    if let Some(text) = value
        .get("response")
        .and_then(Value::as_str)
        .and_then(non_blank)
    {
        return Reply::Answer(text);
    }
    if let Some(text) = message_text(&value) {
        return Reply::Answer(text);
    }
    if let Some(error) = value.get("error").and_then(Value::as_str).and_then(non_blank) {
        return Reply::Failure(format!("Error: {error}"));
    }

    if status.is_success() {
        Reply::Notice(EMPTY_RESPONSE.to_string())
    } else {
        http_failure()
    }
}

pub(crate) fn failure_notice(err: &ConductorError) -> String {
    match err {
        ConductorError::Api { status, body } => format!("HTTP {}: {}", status.as_u16(), body),
        other => format!("Request failed: {other}"),
    }
}

/// Sends `/api/generate` calls and turns their results into presentation
/// events.
#[derive(Clone)]
pub struct GenerationRequestExecutor {
    http: reqwest::Client,
    base_url: String,
}

impl GenerationRequestExecutor {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn generate_url(&self) -> String {
        endpoint(&self.base_url, "api/generate")
    }

    /// Buffered call. Only transport failures are errors; HTTP and server
    /// errors come back as [`Reply::Failure`].
    pub async fn complete(&self, request: &GenerateRequest) -> Result<Reply> {
        let body = GenerateBody::from_request(request).streaming(false);
        let response = self.http.post(self.generate_url()).json(&body).send().await?;
        let status = response.status();
        let text = response_text_truncated(response, MAX_RESPONSE_BODY_BYTES).await?;
        Ok(extract_reply(status, &text))
    }

    pub async fn open_stream(&self, request: &GenerateRequest) -> Result<LineStream> {
        if !request.images.is_empty() {
            return Err(ConductorError::InvalidRequest(
                "image requests are not streamed".to_string(),
            ));
        }
        let body = GenerateBody::from_request(request).streaming(true);
        let req = self.http.post(self.generate_url()).json(&body);
        let response = send_checked(req).await?;
        Ok(ndjson_line_stream_from_response(response))
    }

    /// Warm-up, dispatch and delivery for one request. Every path ends in
    /// exactly one attempt to settle `epoch` with the coordinator.
    pub(crate) async fn run(
        &self,
        checker: &ModelAvailabilityChecker,
        coordinator: &Arc<Coordinator>,
        epoch: u64,
        request: GenerateRequest,
    ) {
        let loaded = checker
            .ensure_loaded(&request.model, &request.keep_alive, || {
                coordinator.emit(epoch, |sink| sink.on_system_message(LOADING_NOTICE));
            })
            .await;
        if let Err(err) = loaded {
            report_failure(coordinator, epoch, LOAD_FAILED_NOTICE.to_string(), &err);
            return;
        }

        let notice = dispatch_notice(&request);
        coordinator.emit(epoch, |sink| sink.on_system_message(&notice));

        if request.stream {
            self.run_streaming(coordinator, epoch, &request).await;
        } else {
            self.run_complete(coordinator, epoch, &request).await;
        }
    }

    async fn run_complete(&self, coordinator: &Coordinator, epoch: u64, request: &GenerateRequest) {
        let reply = match self.complete(request).await {
            Ok(reply) => reply,
            Err(err) => {
                report_failure(coordinator, epoch, failure_notice(&err), &err);
                return;
            }
        };

        let outcome = match &reply {
            Reply::Failure(_) => Outcome::Failed(reply.text().to_string()),
            Reply::Answer(_) | Reply::Notice(_) => Outcome::Completed,
        };
        coordinator.finish(epoch, outcome, |sink| match &reply {
            Reply::Answer(_) => sink.on_assistant_message_start(reply.text()),
            Reply::Notice(_) | Reply::Failure(_) => sink.on_system_message(reply.text()),
        });
    }

    async fn run_streaming(
        &self,
        coordinator: &Arc<Coordinator>,
        epoch: u64,
        request: &GenerateRequest,
    ) {
        let lines = match self.open_stream(request).await {
            Ok(lines) => lines,
            Err(err) => {
                report_failure(coordinator, epoch, failure_notice(&err), &err);
                return;
            }
        };

        let ClosableStream { handle, stream } = closable_stream(lines);
        let chunks = parse_generate_stream(stream, coordinator.cancel_flag());
        let reader = tokio::spawn(deliver_chunks(coordinator.clone(), epoch, chunks));
        let _reader_guard = AbortOnDrop::for_task(&reader);
        if !coordinator.attach_stream(epoch, handle, reader.abort_handle()) {
            return;
        }

        match reader.await {
            Ok(Ok(delivered)) => {
                debug!(epoch, delivered, "stream ended");
                coordinator.finish(epoch, Outcome::Completed, |_| {});
            }
            Ok(Err(err)) => {
                let notice = format!("Error during streaming: {err}");
                report_failure(coordinator, epoch, notice, &err);
            }
            Err(err) if err.is_cancelled() => debug!(epoch, "stream reader aborted"),
            Err(err) => {
                let err = ConductorError::InvalidResponse(format!("stream reader failed: {err}"));
                report_failure(coordinator, epoch, failure_notice(&err), &err);
            }
        }
    }
}

/// Reader-task body: first chunk opens an assistant message, later chunks
/// append to it.
async fn deliver_chunks(
    coordinator: Arc<Coordinator>,
    epoch: u64,
    mut chunks: ChunkStream,
) -> Result<usize> {
    let mut delivered = 0_usize;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        let current = coordinator.emit(epoch, |sink| {
            if delivered == 0 {
                sink.on_assistant_message_start(&chunk.text);
            } else {
                sink.on_assistant_message_append(&chunk.text);
            }
        });
        if !current {
            break;
        }
        delivered += 1;
    }
    Ok(delivered)
}

fn report_failure(coordinator: &Coordinator, epoch: u64, notice: String, err: &ConductorError) {
    if coordinator.is_cancelled() {
        debug!(epoch, error = %err, "ignoring failure after cancellation");
        coordinator.finish(epoch, Outcome::Cancelled, |_| {});
        return;
    }
    warn!(epoch, error = %err, "generation failed");
    coordinator.finish(epoch, Outcome::Failed(err.to_string()), |sink| {
        sink.on_system_message(&notice)
    });
}
