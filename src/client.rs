use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::availability::{Availability, ModelAvailabilityChecker};
use crate::config::ClientConfig;
use crate::coordinator::Coordinator;
use crate::executor::{GenerationRequestExecutor, LOADING_NOTICE, THINKING_NOTICE};
use crate::sink::EventSink;
use crate::types::{ClientState, DEFAULT_COMPLETE_PROMPT, GenerateRequest, LoadedModel, Outcome};
use crate::{ConductorError, Result};

/// Handle to a dispatched generation.
///
/// Dropping it does not cancel anything; use [`OllamaClient::cancel`].
#[derive(Debug)]
pub struct PendingGeneration {
    id: u64,
    outcome: oneshot::Receiver<Outcome>,
}

impl PendingGeneration {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn outcome(self) -> Outcome {
        self.outcome.await.unwrap_or_else(|_| {
            Outcome::Failed("generation ended without reporting an outcome".to_string())
        })
    }
}

struct Inner {
    config: ClientConfig,
    checker: ModelAvailabilityChecker,
    executor: GenerationRequestExecutor,
    coordinator: Arc<Coordinator>,
    sink: Arc<dyn EventSink>,
}

/// Client for one local inference server, running at most one generation at
/// a time.
#[derive(Clone)]
pub struct OllamaClient {
    inner: Arc<Inner>,
}

impl OllamaClient {
    pub fn new(sink: Arc<dyn EventSink>) -> Result<Self> {
        Self::from_config(ClientConfig::default(), sink)
    }

    pub fn from_config(config: ClientConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        config.validate()?;
        let http = config.http_client()?;
        Ok(Self::with_http_client(config, http, sink))
    }

    pub fn with_http_client(
        config: ClientConfig,
        http: reqwest::Client,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let checker = ModelAvailabilityChecker::new(http.clone(), config.base_url.clone());
        let executor = GenerationRequestExecutor::new(http, config.base_url.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                checker,
                executor,
                coordinator: Arc::new(Coordinator::new(sink.clone())),
                sink,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ClientState {
        self.inner.coordinator.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ClientState::Running
    }

    /// Starts `request` in the background and returns immediately.
    ///
    /// Fails with [`ConductorError::Busy`] while another request is running,
    /// leaving that request untouched. Must be called inside a Tokio runtime.
    pub fn generate(&self, request: GenerateRequest) -> Result<PendingGeneration> {
        self.dispatch(request, None, None)
    }

    /// Streams an answer to `prompt` from the configured text model.
    pub fn chat(&self, prompt: &str) -> Result<PendingGeneration> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ConductorError::InvalidRequest("prompt is empty".to_string()));
        }
        let config = &self.inner.config;
        let request = GenerateRequest::new(&config.text_model, prompt)
            .with_stream(true)
            .with_keep_alive(&config.keep_alive);
        self.dispatch(request, Some(prompt.to_string()), Some(THINKING_NOTICE))
    }

    /// Buffered answer to `prompt` from the configured text model. A blank
    /// prompt asks for [`DEFAULT_COMPLETE_PROMPT`].
    pub fn complete(&self, prompt: &str) -> Result<PendingGeneration> {
        let prompt = match prompt.trim() {
            "" => DEFAULT_COMPLETE_PROMPT,
            prompt => prompt,
        };
        let config = &self.inner.config;
        let request =
            GenerateRequest::new(&config.text_model, prompt).with_keep_alive(&config.keep_alive);
        self.dispatch(request, Some(prompt.to_string()), None)
    }

    /// Captions `image` with the configured vision model.
    pub fn describe_image(&self, image: Vec<u8>) -> Result<PendingGeneration> {
        if image.is_empty() {
            return Err(ConductorError::InvalidRequest("image is empty".to_string()));
        }
        let config = &self.inner.config;
        let request = GenerateRequest::new(&config.vision_model, &config.image_prompt)
            .with_image(image)
            .with_keep_alive(&config.keep_alive)
            .with_options(config.image_options.clone());
        self.dispatch(request, None, None)
    }

    /// Stops the running request, if any. Safe to call at any time; only the
    /// call that actually stops a request emits the cancellation notice.
    pub fn cancel(&self) -> bool {
        self.inner.coordinator.cancel()
    }

    pub async fn ensure_loaded(&self, model: &str) -> Result<Availability> {
        let sink = self.inner.sink.clone();
        self.inner
            .checker
            .ensure_loaded(model, &self.inner.config.keep_alive, move || {
                sink.on_system_message(LOADING_NOTICE)
            })
            .await
    }

    pub async fn loaded_models(&self) -> Result<Vec<LoadedModel>> {
        self.inner.checker.loaded_models().await
    }

    fn dispatch(
        &self,
        request: GenerateRequest,
        user_message: Option<String>,
        notice: Option<&str>,
    ) -> Result<PendingGeneration> {
        request.validate()?;
        let runtime = tokio::runtime::Handle::try_current()?;
        let coordinator = &self.inner.coordinator;
        let (epoch, outcome) = coordinator.begin()?;

        coordinator.emit(epoch, |sink| {
            if let Some(text) = &user_message {
                sink.on_user_message(text);
            }
            if let Some(notice) = notice {
                sink.on_system_message(notice);
            }
        });
        info!(
            epoch,
            model = %request.model,
            stream = request.stream,
            images = request.images.len(),
            "dispatching generation"
        );

        let inner = self.inner.clone();
        let task = runtime.spawn(async move {
            let pipeline = inner
                .executor
                .run(&inner.checker, &inner.coordinator, epoch, request);
            if AssertUnwindSafe(pipeline).catch_unwind().await.is_err() {
                error!(epoch, "generation pipeline panicked");
                inner.coordinator.finish(
                    epoch,
                    Outcome::Failed("generation pipeline panicked".to_string()),
                    |sink| sink.on_system_message("Request failed."),
                );
            }
        });
        coordinator.attach_transport(epoch, task.abort_handle());

        Ok(PendingGeneration { id: epoch, outcome })
    }
}
