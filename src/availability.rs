use tracing::{debug, info, warn};

use crate::config::endpoint;
use crate::types::LoadedModel;
use crate::types::wire::{GenerateBody, PsResponse};
use crate::utils::http::{MAX_ERROR_BODY_BYTES, response_text_truncated, send_checked_json};
use crate::{ConductorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    AlreadyLoaded,
    WarmedUp,
}

/// Probes `/api/ps` and warms a model up when it is not resident yet.
#[derive(Clone)]
pub struct ModelAvailabilityChecker {
    http: reqwest::Client,
    base_url: String,
}

impl ModelAvailabilityChecker {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub async fn loaded_models(&self) -> Result<Vec<LoadedModel>> {
        let url = endpoint(&self.base_url, "api/ps");
        let parsed = send_checked_json::<PsResponse>(self.http.get(url)).await?;
        Ok(parsed.models)
    }

    pub async fn is_loaded(&self, model: &str) -> Result<bool> {
        let models = self.loaded_models().await?;
        Ok(models.iter().any(|entry| entry.satisfies(model)))
    }

    /// Returns once `model` is resident. `on_warm_up` runs right before the
    /// warm-up call, and only when one is needed.
    pub async fn ensure_loaded(
        &self,
        model: &str,
        keep_alive: &str,
        on_warm_up: impl FnOnce(),
    ) -> Result<Availability> {
        let loaded = self
            .is_loaded(model)
            .await
            .map_err(|err| ConductorError::load(model, err))?;
        if loaded {
            debug!(model, "model already loaded");
            return Ok(Availability::AlreadyLoaded);
        }

        info!(model, "model not loaded; warming up");
        on_warm_up();
        self.warm_up(model, keep_alive)
            .await
            .map_err(|err| ConductorError::load(model, err))?;
        Ok(Availability::WarmedUp)
    }

    async fn warm_up(&self, model: &str, keep_alive: &str) -> Result<()> {
        let url = endpoint(&self.base_url, "api/generate");
        let req = self
            .http
            .post(url)
            .json(&GenerateBody::warm_up(model, keep_alive));
        let response = req.send().await?;
        let status = response.status();
        // The call only completes once the server is done loading.
        let body = response_text_truncated(response, MAX_ERROR_BODY_BYTES).await?;
        if !status.is_success() {
            // The real request still goes out and reports its own error.
            warn!(model, status = status.as_u16(), %body, "warm-up returned an error status");
        }
        Ok(())
    }
}
