use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::{ConductorError, Result};

pub(crate) mod wire;

pub const TEXT_MODEL: &str = "gemma3:1b";
pub const VISION_MODEL: &str = "llava-phi3";
pub const DEFAULT_KEEP_ALIVE: &str = "10m";
pub const DEFAULT_IMAGE_PROMPT: &str = "Describe what's in this picture";
pub const DEFAULT_COMPLETE_PROMPT: &str = "Tell me a haiku.";

/// One call against `/api/generate`.
///
/// Built with the consuming `with_*` methods and then moved into
/// [`crate::OllamaClient::generate`], which owns it for the rest of the call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub images: Vec<Vec<u8>>,
    pub stream: bool,
    pub keep_alive: String,
    pub options: BTreeMap<String, Number>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            images: Vec::new(),
            stream: false,
            keep_alive: DEFAULT_KEEP_ALIVE.to_string(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// At most one image is sent; a second call replaces the first.
    pub fn with_image(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.images = vec![bytes.into()];
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.keep_alive = keep_alive.into();
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<Number>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn with_options(mut self, options: BTreeMap<String, Number>) -> Self {
        self.options.extend(options);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(ConductorError::InvalidRequest(
                "generate request model is empty".to_string(),
            ));
        }
        if self.images.len() > 1 {
            return Err(ConductorError::InvalidRequest(format!(
                "at most one image per request (got {})",
                self.images.len()
            )));
        }
        if self.stream && !self.images.is_empty() {
            return Err(ConductorError::InvalidRequest(
                "image requests are not streamed".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    #[default]
    Idle,
    Running,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Running => f.write_str("running"),
        }
    }
}

/// How a dispatched generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// An entry of `/api/ps`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedModel {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl LoadedModel {
    /// Servers report tag-qualified names, so this is a prefix match.
    pub fn satisfies(&self, requested: &str) -> bool {
        self.name.starts_with(requested) || self.model.starts_with(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields_and_replaces_image() {
        let request = GenerateRequest::new("llava-phi3", "what is this")
            .with_image(vec![1_u8, 2, 3])
            .with_image(vec![4_u8])
            .with_option("num_ctx", 2048_u64)
            .with_keep_alive("5m");

        assert_eq!(request.images, vec![vec![4_u8]]);
        assert_eq!(request.keep_alive, "5m");
        assert_eq!(request.options.get("num_ctx"), Some(&Number::from(2048_u64)));
        assert!(!request.stream);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn rejects_streamed_image_and_blank_model() {
        let streamed = GenerateRequest::new("llava-phi3", "x")
            .with_image(vec![0_u8])
            .with_stream(true);
        assert!(streamed.validate().is_err());

        let blank = GenerateRequest::new("  ", "x");
        assert!(blank.validate().is_err());
    }

    #[test]
    fn loaded_model_matches_by_prefix_on_either_field() {
        let entry = LoadedModel {
            name: "gemma3:1b".to_string(),
            ..LoadedModel::default()
        };
        assert!(entry.satisfies("gemma3:1b"));
        assert!(entry.satisfies("gemma3"));
        assert!(!entry.satisfies("llava-phi3"));

        let by_model = LoadedModel {
            model: "llava-phi3:latest".to_string(),
            ..LoadedModel::default()
        };
        assert!(by_model.satisfies("llava-phi3"));
    }
}
