use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Number;

use super::{GenerateRequest, LoadedModel};

#[derive(Debug, Serialize)]
pub(crate) struct GenerateBody<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
    stream: bool,
    keep_alive: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a BTreeMap<String, Number>>,
}

impl<'a> GenerateBody<'a> {
    pub(crate) fn from_request(request: &'a GenerateRequest) -> Self {
        Self {
            model: &request.model,
            prompt: Some(&request.prompt),
            stream: request.stream,
            keep_alive: &request.keep_alive,
            images: request
                .images
                .iter()
                .map(|bytes| STANDARD.encode(bytes))
                .collect(),
            options: Some(&request.options).filter(|options| !options.is_empty()),
        }
    }

    pub(crate) fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Promptless, non-streaming call that only forces the model into memory.
    pub(crate) fn warm_up(model: &'a str, keep_alive: &'a str) -> Self {
        Self {
            model,
            prompt: None,
            stream: false,
            keep_alive,
            images: Vec::new(),
            options: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PsResponse {
    #[serde(default)]
    pub(crate) models: Vec<LoadedModel>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StreamRecord {
    #[serde(default)]
    pub(crate) response: Option<String>,
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) done: bool,
}
