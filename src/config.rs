use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::types::{DEFAULT_IMAGE_PROMPT, DEFAULT_KEEP_ALIVE, TEXT_MODEL, VISION_MODEL};
use crate::{ConductorError, Result};

mod env;
mod http;

pub use env::{Env, parse_dotenv};
pub(crate) use http::build_http_client;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub const BASE_URL_ENV: &str = "OLLAMA_BASE_URL";
pub const TEXT_MODEL_ENV: &str = "OLLAMA_TEXT_MODEL";
pub const VISION_MODEL_ENV: &str = "OLLAMA_VISION_MODEL";
pub const KEEP_ALIVE_ENV: &str = "OLLAMA_KEEP_ALIVE";

fn default_image_options() -> BTreeMap<String, Number> {
    BTreeMap::from([
        ("num_ctx".to_string(), Number::from(2048_u64)),
        ("num_predict".to_string(), Number::from(256_u64)),
    ])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    #[serde(alias = "host")]
    pub base_url: String,
    pub text_model: String,
    pub vision_model: String,
    pub keep_alive: String,
    pub image_prompt: String,
    pub image_options: BTreeMap<String, Number>,
    pub connect_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub http_headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            text_model: TEXT_MODEL.to_string(),
            vision_model: VISION_MODEL.to_string(),
            keep_alive: DEFAULT_KEEP_ALIVE.to_string(),
            image_prompt: DEFAULT_IMAGE_PROMPT.to_string(),
            image_options: default_image_options(),
            connect_timeout_secs: 10,
            request_timeout_secs: None,
            http_headers: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str::<Self>(contents).map_err(|err| ConductorError::Config(err.to_string()))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await.map_err(|err| {
            ConductorError::Config(format!("read {} failed: {err}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Applies `OLLAMA_*` variables on top of file or default values.
    pub fn with_env_overrides(mut self, env: &Env) -> Self {
        let overrides = [
            (BASE_URL_ENV, &mut self.base_url),
            (TEXT_MODEL_ENV, &mut self.text_model),
            (VISION_MODEL_ENV, &mut self.vision_model),
            (KEEP_ALIVE_ENV, &mut self.keep_alive),
        ];
        for (key, field) in overrides {
            if let Some(value) = env.get(key) {
                *field = value.trim().to_string();
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(self.base_url.trim()).map_err(|err| {
            ConductorError::Config(format!("invalid base_url {:?}: {err}", self.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConductorError::Config(format!(
                "base_url must be http(s): {}",
                self.base_url
            )));
        }
        for (name, value) in [
            ("text_model", &self.text_model),
            ("vision_model", &self.vision_model),
            ("keep_alive", &self.keep_alive),
        ] {
            if value.trim().is_empty() {
                return Err(ConductorError::Config(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        build_http_client(
            Duration::from_secs(self.connect_timeout_secs.max(1)),
            self.request_timeout_secs.map(Duration::from_secs),
            &self.http_headers,
        )
    }
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
