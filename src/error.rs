use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("failed to load model {model}: {reason}")]
    Load { model: String, reason: String },
    #[error("api error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("no tokio runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
    #[error("a generation request is already running")]
    Busy,
}

impl ConductorError {
    pub(crate) fn load(model: &str, err: impl std::fmt::Display) -> Self {
        Self::Load {
            model: model.to_string(),
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConductorError>;
