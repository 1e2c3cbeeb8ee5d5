use futures_util::StreamExt;
use serde::de::DeserializeOwned;

use crate::{ConductorError, Result};

pub(crate) const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;
pub(crate) const MAX_RESPONSE_BODY_BYTES: usize = 16 * 1024 * 1024;

const TRUNCATED_MARKER: &str = "...(truncated)";

/// Reads at most `max_bytes` of the body as lossy UTF-8. Transport errors
/// mid-body are returned, which is how an aborted buffered call surfaces.
pub(crate) async fn response_text_truncated(
    response: reqwest::Response,
    max_bytes: usize,
) -> Result<String> {
    let max_bytes = max_bytes.max(1);
    let mut body = Vec::<u8>::new();
    let mut truncated = false;

    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        let room = max_bytes - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if chunk.len() > room {
            truncated = true;
            break;
        }
    }

    let mut text = String::from_utf8_lossy(&body).into_owned();
    if truncated {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(TRUNCATED_MARKER);
    }
    Ok(text)
}

/// Sends `req`, turning any non-2xx status into [`ConductorError::Api`]
/// carrying the (bounded) body.
pub(crate) async fn send_checked(req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = req.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response_text_truncated(response, MAX_ERROR_BODY_BYTES)
        .await
        .unwrap_or_default();
    Err(ConductorError::Api { status, body })
}

pub(crate) async fn send_checked_json<T: DeserializeOwned>(
    req: reqwest::RequestBuilder,
) -> Result<T> {
    let response = send_checked(req).await?;
    let body = response_text_truncated(response, MAX_RESPONSE_BODY_BYTES).await?;
    Ok(serde_json::from_str::<T>(&body)?)
}
