use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::{ConductorError, Result};

/// Blank names are skipped so an emptied TOML entry does not break startup.
pub(super) fn header_map_from_pairs(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    headers
        .iter()
        .filter(|(name, _)| !name.trim().is_empty())
        .map(|(name, value)| -> Result<(HeaderName, HeaderValue)> {
            let name = name.trim();
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                ConductorError::Config(format!("http_headers: bad name {name:?}: {err}"))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|err| {
                ConductorError::Config(format!("http_headers: bad value for {name:?}: {err}"))
            })?;
            Ok((header_name, header_value))
        })
        .collect()
}

// `request_timeout` bounds a whole call, streamed bodies included, so it is
// left unset unless configured.
pub(crate) fn build_http_client(
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
    headers: &BTreeMap<String, String>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .default_headers(header_map_from_pairs(headers)?);
    if let Some(timeout) = request_timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(ConductorError::Http)
}
