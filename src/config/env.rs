use std::collections::BTreeMap;
use std::path::Path;

use crate::{ConductorError, Result};

/// `OLLAMA_*` lookups: dotenv entries first, then the process environment.
/// Blank values count as unset in both.
#[derive(Clone, Default)]
pub struct Env {
    pub dotenv: BTreeMap<String, String>,
}

// Keys only; dotenv files routinely carry credentials for other tools.
impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("dotenv_keys", &self.dotenv.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Env {
    pub fn parse_dotenv(contents: &str) -> Self {
        Self {
            dotenv: parse_dotenv(contents),
        }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await.map_err(|err| {
            ConductorError::Config(format!("read dotenv {} failed: {err}", path.display()))
        })?;
        Ok(Self::parse_dotenv(&contents))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.dotenv
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
            .filter(|value| !value.trim().is_empty())
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

fn parse_entry(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").map_or(line, str::trim_start);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let value = unquote(value.trim());
    if key.is_empty() || value.trim().is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

/// `KEY=value` lines with optional `export ` and matching quotes. Comments,
/// malformed lines and blank values are dropped; a later key wins.
pub fn parse_dotenv(contents: &str) -> BTreeMap<String, String> {
    contents.lines().filter_map(parse_entry).collect()
}
