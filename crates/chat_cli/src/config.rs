use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chat_api::{ChatApiClient, ChatApiConfig, ChatApiError, HttpHistoryStore};
use chat_mock::{MemoryHistoryStore, MockTransport, MOCK_TRANSPORT_ID};
use chat_stream::{ChatTransport, HistoryStore};
use serde::Deserialize;
use thiserror::Error;

pub const TRANSPORT_ENV_VAR: &str = "CHAT_TRANSPORT";
pub const CONFIG_PATH_ENV_VAR: &str = "CHAT_CONFIG_PATH";
pub const HTTP_TRANSPORT_ID: &str = "http";
pub const DEFAULT_TRANSPORT_ID: &str = MOCK_TRANSPORT_ID;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unsupported transport '{0}'. Available transports: mock, http")]
    UnsupportedTransport(String),

    #[error("CHAT_CONFIG_PATH must be set when CHAT_TRANSPORT=http")]
    MissingConfigPath,

    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(&'static str),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] ChatApiError),
}

/// On-disk shape of the HTTP transport config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfigFile {
    pub base_url: String,
    #[serde(default)]
    pub timeout_sec: Option<u64>,
    #[serde(default)]
    pub history: Option<bool>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl HttpConfigFile {
    pub fn parse(path: &Path, raw: &str) -> Result<Self, ConfigError> {
        let parsed = serde_json::from_str::<Self>(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if parsed.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url must be non-empty"));
        }
        if parsed.timeout_sec == Some(0) {
            return Err(ConfigError::Invalid("timeout_sec must be > 0"));
        }
        Ok(parsed)
    }

    pub fn into_api_config(self) -> ChatApiConfig {
        let mut config = ChatApiConfig::new(self.base_url)
            .with_history(self.history.unwrap_or(true))
            .with_headers(self.headers);

        if let Some(timeout_sec) = self.timeout_sec {
            config = config.with_timeout(Duration::from_secs(timeout_sec));
        }

        config
    }
}

pub fn load_http_config(path: &Path) -> Result<ChatApiConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(HttpConfigFile::parse(path, &raw)?.into_api_config())
}

/// Transport and history store the session is built from.
pub struct Backend {
    pub id: &'static str,
    pub transport: Arc<dyn ChatTransport>,
    pub history: Arc<dyn HistoryStore>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("id", &self.id).finish_non_exhaustive()
    }
}

pub fn backend_from_env() -> Result<Backend, ConfigError> {
    let transport_id = non_empty_env(TRANSPORT_ENV_VAR);
    let config_path = non_empty_env(CONFIG_PATH_ENV_VAR).map(PathBuf::from);

    backend_for(
        transport_id.as_deref().unwrap_or(DEFAULT_TRANSPORT_ID),
        config_path.as_deref(),
    )
}

pub fn backend_for(transport_id: &str, config_path: Option<&Path>) -> Result<Backend, ConfigError> {
    match transport_id {
        MOCK_TRANSPORT_ID => Ok(Backend {
            id: MOCK_TRANSPORT_ID,
            transport: Arc::new(MockTransport::default()),
            history: Arc::new(MemoryHistoryStore::new()),
        }),
        HTTP_TRANSPORT_ID => {
            let path = config_path.ok_or(ConfigError::MissingConfigPath)?;
            let client = ChatApiClient::new(load_http_config(path)?)?;
            Ok(Backend {
                id: HTTP_TRANSPORT_ID,
                transport: Arc::new(client.clone()),
                history: Arc::new(HttpHistoryStore::new(client)),
            })
        }
        unknown => Err(ConfigError::UnsupportedTransport(unknown.to_string())),
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
