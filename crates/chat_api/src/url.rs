/// Default backend root for local development servers.
pub const DEFAULT_CHAT_BASE_URL: &str = "http://127.0.0.1:50505";

const CONVERSATION_PATH: &str = "/conversation";

/// History routes exposed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryEndpoint {
    Ensure,
    Create,
    Update,
    Clear,
}

impl HistoryEndpoint {
    pub fn path(self) -> &'static str {
        match self {
            Self::Ensure => "/history/ensure",
            Self::Create => "/history/create",
            Self::Update => "/history/update",
            Self::Clear => "/history/clear",
        }
    }
}

/// Normalize a configured base URL to the backend root.
///
/// Normalization rules:
/// 1) blank input falls back to [`DEFAULT_CHAT_BASE_URL`]
/// 2) trailing slashes are dropped
/// 3) a trailing `/conversation` is stripped so either form may be configured
pub fn normalize_base_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_CHAT_BASE_URL
    } else {
        input.trim()
    };

    let trimmed = base.trim_end_matches('/');
    trimmed
        .strip_suffix(CONVERSATION_PATH)
        .unwrap_or(trimmed)
        .trim_end_matches('/')
        .to_string()
}

pub fn conversation_url(base_url: &str) -> String {
    format!("{}{CONVERSATION_PATH}", normalize_base_url(base_url))
}

pub fn history_url(base_url: &str, endpoint: HistoryEndpoint) -> String {
    format!("{}{}", normalize_base_url(base_url), endpoint.path())
}
