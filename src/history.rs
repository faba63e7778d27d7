//! Boundary to the optional server-side conversation store.

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::turn::Turn;

/// Availability of the history store, as reported by the store itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryStatus {
    Working,
    NotConfigured,
    NotWorking,
    InvalidCredentials,
    Misconfigured(String),
}

impl HistoryStatus {
    pub fn is_working(&self) -> bool {
        matches!(self, Self::Working)
    }

    /// Host-facing notice when history was expected but is unusable.
    ///
    /// `Working` and `NotConfigured` need no notice.
    pub fn notice(&self) -> Option<HistoryNotice> {
        let status = match self {
            Self::Working | Self::NotConfigured => return None,
            Self::NotWorking => "History store is configured but not working".to_string(),
            Self::InvalidCredentials => "History store has invalid credentials".to_string(),
            Self::Misconfigured(reason) => reason.clone(),
        };
        Some(HistoryNotice {
            title: "Chat history is not enabled".to_string(),
            subtitle: format!("{status}. Please contact the site administrator."),
        })
    }
}

impl std::fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Working => f.write_str("working"),
            Self::NotConfigured => f.write_str("not configured"),
            Self::NotWorking => f.write_str("not working"),
            Self::InvalidCredentials => f.write_str("invalid credentials"),
            Self::Misconfigured(reason) => write!(f, "misconfigured: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryNotice {
    pub title: String,
    pub subtitle: String,
}

/// Durable conversation store consumed by the session after each exchange.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn status(&self) -> HistoryStatus;

    /// Creates a conversation from its first turn and returns the server id.
    async fn create_conversation(&self, first_turn: &Turn) -> Result<String, PersistenceError>;

    async fn append_turns(
        &self,
        conversation_id: &str,
        turns: &[Turn],
    ) -> Result<(), PersistenceError>;

    async fn clear_conversation(&self, conversation_id: &str) -> Result<(), PersistenceError>;
}
