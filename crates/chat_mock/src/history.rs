use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chat_stream::{
    Conversation, HistoryOperation, HistoryStatus, HistoryStore, PersistenceError, Turn,
};

use crate::lock_unpoisoned;

pub const MOCK_CONVERSATION_PREFIX: &str = "mock-conv-";

#[derive(Debug, Default)]
struct Conversations {
    next_id: u64,
    turns: BTreeMap<String, Vec<Turn>>,
}

/// In-process [`HistoryStore`] keyed by generated conversation ids.
#[derive(Debug)]
pub struct MemoryHistoryStore {
    status: HistoryStatus,
    conversations: Mutex<Conversations>,
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::with_status(HistoryStatus::Working)
    }
}

impl MemoryHistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that reports `status`; writes are refused unless it is `Working`.
    #[must_use]
    pub fn with_status(status: HistoryStatus) -> Self {
        Self {
            status,
            conversations: Mutex::new(Conversations::default()),
        }
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        lock_unpoisoned(&self.conversations)
            .turns
            .get(conversation_id)
            .map(|turns| Conversation::new(conversation_id, turns.clone()))
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        lock_unpoisoned(&self.conversations)
            .turns
            .keys()
            .cloned()
            .collect()
    }

    fn ensure_writable(&self, operation: HistoryOperation) -> Result<(), PersistenceError> {
        if self.status.is_working() {
            Ok(())
        } else {
            Err(PersistenceError::new(
                operation,
                format!("history store is {}", self.status),
            ))
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn status(&self) -> HistoryStatus {
        self.status.clone()
    }

    async fn create_conversation(&self, first_turn: &Turn) -> Result<String, PersistenceError> {
        self.ensure_writable(HistoryOperation::Create)?;
        let mut conversations = lock_unpoisoned(&self.conversations);
        conversations.next_id += 1;
        let id = format!("{MOCK_CONVERSATION_PREFIX}{}", conversations.next_id);
        conversations
            .turns
            .insert(id.clone(), vec![first_turn.clone()]);
        Ok(id)
    }

    async fn append_turns(
        &self,
        conversation_id: &str,
        turns: &[Turn],
    ) -> Result<(), PersistenceError> {
        self.ensure_writable(HistoryOperation::Append)?;
        let mut conversations = lock_unpoisoned(&self.conversations);
        let stored = conversations.turns.get_mut(conversation_id).ok_or_else(|| {
            PersistenceError::new(
                HistoryOperation::Append,
                format!("conversation {conversation_id} not found"),
            )
        })?;
        stored.extend_from_slice(turns);
        Ok(())
    }

    /// Drops the stored turns; the conversation id stays valid.
    async fn clear_conversation(&self, conversation_id: &str) -> Result<(), PersistenceError> {
        self.ensure_writable(HistoryOperation::Clear)?;
        let mut conversations = lock_unpoisoned(&self.conversations);
        let stored = conversations.turns.get_mut(conversation_id).ok_or_else(|| {
            PersistenceError::new(
                HistoryOperation::Clear,
                format!("conversation {conversation_id} not found"),
            )
        })?;
        stored.clear();
        Ok(())
    }
}
