//! Ordered transcript of committed turns and the reconciliation rules that
//! append a finished exchange to it.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::side_channel::{
    citations_from_turn, exec_results_from_turn, latest_code_exec_result, Citation, ExecResult,
};
use crate::turn::{Role, Turn};

/// Whether the exchange starts a conversation or continues a server-persisted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendMode {
    /// No server id: the user turn is committed together with the answer.
    NewConversation,
    /// Server id present: the user turn was echoed at send time.
    Continuing,
}

impl AppendMode {
    pub fn for_conversation(conversation_id: Option<&str>) -> Self {
        match conversation_id {
            Some(_) => Self::Continuing,
            None => Self::NewConversation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// The turns produced by one request, ready to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    user: Turn,
    tool: Option<Turn>,
    assistant: Option<Turn>,
    error: Option<Turn>,
    outcome: ExchangeOutcome,
}

impl Exchange {
    /// A completed or cancelled answer. The assistant turn is always committed.
    #[must_use]
    pub fn answered(
        user: Turn,
        tool: Option<Turn>,
        assistant: Turn,
        outcome: ExchangeOutcome,
    ) -> Self {
        Self {
            user,
            tool: tool.filter(|tool| !tool.content().is_empty()),
            assistant: Some(assistant),
            error: None,
            outcome,
        }
    }

    /// A failed request. Partial assistant content is kept only if non-empty,
    /// and the tool turn only alongside it.
    #[must_use]
    pub fn failed(user: Turn, tool: Option<Turn>, assistant: Option<Turn>, error: Turn) -> Self {
        let assistant = assistant.filter(|assistant| !assistant.content().is_empty());
        let tool = tool
            .filter(|tool| !tool.content().is_empty())
            .filter(|_| assistant.is_some());
        Self {
            user,
            tool,
            assistant,
            error: Some(error),
            outcome: ExchangeOutcome::Failed,
        }
    }

    pub fn user(&self) -> &Turn {
        &self.user
    }

    pub fn tool(&self) -> Option<&Turn> {
        self.tool.as_ref()
    }

    pub fn assistant(&self) -> Option<&Turn> {
        self.assistant.as_ref()
    }

    pub fn error(&self) -> Option<&Turn> {
        self.error.as_ref()
    }

    pub fn outcome(&self) -> ExchangeOutcome {
        self.outcome
    }

    /// Turns appended to the transcript, in causal order.
    pub fn committed_turns(&self, mode: AppendMode) -> Vec<Turn> {
        let mut turns = Vec::with_capacity(4);
        if mode == AppendMode::NewConversation {
            turns.push(self.user.clone());
        }
        if let Some(assistant) = &self.assistant {
            turns.extend(self.tool.clone());
            turns.push(assistant.clone());
        }
        turns.extend(self.error.clone());
        turns
    }

    /// Turns sent to the history store after the exchange: `[tool?, assistant]`.
    pub fn answer_turns(&self) -> Vec<Turn> {
        let Some(assistant) = &self.assistant else {
            return Vec::new();
        };
        let mut turns = Vec::with_capacity(2);
        turns.extend(self.tool.clone());
        turns.push(assistant.clone());
        turns
    }
}

/// Ordered committed turns for one conversation.
///
/// Positions are fixed once appended; only [`Transcript::clear`] removes turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    #[must_use]
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Echo the user turn of a continuing conversation at send time.
    pub fn push_user_echo(&mut self, user: Turn) {
        debug_assert_eq!(user.role(), Role::User);
        self.turns.push(user);
    }

    /// Appends a finished exchange and returns the appended turns.
    pub fn commit(&mut self, exchange: &Exchange, mode: AppendMode) -> Vec<Turn> {
        let appended = exchange.committed_turns(mode);
        tracing::debug!(
            ?mode,
            outcome = ?exchange.outcome(),
            appended = appended.len(),
            "committing exchange"
        );
        self.turns.extend(appended.iter().cloned());
        appended
    }

    /// Committed turns followed by the in-progress exchange, without mutating
    /// the transcript.
    pub fn preview(
        &self,
        user: &Turn,
        tool: Option<&Turn>,
        assistant: Option<&Turn>,
        mode: AppendMode,
    ) -> Vec<Turn> {
        let mut turns = self.turns.clone();
        if mode == AppendMode::NewConversation {
            turns.push(user.clone());
        }
        turns.extend(tool.filter(|tool| !tool.content().is_empty()).cloned());
        turns.extend(assistant.cloned());
        turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Citations annotating the assistant turn at `index`, found through its
    /// positional predecessor. Empty when there is no tool turn or it does not parse.
    pub fn citations_for(&self, index: usize) -> Vec<Citation> {
        self.tool_before(index)
            .map(|tool| log_parse_failure(citations_from_turn(tool), "citations"))
            .unwrap_or_default()
    }

    /// Execution results annotating the assistant turn at `index`.
    pub fn exec_results_for(&self, index: usize) -> Vec<ExecResult> {
        self.tool_before(index)
            .map(|tool| log_parse_failure(exec_results_from_turn(tool), "exec results"))
            .unwrap_or_default()
    }

    /// Latest `code_exec_result` (chart or value) for the assistant turn at `index`.
    pub fn chart_for(&self, index: usize) -> Option<String> {
        latest_code_exec_result(&self.exec_results_for(index))
    }

    fn tool_before(&self, index: usize) -> Option<&Turn> {
        let assistant = self.turns.get(index)?;
        if assistant.role() != Role::Assistant {
            return None;
        }
        let previous = self.turns.get(index.checked_sub(1)?)?;
        (previous.role() == Role::Tool).then_some(previous)
    }
}

fn log_parse_failure<T: Default>(result: Result<T, ParseError>, what: &str) -> T {
    result.unwrap_or_else(|error| {
        tracing::debug!(%error, what, "tool payload did not parse");
        T::default()
    })
}

/// A conversation as known to the client: a server id once persisted, and its turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub turns: Transcript,
}

impl Conversation {
    #[must_use]
    pub fn new(id: impl Into<String>, turns: Vec<Turn>) -> Self {
        Self {
            id: Some(id.into()),
            title: None,
            turns: Transcript::from_turns(turns),
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}
