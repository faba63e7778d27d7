use crate::failure::{display_error_message, NO_CONTENT_ERROR};
use crate::fragment::{Fragment, MessageFragment};
use crate::side_channel::{
    exec_results_snapshot, has_exec_results_marker, parse_exec_results, ExecResultLog,
};
use crate::transcript::{Exchange, ExchangeOutcome};
use crate::turn::{new_turn_id, now_rfc3339, Role, Turn};

/// Observable effect of absorbing one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Absorbed {
    AssistantDelta(String),
    ToolTurn(Turn),
    ExecResults,
    ErrorTurn(Turn),
    ConversationAssigned(String),
    Failure(String),
}

/// How the fragment sequence of a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Source exhausted.
    EndOfStream,
    /// Caller cancelled; the partial answer is kept.
    Cancelled,
    /// Transport failure with its raw message.
    Failed(String),
}

/// Folds the fragments of one request into in-progress turns.
///
/// Holds at most one active assistant turn and one active tool turn. Scoped to
/// a single request: a new request starts from a fresh accumulator.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    assistant: Option<Turn>,
    tool: Option<Turn>,
    error: Option<Turn>,
    failure: Option<String>,
    exec_results: ExecResultLog,
    exec_snapshot: Option<String>,
    conversation_id: Option<String>,
    content_fragments: usize,
}

impl TurnAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorbs one fragment in arrival order.
    ///
    /// After an error turn or a terminal failure record nothing else is merged.
    pub fn absorb(&mut self, fragment: Fragment) -> Vec<Absorbed> {
        if self.is_closed() {
            tracing::debug!(role = ?fragment.role(), "ignoring fragment after terminal error");
            return Vec::new();
        }

        match fragment {
            Fragment::Assistant(message) => {
                self.content_fragments += 1;
                self.absorb_assistant(message)
            }
            Fragment::Tool(message) => {
                self.content_fragments += 1;
                self.absorb_tool(message)
            }
            Fragment::Error(message) => {
                self.content_fragments += 1;
                let turn = turn_from_message(Role::Error, message);
                self.error = Some(turn.clone());
                vec![Absorbed::ErrorTurn(turn)]
            }
            Fragment::User(_) => Vec::new(),
            Fragment::ConversationAssigned { conversation_id } => {
                self.conversation_id = Some(conversation_id.clone());
                vec![Absorbed::ConversationAssigned(conversation_id)]
            }
            Fragment::Failure { message } => {
                self.failure = Some(message.clone());
                vec![Absorbed::Failure(message)]
            }
        }
    }

    fn absorb_assistant(&mut self, message: MessageFragment) -> Vec<Absorbed> {
        let mut effects = Vec::new();
        let delta = message.content.as_text();
        if let Some(absorbed) = self.absorb_exec_results(&delta) {
            effects.push(absorbed);
            effects.extend(self.tool.clone().map(Absorbed::ToolTurn));
        }

        let assistant = self.assistant.get_or_insert_with(|| {
            Turn::new(
                message.id.clone().unwrap_or_else(new_turn_id),
                Role::Assistant,
                "",
            )
        });
        assistant.push_content(&delta);
        if let Some(id) = &message.id {
            assistant.set_id(id.clone());
        }
        if let Some(date) = &message.date {
            assistant.set_date(date.clone());
        }
        if message.feedback.is_some() {
            assistant.set_feedback(message.feedback);
        }
        if message.context.is_some() {
            assistant.set_context(message.context.clone());
        }
        effects.push(Absorbed::AssistantDelta(delta));

        if let Some(context) = message.context {
            let tool = Turn::tool(context);
            self.tool = Some(tool.clone());
            effects.push(Absorbed::ToolTurn(tool));
        }

        effects
    }

    fn absorb_tool(&mut self, message: MessageFragment) -> Vec<Absorbed> {
        let mut effects = Vec::new();
        effects.extend(self.absorb_exec_results(&message.content.as_text()));

        let tool = turn_from_message(Role::Tool, message);
        self.tool = Some(tool.clone());
        effects.push(Absorbed::ToolTurn(tool));
        effects
    }

    /// Execution-results payloads are surfaced as their own tool turn and
    /// snapshotted onto the assistant turn's context.
    fn absorb_exec_results(&mut self, payload: &str) -> Option<Absorbed> {
        if !has_exec_results_marker(payload) {
            return None;
        }

        let batch = match parse_exec_results(payload) {
            Ok(batch) => batch,
            Err(error) => {
                tracing::debug!(%error, "execution results marker without parsable payload");
                return None;
            }
        };

        match exec_results_snapshot(&batch) {
            Ok(snapshot) => self.exec_snapshot = Some(snapshot),
            Err(error) => tracing::debug!(%error, "execution results snapshot failed"),
        }
        self.exec_results.absorb(batch);
        self.tool = Some(Turn::tool(payload));
        Some(Absorbed::ExecResults)
    }

    pub fn is_closed(&self) -> bool {
        self.error.is_some() || self.failure.is_some()
    }

    pub fn has_content(&self) -> bool {
        self.content_fragments > 0
    }

    /// Active assistant turn with any execution-results snapshot applied.
    pub fn assistant(&self) -> Option<Turn> {
        let mut assistant = self.assistant.clone()?;
        if let Some(snapshot) = &self.exec_snapshot {
            assistant.set_context(Some(snapshot.clone()));
        }
        Some(assistant)
    }

    pub fn assistant_text(&self) -> String {
        self.assistant
            .as_ref()
            .map(Turn::text)
            .unwrap_or_default()
    }

    /// Active tool turn, if it carries any content.
    pub fn tool(&self) -> Option<&Turn> {
        self.tool
            .as_ref()
            .filter(|tool| !tool.content().is_empty())
    }

    pub fn exec_results(&self) -> &ExecResultLog {
        &self.exec_results
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Closes accumulation and builds the exchange to commit.
    pub fn finish(self, user: Turn, termination: Termination) -> Exchange {
        let assistant = self.assistant();
        let tool = self.tool().cloned();

        if let Some(error) = self.error {
            return Exchange::failed(user, tool, assistant, error);
        }
        if let Some(message) = self.failure {
            let error = Turn::error(display_error_message(&message));
            return Exchange::failed(user, tool, assistant, error);
        }

        match termination {
            Termination::Failed(message) => {
                let error = Turn::error(display_error_message(&message));
                Exchange::failed(user, tool, assistant, error)
            }
            Termination::Cancelled => Exchange::answered(
                user,
                tool,
                assistant.unwrap_or_else(empty_assistant),
                ExchangeOutcome::Cancelled,
            ),
            Termination::EndOfStream if self.content_fragments == 0 => {
                Exchange::failed(user, None, None, Turn::error(NO_CONTENT_ERROR))
            }
            Termination::EndOfStream => Exchange::answered(
                user,
                tool,
                assistant.unwrap_or_else(empty_assistant),
                ExchangeOutcome::Completed,
            ),
        }
    }
}

fn empty_assistant() -> Turn {
    Turn::new(new_turn_id(), Role::Assistant, "")
}

fn turn_from_message(role: Role, message: MessageFragment) -> Turn {
    let mut turn = Turn::new(
        message.id.unwrap_or_else(new_turn_id),
        role,
        message.content,
    )
    .with_date(message.date.unwrap_or_else(now_rfc3339));
    turn.set_context(message.context);
    turn.set_feedback(message.feedback);
    turn
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::transcript::AppendMode;

    fn user() -> Turn {
        Turn::new("u1", Role::User, "q")
    }

    fn assistant(text: &str) -> Fragment {
        Fragment::Assistant(MessageFragment::text(text).with_id("a1"))
    }

    #[test]
    fn assistant_content_is_exact_concatenation_of_deltas() {
        let mut accumulator = TurnAccumulator::new();
        for delta in ["Hel", "lo", ", ", "", "world"] {
            accumulator.absorb(assistant(delta));
        }

        assert_eq!(accumulator.assistant_text(), "Hello, world");
    }

    #[test]
    fn latest_fragment_fields_win() {
        let mut accumulator = TurnAccumulator::new();
        accumulator.absorb(Fragment::Assistant(MessageFragment::text("a").with_id("first")));
        accumulator.absorb(Fragment::Assistant(MessageFragment {
            id: Some("second".to_string()),
            date: Some("2026-02-14T00:00:00Z".to_string()),
            ..MessageFragment::text("b")
        }));

        let turn = accumulator.assistant().expect("assistant turn");
        assert_eq!(turn.id(), "second");
        assert_eq!(turn.date(), "2026-02-14T00:00:00Z");
        assert_eq!(turn.text(), "ab");
    }

    #[test]
    fn tool_fragments_replace_wholesale() {
        let mut accumulator = TurnAccumulator::new();
        accumulator.absorb(Fragment::Tool(MessageFragment::text("first")));
        accumulator.absorb(Fragment::Tool(MessageFragment::text("second")));

        assert_eq!(
            accumulator.tool().map(Turn::text).as_deref(),
            Some("second")
        );
    }

    #[test]
    fn assistant_context_becomes_fresh_tool_turn() {
        let mut accumulator = TurnAccumulator::new();
        let effects = accumulator.absorb(Fragment::Assistant(
            MessageFragment::text("Hi").with_context(r#"{"citations":[]}"#),
        ));

        assert!(matches!(
            effects.last(),
            Some(Absorbed::ToolTurn(tool)) if tool.text() == r#"{"citations":[]}"#
        ));
        assert_eq!(accumulator.tool().map(Turn::role), Some(Role::Tool));
    }

    #[test]
    fn exec_results_are_snapshotted_and_surfaced_as_tool_turn() {
        let payload = r#"{"all_exec_results":[{"intent":"sum","code_exec_result":"7"}]}"#;
        let mut accumulator = TurnAccumulator::new();
        let effects = accumulator.absorb(Fragment::Tool(MessageFragment::text(payload)));
        accumulator.absorb(assistant("The sum is 7."));

        assert_eq!(effects[0], Absorbed::ExecResults);
        assert_eq!(accumulator.exec_results().results().len(), 1);
        let turn = accumulator.assistant().expect("assistant turn");
        assert_eq!(
            turn.context(),
            Some(r#"{"all_exec_results":[{"code_exec_result":"7","intent":"sum"}]}"#)
        );
        assert_eq!(accumulator.tool().map(Turn::text).as_deref(), Some(payload));
    }

    #[test]
    fn assistant_exec_payload_surfaces_tool_turn_to_observers() {
        let payload = r#"{"all_exec_results":[{"intent":"plot","code_exec_result":"chart.png"}]}"#;
        let mut accumulator = TurnAccumulator::new();

        let effects = accumulator.absorb(assistant(payload));

        assert_eq!(
            effects,
            vec![
                Absorbed::ExecResults,
                Absorbed::ToolTurn(accumulator.tool().cloned().expect("tool turn")),
                Absorbed::AssistantDelta(payload.to_string()),
            ]
        );
        assert_eq!(accumulator.tool().map(Turn::text).as_deref(), Some(payload));
        assert_eq!(accumulator.exec_results().latest().as_deref(), Some("chart.png"));
    }

    #[test]
    fn error_fragment_closes_accumulation() {
        let mut accumulator = TurnAccumulator::new();
        accumulator.absorb(assistant("partial"));
        accumulator.absorb(Fragment::Error(MessageFragment::text("service error")));
        assert!(accumulator.absorb(assistant(" ignored")).is_empty());

        let exchange = accumulator.finish(user(), Termination::EndOfStream);
        assert_eq!(exchange.outcome(), ExchangeOutcome::Failed);
        assert_eq!(exchange.assistant().map(Turn::text).as_deref(), Some("partial"));
        assert_eq!(exchange.error().map(Turn::text).as_deref(), Some("service error"));
    }

    #[test]
    fn no_fragments_synthesizes_no_content_error() {
        let exchange = TurnAccumulator::new().finish(user(), Termination::EndOfStream);

        let turns = exchange.committed_turns(AppendMode::NewConversation);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].role(), Role::Error);
        assert_eq!(turns[1].text(), NO_CONTENT_ERROR);
    }

    #[test]
    fn cancel_commits_exactly_one_assistant_even_when_empty() {
        let exchange = TurnAccumulator::new().finish(user(), Termination::Cancelled);

        let turns = exchange.committed_turns(AppendMode::Continuing);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role(), Role::Assistant);
        assert_eq!(exchange.outcome(), ExchangeOutcome::Cancelled);
    }

    #[test]
    fn terminal_failure_record_is_formatted() {
        let mut accumulator = TurnAccumulator::new();
        accumulator.absorb(Fragment::Failure {
            message: "content filtered".to_string(),
        });

        let exchange = accumulator.finish(user(), Termination::EndOfStream);
        let error = exchange.error().expect("error turn");
        assert!(error.text().starts_with("The prompt was filtered"));
    }

    #[test]
    fn tool_only_completion_adds_empty_assistant() {
        let mut accumulator = TurnAccumulator::new();
        accumulator.absorb(Fragment::Tool(MessageFragment::text("{}")));

        let exchange = accumulator.finish(user(), Termination::EndOfStream);
        let turns = exchange.committed_turns(AppendMode::NewConversation);
        assert_eq!(
            turns.iter().map(Turn::role).collect::<Vec<_>>(),
            vec![Role::User, Role::Tool, Role::Assistant]
        );
        assert!(turns[2].content().is_empty());
    }
}
