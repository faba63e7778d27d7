//! Plain-text transcript printing driven by session events.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use chat_stream::side_channel::{citations_from_turn, exec_results_from_turn};
use chat_stream::{
    latest_code_exec_result, Citation, HistoryNotice, RequestId, Role, SessionEvent, Turn,
};

pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

pub const ASSISTANT_PREFIX: &str = "assistant: ";
pub const ERROR_PREFIX: &str = "error: ";
pub const HISTORY_PREFIX: &str = "[history] ";

/// Prints streamed deltas as they arrive and the committed turns' annotations.
pub struct TranscriptPrinter {
    out: SharedWriter,
    /// Request whose assistant line is currently open.
    streaming: Mutex<Option<RequestId>>,
}

impl TranscriptPrinter {
    pub fn new(out: SharedWriter) -> Self {
        Self {
            out,
            streaming: Mutex::new(None),
        }
    }

    pub fn handle(&self, event: &SessionEvent) {
        match event {
            SessionEvent::AssistantDelta { request_id, delta } => {
                let mut streaming = lock_unpoisoned(&self.streaming);
                let prefix = if *streaming == Some(*request_id) {
                    ""
                } else {
                    *streaming = Some(*request_id);
                    ASSISTANT_PREFIX
                };
                write_out(&self.out, &format!("{prefix}{delta}"));
            }
            SessionEvent::Committed { request_id, turns } => {
                let streamed = lock_unpoisoned(&self.streaming).take() == Some(*request_id);
                write_out(&self.out, &render_committed(turns, streamed));
            }
            SessionEvent::PersistenceFailed(error) => {
                write_out(
                    &self.out,
                    &format!("{HISTORY_PREFIX}{error} (/dismiss to hide)\n"),
                );
            }
            SessionEvent::ConversationAssigned(conversation_id) => {
                tracing::debug!(conversation_id, "conversation assigned");
            }
            SessionEvent::StateChanged(_)
            | SessionEvent::ToolTurn { .. }
            | SessionEvent::ExecResultsUpdated { .. } => {}
        }
    }
}

/// Session observer printing to `out`.
pub fn observer(out: SharedWriter) -> impl Fn(&SessionEvent) + Send + Sync + 'static {
    let printer = TranscriptPrinter::new(out);
    move |event| printer.handle(event)
}

/// Text for turns committed at the end of an exchange.
///
/// When the assistant text was already streamed only the line break and the
/// annotations are written.
pub fn render_committed(turns: &[Turn], streamed: bool) -> String {
    let mut text = String::new();
    let tool = turns.iter().find(|turn| turn.role() == Role::Tool);

    for turn in turns {
        match turn.role() {
            Role::User | Role::Tool => {}
            Role::Assistant => {
                if streamed {
                    text.push('\n');
                } else if !turn.text().is_empty() {
                    text.push_str(&format!("{ASSISTANT_PREFIX}{}\n", turn.text()));
                }
                if let Some(tool) = tool {
                    text.push_str(&render_annotations(tool));
                }
            }
            Role::Error => {
                if streamed && !turns.iter().any(|turn| turn.role() == Role::Assistant) {
                    text.push('\n');
                }
                text.push_str(&format!("{ERROR_PREFIX}{}\n", turn.text()));
            }
        }
    }

    text
}

fn render_annotations(tool: &Turn) -> String {
    let mut text = String::new();
    if let Ok(citations) = citations_from_turn(tool) {
        for (index, citation) in citations.iter().enumerate() {
            text.push_str(&format!("  [{}] {}\n", index + 1, citation_label(citation)));
        }
    }
    if let Ok(results) = exec_results_from_turn(tool) {
        if let Some(latest) = latest_code_exec_result(&results) {
            text.push_str(&format!("  result: {latest}\n"));
        }
    }
    text
}

pub fn citation_label(citation: &Citation) -> String {
    let title = if citation.title.trim().is_empty() {
        citation.id.as_str()
    } else {
        citation.title.as_str()
    };
    match citation.url.as_deref().or(citation.filepath.as_deref()) {
        Some(location) if !location.is_empty() => format!("{title} ({location})"),
        _ => title.to_string(),
    }
}

pub fn render_notice(notice: &HistoryNotice) -> String {
    format!("{HISTORY_PREFIX}{}: {}\n", notice.title, notice.subtitle)
}

/// Writes and flushes `text`. Output errors are logged, not propagated.
pub fn write_out(out: &SharedWriter, text: &str) {
    let mut out = lock_unpoisoned(out);
    let written = out.write_all(text.as_bytes()).and_then(|()| out.flush());
    if let Err(error) = written {
        tracing::debug!(%error, "writing output failed");
    }
}

pub(crate) fn lock_unpoisoned<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
