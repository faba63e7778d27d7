//! Citation and execution-result extraction from tool turn payloads.
//!
//! Both parses are independent and pure: the same payload always yields the
//! same lists. Callers choose the fallback (empty citations, no result).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ParseError;
use crate::turn::{Role, Turn};

/// Substring that marks a payload carrying execution results.
pub const EXEC_RESULTS_MARKER: &str = "all_exec_results";

/// Structured source reference surfaced by a tool turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default, deserialize_with = "nullable_string")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub title: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<Value>,
}

/// Record of one backend code or query execution.
///
/// Unknown keys are retained in `metadata` and written back on serialization.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecResult {
    #[serde(default)]
    pub code_exec_result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_generated: Option<String>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl ExecResult {
    /// `code_exec_result` rendered as display text, `None` when absent.
    pub fn code_exec_result_text(&self) -> Option<String> {
        match &self.code_exec_result {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ExecResultsSnapshot<'a> {
    all_exec_results: &'a [ExecResult],
}

pub fn has_exec_results_marker(text: &str) -> bool {
    text.contains(EXEC_RESULTS_MARKER)
}

pub fn parse_citations(payload: &str) -> Result<Vec<Citation>, ParseError> {
    parse_list(payload, "citations")
}

pub fn parse_exec_results(payload: &str) -> Result<Vec<ExecResult>, ParseError> {
    parse_list(payload, EXEC_RESULTS_MARKER)
}

/// Citations carried by a tool turn.
pub fn citations_from_turn(turn: &Turn) -> Result<Vec<Citation>, ParseError> {
    parse_citations(tool_text(turn)?)
}

pub fn exec_results_from_turn(turn: &Turn) -> Result<Vec<ExecResult>, ParseError> {
    parse_exec_results(tool_text(turn)?)
}

/// The "latest plot/value" view: only the last record's `code_exec_result`.
pub fn latest_code_exec_result(results: &[ExecResult]) -> Option<String> {
    results.last().and_then(ExecResult::code_exec_result_text)
}

/// Serialized `{"all_exec_results": [...]}` snapshot stored on an assistant turn.
pub fn exec_results_snapshot(results: &[ExecResult]) -> Result<String, ParseError> {
    Ok(serde_json::to_string(&ExecResultsSnapshot {
        all_exec_results: results,
    })?)
}

fn tool_text(turn: &Turn) -> Result<&str, ParseError> {
    match turn.role() {
        Role::Tool => turn.content().as_str().ok_or(ParseError::NotToolText),
        _ => Err(ParseError::NotToolText),
    }
}

fn parse_list<T>(payload: &str, key: &'static str) -> Result<Vec<T>, ParseError>
where
    T: for<'de> Deserialize<'de>,
{
    let mut value = serde_json::from_str::<Value>(payload)?;
    let list = value
        .get_mut(key)
        .filter(|list| list.is_array())
        .map(Value::take)
        .ok_or(ParseError::MissingList(key))?;
    Ok(serde_json::from_value(list)?)
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Execution results scoped to one outstanding assistant response.
///
/// The first batch of a response is appended whole. Later batches repeat what
/// was already sent, so only entries past index 2 and past the records already
/// held are appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResultLog {
    results: Vec<ExecResult>,
    batches: usize,
}

impl ExecResultLog {
    /// Starts a fresh response scope.
    pub fn reset(&mut self) {
        self.results.clear();
        self.batches = 0;
    }

    pub fn absorb(&mut self, batch: Vec<ExecResult>) {
        let skip = if self.batches == 0 {
            0
        } else {
            self.results.len().max(2)
        };
        self.results.extend(batch.into_iter().skip(skip));
        self.batches += 1;
    }

    pub fn results(&self) -> &[ExecResult] {
        &self.results
    }

    pub fn latest(&self) -> Option<String> {
        latest_code_exec_result(&self.results)
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
