//! Typed fragments decoded from one NDJSON record of the response stream.
//!
//! A record is either a bare message, a `choices` envelope wrapping several
//! messages, or a terminal `{"error": ...}` object. Every shape is lowered to
//! a list of [`Fragment`]s so the accumulator can match on role exhaustively.

use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::turn::{Feedback, Role, TurnContent};

/// Message payload common to every role.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageFragment {
    pub id: Option<String>,
    pub content: TurnContent,
    pub date: Option<String>,
    pub context: Option<String>,
    pub feedback: Option<Feedback>,
}

impl MessageFragment {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: TurnContent::Text(content.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// One decoded stream unit, not yet merged into a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Server echo of the question.
    User(MessageFragment),
    /// Incremental assistant delta.
    Assistant(MessageFragment),
    /// Complete tool payload; replaces any earlier one.
    Tool(MessageFragment),
    /// Error message emitted by the service as a turn.
    Error(MessageFragment),
    /// The service created or resolved a persisted conversation.
    ConversationAssigned { conversation_id: String },
    /// Terminal `{"error": ...}` record.
    Failure { message: String },
}

impl Fragment {
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::User(_) => Some(Role::User),
            Self::Assistant(_) => Some(Role::Assistant),
            Self::Tool(_) => Some(Role::Tool),
            Self::Error(_) => Some(Role::Error),
            Self::ConversationAssigned { .. } | Self::Failure { .. } => None,
        }
    }
}

/// Lower one complete record (without its trailing newline) into fragments.
pub fn fragments_from_record(record: &str) -> Result<Vec<Fragment>, DecodeError> {
    let value = serde_json::from_str::<Value>(record).map_err(|source| DecodeError::Json {
        record: record.to_string(),
        source,
    })?;
    let Value::Object(object) = value else {
        return Err(DecodeError::NotAnObject {
            record: record.to_string(),
        });
    };

    if object.contains_key("choices") {
        return fragments_from_envelope(&object);
    }

    if object.contains_key("role") {
        return message_fragment(&object, None).map(|fragment| vec![fragment]);
    }

    match object.get("error") {
        Some(error) if !error.is_null() => Ok(vec![Fragment::Failure {
            message: error_message(error),
        }]),
        _ => Err(DecodeError::MissingField { field: "role" }),
    }
}

fn fragments_from_envelope(object: &Map<String, Value>) -> Result<Vec<Fragment>, DecodeError> {
    let envelope_id = object.get("id").and_then(id_string);
    let mut fragments = Vec::new();

    if let Some(conversation_id) = object
        .get("history_metadata")
        .and_then(|metadata| metadata.get("conversation_id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        fragments.push(Fragment::ConversationAssigned {
            conversation_id: conversation_id.to_string(),
        });
    }

    let choices = object
        .get("choices")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for choice in choices {
        let messages = choice
            .get("messages")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for message in messages {
            let Value::Object(message) = message else {
                return Err(DecodeError::NotAnObject {
                    record: message.to_string(),
                });
            };
            fragments.push(message_fragment(message, envelope_id.as_deref())?);
        }
    }

    if let Some(error) = object.get("error").filter(|error| !error.is_null()) {
        fragments.push(Fragment::Failure {
            message: error_message(error),
        });
    }

    Ok(fragments)
}

fn message_fragment(
    object: &Map<String, Value>,
    fallback_id: Option<&str>,
) -> Result<Fragment, DecodeError> {
    let role = object
        .get("role")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField { field: "role" })?;
    let role = Role::parse(role).ok_or_else(|| DecodeError::UnknownRole {
        role: role.to_string(),
    })?;

    let message = MessageFragment {
        id: object
            .get("id")
            .and_then(id_string)
            .or_else(|| fallback_id.map(ToString::to_string)),
        content: content_from_value(object.get("content"))?,
        date: object
            .get("date")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        context: object.get("context").and_then(opaque_string),
        feedback: object
            .get("feedback")
            .filter(|value| !value.is_null())
            .and_then(|value| serde_json::from_value::<Feedback>(value.clone()).ok()),
    };

    Ok(match role {
        Role::User => Fragment::User(message),
        Role::Assistant => Fragment::Assistant(message),
        Role::Tool => Fragment::Tool(message),
        Role::Error => Fragment::Error(message),
    })
}

fn content_from_value(value: Option<&Value>) -> Result<TurnContent, DecodeError> {
    match value {
        None | Some(Value::Null) => Ok(TurnContent::default()),
        Some(Value::String(text)) => Ok(TurnContent::Text(text.clone())),
        Some(value @ Value::Array(_)) => serde_json::from_value::<TurnContent>(value.clone())
            .map_err(|source| DecodeError::Field {
                field: "content",
                source,
            }),
        Some(other) => Ok(TurnContent::Text(other.to_string())),
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn opaque_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(object) => object
            .get("message")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_assistant_message_becomes_assistant_fragment() {
        let fragments = fragments_from_record(
            r#"{"id":"m1","role":"assistant","content":"Hel","date":"2026-02-14T00:00:00Z"}"#,
        )
        .expect("record should decode");

        assert_eq!(
            fragments,
            vec![Fragment::Assistant(MessageFragment {
                id: Some("m1".to_string()),
                content: TurnContent::Text("Hel".to_string()),
                date: Some("2026-02-14T00:00:00Z".to_string()),
                context: None,
                feedback: None,
            })]
        );
    }

    #[test]
    fn envelope_messages_inherit_envelope_id_and_metadata() {
        let record = r#"{
            "id": "resp-1",
            "choices": [{"messages": [
                {"role": "tool", "content": "{\"citations\":[]}"},
                {"role": "assistant", "content": "Hi"}
            ]}],
            "history_metadata": {"conversation_id": "conv-9"}
        }"#
        .replace('\n', "");

        let fragments = fragments_from_record(&record).expect("envelope should decode");

        assert_eq!(fragments.len(), 3);
        assert_eq!(
            fragments[0],
            Fragment::ConversationAssigned {
                conversation_id: "conv-9".to_string()
            }
        );
        assert!(matches!(
            &fragments[1],
            Fragment::Tool(message) if message.id.as_deref() == Some("resp-1")
        ));
        assert!(matches!(&fragments[2], Fragment::Assistant(message) if message.content.as_str() == Some("Hi")));
    }

    #[test]
    fn terminal_error_record_accepts_string_and_object_forms() {
        let from_string =
            fragments_from_record(r#"{"error":"boom"}"#).expect("string error should decode");
        let from_object = fragments_from_record(r#"{"error":{"message":"nested boom","code":"x"}}"#)
            .expect("object error should decode");

        assert_eq!(
            from_string,
            vec![Fragment::Failure {
                message: "boom".to_string()
            }]
        );
        assert_eq!(
            from_object,
            vec![Fragment::Failure {
                message: "nested boom".to_string()
            }]
        );
    }

    #[test]
    fn unknown_role_is_a_decode_error() {
        let error = fragments_from_record(r#"{"role":"system","content":"x"}"#)
            .expect_err("unknown role must fail");
        assert!(matches!(error, DecodeError::UnknownRole { role } if role == "system"));
    }

    #[test]
    fn malformed_json_and_non_objects_are_decode_errors() {
        assert!(matches!(
            fragments_from_record(r#"{"role":"assistant","#),
            Err(DecodeError::Json { .. })
        ));
        assert!(matches!(
            fragments_from_record("[1,2]"),
            Err(DecodeError::NotAnObject { .. })
        ));
        assert!(matches!(
            fragments_from_record(r#"{"content":"x"}"#),
            Err(DecodeError::MissingField { field: "role" })
        ));
    }

    #[test]
    fn object_context_is_kept_as_serialized_text() {
        let fragments = fragments_from_record(
            r#"{"role":"assistant","content":"","context":{"citations":[]}}"#,
        )
        .expect("record should decode");

        let Fragment::Assistant(message) = &fragments[0] else {
            panic!("expected assistant fragment");
        };
        assert_eq!(message.context.as_deref(), Some(r#"{"citations":[]}"#));
    }

    #[test]
    fn unknown_feedback_value_is_ignored() {
        let fragments = fragments_from_record(
            r#"{"role":"assistant","content":"x","feedback":"meh"}"#,
        )
        .expect("record should decode");

        assert!(matches!(
            &fragments[0],
            Fragment::Assistant(message) if message.feedback.is_none()
        ));
    }
}
