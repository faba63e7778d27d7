//! Conversation turn model shared by the decoder, accumulator and transcript.

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Speaker of a turn. Fixed for the lifetime of the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    Error,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "tool" => Self::Tool,
            "error" => Self::Error,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Error => "error",
        }
    }
}

/// One part of a structured (multimodal) turn body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Turn body: plain text, or an ordered list of text/image parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for TurnContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl TurnContent {
    /// Returns the body as text. Structured bodies join their text parts.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Parts(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }

    fn push_str(&mut self, delta: &str) {
        match self {
            Self::Text(text) => text.push_str(delta),
            Self::Parts(_) => {
                let mut text = self.as_text();
                text.push_str(delta);
                *self = Self::Text(text);
            }
        }
    }
}

impl From<String> for TurnContent {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for TurnContent {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// User rating attached to an assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    Neutral,
    Positive,
    Negative,
    MissingCitation,
    WrongCitation,
    OutOfScope,
    InaccurateOrIrrelevant,
    OtherUnhelpful,
    HateSpeech,
    Violent,
    Sexual,
    Manipulative,
    OtherHarmful,
}

/// A question as submitted by the host: text, or text with one image attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Question {
    Text(String),
    WithImage { text: String, image_url: String },
}

impl Question {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) | Self::WithImage { text, .. } => text,
        }
    }

    fn into_content(self) -> TurnContent {
        match self {
            Self::Text(text) => TurnContent::Text(text),
            Self::WithImage { text, image_url } => TurnContent::Parts(vec![
                ContentPart::Text { text },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: image_url },
                },
            ]),
        }
    }
}

impl From<&str> for Question {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Question {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// One message-like unit of a conversation.
///
/// The role is fixed at construction. Content is only mutated by the
/// accumulator while the turn is the active turn of its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    id: String,
    role: Role,
    content: TurnContent,
    date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    feedback: Option<Feedback>,
}

impl Turn {
    #[must_use]
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<TurnContent>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            date: now_rfc3339(),
            context: None,
            feedback: None,
        }
    }

    #[must_use]
    pub fn user(question: Question) -> Self {
        Self::new(new_turn_id(), Role::User, question.into_content())
    }

    #[must_use]
    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(new_turn_id(), Role::Tool, content.into())
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(new_turn_id(), Role::Error, message.into())
    }

    #[must_use]
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = date.into();
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    #[must_use]
    pub fn with_feedback(mut self, feedback: Feedback) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &TurnContent {
        &self.content
    }

    pub fn text(&self) -> String {
        self.content.as_text()
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn feedback(&self) -> Option<Feedback> {
        self.feedback
    }

    pub(crate) fn push_content(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    pub(crate) fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub(crate) fn set_date(&mut self, date: impl Into<String>) {
        self.date = date.into();
    }

    pub(crate) fn set_context(&mut self, context: Option<String>) {
        self.context = context;
    }

    pub(crate) fn set_feedback(&mut self, feedback: Option<Feedback>) {
        self.feedback = feedback;
    }
}

#[must_use]
pub fn new_turn_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current UTC time as RFC 3339; falls back to the epoch if formatting fails.
#[must_use]
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
