//! Request and response bodies of the history routes.
//!
//! The conversation request body is [`chat_stream::ConversationRequest`].

use serde::{Deserialize, Serialize};

use chat_stream::Turn;

#[derive(Debug, Serialize)]
pub struct CreateConversationBody<'a> {
    pub messages: &'a [Turn],
}

impl<'a> CreateConversationBody<'a> {
    pub fn new(first_turn: &'a Turn) -> Self {
        Self {
            messages: std::slice::from_ref(first_turn),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UpdateConversationBody<'a> {
    pub conversation_id: &'a str,
    pub messages: &'a [Turn],
}

#[derive(Debug, Serialize)]
pub struct ClearConversationBody<'a> {
    pub conversation_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationResponse {
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Body of `GET /history/ensure`. Success carries `message`, a 422 carries `error`.
#[derive(Debug, Default, Deserialize)]
pub struct EnsureResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
