//! Boundary to the remote generation service.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::turn::{Role, Turn};

/// Raw response body chunks with arbitrary boundaries.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// Payload of one conversation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationRequest {
    pub messages: Vec<Turn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ConversationRequest {
    /// Builds a request from transcript turns. Error turns are local-only and never sent.
    #[must_use]
    pub fn new(turns: &[Turn], conversation_id: Option<String>) -> Self {
        Self {
            messages: turns
                .iter()
                .filter(|turn| turn.role() != Role::Error)
                .cloned()
                .collect(),
            conversation_id,
        }
    }
}

/// Opens a streaming response for a conversation request.
///
/// Implementations must stop producing chunks once `cancel` fires. The
/// returned stream is consumed by [`crate::decoder::FragmentStream`].
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open(
        &self,
        request: ConversationRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_drops_error_turns_and_keeps_order() {
        let turns = vec![
            Turn::new("u1", Role::User, "hi"),
            Turn::error("boom"),
            Turn::new("t1", Role::Tool, "{}"),
            Turn::new("a1", Role::Assistant, "hello"),
        ];

        let request = ConversationRequest::new(&turns, None);
        let ids = request
            .messages
            .iter()
            .map(Turn::id)
            .collect::<Vec<_>>();

        assert_eq!(ids, vec!["u1", "t1", "a1"]);
    }

    #[test]
    fn conversation_id_is_omitted_when_absent() {
        let request = ConversationRequest::new(&[], None);
        let value = serde_json::to_value(&request).expect("request should serialize");
        assert_eq!(value, serde_json::json!({"messages": []}));
    }
}
