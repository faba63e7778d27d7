//! Deterministic mock implementations of the `chat_stream` boundaries.
//!
//! This crate contains no network logic and is intended for local
//! development and contract-level integration testing.

mod history;

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chat_stream::turn::{new_turn_id, now_rfc3339};
use chat_stream::{
    ByteStream, ChatTransport, Citation, ConversationRequest, Role, TransportError,
};
use futures_util::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

pub use history::{MemoryHistoryStore, MOCK_CONVERSATION_PREFIX};

/// Stable transport identifier used for explicit startup selection.
pub const MOCK_TRANSPORT_ID: &str = "mock";

/// Scripted transport that answers every request with an NDJSON body.
///
/// The body is re-sliced into fixed-size byte chunks, so records and
/// multi-byte characters routinely straddle chunk boundaries.
#[derive(Debug)]
pub struct MockTransport {
    /// Fixed answer tokens; `None` echoes the latest user question.
    answer: Option<Vec<String>>,
    citations: Vec<Citation>,
    chunk_size: usize,
    chunk_delay: Duration,
    requests: Mutex<Vec<ConversationRequest>>,
}

impl MockTransport {
    const CHUNK_SIZE: usize = 24;
    const CHUNK_DELAY_MS: u64 = 30;

    /// Creates a transport that streams `chunks` as assistant fragments.
    #[must_use]
    pub fn new(chunks: Vec<String>) -> Self {
        Self {
            answer: Some(chunks),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<ConversationRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    /// The full response body this transport streams for `request`.
    pub fn body_for(&self, request: &ConversationRequest) -> Vec<u8> {
        let response_id = new_turn_id();
        let date = now_rfc3339();
        let mut records = Vec::new();

        if !self.citations.is_empty() {
            let payload = json!({ "citations": self.citations }).to_string();
            records.push(json!({ "role": "tool", "content": payload }));
        }

        for token in self.answer_tokens(request) {
            records.push(json!({
                "id": response_id,
                "role": "assistant",
                "content": token,
                "date": date,
            }));
        }

        let mut body = String::new();
        for record in records {
            body.push_str(&record.to_string());
            body.push('\n');
        }
        body.into_bytes()
    }

    fn answer_tokens(&self, request: &ConversationRequest) -> Vec<String> {
        if let Some(answer) = &self.answer {
            return answer.clone();
        }

        let question = request
            .messages
            .iter()
            .rev()
            .find(|turn| turn.role() == Role::User)
            .map(|turn| turn.text())
            .unwrap_or_default();
        let answer = format!(
            "You asked: “{}”. This answer is streamed by the mock transport [doc1].",
            question.trim()
        );
        split_tokens(&answer)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            answer: None,
            citations: vec![Citation {
                id: "doc1".to_string(),
                title: "Mock handbook".to_string(),
                content: "Deterministic reference text served by the mock transport.".to_string(),
                url: None,
                filepath: Some("handbook.md".to_string()),
                chunk_id: None,
            }],
            chunk_size: Self::CHUNK_SIZE,
            chunk_delay: Duration::from_millis(Self::CHUNK_DELAY_MS),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn open(
        &self,
        request: ConversationRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let body = self.body_for(&request);
        lock_unpoisoned(&self.requests).push(request);

        let delay = self.chunk_delay;
        let chunks = body
            .chunks(self.chunk_size)
            .map(<[u8]>::to_vec)
            .collect::<Vec<_>>();
        let stream = futures_util::stream::iter(chunks)
            .then(move |chunk| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, TransportError>(chunk)
            })
            .take_until(cancel.cancelled_owned());

        Ok(Box::pin(stream))
    }
}

/// Splits text into word tokens that keep their trailing whitespace.
fn split_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut pending = String::new();
    for ch in text.chars() {
        pending.push(ch);
        if ch.is_whitespace() {
            tokens.push(std::mem::take(&mut pending));
        }
    }
    if !pending.is_empty() {
        tokens.push(pending);
    }
    tokens
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
