#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chat_stream::{
    ByteStream, ChatTransport, ConversationRequest, HistoryOperation, HistoryStatus, HistoryStore,
    PersistenceError, TransportError, Turn,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub enum Step {
    Chunk(Vec<u8>),
    Delay(Duration),
    Fail(TransportError),
    /// Never yields again; only cancellation ends the stream.
    Hang,
}

impl Step {
    pub fn line(record: &str) -> Self {
        Self::Chunk(format!("{record}\n").into_bytes())
    }

    pub fn raw(bytes: &str) -> Self {
        Self::Chunk(bytes.as_bytes().to_vec())
    }
}

#[derive(Debug, Clone)]
pub enum FakeResponse {
    Stream(Vec<Step>),
    OpenError(TransportError),
}

/// Transport that replays one scripted response per `open` call.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<VecDeque<FakeResponse>>,
    requests: Mutex<Vec<ConversationRequest>>,
}

impl FakeTransport {
    pub fn new(responses: Vec<FakeResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn streams(scripts: Vec<Vec<Step>>) -> Arc<Self> {
        Self::new(scripts.into_iter().map(FakeResponse::Stream).collect())
    }

    pub fn requests(&self) -> Vec<ConversationRequest> {
        lock_unpoisoned(&self.requests).clone()
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn open(
        &self,
        request: ConversationRequest,
        _cancel: CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        lock_unpoisoned(&self.requests).push(request);
        let response = lock_unpoisoned(&self.responses)
            .pop_front()
            .unwrap_or(FakeResponse::Stream(Vec::new()));

        let steps = match response {
            FakeResponse::Stream(steps) => steps,
            FakeResponse::OpenError(error) => return Err(error),
        };

        let stream = futures_util::stream::unfold(steps.into_iter(), |mut steps| async move {
            loop {
                match steps.next()? {
                    Step::Chunk(bytes) => return Some((Ok(bytes), steps)),
                    Step::Fail(error) => return Some((Err(error), steps)),
                    Step::Delay(delay) => tokio::time::sleep(delay).await,
                    Step::Hang => std::future::pending::<()>().await,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryCall {
    Status,
    Create(Turn),
    Append(String, Vec<Turn>),
    Clear(String),
}

/// History store double that records every call.
pub struct FakeHistory {
    status: HistoryStatus,
    calls: Mutex<Vec<HistoryCall>>,
    fail: Mutex<Vec<HistoryOperation>>,
    stall_status: Mutex<bool>,
    next_id: Mutex<u32>,
}

impl FakeHistory {
    pub fn new(status: HistoryStatus) -> Arc<Self> {
        Arc::new(Self {
            status,
            calls: Mutex::new(Vec::new()),
            fail: Mutex::new(Vec::new()),
            stall_status: Mutex::new(false),
            next_id: Mutex::new(0),
        })
    }

    pub fn working() -> Arc<Self> {
        Self::new(HistoryStatus::Working)
    }

    pub fn fail_on(&self, operation: HistoryOperation) {
        lock_unpoisoned(&self.fail).push(operation);
    }

    /// Status probes never resolve.
    pub fn stall_status(&self) {
        *lock_unpoisoned(&self.stall_status) = true;
    }

    pub fn calls(&self) -> Vec<HistoryCall> {
        lock_unpoisoned(&self.calls).clone()
    }

    /// Calls other than status probes.
    pub fn writes(&self) -> Vec<HistoryCall> {
        self.calls()
            .into_iter()
            .filter(|call| *call != HistoryCall::Status)
            .collect()
    }

    fn record(
        &self,
        call: HistoryCall,
        operation: HistoryOperation,
    ) -> Result<(), PersistenceError> {
        lock_unpoisoned(&self.calls).push(call);
        if lock_unpoisoned(&self.fail).contains(&operation) {
            return Err(PersistenceError::new(operation, "503 store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for FakeHistory {
    async fn status(&self) -> HistoryStatus {
        lock_unpoisoned(&self.calls).push(HistoryCall::Status);
        let stalled = *lock_unpoisoned(&self.stall_status);
        if stalled {
            std::future::pending::<()>().await;
        }
        self.status.clone()
    }

    async fn create_conversation(&self, first_turn: &Turn) -> Result<String, PersistenceError> {
        self.record(HistoryCall::Create(first_turn.clone()), HistoryOperation::Create)?;
        let mut next_id = lock_unpoisoned(&self.next_id);
        *next_id += 1;
        Ok(format!("conv-{next_id}"))
    }

    async fn append_turns(
        &self,
        conversation_id: &str,
        turns: &[Turn],
    ) -> Result<(), PersistenceError> {
        self.record(
            HistoryCall::Append(conversation_id.to_string(), turns.to_vec()),
            HistoryOperation::Append,
        )
    }

    async fn clear_conversation(&self, conversation_id: &str) -> Result<(), PersistenceError> {
        self.record(
            HistoryCall::Clear(conversation_id.to_string()),
            HistoryOperation::Clear,
        )
    }
}

pub fn assistant(content: &str) -> String {
    serde_json::json!({"role": "assistant", "content": content}).to_string()
}

pub fn tool(content: &str) -> String {
    serde_json::json!({"role": "tool", "content": content}).to_string()
}

/// Polls `condition` until it holds, panicking after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
