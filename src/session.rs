//! Request lifecycle controller.
//!
//! [`ChatSession`] owns the transcript, the active request slot and the
//! cancellation token of the in-flight request. State lives behind a short
//! std mutex that is never held across an await, so `stop` and
//! `new_conversation` can be called from another task while `send` is
//! suspended on the stream.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::accumulator::{Absorbed, Termination, TurnAccumulator};
use crate::decoder::FragmentStream;
use crate::error::{HistoryOperation, PersistenceError, SendError, TransportError};
use crate::history::{HistoryNotice, HistoryStatus, HistoryStore};
use crate::side_channel::{latest_code_exec_result, Citation, ExecResult};
use crate::transcript::{AppendMode, Conversation, Exchange, ExchangeOutcome, Transcript};
use crate::transport::{ChatTransport, ConversationRequest};
use crate::turn::{Question, Turn};

pub type RequestId = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    #[default]
    Idle,
    Sending,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl LifecycleState {
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Sending => "sending",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    fn after(outcome: ExchangeOutcome) -> Self {
        match outcome {
            ExchangeOutcome::Completed => Self::Completed,
            ExchangeOutcome::Cancelled => Self::Cancelled,
            ExchangeOutcome::Failed => Self::Failed,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications delivered to the session observer, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(LifecycleState),
    AssistantDelta {
        request_id: RequestId,
        delta: String,
    },
    ToolTurn {
        request_id: RequestId,
        turn: Turn,
    },
    ExecResultsUpdated {
        request_id: RequestId,
        results: Vec<ExecResult>,
    },
    /// Turns appended to the transcript, including the user echo of a continuing conversation.
    Committed {
        request_id: RequestId,
        turns: Vec<Turn>,
    },
    ConversationAssigned(String),
    PersistenceFailed(PersistenceError),
}

pub type SessionObserver = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Result of one `send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    pub request_id: RequestId,
    pub outcome: ExchangeOutcome,
    /// Turns appended when the request finished.
    pub committed: Vec<Turn>,
    pub conversation_id: Option<String>,
    pub persistence_error: Option<PersistenceError>,
    /// The conversation was reset while the request was in flight; nothing was committed.
    pub superseded: bool,
}

impl RequestOutcome {
    fn superseded(request_id: RequestId) -> Self {
        Self {
            request_id,
            outcome: ExchangeOutcome::Cancelled,
            committed: Vec::new(),
            conversation_id: None,
            persistence_error: None,
            superseded: true,
        }
    }
}

#[derive(Debug)]
struct ActiveRequest {
    id: RequestId,
    generation: u64,
    cancel: CancellationToken,
    user: Turn,
    mode: AppendMode,
    /// Taken when the exchange is committed; the slot stays occupied while persisting.
    accumulator: Option<TurnAccumulator>,
}

#[derive(Debug, Default)]
struct SessionState {
    lifecycle: LifecycleState,
    transcript: Transcript,
    conversation_id: Option<String>,
    generation: u64,
    next_request_id: RequestId,
    active: Option<ActiveRequest>,
    exec_results: Vec<ExecResult>,
    persistence_error: Option<PersistenceError>,
    history_status: Option<HistoryStatus>,
    /// Token of an in-flight `clear_conversation`.
    clearing: Option<CancellationToken>,
}

impl SessionState {
    fn active_for(&mut self, request_id: RequestId) -> Option<&mut ActiveRequest> {
        let generation = self.generation;
        self.active
            .as_mut()
            .filter(|active| active.id == request_id && active.generation == generation)
    }

    fn set_lifecycle(&mut self, next: LifecycleState, events: &mut Vec<SessionEvent>) {
        if self.lifecycle == next {
            return;
        }
        tracing::debug!(from = %self.lifecycle, to = %next, "lifecycle transition");
        self.lifecycle = next;
        events.push(SessionEvent::StateChanged(next));
    }

    /// Drops the active request and local conversation state.
    fn reset(&mut self, events: &mut Vec<SessionEvent>) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
        self.generation += 1;
        self.transcript.clear();
        self.conversation_id = None;
        self.exec_results.clear();
        self.persistence_error = None;
        self.set_lifecycle(LifecycleState::Idle, events);
    }
}

struct FinishedExchange {
    exchange: Exchange,
    /// Fresh token for the persistence phase; the stream token may already be cancelled.
    cancel: CancellationToken,
    committed: Vec<Turn>,
    conversation_id: Option<String>,
    stream_conversation_id: Option<String>,
}

/// One conversation with a remote generation service.
pub struct ChatSession {
    transport: Arc<dyn ChatTransport>,
    history: Option<Arc<dyn HistoryStore>>,
    state: Arc<Mutex<SessionState>>,
    observer: Option<SessionObserver>,
}

impl ChatSession {
    /// Session with in-memory history only.
    #[must_use]
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            history: None,
            state: Arc::new(Mutex::new(SessionState::default())),
            observer: None,
        }
    }

    /// Persist exchanges to `store` whenever it reports itself as working.
    #[must_use]
    pub fn with_history(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    #[must_use]
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Sends a question and drives the request to a terminal state.
    ///
    /// Rejected without touching the transcript when another request is in
    /// flight or the question is blank. Every accepted request returns the
    /// session to [`LifecycleState::Idle`].
    pub async fn send(&self, question: impl Into<Question>) -> Result<RequestOutcome, SendError> {
        let question = question.into();
        if question.text().trim().is_empty() {
            return Err(SendError::EmptyQuestion);
        }

        let (request_id, cancel, request) = self.begin(question)?;
        let termination = self.stream_response(request_id, request, &cancel).await;

        let Some(finished) = self.commit(request_id, termination) else {
            tracing::debug!(request_id, "request superseded by a conversation reset");
            return Ok(RequestOutcome::superseded(request_id));
        };

        let persistence_error = self.persist(request_id, &finished).await.err();
        let conversation_id = self.settle(request_id);

        Ok(RequestOutcome {
            request_id,
            outcome: finished.exchange.outcome(),
            committed: finished.committed,
            conversation_id,
            persistence_error,
            superseded: false,
        })
    }

    /// Sends a question within the stored conversation `conversation_id`.
    ///
    /// When it is not the current conversation, the local transcript is
    /// replaced by an empty one carrying that id before sending.
    pub async fn send_in(
        &self,
        conversation_id: impl Into<String>,
        question: impl Into<Question>,
    ) -> Result<RequestOutcome, SendError> {
        let question = question.into();
        if question.text().trim().is_empty() {
            return Err(SendError::EmptyQuestion);
        }
        let conversation_id = conversation_id.into();
        if self.conversation_id().as_deref() != Some(conversation_id.as_str()) {
            self.load_conversation(Conversation::new(conversation_id, Vec::new()))?;
        }
        self.send(question).await
    }

    /// Cancels the active request or a pending clear. Idempotent; returns
    /// whether anything was signalled.
    pub fn stop(&self) -> bool {
        stop_active(&self.state)
    }

    /// Handle that can stop the active request from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Clears the local transcript and conversation id. The stored record is untouched.
    ///
    /// An in-flight request is cancelled and finishes without committing.
    pub fn new_conversation(&self) {
        let mut events = Vec::new();
        {
            let mut state = self.lock_state();
            state.reset(&mut events);
        }
        self.emit(events);
    }

    /// Clears the persisted conversation, then resets locally.
    ///
    /// On store failure nothing is reset and the error is kept as banner state.
    /// [`stop`](Self::stop) abandons a pending clear the same way.
    pub async fn clear_conversation(&self) -> Result<(), PersistenceError> {
        let cancel = CancellationToken::new();
        let conversation_id = {
            let mut state = self.lock_state();
            state.clearing = Some(cancel.clone());
            state.conversation_id.clone()
        };

        let cleared = self.clear_stored(conversation_id, &cancel).await;
        self.lock_state().clearing = None;

        if let Err(error) = cleared {
            tracing::warn!(%error, "clearing conversation failed");
            let mut events = Vec::new();
            {
                let mut state = self.lock_state();
                state.persistence_error = Some(error.clone());
                events.push(SessionEvent::PersistenceFailed(error.clone()));
            }
            self.emit(events);
            return Err(error);
        }

        self.new_conversation();
        Ok(())
    }

    /// Continue a stored conversation. Later sends use its id and append mode.
    pub fn load_conversation(&self, conversation: Conversation) -> Result<(), SendError> {
        let mut state = self.lock_state();
        if !state.lifecycle.is_idle() {
            return Err(SendError::Busy(state.lifecycle));
        }
        state.generation += 1;
        state.transcript = conversation.turns;
        state.conversation_id = conversation.id;
        state.exec_results.clear();
        state.persistence_error = None;
        Ok(())
    }

    pub fn dismiss_persistence_error(&self) {
        self.lock_state().persistence_error = None;
    }

    pub fn persistence_error(&self) -> Option<PersistenceError> {
        self.lock_state().persistence_error.clone()
    }

    pub fn state(&self) -> LifecycleState {
        self.lock_state().lifecycle
    }

    pub fn is_busy(&self) -> bool {
        !self.state().is_idle()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.lock_state().conversation_id.clone()
    }

    pub fn transcript(&self) -> Transcript {
        self.lock_state().transcript.clone()
    }

    /// Committed turns followed by the in-progress exchange.
    pub fn preview(&self) -> Vec<Turn> {
        let state = self.lock_state();
        let Some(active) = state.active.as_ref() else {
            return state.transcript.turns().to_vec();
        };
        let Some(accumulator) = active.accumulator.as_ref() else {
            return state.transcript.turns().to_vec();
        };
        state.transcript.preview(
            &active.user,
            accumulator.tool(),
            accumulator.assistant().as_ref(),
            active.mode,
        )
    }

    /// Execution results of the outstanding (or most recent) assistant response.
    pub fn exec_results(&self) -> Vec<ExecResult> {
        let state = self.lock_state();
        state
            .active
            .as_ref()
            .and_then(|active| active.accumulator.as_ref())
            .map(|accumulator| accumulator.exec_results().results().to_vec())
            .unwrap_or_else(|| state.exec_results.clone())
    }

    pub fn latest_exec_result(&self) -> Option<String> {
        latest_code_exec_result(&self.exec_results())
    }

    pub fn citations_for(&self, index: usize) -> Vec<Citation> {
        self.lock_state().transcript.citations_for(index)
    }

    /// Queries the store and caches its status. `NotConfigured` without a store.
    pub async fn refresh_history_status(&self) -> HistoryStatus {
        let status = match &self.history {
            Some(store) => store.status().await,
            None => HistoryStatus::NotConfigured,
        };
        tracing::debug!(%status, "history status");
        self.lock_state().history_status = Some(status.clone());
        status
    }

    /// "Chat history is not enabled" notice, once a status is known.
    pub fn history_notice(&self) -> Option<HistoryNotice> {
        self.lock_state()
            .history_status
            .as_ref()
            .and_then(HistoryStatus::notice)
    }

    fn begin(
        &self,
        question: Question,
    ) -> Result<(RequestId, CancellationToken, ConversationRequest), SendError> {
        let mut events = Vec::new();
        let begun = {
            let mut state = self.lock_state();
            if !state.lifecycle.is_idle() {
                return Err(SendError::Busy(state.lifecycle));
            }

            state.next_request_id += 1;
            let request_id = state.next_request_id;
            let user = Turn::user(question);
            let mode = AppendMode::for_conversation(state.conversation_id.as_deref());

            let mut outgoing = state.transcript.turns().to_vec();
            outgoing.push(user.clone());
            let request = ConversationRequest::new(&outgoing, state.conversation_id.clone());

            if mode == AppendMode::Continuing {
                state.transcript.push_user_echo(user.clone());
                events.push(SessionEvent::Committed {
                    request_id,
                    turns: vec![user.clone()],
                });
            }

            let cancel = CancellationToken::new();
            let generation = state.generation;
            state.exec_results.clear();
            state.active = Some(ActiveRequest {
                id: request_id,
                generation,
                cancel: cancel.clone(),
                user,
                mode,
                accumulator: Some(TurnAccumulator::new()),
            });
            state.set_lifecycle(LifecycleState::Sending, &mut events);
            (request_id, cancel, request)
        };
        self.emit(events);
        Ok(begun)
    }

    async fn stream_response(
        &self,
        request_id: RequestId,
        request: ConversationRequest,
        cancel: &CancellationToken,
    ) -> Termination {
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            opened = self.transport.open(request, cancel.clone()) => opened,
        };

        let source = match opened {
            Ok(source) => source,
            Err(TransportError::Cancelled) => return Termination::Cancelled,
            Err(error) => {
                tracing::warn!(%error, request_id, "opening response stream failed");
                return Termination::Failed(error.raw_message().to_string());
            }
        };

        if !self.mark_streaming(request_id) {
            return Termination::Cancelled;
        }

        let mut fragments = FragmentStream::new(source, cancel.clone());
        while let Some(next) = fragments.next().await {
            match next {
                Ok(fragment) => match self.absorb(request_id, fragment) {
                    None => return Termination::Cancelled,
                    Some(true) => return Termination::EndOfStream,
                    Some(false) => {}
                },
                Err(TransportError::Cancelled) => return Termination::Cancelled,
                Err(error) => {
                    tracing::warn!(%error, request_id, "response stream failed");
                    return Termination::Failed(error.raw_message().to_string());
                }
            }
        }

        if cancel.is_cancelled() {
            Termination::Cancelled
        } else {
            Termination::EndOfStream
        }
    }

    fn mark_streaming(&self, request_id: RequestId) -> bool {
        let mut events = Vec::new();
        let current = {
            let mut state = self.lock_state();
            let current = state.active_for(request_id).is_some();
            if current {
                state.set_lifecycle(LifecycleState::Streaming, &mut events);
            }
            current
        };
        self.emit(events);
        current
    }

    /// Returns whether accumulation closed, or `None` if the request is stale.
    fn absorb(&self, request_id: RequestId, fragment: crate::fragment::Fragment) -> Option<bool> {
        let mut events = Vec::new();
        let closed = {
            let mut state = self.lock_state();
            let accumulator = state.active_for(request_id)?.accumulator.as_mut()?;

            for effect in accumulator.absorb(fragment) {
                match effect {
                    Absorbed::AssistantDelta(delta) => {
                        events.push(SessionEvent::AssistantDelta { request_id, delta });
                    }
                    Absorbed::ToolTurn(turn) => {
                        events.push(SessionEvent::ToolTurn { request_id, turn });
                    }
                    Absorbed::ExecResults => events.push(SessionEvent::ExecResultsUpdated {
                        request_id,
                        results: accumulator.exec_results().results().to_vec(),
                    }),
                    Absorbed::ErrorTurn(_)
                    | Absorbed::ConversationAssigned(_)
                    | Absorbed::Failure(_) => {}
                }
            }
            accumulator.is_closed()
        };
        self.emit(events);
        Some(closed)
    }

    fn commit(&self, request_id: RequestId, termination: Termination) -> Option<FinishedExchange> {
        let mut events = Vec::new();
        let finished = {
            let mut state = self.lock_state();
            let active = state.active_for(request_id)?;
            let accumulator = active.accumulator.take()?;
            let user = active.user.clone();
            let mode = active.mode;
            let cancel = CancellationToken::new();
            active.cancel = cancel.clone();

            let stream_conversation_id = accumulator.conversation_id().map(ToString::to_string);
            let exec_results = accumulator.exec_results().results().to_vec();
            let exchange = accumulator.finish(user, termination);
            let committed = state.transcript.commit(&exchange, mode);

            state.exec_results = exec_results;
            events.push(SessionEvent::Committed {
                request_id,
                turns: committed.clone(),
            });
            state.set_lifecycle(LifecycleState::after(exchange.outcome()), &mut events);

            FinishedExchange {
                exchange,
                cancel,
                committed,
                conversation_id: state.conversation_id.clone(),
                stream_conversation_id,
            }
        };
        self.emit(events);
        Some(finished)
    }

    /// Persists a successful or cancelled exchange when the store is working.
    async fn persist(
        &self,
        request_id: RequestId,
        finished: &FinishedExchange,
    ) -> Result<(), PersistenceError> {
        let cancel = &finished.cancel;
        if finished.exchange.outcome() == ExchangeOutcome::Failed {
            return Ok(());
        }
        let Some(store) = self.history.clone() else {
            return Ok(());
        };
        let status = self
            .status_until_cancelled(cancel)
            .await
            .map_err(|error| self.record_persistence_failure(request_id, error))?;
        if !status.is_working() {
            return Ok(());
        }

        let conversation_id = match (&finished.conversation_id, &finished.stream_conversation_id) {
            (Some(conversation_id), _) => conversation_id.clone(),
            (None, Some(assigned)) => {
                self.adopt_conversation_id(request_id, assigned);
                assigned.clone()
            }
            (None, None) => {
                let created = until_cancelled(
                    cancel,
                    HistoryOperation::Create,
                    store.create_conversation(finished.exchange.user()),
                )
                .await
                .map_err(|error| self.record_persistence_failure(request_id, error))?;
                self.adopt_conversation_id(request_id, &created);
                created
            }
        };

        let answer = finished.exchange.answer_turns();
        until_cancelled(
            cancel,
            HistoryOperation::Append,
            store.append_turns(&conversation_id, &answer),
        )
        .await
        .map_err(|error| self.record_persistence_failure(request_id, error))
    }

    async fn clear_stored(
        &self,
        conversation_id: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<(), PersistenceError> {
        let (Some(store), Some(conversation_id)) = (self.history.clone(), conversation_id) else {
            return Ok(());
        };
        if !self.status_until_cancelled(cancel).await?.is_working() {
            return Ok(());
        }
        until_cancelled(
            cancel,
            HistoryOperation::Clear,
            store.clear_conversation(&conversation_id),
        )
        .await
    }

    async fn status_until_cancelled(
        &self,
        cancel: &CancellationToken,
    ) -> Result<HistoryStatus, PersistenceError> {
        until_cancelled(cancel, HistoryOperation::Status, async {
            Ok(self.resolved_history_status().await)
        })
        .await
    }

    async fn resolved_history_status(&self) -> HistoryStatus {
        let cached = self.lock_state().history_status.clone();
        match cached {
            Some(status) => status,
            None => self.refresh_history_status().await,
        }
    }

    fn adopt_conversation_id(&self, request_id: RequestId, conversation_id: &str) {
        let mut events = Vec::new();
        {
            let mut state = self.lock_state();
            if state.active_for(request_id).is_some() {
                state.conversation_id = Some(conversation_id.to_string());
                events.push(SessionEvent::ConversationAssigned(conversation_id.to_string()));
            }
        }
        self.emit(events);
    }

    fn record_persistence_failure(
        &self,
        request_id: RequestId,
        error: PersistenceError,
    ) -> PersistenceError {
        tracing::warn!(%error, request_id, "persisting exchange failed");
        let mut events = Vec::new();
        {
            let mut state = self.lock_state();
            if state.active_for(request_id).is_some() {
                state.persistence_error = Some(error.clone());
                events.push(SessionEvent::PersistenceFailed(error.clone()));
            }
        }
        self.emit(events);
        error
    }

    /// Releases the active slot and returns to idle. Returns the conversation id.
    fn settle(&self, request_id: RequestId) -> Option<String> {
        let mut events = Vec::new();
        let conversation_id = {
            let mut state = self.lock_state();
            if state.active_for(request_id).is_some() {
                state.active = None;
                state.set_lifecycle(LifecycleState::Idle, &mut events);
            }
            state.conversation_id.clone()
        };
        self.emit(events);
        conversation_id
    }

    fn emit(&self, events: Vec<SessionEvent>) {
        let Some(observer) = &self.observer else {
            return;
        };
        for event in &events {
            observer(event);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        lock_unpoisoned(&self.state)
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("state", &self.state())
            .field("persisted", &self.history.is_some())
            .finish_non_exhaustive()
    }
}

/// Cloneable handle that stops the session's active request.
#[derive(Clone)]
pub struct StopHandle {
    state: Arc<Mutex<SessionState>>,
}

impl StopHandle {
    pub fn stop(&self) -> bool {
        stop_active(&self.state)
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle").finish_non_exhaustive()
    }
}

fn stop_active(state: &Mutex<SessionState>) -> bool {
    let state = lock_unpoisoned(state);
    let mut signalled = false;
    if let Some(active) = state.active.as_ref().filter(|active| !active.cancel.is_cancelled()) {
        tracing::debug!(request_id = active.id, "stopping active request");
        active.cancel.cancel();
        signalled = true;
    }
    if let Some(clearing) = state.clearing.as_ref().filter(|token| !token.is_cancelled()) {
        tracing::debug!("stopping conversation clear");
        clearing.cancel();
        signalled = true;
    }
    signalled
}

async fn until_cancelled<T, F>(
    cancel: &CancellationToken,
    operation: HistoryOperation,
    call: F,
) -> Result<T, PersistenceError>
where
    F: Future<Output = Result<T, PersistenceError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(PersistenceError::new(operation, "cancelled")),
        result = call => result,
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
