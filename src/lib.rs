//! Streaming-response reconciliation engine for conversational clients.
//!
//! A request is opened through a [`ChatTransport`], its newline-delimited
//! response body is decoded into [`Fragment`]s, folded into in-progress turns
//! by a [`TurnAccumulator`], and committed to the [`Transcript`] when the
//! stream ends, fails or is cancelled.
//!
//! Invariant: a tool turn is only ever committed immediately before the
//! assistant turn it annotates.
//!
//! # Public API Overview
//! - Drive requests with [`ChatSession`]: `send`, `stop`, `new_conversation`,
//!   `clear_conversation`, `load_conversation`.
//! - Plug in the generation service via [`ChatTransport`] and the optional
//!   durable store via [`HistoryStore`].
//! - Read side channels with [`parse_citations`] / [`parse_exec_results`], or
//!   through [`Transcript::citations_for`] on a committed assistant turn.
//!
//! # Append modes
//! Without a server conversation id the user turn is committed together with
//! the answer (`[user, tool?, assistant]`). With an id, the user turn is echoed
//! into the transcript at send time and only `[tool?, assistant]` is appended.

pub mod accumulator;
pub mod decoder;
pub mod error;
pub mod failure;
pub mod fragment;
pub mod history;
pub mod session;
pub mod side_channel;
pub mod transcript;
pub mod transport;
pub mod turn;

pub use accumulator::{Absorbed, Termination, TurnAccumulator};
pub use decoder::{FragmentStream, NdjsonDecoder};
pub use error::{
    DecodeError, HistoryOperation, ParseError, PersistenceError, SendError, TransportError,
};
pub use failure::{display_error_message, GENERIC_ERROR, NO_CONTENT_ERROR};
pub use fragment::{Fragment, MessageFragment};
pub use history::{HistoryNotice, HistoryStatus, HistoryStore};
pub use session::{
    ChatSession, LifecycleState, RequestId, RequestOutcome, SessionEvent, SessionObserver,
    StopHandle,
};
pub use side_channel::{
    has_exec_results_marker, latest_code_exec_result, parse_citations, parse_exec_results,
    Citation, ExecResult, ExecResultLog,
};
pub use transcript::{AppendMode, Conversation, Exchange, ExchangeOutcome, Transcript};
pub use transport::{ByteStream, ChatTransport, ConversationRequest};
pub use turn::{ContentPart, Feedback, ImageUrl, Question, Role, Turn, TurnContent};
