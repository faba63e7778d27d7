use thiserror::Error;

use crate::session::LifecycleState;

/// A newline-delimited record that could not be turned into fragments.
///
/// Never fatal: the decoder logs it and continues with the next record.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record is not valid JSON: {source}")]
    Json {
        record: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("record is valid JSON but not an object")]
    NotAnObject { record: String },

    #[error("message has unknown role '{role}'")]
    UnknownRole { role: String },

    #[error("message is missing field '{field}'")]
    MissingField { field: &'static str },

    #[error("message field '{field}' has unexpected shape: {source}")]
    Field {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Side-channel payload could not be interpreted.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("tool payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tool payload has no '{0}' list")]
    MissingList(&'static str),

    #[error("turn is not a text tool turn")]
    NotToolText,
}

/// Transport-level failure while opening or reading a response stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("HTTP {status} {message}")]
    Status { status: u16, message: String },

    #[error("request error: {0}")]
    Request(String),

    #[error("stream failure: {0}")]
    Stream(String),

    #[error("request was cancelled")]
    Cancelled,
}

impl TransportError {
    /// Message suitable for the display formatter: status prefixes are dropped.
    pub fn raw_message(&self) -> &str {
        match self {
            Self::Status { message, .. } | Self::Request(message) | Self::Stream(message) => {
                message
            }
            Self::Cancelled => "request was cancelled",
        }
    }
}

/// A History Synchronizer call failed. Local turns are never rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("history {operation} failed: {message}")]
pub struct PersistenceError {
    pub operation: HistoryOperation,
    pub message: String,
}

impl PersistenceError {
    #[must_use]
    pub fn new(operation: HistoryOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOperation {
    Status,
    Create,
    Append,
    Clear,
}

impl std::fmt::Display for HistoryOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Status => "status",
            Self::Create => "create",
            Self::Append => "append",
            Self::Clear => "clear",
        })
    }
}

/// A send was refused before any request was issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("a request is already {0}")]
    Busy(LifecycleState),

    #[error("question is empty")]
    EmptyQuestion,
}
