use std::fmt;

use chat_stream::{HistoryOperation, PersistenceError, TransportError};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Error as JsonError;

#[derive(Debug)]
pub enum ChatApiError {
    InvalidHeader(String),
    Request(reqwest::Error),
    Status(StatusCode, String),
    Serde(JsonError),
    MissingConversationId,
    RetryExhausted {
        status: Option<StatusCode>,
        last_error: Option<String>,
    },
    Cancelled,
}

/// Backend error bodies come as `{"error": "text"}` or `{"error": {"message": "text"}}`.
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: Option<ErrorField>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Text(String),
    Detail { message: Option<String> },
}

impl ErrorField {
    fn message(&self) -> Option<&str> {
        let message = match self {
            Self::Text(text) => text.as_str(),
            Self::Detail { message } => message.as_deref()?,
        };
        non_empty_string(message)
    }
}

impl fmt::Display for ChatApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHeader(message) => write!(f, "invalid header: {message}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Status(status, message) => write!(f, "HTTP {status} {message}"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::MissingConversationId => {
                write!(f, "history store returned no conversation id")
            }
            Self::RetryExhausted { status, last_error } => {
                let status = status
                    .map(|status| status.as_u16().to_string())
                    .unwrap_or_else(|| "n/a".to_owned());
                let last_error = last_error.as_deref().unwrap_or("none");
                write!(
                    f,
                    "retry exhausted after max attempts (status: {status}, last_error: {last_error})"
                )
            }
            Self::Cancelled => write!(f, "request was cancelled"),
        }
    }
}

impl std::error::Error for ChatApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(error) => Some(error),
            Self::Serde(error) => Some(error),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ChatApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<JsonError> for ChatApiError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

impl From<ChatApiError> for TransportError {
    fn from(error: ChatApiError) -> Self {
        match error {
            ChatApiError::Status(status, message) => TransportError::Status {
                status: status.as_u16(),
                message,
            },
            ChatApiError::Cancelled => TransportError::Cancelled,
            ChatApiError::RetryExhausted {
                last_error: Some(last_error),
                ..
            } => TransportError::Request(last_error),
            other => TransportError::Request(other.to_string()),
        }
    }
}

impl ChatApiError {
    pub fn into_persistence(self, operation: HistoryOperation) -> PersistenceError {
        let message = match self {
            Self::Status(status, message) => format!("{} {message}", status.as_u16()),
            other => other.to_string(),
        };
        PersistenceError::new(operation, message)
    }
}

/// Extract a human-readable message from an error response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .and_then(|payload| payload.error);
    if let Some(message) = parsed.as_ref().and_then(ErrorField::message) {
        return message.to_owned();
    }

    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}

fn non_empty_string(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_converts_without_prefix_loss() {
        let transport = TransportError::from(ChatApiError::Status(
            StatusCode::BAD_REQUEST,
            "content filtered".to_owned(),
        ));
        assert_eq!(
            transport,
            TransportError::Status {
                status: 400,
                message: "content filtered".to_owned(),
            }
        );
    }

    #[test]
    fn persistence_message_keeps_status_code() {
        let error = ChatApiError::Status(StatusCode::SERVICE_UNAVAILABLE, "down".to_owned())
            .into_persistence(HistoryOperation::Append);
        assert_eq!(error.to_string(), "history append failed: 503 down");
    }
}
