use async_trait::async_trait;
use chat_stream::{HistoryOperation, HistoryStatus, HistoryStore, PersistenceError, Turn};
use reqwest::StatusCode;

use crate::client::ChatApiClient;
use crate::error::{parse_error_message, ChatApiError};
use crate::payload::{
    ClearConversationBody, CreateConversationBody, CreateConversationResponse, EnsureResponse,
    UpdateConversationBody,
};
use crate::url::HistoryEndpoint;

/// [`HistoryStore`] backed by the backend's `/history/*` routes.
#[derive(Debug, Clone)]
pub struct HttpHistoryStore {
    client: ChatApiClient,
}

impl HttpHistoryStore {
    pub fn new(client: ChatApiClient) -> Self {
        Self { client }
    }

    async fn post<B>(
        &self,
        operation: HistoryOperation,
        endpoint: HistoryEndpoint,
        body: &B,
    ) -> Result<String, PersistenceError>
    where
        B: serde::Serialize,
    {
        let (status, text) = self
            .client
            .history_call(endpoint, Some(body))
            .await
            .map_err(|error| error.into_persistence(operation))?;
        if !status.is_success() {
            let message = parse_error_message(status, &text);
            return Err(ChatApiError::Status(status, message).into_persistence(operation));
        }
        Ok(text)
    }
}

/// Map a `/history/ensure` response onto a store status.
pub fn status_from_ensure(status: StatusCode, body: &str) -> HistoryStatus {
    let parsed = serde_json::from_str::<EnsureResponse>(body).unwrap_or_default();
    match status.as_u16() {
        200 if parsed.message.is_some() => HistoryStatus::Working,
        401 => HistoryStatus::InvalidCredentials,
        500 => HistoryStatus::NotWorking,
        422 => HistoryStatus::Misconfigured(
            parsed
                .error
                .filter(|reason| !reason.trim().is_empty())
                .unwrap_or_else(|| parse_error_message(status, body)),
        ),
        _ => HistoryStatus::NotConfigured,
    }
}

#[async_trait]
impl HistoryStore for HttpHistoryStore {
    async fn status(&self) -> HistoryStatus {
        if !self.client.config().history_enabled {
            return HistoryStatus::NotConfigured;
        }

        match self
            .client
            .history_call::<()>(HistoryEndpoint::Ensure, None)
            .await
        {
            Ok((status, body)) => status_from_ensure(status, &body),
            Err(error) => {
                tracing::warn!(%error, "history status probe failed");
                HistoryStatus::NotWorking
            }
        }
    }

    async fn create_conversation(&self, first_turn: &Turn) -> Result<String, PersistenceError> {
        let operation = HistoryOperation::Create;
        let text = self
            .post(
                operation,
                HistoryEndpoint::Create,
                &CreateConversationBody::new(first_turn),
            )
            .await?;
        let response = serde_json::from_str::<CreateConversationResponse>(&text)
            .map_err(|error| ChatApiError::from(error).into_persistence(operation))?;

        response
            .conversation_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ChatApiError::MissingConversationId.into_persistence(operation))
    }

    async fn append_turns(
        &self,
        conversation_id: &str,
        turns: &[Turn],
    ) -> Result<(), PersistenceError> {
        let body = UpdateConversationBody {
            conversation_id,
            messages: turns,
        };
        self.post(HistoryOperation::Append, HistoryEndpoint::Update, &body)
            .await
            .map(drop)
    }

    async fn clear_conversation(&self, conversation_id: &str) -> Result<(), PersistenceError> {
        let body = ClearConversationBody { conversation_id };
        self.post(HistoryOperation::Clear, HistoryEndpoint::Clear, &body)
            .await
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_status_mapping() {
        assert_eq!(
            status_from_ensure(
                StatusCode::OK,
                r#"{"message":"history store is configured and working"}"#
            ),
            HistoryStatus::Working
        );
        assert_eq!(
            status_from_ensure(StatusCode::OK, "{}"),
            HistoryStatus::NotConfigured
        );
        assert_eq!(
            status_from_ensure(StatusCode::UNAUTHORIZED, ""),
            HistoryStatus::InvalidCredentials
        );
        assert_eq!(
            status_from_ensure(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            HistoryStatus::NotWorking
        );
        assert_eq!(
            status_from_ensure(StatusCode::NOT_FOUND, ""),
            HistoryStatus::NotConfigured
        );
    }

    #[test]
    fn misconfigured_status_carries_reason() {
        assert_eq!(
            status_from_ensure(
                StatusCode::UNPROCESSABLE_ENTITY,
                r#"{"error":"container conversations not found"}"#
            ),
            HistoryStatus::Misconfigured("container conversations not found".to_owned())
        );
    }
}
