use std::future::Future;

use async_trait::async_trait;
use chat_stream::{ByteStream, ChatTransport, ConversationRequest, TransportError};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::ChatApiConfig;
use crate::error::{parse_error_message, ChatApiError};
use crate::headers::{build_headers, ACCEPT_JSON, ACCEPT_NDJSON};
use crate::retry::is_retryable_http_error;
use crate::url::{conversation_url, history_url, HistoryEndpoint};

#[derive(Debug, Clone)]
pub struct ChatApiClient {
    http: Client,
    config: ChatApiConfig,
}

impl ChatApiClient {
    pub fn new(config: ChatApiConfig) -> Result<Self, ChatApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ChatApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ChatApiConfig {
        &self.config
    }

    pub fn conversation_endpoint(&self) -> String {
        conversation_url(&self.config.base_url)
    }

    pub fn history_endpoint(&self, endpoint: HistoryEndpoint) -> String {
        history_url(&self.config.base_url, endpoint)
    }

    pub fn build_headers(&self, accept: &str) -> Result<HeaderMap, ChatApiError> {
        let headers = build_headers(&self.config, accept);
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                    ChatApiError::InvalidHeader(format!("invalid header key: {key}"))
                })?,
                HeaderValue::from_str(&value).map_err(|_| {
                    ChatApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &ConversationRequest,
    ) -> Result<RequestBuilder, ChatApiError> {
        let headers = self.build_headers(ACCEPT_NDJSON)?;
        Ok(self
            .http
            .post(self.conversation_endpoint())
            .headers(headers)
            .json(request))
    }

    /// Open the conversation stream, retrying transient failures.
    ///
    /// Backoff sleeps and in-flight attempts both end early on `cancel`.
    pub async fn send_with_retry(
        &self,
        request: &ConversationRequest,
        cancel: &CancellationToken,
    ) -> Result<Response, ChatApiError> {
        let policy = self.config.retry;
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=policy.max_retries {
            if cancel.is_cancelled() {
                return Err(ChatApiError::Cancelled);
            }

            let response = self.build_request(request)?.send();
            let response = await_or_cancel(response, cancel)
                .await?
                .map_err(ChatApiError::from);

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    last_status = Some(status);
                    let body = await_or_cancel(response.text(), cancel)
                        .await?
                        .unwrap_or_default();
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    let retryable = is_retryable_http_error(status.as_u16(), &body);
                    if policy.allows_retry(attempt) && retryable {
                        tracing::debug!(attempt, %status, "retrying conversation request");
                        await_or_cancel(tokio::time::sleep(policy.delay(attempt)), cancel).await?;
                        continue;
                    }

                    return Err(ChatApiError::Status(status, message));
                }
                Err(error) => {
                    let message = error.to_string();
                    last_error = Some(message);
                    if policy.allows_retry(attempt) {
                        tracing::debug!(
                            attempt,
                            error = ?last_error,
                            "retrying conversation request"
                        );
                        await_or_cancel(tokio::time::sleep(policy.delay(attempt)), cancel).await?;
                        continue;
                    }
                    return Err(ChatApiError::RetryExhausted {
                        status: last_status,
                        last_error,
                    });
                }
            }
        }

        Err(ChatApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    /// Single-attempt JSON call against a history route.
    pub(crate) async fn history_call<B>(
        &self,
        endpoint: HistoryEndpoint,
        body: Option<&B>,
    ) -> Result<(StatusCode, String), ChatApiError>
    where
        B: Serialize + ?Sized,
    {
        let headers = self.build_headers(ACCEPT_JSON)?;
        let url = self.history_endpoint(endpoint);
        let builder = match body {
            Some(body) => self.http.post(url).json(body),
            None => self.http.get(url),
        };
        let response = builder.headers(headers).send().await?;
        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }
}

#[async_trait]
impl ChatTransport for ChatApiClient {
    async fn open(
        &self,
        request: ConversationRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        let response = self.send_with_retry(&request, &cancel).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|error| TransportError::Stream(error.to_string()))
            })
            .take_until(cancel.cancelled_owned());
        Ok(Box::pin(body))
    }
}

async fn await_or_cancel<F>(
    future: F,
    cancel: &CancellationToken,
) -> Result<F::Output, ChatApiError>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChatApiError::Cancelled),
        output = future => Ok(output),
    }
}
