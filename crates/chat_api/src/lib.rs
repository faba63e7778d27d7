//! HTTP adapter for the chat backend.
//!
//! [`ChatApiClient`] implements [`chat_stream::ChatTransport`] against
//! `POST {base}/conversation`, which answers with a newline-delimited JSON
//! body. [`HttpHistoryStore`] implements [`chat_stream::HistoryStore`] against
//! the `/history/*` routes of the same backend.
//!
//! The crate owns wire concerns only: URL normalization, headers, retry and
//! error-body parsing. Decoding and reconciliation stay in `chat_stream`.

pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod history;
pub mod payload;
pub mod retry;
pub mod url;

pub use client::ChatApiClient;
pub use config::ChatApiConfig;
pub use error::ChatApiError;
pub use history::HttpHistoryStore;
pub use retry::RetryPolicy;
pub use url::{normalize_base_url, HistoryEndpoint};
