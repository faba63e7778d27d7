//! Line-oriented chat host over `chat_stream`.
//!
//! ## Transport bootstrap
//!
//! `chat_cli` selects its transport explicitly:
//!
//! - `CHAT_TRANSPORT=mock` (default) for the deterministic scripted transport
//!   with an in-memory history store
//! - `CHAT_TRANSPORT=http` for the HTTP backend
//!
//! When `CHAT_TRANSPORT=http`, set `CHAT_CONFIG_PATH` to a readable UTF-8 JSON
//! file with this shape:
//!
//! ```json
//! {
//!   "base_url": "http://127.0.0.1:50505",
//!   "timeout_sec": 120,
//!   "history": true,
//!   "headers": {"x-ms-client-principal-id": "local-user"}
//! }
//! ```
//!
//! Contract notes:
//! - `base_url` is required and must be non-empty.
//! - `timeout_sec` is optional and must be > 0 when provided.
//! - `history` defaults to `true`; `false` keeps the session in memory.
//! - Unknown JSON fields are rejected.
//!
//! Logging goes to stderr through `tracing`; set `RUST_LOG` to adjust it.

pub mod commands;
pub mod config;
pub mod render;
pub mod repl;
