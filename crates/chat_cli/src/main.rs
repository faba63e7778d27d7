use std::io;
use std::sync::{Arc, Mutex};

use chat_cli::config::backend_from_env;
use chat_cli::render::{self, SharedWriter};
use chat_cli::repl;
use chat_stream::ChatSession;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let backend = backend_from_env().map_err(io::Error::other)?;
    tracing::info!(transport = backend.id, "starting chat session");

    let out: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let session = Arc::new(
        ChatSession::new(backend.transport)
            .with_history(backend.history)
            .with_observer(render::observer(Arc::clone(&out))),
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(repl::run(
        session,
        BufReader::new(tokio::io::stdin()),
        out,
    ))
}
