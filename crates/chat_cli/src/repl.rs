use std::io;
use std::sync::Arc;

use chat_stream::{ChatSession, ExchangeOutcome, RequestOutcome, SendError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;

use crate::commands::{parse_slash_command, SlashCommand, HELP_TEXT};
use crate::render::{render_notice, write_out, SharedWriter};

type Running = JoinHandle<Result<RequestOutcome, SendError>>;

enum Next {
    Line(Option<String>),
    Finished(Result<Result<RequestOutcome, SendError>, tokio::task::JoinError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Reads questions and commands from `input` until `/quit` or end of input.
///
/// A question runs as a background task so `/stop` can be read while the
/// answer streams. At end of input the running answer is awaited, not stopped.
pub async fn run<R>(session: Arc<ChatSession>, input: R, out: SharedWriter) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut running: Option<Running> = None;

    if let Some(notice) = session.refresh_history_status().await.notice() {
        print(&out, &render_notice(&notice));
    }

    loop {
        let next = match running.as_mut() {
            Some(handle) => tokio::select! {
                joined = handle => Next::Finished(joined),
                line = lines.next_line() => Next::Line(line?),
            },
            None => Next::Line(lines.next_line().await?),
        };

        match next {
            Next::Finished(joined) => {
                running = None;
                report(&out, joined);
            }
            Next::Line(None) => break,
            Next::Line(Some(line)) => {
                if handle_line(&session, &out, &mut running, &line).await == Flow::Quit {
                    break;
                }
            }
        }
    }

    if let Some(handle) = running.take() {
        report(&out, handle.await);
    }
    Ok(())
}

async fn handle_line(
    session: &Arc<ChatSession>,
    out: &SharedWriter,
    running: &mut Option<Running>,
    line: &str,
) -> Flow {
    let Some(command) = parse_slash_command(line) else {
        if line.trim().is_empty() {
            return Flow::Continue;
        }
        if running.is_some() {
            print(out, "an answer is still streaming; /stop it first\n");
            return Flow::Continue;
        }
        let session = Arc::clone(session);
        let question = line.to_string();
        *running = Some(tokio::spawn(async move { session.send(question).await }));
        return Flow::Continue;
    };

    match command {
        SlashCommand::Help => print(out, &format!("{HELP_TEXT}\n")),
        SlashCommand::Stop => {
            if !session.stop() {
                print(out, "nothing to stop\n");
            }
        }
        SlashCommand::New => {
            session.new_conversation();
            print(out, "started a new conversation\n");
        }
        SlashCommand::Clear => {
            if running.is_some() {
                print(out, "an answer is still streaming; /stop it first\n");
                return Flow::Continue;
            }
            match session.clear_conversation().await {
                Ok(()) => print(out, "conversation cleared\n"),
                Err(error) => tracing::debug!(%error, "clear reported through the banner"),
            }
        }
        SlashCommand::Dismiss => session.dismiss_persistence_error(),
        SlashCommand::Quit => {
            session.stop();
            return Flow::Quit;
        }
        SlashCommand::Unknown(command) => {
            print(out, &format!("unknown command {command}; try /help\n"));
        }
    }

    Flow::Continue
}

fn report(
    out: &SharedWriter,
    joined: Result<Result<RequestOutcome, SendError>, tokio::task::JoinError>,
) {
    match joined {
        Ok(Ok(outcome)) => {
            if outcome.superseded {
                print(out, "(discarded)\n");
            } else if outcome.outcome == ExchangeOutcome::Cancelled {
                print(out, "(stopped)\n");
            }
        }
        Ok(Err(error)) => print(out, &format!("{error}\n")),
        Err(error) => tracing::warn!(%error, "send task failed"),
    }
}

fn print(out: &SharedWriter, text: &str) {
    write_out(out, text);
}
