#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    New,
    Clear,
    Stop,
    Dismiss,
    Quit,
    Unknown(String),
}

pub const HELP_TEXT: &str = "\
/help     show this help
/new      start a new conversation (stored history is kept)
/clear    clear the stored conversation, then start over
/stop     stop the answer that is streaming
/dismiss  hide the history error banner
/quit     exit";

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let command = trimmed
        .split_whitespace()
        .next()
        .unwrap_or(trimmed)
        .to_string();

    let parsed = match command.as_str() {
        "/help" => SlashCommand::Help,
        "/new" => SlashCommand::New,
        "/clear" => SlashCommand::Clear,
        "/stop" | "/cancel" => SlashCommand::Stop,
        "/dismiss" => SlashCommand::Dismiss,
        "/quit" | "/exit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command),
    };

    Some(parsed)
}
