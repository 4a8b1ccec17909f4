//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to control the chat session without sending messages
//! to the API.

/// A parsed chat command.
///
/// These commands control the chat session and are not sent to the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Exit the chat application.
    Quit,

    /// Display help information.
    Help,

    /// Display the in-memory conversation history.
    History,

    /// Save the conversation under the given id.
    Save(String),

    /// Clear the in-memory conversation history.
    Clear,

    /// List saved conversations.
    List,

    /// Load a saved conversation, replacing the in-memory history.
    Load(String),

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command,
/// or `None` if it should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use parley::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/load 20260829120000").is_some());
/// assert!(parse_command("Hello!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    if !input.starts_with('/') {
        return None;
    }

    let mut parts = input[1..].splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "help" | "?" => ChatCommand::Help,
        "history" => ChatCommand::History,
        "clear" => ChatCommand::Clear,
        "list" => ChatCommand::List,
        "save" => match argument {
            Some(id) => ChatCommand::Save(id.to_string()),
            None => ChatCommand::Invalid("/save requires a conversation id".to_string()),
        },
        "load" => match argument {
            Some(id) => ChatCommand::Load(id.to_string()),
            None => ChatCommand::Invalid("/load requires a conversation id".to_string()),
        },
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /history               Show the conversation so far
  /save <id>             Save the conversation under a new id
  /load <id>             Load a saved conversation
  /list                  List saved conversations
  /clear                 Clear conversation history
  /help                  Show this help message
  /quit                  Exit the chat"#
}
