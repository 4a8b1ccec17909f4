//! Core chat session management.
//!
//! This module provides the `ChatSession` struct which owns the in-memory
//! conversation, dispatches turns through the transport, and persists the
//! transcript after every successful exchange. It also hosts the
//! interactive REPL.

use std::fs;
use std::io::{IsTerminal, Read};
use std::sync::atomic::{AtomicBool, Ordering};

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use time::OffsetDateTime;
use time::macros::format_description;

use crate::chat::commands::{ChatCommand, help_text, parse_command};
use crate::chat::config::ChatConfig;
use crate::chat::render::Renderer;
use crate::chat::stream::stream_response;
use crate::client::Transport;
use crate::error::{Error, Result};
use crate::store::ConversationStore;
use crate::types::{ChatRequest, Message, MessageRole};

/// A chat session that manages conversation state and API interactions.
///
/// The session is generic over its transport so its orchestration can be
/// exercised without a network.
pub struct ChatSession<T: Transport> {
    transport: T,
    store: ConversationStore,
    config: ChatConfig,
    messages: Vec<Message>,
    conversation_id: Option<String>,
}

impl<T: Transport> ChatSession<T> {
    /// Creates a new chat session with the given transport and configuration.
    pub fn new(transport: T, store: ConversationStore, config: ChatConfig) -> Self {
        Self {
            transport,
            store,
            config,
            messages: Vec::new(),
            conversation_id: None,
        }
    }

    /// Returns the number of messages in the conversation.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Returns the conversation this session is bound to, if any.
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Binds the session to a conversation, replacing the in-memory history
    /// with the stored transcript.
    ///
    /// A transcript that exists but cannot be parsed leaves the session
    /// bound with an empty history; the warning tells the user why.
    pub fn bind(&mut self, id: String, renderer: &mut dyn Renderer) {
        match self.store.load(&id) {
            Ok(messages) => self.messages = messages,
            Err(err) => {
                renderer.print_warning(&format!("starting fresh: {err}"));
                self.messages.clear();
            }
        }
        self.conversation_id = Some(id);
    }

    /// Runs the session to completion: a single prompt, a history display,
    /// or the interactive REPL, depending on what was asked for.
    pub async fn run(
        &mut self,
        prompt: &str,
        renderer: &mut dyn Renderer,
        interrupted: &AtomicBool,
    ) -> Result<()> {
        if let Some(id) = self.resolve_binding(renderer)? {
            self.bind(id, renderer);
        }

        let composed = self.compose_prompt(prompt)?;

        if self.config.interactive {
            let seed = (!composed.is_empty()).then_some(composed.as_str());
            return self.run_interactive(seed, renderer, interrupted).await;
        }

        if composed.is_empty() {
            if self.conversation_id.is_some() {
                self.replay(renderer);
                return Ok(());
            }
            return self.run_interactive(None, renderer, interrupted).await;
        }

        let reply = match self.turn(&composed, renderer, interrupted).await {
            Ok(reply) => reply,
            Err(err) => {
                if !err.is_abort() {
                    renderer.print_error(&describe_error(&err, self.config.debug));
                }
                return Err(err);
            }
        };
        if let Some(path) = self.config.output.clone() {
            fs::write(&path, &reply)
                .map_err(|e| Error::io(format!("failed to write {}", path.display()), e))?;
            renderer.print_info(&format!("Reply written to {}", path.display()));
        }
        Ok(())
    }

    /// Sends one user message and returns the assistant's reply.
    ///
    /// On success the exchange is appended to history and, when the session
    /// is bound to a conversation, persisted. On failure the user message
    /// stays in memory but nothing is persisted; the transcript on disk is
    /// untouched.
    pub async fn turn(
        &mut self,
        input: &str,
        renderer: &mut dyn Renderer,
        interrupted: &AtomicBool,
    ) -> Result<String> {
        self.messages.push(Message::user(input));

        let req = ChatRequest::new(
            self.config.model.clone(),
            self.messages.clone(),
            self.config.max_tokens,
            self.config.temperature,
        );

        let reply = if self.config.stream || self.config.debug {
            let events = self.transport.stream(&req).await?;
            stream_response(events, renderer, interrupted, self.config.debug).await?
        } else {
            let reply = self.transport.send(&req, self.config.use_cache).await?;
            renderer.print_text(&reply);
            if !self.config.raw {
                renderer.finish_response();
            }
            reply
        };

        self.messages.push(Message::assistant(&reply));
        if let Some(id) = self.conversation_id.clone() {
            if let Err(err) = self.store.save(&id, &self.messages) {
                renderer.print_warning(&format!("could not save conversation {id}: {err}"));
            }
        }
        Ok(reply)
    }

    /// Runs the interactive REPL until the user quits. An optional seed
    /// prompt becomes the first turn.
    pub async fn run_interactive(
        &mut self,
        seed: Option<&str>,
        renderer: &mut dyn Renderer,
        interrupted: &AtomicBool,
    ) -> Result<()> {
        let id = match &self.conversation_id {
            Some(id) => id.clone(),
            None => {
                let id = mint_conversation_id();
                self.conversation_id = Some(id.clone());
                id
            }
        };

        renderer.print_info(&format!(
            "parley (model: {}, conversation: {id})",
            self.config.model
        ));
        renderer.print_info("Type /help for commands, /quit to exit\n");
        if !self.messages.is_empty() {
            self.replay(renderer);
        }
        if let Some(seed) = seed {
            self.interactive_turn(seed, renderer, interrupted).await?;
        }

        let mut rl = DefaultEditor::new()
            .map_err(|e| Error::unknown(format!("failed to initialize line editor: {e}")))?;

        loop {
            interrupted.store(false, Ordering::SeqCst);

            let readline = rl.readline("you: ");
            match readline {
                Ok(line) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(&line);

                    if let Some(cmd) = parse_command(&line) {
                        if self.handle_command(cmd, renderer) {
                            break;
                        }
                        continue;
                    }

                    self.interactive_turn(&line, renderer, interrupted).await?;
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl+C at the prompt - soft interrupt
                    println!();
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    break;
                }
                Err(err) => {
                    renderer.print_error(&format!("Input error: {err}"));
                    break;
                }
            }
        }

        self.save_on_exit(renderer);
        Ok(())
    }

    /// One REPL turn: failures are reported and the loop goes on; only a
    /// hard interrupt mid-stream is treated as normal (the turn is simply
    /// dropped).
    async fn interactive_turn(
        &mut self,
        input: &str,
        renderer: &mut dyn Renderer,
        interrupted: &AtomicBool,
    ) -> Result<()> {
        match self.turn(input, renderer, interrupted).await {
            Ok(_) => {}
            Err(err) if err.is_abort() => {}
            Err(err) => {
                renderer.print_error(&describe_error(&err, self.config.debug));
            }
        }
        Ok(())
    }

    /// Handles a slash command; returns true if the session should end.
    fn handle_command(&mut self, cmd: ChatCommand, renderer: &mut dyn Renderer) -> bool {
        match cmd {
            ChatCommand::Quit => return true,
            ChatCommand::Help => {
                for line in help_text().lines() {
                    renderer.print_info(line);
                }
            }
            ChatCommand::History => {
                if self.messages.is_empty() {
                    renderer.print_info("(no messages yet)");
                } else {
                    self.replay(renderer);
                }
            }
            ChatCommand::Save(id) => match self.store.save(&id, &self.messages) {
                Ok(()) => {
                    renderer.print_info(&format!("Conversation saved as {id}"));
                    self.conversation_id = Some(id);
                }
                Err(err) => renderer.print_error(&format!("Failed to save: {err}")),
            },
            ChatCommand::Clear => {
                self.messages.clear();
                renderer.print_info("Conversation cleared.");
            }
            ChatCommand::List => match self.store.list() {
                Ok(listing) => {
                    if listing.summaries.is_empty() {
                        renderer.print_info("(no saved conversations)");
                    }
                    for summary in &listing.summaries {
                        renderer.print_info(&format!(
                            "{}  {} ({} messages)",
                            summary.id, summary.title, summary.message_count
                        ));
                    }
                    for id in &listing.malformed {
                        renderer.print_warning(&format!("skipping malformed conversation {id}"));
                    }
                }
                Err(err) => renderer.print_error(&format!("Failed to list: {err}")),
            },
            ChatCommand::Load(id) => match self.store.load(&id) {
                Ok(messages) if messages.is_empty() => {
                    renderer.print_error(&format!("No conversation named {id}"));
                }
                Ok(messages) => {
                    self.messages = messages;
                    self.conversation_id = Some(id.clone());
                    renderer.print_info(&format!("Loaded conversation {id}"));
                    self.replay(renderer);
                }
                Err(err) => renderer.print_error(&format!("Failed to load {id}: {err}")),
            },
            ChatCommand::Invalid(message) => {
                renderer.print_error(&message);
            }
        }
        false
    }

    /// Prints the in-memory history through the renderer.
    fn replay(&self, renderer: &mut dyn Renderer) {
        for message in &self.messages {
            match message.role {
                MessageRole::User => renderer.print_user(&message.content),
                MessageRole::Assistant => {
                    renderer.print_text(&message.content);
                    renderer.finish_response();
                }
            }
        }
    }

    /// Resolves which conversation, if any, this run binds to.
    fn resolve_binding(&self, renderer: &mut dyn Renderer) -> Result<Option<String>> {
        if let Some(id) = &self.config.conversation_id {
            return Ok(Some(id.clone()));
        }
        if self.config.continue_latest {
            match self.store.latest_id()? {
                Some(id) => return Ok(Some(id)),
                None => renderer.print_warning("no previous conversation to continue"),
            }
        }
        Ok(None)
    }

    /// Builds the outgoing prompt from the prompt argument, piped stdin
    /// (only consulted when no prompt was given), and file contents, in
    /// that order, separated by blank lines.
    fn compose_prompt(&self, prompt: &str) -> Result<String> {
        let mut parts = Vec::new();
        let prompt = prompt.trim();
        if !prompt.is_empty() {
            parts.push(prompt.to_string());
        } else if !std::io::stdin().is_terminal() {
            let mut piped = String::new();
            std::io::stdin()
                .read_to_string(&mut piped)
                .map_err(|e| Error::io("failed to read stdin", e))?;
            let piped = piped.trim();
            if !piped.is_empty() {
                parts.push(piped.to_string());
            }
        }
        for path in &self.config.files {
            let body = fs::read_to_string(path)
                .map_err(|e| Error::io(format!("failed to read {}", path.display()), e))?;
            parts.push(format!("Contents of {}:\n{}", path.display(), body));
        }
        Ok(parts.join("\n\n"))
    }

    fn save_on_exit(&self, renderer: &mut dyn Renderer) {
        let Some(id) = &self.conversation_id else {
            return;
        };
        if self.messages.is_empty() {
            return;
        }
        match self.store.save(id, &self.messages) {
            Ok(()) => renderer.print_info(&format!("Conversation saved as {id}. Goodbye!")),
            Err(err) => renderer.print_error(&format!("Failed to save conversation: {err}")),
        }
    }
}

/// Mints a fresh conversation id from the wall clock, e.g. 20260829143000.
fn mint_conversation_id() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let format = format_description!("[year][month][day][hour][minute][second]");
    now.format(&format)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Renders an error with enough guidance that the user knows what to try
/// next.
pub fn describe_error(err: &Error, debug: bool) -> String {
    let detail = err.to_string();
    let lower = detail.to_lowercase();
    match err {
        Error::RateLimit { retry_after, .. } => {
            let mut text = String::from("Rate limit exceeded. ");
            match retry_after {
                Some(secs) => text.push_str(&format!("Retry after {secs} seconds.")),
                None => text.push_str("Wait a moment before sending another message."),
            }
            text
        }
        Error::Connection { .. } => format!(
            "Could not reach the API: {detail}\n\
             Check your network connection and any proxy settings."
        ),
        Error::Timeout { .. } => format!("{detail}\nThe request took too long; try again."),
        Error::Authentication { .. } => format!(
            "{detail}\n\
             Check your API key (--api-key, PARLEY_API_KEY, or run --setup)."
        ),
        Error::NotFound { .. } => {
            format!("{detail}\nCheck the model name (--models lists known models).")
        }
        Error::InternalServer { .. } | Error::ServiceUnavailable { .. } => {
            format!("{detail}\nThe service had a problem on its end; try again shortly.")
        }
        _ if lower.contains("quota") => {
            format!("{detail}\nYour account may be out of credits; check your plan and billing.")
        }
        _ if lower.contains("invalid_api_key") => format!(
            "{detail}\n\
             Check your API key (--api-key, PARLEY_API_KEY, or run --setup)."
        ),
        _ if debug => format!("{err:?}"),
        _ => detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_are_timestamps() {
        let id = mint_conversation_id();
        assert_eq!(id.len(), 14);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn rate_limit_errors_mention_the_retry_delay() {
        let err = Error::rate_limit("too many requests", Some(30));
        let text = describe_error(&err, false);
        assert!(text.contains("Retry after 30 seconds"));
    }

    #[test]
    fn authentication_errors_point_at_the_key() {
        let err = Error::authentication("invalid x-api-key");
        let text = describe_error(&err, false);
        assert!(text.contains("PARLEY_API_KEY"));
    }

    #[test]
    fn quota_problems_surface_billing_guidance() {
        let err = Error::api(
            400,
            Some("invalid_request_error".to_string()),
            "monthly quota exhausted".to_string(),
            None,
        );
        let text = describe_error(&err, false);
        assert!(text.contains("billing"));
    }

    #[test]
    fn debug_mode_shows_the_full_error() {
        let err = Error::unknown("what happened");
        let text = describe_error(&err, true);
        assert!(text.contains("Unknown"));
    }
}
