//! Chat application module for interactive conversations with Claude.
//!
//! This module provides the CLI-facing layer built on top of the parley
//! client library. It supports:
//!
//! - One-shot prompts with optional streaming display
//! - An interactive REPL with slash commands
//! - Conversations persisted and resumed by id
//! - Configuration layered from arguments, environment, and a settings file
//!
//! # Architecture
//!
//! The module is organized into several components:
//!
//! - [`config`]: CLI argument parsing, settings file, and configuration
//! - [`session`]: Session orchestration, persistence, and the REPL
//! - [`commands`]: Slash command parsing
//! - [`render`]: Output rendering
//! - [`stream`]: Streamed response consumption

mod commands;
mod config;
mod render;
mod session;
mod stream;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{
    ChatArgs, ChatConfig, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, Settings, config_dir,
    resolve_api_key,
};
pub use render::{PlainTextRenderer, Renderer};
pub use session::{ChatSession, describe_error};
pub use stream::{STREAM_FAILURE_TEXT, stream_response};
