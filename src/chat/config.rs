//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg`, the settings file
//! under the parley config directory, and the resolved per-session
//! configuration. The API key is resolved in priority order: command line,
//! then the PARLEY_API_KEY environment variable, then the settings file.

use std::env;
use std::fs;
use std::path::PathBuf;

use arrrg_derive::CommandLine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Model;

/// Default maximum tokens per response.
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Environment variable that relocates the config directory.
pub const CONFIG_DIR_ENV: &str = "PARLEY_CONFIG_DIR";

/// Command-line arguments for the parley tool.
#[derive(CommandLine, Debug, Default, PartialEq)]
pub struct ChatArgs {
    /// Model to use.
    #[arrrg(optional, "Model to use (default: claude-3-7-sonnet-20250219)", "MODEL")]
    pub model: Option<String>,

    /// Maximum tokens per response.
    #[arrrg(optional, "Max tokens per response (default: 4000)", "TOKENS")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[arrrg(optional, "Sampling temperature in [0, 1] (default: 0.7)", "TEMP")]
    pub temperature: Option<f32>,

    /// Stream the response incrementally.
    #[arrrg(flag, "Stream the response as it is generated")]
    pub stream: bool,

    /// Stream and report event diagnostics.
    #[arrrg(flag, "Stream with per-event diagnostics")]
    pub debug: bool,

    /// Print the raw reply without rendering.
    #[arrrg(flag, "Print the reply without any rendering")]
    pub raw: bool,

    /// Force an interactive session.
    #[arrrg(flag, "Start an interactive session")]
    pub interactive: bool,

    /// Conversation to bind this run to.
    #[arrrg(optional, "Conversation id to continue", "ID")]
    pub conversation_id: Option<String>,

    /// Continue the most recent conversation.
    #[arrrg(flag, "Continue the most recently modified conversation")]
    pub continue_latest: bool,

    /// Files whose contents prefix the prompt.
    #[arrrg(optional, "Comma-separated files to include in the prompt", "FILES")]
    pub file: Option<String>,

    /// API key override.
    #[arrrg(optional, "API key (overrides PARLEY_API_KEY and settings)", "KEY")]
    pub api_key: Option<String>,

    /// Disable the response cache.
    #[arrrg(flag, "Do not read or write the response cache")]
    pub no_cache: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// List saved conversations and exit.
    #[arrrg(flag, "List saved conversations and exit")]
    pub list: bool,

    /// List available models and exit.
    #[arrrg(flag, "List available models and exit")]
    pub models: bool,

    /// Store an API key in the settings file and exit.
    #[arrrg(flag, "Prompt for an API key, store it, and exit")]
    pub setup: bool,

    /// Write the reply to a file as well as stdout.
    #[arrrg(optional, "Also write the reply to this file", "PATH")]
    pub output: Option<String>,
}

impl Eq for ChatArgs {}

/// Values persisted in `config.json` under the config directory.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Stored API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default model for new sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Default max tokens for new sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_max_tokens: Option<u32>,

    /// Default temperature for new sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_temperature: Option<f32>,
}

impl Settings {
    fn path(dir: &std::path::Path) -> PathBuf {
        dir.join("config.json")
    }

    /// Loads settings from `dir`. A missing file yields defaults; a file
    /// that exists but cannot be parsed is an error.
    pub fn load(dir: &std::path::Path) -> Result<Self> {
        let path = Self::path(dir);
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(e) => return Err(Error::io(format!("failed to read {}", path.display()), e)),
        };
        serde_json::from_str(&body).map_err(|e| {
            Error::serialization(
                format!("settings file {} is malformed: {e}", path.display()),
                Some(Box::new(e)),
            )
        })
    }

    /// Saves settings to `dir`, creating the directory if needed.
    pub fn save(&self, dir: &std::path::Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| Error::io("failed to create config directory", e))?;
        let path = Self::path(dir);
        let body = serde_json::to_string_pretty(self)?;
        fs::write(&path, body)
            .map_err(|e| Error::io(format!("failed to write {}", path.display()), e))
    }
}

/// The directory holding settings, cached responses, and conversations.
///
/// Defaults to `~/.parley`; PARLEY_CONFIG_DIR overrides it, which the tests
/// rely on.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = env::var(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    match directories::BaseDirs::new() {
        Some(base) => base.home_dir().join(".parley"),
        None => PathBuf::from(".parley"),
    }
}

/// Resolves the API key: explicit argument, then environment, then settings.
pub fn resolve_api_key(arg: Option<String>, settings: &Settings) -> Option<String> {
    arg.or_else(|| env::var(crate::client::API_KEY_ENV).ok())
        .or_else(|| settings.api_key.clone())
}

/// Configuration for a chat session.
///
/// This struct holds the resolved configuration values after layering
/// command-line arguments over the settings file and defaults.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// The model to use for generating responses.
    pub model: Model,

    /// Maximum tokens per response.
    pub max_tokens: u32,

    /// Sampling temperature.
    pub temperature: f32,

    /// Whether to stream replies.
    pub stream: bool,

    /// Whether to stream with per-event diagnostics.
    pub debug: bool,

    /// Whether to print replies without rendering.
    pub raw: bool,

    /// Whether an interactive session was requested explicitly.
    pub interactive: bool,

    /// The conversation this session is bound to, if any.
    pub conversation_id: Option<String>,

    /// Whether to bind to the most recent conversation.
    pub continue_latest: bool,

    /// Files whose contents prefix the prompt.
    pub files: Vec<PathBuf>,

    /// Whether the response cache participates in this session.
    pub use_cache: bool,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Optional file that also receives the reply.
    pub output: Option<PathBuf>,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    pub fn new() -> Self {
        Self {
            model: Model::default(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            stream: false,
            debug: false,
            raw: false,
            interactive: false,
            conversation_id: None,
            continue_latest: false,
            files: Vec::new(),
            use_cache: true,
            use_color: true,
            output: None,
        }
    }

    /// Resolves a config by layering `args` over `settings`.
    pub fn resolve(args: &ChatArgs, settings: &Settings) -> Self {
        let model = args
            .model
            .as_deref()
            .or(settings.default_model.as_deref())
            .map(|s| s.parse::<Model>().unwrap_or_else(|_| Model::Custom(s.to_string())))
            .unwrap_or_default();
        let files = args
            .file
            .as_deref()
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        ChatConfig {
            model,
            max_tokens: args
                .max_tokens
                .or(settings.default_max_tokens)
                .unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: args
                .temperature
                .or(settings.default_temperature)
                .unwrap_or(DEFAULT_TEMPERATURE),
            stream: args.stream,
            debug: args.debug,
            raw: args.raw,
            interactive: args.interactive,
            conversation_id: args.conversation_id.clone(),
            continue_latest: args.continue_latest,
            files,
            use_cache: !args.no_cache,
            use_color: !args.no_color,
            output: args.output.clone().map(PathBuf::from),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::types::KnownModel;

    use super::*;

    #[test]
    fn default_config() {
        let config = ChatConfig::new();
        assert_eq!(config.model, Model::default());
        assert_eq!(config.max_tokens, 4000);
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
        assert!(config.use_cache);
        assert!(config.use_color);
        assert!(!config.stream);
        assert!(config.conversation_id.is_none());
    }

    #[test]
    fn args_layer_over_settings() {
        let args = ChatArgs {
            max_tokens: Some(512),
            ..ChatArgs::default()
        };
        let settings = Settings {
            default_model: Some("claude-3-opus-20240229".to_string()),
            default_max_tokens: Some(8192),
            default_temperature: Some(0.2),
            ..Settings::default()
        };
        let config = ChatConfig::resolve(&args, &settings);
        assert_eq!(config.model, Model::Known(KnownModel::Claude3Opus20240229));
        assert_eq!(config.max_tokens, 512);
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn unknown_model_names_pass_through() {
        let args = ChatArgs {
            model: Some("claude-next".to_string()),
            ..ChatArgs::default()
        };
        let config = ChatConfig::resolve(&args, &Settings::default());
        assert_eq!(config.model, Model::Custom("claude-next".to_string()));
    }

    #[test]
    fn file_lists_split_on_commas() {
        let args = ChatArgs {
            file: Some("a.txt, b.md,,c.rs".to_string()),
            ..ChatArgs::default()
        };
        let config = ChatConfig::resolve(&args, &Settings::default());
        assert_eq!(
            config.files,
            vec![
                PathBuf::from("a.txt"),
                PathBuf::from("b.md"),
                PathBuf::from("c.rs"),
            ]
        );
    }

    #[test]
    fn settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            api_key: Some("sk-test".to_string()),
            default_model: None,
            default_max_tokens: Some(1024),
            default_temperature: None,
        };
        settings.save(dir.path()).unwrap();
        assert_eq!(Settings::load(dir.path()).unwrap(), settings);
    }

    #[test]
    fn missing_settings_load_as_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Settings::load(dir.path()).unwrap(), Settings::default());
    }

    #[test]
    fn malformed_settings_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), b"{ nope").unwrap();
        assert!(Settings::load(dir.path()).is_err());
    }

    #[test]
    fn explicit_key_wins_over_settings() {
        let settings = Settings {
            api_key: Some("sk-settings".to_string()),
            ..Settings::default()
        };
        assert_eq!(
            resolve_api_key(Some("sk-arg".to_string()), &settings),
            Some("sk-arg".to_string())
        );
    }
}
