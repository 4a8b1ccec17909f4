//! Core data types for the Anthropic Messages API.
//!
//! This module defines the message and model types shared by the transport
//! client, the conversation store, and the chat session, plus the wire types
//! for batch and streaming responses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// A message authored by the user.
    User,
    /// A message authored by the assistant.
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a conversation.
///
/// An ordered sequence of messages forms a conversation transcript. Append
/// order is the only meaningful order; consecutive same-role entries are
/// tolerated (a failed turn can leave a trailing user message).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored the message.
    pub role: MessageRole,
    /// The message text.
    pub content: String,
}

impl Message {
    /// Creates a user-authored message.
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Creates an assistant-authored message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Known Anthropic model versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownModel {
    /// Claude 3.7 Sonnet (2025-02-19 version).
    Claude37Sonnet20250219,

    /// Claude 3.5 Sonnet (2024-06-20 version).
    Claude35Sonnet20240620,

    /// Claude 3 Opus (2024-02-29 version).
    Claude3Opus20240229,

    /// Claude 3.5 Haiku (2024-10-22 version).
    Claude35Haiku20241022,
}

impl KnownModel {
    /// All known models with a one-line description, best first.
    pub fn catalog() -> &'static [(KnownModel, &'static str)] {
        &[
            (
                KnownModel::Claude37Sonnet20250219,
                "Best balance of capability and speed",
            ),
            (
                KnownModel::Claude35Sonnet20240620,
                "Earlier Claude 3.5 Sonnet release",
            ),
            (
                KnownModel::Claude3Opus20240229,
                "Most capable for complex tasks",
            ),
            (
                KnownModel::Claude35Haiku20241022,
                "Fastest for simple tasks",
            ),
        ]
    }
}

impl fmt::Display for KnownModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnownModel::Claude37Sonnet20250219 => write!(f, "claude-3-7-sonnet-20250219"),
            KnownModel::Claude35Sonnet20240620 => write!(f, "claude-3-5-sonnet-20240620"),
            KnownModel::Claude3Opus20240229 => write!(f, "claude-3-opus-20240229"),
            KnownModel::Claude35Haiku20241022 => write!(f, "claude-3-5-haiku-20241022"),
        }
    }
}

/// An Anthropic model identifier.
///
/// Either a predefined model version or a custom string for models added
/// after this crate shipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Model {
    /// A known model version.
    Known(KnownModel),
    /// A custom model identifier.
    Custom(String),
}

impl Default for Model {
    fn default() -> Self {
        Model::Known(KnownModel::Claude37Sonnet20250219)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::Known(known) => write!(f, "{known}"),
            Model::Custom(custom) => write!(f, "{custom}"),
        }
    }
}

impl FromStr for Model {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for (known, _) in KnownModel::catalog() {
            if known.to_string() == s {
                return Ok(Model::Known(*known));
            }
        }
        Ok(Model::Custom(s.to_string()))
    }
}

impl From<Model> for String {
    fn from(model: Model) -> String {
        model.to_string()
    }
}

impl From<String> for Model {
    fn from(s: String) -> Model {
        s.parse().expect("Model parsing is infallible")
    }
}

/// Parameters for one Messages API request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// The model to query.
    pub model: Model,
    /// The full ordered conversation so far.
    pub messages: Vec<Message>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature in [0, 1].
    pub temperature: f32,
    /// Whether the response should be streamed.
    pub stream: bool,
}

impl ChatRequest {
    /// Creates a non-streaming request.
    pub fn new(model: Model, messages: Vec<Message>, max_tokens: u32, temperature: f32) -> Self {
        ChatRequest {
            model,
            messages,
            max_tokens,
            temperature,
            stream: false,
        }
    }

    /// Sets the stream flag.
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Returns the content of the most recent user-authored message, if any.
    ///
    /// This is the cache subject: requests without a user message are never
    /// cached.
    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }
}

/// One content block of a batch response body.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    /// Block type tag (only "text" blocks carry text).
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// The block text, when present.
    #[serde(default)]
    pub text: Option<String>,
}

/// A complete (non-streaming) response body from the Messages API.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    /// The ordered content blocks of the reply.
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

impl ChatResponse {
    /// Concatenates the text of all text blocks into the reply string.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let Some(text) = &block.text {
                out.push_str(text);
            }
        }
        out
    }
}

/// Nested delta payload of an incremental event.
#[derive(Debug, Clone, Deserialize)]
pub struct TextDelta {
    /// Incremental text, when the delta carries any.
    #[serde(default)]
    pub text: Option<String>,
}

/// One incremental unit of a streaming response.
///
/// The provider feed is heterogeneous: four distinct shapes can carry text.
/// The variants are tried in declaration order, which is the extraction
/// priority; anything unrecognized lands in [`StreamEvent::Other`] and
/// yields no text rather than an error.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    /// A tagged Messages API event; text only when the tag is
    /// `content_block_delta`.
    Tagged {
        /// The event type tag.
        #[serde(rename = "type")]
        kind: String,
        /// The nested delta, when present.
        #[serde(default)]
        delta: Option<TextDelta>,
    },

    /// Legacy flat completion payload from the Completions API.
    Completion {
        /// The completion text fragment.
        completion: String,
    },

    /// A nested delta without a type tag.
    Delta {
        /// The nested delta.
        delta: TextDelta,
    },

    /// A flat content payload.
    Content {
        /// The content text fragment.
        content: String,
    },

    /// Any other event shape; carries no text.
    Other(serde_json::Value),
}

impl StreamEvent {
    /// Extracts the text fragment of this event, if it carries one.
    ///
    /// This is the single normalization step over all known wire shapes.
    /// Empty fragments are treated as absent.
    pub fn text(&self) -> Option<&str> {
        let text = match self {
            StreamEvent::Tagged { kind, delta } if kind == "content_block_delta" => {
                delta.as_ref().and_then(|d| d.text.as_deref())
            }
            StreamEvent::Tagged { .. } => None,
            StreamEvent::Completion { completion } => Some(completion.as_str()),
            StreamEvent::Delta { delta } => delta.text.as_deref(),
            StreamEvent::Content { content } => Some(content.as_str()),
            StreamEvent::Other(_) => None,
        };
        text.filter(|t| !t.is_empty())
    }

    /// A short name for the decoded shape, for diagnostics.
    pub fn shape(&self) -> &'static str {
        match self {
            StreamEvent::Tagged { .. } => "tagged",
            StreamEvent::Completion { .. } => "completion",
            StreamEvent::Delta { .. } => "delta",
            StreamEvent::Content { .. } => "content",
            StreamEvent::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> StreamEvent {
        serde_json::from_str(json).expect("event should decode")
    }

    #[test]
    fn roles_serialize_lowercase() {
        let msg = Message::user("hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }

    #[test]
    fn model_round_trips_through_strings() {
        let model: Model = "claude-3-opus-20240229".parse().unwrap();
        assert_eq!(model, Model::Known(KnownModel::Claude3Opus20240229));
        assert_eq!(model.to_string(), "claude-3-opus-20240229");

        let custom: Model = "claude-99-mega".parse().unwrap();
        assert_eq!(custom, Model::Custom("claude-99-mega".to_string()));
    }

    #[test]
    fn model_serializes_as_plain_string() {
        let json = serde_json::to_string(&Model::default()).unwrap();
        assert_eq!(json, r#""claude-3-7-sonnet-20250219""#);
    }

    #[test]
    fn last_user_content_scans_from_the_end() {
        let req = ChatRequest::new(
            Model::default(),
            vec![
                Message::user("first"),
                Message::assistant("reply"),
                Message::user("second"),
            ],
            100,
            0.7,
        );
        assert_eq!(req.last_user_content(), Some("second"));

        let no_user = ChatRequest::new(
            Model::default(),
            vec![Message::assistant("only me")],
            100,
            0.7,
        );
        assert_eq!(no_user.last_user_content(), None);
    }

    #[test]
    fn batch_response_concatenates_text_blocks() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"Hello"},{"type":"text","text":", world"}]}"#,
        )
        .unwrap();
        assert_eq!(resp.text(), "Hello, world");
    }

    #[test]
    fn all_four_shapes_yield_text_in_priority_order() {
        let events = [
            event(r#"{"type":"content_block_delta","delta":{"text":"A"}}"#),
            event(r#"{"completion":"B"}"#),
            event(r#"{"delta":{"text":"C"}}"#),
            event(r#"{"content":"D"}"#),
        ];
        let accumulated: String = events.iter().filter_map(|e| e.text()).collect();
        assert_eq!(accumulated, "ABCD");
    }

    #[test]
    fn tagged_non_delta_events_yield_nothing() {
        let start = event(r#"{"type":"content_block_start","content_block":{"type":"text"}}"#);
        assert_eq!(start.text(), None);

        let stop = event(r#"{"type":"message_stop"}"#);
        assert_eq!(stop.text(), None);

        let meta = event(r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"}}"#);
        assert_eq!(meta.text(), None);
    }

    #[test]
    fn unknown_shapes_decode_without_error() {
        let odd = event(r#"{"usage":{"input_tokens":3}}"#);
        assert_eq!(odd.shape(), "other");
        assert_eq!(odd.text(), None);
    }

    #[test]
    fn empty_fragments_are_treated_as_absent() {
        assert_eq!(event(r#"{"completion":""}"#).text(), None);
        assert_eq!(event(r#"{"content":""}"#).text(), None);
    }
}
