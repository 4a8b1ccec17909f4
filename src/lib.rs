// Public modules
pub mod cache;
pub mod chat;
pub mod client;
pub mod error;
pub mod observability;
pub mod sse;
pub mod store;
pub mod types;

// Re-exports
pub use cache::ResponseCache;
pub use client::{Anthropic, Transport};
pub use error::{Error, Result};
pub use store::{ConversationListing, ConversationStore, ConversationSummary};
pub use types::*;
