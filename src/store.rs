//! Conversation persistence.
//!
//! Each conversation is a single JSON file named `{id}.json` under the store
//! directory, holding the ordered message array. Writes go through a temp
//! file and rename so an interrupted save never truncates an existing
//! transcript.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Error, Result};
use crate::observability::{STORE_MALFORMED, STORE_SAVES};
use crate::types::Message;

/// Maximum title length derived from a conversation's first user message.
const TITLE_MAX_CHARS: usize = 50;

/// What a conversation looks like in a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    /// The conversation identifier (the file stem).
    pub id: String,
    /// Human-readable title derived from the first user message.
    pub title: String,
    /// Total number of messages in the transcript.
    pub message_count: usize,
    /// When the transcript file was last written.
    pub last_modified: SystemTime,
}

/// The outcome of scanning the store directory.
#[derive(Debug, Default)]
pub struct ConversationListing {
    /// Readable conversations, most recently modified first.
    pub summaries: Vec<ConversationSummary>,
    /// Identifiers of files that exist but could not be parsed.
    pub malformed: Vec<String>,
}

/// A directory of conversation transcripts.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    /// Creates a store rooted at `dir`. The directory is created lazily on
    /// first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ConversationStore { dir: dir.into() }
    }

    /// The directory this store reads and writes.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn transcript_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Loads a conversation's messages.
    ///
    /// A missing transcript is an empty conversation, not an error. A file
    /// that exists but cannot be parsed is reported as a serialization
    /// error so the caller can decide how loudly to complain.
    pub fn load(&self, id: &str) -> Result<Vec<Message>> {
        let path = self.transcript_path(id);
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(format!("failed to read {}", path.display()), e)),
        };
        serde_json::from_str(&body).map_err(|e| {
            STORE_MALFORMED.click();
            Error::serialization(
                format!("conversation {id} is malformed: {e}"),
                Some(Box::new(e)),
            )
        })
    }

    /// Saves a conversation's messages, replacing the whole transcript.
    pub fn save(&self, id: &str, messages: &[Message]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::io("failed to create conversation directory", e))?;
        let path = self.transcript_path(id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(messages)?;
        fs::write(&tmp, body)
            .map_err(|e| Error::io(format!("failed to write {}", tmp.display()), e))?;
        fs::rename(&tmp, &path)
            .map_err(|e| Error::io(format!("failed to commit {}", path.display()), e))?;
        STORE_SAVES.click();
        Ok(())
    }

    /// Scans the store directory and summarizes every conversation.
    ///
    /// Unparseable files are collected in `malformed` rather than aborting
    /// the listing.
    pub fn list(&self) -> Result<ConversationListing> {
        let mut listing = ConversationListing::default();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(listing),
            Err(e) => return Err(Error::io("failed to scan conversation directory", e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| Error::io("failed to scan conversation entry", e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            match self.summarize(&id, &path) {
                Some(summary) => listing.summaries.push(summary),
                None => {
                    STORE_MALFORMED.click();
                    listing.malformed.push(id);
                }
            }
        }
        listing
            .summaries
            .sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(listing)
    }

    /// Returns the id of the most recently modified conversation, if any.
    pub fn latest_id(&self) -> Result<Option<String>> {
        let listing = self.list()?;
        Ok(listing.summaries.into_iter().next().map(|s| s.id))
    }

    fn summarize(&self, id: &str, path: &Path) -> Option<ConversationSummary> {
        let metadata = fs::metadata(path).ok()?;
        let last_modified = metadata.modified().ok()?;
        let body = fs::read_to_string(path).ok()?;
        let messages: Vec<Message> = serde_json::from_str(&body).ok()?;
        Some(ConversationSummary {
            id: id.to_string(),
            title: title_of(&messages),
            message_count: messages.len(),
            last_modified,
        })
    }
}

/// Derives a listing title from the first user message, truncated to a
/// character boundary.
pub fn title_of(messages: &[Message]) -> String {
    let Some(first) = messages
        .iter()
        .find(|m| m.role == crate::types::MessageRole::User)
    else {
        return "Untitled conversation".to_string();
    };
    let content = first.content.trim();
    if content.is_empty() {
        return "Untitled conversation".to_string();
    }
    let mut title: String = content.chars().take(TITLE_MAX_CHARS).collect();
    if content.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn store() -> (tempfile::TempDir, ConversationStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn missing_conversation_loads_empty() {
        let (_dir, store) = store();
        assert!(store.load("nope").unwrap().is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_dir, store) = store();
        let messages = vec![Message::user("2+2?"), Message::assistant("4")];
        store.save("t1", &messages).unwrap();
        assert_eq!(store.load("t1").unwrap(), messages);
    }

    #[test]
    fn corrupt_transcript_is_a_serialization_error() {
        let (dir, store) = store();
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join("bad.json"), b"{ nope").unwrap();
        let err = store.load("bad").unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn list_orders_by_recency_and_reports_malformed() {
        let (dir, store) = store();
        store.save("old", &[Message::user("first")]).unwrap();
        // Push the second save measurably later than the first.
        let earlier = SystemTime::now() - std::time::Duration::from_secs(60);
        let file = fs::File::options()
            .write(true)
            .open(dir.path().join("old.json"))
            .unwrap();
        file.set_modified(earlier).unwrap();
        store.save("new", &[Message::user("second")]).unwrap();
        fs::write(dir.path().join("junk.json"), b"not json").unwrap();

        let listing = store.list().unwrap();
        let ids: Vec<&str> = listing.summaries.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(listing.malformed, vec!["junk".to_string()]);
        assert_eq!(store.latest_id().unwrap(), Some("new".to_string()));
    }

    #[test]
    fn list_of_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path().join("never-created"));
        let listing = store.list().unwrap();
        assert!(listing.summaries.is_empty());
        assert!(listing.malformed.is_empty());
    }

    #[test]
    fn titles_come_from_the_first_user_message() {
        assert_eq!(title_of(&[]), "Untitled conversation");
        assert_eq!(
            title_of(&[Message::assistant("hello")]),
            "Untitled conversation"
        );
        assert_eq!(title_of(&[Message::user("short prompt")]), "short prompt");
    }

    #[test]
    fn long_titles_truncate_on_a_character_boundary() {
        let long = "å".repeat(60);
        let title = title_of(&[Message::user(&long)]);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn interrupted_saves_never_truncate_existing_transcripts() {
        let (dir, store) = store();
        store.save("t1", &[Message::user("keep me")]).unwrap();
        // Only the temp file path is ever written non-atomically; the
        // transcript itself appears via rename.
        let leftover = dir.path().join("t1.json.tmp");
        assert!(!leftover.exists());
        assert_eq!(store.load("t1").unwrap(), vec![Message::user("keep me")]);
    }
}
