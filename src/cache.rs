//! Content-addressed response cache.
//!
//! Responses are cached one file per request fingerprint under the cache
//! directory. The fingerprint is a pure function of `(model, prompt,
//! temperature)`, so identical requests across process runs hit the same
//! entry. An entry is valid while its file modification time is younger
//! than the TTL; expired, unreadable, or corrupt entries degrade to a miss
//! and are never surfaced as errors.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::observability::{CACHE_HITS, CACHE_MISSES};
use crate::types::Model;

/// Default entry lifetime: 24 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

/// A time-boxed, file-per-key store of previously obtained responses.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    ttl: Duration,
}

impl ResponseCache {
    /// Creates a cache rooted at `dir` with the default TTL.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_ttl(dir, DEFAULT_TTL)
    }

    /// Creates a cache rooted at `dir` with a custom TTL.
    pub fn with_ttl(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        ResponseCache {
            dir: dir.into(),
            ttl,
        }
    }

    /// Computes the deterministic cache key for a request.
    ///
    /// The prompt is hashed (SHA-256) so arbitrarily long prompts map to a
    /// fixed-size key; model and temperature are embedded verbatim.
    pub fn fingerprint(model: &Model, prompt: &str, temperature: f32) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        format!("{model}_{hex}_{temperature}")
    }

    /// Looks up a cached response.
    ///
    /// Returns `None` on absent, expired, unreadable, or corrupt entries.
    pub fn get(&self, model: &Model, prompt: &str, temperature: f32) -> Option<String> {
        let path = self.entry_path(model, prompt, temperature);
        match self.read_fresh(&path) {
            Some(response) => {
                CACHE_HITS.click();
                Some(response)
            }
            None => {
                CACHE_MISSES.click();
                None
            }
        }
    }

    /// Stores a response, overwriting any existing entry wholesale.
    ///
    /// The value is written to a temp file and renamed into place so a
    /// concurrent reader never observes a partial write.
    pub fn set(
        &self,
        model: &Model,
        prompt: &str,
        temperature: f32,
        response: &str,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::io("failed to create cache directory", e))?;
        let path = self.entry_path(model, prompt, temperature);
        let tmp = path.with_extension("tmp");
        let body = serde_json::to_string(response)?;
        fs::write(&tmp, body).map_err(|e| Error::io("failed to write cache entry", e))?;
        fs::rename(&tmp, &path).map_err(|e| Error::io("failed to commit cache entry", e))?;
        Ok(())
    }

    fn entry_path(&self, model: &Model, prompt: &str, temperature: f32) -> PathBuf {
        self.dir
            .join(Self::fingerprint(model, prompt, temperature))
    }

    fn read_fresh(&self, path: &Path) -> Option<String> {
        let metadata = fs::metadata(path).ok()?;
        let modified = metadata.modified().ok()?;
        let age = SystemTime::now().duration_since(modified).ok()?;
        if age >= self.ttl {
            return None;
        }
        let body = fs::read_to_string(path).ok()?;
        serde_json::from_str(&body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, ResponseCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        (dir, cache)
    }

    #[test]
    fn set_then_get_returns_stored_value() {
        let (_dir, cache) = cache();
        let model = Model::default();
        cache.set(&model, "2+2?", 0.5, "4").unwrap();
        assert_eq!(cache.get(&model, "2+2?", 0.5), Some("4".to_string()));
    }

    #[test]
    fn get_misses_on_absent_entry() {
        let (_dir, cache) = cache();
        assert_eq!(cache.get(&Model::default(), "never stored", 0.5), None);
    }

    #[test]
    fn expired_entries_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::with_ttl(dir.path(), Duration::ZERO);
        let model = Model::default();
        cache.set(&model, "2+2?", 0.5, "4").unwrap();
        assert_eq!(cache.get(&model, "2+2?", 0.5), None);
    }

    #[test]
    fn corrupt_entries_degrade_to_a_miss() {
        let (dir, cache) = cache();
        let model = Model::default();
        cache.set(&model, "2+2?", 0.5, "4").unwrap();
        let key = ResponseCache::fingerprint(&model, "2+2?", 0.5);
        fs::write(dir.path().join(key), b"{ not valid json").unwrap();
        assert_eq!(cache.get(&model, "2+2?", 0.5), None);
    }

    #[test]
    fn overwrite_replaces_the_value() {
        let (_dir, cache) = cache();
        let model = Model::default();
        cache.set(&model, "2+2?", 0.5, "4").unwrap();
        cache.set(&model, "2+2?", 0.5, "four").unwrap();
        assert_eq!(cache.get(&model, "2+2?", 0.5), Some("four".to_string()));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let model: Model = "m".parse().unwrap();
        let a = ResponseCache::fingerprint(&model, "hello", 0.5);
        let b = ResponseCache::fingerprint(&model, "hello", 0.5);
        assert_eq!(a, b);
        assert!(a.starts_with("m_"));
        assert!(a.ends_with("_0.5"));
    }

    #[test]
    fn fingerprint_varies_with_each_parameter() {
        let model: Model = "m".parse().unwrap();
        let other: Model = "n".parse().unwrap();
        let base = ResponseCache::fingerprint(&model, "hello", 0.5);
        assert_ne!(base, ResponseCache::fingerprint(&model, "hello", 0.6));
        assert_ne!(base, ResponseCache::fingerprint(&model, "goodbye", 0.5));
        assert_ne!(base, ResponseCache::fingerprint(&other, "hello", 0.5));
    }
}
