/*!
 * Translation caching functionality.
 *
 * Successful translations are memoised for the lifetime of a run so that
 * repeated captions, credits and recurring sound effects are sent to a
 * provider only once.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::page::LanguagePair;

/// Cache key combining normalized source text and the language pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    source_text: String,
    source_language: String,
    target_language: String,
}

impl CacheKey {
    fn new(source_text: &str, languages: &LanguagePair) -> Self {
        Self {
            source_text: source_text.split_whitespace().collect::<Vec<_>>().join(" "),
            source_language: languages.source.to_lowercase(),
            target_language: languages.target.to_lowercase(),
        }
    }
}

/// Per-run translation cache, cheap to clone
#[derive(Debug, Clone)]
pub struct TranslationCache {
    entries: Arc<RwLock<HashMap<CacheKey, String>>>,
    hits: Arc<AtomicUsize>,
    misses: Arc<AtomicUsize>,
    enabled: bool,
}

impl TranslationCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            hits: Arc::new(AtomicUsize::new(0)),
            misses: Arc::new(AtomicUsize::new(0)),
            enabled,
        }
    }

    /// Get a translation from the cache
    pub fn get(&self, source_text: &str, languages: &LanguagePair) -> Option<String> {
        if !self.enabled {
            return None;
        }

        let key = CacheKey::new(source_text, languages);
        match self.entries.read().get(&key) {
            Some(translation) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for '{}'", truncate_text(source_text, 30));
                Some(translation.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a translation in the cache
    pub fn store(&self, source_text: &str, languages: &LanguagePair, translation: &str) {
        if !self.enabled {
            return;
        }
        let key = CacheKey::new(source_text, languages);
        self.entries.write().insert(key, translation.to_string());
    }

    /// Hits, misses and hit rate
    pub fn stats(&self) -> (usize, usize, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Truncate text to a maximum number of characters with ellipsis
fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    }
}
