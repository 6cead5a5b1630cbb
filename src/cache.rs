use std::num::NonZeroUsize;

use lru::LruCache;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::engine::Ledger;

/// Caller-owned memo of replays, keyed by [`fingerprint`].
pub struct ReplayCache {
    entries: LruCache<String, Ledger>,
    hits: u64,
    misses: u64,
}

impl ReplayCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Cache sized by `config.cache_size`.
    pub fn for_config(config: &Config) -> Self {
        Self::new(NonZeroUsize::new(config.cache_size).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn get(&mut self, fingerprint: &str) -> Option<&Ledger> {
        let found = self.entries.get(fingerprint);
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    pub fn insert(&mut self, fingerprint: String, ledger: Ledger) {
        self.entries.put(fingerprint, ledger);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn hits(&self) -> u64 {
        self.hits
    }

    pub const fn misses(&self) -> u64 {
        self.misses
    }
}

/// SHA-256 over the serialised config followed by the raw log. Only settings
/// that change decisions are serialised.
pub fn fingerprint(input: &str, config: &Config) -> String {
    let mut hasher = Sha256::new();
    // every map in Config is keyed by String, so encoding cannot fail
    if let Ok(encoded) = serde_json::to_vec(config) {
        hasher.update(&encoded);
    }
    hasher.update([0u8]);
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
