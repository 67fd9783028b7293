//! The two-level cache index.

use std::num::NonZeroUsize;
use std::time::Instant;

use lru::LruCache;
use metrics::counter;
use parking_lot::RwLock;
use quillcast_prompt::PromptHash;

use crate::config::CacheConfig;
use crate::events::CacheEvent;

/// One cached `(prompt → completion)` pair.
#[derive(Debug, Clone)]
struct CacheEntry {
    embedding: Vec<f32>,
    completion: String,
    inserted_at: Instant,
    last_access: Instant,
    hits: u64,
}

impl CacheEntry {
    fn is_expired(&self, ttl: std::time::Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

/// A semantic-level match.
#[derive(Debug, Clone)]
pub struct SemanticMatch {
    pub hash: PromptHash,
    pub completion: String,
    pub similarity: f32,
}

/// Embedding-similarity cache with LRU/TTL eviction.
///
/// Readers scan the index under the read lock; every mutation (recency
/// bump, insert, sweep) takes the write lock briefly and never suspends
/// while holding it. Losing cache state is not a correctness issue, so
/// none of this is persisted.
pub struct SemanticCache {
    index: RwLock<LruCache<PromptHash, CacheEntry>>,
    config: CacheConfig,
}

impl SemanticCache {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            index: RwLock::new(LruCache::new(capacity)),
            config,
        }
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.config.similarity_threshold
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exact-level lookup. A hit bumps recency and the entry's hit
    /// count; an expired entry is dropped on the spot.
    pub fn lookup_exact(&self, hash: &PromptHash) -> Option<String> {
        let result = {
            let mut index = self.index.write();
            match index.get_mut(hash) {
                Some(entry) if !entry.is_expired(self.config.ttl) => {
                    entry.hits += 1;
                    entry.last_access = Instant::now();
                    Some(entry.completion.clone())
                }
                Some(_) => {
                    index.pop(hash);
                    None
                }
                None => None,
            }
        };

        match &result {
            Some(_) => {
                counter!("quillcast_cache_lookups_total", "result" => "exact_hit").increment(1);
                self.config.event_listeners.emit(&CacheEvent::ExactHit {
                    timestamp: Instant::now(),
                });
            }
            None => {
                counter!("quillcast_cache_lookups_total", "result" => "exact_miss").increment(1);
            }
        }
        result
    }

    /// Semantic-level lookup: the stored entry with the highest cosine
    /// similarity to `embedding`, if that similarity reaches the
    /// threshold. The scan runs under the read lock; the recency bump
    /// for a hit retakes the write lock.
    pub fn lookup_semantic(&self, embedding: &[f32]) -> Option<SemanticMatch> {
        let best = {
            let index = self.index.read();
            index
                .iter()
                .filter(|(_, entry)| !entry.is_expired(self.config.ttl))
                .map(|(hash, entry)| {
                    (hash.clone(), entry.completion.clone(), cosine(embedding, &entry.embedding))
                })
                .max_by(|a, b| a.2.total_cmp(&b.2))
        };

        match best {
            Some((hash, completion, similarity))
                if similarity >= self.config.similarity_threshold =>
            {
                {
                    let mut index = self.index.write();
                    if let Some(entry) = index.get_mut(&hash) {
                        entry.hits += 1;
                        entry.last_access = Instant::now();
                    }
                }
                counter!("quillcast_cache_lookups_total", "result" => "semantic_hit").increment(1);
                self.config.event_listeners.emit(&CacheEvent::SemanticHit {
                    similarity,
                    timestamp: Instant::now(),
                });
                Some(SemanticMatch {
                    hash,
                    completion,
                    similarity,
                })
            }
            _ => {
                counter!("quillcast_cache_lookups_total", "result" => "miss").increment(1);
                self.config.event_listeners.emit(&CacheEvent::Miss {
                    timestamp: Instant::now(),
                });
                None
            }
        }
    }

    /// Stores a completion. Capacity overflow evicts the least recently
    /// used entry.
    pub fn insert(&self, hash: PromptHash, embedding: Vec<f32>, completion: String) {
        let now = Instant::now();
        let evicted = {
            let mut index = self.index.write();
            let inserted = hash.clone();
            let displaced = index.push(
                hash,
                CacheEntry {
                    embedding,
                    completion,
                    inserted_at: now,
                    last_access: now,
                    hits: 0,
                },
            );
            matches!(&displaced, Some((key, _)) if *key != inserted)
        };
        self.config.event_listeners.emit(&CacheEvent::Inserted {
            evicted,
            timestamp: Instant::now(),
        });
    }

    /// Drops every expired entry. Called by the engine's sweeper task.
    pub fn sweep(&self) -> usize {
        let removed = {
            let mut index = self.index.write();
            let expired: Vec<PromptHash> = index
                .iter()
                .filter(|(_, entry)| entry.is_expired(self.config.ttl))
                .map(|(hash, _)| hash.clone())
                .collect();
            for hash in &expired {
                index.pop(hash);
            }
            expired.len()
        };
        if removed > 0 {
            tracing::debug!(removed, "cache sweep dropped expired entries");
        }
        self.config.event_listeners.emit(&CacheEvent::Swept {
            removed,
            timestamp: Instant::now(),
        });
        removed
    }

    /// Hit count of an entry. Test inspection.
    pub fn hits(&self, hash: &PromptHash) -> Option<u64> {
        self.index.read().peek(hash).map(|entry| entry.hits)
    }
}

/// Cosine similarity; zero for mismatched lengths or zero vectors.
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}
