//! Semantic completion cache.
//!
//! Two-level lookup over prior `(prompt → completion)` pairs: an exact
//! level keyed by prompt hash, and a semantic level that runs a cosine
//! scan over stored embeddings and returns the best match at or above
//! the configured similarity threshold. Eviction is LRU on capacity and
//! TTL on age; concurrent requests for the same prompt hash coalesce
//! into a single outstanding generation ([`SingleFlight`]).
//!
//! ```rust
//! use quillcast_cache::{CacheConfig, SemanticCache};
//! use quillcast_prompt::prompt_hash;
//!
//! let cache = SemanticCache::new(CacheConfig::builder().capacity(100).build().unwrap());
//! let hash = prompt_hash("write a post about rust");
//!
//! assert!(cache.lookup_exact(&hash).is_none());
//! cache.insert(hash.clone(), vec![1.0, 0.0], "a post".to_string());
//! assert_eq!(cache.lookup_exact(&hash).as_deref(), Some("a post"));
//! ```

pub mod config;
pub mod events;
pub mod singleflight;
pub mod store;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use events::CacheEvent;
pub use singleflight::{Flight, FlightError, FlightGuard, SingleFlight};
pub use store::{SemanticCache, SemanticMatch};
