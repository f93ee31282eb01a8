//! Operation result caching for schemaforge
//!
//! This crate caches the results of running the schema compiler so repeated
//! builds with unchanged inputs skip re-execution entirely:
//! - Deterministic cache keys over project, operation, input-file content,
//!   configuration, tool version and environment
//! - One JSON entry file per key, written atomically, integrity-hashed
//! - Per-operation TTLs with overrides, gzip compression for large results
//! - Size-bounded eviction (oldest-modified first) after every store
//!
//! # Miss-on-failure contract
//!
//! The read path (`get`, `is_valid`) never raises. A missing file, truncated
//! JSON, tampered integrity digest, lapsed TTL or undecodable payload all
//! degrade to a miss: the cache can make builds faster, never break them.
//!
//! # Layout
//!
//! Entries share the toolchain's cache root:
//!
//! ```text
//! <cache-root>/
//!   metadata.json         # toolchain install manifest (not ours)
//!   <version>/            # toolchain installs (not ours)
//!   <cache-key>.json      # one file per result entry
//! ```
//!
//! Entry enumeration skips everything that is not a `<key>.json` file.

mod error;
pub mod entry;
pub mod key;
pub mod store;

pub use error::{Error, Result};

pub use entry::{CacheEntry, CacheMetadata};
pub use key::{KeyEnvelope, KeyInputs, derive_key};
pub use store::{CacheConfig, CacheStats, ResultCache, ValidityOptions, default_ttl};
