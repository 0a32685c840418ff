//! Durable "last known value" store for every topic ever observed
//!
//! [`TopicCache`] is the only owner of topic state. Operations submit
//! [`Observation`]s through [`TopicCache::merge`] and read through
//! [`TopicCache::lookup`] and [`TopicCache::query`]. The whole map is written
//! as a single JSON [`CacheSnapshot`] that replaces the previous file
//! atomically.

pub mod entry;
pub mod store;

pub use entry::{
    decode_payload, CacheSnapshot, MergeOutcome, Observation, PayloadValue, QueryPage, TopicEntry,
    SNAPSHOT_VERSION,
};
pub use store::TopicCache;

use thiserror::Error;

/// Topic cache persistence errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache snapshot could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),
}
