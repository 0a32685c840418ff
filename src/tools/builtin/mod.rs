//! Builtin broker tools
//!
//! - `topics` - discover topics and page through the cache
//! - `value` - read current values, cache first
//! - `publish` - publish a batch of messages
//! - `record` - capture every matching message for a window

pub mod publish;
pub mod record;
pub mod topics;
pub mod value;

pub use publish::{PublishParams, PublishTool};
pub use record::{RecordParams, RecordTool};
pub use topics::{TopicsParams, TopicsTool};
pub use value::{ValueParams, ValueTool};
