//! Topic rules and result message types
//!
//! `topics` holds the MQTT naming and matching rules shared by the transport,
//! the cache and the operations; `messages` holds the serde types the tools return.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
