//! Testing utilities and mock implementations
//!
//! Lets the operations and tools run against an in-process broker instead of
//! a live MQTT server.

pub mod mocks;

pub use mocks::*;
