//! vaclink Session - Connection manager and event bus
//!
//! Owns the TLS/MQTT session to one robot:
//! - Connect, authenticate, subscribe to the status wildcard
//! - Merge inbound deltas into the state tree
//! - Publish command and preference envelopes
//! - Reconnect with exponential backoff, preserving state
//! - Fan events out on a bounded broadcast bus

pub mod backoff;
pub mod command;
pub mod connection;

pub use backoff::*;
pub use command::*;
pub use connection::*;
