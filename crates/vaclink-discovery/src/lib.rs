//! vaclink Discovery - Find robots on the local network
//!
//! Broadcasts the vendor probe datagram, collects replies until a deadline,
//! and yields one descriptor per distinct device identifier.

pub mod service;

pub use service::*;
