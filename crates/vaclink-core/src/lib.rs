//! vaclink Core - Shared types and primitives
//!
//! This crate defines the types used throughout vaclink:
//! - Device identity (descriptors, credentials)
//! - Error taxonomy
//! - Event bus payloads
//! - Clock abstraction

pub mod descriptor;
pub mod error;
pub mod event;
pub mod time;

pub use descriptor::*;
pub use error::*;
pub use event::*;
pub use time::*;
