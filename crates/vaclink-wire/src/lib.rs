//! vaclink Wire - Vendor protocol byte formats
//!
//! Pure, stateless codec functions for the two local protocols:
//! - UDP discovery probe and reply (two firmware epochs)
//! - TCP credential handshake (length-prefixed secret)

pub mod discovery;
pub mod handshake;

pub use discovery::*;
pub use handshake::*;
