//! vaclink Pair - Fetch the robot's MQTT secret
//!
//! One TLS exchange against the robot's pairing port; the robot answers
//! only after the operator confirms with a button press.

pub mod fetcher;

pub use fetcher::*;
