//! Command and preference envelopes
//!
//! The robot accepts commands as a small JSON envelope on its command
//! topic and preference deltas as `{"state": {...}}` documents on its
//! preference topic. There is no application-level acknowledgement for
//! either.

use serde::Serialize;
use serde_json::{Map, Value};

/// Initiator tag the firmware expects from a LAN client.
pub const COMMAND_INITIATOR: &str = "localApp";

/// Vendor command envelope published to the command topic.
#[derive(Clone, Debug, Serialize)]
pub struct CommandEnvelope {
    pub command: String,
    /// Unix timestamp, seconds.
    pub time: u64,
    pub initiator: &'static str,
    /// Extra command parameters, flattened alongside the fixed fields.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl CommandEnvelope {
    pub fn new(command: &str, time: u64) -> Self {
        CommandEnvelope {
            command: command.to_string(),
            time,
            initiator: COMMAND_INITIATOR,
            params: Map::new(),
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }
}

/// Preference delta for one settings key.
pub fn preference_payload(key: &str, value: Value) -> Value {
    serde_json::json!({ "state": { key: value } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_envelope_shape() {
        let envelope = CommandEnvelope::new("start", 1_700_000_000);
        let encoded = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            encoded,
            json!({"command": "start", "time": 1_700_000_000u64, "initiator": "localApp"})
        );
    }

    #[test]
    fn test_params_flatten_into_envelope() {
        let mut params = Map::new();
        params.insert("ordered".into(), json!(1));
        let envelope = CommandEnvelope::new("cleanRoom", 42).with_params(params);
        let encoded = serde_json::to_value(&envelope).unwrap();
        assert_eq!(encoded["ordered"], json!(1));
        assert_eq!(encoded["command"], json!("cleanRoom"));
    }

    #[test]
    fn test_preference_payload_shape() {
        assert_eq!(
            preference_payload("binPause", json!(false)),
            json!({"state": {"binPause": false}})
        );
    }
}
