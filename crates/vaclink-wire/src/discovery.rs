//! Discovery datagram codec
//!
//! The probe is a short ASCII magic token broadcast on a fixed UDP port.
//! Replies come in two firmware epochs: modern robots answer with a JSON
//! object, early firmware with newline-delimited `key:value` text. Both
//! are decoded behind one entry point; a reply matching neither shape is
//! an unsupported epoch, not a fatal error for the whole discovery run.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::Deserialize;

use vaclink_core::{blid_from_hostname, DeviceDescriptor, VaclinkError, VaclinkResult};

/// UDP port the robots listen on for probes (firmware convention).
pub const DISCOVERY_PORT: u16 = 5678;

/// Probe magic token.
pub const DISCOVERY_PROBE: &[u8] = b"irobotmcs";

/// Smallest datagram that could carry a descriptor.
pub const MIN_REPLY_SIZE: usize = 4;

/// The fixed broadcast payload that solicits replies.
pub fn encode_discovery_probe() -> &'static [u8] {
    DISCOVERY_PROBE
}

/// JSON-epoch announcement shape.
#[derive(Deserialize)]
struct JsonReply {
    hostname: String,
    ip: String,
    #[serde(default)]
    mac: String,
    #[serde(default)]
    sw: String,
    #[serde(default, rename = "robotname")]
    robot_name: String,
    #[serde(default)]
    sku: String,
    #[serde(default)]
    cap: Option<BTreeMap<String, Option<i64>>>,
}

/// Decode one discovery reply into a device descriptor.
///
/// `MalformedReply` covers truncated, non-UTF-8, or non-conforming input
/// (including an echo of our own probe, which routers sometimes reflect);
/// `UnsupportedEpoch` means the payload is readable but matches no known
/// schema version.
pub fn decode_discovery_reply(buf: &[u8]) -> VaclinkResult<DeviceDescriptor> {
    if buf.len() < MIN_REPLY_SIZE {
        return Err(VaclinkError::MalformedReply(format!(
            "reply too short: {} bytes",
            buf.len()
        )));
    }
    if buf == DISCOVERY_PROBE {
        return Err(VaclinkError::MalformedReply("own probe echoed back".into()));
    }
    let text = std::str::from_utf8(buf)
        .map_err(|_| VaclinkError::MalformedReply("reply is not valid UTF-8".into()))?;

    let trimmed = text.trim_start();
    if trimmed.starts_with('{') {
        decode_json_reply(trimmed, buf)
    } else if trimmed.contains(':') {
        decode_text_reply(trimmed, buf)
    } else {
        let preview: String = text.chars().take(32).collect();
        Err(VaclinkError::UnsupportedEpoch(format!(
            "unrecognized reply shape: {preview:?}"
        )))
    }
}

fn decode_json_reply(text: &str, raw: &[u8]) -> VaclinkResult<DeviceDescriptor> {
    let reply: JsonReply = serde_json::from_str(text)
        .map_err(|e| VaclinkError::MalformedReply(format!("bad json reply: {e}")))?;
    let blid = blid_from_hostname(&reply.hostname)?;
    let ip = parse_ip(&reply.ip)?;
    let capabilities = reply
        .cap
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect();
    Ok(DeviceDescriptor {
        hostname: reply.hostname,
        blid,
        ip,
        mac: reply.mac,
        firmware: reply.sw,
        robot_name: reply.robot_name,
        sku: reply.sku,
        capabilities,
        raw: raw.to_vec(),
    })
}

fn decode_text_reply(text: &str, raw: &[u8]) -> VaclinkResult<DeviceDescriptor> {
    let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(VaclinkError::MalformedReply(format!(
                "reply line without separator: {line:?}"
            )));
        };
        fields.insert(key.trim(), value.trim());
    }

    let hostname = *fields
        .get("hostname")
        .ok_or_else(|| VaclinkError::MalformedReply("reply missing hostname".into()))?;
    let ip_text = *fields
        .get("ip")
        .ok_or_else(|| VaclinkError::MalformedReply("reply missing ip".into()))?;
    let blid = blid_from_hostname(hostname)?;
    let ip = parse_ip(ip_text)?;

    let field = |key: &str| fields.get(key).copied().unwrap_or_default().to_string();
    Ok(DeviceDescriptor {
        hostname: hostname.to_string(),
        blid,
        ip,
        mac: field("mac"),
        firmware: field("sw"),
        robot_name: field("robotname"),
        sku: field("sku"),
        capabilities: BTreeMap::new(),
        raw: raw.to_vec(),
    })
}

fn parse_ip(text: &str) -> VaclinkResult<IpAddr> {
    text.parse()
        .map_err(|_| VaclinkError::MalformedReply(format!("bad ip in reply: {text:?}")))
}
