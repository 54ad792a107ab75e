//! Device identity types
//!
//! A robot announces itself with a hostname of the form `Roomba-<blid>` or
//! `iRobot-<blid>`; the blid is the stable unique identifier used for
//! discovery dedup and as the MQTT username.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use crate::{VaclinkError, VaclinkResult};

/// One discovered robot on the local network.
///
/// Built from a single discovery reply and immutable afterwards. Equality
/// and hashing use the blid only, so a collection of descriptors dedupes
/// per physical robot regardless of which address answered.
#[derive(Clone, Debug)]
pub struct DeviceDescriptor {
    /// Announced hostname, `<model>-<blid>`.
    pub hostname: String,
    /// Stable device identifier extracted from the hostname.
    pub blid: String,
    /// Address the robot reports for itself.
    pub ip: IpAddr,
    pub mac: String,
    /// Firmware revision string.
    pub firmware: String,
    pub robot_name: String,
    pub sku: String,
    /// Advertised capability flags.
    pub capabilities: BTreeMap<String, i64>,
    /// Raw announcement payload as received.
    pub raw: Vec<u8>,
}

impl PartialEq for DeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.blid == other.blid
    }
}

impl Eq for DeviceDescriptor {}

impl Hash for DeviceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.blid.hash(state);
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.hostname, self.ip)
    }
}

/// Extract the blid from an announced hostname.
///
/// Accepts the two model prefixes the firmware family uses; anything else
/// is a malformed (or foreign) announcement.
pub fn blid_from_hostname(hostname: &str) -> VaclinkResult<String> {
    let Some((model, blid)) = hostname.split_once('-') else {
        return Err(VaclinkError::MalformedReply(format!(
            "hostname without a dash: {hostname:?}"
        )));
    };
    if blid.is_empty() {
        return Err(VaclinkError::MalformedReply(format!(
            "hostname with empty blid: {hostname:?}"
        )));
    }
    let model = model.to_ascii_lowercase();
    if model != "roomba" && model != "irobot" {
        return Err(VaclinkError::MalformedReply(format!(
            "unsupported model in hostname: {hostname:?}"
        )));
    }
    Ok(blid.to_string())
}

/// Per-device secret paired with its identifier.
///
/// Created once per successful handshake and owned by the caller; the core
/// never writes it to disk.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Device identifier, doubles as the MQTT username.
    pub blid: String,
    /// Secret obtained from the pairing handshake.
    pub secret: String,
}

impl fmt::Debug for Credential {
    // Keep the secret out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("blid", &self.blid)
            .field("secret", &"<redacted>")
            .finish()
    }
}
