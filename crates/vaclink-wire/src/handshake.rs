//! Credential handshake codec
//!
//! The request is a fixed 7-byte magic sequence sent over the robot's TLS
//! service port; it flips the robot into password-broadcast mode once the
//! operator confirms with a button press. The response is the secret,
//! length-prefixed with two big-endian bytes and optionally preceded by an
//! echo of the magic header, depending on firmware epoch.

use vaclink_core::{VaclinkError, VaclinkResult};

/// TCP/TLS port for the handshake (shared with the MQTT broker).
pub const HANDSHAKE_PORT: u16 = 8883;

/// Magic sequence that asks the robot to broadcast its secret.
pub const HANDSHAKE_REQUEST: [u8; 7] = [0xf0, 0x05, 0xef, 0xcc, 0x3b, 0x29, 0x00];

/// Same magic with a status byte meaning the secret is cloud-only.
pub const HANDSHAKE_UNSUPPORTED: [u8; 7] = [0xf0, 0x05, 0xef, 0xcc, 0x3b, 0x29, 0x03];

const MAGIC_PREFIX: [u8; 6] = [0xf0, 0x05, 0xef, 0xcc, 0x3b, 0x29];
const HEADER_SIZE: usize = 7;
const LEN_FIELD_SIZE: usize = 2;

/// The fixed byte sequence that triggers password-broadcast mode.
pub fn encode_handshake_request() -> &'static [u8; 7] {
    &HANDSHAKE_REQUEST
}

/// Decode an accumulated handshake response into the secret.
///
/// Returns `Incomplete` while declared bytes are still outstanding — the
/// caller keeps reading and retries with the longer buffer. `ZeroLength`
/// means the robot answered before entering pairing mode.
pub fn decode_handshake_response(buf: &[u8]) -> VaclinkResult<String> {
    let body = strip_header(buf)?;
    if body.len() < LEN_FIELD_SIZE {
        return Err(VaclinkError::Incomplete {
            expected: LEN_FIELD_SIZE,
            actual: body.len(),
        });
    }

    let declared = u16::from_be_bytes([body[0], body[1]]) as usize;
    if declared == 0 {
        return Err(VaclinkError::ZeroLength);
    }

    let secret_bytes = &body[LEN_FIELD_SIZE..];
    if secret_bytes.len() < declared {
        return Err(VaclinkError::Incomplete {
            expected: declared,
            actual: secret_bytes.len(),
        });
    }

    let secret = std::str::from_utf8(&secret_bytes[..declared])
        .map_err(|_| VaclinkError::MalformedReply("secret is not valid UTF-8".into()))?;
    // Firmware pads short secrets with trailing NULs.
    Ok(secret.trim_end_matches('\0').to_string())
}

fn strip_header(buf: &[u8]) -> VaclinkResult<&[u8]> {
    let overlap = buf.len().min(MAGIC_PREFIX.len());
    if buf[..overlap] != MAGIC_PREFIX[..overlap] {
        // Header-stripped epoch: the length field starts immediately.
        return Ok(buf);
    }
    if buf.len() < HEADER_SIZE {
        // Could still grow into a full header.
        return Err(VaclinkError::Incomplete {
            expected: HEADER_SIZE,
            actual: buf.len(),
        });
    }
    if buf[..HEADER_SIZE] == HANDSHAKE_UNSUPPORTED {
        return Err(VaclinkError::UnsupportedEpoch(
            "robot only releases its secret via the vendor cloud".into(),
        ));
    }
    Ok(&buf[HEADER_SIZE..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_stripped_secret() {
        assert_eq!(
            decode_handshake_response(&[0x00, 0x02, b'a', b'b']).unwrap(),
            "ab"
        );
    }

    #[test]
    fn test_zero_length_secret() {
        assert!(matches!(
            decode_handshake_response(&[0x00, 0x00]),
            Err(VaclinkError::ZeroLength)
        ));
    }

    #[test]
    fn test_incomplete_until_declared_bytes_arrive() {
        // Declares 5 bytes, delivers 2.
        match decode_handshake_response(&[0x00, 0x05, b'a', b'b']) {
            Err(VaclinkError::Incomplete { expected, actual }) => {
                assert_eq!(expected, 5);
                assert_eq!(actual, 2);
            }
            other => panic!("expected Incomplete, got {other:?}"),
        }
        assert!(decode_handshake_response(&[]).unwrap_err().is_incomplete());
        assert!(decode_handshake_response(&[0x00]).unwrap_err().is_incomplete());
    }

    #[test]
    fn test_headered_secret() {
        let mut response = HANDSHAKE_REQUEST.to_vec();
        response.extend_from_slice(&[0x00, 0x04]);
        response.extend_from_slice(b"wxyz");
        assert_eq!(decode_handshake_response(&response).unwrap(), "wxyz");
    }

    #[test]
    fn test_partial_header_is_incomplete() {
        assert!(decode_handshake_response(&[0xf0, 0x05, 0xef])
            .unwrap_err()
            .is_incomplete());
    }

    #[test]
    fn test_cloud_only_magic() {
        assert!(matches!(
            decode_handshake_response(&HANDSHAKE_UNSUPPORTED),
            Err(VaclinkError::UnsupportedEpoch(_))
        ));
    }

    #[test]
    fn test_nul_padding_trimmed() {
        assert_eq!(
            decode_handshake_response(&[0x00, 0x04, b'o', b'k', 0x00, 0x00]).unwrap(),
            "ok"
        );
    }

    proptest! {
        /// Any secret framed by either epoch decodes back, and every proper
        /// prefix of the frame reads as incomplete rather than garbage.
        #[test]
        fn prop_framing_roundtrip(
            secret in "[ -~]{1,64}",
            with_header in any::<bool>(),
        ) {
            let mut frame = Vec::new();
            if with_header {
                frame.extend_from_slice(&HANDSHAKE_REQUEST);
            }
            frame.extend_from_slice(&(secret.len() as u16).to_be_bytes());
            frame.extend_from_slice(secret.as_bytes());

            prop_assert_eq!(decode_handshake_response(&frame).unwrap(), secret);

            for cut in 0..frame.len() {
                let err = decode_handshake_response(&frame[..cut]).unwrap_err();
                prop_assert!(err.is_incomplete(), "prefix of {} bytes: {:?}", cut, err);
            }
        }
    }
}
