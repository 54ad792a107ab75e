//! Credential fetcher
//!
//! Opens a TLS session to the robot's handshake port, sends the magic
//! request, and accumulates the length-prefixed response. The robot only
//! answers after its HOME button is held until the pairing tones play, so
//! the timeout window is generous by design; the caller should prompt the
//! operator before calling in, and decide about retries itself — every
//! attempt re-arms the physical confirmation on the robot.

use std::net::IpAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;

use vaclink_core::{Credential, VaclinkError, VaclinkResult};
use vaclink_wire::{decode_handshake_response, encode_handshake_request, HANDSHAKE_PORT};

/// Handshake tuning knobs.
#[derive(Clone, Debug)]
pub struct PairConfig {
    /// TLS port of the pairing service.
    pub port: u16,
    /// Read chunk size.
    pub read_buffer: usize,
}

impl Default for PairConfig {
    fn default() -> Self {
        PairConfig {
            port: HANDSHAKE_PORT,
            read_buffer: 1024,
        }
    }
}

/// Fetch the robot's MQTT secret and pair it with the given blid.
///
/// `Timeout` means no complete response arrived in the window — usually
/// the operator didn't press the button, or pressed it too late. The
/// connection is closed on every exit path.
pub async fn fetch_credential(
    ip: IpAddr,
    blid: &str,
    timeout: Duration,
) -> VaclinkResult<Credential> {
    fetch_credential_with(PairConfig::default(), ip, blid, timeout).await
}

/// `fetch_credential` with explicit tuning.
pub async fn fetch_credential_with(
    config: PairConfig,
    ip: IpAddr,
    blid: &str,
    timeout: Duration,
) -> VaclinkResult<Credential> {
    let secret = tokio::time::timeout(timeout, exchange(config, ip))
        .await
        .map_err(|_| VaclinkError::Timeout)??;
    Ok(Credential {
        blid: blid.to_string(),
        secret,
    })
}

async fn exchange(config: PairConfig, ip: IpAddr) -> VaclinkResult<String> {
    let tcp = TcpStream::connect((ip, config.port))
        .await
        .map_err(|e| VaclinkError::Transport(format!("handshake connect failed: {e}")))?;
    tracing::debug!(%ip, port = config.port, "pairing connection open");

    let mut stream = vaclink_tls::connector()
        .connect(ServerName::IpAddress(ip.into()), tcp)
        .await
        .map_err(|e| VaclinkError::Transport(format!("tls handshake failed: {e}")))?;

    let result = read_secret(&mut stream, config.read_buffer).await;
    let _ = stream.shutdown().await;
    result
}

/// Send the request and accumulate response bytes until the codec reports
/// a complete secret or a fatal error.
///
/// Generic over the stream so the loop is testable against an in-memory
/// duplex pipe.
pub async fn read_secret<S>(stream: &mut S, read_buffer: usize) -> VaclinkResult<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(encode_handshake_request())
        .await
        .map_err(|e| VaclinkError::Transport(format!("handshake send failed: {e}")))?;

    let mut accumulated = BytesMut::with_capacity(read_buffer);
    let mut chunk = vec![0u8; read_buffer];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| VaclinkError::Transport(format!("handshake read failed: {e}")))?;
        if n == 0 {
            return Err(VaclinkError::Transport(
                "robot closed the stream mid-handshake".into(),
            ));
        }
        accumulated.extend_from_slice(&chunk[..n]);

        match decode_handshake_response(&accumulated) {
            Ok(secret) => {
                tracing::debug!(bytes = accumulated.len(), "handshake response complete");
                return Ok(secret);
            }
            Err(e) if e.is_incomplete() => continue,
            Err(e) => return Err(e),
        }
    }
}
