//! UDP discovery service

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;

use vaclink_core::{DeviceDescriptor, VaclinkError, VaclinkResult};
use vaclink_wire::{decode_discovery_reply, encode_discovery_probe, DISCOVERY_PORT};

/// Discovery tuning knobs. Defaults follow the vendor firmware convention.
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// UDP port the robots answer on.
    pub port: u16,
    /// How many copies of the probe to broadcast.
    pub probe_count: usize,
    /// Reply datagram buffer size.
    pub recv_buffer: usize,
    /// Capacity of the descriptor channel.
    pub channel_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            port: DISCOVERY_PORT,
            probe_count: 5,
            recv_buffer: 1024,
            channel_capacity: 16,
        }
    }
}

/// Finite, non-restartable stream of discovered robots, one per blid.
///
/// Dropping the stream cancels the collector promptly; the socket goes
/// down with the task instead of waiting out the timeout.
pub struct DiscoveryStream {
    rx: mpsc::Receiver<DeviceDescriptor>,
}

impl DiscoveryStream {
    /// Next discovered robot, `None` once the timeout has elapsed.
    pub async fn next(&mut self) -> Option<DeviceDescriptor> {
        self.rx.recv().await
    }

    /// Drain the rest of the stream into a vector.
    pub async fn collect(mut self) -> Vec<DeviceDescriptor> {
        let mut found = Vec::new();
        while let Some(descriptor) = self.next().await {
            found.push(descriptor);
        }
        found
    }
}

/// Probe the local broadcast domain (or one known address) for robots.
///
/// Zero replies is a valid outcome: the robot may be offline or the
/// network may filter broadcast. Passing `target` shortcuts discovery on
/// such networks by probing the address directly.
pub async fn discover(timeout: Duration, target: Option<IpAddr>) -> VaclinkResult<DiscoveryStream> {
    discover_with(DiscoveryConfig::default(), timeout, target).await
}

/// `discover` with explicit tuning, for tests and unusual networks.
pub async fn discover_with(
    config: DiscoveryConfig,
    timeout: Duration,
    target: Option<IpAddr>,
) -> VaclinkResult<DiscoveryStream> {
    // Bind failure is fatal; everything past this point degrades per packet.
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| VaclinkError::Transport(format!("discovery bind failed: {e}")))?;
    socket
        .set_broadcast(true)
        .map_err(|e| VaclinkError::Transport(format!("broadcast flag failed: {e}")))?;

    let probe = encode_discovery_probe();
    match target {
        Some(ip) => {
            socket
                .send_to(probe, (ip, config.port))
                .await
                .map_err(|e| VaclinkError::Transport(format!("probe send failed: {e}")))?;
            tracing::debug!(%ip, port = config.port, "probe sent to target");
        }
        None => {
            for attempt in 0..config.probe_count {
                socket
                    .send_to(probe, (Ipv4Addr::BROADCAST, config.port))
                    .await
                    .map_err(|e| VaclinkError::Transport(format!("probe broadcast failed: {e}")))?;
                tracing::debug!(attempt, "probe broadcast");
            }
        }
    }

    let deadline = Instant::now() + timeout;
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    tokio::spawn(collect_replies(socket, config, target, deadline, tx));
    Ok(DiscoveryStream { rx })
}

async fn collect_replies(
    socket: UdpSocket,
    config: DiscoveryConfig,
    target: Option<IpAddr>,
    deadline: Instant,
    tx: mpsc::Sender<DeviceDescriptor>,
) {
    let mut buf = vec![0u8; config.recv_buffer];
    let mut seen: HashSet<String> = HashSet::new();
    loop {
        let received = tokio::select! {
            // Caller dropped the stream; exit now, taking the socket down,
            // instead of idling out the rest of the deadline.
            _ = tx.closed() => break,
            received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)) => received,
        };
        let (len, addr) = match received {
            Err(_) => break, // deadline reached; the sequence is complete
            Ok(Err(e)) => {
                tracing::warn!("discovery receive error: {e}");
                break;
            }
            Ok(Ok(received)) => received,
        };

        if let Some(ip) = target {
            if addr.ip() != ip {
                continue;
            }
        }

        // One bad packet must not abort discovery of the others.
        let descriptor = match decode_discovery_reply(&buf[..len]) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::debug!(%addr, "skipping discovery reply: {e}");
                continue;
            }
        };

        if !seen.insert(descriptor.blid.clone()) {
            // Same robot answering again, first arrival wins.
            continue;
        }
        tracing::debug!(blid = %descriptor.blid, %addr, "robot discovered");
        if tx.send(descriptor).await.is_err() {
            break; // caller dropped the stream
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaclink_wire::DISCOVERY_PROBE;

    fn reply(blid: &str, ip: &str) -> Vec<u8> {
        format!(
            r#"{{"hostname":"Roomba-{blid}","sw":"v2","ip":"{ip}","mac":"aa:bb","robotname":"r","sku":"s","cap":{{}}}}"#
        )
        .into_bytes()
    }

    /// Fake robot that answers every probe with a fixed burst of replies.
    async fn spawn_responder(replies: Vec<Vec<u8>>) -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            while let Ok((len, addr)) = socket.recv_from(&mut buf).await {
                if &buf[..len] != DISCOVERY_PROBE {
                    continue;
                }
                for reply in &replies {
                    let _ = socket.send_to(reply, addr).await;
                }
            }
        });
        port
    }

    fn target() -> Option<IpAddr> {
        Some("127.0.0.1".parse().unwrap())
    }

    #[tokio::test]
    async fn test_zero_timeout_yields_empty_without_blocking() {
        let config = DiscoveryConfig {
            port: 50505, // nobody listening; the probe just goes nowhere
            ..DiscoveryConfig::default()
        };
        let mut stream = discover_with(config, Duration::ZERO, target()).await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_discovers_local_responder() {
        let port = spawn_responder(vec![reply("BLID42", "192.168.0.9")]).await;
        let config = DiscoveryConfig {
            port,
            ..DiscoveryConfig::default()
        };
        let found = discover_with(config, Duration::from_millis(300), target())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].blid, "BLID42");
        assert_eq!(found[0].firmware, "v2");
    }

    #[tokio::test]
    async fn test_duplicate_blid_suppressed_first_arrival_wins() {
        let port = spawn_responder(vec![
            reply("SAME", "192.168.0.9"),
            reply("SAME", "192.168.0.10"), // same robot, different claimed ip
            reply("OTHER", "192.168.0.11"),
        ])
        .await;
        let config = DiscoveryConfig {
            port,
            ..DiscoveryConfig::default()
        };
        let found = discover_with(config, Duration::from_millis(300), target())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].blid, "SAME");
        assert_eq!(found[0].ip, "192.168.0.9".parse::<IpAddr>().unwrap());
        assert_eq!(found[1].blid, "OTHER");
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_collector_promptly() {
        // No traffic at all: the only wakeup is the receiver going away.
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        let deadline = Instant::now() + Duration::from_secs(10);
        let task = tokio::spawn(collect_replies(
            socket,
            DiscoveryConfig::default(),
            None,
            deadline,
            tx,
        ));

        drop(rx);
        tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .expect("collector kept running after the stream was dropped")
            .unwrap();
    }

    #[tokio::test]
    async fn test_malformed_replies_are_skipped_not_fatal() {
        let port = spawn_responder(vec![
            b"\x0f\x00\xff\xf0garbage".to_vec(),
            DISCOVERY_PROBE.to_vec(), // our own probe bounced back
            reply("GOOD", "192.168.0.9"),
        ])
        .await;
        let config = DiscoveryConfig {
            port,
            ..DiscoveryConfig::default()
        };
        let found = discover_with(config, Duration::from_millis(300), target())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].blid, "GOOD");
    }
}
