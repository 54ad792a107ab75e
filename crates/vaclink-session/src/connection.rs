//! Connection manager
//!
//! Owns the TLS/MQTT session to a single robot. Network I/O runs on a
//! dedicated background task so inbound dispatch and reconnection never
//! block the caller; the caller talks to the session through the cloned
//! client handle, the state tree, and the event bus.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, Event as MqttEvent, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration,
    Transport,
};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use vaclink_core::{Clock, Credential, Event, SystemClock, VaclinkError, VaclinkResult};
use vaclink_state::StateTree;

use crate::backoff::Backoff;
use crate::command::{preference_payload, CommandEnvelope};

/// TLS port of the on-device broker (firmware convention).
pub const MQTT_PORT: u16 = 8883;

/// Session lifecycle, observable through [`Connection::lifecycle`].
///
/// `Closed` is terminal and only reached by an explicit [`Connection::close`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Disconnected,
    Connecting,
    Subscribing,
    Active,
    Reconnecting,
    Closed,
}

/// Session tuning knobs. Defaults follow the vendor firmware convention.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub port: u16,
    /// Wildcard under the robot's status root.
    pub status_topic: String,
    pub command_topic: String,
    pub preference_topic: String,
    pub keep_alive: Duration,
    /// Event bus capacity per subscriber; a laggard loses oldest events.
    pub event_capacity: usize,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            port: MQTT_PORT,
            status_topic: "#".into(),
            command_topic: "cmd".into(),
            preference_topic: "delta".into(),
            keep_alive: Duration::from_secs(30),
            event_capacity: 64,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }
}

struct Shared {
    blid: String,
    state: StateTree,
    events: broadcast::Sender<Event>,
    lifecycle: watch::Sender<Lifecycle>,
    closed: watch::Sender<bool>,
}

impl Shared {
    fn new(blid: String, event_capacity: usize) -> Arc<Shared> {
        let (lifecycle, _) = watch::channel(Lifecycle::Disconnected);
        let (closed, _) = watch::channel(false);
        let (events, _) = broadcast::channel(event_capacity);
        Arc::new(Shared {
            blid,
            state: StateTree::new(),
            events,
            lifecycle,
            closed,
        })
    }
}

/// Live session to one robot.
///
/// The state tree is created fresh per `connect` and preserved across
/// transparent reconnects; it is discarded with the connection.
pub struct Connection {
    shared: Arc<Shared>,
    client: AsyncClient,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Open a session: TLS + broker handshake, authenticate with the
    /// credential, subscribe to the status wildcard.
    ///
    /// Suspends until the subscription is acknowledged; a failure of this
    /// first attempt is returned to the caller instead of retried.
    pub async fn connect(
        ip: IpAddr,
        credential: &Credential,
        config: SessionConfig,
    ) -> VaclinkResult<Connection> {
        Self::connect_with_clock(ip, credential, config, Arc::new(SystemClock)).await
    }

    /// `connect` with an injected clock for command timestamps.
    pub async fn connect_with_clock(
        ip: IpAddr,
        credential: &Credential,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> VaclinkResult<Connection> {
        let mut options = MqttOptions::new(credential.blid.clone(), ip.to_string(), config.port);
        options.set_credentials(credential.blid.clone(), credential.secret.clone());
        options.set_keep_alive(config.keep_alive);
        options.set_transport(Transport::Tls(TlsConfiguration::Rustls(
            vaclink_tls::client_config(),
        )));

        let (client, event_loop) = AsyncClient::new(options, 16);

        // send_replace rather than send: the transitions must land even
        // while nobody holds a lifecycle receiver.
        let shared = Shared::new(credential.blid.clone(), config.event_capacity);
        shared.lifecycle.send_replace(Lifecycle::Connecting);

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(run_loop(
            Arc::clone(&shared),
            client.clone(),
            event_loop,
            config.clone(),
            ready_tx,
        ));

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                task.abort();
                return Err(e);
            }
            Err(_) => {
                return Err(VaclinkError::Transport(
                    "session task exited before connecting".into(),
                ));
            }
        }

        Ok(Connection {
            shared,
            client,
            config,
            clock,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn blid(&self) -> &str {
        &self.shared.blid
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        *self.shared.lifecycle.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.shared.lifecycle.subscribe()
    }

    /// Subscribe to session events. The channel is bounded; a receiver
    /// that falls behind sees a lag error and resumes with newer events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    /// Last-known-good state snapshot; callable from any thread.
    pub fn snapshot(&self) -> VaclinkResult<Value> {
        self.ensure_open()?;
        Ok(self.shared.state.snapshot())
    }

    /// Publish a command envelope to the robot's command topic.
    ///
    /// Success means the broker accepted the bytes; the robot gives no
    /// application-level acknowledgement.
    pub async fn publish(&self, command: &str) -> VaclinkResult<()> {
        self.publish_with_params(command, Map::new()).await
    }

    /// `publish` with extra envelope parameters.
    pub async fn publish_with_params(
        &self,
        command: &str,
        params: Map<String, Value>,
    ) -> VaclinkResult<()> {
        self.ensure_open()?;
        let envelope = CommandEnvelope::new(command, self.clock.now_unix()).with_params(params);
        let payload = serde_json::to_vec(&envelope)
            .map_err(|e| VaclinkError::Transport(format!("command encode failed: {e}")))?;
        tracing::debug!(command, "publishing command");
        self.client
            .publish(self.config.command_topic.clone(), QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| VaclinkError::Transport(format!("command publish failed: {e}")))
    }

    /// Push one preference key into the robot's settings document.
    pub async fn set_preference(&self, key: &str, value: Value) -> VaclinkResult<()> {
        self.ensure_open()?;
        let payload = serde_json::to_vec(&preference_payload(key, value))
            .map_err(|e| VaclinkError::Transport(format!("preference encode failed: {e}")))?;
        tracing::debug!(key, "publishing preference");
        self.client
            .publish(
                self.config.preference_topic.clone(),
                QoS::AtMostOnce,
                false,
                payload,
            )
            .await
            .map_err(|e| VaclinkError::Transport(format!("preference publish failed: {e}")))
    }

    /// Shut the session down: unsubscribe, disconnect, stop the task.
    ///
    /// Safe to call more than once and concurrently with an in-flight
    /// reconnect attempt — the attempt observes the closed flag and aborts.
    pub async fn close(&self) -> VaclinkResult<()> {
        if *self.shared.closed.borrow() {
            return Ok(());
        }
        self.shared.closed.send_replace(true);
        let _ = self
            .client
            .unsubscribe(self.config.status_topic.clone())
            .await;
        let _ = self.client.disconnect().await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        Ok(())
    }

    fn ensure_open(&self) -> VaclinkResult<()> {
        if *self.shared.closed.borrow() {
            Err(VaclinkError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // A dropped-but-not-closed connection must not keep reconnecting.
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

async fn run_loop(
    shared: Arc<Shared>,
    client: AsyncClient,
    mut event_loop: EventLoop,
    config: SessionConfig,
    ready: oneshot::Sender<VaclinkResult<()>>,
) {
    let mut ready = Some(ready);
    let mut backoff = Backoff::new(config.backoff_initial, config.backoff_max);
    let mut closed_rx = shared.closed.subscribe();

    loop {
        let event = tokio::select! {
            _ = closed_rx.changed() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                shared.lifecycle.send_replace(Lifecycle::Subscribing);
                tracing::info!(blid = %shared.blid, "broker session up, subscribing");
                if let Err(e) = client
                    .subscribe(config.status_topic.clone(), QoS::AtMostOnce)
                    .await
                {
                    tracing::warn!("subscribe request failed: {e}");
                }
            }
            Ok(MqttEvent::Incoming(Packet::SubAck(_))) => {
                shared.lifecycle.send_replace(Lifecycle::Active);
                backoff.reset();
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Ok(()));
                }
                let _ = shared.events.send(Event::Connected);
            }
            Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                dispatch(&shared.state, &shared.events, &publish.topic, &publish.payload);
            }
            Ok(_) => {}
            Err(e) => {
                if *closed_rx.borrow() {
                    break;
                }
                let reason = e.to_string();
                if let Some(ready) = ready.take() {
                    // First attempt never came up; surface it to the caller.
                    let _ = ready.send(Err(VaclinkError::Transport(reason)));
                    break;
                }
                tracing::warn!(blid = %shared.blid, "transport dropped: {reason}");
                shared.lifecycle.send_replace(Lifecycle::Reconnecting);
                let _ = shared.events.send(Event::Disconnected {
                    reason: reason.clone(),
                });
                let delay = backoff.next_delay();
                tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
                tokio::select! {
                    _ = closed_rx.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                shared.lifecycle.send_replace(Lifecycle::Connecting);
            }
        }
    }

    shared.lifecycle.send_replace(Lifecycle::Closed);
}

/// Decode one inbound status message and fold it into the state tree.
///
/// A single undecodable payload is reported and skipped, never fatal to
/// the session. Only merges that actually changed a leaf emit an event.
fn dispatch(state: &StateTree, events: &broadcast::Sender<Event>, topic: &str, payload: &[u8]) {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(topic, "skipping undecodable payload: {e}");
            let _ = events.send(Event::Error {
                message: format!("undecodable payload on {topic}: {e}"),
            });
            return;
        }
    };
    if !value.is_object() {
        tracing::warn!(topic, "skipping non-object payload");
        return;
    }
    let changed = state.merge(&value);
    if !changed.is_empty() {
        let _ = events.send(Event::StateChanged { paths: changed });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bus() -> (broadcast::Sender<Event>, broadcast::Receiver<Event>) {
        broadcast::channel(16)
    }

    #[test]
    fn test_dispatch_merges_and_notifies() {
        let state = StateTree::new();
        let (events, mut rx) = bus();

        dispatch(
            &state,
            &events,
            "wifistat",
            br#"{"state":{"reported":{"batPct":80}}}"#,
        );
        assert_eq!(state.get("state/reported/batPct"), Some(json!(80)));
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::StateChanged {
                paths: vec!["state/reported/batPct".into()]
            }
        );
    }

    #[test]
    fn test_dispatch_noop_update_is_silent() {
        let state = StateTree::new();
        let (events, mut rx) = bus();

        dispatch(&state, &events, "t", br#"{"state":{"reported":{"batPct":80}}}"#);
        rx.try_recv().unwrap();
        dispatch(&state, &events, "t", br#"{"state":{"reported":{"batPct":80}}}"#);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_skips_garbage_without_touching_state() {
        let state = StateTree::new();
        let (events, mut rx) = bus();

        dispatch(&state, &events, "t", b"not json at all");
        assert!(state.is_empty());
        assert!(matches!(rx.try_recv().unwrap(), Event::Error { .. }));

        dispatch(&state, &events, "t", b"[1,2,3]");
        assert!(state.is_empty());
    }

    #[test]
    fn test_dispatch_preserves_state_across_partial_resend() {
        // Reconnect burst resends only a subset of keys.
        let state = StateTree::new();
        let (events, _rx) = bus();

        dispatch(
            &state,
            &events,
            "t",
            br#"{"state":{"reported":{"softwareVer":"3.2.1","batPct":50}}}"#,
        );
        dispatch(&state, &events, "t", br#"{"state":{"reported":{"batPct":49}}}"#);
        assert_eq!(state.get("state/reported/softwareVer"), Some(json!("3.2.1")));
        assert_eq!(state.get("state/reported/batPct"), Some(json!(49)));
    }

    #[test]
    fn test_lifecycle_starts_disconnected() {
        let shared = Shared::new("BLID".into(), 4);
        assert_eq!(*shared.lifecycle.borrow(), Lifecycle::Disconnected);
    }

    #[test]
    fn test_lifecycle_transitions_land_without_subscribers() {
        // Nobody has called subscribe_lifecycle yet; borrow must still see
        // the latest transition.
        let shared = Shared::new("BLID".into(), 4);
        shared.lifecycle.send_replace(Lifecycle::Connecting);
        shared.lifecycle.send_replace(Lifecycle::Active);
        assert_eq!(*shared.lifecycle.borrow(), Lifecycle::Active);
    }

    #[tokio::test]
    async fn test_connect_to_dead_port_fails_fast() {
        // Grab a port with nothing listening on it.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let credential = Credential {
            blid: "BLID".into(),
            secret: "secret".into(),
        };
        let config = SessionConfig {
            port,
            backoff_initial: Duration::from_millis(1),
            ..SessionConfig::default()
        };
        let result = Connection::connect("127.0.0.1".parse().unwrap(), &credential, config).await;
        assert!(matches!(result, Err(VaclinkError::Transport(_))));
    }
}
