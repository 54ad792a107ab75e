//! Events delivered on the session event bus

/// Connectivity and state-change notifications.
///
/// Transient: pushed to subscribers, never retained. The bus is a bounded
/// broadcast channel, so a subscriber that falls behind loses the oldest
/// events rather than stalling the dispatch path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// One merge changed these leaf values; paths are `/`-separated.
    StateChanged { paths: Vec<String> },
    /// The status subscription is live.
    Connected,
    /// The transport dropped; the session is retrying unless closed.
    Disconnected { reason: String },
    /// A non-fatal fault worth surfacing (e.g. an undecodable payload).
    Error { message: String },
}
