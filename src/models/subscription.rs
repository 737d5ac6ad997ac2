//! Client hub subscription bookkeeping.

use tokio::sync::mpsc;

use crate::models::wire::ServerMessage;

/// Default bound on a subscriber's outbound channel.
///
/// Matches the per-subscriber channel capacity used by the background
/// session's fan-out (C3) and the client hub's per-connection outbox (C6).
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// A connected client's attachment to one session.
///
/// Owned by the client hub; weakly references its session by id only (the
/// hub, not the subscription, owns the session's lifetime).
pub struct ClientSubscription {
    /// Identifier of the connected client.
    pub client_id: String,
    /// Session this client is currently attached to.
    pub session_id: String,
    /// Channel used to push wire messages to this client's writer task.
    pub send_channel: mpsc::Sender<ServerMessage>,
    /// Last journal seq this client has been sent (live or via resync).
    pub last_delivered_seq: i64,
    /// Timestamp of the client's last `keepalive` message.
    pub last_keepalive_at: chrono::DateTime<chrono::Utc>,
}

impl ClientSubscription {
    /// Construct a subscription with no events delivered yet.
    #[must_use]
    pub fn new(
        client_id: String,
        session_id: String,
        send_channel: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            client_id,
            session_id,
            send_channel,
            last_delivered_seq: 0,
            last_keepalive_at: chrono::Utc::now(),
        }
    }
}
