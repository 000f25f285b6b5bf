// Structured connection diagnostics.
//
// The connection manager reports lifecycle transitions and per-message
// problems here in addition to logging them, so observers can tell a
// degraded connection from a dropped message without scraping logs.

use std::time::Duration;

use tokio::sync::broadcast;

/// Buffered diagnostics per subscriber before lagging ones skip ahead.
pub const DIAGNOSTICS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connecting { match_id: String, url: String },
    Opened { match_id: String },
    /// Non-fatal transport problem; the close/reconnect path handles it.
    ConnectionDegraded { match_id: String, reason: String },
    Closed { match_id: String },
    ReconnectScheduled { match_id: String, delay: Duration },
    /// A frame could not be parsed or applied and was discarded.
    MessageDropped { match_id: String, reason: String },
    Stopped { match_id: String },
}

impl ClientEvent {
    pub fn match_id(&self) -> &str {
        match self {
            ClientEvent::Connecting { match_id, .. }
            | ClientEvent::Opened { match_id }
            | ClientEvent::ConnectionDegraded { match_id, .. }
            | ClientEvent::Closed { match_id }
            | ClientEvent::ReconnectScheduled { match_id, .. }
            | ClientEvent::MessageDropped { match_id, .. }
            | ClientEvent::Stopped { match_id } => match_id,
        }
    }
}

pub(crate) fn channel() -> broadcast::Sender<ClientEvent> {
    let (tx, _rx) = broadcast::channel(DIAGNOSTICS_CAPACITY);
    tx
}

/// Send without caring whether anyone is listening.
pub(crate) fn emit(tx: &broadcast::Sender<ClientEvent>, event: ClientEvent) {
    let _ = tx.send(event);
}
