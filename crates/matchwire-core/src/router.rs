// Inbound frame parsing and dispatch.
//
// Frames are decoded in two steps: the `{type, data}` envelope first, then
// `data` according to `type`. Parsing is kept separate from application so
// the connection driver can parse outside the state lock and only hold it
// for `route`.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::protocol::{Envelope, MatchSnapshot, PhaseState, PlayerState, RawEvent};
use crate::state::TelemetryState;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    #[error("malformed `{kind}` payload: {source}")]
    MalformedPayload {
        kind: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// `connected` or `match_state`: full snapshot semantics.
    Snapshot(MatchSnapshot),
    PlayerUpdate(Vec<PlayerState>),
    Event(Box<RawEvent>),
    /// `matchzy_state`: authoritative phase/side state.
    PhaseState(PhaseState),
    PhaseChange(Value),
    SideSwap(Value),
    Disconnected,
    Unknown(String),
}

pub fn parse_frame(text: &str) -> Result<InboundMessage, RouteError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(RouteError::MalformedFrame)?;
    let Envelope { kind, data } = envelope;

    let message = match kind.as_str() {
        "connected" | "match_state" => InboundMessage::Snapshot(decode(&kind, data)?),
        "player_update" => InboundMessage::PlayerUpdate(decode(&kind, data)?),
        "event" => InboundMessage::Event(Box::new(decode(&kind, data)?)),
        "matchzy_state" => InboundMessage::PhaseState(decode(&kind, data)?),
        "phase_change" => InboundMessage::PhaseChange(data),
        "side_swap" => InboundMessage::SideSwap(data),
        "disconnected" => InboundMessage::Disconnected,
        _ => InboundMessage::Unknown(kind),
    };
    Ok(message)
}

fn decode<T>(kind: &str, data: Value) -> Result<T, RouteError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    serde_json::from_value(data).map_err(|source| RouteError::MalformedPayload {
        kind: kind.to_string(),
        source,
    })
}

/// Apply a parsed message. Returns whether the state changed.
pub fn route(state: &mut TelemetryState, message: InboundMessage) -> bool {
    match message {
        InboundMessage::Snapshot(snapshot) => {
            state.sources.apply_snapshot(snapshot);
            true
        }
        InboundMessage::PlayerUpdate(players) => {
            state.sources.apply_roster(players);
            true
        }
        InboundMessage::Event(event) => {
            state.ingest_event(*event);
            true
        }
        InboundMessage::PhaseState(phase) => {
            state.sources.apply_phase_state(phase);
            true
        }
        InboundMessage::PhaseChange(_) | InboundMessage::SideSwap(_) => {
            // Carried authoritatively by `matchzy_state`.
            debug!("Informational phase/side frame ignored");
            false
        }
        InboundMessage::Disconnected => {
            let marked = state.sources.mark_ended();
            if !marked {
                debug!("`disconnected` received before any snapshot");
            }
            marked
        }
        InboundMessage::Unknown(kind) => {
            debug!("Ignoring unrecognized message type `{}`", kind);
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
