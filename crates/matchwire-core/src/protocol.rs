// Wire and data-model types for the match telemetry server.
//
// Inbound socket frames are `{ "type": ..., "data": ... }`. Payload structs
// default every field, and individual field values that are null or of an
// unexpected shape fall back to the field's default, so one odd value never
// costs a whole frame. Only structurally wrong payloads are rejected.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Socket envelope
// ---------------------------------------------------------------------------

/// Raw frame envelope. `data` is decoded per `type` by the router.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

// ---------------------------------------------------------------------------
// Match snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    #[default]
    Idle,
    Live,
    Ended,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Idle => "idle",
            MatchStatus::Live => "live",
            MatchStatus::Ended => "ended",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "CT", alias = "ct")]
    CounterTerrorist,
    #[serde(rename = "T", alias = "t")]
    Terrorist,
}

impl Side {
    pub fn label(self) -> &'static str {
        match self {
            Side::CounterTerrorist => "CT",
            Side::Terrorist => "T",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TeamDescriptor {
    #[serde(deserialize_with = "lenient")]
    pub name: String,
    #[serde(deserialize_with = "lenient")]
    pub tag: String,
    #[serde(deserialize_with = "lenient")]
    pub side: Option<Side>,
    #[serde(deserialize_with = "lenient")]
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerState {
    #[serde(deserialize_with = "string_or_number")]
    pub steam_id: String,
    #[serde(deserialize_with = "lenient")]
    pub name: String,
    #[serde(deserialize_with = "lenient")]
    pub side: Option<Side>,
    #[serde(deserialize_with = "lenient")]
    pub health: u32,
    #[serde(deserialize_with = "lenient")]
    pub armor: u32,
    #[serde(deserialize_with = "lenient")]
    pub money: u32,
    #[serde(deserialize_with = "lenient")]
    pub kills: u32,
    #[serde(deserialize_with = "lenient")]
    pub deaths: u32,
    #[serde(deserialize_with = "lenient")]
    pub assists: u32,
    #[serde(deserialize_with = "lenient")]
    pub is_alive: bool,
    #[serde(deserialize_with = "lenient")]
    pub has_helmet: bool,
    #[serde(deserialize_with = "lenient")]
    pub has_defuser: bool,
    #[serde(deserialize_with = "lenient")]
    pub has_bomb: bool,
}

/// Full "current state of a match" as sent by `connected` / `match_state`
/// frames and by `GET /api/match/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchSnapshot {
    #[serde(deserialize_with = "string_or_number")]
    pub match_id: String,
    #[serde(deserialize_with = "lenient")]
    pub map_name: String,
    #[serde(deserialize_with = "lenient")]
    pub status: MatchStatus,
    #[serde(deserialize_with = "lenient")]
    pub phase: String,
    #[serde(deserialize_with = "lenient")]
    pub is_capturing: bool,
    #[serde(deserialize_with = "lenient")]
    pub team1: TeamDescriptor,
    #[serde(deserialize_with = "lenient")]
    pub team2: TeamDescriptor,
    #[serde(deserialize_with = "lenient")]
    pub current_round: u32,
    #[serde(deserialize_with = "lenient")]
    pub current_half: u32,
    #[serde(deserialize_with = "lenient")]
    pub players: Vec<PlayerState>,
}

/// Authoritative phase/side state (`matchzy_state` frames). Overrides the
/// matching fields of the base snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PhaseState {
    #[serde(deserialize_with = "lenient")]
    pub phase: String,
    #[serde(deserialize_with = "lenient")]
    pub is_capturing: bool,
    #[serde(deserialize_with = "lenient")]
    pub team1: TeamDescriptor,
    #[serde(deserialize_with = "lenient")]
    pub team2: TeamDescriptor,
    #[serde(deserialize_with = "lenient")]
    pub current_round: u32,
    #[serde(deserialize_with = "lenient")]
    pub current_half: u32,
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActiveMatchInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub match_id: String,
    #[serde(deserialize_with = "lenient")]
    pub map_name: String,
    #[serde(deserialize_with = "lenient")]
    pub team1_name: String,
    #[serde(deserialize_with = "lenient")]
    pub team2_name: String,
    #[serde(deserialize_with = "lenient")]
    pub team1_score: u32,
    #[serde(deserialize_with = "lenient")]
    pub team2_score: u32,
    #[serde(deserialize_with = "lenient")]
    pub current_round: u32,
    #[serde(deserialize_with = "lenient")]
    pub status: MatchStatus,
}

/// Body of `GET /api/matches`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchListResponse {
    #[serde(default)]
    pub matches: Vec<ActiveMatchInfo>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Event discriminator. Unknown kinds are preserved rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Kill,
    RoundStart,
    RoundEnd,
    BombPlanted,
    BombDefused,
    BombExploded,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Kill => "kill",
            EventKind::RoundStart => "round_start",
            EventKind::RoundEnd => "round_end",
            EventKind::BombPlanted => "bomb_planted",
            EventKind::BombDefused => "bomb_defused",
            EventKind::BombExploded => "bomb_exploded",
            EventKind::Other(name) => name,
        }
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "kill" => EventKind::Kill,
            "round_start" => EventKind::RoundStart,
            "round_end" => EventKind::RoundEnd,
            "bomb_planted" => EventKind::BombPlanted,
            "bomb_defused" => EventKind::BombDefused,
            "bomb_exploded" => EventKind::BombExploded,
            _ => EventKind::Other(value),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

/// One event as received from the server. Never mutated after decode;
/// kind-specific fields stay in `payload` until a processor asks for them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, deserialize_with = "lenient")]
    pub round: u32,
    #[serde(default, deserialize_with = "lenient")]
    pub tick: u64,
    /// RFC 3339 string or epoch milliseconds.
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl RawEvent {
    /// Decode the kind-specific payload into `T`.
    pub fn payload_as<T>(&self) -> Result<T, serde_json::Error>
    where
        T: for<'de> Deserialize<'de>,
    {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventPlayer {
    #[serde(deserialize_with = "string_or_number")]
    pub steam_id: String,
    #[serde(deserialize_with = "lenient")]
    pub name: String,
    #[serde(deserialize_with = "lenient")]
    pub side: Option<Side>,
}

impl EventPlayer {
    /// Stable identifier: steam id, falling back to the display name for
    /// bots that report no id.
    pub fn id(&self) -> &str {
        if self.steam_id.is_empty() {
            &self.name
        } else {
            &self.steam_id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KillPayload {
    /// Absent for environmental deaths (fall damage, bomb, world).
    #[serde(deserialize_with = "lenient")]
    pub attacker: Option<EventPlayer>,
    #[serde(deserialize_with = "lenient")]
    pub victim: Option<EventPlayer>,
    #[serde(deserialize_with = "lenient")]
    pub assister: Option<EventPlayer>,
    #[serde(deserialize_with = "lenient")]
    pub weapon: String,
    #[serde(deserialize_with = "lenient")]
    pub headshot: bool,
    #[serde(deserialize_with = "lenient")]
    pub penetrated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoundEndPayload {
    #[serde(deserialize_with = "lenient")]
    pub winner: Option<Side>,
    #[serde(deserialize_with = "lenient")]
    pub reason: String,
    #[serde(deserialize_with = "lenient")]
    pub team1_score: u32,
    #[serde(deserialize_with = "lenient")]
    pub team2_score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BombPayload {
    #[serde(deserialize_with = "lenient")]
    pub player: Option<EventPlayer>,
    #[serde(deserialize_with = "lenient")]
    pub site: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Accept identifiers sent either as JSON strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number identifier, got {other}"
        ))),
    }
}

/// Decode `T`, falling back to `T::default()` when the value is null or
/// does not fit (an unknown side label, a string where a number belongs).
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn flexible_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let parsed = match Value::deserialize(deserializer)? {
        Value::String(s) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    };
    Ok(parsed)
}
