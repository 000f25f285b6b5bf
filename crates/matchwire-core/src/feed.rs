// Derived event views: kill feed, round history, and unified game log.
//
// Each processor consumes the same ordered stream of RawEvents, filters to
// the kinds it cares about, and keeps at most one entry per identity key.
// Processors own their buffers; nothing here is shared between them.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::protocol::{
    BombPayload, EventKind, EventPlayer, KillPayload, RawEvent, RoundEndPayload, Side,
};

pub const KILL_FEED_CAPACITY: usize = 50;
pub const GAME_LOG_CAPACITY: usize = 100;

/// What a processor did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// A new entry was appended.
    Appended,
    /// The identity key was already present; nothing changed.
    Duplicate,
    /// The event kind is not one this processor consumes.
    Filtered,
    /// The event kind matched but its payload was unusable.
    Malformed,
}

impl FeedOutcome {
    pub fn changed(self) -> bool {
        self == FeedOutcome::Appended
    }
}

// ---------------------------------------------------------------------------
// DedupBuffer
// ---------------------------------------------------------------------------

/// FIFO buffer keyed by an identity. Inserting an already-present key is a
/// no-op; inserting past `capacity` evicts the oldest entry (and forgets
/// its key).
#[derive(Debug, Clone)]
pub struct DedupBuffer<K, V> {
    items: VecDeque<(K, V)>,
    keys: HashSet<K>,
    capacity: Option<usize>,
}

impl<K, V> DedupBuffer<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn bounded(capacity: usize) -> Self {
        DedupBuffer {
            items: VecDeque::with_capacity(capacity),
            keys: HashSet::with_capacity(capacity),
            capacity: Some(capacity),
        }
    }

    pub fn unbounded() -> Self {
        DedupBuffer {
            items: VecDeque::new(),
            keys: HashSet::new(),
            capacity: None,
        }
    }

    /// Returns `false` when `key` was already present.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        self.keys.insert(key.clone());
        self.items.push_back((key, value));
        if let Some(cap) = self.capacity {
            while self.items.len() > cap {
                if let Some((old, _)) = self.items.pop_front() {
                    self.keys.remove(&old);
                }
            }
        }
        true
    }

    pub fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        if !self.keys.contains(key) {
            return None;
        }
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &V> + '_ {
        self.items.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.keys.clear();
    }
}

// ---------------------------------------------------------------------------
// Kill feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KillFeedEntry {
    pub tick: u64,
    pub round: u32,
    pub timestamp: Option<DateTime<Utc>>,
    /// `None` for environmental kills.
    pub attacker_name: Option<String>,
    pub attacker_side: Option<Side>,
    pub victim_id: String,
    pub victim_name: String,
    pub victim_side: Option<Side>,
    pub assister_name: Option<String>,
    pub weapon: String,
    pub headshot: bool,
    pub penetrated: bool,
}

impl KillFeedEntry {
    pub fn is_environmental(&self) -> bool {
        self.attacker_name.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct KillFeed {
    entries: DedupBuffer<(u64, String), KillFeedEntry>,
}

impl Default for KillFeed {
    fn default() -> Self {
        KillFeed {
            entries: DedupBuffer::bounded(KILL_FEED_CAPACITY),
        }
    }
}

impl KillFeed {
    pub fn process(&mut self, event: &RawEvent) -> FeedOutcome {
        if event.kind != EventKind::Kill {
            return FeedOutcome::Filtered;
        }
        let payload: KillPayload = match event.payload_as() {
            Ok(p) => p,
            Err(e) => {
                warn!("Dropping kill event at tick {}: {}", event.tick, e);
                return FeedOutcome::Malformed;
            }
        };
        let Some(victim) = payload.victim.as_ref().filter(|v| !v.id().is_empty()) else {
            warn!("Dropping kill event at tick {}: no victim", event.tick);
            return FeedOutcome::Malformed;
        };

        let attacker = payload.attacker.as_ref().filter(|a| !a.name.is_empty());
        let entry = KillFeedEntry {
            tick: event.tick,
            round: event.round,
            timestamp: event.timestamp,
            attacker_name: attacker.map(|a| a.name.clone()),
            attacker_side: attacker.and_then(|a| a.side),
            victim_id: victim.id().to_string(),
            victim_name: victim.name.clone(),
            victim_side: victim.side,
            assister_name: payload
                .assister
                .as_ref()
                .filter(|a| !a.name.is_empty())
                .map(|a| a.name.clone()),
            weapon: payload.weapon.clone(),
            headshot: payload.headshot,
            penetrated: payload.penetrated,
        };

        let key = (entry.tick, entry.victim_id.clone());
        if self.entries.insert(key, entry) {
            FeedOutcome::Appended
        } else {
            debug!("Duplicate kill at tick {} ignored", event.tick);
            FeedOutcome::Duplicate
        }
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &KillFeedEntry> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ---------------------------------------------------------------------------
// Round history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundHistoryEntry {
    pub round: u32,
    pub winner: Option<Side>,
    pub reason: String,
    pub team1_score: u32,
    pub team2_score: u32,
    pub tick: u64,
}

/// First-write-wins per round number; unbounded.
#[derive(Debug, Clone)]
pub struct RoundHistory {
    rounds: DedupBuffer<u32, RoundHistoryEntry>,
}

impl Default for RoundHistory {
    fn default() -> Self {
        RoundHistory {
            rounds: DedupBuffer::unbounded(),
        }
    }
}

impl RoundHistory {
    pub fn process(&mut self, event: &RawEvent) -> FeedOutcome {
        if event.kind != EventKind::RoundEnd {
            return FeedOutcome::Filtered;
        }
        // A retransmission for a known round is treated as a duplicate even
        // if its contents differ.
        if self.rounds.contains(&event.round) {
            debug!("Round {} already recorded, ignoring", event.round);
            return FeedOutcome::Duplicate;
        }
        // Undecodable fields fall back to defaults; the round is still recorded.
        let payload: RoundEndPayload = event.payload_as().unwrap_or_else(|e| {
            debug!("Partial round_end for round {}: {}", event.round, e);
            RoundEndPayload::default()
        });
        self.rounds.insert(
            event.round,
            RoundHistoryEntry {
                round: event.round,
                winner: payload.winner,
                reason: payload.reason,
                team1_score: payload.team1_score,
                team2_score: payload.team2_score,
                tick: event.tick,
            },
        );
        FeedOutcome::Appended
    }

    pub fn get(&self, round: u32) -> Option<&RoundHistoryEntry> {
        self.rounds.get(&round)
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &RoundHistoryEntry> + '_ {
        self.rounds.iter()
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn clear(&mut self) {
        self.rounds.clear();
    }
}

// ---------------------------------------------------------------------------
// Unified game log
// ---------------------------------------------------------------------------

/// Kinds that appear in the unified log.
pub const GAME_LOG_KINDS: [EventKind; 6] = [
    EventKind::Kill,
    EventKind::BombPlanted,
    EventKind::BombDefused,
    EventKind::BombExploded,
    EventKind::RoundStart,
    EventKind::RoundEnd,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameLogEvent {
    /// Monotonic per log instance; survives `clear()` so consumers can
    /// track what they have already shown.
    pub seq: u64,
    pub kind: EventKind,
    pub round: u32,
    pub tick: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub actor: Option<String>,
    pub side: Option<Side>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct GameLog {
    events: DedupBuffer<(EventKind, u64, u32), GameLogEvent>,
    next_seq: u64,
}

impl Default for GameLog {
    fn default() -> Self {
        GameLog {
            events: DedupBuffer::bounded(GAME_LOG_CAPACITY),
            next_seq: 1,
        }
    }
}

impl GameLog {
    pub fn process(&mut self, event: &RawEvent) -> FeedOutcome {
        if !GAME_LOG_KINDS.contains(&event.kind) {
            return FeedOutcome::Filtered;
        }
        let key = (event.kind.clone(), event.tick, event.round);
        if self.events.contains(&key) {
            debug!("Duplicate {} at tick {} ignored", event.kind.as_str(), event.tick);
            return FeedOutcome::Duplicate;
        }

        let (actor, side, message) = describe(event);
        let entry = GameLogEvent {
            seq: self.next_seq,
            kind: event.kind.clone(),
            round: event.round,
            tick: event.tick,
            timestamp: event.timestamp,
            actor,
            side,
            message,
        };
        self.next_seq += 1;
        self.events.insert(key, entry);
        FeedOutcome::Appended
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &GameLogEvent> + '_ {
        self.events.iter()
    }

    /// Entries with `seq` greater than `after`, oldest first.
    pub fn since(&self, after: u64) -> impl Iterator<Item = &GameLogEvent> + '_ {
        self.events.iter().filter(move |e| e.seq > after)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// Render one event into (actor, side, message). Payload problems degrade to
/// placeholder text; the log never rejects an allow-listed kind.
fn describe(event: &RawEvent) -> (Option<String>, Option<Side>, String) {
    match &event.kind {
        EventKind::Kill => {
            let kill: KillPayload = event.payload_as().unwrap_or_default();
            let victim = kill
                .victim
                .as_ref()
                .map(|v| v.name.as_str())
                .filter(|n| !n.is_empty())
                .unwrap_or("unknown");
            let mut message = match kill.attacker.as_ref().filter(|a| !a.name.is_empty()) {
                Some(attacker) if kill.weapon.is_empty() => {
                    format!("{} killed {}", attacker.name, victim)
                }
                Some(attacker) => format!("{} killed {} with {}", attacker.name, victim, kill.weapon),
                None => format!("{victim} died"),
            };
            if kill.headshot {
                message.push_str(" (headshot)");
            }
            let attacker = kill.attacker.filter(|a| !a.name.is_empty());
            (
                attacker.as_ref().map(|a| a.name.clone()),
                attacker.and_then(|a| a.side),
                message,
            )
        }
        EventKind::BombPlanted | EventKind::BombDefused => {
            let bomb: BombPayload = event.payload_as().unwrap_or_default();
            let verb = if event.kind == EventKind::BombPlanted {
                "planted"
            } else {
                "defused"
            };
            let who = player_name(bomb.player.as_ref());
            let message = match (&who, &bomb.site) {
                (Some(name), Some(site)) => format!("{name} {verb} the bomb at {site}"),
                (Some(name), None) => format!("{name} {verb} the bomb"),
                (None, Some(site)) => format!("Bomb {verb} at {site}"),
                (None, None) => format!("Bomb {verb}"),
            };
            (who, bomb.player.and_then(|p| p.side), message)
        }
        EventKind::BombExploded => {
            let bomb: BombPayload = event.payload_as().unwrap_or_default();
            let message = match bomb.site {
                Some(site) => format!("Bomb exploded at {site}"),
                None => "Bomb exploded".to_string(),
            };
            (None, None, message)
        }
        EventKind::RoundStart => (None, None, format!("Round {} started", event.round)),
        EventKind::RoundEnd => {
            let end: RoundEndPayload = event.payload_as().unwrap_or_default();
            let mut message = match end.winner {
                Some(side) => format!("Round {} won by {}", event.round, side.label()),
                None => format!("Round {} ended", event.round),
            };
            if !end.reason.is_empty() {
                message.push_str(&format!(" ({})", end.reason));
            }
            (None, end.winner, message)
        }
        EventKind::Other(name) => (None, None, name.clone()),
    }
}

fn player_name(player: Option<&EventPlayer>) -> Option<String> {
    player.map(|p| p.name.clone()).filter(|n| !n.is_empty())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
