// Per-connection telemetry state owned by a ConnectionManager.
//
// Holds the snapshot sources, the raw event list, and the three derived
// event views. Consumers get read-only clones through the manager's watch
// channel; all mutation happens inside the manager's driver task.

use std::collections::VecDeque;

use crate::epoch::Generational;
use crate::feed::{GameLog, KillFeed, RoundHistory};
use crate::protocol::{PlayerState, RawEvent, TeamDescriptor};
use crate::sync::{MatchView, SnapshotSources};

pub const RAW_EVENT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
    /// Closed, with a reconnect attempt scheduled.
    ReconnectPending,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closed => "closed",
            ConnectionStatus::ReconnectPending => "reconnecting",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TelemetryState {
    generation: u64,
    match_id: Option<String>,
    status: ConnectionStatus,
    pub(crate) sources: SnapshotSources,
    raw_events: VecDeque<RawEvent>,
    kill_feed: KillFeed,
    round_history: RoundHistory,
    game_log: GameLog,
}

impl Generational for TelemetryState {
    fn generation(&self) -> u64 {
        self.generation
    }
}

impl TelemetryState {
    /// Fresh state for `match_id`, owned by writers of `generation`.
    pub(crate) fn for_match(match_id: Option<String>, generation: u64) -> Self {
        TelemetryState {
            generation,
            match_id,
            ..Default::default()
        }
    }

    pub(crate) fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub(crate) fn set_status(&mut self, status: ConnectionStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        true
    }

    /// Socket opened: the server replays its current truth, so nothing
    /// derived from an earlier connection may survive.
    pub(crate) fn on_open(&mut self) {
        self.status = ConnectionStatus::Open;
        self.raw_events.clear();
        self.kill_feed.clear();
        self.round_history.clear();
        self.game_log.clear();
        self.sources.reset_authoritative();
    }

    /// Append to the raw list and fan out to every processor. Returns the
    /// number of derived views that gained an entry.
    pub(crate) fn ingest_event(&mut self, event: RawEvent) -> usize {
        let appended = [
            self.kill_feed.process(&event),
            self.round_history.process(&event),
            self.game_log.process(&event),
        ]
        .into_iter()
        .filter(|outcome| outcome.changed())
        .count();

        self.raw_events.push_back(event);
        while self.raw_events.len() > RAW_EVENT_CAPACITY {
            self.raw_events.pop_front();
        }
        appended
    }

    // -- Read side --------------------------------------------------------

    pub fn match_id(&self) -> Option<&str> {
        self.match_id.as_deref()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == ConnectionStatus::Open
    }

    /// Merged match view, recomputed from the sources on every call.
    pub fn match_view(&self) -> Option<MatchView> {
        self.sources.merged()
    }

    pub fn phase(&self) -> Option<&str> {
        self.sources.phase()
    }

    pub fn is_capturing(&self) -> bool {
        self.sources.is_capturing()
    }

    pub fn team1(&self) -> Option<&TeamDescriptor> {
        self.sources.team1()
    }

    pub fn team2(&self) -> Option<&TeamDescriptor> {
        self.sources.team2()
    }

    pub fn current_round(&self) -> Option<u32> {
        self.sources.current_round()
    }

    pub fn current_half(&self) -> Option<u32> {
        self.sources.current_half()
    }

    pub fn players(&self) -> &[PlayerState] {
        self.sources.players()
    }

    pub fn raw_events(&self) -> impl DoubleEndedIterator<Item = &RawEvent> + '_ {
        self.raw_events.iter()
    }

    pub fn raw_event_count(&self) -> usize {
        self.raw_events.len()
    }

    pub fn kill_feed(&self) -> &KillFeed {
        &self.kill_feed
    }

    pub fn round_history(&self) -> &RoundHistory {
        &self.round_history
    }

    pub fn game_log(&self) -> &GameLog {
        &self.game_log
    }

    /// True when every derived buffer is empty.
    pub fn buffers_empty(&self) -> bool {
        self.raw_events.is_empty()
            && self.kill_feed.is_empty()
            && self.round_history.is_empty()
            && self.game_log.is_empty()
    }
}
