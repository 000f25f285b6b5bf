// Match snapshot reconciliation.
//
// Three sources feed the match view: the base snapshot (`connected` /
// `match_state`), the roster channel (`player_update`), and the
// authoritative phase channel (`matchzy_state`). They are stored separately
// and merged on every read:
//
//   phase, capturing, team1, team2, round, half : authoritative > base
//   players                                      : roster > base
//   map, status                                  : base only

use serde::Serialize;

use crate::protocol::{MatchSnapshot, MatchStatus, PhaseState, PlayerState, TeamDescriptor};

/// Merged, read-only view of the current match.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MatchView {
    pub match_id: String,
    pub map_name: String,
    pub status: MatchStatus,
    pub phase: String,
    pub is_capturing: bool,
    pub team1: TeamDescriptor,
    pub team2: TeamDescriptor,
    pub current_round: u32,
    pub current_half: u32,
    pub players: Vec<PlayerState>,
}

/// The three snapshot sources, unmerged.
#[derive(Debug, Clone, Default)]
pub struct SnapshotSources {
    base: Option<MatchSnapshot>,
    roster: Option<Vec<PlayerState>>,
    authoritative: Option<PhaseState>,
}

impl SnapshotSources {
    /// Full snapshot: replaces the base. The snapshot's own player list
    /// becomes current again, superseding any earlier roster update.
    pub fn apply_snapshot(&mut self, snapshot: MatchSnapshot) {
        self.base = Some(snapshot);
        self.roster = None;
    }

    pub fn apply_roster(&mut self, players: Vec<PlayerState>) {
        self.roster = Some(players);
    }

    pub fn apply_phase_state(&mut self, state: PhaseState) {
        self.authoritative = Some(state);
    }

    /// Returns `false` when there is no base snapshot to mark.
    pub fn mark_ended(&mut self) -> bool {
        match self.base.as_mut() {
            Some(base) => {
                base.status = MatchStatus::Ended;
                true
            }
            None => false,
        }
    }

    /// Forget state that is only valid for one connection.
    pub fn reset_authoritative(&mut self) {
        self.authoritative = None;
    }

    pub fn merged(&self) -> Option<MatchView> {
        merge(
            self.base.as_ref(),
            self.roster.as_deref(),
            self.authoritative.as_ref(),
        )
    }

    pub fn phase(&self) -> Option<&str> {
        self.authoritative
            .as_ref()
            .map(|a| a.phase.as_str())
            .or_else(|| self.base.as_ref().map(|b| b.phase.as_str()))
    }

    pub fn is_capturing(&self) -> bool {
        self.authoritative
            .as_ref()
            .map(|a| a.is_capturing)
            .or_else(|| self.base.as_ref().map(|b| b.is_capturing))
            .unwrap_or(false)
    }

    pub fn team1(&self) -> Option<&TeamDescriptor> {
        self.authoritative
            .as_ref()
            .map(|a| &a.team1)
            .or_else(|| self.base.as_ref().map(|b| &b.team1))
    }

    pub fn team2(&self) -> Option<&TeamDescriptor> {
        self.authoritative
            .as_ref()
            .map(|a| &a.team2)
            .or_else(|| self.base.as_ref().map(|b| &b.team2))
    }

    pub fn current_round(&self) -> Option<u32> {
        self.authoritative
            .as_ref()
            .map(|a| a.current_round)
            .or_else(|| self.base.as_ref().map(|b| b.current_round))
    }

    pub fn current_half(&self) -> Option<u32> {
        self.authoritative
            .as_ref()
            .map(|a| a.current_half)
            .or_else(|| self.base.as_ref().map(|b| b.current_half))
    }

    pub fn players(&self) -> &[PlayerState] {
        match (&self.roster, &self.base) {
            (Some(roster), _) => roster,
            (None, Some(base)) => &base.players,
            (None, None) => &[],
        }
    }
}

/// Merge the sources into one view. `None` only when nothing has arrived.
pub fn merge(
    base: Option<&MatchSnapshot>,
    roster: Option<&[PlayerState]>,
    authoritative: Option<&PhaseState>,
) -> Option<MatchView> {
    if base.is_none() && roster.is_none() && authoritative.is_none() {
        return None;
    }

    let mut view = match base {
        Some(b) => MatchView {
            match_id: b.match_id.clone(),
            map_name: b.map_name.clone(),
            status: b.status,
            phase: b.phase.clone(),
            is_capturing: b.is_capturing,
            team1: b.team1.clone(),
            team2: b.team2.clone(),
            current_round: b.current_round,
            current_half: b.current_half,
            players: b.players.clone(),
        },
        None => MatchView::default(),
    };

    if let Some(players) = roster {
        view.players = players.to_vec();
    }

    if let Some(a) = authoritative {
        view.phase = a.phase.clone();
        view.is_capturing = a.is_capturing;
        view.team1 = a.team1.clone();
        view.team2 = a.team2.clone();
        view.current_round = a.current_round;
        view.current_half = a.current_half;
    }

    Some(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Side;

    fn team(name: &str, side: Side, score: u32) -> TeamDescriptor {
        TeamDescriptor {
            name: name.into(),
            tag: name[..3].to_uppercase(),
            side: Some(side),
            score,
        }
    }

    fn player(id: &str, health: u32) -> PlayerState {
        PlayerState {
            steam_id: id.into(),
            name: format!("player{id}"),
            health,
            is_alive: health > 0,
            ..Default::default()
        }
    }

    fn base() -> MatchSnapshot {
        MatchSnapshot {
            match_id: "7".into(),
            map_name: "de_mirage".into(),
            status: MatchStatus::Live,
            phase: "warmup".into(),
            is_capturing: false,
            team1: team("alpha", Side::CounterTerrorist, 0),
            team2: team("bravo", Side::Terrorist, 0),
            current_round: 1,
            current_half: 1,
            players: vec![player("1", 100)],
        }
    }

    fn phase_state() -> PhaseState {
        PhaseState {
            phase: "live".into(),
            is_capturing: true,
            team1: team("alpha", Side::Terrorist, 8),
            team2: team("bravo", Side::CounterTerrorist, 7),
            current_round: 16,
            current_half: 2,
        }
    }

    #[test]
    fn empty_sources_have_no_view() {
        assert!(SnapshotSources::default().merged().is_none());
        assert_eq!(SnapshotSources::default().phase(), None);
        assert!(SnapshotSources::default().players().is_empty());
    }

    #[test]
    fn base_only_reads_from_base() {
        let mut sources = SnapshotSources::default();
        sources.apply_snapshot(base());
        assert_eq!(sources.phase(), Some("warmup"));
        assert!(!sources.is_capturing());
        assert_eq!(sources.team1().unwrap().side, Some(Side::CounterTerrorist));
        assert_eq!(sources.merged().unwrap().map_name, "de_mirage");
    }

    #[test]
    fn authoritative_overrides_its_fields_only() {
        let mut sources = SnapshotSources::default();
        sources.apply_snapshot(base());
        sources.apply_roster(vec![player("1", 40), player("2", 0)]);
        sources.apply_phase_state(phase_state());

        let view = sources.merged().unwrap();
        assert_eq!(view.phase, "live");
        assert!(view.is_capturing);
        assert_eq!(view.team1.score, 8);
        assert_eq!(view.team2.side, Some(Side::CounterTerrorist));
        assert_eq!(view.current_round, 16);
        assert_eq!(view.current_half, 2);
        // Untouched by the phase channel.
        assert_eq!(view.map_name, "de_mirage");
        assert_eq!(view.status, MatchStatus::Live);
        assert_eq!(view.players, vec![player("1", 40), player("2", 0)]);
    }

    #[test]
    fn new_base_snapshot_does_not_hide_authoritative_fields() {
        let mut sources = SnapshotSources::default();
        sources.apply_phase_state(phase_state());
        sources.apply_snapshot(base());
        assert_eq!(sources.phase(), Some("live"));
        assert_eq!(sources.team1().unwrap().score, 8);
    }

    #[test]
    fn full_snapshot_supersedes_roster_update() {
        let mut sources = SnapshotSources::default();
        sources.apply_snapshot(base());
        sources.apply_roster(vec![player("9", 1)]);
        sources.apply_snapshot(base());
        assert_eq!(sources.players(), &[player("1", 100)]);
    }

    #[test]
    fn reset_authoritative_falls_back_to_base() {
        let mut sources = SnapshotSources::default();
        sources.apply_snapshot(base());
        sources.apply_phase_state(phase_state());
        sources.reset_authoritative();
        assert_eq!(sources.phase(), Some("warmup"));
        assert_eq!(sources.merged().unwrap().current_round, 1);
    }

    #[test]
    fn mark_ended_requires_base() {
        let mut sources = SnapshotSources::default();
        assert!(!sources.mark_ended());
        sources.apply_snapshot(base());
        assert!(sources.mark_ended());
        assert_eq!(sources.merged().unwrap().status, MatchStatus::Ended);
    }

    #[test]
    fn roster_without_base_still_produces_view() {
        let view = merge(None, Some(&[player("3", 77)]), None).unwrap();
        assert_eq!(view.players.len(), 1);
        assert_eq!(view.status, MatchStatus::Idle);
    }
}
