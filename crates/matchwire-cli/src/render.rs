// Plain-text rendering for terminal output.

use matchwire_core::diagnostics::ClientEvent;
use matchwire_core::feed::GameLogEvent;
use matchwire_core::protocol::{ActiveMatchInfo, MatchSnapshot, PlayerState, Side, TeamDescriptor};
use matchwire_core::state::TelemetryState;

pub fn match_row(info: &ActiveMatchInfo) -> String {
    format!(
        "{:<10} {:<14} {} {} - {} {}  R{}  {}",
        info.match_id,
        info.map_name,
        info.team1_name,
        info.team1_score,
        info.team2_score,
        info.team2_name,
        info.current_round,
        info.status.as_str(),
    )
}

fn team(team: &TeamDescriptor) -> String {
    match team.side {
        Some(side) => format!("{} ({})", team.name, side.label()),
        None => team.name.clone(),
    }
}

fn scoreline(team1: &TeamDescriptor, team2: &TeamDescriptor) -> String {
    format!("{} {} - {} {}", team(team1), team1.score, team2.score, team(team2))
}

fn player_row(player: &PlayerState) -> String {
    let side = player.side.map(Side::label).unwrap_or("-");
    let state = if player.is_alive { "" } else { " dead" };
    format!(
        "  {:<3} {:<20} {:>3} hp {:>3} ar ${:<6} {}/{}/{}{}",
        side,
        player.name,
        player.health,
        player.armor,
        player.money,
        player.kills,
        player.deaths,
        player.assists,
        state,
    )
}

pub fn snapshot_summary(snapshot: &MatchSnapshot) -> String {
    let mut lines = vec![
        format!(
            "Match {} on {} [{}]",
            snapshot.match_id,
            snapshot.map_name,
            snapshot.status.as_str()
        ),
        scoreline(&snapshot.team1, &snapshot.team2),
        format!(
            "Round {} (half {}), phase {}",
            snapshot.current_round, snapshot.current_half, snapshot.phase
        ),
    ];
    lines.extend(snapshot.players.iter().map(player_row));
    lines.join("\n")
}

/// One-line connection and score summary for `watch`.
pub fn status_line(state: &TelemetryState) -> String {
    let status = state.status().as_str();
    let Some(view) = state.match_view() else {
        let id = state.match_id().unwrap_or("-");
        return format!("[{status}] match {id} (waiting for snapshot)");
    };
    let capturing = if view.is_capturing { ", capturing" } else { "" };
    format!(
        "[{status}] {} | {} | round {} | {}{}",
        view.map_name,
        scoreline(&view.team1, &view.team2),
        view.current_round,
        view.phase,
        capturing,
    )
}

pub fn game_log_line(entry: &GameLogEvent) -> String {
    match entry.side {
        Some(side) => format!("R{:<3} [{}] {}", entry.round, side.label(), entry.message),
        None => format!("R{:<3} {}", entry.round, entry.message),
    }
}

/// Connection problems worth showing to a watcher. Routine transitions are
/// already visible in the status line.
pub fn diagnostic_line(event: &ClientEvent) -> Option<String> {
    match event {
        ClientEvent::ConnectionDegraded { reason, .. } => Some(format!("! connection problem: {reason}")),
        ClientEvent::ReconnectScheduled { delay, .. } => {
            Some(format!("! reconnecting in {}s", delay.as_secs_f32()))
        }
        ClientEvent::MessageDropped { reason, .. } => Some(format!("! dropped message: {reason}")),
        _ => None,
    }
}
