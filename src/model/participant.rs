use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Team assignment when the room runs in team mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    /// Red team.
    Red,
    /// Blue team.
    Blue,
}

/// One player's presence and running score within a room.
///
/// Score and streak are mutated only by an accepted answer submission for
/// this participant; exactly one row exists per (room, player identity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Primary key.
    pub id: Uuid,
    /// Room this row belongs to.
    pub room_id: Uuid,
    /// Stable player identity, when authenticated.
    pub player_id: Option<Uuid>,
    /// Display nickname.
    pub nickname: String,
    /// Cumulative score; non-decreasing within a session.
    pub score: u32,
    /// Consecutive correct answers; reset to 0 on any miss.
    pub streak: u32,
    /// Team tag; only meaningful when the room mode is teams.
    pub team: Option<Team>,
    /// Avatar reference.
    pub avatar: Option<String>,
    /// Last activity timestamp in the store's wire format; participant lists
    /// are ordered by this field.
    pub last_active: String,
}

/// Aggregate (red, blue) score totals for a team-mode room.
pub fn team_totals(participants: &[Participant]) -> (u32, u32) {
    participants.iter().fold((0, 0), |(red, blue), p| match p.team {
        Some(Team::Red) => (red + p.score, blue),
        Some(Team::Blue) => (red, blue + p.score),
        None => (red, blue),
    })
}
