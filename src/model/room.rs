use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock;

/// Characters a room code is drawn from.
const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a human-enterable room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Generate a 6-character uppercase alphanumeric room code.
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

/// Lifecycle status of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Lobby is open; the game has not started.
    Waiting,
    /// The game is running.
    Active,
    /// The game ended; final scores stand.
    Finished,
}

/// Whether players compete individually or split into two teams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Every participant scores for themselves.
    Solo,
    /// Participants carry a red/blue team tag and scores aggregate per team.
    Teams,
}

/// Difficulty filter applied when the room's question set was assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyFilter {
    /// Easy questions only.
    Easy,
    /// Medium questions only.
    Medium,
    /// Hard questions only.
    Hard,
    /// Any difficulty.
    Mixed,
}

/// When cumulative scores are shown to players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreReveal {
    /// After every question.
    #[serde(rename = "each")]
    EachQuestion,
    /// Only on the final results screen.
    End,
}

/// Immutable settings chosen when the room was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSettings {
    /// Per-question answer window in seconds. The room creation UI offers 10,
    /// 20 or 30; the engine accepts any positive value.
    pub time_limit_secs: u32,
    /// Solo or team play.
    pub mode: GameMode,
    /// Difficulty filter used to pick the question set.
    pub difficulty: DifficultyFilter,
    /// Carried for the room creation flow; no engine behavior attached.
    pub sudden_death: bool,
    /// Score reveal policy.
    pub score_reveal: ScoreReveal,
}

impl RoomSettings {
    /// Answer window in milliseconds.
    pub fn time_limit_ms(&self) -> i64 {
        i64::from(self.time_limit_secs) * 1000
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            time_limit_secs: 20,
            mode: GameMode::Solo,
            difficulty: DifficultyFilter::Mixed,
            sudden_death: false,
            score_reveal: ScoreReveal::EachQuestion,
        }
    }
}

/// One game instance, identified by a short join code.
///
/// Mutated only by host-initiated transitions (start, advance, end); every
/// client replicates its session phase from this record alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// Primary key.
    pub id: Uuid,
    /// Human-enterable join code.
    pub code: String,
    /// Stable identity of the hosting player, when known.
    pub host_id: Option<Uuid>,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Index into `question_ids` of the current question.
    pub current_question_index: u32,
    /// Settings frozen at creation.
    pub settings: RoomSettings,
    /// Ordered question identifiers; immutable once the game starts.
    pub question_ids: Vec<Uuid>,
    /// Server-stamped instant the live question started, in the store's wire
    /// format. Non-null only while a question is live.
    pub question_started_at: Option<String>,
    /// Creation timestamp in the store's wire format.
    pub created_at: String,
}

impl Room {
    /// Build a fresh room in the waiting state.
    pub fn new(
        code: String,
        host_id: Option<Uuid>,
        question_ids: Vec<Uuid>,
        settings: RoomSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            host_id,
            status: RoomStatus::Waiting,
            current_question_index: 0,
            settings,
            question_ids,
            question_started_at: None,
            created_at: clock::wire_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_code_shape() {
        for _ in 0..32 {
            let code = generate_room_code();
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code.bytes().all(|b| CODE_CHARS.contains(&b)));
        }
    }

    #[test]
    fn default_settings() {
        let settings = RoomSettings::default();
        assert_eq!(settings.time_limit_secs, 20);
        assert_eq!(settings.time_limit_ms(), 20_000);
        assert_eq!(settings.mode, GameMode::Solo);
    }

    #[test]
    fn new_room_starts_waiting_without_live_question() {
        let room = Room::new("ABC123".into(), None, vec![], RoomSettings::default());
        assert_eq!(room.status, RoomStatus::Waiting);
        assert_eq!(room.current_question_index, 0);
        assert!(room.question_started_at.is_none());
    }

    #[test]
    fn settings_keep_their_wire_spelling() {
        let json = serde_json::to_value(RoomSettings::default()).unwrap();
        assert_eq!(json["mode"], "solo");
        assert_eq!(json["difficulty"], "mixed");
        assert_eq!(json["score_reveal"], "each");

        let end: ScoreReveal = serde_json::from_value(serde_json::json!("end")).unwrap();
        assert_eq!(end, ScoreReveal::End);
    }
}
