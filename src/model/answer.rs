use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only record of one participant's answer to one question.
///
/// At most one row exists per (room, participant, question); the submission
/// pipeline enforces this, not the record itself. Never mutated or deleted
/// within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// Primary key.
    pub id: Uuid,
    /// Room the answer was given in.
    pub room_id: Uuid,
    /// Answering participant.
    pub participant_id: Uuid,
    /// Question answered.
    pub question_id: Uuid,
    /// Selected option; `None` means the deadline passed without a selection.
    pub selected_option_id: Option<Uuid>,
    /// Whether the selection matched the correct option.
    pub is_correct: bool,
    /// Latency between the reconciled question start and the submission.
    pub response_time_ms: u64,
    /// Points awarded; 0 for incorrect or timed-out answers.
    pub points_earned: u32,
    /// Creation timestamp in the store's wire format.
    pub responded_at: String,
}

/// Fields supplied by the submission pipeline when appending an answer; the
/// store assigns the id and creation timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAnswer {
    /// Room the answer was given in.
    pub room_id: Uuid,
    /// Answering participant.
    pub participant_id: Uuid,
    /// Question answered.
    pub question_id: Uuid,
    /// Selected option; `None` records a timeout.
    pub selected_option_id: Option<Uuid>,
    /// Whether the selection matched the correct option.
    pub is_correct: bool,
    /// Latency between the reconciled question start and the submission.
    pub response_time_ms: u64,
    /// Points awarded.
    pub points_earned: u32,
}
