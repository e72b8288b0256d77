use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Question difficulty; maps to the base score in the scoring engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Base score 100.
    Easy,
    /// Base score 200.
    Medium,
    /// Base score 300.
    Hard,
}

/// One selectable option of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    /// Option identifier; answers reference this.
    pub id: Uuid,
    /// Display text.
    pub text: String,
}

/// A quiz question. Read-only to the session engine and immutable for the
/// duration of a room's use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Primary key.
    pub id: Uuid,
    /// Question text.
    pub text: String,
    /// Ordered answer options.
    pub options: Vec<QuestionOption>,
    /// Identifier of the correct option.
    pub correct_option_id: Uuid,
    /// Difficulty bucket.
    pub difficulty: Difficulty,
    /// Optional topic tag.
    pub category: Option<String>,
    /// Optional provenance note from the question bank.
    pub source_info: Option<String>,
}
