//! Domain records shared between the session engine and its collaborators.
//!
//! These mirror the rows of the durable store: the engine never owns them, it
//! only observes and appends to them through the `store` traits.

mod answer;
mod participant;
mod question;
mod room;

pub use answer::{Answer, NewAnswer};
pub use participant::{Participant, Team, team_totals};
pub use question::{Difficulty, Question, QuestionOption};
pub use room::{
    DifficultyFilter, GameMode, ROOM_CODE_LEN, Room, RoomSettings, RoomStatus, ScoreReveal,
    generate_room_code,
};
