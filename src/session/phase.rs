//! The per-client phase model replicated from the shared room record.
//!
//! Host and every player run this machine independently, driven purely by
//! observations of the room row, the local countdown and the local answer
//! action. There is no central session manager; cross-client consistency is
//! eventual, bounded by the synchronizer's freshness.

use serde::Serialize;
use thiserror::Error;

/// High-level phases a quiz session can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Waiting for the host to start the game or the first question.
    Lobby,
    /// A question countdown is running and answers are accepted.
    Playing,
    /// This client answered and is waiting for the others or the deadline.
    Answering,
    /// The question closed; correctness and scores may be revealed.
    Feedback,
    /// The game finished; final scoreboard. Terminal.
    Results,
}

/// Observations that drive the phase machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// An authoritative update shows a live, unexpired question. The
    /// synchronizer only emits this for a *new* (start stamp, index)
    /// composite, never for a repeat delivery of the same one.
    QuestionStarted,
    /// The local participant recorded an answer for the live question.
    AnswerSubmitted,
    /// The live question closed: the countdown expired or every participant
    /// has an answer on record.
    QuestionClosed,
    /// The room status moved to finished.
    GameFinished,
}

/// Error returned when an event cannot be applied from the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Phase the machine was in when the invalid event arrived.
    pub from: SessionPhase,
    /// Event that cannot be applied from that phase.
    pub event: SessionEvent,
}

/// State machine implementing the lobby → playing → feedback → results flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseMachine {
    phase: SessionPhase,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self { phase: SessionPhase::Lobby }
    }
}

impl PhaseMachine {
    /// Create a machine starting in the given phase, as derived from the
    /// first authoritative room fetch.
    pub fn new(initial: SessionPhase) -> Self {
        Self { phase: initial }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Apply an event, returning the phase entered.
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionPhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        Ok(next)
    }

    /// Compute the transition for an event if it is valid from the current phase.
    fn compute_transition(&self, event: SessionEvent) -> Result<SessionPhase, InvalidTransition> {
        use SessionEvent::*;
        use SessionPhase::*;

        let next = match (self.phase, event) {
            // a fresh question supersedes whatever the last one left behind
            (Lobby | Playing | Answering | Feedback, QuestionStarted) => Playing,
            (Playing, AnswerSubmitted) => Answering,
            (Playing | Answering, QuestionClosed) => Feedback,
            (Lobby | Playing | Answering | Feedback, GameFinished) => Results,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
