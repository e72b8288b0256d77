//! Error taxonomy for session operations.

use thiserror::Error;

use crate::{clock::ClockParseError, session::InvalidTransition, store::StoreError};

/// Errors surfaced by session construction and session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The room code does not resolve to any room. Terminal for the current
    /// navigation; no channels are started.
    #[error("room `{0}` not found")]
    RoomNotFound(String),
    /// The underlying store failed; the operation may be retried.
    #[error("store unavailable")]
    Store(#[from] StoreError),
    /// A server timestamp could not be parsed; the affected question fails
    /// toward expired instead of stalling the countdown.
    #[error("clock reconciliation failed")]
    Clock(#[from] ClockParseError),
    /// The room has an empty question set and cannot be started.
    #[error("room has no questions configured")]
    EmptyQuestionSet,
    /// The local participant row disappeared from the store.
    #[error("participant record not found")]
    NotParticipant,
    /// The operation is not valid in the current phase.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<InvalidTransition> for SessionError {
    fn from(err: InvalidTransition) -> Self {
        SessionError::InvalidState(err.to_string())
    }
}
