//! Collaborator seams: the durable store, the change-notification feed and
//! the ephemeral broadcast channel.
//!
//! The engine implements none of these; it only consumes them through the
//! traits below. `memory` provides an in-process backend for the demo binary
//! and the test suite.

pub mod memory;

use std::{error::Error, sync::Arc};

use futures::{future::BoxFuture, stream::BoxStream};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Answer, NewAnswer, Participant, Question, Room, RoomStatus};

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error raised by store backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not be reached or failed mid-operation.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Human-readable description of the failing operation.
        message: String,
        /// Underlying backend failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The backend does not implement the requested operation.
    #[error("store operation unsupported: {0}")]
    Unsupported(String),
}

impl StoreError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        StoreError::Unavailable {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

/// Partial update applied to a room row; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RoomPatch {
    /// New lifecycle status.
    pub status: Option<RoomStatus>,
    /// New current question index.
    pub current_question_index: Option<u32>,
    /// New question start stamp; `Some(None)` clears it.
    pub question_started_at: Option<Option<String>>,
}

/// Durable storage for rooms, participants, answers and questions.
///
/// Backends must support equality-filtered reads and ordering participants by
/// their activity timestamp. All methods are asynchronous and object-safe.
pub trait RoomStore: Send + Sync {
    /// Persist a freshly created room.
    fn create_room(&self, room: Room) -> BoxFuture<'static, StoreResult<Room>>;
    /// Resolve a room by its join code.
    fn room_by_code(&self, code: &str) -> BoxFuture<'static, StoreResult<Option<Room>>>;
    /// Fetch a room by id.
    fn room_by_id(&self, id: Uuid) -> BoxFuture<'static, StoreResult<Option<Room>>>;
    /// Apply a partial update to a room and return the updated row.
    fn update_room(&self, id: Uuid, patch: RoomPatch)
    -> BoxFuture<'static, StoreResult<Room>>;
    /// Atomically activate the room, set the question index and stamp
    /// `question_started_at` with the *store's* clock.
    ///
    /// Backends without server-side stamping return [`StoreError::Unsupported`];
    /// callers then fall back to a client-stamped [`RoomStore::update_room`].
    fn start_question(
        &self,
        room_id: Uuid,
        question_index: u32,
    ) -> BoxFuture<'static, StoreResult<Room>>;
    /// Insert or refresh a participant row, keyed by (room, player identity)
    /// when an identity is present. Score and streak survive a rejoin.
    fn upsert_participant(
        &self,
        participant: Participant,
    ) -> BoxFuture<'static, StoreResult<Participant>>;
    /// List a room's participants ordered by their activity timestamp.
    fn participants(&self, room_id: Uuid) -> BoxFuture<'static, StoreResult<Vec<Participant>>>;
    /// Fetch a single participant row.
    fn participant(&self, id: Uuid) -> BoxFuture<'static, StoreResult<Option<Participant>>>;
    /// Overwrite a participant's score and streak.
    fn update_progress(
        &self,
        participant_id: Uuid,
        score: u32,
        streak: u32,
    ) -> BoxFuture<'static, StoreResult<()>>;
    /// Append an answer row; the store assigns id and timestamp.
    fn insert_answer(&self, answer: NewAnswer) -> BoxFuture<'static, StoreResult<Answer>>;
    /// Count answers recorded for one question of one room.
    fn count_answers(
        &self,
        room_id: Uuid,
        question_id: Uuid,
    ) -> BoxFuture<'static, StoreResult<usize>>;
    /// Fetch questions by id; missing ids are silently omitted.
    fn questions(&self, ids: &[Uuid]) -> BoxFuture<'static, StoreResult<Vec<Question>>>;
    /// Add a question to the bank (room setup tooling, not the session path).
    fn insert_question(&self, question: Question) -> BoxFuture<'static, StoreResult<()>>;
}

/// A change observed on the durable store, scoped to one room.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// The room row changed.
    RoomUpdated(Room),
    /// A participant joined the room.
    ParticipantJoined(Participant),
    /// A participant row changed (score, streak, activity).
    ParticipantUpdated(Participant),
    /// A participant row was deleted.
    ParticipantLeft(Uuid),
    /// An answer row was appended for the given question.
    AnswerRecorded {
        /// Question the answer belongs to.
        question_id: Uuid,
        /// Participant who answered.
        participant_id: Uuid,
    },
}

/// Best-effort change notifications scoped to a room.
///
/// Delivery may silently drop under load. Consumers pair this with polling
/// and apply every event idempotently; nothing may depend on completeness.
pub trait ChangeFeed: Send + Sync {
    /// Subscribe to changes affecting one room.
    fn subscribe(&self, room_id: Uuid)
    -> BoxFuture<'static, StoreResult<BoxStream<'static, RoomEvent>>>;
}

/// Transient fan-out channel with no persistence and no delivery guarantee.
///
/// Used solely for the cosmetic pre-game countdown; the authoritative game
/// start never depends on it.
pub trait EphemeralBroadcast: Send + Sync {
    /// Publish a tick value on a named topic.
    fn publish(&self, topic: &str, value: u8) -> BoxFuture<'static, StoreResult<()>>;
    /// Subscribe to tick values on a named topic.
    fn subscribe(&self, topic: &str) -> BoxFuture<'static, StoreResult<BoxStream<'static, u8>>>;
}

/// Bundle of the collaborator handles one session needs.
#[derive(Clone)]
pub struct SessionBackend {
    /// Durable store.
    pub store: Arc<dyn RoomStore>,
    /// Change-notification feed.
    pub feed: Arc<dyn ChangeFeed>,
    /// Ephemeral broadcast channel.
    pub broadcast: Arc<dyn EphemeralBroadcast>,
}
