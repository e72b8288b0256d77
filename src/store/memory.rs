//! In-process backend implementing all three collaborator seams.
//!
//! Backs the demo binary and the test suite. The change feed runs on Tokio
//! broadcast channels; a silent-feed mode drops every notification so the
//! polling fallback can be exercised the way a flaky realtime channel would
//! force it to be in production.

use std::sync::Arc;

use dashmap::DashMap;
use futures::{FutureExt, StreamExt, future::BoxFuture, stream::BoxStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::{
    clock,
    model::{Answer, NewAnswer, Participant, Question, Room, RoomStatus},
    store::{
        ChangeFeed, EphemeralBroadcast, RoomEvent, RoomPatch, RoomStore, SessionBackend,
        StoreError, StoreResult,
    },
};

/// Capacity of each per-room change feed channel.
const FEED_CAPACITY: usize = 64;
/// Capacity of each ephemeral broadcast topic.
const TOPIC_CAPACITY: usize = 16;

/// In-memory implementation of the store, feed and broadcast seams.
#[derive(Clone)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

struct Inner {
    rooms: DashMap<Uuid, Room>,
    codes: DashMap<String, Uuid>,
    participants: DashMap<Uuid, Participant>,
    answers: DashMap<Uuid, Vec<Answer>>,
    questions: DashMap<Uuid, Question>,
    feeds: DashMap<Uuid, broadcast::Sender<RoomEvent>>,
    topics: DashMap<String, broadcast::Sender<u8>>,
    silent_feed: bool,
    server_stamping: bool,
}

impl InMemoryBackend {
    /// Backend with a working change feed and server-side stamping.
    pub fn new() -> Self {
        Self::build(false, true)
    }

    /// Backend whose change feed drops every notification, leaving sessions
    /// to survive on the polling fallback alone.
    pub fn with_silent_feed() -> Self {
        Self::build(true, true)
    }

    /// Backend without the server-side stamping operation, forcing the
    /// client-clock fallback on question starts.
    pub fn without_server_stamping() -> Self {
        Self::build(false, false)
    }

    fn build(silent_feed: bool, server_stamping: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                rooms: DashMap::new(),
                codes: DashMap::new(),
                participants: DashMap::new(),
                answers: DashMap::new(),
                questions: DashMap::new(),
                feeds: DashMap::new(),
                topics: DashMap::new(),
                silent_feed,
                server_stamping,
            }),
        }
    }

    /// Bundle this backend into the handles a session consumes.
    pub fn into_backend(self) -> SessionBackend {
        let store: Arc<dyn RoomStore> = Arc::new(self.clone());
        let feed: Arc<dyn ChangeFeed> = Arc::new(self.clone());
        let broadcast: Arc<dyn EphemeralBroadcast> = Arc::new(self);
        SessionBackend { store, feed, broadcast }
    }

    /// Delete a participant row, emitting the corresponding feed event.
    pub fn remove_participant(&self, id: Uuid) {
        if let Some((_, participant)) = self.inner.participants.remove(&id) {
            self.inner
                .emit(participant.room_id, RoomEvent::ParticipantLeft(id));
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn emit(&self, room_id: Uuid, event: RoomEvent) {
        if self.silent_feed {
            return;
        }
        if let Some(sender) = self.feeds.get(&room_id) {
            let _ = sender.send(event);
        }
    }

    fn feed_sender(&self, room_id: Uuid) -> broadcast::Sender<RoomEvent> {
        self.feeds
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .clone()
    }

    fn topic_sender(&self, topic: &str) -> broadcast::Sender<u8> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    fn missing_room(id: Uuid) -> StoreError {
        StoreError::unavailable(
            format!("room `{id}` disappeared"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "row missing"),
        )
    }
}

impl RoomStore for InMemoryBackend {
    fn create_room(&self, room: Room) -> BoxFuture<'static, StoreResult<Room>> {
        let inner = self.inner.clone();
        async move {
            inner.codes.insert(room.code.clone(), room.id);
            inner.rooms.insert(room.id, room.clone());
            Ok(room)
        }
        .boxed()
    }

    fn room_by_code(&self, code: &str) -> BoxFuture<'static, StoreResult<Option<Room>>> {
        let inner = self.inner.clone();
        let code = code.to_string();
        async move {
            let id = inner.codes.get(&code).map(|entry| *entry.value());
            Ok(id.and_then(|id| inner.rooms.get(&id).map(|entry| entry.clone())))
        }
        .boxed()
    }

    fn room_by_id(&self, id: Uuid) -> BoxFuture<'static, StoreResult<Option<Room>>> {
        let inner = self.inner.clone();
        async move { Ok(inner.rooms.get(&id).map(|entry| entry.clone())) }.boxed()
    }

    fn update_room(&self, id: Uuid, patch: RoomPatch) -> BoxFuture<'static, StoreResult<Room>> {
        let inner = self.inner.clone();
        async move {
            let updated = {
                let mut entry = inner.rooms.get_mut(&id).ok_or_else(|| Inner::missing_room(id))?;
                if let Some(status) = patch.status {
                    entry.status = status;
                }
                if let Some(index) = patch.current_question_index {
                    entry.current_question_index = index;
                }
                if let Some(stamp) = patch.question_started_at {
                    entry.question_started_at = stamp;
                }
                entry.clone()
            };
            inner.emit(id, RoomEvent::RoomUpdated(updated.clone()));
            Ok(updated)
        }
        .boxed()
    }

    fn start_question(
        &self,
        room_id: Uuid,
        question_index: u32,
    ) -> BoxFuture<'static, StoreResult<Room>> {
        let inner = self.inner.clone();
        async move {
            if !inner.server_stamping {
                return Err(StoreError::Unsupported("start_question".into()));
            }
            let updated = {
                let mut entry = inner
                    .rooms
                    .get_mut(&room_id)
                    .ok_or_else(|| Inner::missing_room(room_id))?;
                entry.status = RoomStatus::Active;
                entry.current_question_index = question_index;
                entry.question_started_at = Some(clock::wire_now());
                entry.clone()
            };
            inner.emit(room_id, RoomEvent::RoomUpdated(updated.clone()));
            Ok(updated)
        }
        .boxed()
    }

    fn upsert_participant(
        &self,
        participant: Participant,
    ) -> BoxFuture<'static, StoreResult<Participant>> {
        let inner = self.inner.clone();
        async move {
            let existing_id = participant.player_id.and_then(|player_id| {
                inner.participants.iter().find_map(|entry| {
                    (entry.room_id == participant.room_id && entry.player_id == Some(player_id))
                        .then_some(entry.id)
                })
            });

            match existing_id {
                Some(id) => {
                    // rejoin: refresh presence fields, keep score and streak
                    let updated = {
                        let mut entry = inner.participants.get_mut(&id).ok_or_else(|| {
                            StoreError::unavailable(
                                format!("participant `{id}` disappeared"),
                                std::io::Error::new(std::io::ErrorKind::NotFound, "row missing"),
                            )
                        })?;
                        entry.nickname = participant.nickname;
                        entry.avatar = participant.avatar;
                        entry.team = participant.team;
                        entry.last_active = participant.last_active;
                        entry.clone()
                    };
                    inner.emit(
                        updated.room_id,
                        RoomEvent::ParticipantUpdated(updated.clone()),
                    );
                    Ok(updated)
                }
                None => {
                    inner
                        .participants
                        .insert(participant.id, participant.clone());
                    inner.emit(
                        participant.room_id,
                        RoomEvent::ParticipantJoined(participant.clone()),
                    );
                    Ok(participant)
                }
            }
        }
        .boxed()
    }

    fn participants(&self, room_id: Uuid) -> BoxFuture<'static, StoreResult<Vec<Participant>>> {
        let inner = self.inner.clone();
        async move {
            let mut rows: Vec<Participant> = inner
                .participants
                .iter()
                .filter(|entry| entry.room_id == room_id)
                .map(|entry| entry.clone())
                .collect();
            rows.sort_by(|a, b| a.last_active.cmp(&b.last_active).then(a.id.cmp(&b.id)));
            Ok(rows)
        }
        .boxed()
    }

    fn participant(&self, id: Uuid) -> BoxFuture<'static, StoreResult<Option<Participant>>> {
        let inner = self.inner.clone();
        async move { Ok(inner.participants.get(&id).map(|entry| entry.clone())) }.boxed()
    }

    fn update_progress(
        &self,
        participant_id: Uuid,
        score: u32,
        streak: u32,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let inner = self.inner.clone();
        async move {
            let updated = {
                let mut entry = inner.participants.get_mut(&participant_id).ok_or_else(|| {
                    StoreError::unavailable(
                        format!("participant `{participant_id}` disappeared"),
                        std::io::Error::new(std::io::ErrorKind::NotFound, "row missing"),
                    )
                })?;
                entry.score = score;
                entry.streak = streak;
                entry.last_active = clock::wire_now();
                entry.clone()
            };
            inner.emit(
                updated.room_id,
                RoomEvent::ParticipantUpdated(updated),
            );
            Ok(())
        }
        .boxed()
    }

    fn insert_answer(&self, answer: NewAnswer) -> BoxFuture<'static, StoreResult<Answer>> {
        let inner = self.inner.clone();
        async move {
            let row = Answer {
                id: Uuid::new_v4(),
                room_id: answer.room_id,
                participant_id: answer.participant_id,
                question_id: answer.question_id,
                selected_option_id: answer.selected_option_id,
                is_correct: answer.is_correct,
                response_time_ms: answer.response_time_ms,
                points_earned: answer.points_earned,
                responded_at: clock::wire_now(),
            };
            inner.answers.entry(row.room_id).or_default().push(row.clone());
            inner.emit(
                row.room_id,
                RoomEvent::AnswerRecorded {
                    question_id: row.question_id,
                    participant_id: row.participant_id,
                },
            );
            Ok(row)
        }
        .boxed()
    }

    fn count_answers(
        &self,
        room_id: Uuid,
        question_id: Uuid,
    ) -> BoxFuture<'static, StoreResult<usize>> {
        let inner = self.inner.clone();
        async move {
            Ok(inner
                .answers
                .get(&room_id)
                .map(|rows| rows.iter().filter(|a| a.question_id == question_id).count())
                .unwrap_or(0))
        }
        .boxed()
    }

    fn questions(&self, ids: &[Uuid]) -> BoxFuture<'static, StoreResult<Vec<Question>>> {
        let inner = self.inner.clone();
        let ids = ids.to_vec();
        async move {
            Ok(ids
                .iter()
                .filter_map(|id| inner.questions.get(id).map(|entry| entry.clone()))
                .collect())
        }
        .boxed()
    }

    fn insert_question(&self, question: Question) -> BoxFuture<'static, StoreResult<()>> {
        let inner = self.inner.clone();
        async move {
            inner.questions.insert(question.id, question);
            Ok(())
        }
        .boxed()
    }
}

impl ChangeFeed for InMemoryBackend {
    fn subscribe(
        &self,
        room_id: Uuid,
    ) -> BoxFuture<'static, StoreResult<BoxStream<'static, RoomEvent>>> {
        let inner = self.inner.clone();
        async move {
            let receiver = inner.feed_sender(room_id).subscribe();
            // lagged receivers drop events, matching the best-effort contract
            Ok(BroadcastStream::new(receiver)
                .filter_map(|item| futures::future::ready(item.ok()))
                .boxed())
        }
        .boxed()
    }
}

impl EphemeralBroadcast for InMemoryBackend {
    fn publish(&self, topic: &str, value: u8) -> BoxFuture<'static, StoreResult<()>> {
        let inner = self.inner.clone();
        let topic = topic.to_string();
        async move {
            let _ = inner.topic_sender(&topic).send(value);
            Ok(())
        }
        .boxed()
    }

    fn subscribe(&self, topic: &str) -> BoxFuture<'static, StoreResult<BoxStream<'static, u8>>> {
        let inner = self.inner.clone();
        let topic = topic.to_string();
        async move {
            let receiver = inner.topic_sender(&topic).subscribe();
            Ok(BroadcastStream::new(receiver)
                .filter_map(|item| futures::future::ready(item.ok()))
                .boxed())
        }
        .boxed()
    }
}
