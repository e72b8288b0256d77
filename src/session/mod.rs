//! A live client session on one quiz room.
//!
//! [`GameSession`] replicates the shared room record into a local
//! [`SessionSnapshot`], runs the per-question countdown, accepts answer
//! submissions and exposes the host-side transitions. One session is one
//! client; host and players all use the same type, the host simply holds the
//! identity the room was created with.

pub mod phase;

mod host;
mod submit;
mod sync;

use std::{sync::Arc, time::Duration};

use futures::stream::BoxStream;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::{
    sync::{RwLock, watch},
    task::JoinHandle,
};
use uuid::Uuid;

pub use phase::{InvalidTransition, PhaseMachine, SessionEvent, SessionPhase};
pub use submit::SubmitOutcome;

use crate::{
    clock::{self, Countdown, TimerState},
    config::SyncConfig,
    error::SessionError,
    model::{Participant, Question, Room, RoomSettings, RoomStatus, ScoreReveal, Team,
        generate_room_code},
    store::SessionBackend,
};

/// Who is joining a room.
#[derive(Debug, Clone)]
pub struct JoinIdentity {
    /// Display nickname.
    pub nickname: String,
    /// Stable player identity, when authenticated. Rejoining with the same
    /// identity resumes the existing participant row, score included.
    pub player_id: Option<Uuid>,
    /// Team tag for team-mode rooms.
    pub team: Option<Team>,
    /// Avatar reference.
    pub avatar: Option<String>,
}

impl JoinIdentity {
    /// An anonymous identity with just a nickname.
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            player_id: None,
            team: None,
            avatar: None,
        }
    }

    /// Attach a stable player identity.
    pub fn with_player_id(mut self, player_id: Uuid) -> Self {
        self.player_id = Some(player_id);
        self
    }

    /// Attach a team tag.
    pub fn with_team(mut self, team: Team) -> Self {
        self.team = Some(team);
        self
    }
}

/// Consistent view of the session published to the application after every
/// state change.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Current phase of this client's replica.
    pub phase: SessionPhase,
    /// Latest known room record.
    pub room: Room,
    /// The question currently in play (or just played); `None` in the lobby.
    pub question: Option<Question>,
    /// Participants ordered by activity timestamp.
    pub participants: Vec<Participant>,
    /// Whether this client has an answer on record for the current question.
    pub answered: bool,
    /// Answers recorded so far for the current question, all participants
    /// together. Visible while answers are still coming in.
    pub answers_recorded: usize,
    /// Whether the correct option may be shown. Never true while answers are
    /// still being accepted.
    pub reveal_answer: bool,
    /// Whether cumulative scores may be shown, per the room's reveal policy.
    pub reveal_scores: bool,
}

/// Composite identity of one question run. A repeated index with a fresh
/// start stamp is a distinct run (the same question can never legally repeat,
/// but the stamp guards against stale deliveries regardless).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QuestionKey {
    pub started_at: String,
    pub index: u32,
}

/// The last room observation folded into the replica. Comparing incoming
/// rows against this is what makes event application idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AppliedKey {
    pub status: RoomStatus,
    pub index: u32,
    pub started_at: Option<String>,
}

impl AppliedKey {
    pub fn of(room: &Room) -> Self {
        Self {
            status: room.status,
            index: room.current_question_index,
            started_at: room.question_started_at.clone(),
        }
    }

    /// Nothing applied yet; the first real observation always differs.
    pub fn pristine() -> Self {
        Self {
            status: RoomStatus::Waiting,
            index: 0,
            started_at: None,
        }
    }

    pub fn question_key(&self) -> Option<QuestionKey> {
        self.started_at.as_ref().map(|started_at| QuestionKey {
            started_at: started_at.clone(),
            index: self.index,
        })
    }
}

/// Mutable replica state, guarded by the session lock.
pub(crate) struct SessionState {
    pub room: Room,
    pub machine: PhaseMachine,
    pub questions: IndexMap<Uuid, Question>,
    pub participants: Vec<Participant>,
    pub applied: AppliedKey,
    /// Key of the question run this client has answered, if any.
    pub answered: Option<QuestionKey>,
    /// Last observed answer count for the current question.
    pub answers_recorded: usize,
    /// Live countdown; `Some` exactly while the phase is playing or answering.
    pub countdown: Option<Countdown>,
}

impl SessionState {
    /// The question at the room's current index, if the index resolves.
    pub fn current_question(&self) -> Option<&Question> {
        let index = self.room.current_question_index as usize;
        let id = self.room.question_ids.get(index)?;
        self.questions.get(id)
    }
}

/// Everything shared between the session handle and its driver task.
pub(crate) struct SessionCore {
    pub backend: SessionBackend,
    pub config: SyncConfig,
    pub room_id: Uuid,
    pub participant_id: Uuid,
    pub player_id: Option<Uuid>,
    pub state: RwLock<SessionState>,
    pub snapshot_tx: watch::Sender<SessionSnapshot>,
    pub timer_tx: watch::Sender<Option<TimerState>>,
}

/// One client's live session on a room.
///
/// Dropping the session aborts its driver task; the participant row stays in
/// the store so the player can rejoin with the same identity.
pub struct GameSession {
    core: Arc<SessionCore>,
    driver: JoinHandle<()>,
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("room_id", &self.core.room_id)
            .field("participant_id", &self.core.participant_id)
            .finish_non_exhaustive()
    }
}

impl GameSession {
    /// Create a room and persist it. The creator still joins through
    /// [`GameSession::join`] like everyone else.
    pub async fn create_room(
        backend: &SessionBackend,
        host_id: Option<Uuid>,
        question_ids: Vec<Uuid>,
        settings: RoomSettings,
    ) -> Result<Room, SessionError> {
        let room = Room::new(generate_room_code(), host_id, question_ids, settings);
        Ok(backend.store.create_room(room).await?)
    }

    /// Join a room by code and start replicating it.
    ///
    /// Subscribes the change feed, registers (or resumes) the participant
    /// row, loads the question set, converges onto the room's current state
    /// and spawns the background driver.
    pub async fn join(
        backend: SessionBackend,
        config: SyncConfig,
        code: &str,
        identity: JoinIdentity,
    ) -> Result<Self, SessionError> {
        let room = backend
            .store
            .room_by_code(code)
            .await?
            .ok_or_else(|| SessionError::RoomNotFound(code.to_string()))?;

        let feed = backend.feed.subscribe(room.id).await?;

        let participant = backend
            .store
            .upsert_participant(Participant {
                id: Uuid::new_v4(),
                room_id: room.id,
                player_id: identity.player_id,
                nickname: identity.nickname,
                score: 0,
                streak: 0,
                team: identity.team,
                avatar: identity.avatar,
                last_active: clock::wire_now(),
            })
            .await?;

        let questions: IndexMap<Uuid, Question> = backend
            .store
            .questions(&room.question_ids)
            .await?
            .into_iter()
            .map(|question| (question.id, question))
            .collect();
        let participants = backend.store.participants(room.id).await?;

        let state = SessionState {
            room: room.clone(),
            machine: PhaseMachine::default(),
            questions,
            participants,
            applied: AppliedKey::pristine(),
            answered: None,
            answers_recorded: 0,
            countdown: None,
        };
        let (snapshot_tx, _) = watch::channel(sync::build_snapshot(&state));
        let (timer_tx, _) = watch::channel(None);

        let core = Arc::new(SessionCore {
            backend,
            config,
            room_id: room.id,
            participant_id: participant.id,
            player_id: participant.player_id,
            state: RwLock::new(state),
            snapshot_tx,
            timer_tx,
        });

        // fold in the state the room was already in before we subscribed
        sync::apply_room(&core, room).await;

        let driver = tokio::spawn(sync::run_driver(Arc::clone(&core), feed));

        Ok(Self { core, driver })
    }

    /// Identifier of this client's participant row.
    pub fn participant_id(&self) -> Uuid {
        self.core.participant_id
    }

    /// Identifier of the joined room.
    pub fn room_id(&self) -> Uuid {
        self.core.room_id
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.core.snapshot_tx.borrow().clone()
    }

    /// Watch handle notified on every snapshot change.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.core.snapshot_tx.subscribe()
    }

    /// Watch handle for the question countdown. Carries `None` outside a
    /// live question.
    pub fn timer(&self) -> watch::Receiver<Option<TimerState>> {
        self.core.timer_tx.subscribe()
    }

    /// Submit an answer for the current question.
    ///
    /// At most one submission per participant and question is accepted; a
    /// repeat returns [`SubmitOutcome::Duplicate`] and a submission after
    /// the question closed returns [`SubmitOutcome::Closed`].
    pub async fn submit_answer(
        &self,
        selected_option_id: Uuid,
    ) -> Result<SubmitOutcome, SessionError> {
        submit::submit(&self.core, Some(selected_option_id)).await
    }

    /// Record that the deadline passed without a selection, so the question's
    /// answer coverage still completes. Idempotent per question.
    pub async fn record_timeout(&self) -> Result<SubmitOutcome, SessionError> {
        submit::submit(&self.core, None).await
    }

    /// Host only: run the pre-game countdown and start the first question.
    pub async fn start_game(&self) -> Result<(), SessionError> {
        host::start_game(&self.core).await
    }

    /// Host only: advance to the next question, or finish the game when the
    /// set is exhausted. Returns `true` when a new question started.
    pub async fn next_question(&self) -> Result<bool, SessionError> {
        host::next_question(&self.core).await
    }

    /// Host only: finish the game immediately.
    pub async fn end_game(&self) -> Result<(), SessionError> {
        host::end_game(&self.core).await
    }

    /// Subscribe to the cosmetic pre-game countdown ticks (3 down to 0).
    /// Redundant deliveries of the same value are collapsed.
    pub async fn pregame_ticks(&self) -> Result<BoxStream<'static, u8>, SessionError> {
        host::pregame_ticks(&self.core).await
    }

    /// Answer window configured for this room.
    pub async fn time_limit(&self) -> Duration {
        let state = self.core.state.read().await;
        Duration::from_secs(u64::from(state.room.settings.time_limit_secs))
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Whether this snapshot may reveal cumulative scores.
pub(crate) fn scores_revealed(settings_reveal: ScoreReveal, phase: SessionPhase) -> bool {
    match settings_reveal {
        ScoreReveal::EachQuestion => {
            matches!(phase, SessionPhase::Feedback | SessionPhase::Results)
        }
        ScoreReveal::End => phase == SessionPhase::Results,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;
    use uuid::Uuid;

    use super::*;
    use crate::{
        model::{Difficulty, GameMode, Question, QuestionOption, RoomSettings, Team, team_totals},
        store::memory::InMemoryBackend,
    };

    fn fast_config() -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_millis(50),
            countdown_tick: Duration::from_millis(20),
            pregame_grace: Duration::from_millis(5),
            pregame_repeats: 2,
            pregame_stagger: Duration::from_millis(1),
            pregame_step: Duration::from_millis(5),
        }
    }

    fn question(difficulty: Difficulty, correct_text: &str, wrong_text: &str) -> Question {
        let correct = QuestionOption { id: Uuid::new_v4(), text: correct_text.into() };
        let wrong = QuestionOption { id: Uuid::new_v4(), text: wrong_text.into() };
        Question {
            id: Uuid::new_v4(),
            correct_option_id: correct.id,
            text: format!("{correct_text}?"),
            options: vec![correct, wrong],
            difficulty,
            category: None,
            source_info: None,
        }
    }

    async fn seed_room(
        backend: &InMemoryBackend,
        questions: Vec<Question>,
        settings: RoomSettings,
    ) -> Room {
        let bundle = backend.clone().into_backend();
        let mut ids = Vec::new();
        for q in questions {
            ids.push(q.id);
            bundle.store.insert_question(q).await.unwrap();
        }
        GameSession::create_room(&bundle, Some(Uuid::new_v4()), ids, settings)
            .await
            .unwrap()
    }

    async fn join(backend: &InMemoryBackend, code: &str, nickname: &str) -> GameSession {
        GameSession::join(
            backend.clone().into_backend(),
            fast_config(),
            code,
            JoinIdentity::new(nickname),
        )
        .await
        .unwrap()
    }

    async fn wait_for_phase(session: &GameSession, phase: SessionPhase) {
        let mut rx = session.watch();
        let reached = timeout(Duration::from_secs(5), async {
            loop {
                if rx.borrow_and_update().phase == phase {
                    return;
                }
                rx.changed().await.expect("session driver gone");
            }
        })
        .await;
        assert!(reached.is_ok(), "session never reached {phase:?}");
    }

    fn correct_option(snapshot: &SessionSnapshot) -> Uuid {
        snapshot.question.as_ref().expect("question in play").correct_option_id
    }

    fn wrong_option(snapshot: &SessionSnapshot) -> Uuid {
        let question = snapshot.question.as_ref().expect("question in play");
        question
            .options
            .iter()
            .map(|option| option.id)
            .find(|id| *id != question.correct_option_id)
            .expect("question has a wrong option")
    }

    #[tokio::test]
    async fn join_with_unknown_code_fails_without_side_effects() {
        let backend = InMemoryBackend::new();
        let err = GameSession::join(
            backend.into_backend(),
            fast_config(),
            "ZZZZZZ",
            JoinIdentity::new("ghost"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::RoomNotFound(code) if code == "ZZZZZZ"));
    }

    #[tokio::test]
    async fn full_game_runs_from_lobby_to_results() {
        let backend = InMemoryBackend::new();
        let room = seed_room(
            &backend,
            vec![
                question(Difficulty::Medium, "two", "three"),
                question(Difficulty::Easy, "four", "five"),
            ],
            RoomSettings { time_limit_secs: 30, ..RoomSettings::default() },
        )
        .await;

        let hosting = join(&backend, &room.code, "host").await;
        let playing = join(&backend, &room.code, "guest").await;
        assert_eq!(hosting.snapshot().phase, SessionPhase::Lobby);

        hosting.start_game().await.unwrap();
        wait_for_phase(&hosting, SessionPhase::Playing).await;
        wait_for_phase(&playing, SessionPhase::Playing).await;
        assert!(!hosting.snapshot().reveal_answer);

        // an instant correct medium answer scores 300 (base 200 x 1.5 speed)
        let option = correct_option(&playing.snapshot());
        let outcome = playing.submit_answer(option).await.unwrap();
        match outcome {
            SubmitOutcome::Accepted { correct, breakdown } => {
                assert!(correct);
                let breakdown = breakdown.expect("correct answers carry a breakdown");
                assert_eq!(breakdown.base_score, 200);
                assert_eq!(breakdown.streak, 1);
            }
            other => panic!("expected acceptance, got {other:?}"),
        }

        // the host competes too; full coverage closes the question early
        let option = correct_option(&hosting.snapshot());
        hosting.submit_answer(option).await.unwrap();
        wait_for_phase(&hosting, SessionPhase::Feedback).await;
        wait_for_phase(&playing, SessionPhase::Feedback).await;
        assert!(hosting.snapshot().reveal_answer);

        assert!(hosting.next_question().await.unwrap());
        wait_for_phase(&playing, SessionPhase::Playing).await;
        assert_eq!(
            playing.snapshot().room.current_question_index,
            1,
            "second question in play"
        );

        // both miss: scores keep standing, streaks reset
        let option = wrong_option(&playing.snapshot());
        playing.submit_answer(option).await.unwrap();
        let option = wrong_option(&hosting.snapshot());
        hosting.submit_answer(option).await.unwrap();
        wait_for_phase(&hosting, SessionPhase::Feedback).await;

        assert!(!hosting.next_question().await.unwrap(), "question set exhausted");
        wait_for_phase(&hosting, SessionPhase::Results).await;
        wait_for_phase(&playing, SessionPhase::Results).await;

        let snapshot = playing.snapshot();
        assert!(snapshot.reveal_scores);
        let guest = snapshot
            .participants
            .iter()
            .find(|p| p.nickname == "guest")
            .unwrap();
        assert!(guest.score >= 200, "correct answer persisted: {}", guest.score);
        assert_eq!(guest.streak, 0, "miss reset the streak");
    }

    #[tokio::test]
    async fn team_mode_totals_follow_individual_scores() {
        let backend = InMemoryBackend::new();
        let room = seed_room(
            &backend,
            vec![question(Difficulty::Easy, "up", "down")],
            RoomSettings {
                time_limit_secs: 30,
                mode: GameMode::Teams,
                ..RoomSettings::default()
            },
        )
        .await;

        let red = GameSession::join(
            backend.clone().into_backend(),
            fast_config(),
            &room.code,
            JoinIdentity::new("scarlet").with_team(Team::Red),
        )
        .await
        .unwrap();
        let blue = GameSession::join(
            backend.clone().into_backend(),
            fast_config(),
            &room.code,
            JoinIdentity::new("azure").with_team(Team::Blue),
        )
        .await
        .unwrap();

        red.start_game().await.unwrap();
        wait_for_phase(&red, SessionPhase::Playing).await;
        wait_for_phase(&blue, SessionPhase::Playing).await;

        red.submit_answer(correct_option(&red.snapshot())).await.unwrap();
        blue.submit_answer(wrong_option(&blue.snapshot())).await.unwrap();
        wait_for_phase(&red, SessionPhase::Feedback).await;

        assert!(!red.next_question().await.unwrap());
        wait_for_phase(&blue, SessionPhase::Results).await;

        let snapshot = blue.snapshot();
        let scarlet = snapshot
            .participants
            .iter()
            .find(|p| p.nickname == "scarlet")
            .unwrap();
        let (red_total, blue_total) = team_totals(&snapshot.participants);
        assert_eq!(red_total, scarlet.score, "red team carries the only scorer");
        assert_eq!(blue_total, 0, "a miss leaves the blue total untouched");
        assert!(red_total > 0);
    }

    #[tokio::test]
    async fn full_answer_coverage_stops_the_timer_early() {
        let backend = InMemoryBackend::new();
        let room = seed_room(
            &backend,
            vec![question(Difficulty::Easy, "yes", "no")],
            RoomSettings { time_limit_secs: 30, ..RoomSettings::default() },
        )
        .await;

        let hosting = join(&backend, &room.code, "host").await;
        let playing = join(&backend, &room.code, "guest").await;
        hosting.start_game().await.unwrap();
        wait_for_phase(&playing, SessionPhase::Playing).await;

        let option = correct_option(&playing.snapshot());
        playing.submit_answer(option).await.unwrap();
        let option = wrong_option(&hosting.snapshot());
        hosting.submit_answer(option).await.unwrap();

        wait_for_phase(&playing, SessionPhase::Feedback).await;
        // closed by coverage, not by the deadline: no expired timer published
        assert!(playing.timer().borrow().is_none());
        let closed = hosting.snapshot();
        assert!(closed.reveal_answer);
        assert_eq!(closed.answers_recorded, 2);
    }

    #[tokio::test]
    async fn second_submission_for_the_same_question_is_rejected() {
        let backend = InMemoryBackend::new();
        let room = seed_room(
            &backend,
            vec![question(Difficulty::Hard, "left", "right")],
            RoomSettings { time_limit_secs: 30, ..RoomSettings::default() },
        )
        .await;

        let hosting = join(&backend, &room.code, "host").await;
        hosting.start_game().await.unwrap();
        wait_for_phase(&hosting, SessionPhase::Playing).await;

        let snapshot = hosting.snapshot();
        let question_id = snapshot.question.as_ref().unwrap().id;
        let option = correct_option(&snapshot);
        let first = hosting.submit_answer(option).await.unwrap();
        assert!(matches!(first, SubmitOutcome::Accepted { correct: true, .. }));

        let second = hosting.submit_answer(option).await.unwrap();
        assert!(matches!(second, SubmitOutcome::Duplicate));

        let bundle = backend.into_backend();
        let recorded = bundle
            .store
            .count_answers(room.id, question_id)
            .await
            .unwrap();
        assert_eq!(recorded, 1, "duplicate submission reached the store");
    }

    #[tokio::test]
    async fn repeated_room_delivery_does_not_restart_the_question() {
        let backend = InMemoryBackend::new();
        let room = seed_room(
            &backend,
            vec![
                question(Difficulty::Easy, "a", "b"),
                question(Difficulty::Easy, "c", "d"),
            ],
            RoomSettings { time_limit_secs: 30, ..RoomSettings::default() },
        )
        .await;

        let hosting = join(&backend, &room.code, "host").await;
        // a second participant keeps answer coverage incomplete
        let _watching = join(&backend, &room.code, "guest").await;
        hosting.start_game().await.unwrap();
        wait_for_phase(&hosting, SessionPhase::Playing).await;

        let option = correct_option(&hosting.snapshot());
        hosting.submit_answer(option).await.unwrap();
        let mut rx = hosting.watch();
        assert_eq!(rx.borrow_and_update().phase, SessionPhase::Answering);

        // a no-op write re-emits the row with an unchanged start composite
        let bundle = backend.into_backend();
        bundle
            .store
            .update_room(room.id, crate::store::RoomPatch::default())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            hosting.snapshot().phase,
            SessionPhase::Answering,
            "repeat delivery restarted the question"
        );
    }

    #[tokio::test]
    async fn silent_feed_converges_through_polling() {
        let backend = InMemoryBackend::with_silent_feed();
        let room = seed_room(
            &backend,
            vec![question(Difficulty::Easy, "p", "q")],
            RoomSettings { time_limit_secs: 30, ..RoomSettings::default() },
        )
        .await;

        let hosting = join(&backend, &room.code, "host").await;
        let playing = join(&backend, &room.code, "guest").await;

        hosting.start_game().await.unwrap();
        // the host converges locally on its own write; the player only has
        // the poll loop
        wait_for_phase(&playing, SessionPhase::Playing).await;
    }

    #[tokio::test]
    async fn store_score_overwrites_the_local_value() {
        let backend = InMemoryBackend::new();
        let room = seed_room(
            &backend,
            vec![question(Difficulty::Easy, "x", "y")],
            RoomSettings::default(),
        )
        .await;

        let hosting = join(&backend, &room.code, "host").await;
        let bundle = backend.into_backend();
        bundle
            .store
            .update_progress(hosting.participant_id(), 999, 3)
            .await
            .unwrap();

        let mut rx = hosting.watch();
        let healed = timeout(Duration::from_secs(5), async {
            loop {
                let seen = rx
                    .borrow_and_update()
                    .participants
                    .iter()
                    .any(|p| p.id == hosting.participant_id() && p.score == 999);
                if seen {
                    return;
                }
                rx.changed().await.expect("session driver gone");
            }
        })
        .await;
        assert!(healed.is_ok(), "store-side score never reached the snapshot");
    }

    #[tokio::test]
    async fn timeout_is_recorded_once_after_expiry() {
        let backend = InMemoryBackend::new();
        let room = seed_room(
            &backend,
            vec![question(Difficulty::Easy, "m", "n")],
            RoomSettings { time_limit_secs: 1, ..RoomSettings::default() },
        )
        .await;

        let hosting = join(&backend, &room.code, "host").await;
        hosting.start_game().await.unwrap();
        wait_for_phase(&hosting, SessionPhase::Playing).await;
        let question_id = hosting.snapshot().question.as_ref().unwrap().id;

        // let the 1-second window lapse without answering
        wait_for_phase(&hosting, SessionPhase::Feedback).await;

        let first = hosting.record_timeout().await.unwrap();
        assert!(matches!(first, SubmitOutcome::Accepted { correct: false, breakdown: None }));
        let second = hosting.record_timeout().await.unwrap();
        assert!(matches!(second, SubmitOutcome::Duplicate));

        let bundle = backend.into_backend();
        assert_eq!(
            bundle.store.count_answers(room.id, question_id).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn question_start_falls_back_to_the_client_clock() {
        let backend = InMemoryBackend::without_server_stamping();
        let room = seed_room(
            &backend,
            vec![question(Difficulty::Easy, "u", "v")],
            RoomSettings { time_limit_secs: 30, ..RoomSettings::default() },
        )
        .await;

        let hosting = join(&backend, &room.code, "host").await;
        hosting.start_game().await.unwrap();
        wait_for_phase(&hosting, SessionPhase::Playing).await;

        let snapshot = hosting.snapshot();
        let stamp = snapshot
            .room
            .question_started_at
            .as_deref()
            .expect("fallback stamped the question start");
        assert!(clock::normalize_timestamp(stamp).is_ok());
    }

    #[tokio::test]
    async fn players_receive_the_pregame_countdown() {
        use futures::StreamExt;

        let backend = InMemoryBackend::new();
        let room = seed_room(
            &backend,
            vec![question(Difficulty::Easy, "r", "s")],
            RoomSettings { time_limit_secs: 30, ..RoomSettings::default() },
        )
        .await;

        let hosting = join(&backend, &room.code, "host").await;
        let playing = join(&backend, &room.code, "guest").await;
        let mut ticks = playing.pregame_ticks().await.unwrap();

        hosting.start_game().await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            let tick = timeout(Duration::from_secs(2), ticks.next())
                .await
                .expect("countdown tick missing")
                .expect("countdown stream ended");
            seen.push(tick);
        }
        assert_eq!(seen, vec![3, 2, 1, 0]);
    }

    #[tokio::test]
    async fn starting_from_the_wrong_phase_is_rejected() {
        let backend = InMemoryBackend::new();
        let room = seed_room(
            &backend,
            vec![question(Difficulty::Easy, "g", "h")],
            RoomSettings { time_limit_secs: 30, ..RoomSettings::default() },
        )
        .await;

        let hosting = join(&backend, &room.code, "host").await;
        let err = hosting.next_question().await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));

        hosting.start_game().await.unwrap();
        wait_for_phase(&hosting, SessionPhase::Playing).await;
        let err = hosting.start_game().await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
    }
}
