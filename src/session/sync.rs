//! Dual-channel synchronization: change-feed events plus a polling fallback,
//! folded through one idempotent reducer.
//!
//! Every piece of room state may arrive twice (push and poll) and in any
//! interleaving. [`apply_room`] therefore compares each incoming row against
//! the last applied observation and only acts on genuine changes, so repeat
//! deliveries and push/poll races are harmless by construction.

use std::{sync::Arc, time::Duration};

use futures::{StreamExt, stream::BoxStream};
use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    clock::{Countdown, TimerState},
    model::{Participant, Room, RoomStatus},
    store::RoomEvent,
};

use super::{
    AppliedKey, QuestionKey, SessionCore, SessionEvent, SessionPhase, SessionSnapshot,
    SessionState, scores_revealed,
};

/// Background task keeping one session's replica converged.
///
/// Runs until aborted by the owning [`super::GameSession`]. The feed stream
/// ending is survivable; the poll loop alone still converges, just with
/// poll-interval freshness.
pub(crate) async fn run_driver(core: Arc<SessionCore>, mut feed: BoxStream<'static, RoomEvent>) {
    let mut poll = interval(core.config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick fires immediately; join already converged
    poll.tick().await;

    let mut feed_open = true;
    let mut timer_rx: Option<watch::Receiver<TimerState>> = None;

    loop {
        refresh_timer_handle(&core, &mut timer_rx).await;

        tokio::select! {
            event = feed.next(), if feed_open => match event {
                Some(event) => handle_event(&core, event).await,
                None => {
                    warn!(room = %core.room_id, "change feed ended, polling only");
                    feed_open = false;
                }
            },
            _ = poll.tick() => poll_once(&core).await,
            signal = next_timer_signal(timer_rx.as_mut()) => match signal {
                TimerSignal::Tick(state) => {
                    core.timer_tx.send_replace(Some(state));
                    if state.expired {
                        close_question(&core, true).await;
                    }
                }
                TimerSignal::Ended(last) => {
                    if last.expired {
                        close_question(&core, true).await;
                    }
                    timer_rx = None;
                }
            },
        }
    }
}

/// Keep the held timer receiver pointing at the current countdown without
/// resetting its seen-version, which would make `changed()` fire spuriously.
async fn refresh_timer_handle(
    core: &SessionCore,
    held: &mut Option<watch::Receiver<TimerState>>,
) {
    let current = core
        .state
        .read()
        .await
        .countdown
        .as_ref()
        .map(|countdown| countdown.watch());

    let keep = match (held.as_ref(), current.as_ref()) {
        (Some(h), Some(c)) => h.same_channel(c),
        (None, None) => true,
        _ => false,
    };
    if !keep {
        *held = current.map(|mut rx| {
            rx.mark_unchanged();
            rx
        });
    }
}

enum TimerSignal {
    /// The countdown published a new state.
    Tick(TimerState),
    /// The countdown's ticker ended; carries the final published state.
    Ended(TimerState),
}

/// Await the next countdown tick, or forever when no countdown is live.
async fn next_timer_signal(rx: Option<&mut watch::Receiver<TimerState>>) -> TimerSignal {
    match rx {
        None => std::future::pending().await,
        Some(rx) => match rx.changed().await {
            Ok(()) => TimerSignal::Tick(*rx.borrow_and_update()),
            Err(_) => TimerSignal::Ended(*rx.borrow()),
        },
    }
}

/// Fold one change-feed event into the replica.
pub(crate) async fn handle_event(core: &Arc<SessionCore>, event: RoomEvent) {
    match event {
        RoomEvent::RoomUpdated(room) => apply_room(core, room).await,
        RoomEvent::ParticipantJoined(participant)
        | RoomEvent::ParticipantUpdated(participant) => {
            upsert_participant(core, participant).await;
            check_coverage(core).await;
        }
        RoomEvent::ParticipantLeft(id) => {
            remove_participant(core, id).await;
            // a departure can complete coverage for everyone left
            check_coverage(core).await;
        }
        RoomEvent::AnswerRecorded { question_id, participant_id } => {
            debug!(room = %core.room_id, %question_id, %participant_id, "answer recorded");
            check_coverage(core).await;
        }
    }
}

/// Polling fallback: re-fetch the room and participant list and fold both in.
pub(crate) async fn poll_once(core: &Arc<SessionCore>) {
    match core.backend.store.room_by_id(core.room_id).await {
        Ok(Some(room)) => apply_room(core, room).await,
        Ok(None) => warn!(room = %core.room_id, "room row disappeared"),
        Err(err) => warn!(room = %core.room_id, error = %err, "room poll failed"),
    }

    match core.backend.store.participants(core.room_id).await {
        Ok(participants) => replace_participants(core, participants).await,
        Err(err) => warn!(room = %core.room_id, error = %err, "participant poll failed"),
    }

    // an AnswerRecorded notification may have been dropped
    check_coverage(core).await;
}

/// Idempotent reducer for room observations, shared by the feed path, the
/// poll path and the host's local write-through.
pub(crate) async fn apply_room(core: &Arc<SessionCore>, room: Room) {
    let mut state = core.state.write().await;
    if state.machine.phase() == SessionPhase::Results {
        return;
    }

    let previous = state.applied.clone();
    let incoming = AppliedKey::of(&room);
    let row_changed = state.room != room;
    state.room = room;
    state.applied = incoming.clone();

    match incoming.status {
        RoomStatus::Finished => {
            finish_locked(core, &mut state);
            publish(core, &state);
            return;
        }
        RoomStatus::Active => {
            if let Some(key) = incoming.question_key()
                && previous.question_key().as_ref() != Some(&key)
            {
                begin_question(core, &mut state, key);
                publish(core, &state);
                return;
            }
        }
        RoomStatus::Waiting => {}
    }

    if row_changed {
        publish(core, &state);
    }
}

/// Enter the playing phase for a newly observed question run.
///
/// A start stamp whose window has already fully elapsed (rejoin after the
/// deadline) lands directly in feedback; an unparsable stamp fails the same
/// direction rather than stalling the session on a timer that never ends.
fn begin_question(core: &SessionCore, state: &mut SessionState, key: QuestionKey) {
    state.answered = None;
    state.answers_recorded = 0;
    state.countdown = None;

    let time_limit = Duration::from_secs(u64::from(state.room.settings.time_limit_secs));
    let countdown = match Countdown::start(&key.started_at, time_limit, core.config.countdown_tick)
    {
        Ok(countdown) => countdown,
        Err(err) => {
            error!(room = %core.room_id, error = %err, "treating question as expired");
            apply_machine(state, SessionEvent::QuestionStarted);
            apply_machine(state, SessionEvent::QuestionClosed);
            core.timer_tx.send_replace(Some(TimerState::expired()));
            return;
        }
    };

    apply_machine(state, SessionEvent::QuestionStarted);
    let initial = countdown.state();
    if initial.expired {
        apply_machine(state, SessionEvent::QuestionClosed);
        core.timer_tx.send_replace(Some(initial));
        return;
    }

    core.timer_tx.send_replace(Some(initial));
    state.countdown = Some(countdown);
}

/// Close the live question, either on deadline expiry or on full coverage.
pub(crate) async fn close_question(core: &Arc<SessionCore>, expired: bool) {
    let mut state = core.state.write().await;
    if close_question_locked(core, &mut state, expired) {
        publish(core, &state);
    }
}

/// Lock-held close; returns whether a transition actually happened.
pub(crate) fn close_question_locked(
    core: &SessionCore,
    state: &mut SessionState,
    expired: bool,
) -> bool {
    if !matches!(
        state.machine.phase(),
        SessionPhase::Playing | SessionPhase::Answering
    ) {
        return false;
    }

    if let Some(countdown) = state.countdown.as_mut() {
        countdown.stop();
    }
    state.countdown = None;
    apply_machine(state, SessionEvent::QuestionClosed);
    core.timer_tx
        .send_replace(expired.then(TimerState::expired));
    true
}

/// End the game locally: drop any countdown and enter results.
fn finish_locked(core: &SessionCore, state: &mut SessionState) {
    if let Some(countdown) = state.countdown.as_mut() {
        countdown.stop();
    }
    state.countdown = None;
    core.timer_tx.send_replace(None);
    apply_machine(state, SessionEvent::GameFinished);
}

/// Close the question once every current participant has an answer on record.
pub(crate) async fn check_coverage(core: &Arc<SessionCore>) {
    let (question_id, participant_count) = {
        let state = core.state.read().await;
        if !matches!(
            state.machine.phase(),
            SessionPhase::Playing | SessionPhase::Answering
        ) {
            return;
        }
        let Some(question) = state.current_question() else {
            return;
        };
        (question.id, state.participants.len())
    };

    let count = match core
        .backend
        .store
        .count_answers(core.room_id, question_id)
        .await
    {
        Ok(count) => count,
        Err(err) => {
            warn!(room = %core.room_id, error = %err, "answer count failed");
            return;
        }
    };

    let mut state = core.state.write().await;
    // the question may have moved on while the count was in flight
    if state.current_question().map(|q| q.id) != Some(question_id) {
        return;
    }
    let count_changed = state.answers_recorded != count;
    state.answers_recorded = count;

    if count > 0 && count >= participant_count {
        debug!(room = %core.room_id, %question_id, count, "full answer coverage");
        if close_question_locked(core, &mut state, false) || count_changed {
            publish(core, &state);
        }
    } else if count_changed {
        publish(core, &state);
    }
}

/// Fold a single participant row into the roster.
async fn upsert_participant(core: &Arc<SessionCore>, participant: Participant) {
    let mut state = core.state.write().await;
    if participant.room_id != core.room_id {
        return;
    }
    match state.participants.iter().position(|p| p.id == participant.id) {
        Some(index) => {
            if state.participants[index] == participant {
                return;
            }
            state.participants[index] = participant;
        }
        None => state.participants.push(participant),
    }
    sort_roster(&mut state.participants);
    publish(core, &state);
}

async fn remove_participant(core: &Arc<SessionCore>, id: Uuid) {
    let mut state = core.state.write().await;
    let before = state.participants.len();
    state.participants.retain(|p| p.id != id);
    if state.participants.len() != before {
        publish(core, &state);
    }
}

/// Replace the whole roster from an authoritative fetch. Store values win
/// over anything applied locally, scores included.
async fn replace_participants(core: &Arc<SessionCore>, participants: Vec<Participant>) {
    let mut state = core.state.write().await;
    if state.participants != participants {
        state.participants = participants;
        publish(core, &state);
    }
}

fn sort_roster(participants: &mut [Participant]) {
    participants.sort_by(|a, b| {
        a.last_active
            .cmp(&b.last_active)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn apply_machine(state: &mut SessionState, event: SessionEvent) {
    if let Err(err) = state.machine.apply(event) {
        // out-of-order observation; the replica keeps its current phase
        debug!(error = %err, "dropped phase event");
    }
}

/// Publish the snapshot derived from the current state.
pub(crate) fn publish(core: &SessionCore, state: &SessionState) {
    core.snapshot_tx.send_replace(build_snapshot(state));
}

/// Derive the application-facing view from the replica.
pub(crate) fn build_snapshot(state: &SessionState) -> SessionSnapshot {
    let phase = state.machine.phase();
    let question = if phase == SessionPhase::Lobby {
        None
    } else {
        state.current_question().cloned()
    };

    SessionSnapshot {
        phase,
        room: state.room.clone(),
        question,
        participants: state.participants.clone(),
        answered: state.answered.is_some(),
        answers_recorded: state.answers_recorded,
        reveal_answer: matches!(phase, SessionPhase::Feedback | SessionPhase::Results),
        reveal_scores: scores_revealed(state.room.settings.score_reveal, phase),
    }
}
