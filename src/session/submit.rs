//! The answer submission pipeline.
//!
//! Submissions are validated against the local replica, scored from the
//! store's own view of the participant, then written as an answer row plus a
//! progress update. The two writes are not atomic; the store's row is the
//! authority and the polling loop repairs any divergence.

use std::sync::Arc;

use tracing::{debug, warn};

use uuid::Uuid;

use crate::{
    error::SessionError,
    model::{Difficulty, NewAnswer, Participant},
    scoring::{self, ScoreBreakdown},
    store::RoomEvent,
};

use super::{QuestionKey, SessionCore, SessionEvent, SessionPhase, sync};

/// Outcome of an answer submission attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubmitOutcome {
    /// The answer was recorded.
    Accepted {
        /// Whether the selection matched the correct option.
        correct: bool,
        /// Scoring detail; present only for correct selections.
        breakdown: Option<ScoreBreakdown>,
    },
    /// This client already has an answer on record for this question.
    Duplicate,
    /// No question is accepting answers.
    Closed,
}

/// Submit a selection (`Some`) or record a timeout (`None`) for the current
/// question.
pub(crate) async fn submit(
    core: &Arc<SessionCore>,
    selected_option_id: Option<Uuid>,
) -> Result<SubmitOutcome, SessionError> {
    let Some(attempt) = stage_attempt(core, selected_option_id).await? else {
        return Ok(outcome_for_rejection(core).await);
    };

    // score from the store's row, not the local copy, so a stale replica
    // cannot double-award or misread the streak
    let row = core
        .backend
        .store
        .participant(core.participant_id)
        .await?
        .ok_or(SessionError::NotParticipant)?;

    let scored = score_attempt(&attempt, &row);

    if !commit_attempt(core, &attempt).await {
        return Ok(outcome_for_rejection(core).await);
    }

    let answer = NewAnswer {
        room_id: core.room_id,
        participant_id: core.participant_id,
        question_id: attempt.question_id,
        selected_option_id,
        is_correct: scored.correct,
        response_time_ms: attempt.response_time_ms,
        points_earned: scored.points,
    };
    core.backend.store.insert_answer(answer).await?;
    core.backend
        .store
        .update_progress(core.participant_id, scored.score, scored.streak)
        .await?;

    debug!(
        room = %core.room_id,
        question = %attempt.question_id,
        correct = scored.correct,
        points = scored.points,
        "answer recorded"
    );

    // converge immediately instead of waiting for the echo from the feed
    sync::handle_event(
        core,
        RoomEvent::AnswerRecorded {
            question_id: attempt.question_id,
            participant_id: core.participant_id,
        },
    )
    .await;

    Ok(SubmitOutcome::Accepted {
        correct: scored.correct,
        breakdown: scored.breakdown,
    })
}

/// Everything the write path needs, captured under one read of the replica.
struct Attempt {
    key: QuestionKey,
    question_id: Uuid,
    correct_option_id: Uuid,
    difficulty: Difficulty,
    selected_option_id: Option<Uuid>,
    response_time_ms: u64,
    time_limit_ms: i64,
    /// Timeouts may be recorded after the question closed; selections not.
    is_timeout: bool,
}

/// Validate the attempt against the replica and capture the scoring inputs.
/// Returns `None` when the submission must be rejected.
async fn stage_attempt(
    core: &Arc<SessionCore>,
    selected_option_id: Option<Uuid>,
) -> Result<Option<Attempt>, SessionError> {
    let state = core.state.read().await;
    let is_timeout = selected_option_id.is_none();

    let accepting = match state.machine.phase() {
        SessionPhase::Playing => true,
        // after the close, only the timeout marker may still be recorded
        SessionPhase::Feedback => is_timeout,
        _ => false,
    };
    if !accepting || state.answered.is_some() {
        return Ok(None);
    }

    let Some(key) = state.applied.question_key() else {
        return Ok(None);
    };
    let Some(question) = state.current_question() else {
        return Ok(None);
    };

    let time_limit_ms = state.room.settings.time_limit_ms();
    let response_time_ms = if is_timeout {
        // a timeout can only be recorded once the window actually lapsed
        if let Some(countdown) = state.countdown.as_ref()
            && !countdown.state().expired
        {
            return Ok(None);
        }
        u64::try_from(time_limit_ms).unwrap_or(0)
    } else {
        let Some(countdown) = state.countdown.as_ref() else {
            return Ok(None);
        };
        if countdown.state().expired {
            return Ok(None);
        }
        u64::try_from(countdown.elapsed().as_millis()).unwrap_or(u64::MAX)
    };

    Ok(Some(Attempt {
        key,
        question_id: question.id,
        correct_option_id: question.correct_option_id,
        difficulty: question.difficulty,
        selected_option_id,
        response_time_ms,
        time_limit_ms,
        is_timeout,
    }))
}

struct Scored {
    correct: bool,
    points: u32,
    score: u32,
    streak: u32,
    breakdown: Option<ScoreBreakdown>,
}

fn score_attempt(attempt: &Attempt, row: &Participant) -> Scored {
    let correct = attempt
        .selected_option_id
        .is_some_and(|selected| selected == attempt.correct_option_id);

    if !correct {
        return Scored {
            correct,
            points: 0,
            score: row.score,
            streak: 0,
            breakdown: None,
        };
    }

    let breakdown = scoring::score_correct_answer(
        attempt.difficulty,
        i64::try_from(attempt.response_time_ms).unwrap_or(i64::MAX),
        attempt.time_limit_ms,
        row.streak,
    );
    Scored {
        correct,
        points: breakdown.total_score,
        score: row.score + breakdown.total_score,
        streak: breakdown.streak,
        breakdown: Some(breakdown),
    }
}

/// Re-check the attempt under the write lock and mark it applied. Returns
/// whether the attempt is still the first for a still-matching question.
async fn commit_attempt(core: &Arc<SessionCore>, attempt: &Attempt) -> bool {
    let mut state = core.state.write().await;

    if state.answered.is_some() || state.applied.question_key().as_ref() != Some(&attempt.key) {
        return false;
    }
    let still_valid = match state.machine.phase() {
        SessionPhase::Playing => true,
        SessionPhase::Feedback => attempt.is_timeout,
        _ => false,
    };
    if !still_valid {
        return false;
    }

    state.answered = Some(attempt.key.clone());
    if state.machine.phase() == SessionPhase::Playing && !attempt.is_timeout {
        if let Err(err) = state.machine.apply(SessionEvent::AnswerSubmitted) {
            warn!(error = %err, "submission raced a phase change");
            state.answered = None;
            return false;
        }
    }
    sync::publish(core, &state);
    true
}

/// Distinguish a duplicate from a closed question for a rejected attempt.
async fn outcome_for_rejection(core: &Arc<SessionCore>) -> SubmitOutcome {
    let state = core.state.read().await;
    if state.answered.is_some() {
        SubmitOutcome::Duplicate
    } else {
        SubmitOutcome::Closed
    }
}
