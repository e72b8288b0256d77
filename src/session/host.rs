//! Host-side transitions: starting the game, advancing questions, finishing.
//!
//! Only the room row is written; every client, the host's own replica
//! included, converges on the result through the regular reducer. The host
//! additionally folds its own write in immediately so its UI does not wait
//! for the feed echo.

use std::sync::Arc;

use futures::{StreamExt, future::ready, stream::BoxStream};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clock,
    error::SessionError,
    model::{Room, RoomStatus},
    store::{RoomPatch, StoreError},
};

use super::{SessionCore, SessionPhase, sync};

/// Run the pre-game countdown, then stamp question zero live.
pub(crate) async fn start_game(core: &Arc<SessionCore>) -> Result<(), SessionError> {
    {
        let state = core.state.read().await;
        require_host(&state.room, core.player_id)?;
        if state.machine.phase() != SessionPhase::Lobby {
            return Err(SessionError::InvalidState(
                "the game has already started".into(),
            ));
        }
        if state.room.question_ids.is_empty() {
            return Err(SessionError::EmptyQuestionSet);
        }
    }

    run_pregame_countdown(core).await;

    let room = stamp_question(core, 0).await?;
    info!(room = %core.room_id, "game started");
    sync::apply_room(core, room).await;
    Ok(())
}

/// Advance to the next question, or finish when the set is exhausted.
/// Advancing while a question is still open is allowed and closes it for
/// everyone through the new start stamp.
pub(crate) async fn next_question(core: &Arc<SessionCore>) -> Result<bool, SessionError> {
    let (next_index, exhausted) = {
        let state = core.state.read().await;
        require_host(&state.room, core.player_id)?;
        if !matches!(
            state.machine.phase(),
            SessionPhase::Playing | SessionPhase::Answering | SessionPhase::Feedback
        ) {
            return Err(SessionError::InvalidState(
                "no game is running to advance".into(),
            ));
        }
        let next = state.room.current_question_index + 1;
        (next, next as usize >= state.room.question_ids.len())
    };

    if exhausted {
        finish(core).await?;
        return Ok(false);
    }

    let room = stamp_question(core, next_index).await?;
    debug!(room = %core.room_id, index = next_index, "question advanced");
    sync::apply_room(core, room).await;
    Ok(true)
}

/// Finish the game immediately, regardless of the current question.
pub(crate) async fn end_game(core: &Arc<SessionCore>) -> Result<(), SessionError> {
    {
        let state = core.state.read().await;
        require_host(&state.room, core.player_id)?;
        if state.machine.phase() == SessionPhase::Results {
            return Err(SessionError::InvalidState("the game already ended".into()));
        }
    }
    finish(core).await
}

async fn finish(core: &Arc<SessionCore>) -> Result<(), SessionError> {
    let patch = RoomPatch {
        status: Some(RoomStatus::Finished),
        current_question_index: None,
        question_started_at: Some(None),
    };
    let room = core.backend.store.update_room(core.room_id, patch).await?;
    info!(room = %core.room_id, "game finished");
    sync::apply_room(core, room).await;
    Ok(())
}

/// Activate the room on the given question index with a server-side start
/// stamp, falling back to this client's clock when the store cannot stamp.
async fn stamp_question(core: &Arc<SessionCore>, index: u32) -> Result<Room, SessionError> {
    match core.backend.store.start_question(core.room_id, index).await {
        Ok(room) => Ok(room),
        Err(StoreError::Unsupported(op)) => {
            debug!(room = %core.room_id, op, "store cannot stamp, using the client clock");
            let patch = RoomPatch {
                status: Some(RoomStatus::Active),
                current_question_index: Some(index),
                question_started_at: Some(Some(clock::wire_now())),
            };
            Ok(core.backend.store.update_room(core.room_id, patch).await?)
        }
        Err(err) => Err(err.into()),
    }
}

/// Broadcast the cosmetic 3-2-1-0 countdown on the room's ephemeral topic.
///
/// Delivery is best effort by contract: each value is sent redundantly with
/// a short stagger, receivers collapse duplicates, and after the own
/// subscription confirms the channel is up, a grace pause gives slower
/// clients time to subscribe. No acknowledgement is ever awaited and any
/// failure only degrades the animation, never the game start.
pub(crate) async fn run_pregame_countdown(core: &Arc<SessionCore>) {
    let topic = countdown_topic(core.room_id);
    match core.backend.broadcast.subscribe(&topic).await {
        Ok(_confirmation) => sleep(core.config.pregame_grace).await,
        Err(err) => {
            warn!(room = %core.room_id, error = %err, "countdown channel unavailable");
            return;
        }
    }

    for value in (0..=3u8).rev() {
        for repeat in 0..core.config.pregame_repeats {
            if let Err(err) = core.backend.broadcast.publish(&topic, value).await {
                warn!(room = %core.room_id, error = %err, value, "countdown tick dropped");
            }
            if repeat + 1 < core.config.pregame_repeats {
                sleep(core.config.pregame_stagger).await;
            }
        }
        if value > 0 {
            sleep(core.config.pregame_step).await;
        }
    }
}

/// Subscribe to the pre-game countdown, collapsing redundant deliveries of
/// the same value.
pub(crate) async fn pregame_ticks(
    core: &Arc<SessionCore>,
) -> Result<BoxStream<'static, u8>, SessionError> {
    let ticks = core
        .backend
        .broadcast
        .subscribe(&countdown_topic(core.room_id))
        .await?;

    let mut last: Option<u8> = None;
    Ok(ticks
        .filter_map(move |value| {
            let fresh = last != Some(value);
            last = Some(value);
            ready(fresh.then_some(value))
        })
        .boxed())
}

fn countdown_topic(room_id: Uuid) -> String {
    format!("countdown-{room_id}")
}

/// Hosts are identified by the stable player identity the room was created
/// with; rooms without one accept host actions from any session.
fn require_host(room: &Room, player_id: Option<Uuid>) -> Result<(), SessionError> {
    match (room.host_id, player_id) {
        (Some(host), Some(player)) if host != player => Err(SessionError::InvalidState(
            "only the host can drive the game".into(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::store::memory::InMemoryBackend;

    #[tokio::test]
    async fn redundant_countdown_ticks_collapse_to_one_each() {
        let backend = InMemoryBackend::new().into_backend();
        let ticks = backend.broadcast.subscribe("countdown-test").await.unwrap();

        let mut last: Option<u8> = None;
        let mut deduped = ticks
            .filter_map(move |value| {
                let fresh = last != Some(value);
                last = Some(value);
                ready(fresh.then_some(value))
            })
            .boxed();

        for value in [3u8, 3, 3, 2, 2, 1, 1, 1, 0] {
            backend.broadcast.publish("countdown-test", value).await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..4 {
            let tick = timeout(Duration::from_secs(1), deduped.next())
                .await
                .expect("tick missing")
                .expect("stream ended");
            seen.push(tick);
        }
        assert_eq!(seen, vec![3, 2, 1, 0]);
    }

    #[test]
    fn host_gate_matches_identities() {
        let host = Uuid::new_v4();
        let room = Room::new("ABC123".into(), Some(host), Vec::new(), Default::default());

        assert!(require_host(&room, Some(host)).is_ok());
        assert!(require_host(&room, None).is_ok());
        assert!(require_host(&room, Some(Uuid::new_v4())).is_err());

        let open = Room::new("ABC124".into(), None, Vec::new(), Default::default());
        assert!(require_host(&open, Some(Uuid::new_v4())).is_ok());
    }
}
