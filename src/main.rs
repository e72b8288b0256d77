//! Demo binary: runs a complete quiz game in-process with one host and three
//! bot players over the in-memory backend.

use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;
use rand::Rng;
use tokio::time::{sleep, timeout};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use quiz_sync::{
    config::SyncConfig,
    model::{Difficulty, GameMode, Question, QuestionOption, RoomSettings, Team, team_totals},
    session::{GameSession, JoinIdentity, SessionPhase, SubmitOutcome},
    store::{SessionBackend, memory::InMemoryBackend},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let backend = InMemoryBackend::new().into_backend();
    let question_ids = seed_questions(&backend).await?;

    let host_id = Uuid::new_v4();
    let settings = RoomSettings {
        time_limit_secs: 10,
        mode: GameMode::Teams,
        ..RoomSettings::default()
    };
    let room = GameSession::create_room(&backend, Some(host_id), question_ids, settings)
        .await
        .context("creating room")?;
    info!(code = %room.code, "room open");

    let hosting = GameSession::join(
        backend.clone(),
        SyncConfig::load(),
        &room.code,
        JoinIdentity::new("quizmaster")
            .with_player_id(host_id)
            .with_team(Team::Red),
    )
    .await
    .context("host joining")?;

    let mut bots = Vec::new();
    for (nickname, team) in [("ada", Team::Blue), ("grace", Team::Red), ("linus", Team::Blue)] {
        let session = GameSession::join(
            backend.clone(),
            SyncConfig::load(),
            &room.code,
            JoinIdentity::new(nickname).with_team(team),
        )
        .await
        .with_context(|| format!("{nickname} joining"))?;
        bots.push(tokio::spawn(run_bot(session)));
    }

    tokio::spawn(announce_countdown(
        hosting.pregame_ticks().await.context("countdown channel")?,
    ));
    hosting.start_game().await.context("starting game")?;

    run_host(&hosting).await.context("driving game")?;

    for bot in bots {
        bot.abort();
    }
    Ok(())
}

/// Print the shared pre-game countdown as players see it.
async fn announce_countdown(mut ticks: futures::stream::BoxStream<'static, u8>) {
    while let Some(value) = ticks.next().await {
        info!(value, "countdown");
        if value == 0 {
            return;
        }
    }
}

/// Drive the game: answer as the host, advance after each feedback pause,
/// print the final scoreboard.
async fn run_host(session: &GameSession) -> anyhow::Result<()> {
    let mut snapshots = session.watch();
    loop {
        let phase = snapshots.borrow_and_update().phase;
        match phase {
            SessionPhase::Playing => {
                let snapshot = session.snapshot();
                if let Some(question) = &snapshot.question
                    && !snapshot.answered
                {
                    info!(text = %question.text, "question live");
                    // the host competes too, with a fixed thinking pause
                    sleep(Duration::from_millis(1200)).await;
                    answer_randomly(session).await;
                }
            }
            SessionPhase::Feedback => {
                let snapshot = session.snapshot();
                if let Some(question) = &snapshot.question {
                    info!(correct = %question.correct_option_id, "question closed");
                }
                sleep(Duration::from_secs(2)).await;
                if !session.next_question().await? {
                    break;
                }
            }
            SessionPhase::Results => break,
            SessionPhase::Lobby | SessionPhase::Answering => {}
        }
        if timeout(Duration::from_secs(30), snapshots.changed())
            .await
            .is_err()
        {
            anyhow::bail!("game stalled");
        }
    }

    let snapshot = session.snapshot();
    let mut standings = snapshot.participants;
    standings.sort_by(|a, b| b.score.cmp(&a.score));
    for (rank, participant) in standings.iter().enumerate() {
        info!(
            rank = rank + 1,
            nickname = %participant.nickname,
            score = participant.score,
            "final standing"
        );
    }
    if snapshot.room.settings.mode == GameMode::Teams {
        let (red, blue) = team_totals(&standings);
        info!(red, blue, "team totals");
    }
    Ok(())
}

/// Bot loop: answer every question after a random delay, usually correctly.
async fn run_bot(session: GameSession) {
    let mut snapshots = session.watch();
    loop {
        let ready = {
            let snapshot = snapshots.borrow_and_update();
            snapshot.phase == SessionPhase::Playing && !snapshot.answered
        };
        if ready {
            let latency = rand::rng().random_range(300..4000);
            sleep(Duration::from_millis(latency)).await;
            answer_randomly(&session).await;
        }
        if snapshots.changed().await.is_err() {
            return;
        }
    }
}

/// Pick the correct option 70% of the time, otherwise any option at random.
async fn answer_randomly(session: &GameSession) {
    let snapshot = session.snapshot();
    let Some(question) = snapshot.question else {
        return;
    };
    let choice = if rand::rng().random_bool(0.7) {
        question.correct_option_id
    } else {
        let index = rand::rng().random_range(0..question.options.len());
        question.options[index].id
    };

    match session.submit_answer(choice).await {
        Ok(SubmitOutcome::Accepted { correct, breakdown }) => {
            let points = breakdown.map(|b| b.total_score).unwrap_or(0);
            info!(correct, points, "answered");
        }
        Ok(_) | Err(_) => {}
    }
}

/// Seed a small mixed-difficulty question bank.
async fn seed_questions(backend: &SessionBackend) -> anyhow::Result<Vec<Uuid>> {
    let bank = [
        (Difficulty::Easy, "What does CPU stand for?", "Central Processing Unit", "Core Program Utility"),
        (Difficulty::Easy, "Which planet is closest to the sun?", "Mercury", "Venus"),
        (Difficulty::Medium, "Which sorting algorithm is O(n log n) worst case?", "Merge sort", "Quicksort"),
        (Difficulty::Hard, "Which year was the first ARPANET link established?", "1969", "1973"),
    ];

    let mut ids = Vec::new();
    for (difficulty, text, correct, wrong) in bank {
        let correct = QuestionOption { id: Uuid::new_v4(), text: correct.into() };
        let wrong = QuestionOption { id: Uuid::new_v4(), text: wrong.into() };
        let question = Question {
            id: Uuid::new_v4(),
            text: text.into(),
            correct_option_id: correct.id,
            options: vec![correct, wrong],
            difficulty,
            category: None,
            source_info: None,
        };
        ids.push(question.id);
        backend
            .store
            .insert_question(question)
            .await
            .context("seeding question bank")?;
    }
    Ok(ids)
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
