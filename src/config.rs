//! Runtime tuning knobs for the synchronization engine.

use std::{env, time::Duration};

use tracing::warn;

/// Environment variable overriding the polling interval, in milliseconds.
const POLL_INTERVAL_ENV: &str = "QUIZ_SYNC_POLL_MS";
/// Environment variable overriding the countdown tick resolution, in milliseconds.
const COUNTDOWN_TICK_ENV: &str = "QUIZ_SYNC_TICK_MS";
/// Environment variable overriding the pre-game subscription grace, in milliseconds.
const PREGAME_GRACE_ENV: &str = "QUIZ_SYNC_PREGAME_GRACE_MS";
/// Environment variable overriding the redundant sends per pre-game tick.
const PREGAME_REPEATS_ENV: &str = "QUIZ_SYNC_PREGAME_REPEATS";
/// Environment variable overriding the stagger between redundant sends, in milliseconds.
const PREGAME_STAGGER_ENV: &str = "QUIZ_SYNC_PREGAME_STAGGER_MS";
/// Environment variable overriding the delay between tick values, in milliseconds.
const PREGAME_STEP_ENV: &str = "QUIZ_SYNC_PREGAME_STEP_MS";

/// Immutable tuning parameters shared by every session on this client.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between polling-fallback fetches of room and participant state.
    pub poll_interval: Duration,
    /// Resolution of the locally ticking countdown.
    pub countdown_tick: Duration,
    /// Pause after the host's own pre-game subscription confirms, letting
    /// player clients finish subscribing. No handshake is awaited from them.
    pub pregame_grace: Duration,
    /// Redundant sends per pre-game tick value.
    pub pregame_repeats: u32,
    /// Stagger between redundant sends of the same tick value.
    pub pregame_stagger: Duration,
    /// Delay between consecutive pre-game tick values.
    pub pregame_step: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            countdown_tick: Duration::from_millis(100),
            pregame_grace: Duration::from_millis(1500),
            pregame_repeats: 3,
            pregame_stagger: Duration::from_millis(50),
            pregame_step: Duration::from_secs(1),
        }
    }
}

impl SyncConfig {
    /// Load the configuration, applying environment overrides where present.
    pub fn load() -> Self {
        let mut config = Self::default();
        if let Some(value) = read_ms(POLL_INTERVAL_ENV) {
            config.poll_interval = value;
        }
        if let Some(value) = read_ms(COUNTDOWN_TICK_ENV) {
            config.countdown_tick = value;
        }
        if let Some(value) = read_ms(PREGAME_GRACE_ENV) {
            config.pregame_grace = value;
        }
        if let Some(value) = read_count(PREGAME_REPEATS_ENV) {
            config.pregame_repeats = value;
        }
        if let Some(value) = read_ms(PREGAME_STAGGER_ENV) {
            config.pregame_stagger = value;
        }
        if let Some(value) = read_ms(PREGAME_STEP_ENV) {
            config.pregame_step = value;
        }
        config
    }
}

/// Parse a millisecond duration from the environment, warning on bad values.
fn read_ms(key: &str) -> Option<Duration> {
    let raw = env::var(key).ok()?;
    match raw.parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            warn!(key, value = %raw, "ignoring invalid duration override");
            None
        }
    }
}

/// Parse a positive count from the environment, warning on bad values.
fn read_count(key: &str) -> Option<u32> {
    let raw = env::var(key).ok()?;
    match raw.parse::<u32>() {
        Ok(count) if count > 0 => Some(count),
        _ => {
            warn!(key, value = %raw, "ignoring invalid count override");
            None
        }
    }
}
