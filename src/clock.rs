//! Server-timestamp reconciliation and the locally ticking question countdown.
//!
//! The server stamp only seeds the initial elapsed offset. After that the
//! remaining time is re-derived from a local monotonic reference on every
//! tick, so client/server clock skew cannot stretch or shrink the countdown.

use std::time::Duration;

use thiserror::Error;
use time::{OffsetDateTime, UtcOffset, format_description::well_known::Rfc3339};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval},
};

/// Error raised when a server timestamp cannot be turned into an instant.
///
/// Callers must not start a timer on this error; the question is treated as
/// already expired so the session never stalls on a bad stamp.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unparsable server timestamp `{raw}`")]
pub struct ClockParseError {
    /// The offending timestamp as received from the store.
    pub raw: String,
}

impl ClockParseError {
    fn new(raw: &str) -> Self {
        Self { raw: raw.to_string() }
    }
}

/// Normalize a store-issued timestamp into a strict RFC 3339 instant.
///
/// PostgreSQL-style stores emit `2025-12-05 09:53:08.134406+00`: a space
/// separator and a bare hour offset. Both are rewritten before parsing so the
/// result equals parsing `2025-12-05T09:53:08.134406+00:00`.
pub fn normalize_timestamp(raw: &str) -> Result<OffsetDateTime, ClockParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ClockParseError::new(raw));
    }

    let mut normalized = trimmed.replacen(' ', "T", 1);
    if has_bare_hour_offset(&normalized) {
        normalized.push_str(":00");
    }

    OffsetDateTime::parse(&normalized, &Rfc3339).map_err(|_| ClockParseError::new(raw))
}

/// True when the timestamp ends in `+HH`/`-HH` without a minutes component.
fn has_bare_hour_offset(value: &str) -> bool {
    let bytes = value.as_bytes();
    let n = bytes.len();
    n >= 3
        && (bytes[n - 3] == b'+' || bytes[n - 3] == b'-')
        && bytes[n - 2].is_ascii_digit()
        && bytes[n - 1].is_ascii_digit()
}

/// Render an instant in the store's wire format (`+00` hour-only suffix).
pub fn wire_timestamp(instant: OffsetDateTime) -> String {
    let utc = instant.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}+00",
        utc.year(),
        utc.month() as u8,
        utc.day(),
        utc.hour(),
        utc.minute(),
        utc.second(),
        utc.microsecond(),
    )
}

/// Current instant in the store's wire format.
pub fn wire_now() -> String {
    wire_timestamp(OffsetDateTime::now_utc())
}

/// Format a second count as `M:SS` for countdown displays.
pub fn format_time(total_secs: u64) -> String {
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}

/// Snapshot of the countdown published on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    /// Time left before the question deadline.
    pub remaining: Duration,
    /// Whether the deadline has passed. Flips exactly once; the ticker stops
    /// after publishing it.
    pub expired: bool,
}

impl TimerState {
    /// A zero-remaining, already-expired state.
    pub fn expired() -> Self {
        Self { remaining: Duration::ZERO, expired: true }
    }

    /// Remaining whole seconds, as shown on a countdown display.
    pub fn remaining_secs(&self) -> u64 {
        self.remaining.as_secs()
    }
}

/// Locally ticking countdown derived from a server-stamped start instant.
///
/// Dropping the countdown aborts its ticker; the session replaces any
/// previous countdown before starting a new one, so two tickers never run
/// for the same logical session.
#[derive(Debug)]
pub struct Countdown {
    state_rx: watch::Receiver<TimerState>,
    initial_elapsed: Duration,
    local_reference: Instant,
    ticker: Option<JoinHandle<()>>,
}

impl Countdown {
    /// Start a countdown for a question stamped at `started_at_raw` with the
    /// given answer window.
    ///
    /// When the window has already fully elapsed on the server, the returned
    /// countdown reports zero remaining and expired immediately and no ticker
    /// task is spawned.
    pub fn start(
        started_at_raw: &str,
        time_limit: Duration,
        tick: Duration,
    ) -> Result<Self, ClockParseError> {
        let started_at = normalize_timestamp(started_at_raw)?;
        let server_elapsed =
            Duration::try_from(OffsetDateTime::now_utc() - started_at).unwrap_or(Duration::ZERO);
        let local_reference = Instant::now();

        if server_elapsed >= time_limit {
            let (_tx, state_rx) = watch::channel(TimerState::expired());
            return Ok(Self {
                state_rx,
                initial_elapsed: server_elapsed,
                local_reference,
                ticker: None,
            });
        }

        let initial = TimerState {
            remaining: time_limit - server_elapsed,
            expired: false,
        };
        let (state_tx, state_rx) = watch::channel(initial);
        let ticker = tokio::spawn(run_ticker(
            state_tx,
            time_limit,
            server_elapsed,
            local_reference,
            tick,
        ));

        Ok(Self {
            state_rx,
            initial_elapsed: server_elapsed,
            local_reference,
            ticker: Some(ticker),
        })
    }

    /// Latest published timer state.
    pub fn state(&self) -> TimerState {
        *self.state_rx.borrow()
    }

    /// Watch handle observers can await ticks on.
    pub fn watch(&self) -> watch::Receiver<TimerState> {
        self.state_rx.clone()
    }

    /// Reconciled time elapsed since the server stamped the question start.
    pub fn elapsed(&self) -> Duration {
        self.initial_elapsed + self.local_reference.elapsed()
    }

    /// Whether a ticker task is still attached.
    pub fn is_ticking(&self) -> bool {
        self.ticker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stop ticking without signalling expiry, for when the deadline is
    /// superseded by full answer coverage.
    pub fn stop(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Re-derive the remaining time on every tick until expiry, then stop.
async fn run_ticker(
    state_tx: watch::Sender<TimerState>,
    time_limit: Duration,
    initial_elapsed: Duration,
    local_reference: Instant,
    tick: Duration,
) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let elapsed = initial_elapsed + local_reference.elapsed();
        let remaining = time_limit.saturating_sub(elapsed);
        let expired = remaining.is_zero();
        if state_tx.send(TimerState { remaining, expired }).is_err() {
            return;
        }
        if expired {
            return;
        }
    }
}
