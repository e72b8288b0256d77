//! Pure scoring rules: difficulty base, speed bonus and streak bonus.
//!
//! Deterministic and free of I/O so every client computes identical awards.

use serde::Serialize;

use crate::model::Difficulty;

/// Extra multiplier granted for an instant answer.
const MAX_SPEED_BONUS: f64 = 0.5;
/// Streak bonus step per consecutive correct answer.
const STREAK_STEP: f64 = 0.1;
/// Cap on the accumulated streak bonus.
const MAX_STREAK_BONUS: f64 = 0.5;

/// Base score awarded for a correct answer of the given difficulty.
pub fn base_score(difficulty: Difficulty) -> u32 {
    match difficulty {
        Difficulty::Easy => 100,
        Difficulty::Medium => 200,
        Difficulty::Hard => 300,
    }
}

/// Speed multiplier in `[1.0, 1.5]`: 1.5 for an instant answer, tapering
/// linearly to 1.0 at the time limit. A non-positive limit disables the
/// bonus; negative latencies are clamped to zero.
pub fn speed_multiplier(response_time_ms: i64, time_limit_ms: i64) -> f64 {
    if time_limit_ms <= 0 {
        return 1.0;
    }
    let used_ratio = (response_time_ms.max(0) as f64 / time_limit_ms as f64).min(1.0);
    1.0 + MAX_SPEED_BONUS * (1.0 - used_ratio)
}

/// Streak multiplier in `[1.0, 1.5]`: +10% per consecutive correct answer
/// already on the books, capped at +50%. `streak` counts the run *before*
/// the answer being scored.
pub fn streak_multiplier(streak: u32) -> f64 {
    1.0 + (f64::from(streak) * STREAK_STEP).min(MAX_STREAK_BONUS)
}

/// Detailed outcome of scoring one correct answer.
///
/// `speed_bonus` and `streak_bonus` are rounded independently and need not
/// sum to `total_score - base_score`; downstream displays rely on these
/// exact values, so the asymmetry is kept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// Difficulty base.
    pub base_score: u32,
    /// `round(base * (speed_multiplier - 1))`.
    pub speed_bonus: u32,
    /// `round(base * speed_multiplier * (streak_multiplier - 1))`.
    pub streak_bonus: u32,
    /// `round(base * speed_multiplier * streak_multiplier)`; the only value
    /// persisted into participant score and answer points.
    pub total_score: u32,
    /// Streak after this answer (the prior run plus one).
    pub streak: u32,
}

/// Score a correct answer from its difficulty, response latency and the
/// participant's streak before this answer.
pub fn score_correct_answer(
    difficulty: Difficulty,
    response_time_ms: i64,
    time_limit_ms: i64,
    prior_streak: u32,
) -> ScoreBreakdown {
    let base = f64::from(base_score(difficulty));
    let speed = speed_multiplier(response_time_ms, time_limit_ms);
    let streak = streak_multiplier(prior_streak);

    ScoreBreakdown {
        base_score: base as u32,
        speed_bonus: (base * (speed - 1.0)).round() as u32,
        streak_bonus: (base * speed * (streak - 1.0)).round() as u32,
        total_score: (base * speed * streak).round() as u32,
        streak: prior_streak + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_scores_per_difficulty() {
        assert_eq!(base_score(Difficulty::Easy), 100);
        assert_eq!(base_score(Difficulty::Medium), 200);
        assert_eq!(base_score(Difficulty::Hard), 300);
    }

    #[test]
    fn speed_multiplier_endpoints() {
        assert_eq!(speed_multiplier(0, 20_000), 1.5);
        assert_eq!(speed_multiplier(20_000, 20_000), 1.0);
        // past the limit it stays floored at 1.0
        assert_eq!(speed_multiplier(30_000, 20_000), 1.0);
    }

    #[test]
    fn speed_multiplier_non_increasing_and_bounded() {
        let limit = 20_000;
        let mut previous = f64::MAX;
        for response in (0..=limit).step_by(500) {
            let multiplier = speed_multiplier(response, limit);
            assert!(multiplier <= previous);
            assert!((1.0..=1.5).contains(&multiplier));
            previous = multiplier;
        }
    }

    #[test]
    fn speed_multiplier_degenerate_inputs() {
        assert_eq!(speed_multiplier(1_000, 0), 1.0);
        assert_eq!(speed_multiplier(1_000, -5), 1.0);
    }

    #[test]
    fn streak_multiplier_steps_and_cap() {
        assert_eq!(streak_multiplier(0), 1.0);
        assert!((streak_multiplier(1) - 1.1).abs() < 1e-12);
        assert!((streak_multiplier(3) - 1.3).abs() < 1e-12);
        assert_eq!(streak_multiplier(5), 1.5);
        assert_eq!(streak_multiplier(10), 1.5);
    }

    #[test]
    fn instant_medium_answer_scores_300() {
        let breakdown = score_correct_answer(Difficulty::Medium, 0, 20_000, 0);
        assert_eq!(breakdown.base_score, 200);
        assert_eq!(breakdown.speed_bonus, 100);
        assert_eq!(breakdown.streak_bonus, 0);
        assert_eq!(breakdown.total_score, 300);
        assert_eq!(breakdown.streak, 1);
    }

    #[test]
    fn at_limit_easy_answer_with_streak_scores_140() {
        let breakdown = score_correct_answer(Difficulty::Easy, 20_000, 20_000, 4);
        assert_eq!(breakdown.speed_bonus, 0);
        assert_eq!(breakdown.streak_bonus, 40);
        assert_eq!(breakdown.total_score, 140);
        assert_eq!(breakdown.streak, 5);
    }

    #[test]
    fn breakdown_rounding_asymmetry_is_preserved() {
        // speed 1.333335, streak 1.1: components round to 33 and 13 while the
        // total rounds to 147, one point above base + bonuses.
        let breakdown = score_correct_answer(Difficulty::Easy, 3_333, 10_000, 1);
        assert_eq!(breakdown.total_score, 147);
        assert_eq!(
            breakdown.base_score + breakdown.speed_bonus + breakdown.streak_bonus,
            146
        );
    }
}
