//! Scheduler Core - stability/difficulty memory model
//!
//! Core theory:
//! - Each card carries a stability S (days until recall probability decays to
//!   90%) and a difficulty D in [1, 10]
//! - Retrievability follows a power-law forgetting curve:
//!   R(t, S) = (1 + FACTOR * t / S)^DECAY, so that R(S, S) = 0.9
//! - A successful review grows S multiplicatively; the gain is larger when the
//!   card was closer to being forgotten (spacing effect) and smaller for hard
//!   items
//! - A lapse collapses S to a fraction of its previous value
//!
//! New cards and cards in (re)learning walk through short fixed steps measured
//! in minutes before graduating to day-granular review intervals.
//!
//! Every function here is pure: identical inputs give identical outputs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::card::{CardMemoryState, MemoryUpdate};
use crate::error::{SrsError, SrsResult};
use crate::sanitize::{clamp_difficulty, clamp_retention, clamp_stability, is_finite};
use crate::types::{CardPhase, Grade, DECAY, FACTOR, MIN_STABILITY};

// ==================== Parameters ====================

const DEFAULT_WEIGHTS: [f64; 17] = [
    0.4, 0.6, 2.4, 5.8, // w0-w3: seed stability per grade
    4.93, 0.94, 0.86, 0.01, 1.49, // w4-w8
    0.14, 0.94, 2.18, 0.05, 0.34, // w9-w13
    1.26, 0.29, 2.61, // w14-w16
];

/// Tuning table for the scheduler.
///
/// Only the roles and monotonicity of these values matter to callers; any
/// table passing [`SchedulerParams::validate`] keeps the state invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerParams {
    /// Memory model weights
    pub w: [f64; 17],
    /// Target recall probability at the due date
    pub desired_retention: f64,
    /// Longest review interval handed out
    pub maximum_interval_days: f64,
    /// Learning steps for new cards, in minutes
    pub learning_steps_minutes: Vec<f64>,
    /// Steps after a lapse, in minutes
    pub relearning_steps_minutes: Vec<f64>,
    /// Upper bound of post-lapse stability as a fraction of the pre-lapse value
    pub lapse_stability_cap: f64,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            w: DEFAULT_WEIGHTS,
            desired_retention: 0.9,
            maximum_interval_days: 36500.0,
            learning_steps_minutes: vec![1.0, 10.0],
            relearning_steps_minutes: vec![10.0],
            lapse_stability_cap: 0.5,
        }
    }
}

impl SchedulerParams {
    pub fn validate(&self) -> SrsResult<()> {
        if let Some(idx) = self.w.iter().position(|v| !is_finite(*v)) {
            return Err(SrsError::Config(format!("weight w{idx} is not finite")));
        }
        if let Some(idx) = self.w[..4].iter().position(|v| *v <= 0.0) {
            return Err(SrsError::Config(format!(
                "seed stability w{idx} must be positive"
            )));
        }
        if !(self.desired_retention > 0.0 && self.desired_retention < 1.0) {
            return Err(SrsError::Config(format!(
                "desiredRetention must lie in (0, 1), got {}",
                self.desired_retention
            )));
        }
        if !is_finite(self.maximum_interval_days) || self.maximum_interval_days < 1.0 {
            return Err(SrsError::Config(format!(
                "maximumIntervalDays must be at least 1, got {}",
                self.maximum_interval_days
            )));
        }
        validate_steps("learningStepsMinutes", &self.learning_steps_minutes)?;
        validate_steps("relearningStepsMinutes", &self.relearning_steps_minutes)?;
        if !(self.lapse_stability_cap > 0.0 && self.lapse_stability_cap < 1.0) {
            return Err(SrsError::Config(format!(
                "lapseStabilityCap must lie in (0, 1), got {}",
                self.lapse_stability_cap
            )));
        }
        Ok(())
    }
}

fn validate_steps(name: &str, steps: &[f64]) -> SrsResult<()> {
    if steps.is_empty() {
        return Err(SrsError::Config(format!("{name} must not be empty")));
    }
    if steps.iter().any(|s| !is_finite(*s) || *s <= 0.0) {
        return Err(SrsError::Config(format!(
            "{name} entries must be positive minutes"
        )));
    }
    Ok(())
}

// ==================== Results ====================

/// Outcome of grading one review
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewResult {
    /// Successor state
    pub state: CardMemoryState,
    /// Days since the previous review at the time of grading
    pub elapsed_days: f64,
    /// Recall probability just before grading (0 for a new card)
    pub retrievability: f64,
    /// Time until the new due date
    pub interval: Duration,
}

/// What each grade would do to a card, without committing any of them
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalPreview {
    pub again: ReviewResult,
    pub hard: ReviewResult,
    pub good: ReviewResult,
    pub easy: ReviewResult,
}

impl IntervalPreview {
    pub fn for_grade(&self, grade: Grade) -> &ReviewResult {
        match grade {
            Grade::Again => &self.again,
            Grade::Hard => &self.hard,
            Grade::Good => &self.good,
            Grade::Easy => &self.easy,
        }
    }
}

// ==================== Forgetting Curve ====================

/// Recall probability after `elapsed_days` for a memory of the given stability.
///
/// Continuous and strictly decreasing in `elapsed_days / stability`.
pub fn retrievability(stability: f64, elapsed_days: f64) -> f64 {
    if stability <= 0.0 {
        return 0.0;
    }
    let safe_elapsed = elapsed_days.max(0.0);
    (1.0 + FACTOR * safe_elapsed / stability).powf(DECAY)
}

// ==================== Scheduler ====================

#[derive(Debug, Clone, Copy, PartialEq)]
enum StepOutcome {
    Stay { step: u32, delay_minutes: f64 },
    Graduate,
}

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    params: SchedulerParams,
}

impl Scheduler {
    pub fn new(params: SchedulerParams) -> SrsResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &SchedulerParams {
        &self.params
    }

    /// Grade a review and return only the successor state.
    pub fn schedule(
        &self,
        state: &CardMemoryState,
        grade: Grade,
        now: DateTime<Utc>,
    ) -> SrsResult<CardMemoryState> {
        self.review(state, grade, now).map(|result| result.state)
    }

    /// Grade a review.
    ///
    /// Fails with [`SrsError::TemporalOrder`] when `now` precedes the card's
    /// last review; the input state is never modified.
    pub fn review(
        &self,
        state: &CardMemoryState,
        grade: Grade,
        now: DateTime<Utc>,
    ) -> SrsResult<ReviewResult> {
        if let Some(last) = state.last_reviewed_at() {
            if now < last {
                return Err(SrsError::TemporalOrder {
                    key: state.key().to_string(),
                    last_reviewed_at: last,
                    now,
                });
            }
        }

        let elapsed_days = state.elapsed_days(now);
        let r = match state.phase() {
            CardPhase::New => 0.0,
            _ => retrievability(state.stability(), elapsed_days),
        };

        let update = match state.phase() {
            CardPhase::New => self.first_exposure(grade, now)?,
            CardPhase::Learning => self.learning_step(state, grade, now)?,
            CardPhase::Review => self.review_step(state, grade, r, now)?,
            CardPhase::Relearning => self.relearning_step(state, grade, now)?,
        };
        debug_assert!(state.phase().can_transition_to(update.phase));

        tracing::trace!(
            key = state.key(),
            grade = %grade,
            from = %state.phase(),
            to = %update.phase,
            stability = update.stability,
            difficulty = update.difficulty,
            "card scheduled"
        );

        let interval = update.due_at.signed_duration_since(now);
        Ok(ReviewResult {
            state: state.advance(update),
            elapsed_days,
            retrievability: r,
            interval,
        })
    }

    /// All four grading outcomes for `state` at `now`.
    pub fn preview(
        &self,
        state: &CardMemoryState,
        now: DateTime<Utc>,
    ) -> SrsResult<IntervalPreview> {
        Ok(IntervalPreview {
            again: self.review(state, Grade::Again, now)?,
            hard: self.review(state, Grade::Hard, now)?,
            good: self.review(state, Grade::Good, now)?,
            easy: self.review(state, Grade::Easy, now)?,
        })
    }

    /// Current recall probability of a studied card; 0 for a new card.
    pub fn retrievability_at(&self, state: &CardMemoryState, now: DateTime<Utc>) -> f64 {
        match state.phase() {
            CardPhase::New => 0.0,
            _ => retrievability(state.stability(), state.elapsed_days(now)),
        }
    }

    /// Whole-day review interval for a stability, at least one day.
    pub fn interval_days(&self, stability: f64) -> i64 {
        let retention = clamp_retention(self.params.desired_retention);
        let raw = stability / FACTOR * (retention.powf(1.0 / DECAY) - 1.0);
        let max = self.params.maximum_interval_days;
        let clamped = if is_finite(raw) { raw.clamp(1.0, max) } else { max };
        (clamped.round() as i64).max(1)
    }

    // ---------- phase handlers ----------

    fn first_exposure(&self, grade: Grade, now: DateTime<Utc>) -> SrsResult<MemoryUpdate> {
        let steps = &self.params.learning_steps_minutes;
        let (step, delay_minutes) = match step_outcome(steps, 0, grade) {
            StepOutcome::Stay {
                step,
                delay_minutes,
            } => (step, delay_minutes),
            // A first exposure never graduates; park the card on the last step.
            StepOutcome::Graduate => {
                let last = steps.len() - 1;
                (last as u32, steps[last])
            }
        };
        Ok(MemoryUpdate {
            stability: self.seed_stability(grade),
            difficulty: self.initial_difficulty(grade),
            phase: CardPhase::Learning,
            due_at: add_minutes(now, delay_minutes)?,
            reviewed_at: now,
            lapsed: false,
            step,
        })
    }

    fn learning_step(
        &self,
        state: &CardMemoryState,
        grade: Grade,
        now: DateTime<Utc>,
    ) -> SrsResult<MemoryUpdate> {
        let stability = self.seed_stability(grade);
        let difficulty = self.next_difficulty(state.difficulty(), grade);
        let outcome = step_outcome(&self.params.learning_steps_minutes, state.step(), grade);
        self.stepped(outcome, CardPhase::Learning, stability, difficulty, now)
    }

    fn relearning_step(
        &self,
        state: &CardMemoryState,
        grade: Grade,
        now: DateTime<Utc>,
    ) -> SrsResult<MemoryUpdate> {
        let difficulty = self.next_difficulty(state.difficulty(), grade);
        let outcome = step_outcome(&self.params.relearning_steps_minutes, state.step(), grade);
        self.stepped(
            outcome,
            CardPhase::Relearning,
            state.stability(),
            difficulty,
            now,
        )
    }

    fn review_step(
        &self,
        state: &CardMemoryState,
        grade: Grade,
        r: f64,
        now: DateTime<Utc>,
    ) -> SrsResult<MemoryUpdate> {
        let s = state.stability();
        let d = state.difficulty();
        let difficulty = self.next_difficulty(d, grade);

        if !grade.is_success() {
            let first_step = self.params.relearning_steps_minutes[0];
            return Ok(MemoryUpdate {
                stability: self.forget_stability(d, s, r),
                difficulty,
                phase: CardPhase::Relearning,
                due_at: add_minutes(now, first_step)?,
                reviewed_at: now,
                lapsed: true,
                step: 0,
            });
        }

        let stability = self.recall_stability(d, s, r, grade);
        Ok(MemoryUpdate {
            stability,
            difficulty,
            phase: CardPhase::Review,
            due_at: add_days(now, self.interval_days(stability))?,
            reviewed_at: now,
            lapsed: false,
            step: 0,
        })
    }

    fn stepped(
        &self,
        outcome: StepOutcome,
        phase: CardPhase,
        stability: f64,
        difficulty: f64,
        now: DateTime<Utc>,
    ) -> SrsResult<MemoryUpdate> {
        let (phase, due_at, step) = match outcome {
            StepOutcome::Stay {
                step,
                delay_minutes,
            } => (phase, add_minutes(now, delay_minutes)?, step),
            StepOutcome::Graduate => (
                CardPhase::Review,
                add_days(now, self.interval_days(stability))?,
                0,
            ),
        };
        Ok(MemoryUpdate {
            stability,
            difficulty,
            phase,
            due_at,
            reviewed_at: now,
            lapsed: false,
            step,
        })
    }

    // ---------- memory model ----------

    fn seed_stability(&self, grade: Grade) -> f64 {
        clamp_stability(self.params.w[(grade.as_u8() - 1) as usize])
    }

    fn initial_difficulty(&self, grade: Grade) -> f64 {
        let w = &self.params.w;
        clamp_difficulty(w[4] - (f64::from(grade.as_u8()) - 3.0) * w[5])
    }

    fn next_difficulty(&self, d: f64, grade: Grade) -> f64 {
        let w = &self.params.w;
        let delta = -(f64::from(grade.as_u8()) - 3.0);
        let d_new = d + w[6] * delta;
        let mean_reverted = w[7] * self.initial_difficulty(Grade::Good) + (1.0 - w[7]) * d_new;
        clamp_difficulty(mean_reverted)
    }

    fn recall_stability(&self, d: f64, s: f64, r: f64, grade: Grade) -> f64 {
        let w = &self.params.w;
        let hard_penalty = if grade == Grade::Hard { w[15] } else { 1.0 };
        let easy_bonus = if grade == Grade::Easy { w[16] } else { 1.0 };

        let gain = w[8].exp()
            * (11.0 - d)
            * s.powf(-w[9])
            * ((1.0 - r) * w[10]).exp_m1()
            * hard_penalty
            * easy_bonus;
        clamp_stability(s * (1.0 + gain.max(0.0)))
    }

    fn forget_stability(&self, d: f64, s: f64, r: f64) -> f64 {
        let w = &self.params.w;
        let raw = w[11] * d.powf(-w[12]) * ((s + 1.0).powf(w[13]) - 1.0) * ((1.0 - r) * w[14]).exp();
        let capped = if is_finite(raw) { raw } else { s };
        capped.min(s * self.params.lapse_stability_cap).max(MIN_STABILITY)
    }
}

fn step_outcome(steps: &[f64], step: u32, grade: Grade) -> StepOutcome {
    let last = steps.len() - 1;
    let current = (step as usize).min(last);
    match grade {
        Grade::Again => StepOutcome::Stay {
            step: 0,
            delay_minutes: steps[0],
        },
        Grade::Hard => {
            let delay_minutes = match (current, steps.len()) {
                (0, 1) => steps[0] * 1.5,
                (0, _) => (steps[0] + steps[1]) / 2.0,
                _ => steps[current],
            };
            StepOutcome::Stay {
                step: current as u32,
                delay_minutes,
            }
        }
        Grade::Good if current < last => StepOutcome::Stay {
            step: (current + 1) as u32,
            delay_minutes: steps[current + 1],
        },
        Grade::Good | Grade::Easy => StepOutcome::Graduate,
    }
}

fn add_minutes(now: DateTime<Utc>, minutes: f64) -> SrsResult<DateTime<Utc>> {
    let millis = (minutes * 60_000.0).round() as i64;
    now.checked_add_signed(Duration::milliseconds(millis))
        .ok_or_else(|| SrsError::validation("dueAt", "learning step overflows the calendar"))
}

fn add_days(now: DateTime<Utc>, days: i64) -> SrsResult<DateTime<Utc>> {
    Duration::try_days(days)
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| SrsError::validation("dueAt", "review interval overflows the calendar"))
}

/// Human-readable interval label, e.g. `10m`, `3d`, `2w`, `4mo`, `1y`.
pub fn format_interval(interval: Duration) -> String {
    let minutes = interval.num_minutes();
    if minutes <= 0 {
        return "now".to_string();
    }
    if minutes < 60 {
        return format!("{minutes}m");
    }
    let hours = interval.num_hours();
    if hours < 24 {
        return format!("{hours}h");
    }
    let days = interval.num_days();
    if days < 7 {
        format!("{days}d")
    } else if days < 30 {
        format!("{}w", days / 7)
    } else if days < 365 {
        format!("{}mo", days / 30)
    } else {
        format!("{}y", days / 365)
    }
}
