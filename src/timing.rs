//! Adaptive timing: human-like delays between page interactions.
//!
//! Each call to [`TimingEngine::next_interval`] draws a delay for one kind
//! of action and records it. The pipeline, in order:
//!
//! 1. Gaussian draw around the action's mean, sd = (max - min) / 6.
//! 2. Perturbations, each checked independently: distraction (x1.5–3.5),
//!    rush (x0.6–0.9), consistency (snap to the recent average).
//! 3. Context: stress x0.8, careful x1.3.
//! 4. Fatigue (grows with session age, capped) and the adaptive multiplier
//!    (grows while recent intervals look too regular).
//! 5. Clamp to the action's bounds, jitter ±100ms, round to 50ms, clamp.
//! 6. Record into the bounded history and recompute the adaptive multiplier.
//!
//! All randomness comes from the engine's `R: Rng`, so a seeded generator
//! makes the whole sequence reproducible.

use std::collections::{BTreeMap, VecDeque};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// Coefficient of variation below which recent intervals look machine-made.
const LOW_VARIATION: f64 = 0.1;

/// Records needed before the adaptive multiplier reacts.
const ADAPTIVE_WINDOW: usize = 5;

/// Same-type records needed before the consistency pattern applies.
const CONSISTENCY_WINDOW: usize = 3;

const ADAPTIVE_STEP: f64 = 0.1;
const ADAPTIVE_MAX: f64 = 1.5;
const ADAPTIVE_DECAY: f64 = 0.8;

/// A kind of page interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Search,
    Click,
    Type,
    Scroll,
    Pause,
}

impl ActionType {
    pub const ALL: [Self; 5] = [
        Self::Search,
        Self::Click,
        Self::Type,
        Self::Scroll,
        Self::Pause,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Click => "click",
            Self::Type => "type",
            Self::Scroll => "scroll",
            Self::Pause => "pause",
        }
    }

    /// Built-in bounds, in milliseconds.
    #[must_use]
    pub const fn default_pattern(self) -> TimingPattern {
        match self {
            Self::Search => TimingPattern::new(2000, 8000, 4000),
            Self::Click => TimingPattern::new(200, 1200, 500),
            Self::Type => TimingPattern::new(80, 300, 150),
            Self::Scroll => TimingPattern::new(300, 1500, 700),
            Self::Pause => TimingPattern::new(1000, 5000, 2500),
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| format!("unknown action type: {s}"))
    }
}

/// Delay bounds for one action type, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingPattern {
    pub min: u64,
    pub max: u64,
    pub mean: u64,
}

impl TimingPattern {
    #[must_use]
    pub const fn new(min: u64, max: u64, mean: u64) -> Self {
        Self { min, max, mean }
    }

    /// About 99.7% of raw draws land inside `[min, max]`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.max.saturating_sub(self.min) as f64 / 6.0
    }
}

/// Situational flags for one draw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingContext {
    /// Hurrying: intervals shrink.
    pub stress: bool,

    /// Double-checking: intervals grow.
    pub careful: bool,
}

impl TimingContext {
    #[must_use]
    pub const fn careful() -> Self {
        Self {
            stress: false,
            careful: true,
        }
    }

    #[must_use]
    pub const fn stress() -> Self {
        Self {
            stress: true,
            careful: false,
        }
    }
}

/// Tunables for the timing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Per-action overrides; missing actions use their default pattern.
    pub patterns: BTreeMap<ActionType, TimingPattern>,
    pub history_size: usize,
    pub distraction_probability: f64,
    pub rush_probability: f64,
    pub consistency_probability: f64,
    pub typo_probability: f64,
    pub jitter_ms: u64,
    pub round_to_ms: u64,
    pub fatigue_per_hour: f64,
    pub fatigue_cap: f64,
    pub adaptive: bool,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            patterns: BTreeMap::new(),
            history_size: 50,
            distraction_probability: 0.05,
            rush_probability: 0.08,
            consistency_probability: 0.1,
            typo_probability: 0.02,
            jitter_ms: 100,
            round_to_ms: 50,
            fatigue_per_hour: 0.05,
            fatigue_cap: 1.3,
            adaptive: true,
        }
    }
}

impl TimingConfig {
    /// No perturbations and no adaptive multiplier: plain clamped Gaussian
    /// draws with jitter and rounding.
    #[must_use]
    pub fn steady() -> Self {
        Self {
            distraction_probability: 0.0,
            rush_probability: 0.0,
            consistency_probability: 0.0,
            typo_probability: 0.0,
            adaptive: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn pattern(&self, action: ActionType) -> TimingPattern {
        self.patterns
            .get(&action)
            .copied()
            .unwrap_or_else(|| action.default_pattern())
    }
}

/// Fatigue multiplier after `elapsed` of session time.
#[must_use]
pub fn fatigue_factor(elapsed: Duration, per_hour: f64, cap: f64) -> f64 {
    let hours = elapsed.as_secs_f64() / 3600.0;
    (1.0 + hours * per_hour).min(cap).max(1.0)
}

/// One draw from N(mean, std_dev²) via Box–Muller.
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    mean + z * std_dev
}

/// A source of delays, as seen by the stealth coordinator.
pub trait IntervalSource {
    /// Milliseconds to wait before the next `action`.
    fn interval(&mut self, action: ActionType, context: TimingContext) -> u64;
}

/// One recorded draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionRecord {
    pub action: ActionType,
    pub interval: u64,
    pub at: Instant,
}

/// A key press in a simulated typing sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "key", content = "char", rename_all = "camelCase")]
pub enum Key {
    Char(char),
    Backspace,
}

/// One key press and the delay before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keystroke {
    pub key: Key,
    pub delay_ms: u64,
}

/// The text a keystroke sequence leaves in an input.
#[must_use]
pub fn replay(strokes: &[Keystroke]) -> String {
    let mut out = String::new();
    for stroke in strokes {
        match stroke.key {
            Key::Char(c) => out.push(c),
            Key::Backspace => {
                out.pop();
            }
        }
    }
    out
}

/// Per-action summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStats {
    pub count: usize,
    pub average_interval: f64,
}

/// A snapshot of the engine's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingStats {
    /// Draws since construction or the last reset.
    pub total_actions: u64,

    /// Average over the retained history.
    pub average_interval: f64,
    pub adaptive_multiplier: f64,
    pub fatigue_factor: f64,
    pub session_secs: u64,
    pub by_action: BTreeMap<ActionType, ActionStats>,
}

/// Produces human-like delays and keeps the history they adapt to.
#[derive(Debug)]
pub struct TimingEngine<R = StdRng> {
    config: TimingConfig,
    rng: R,
    recent: VecDeque<ActionRecord>,
    adaptive_multiplier: f64,
    total_actions: u64,
    started: Instant,
}

impl TimingEngine<StdRng> {
    /// An engine seeded from the operating system.
    #[must_use]
    pub fn new(config: TimingConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl<R: Rng> TimingEngine<R> {
    pub fn with_rng(config: TimingConfig, rng: R) -> Self {
        Self {
            config,
            rng,
            recent: VecDeque::new(),
            adaptive_multiplier: 1.0,
            total_actions: 0,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TimingConfig {
        &self.config
    }

    /// Recorded draws, oldest first.
    pub fn recent_actions(&self) -> impl ExactSizeIterator<Item = &ActionRecord> {
        self.recent.iter()
    }

    #[must_use]
    pub fn adaptive_multiplier(&self) -> f64 {
        self.adaptive_multiplier
    }

    /// Fatigue at the current session age.
    #[must_use]
    pub fn fatigue_factor(&self) -> f64 {
        fatigue_factor(
            self.started.elapsed(),
            self.config.fatigue_per_hour,
            self.config.fatigue_cap,
        )
    }

    /// Draw, record, and return the delay in milliseconds before `action`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn next_interval(&mut self, action: ActionType, context: TimingContext) -> u64 {
        let pattern = self.config.pattern(action);
        let (min, max) = (pattern.min as f64, pattern.max as f64);

        let mut value = gaussian(&mut self.rng, pattern.mean as f64, pattern.std_dev()).max(0.0);

        if self.chance(self.config.distraction_probability) {
            value *= self.rng.gen_range(1.5..3.5);
            debug!(%action, "distraction");
        }
        if self.chance(self.config.rush_probability) {
            value *= self.rng.gen_range(0.6..0.9);
            debug!(%action, "rush");
        }
        if self.chance(self.config.consistency_probability)
            && let Some(average) = self.recent_average(action)
        {
            value = average * self.rng.gen_range(0.95..1.05);
            debug!(%action, "consistency");
        }

        if context.stress {
            value *= 0.8;
        }
        if context.careful {
            value *= 1.3;
        }

        value *= self.fatigue_factor() * self.adaptive_multiplier;

        let jitter = self.config.jitter_ms as i64;
        let mut value = value.clamp(min, max.max(min)) + self.rng.gen_range(-jitter..=jitter) as f64;
        if self.config.round_to_ms > 0 {
            let step = self.config.round_to_ms as f64;
            value = (value / step).round() * step;
        }
        let interval = value.clamp(min, max.max(min)).max(0.0) as u64;

        self.record(action, interval);
        interval
    }

    /// Draw a delay for `action` and sleep through it.
    pub async fn pause(&mut self, action: ActionType, context: TimingContext) -> u64 {
        let ms = self.next_interval(action, context);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        ms
    }

    /// Plan the keystrokes for typing `text`.
    ///
    /// Each key gets a Gaussian delay within the `type` bounds. With the
    /// configured typo probability a letter is first mistyped as a keyboard
    /// neighbour, then erased and typed correctly after a short notice pause.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn simulate_human_typing(&mut self, text: &str) -> Vec<Keystroke> {
        let pattern = self.config.pattern(ActionType::Type);
        let fatigue = self.fatigue_factor();
        let mut strokes = Vec::with_capacity(text.len());

        let key_delay = |rng: &mut R| {
            let raw = gaussian(rng, pattern.mean as f64, pattern.std_dev()) * fatigue;
            let (min, max) = (pattern.min as f64, pattern.max as f64);
            raw.clamp(min, max.max(min)).round() as u64
        };

        for c in text.chars() {
            if c.is_ascii_alphabetic() && self.chance(self.config.typo_probability) {
                let wrong = keyboard_neighbour(&mut self.rng, c);
                strokes.push(Keystroke {
                    key: Key::Char(wrong),
                    delay_ms: key_delay(&mut self.rng),
                });
                let notice = gaussian(&mut self.rng, 300.0, 60.0).max(100.0).round() as u64;
                strokes.push(Keystroke {
                    key: Key::Backspace,
                    delay_ms: notice,
                });
            }
            strokes.push(Keystroke {
                key: Key::Char(c),
                delay_ms: key_delay(&mut self.rng),
            });
        }
        strokes
    }

    #[must_use]
    pub fn stats(&self) -> TimingStats {
        let mut by_action: BTreeMap<ActionType, (usize, u64)> = BTreeMap::new();
        for record in &self.recent {
            let entry = by_action.entry(record.action).or_default();
            entry.0 += 1;
            entry.1 += record.interval;
        }

        TimingStats {
            total_actions: self.total_actions,
            average_interval: average(self.recent.iter().map(|r| r.interval)),
            adaptive_multiplier: self.adaptive_multiplier,
            fatigue_factor: self.fatigue_factor(),
            session_secs: self.started.elapsed().as_secs(),
            by_action: by_action
                .into_iter()
                .map(|(action, (count, sum))| {
                    #[allow(clippy::cast_precision_loss)]
                    let average_interval = sum as f64 / count as f64;
                    (
                        action,
                        ActionStats {
                            count,
                            average_interval,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Forget all history and restart the session clock.
    pub fn reset(&mut self) {
        self.recent.clear();
        self.adaptive_multiplier = 1.0;
        self.total_actions = 0;
        self.started = Instant::now();
    }

    fn chance(&mut self, probability: f64) -> bool {
        self.rng.gen_bool(probability.clamp(0.0, 1.0))
    }

    fn recent_average(&self, action: ActionType) -> Option<f64> {
        let same: Vec<u64> = self
            .recent
            .iter()
            .filter(|r| r.action == action)
            .map(|r| r.interval)
            .collect();
        (same.len() >= CONSISTENCY_WINDOW).then(|| average(same.into_iter()))
    }

    fn record(&mut self, action: ActionType, interval: u64) {
        self.recent.push_back(ActionRecord {
            action,
            interval,
            at: Instant::now(),
        });
        while self.recent.len() > self.config.history_size.max(1) {
            self.recent.pop_front();
        }
        self.total_actions += 1;
        self.recompute_adaptive();
    }

    /// Raise the multiplier while recent intervals, relative to their
    /// action's mean, vary too little; otherwise decay it toward 1.0.
    #[allow(clippy::cast_precision_loss)]
    fn recompute_adaptive(&mut self) {
        if !self.config.adaptive {
            self.adaptive_multiplier = 1.0;
            return;
        }
        if self.recent.len() < ADAPTIVE_WINDOW {
            return;
        }

        let ratios: Vec<f64> = self
            .recent
            .iter()
            .map(|r| r.interval as f64 / self.config.pattern(r.action).mean.max(1) as f64)
            .collect();
        let mean = ratios.iter().sum::<f64>() / ratios.len() as f64;
        let variance = ratios.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / ratios.len() as f64;
        let variation = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };

        self.adaptive_multiplier = if variation < LOW_VARIATION {
            (self.adaptive_multiplier + ADAPTIVE_STEP).min(ADAPTIVE_MAX)
        } else {
            1.0 + (self.adaptive_multiplier - 1.0) * ADAPTIVE_DECAY
        };
    }
}

impl<R: Rng> IntervalSource for TimingEngine<R> {
    fn interval(&mut self, action: ActionType, context: TimingContext) -> u64 {
        self.next_interval(action, context)
    }
}

#[allow(clippy::cast_precision_loss)]
fn average(values: impl Iterator<Item = u64>) -> f64 {
    let (count, sum) = values.fold((0u64, 0u64), |(c, s), v| (c + 1, s + v));
    if count == 0 { 0.0 } else { sum as f64 / count as f64 }
}

/// A letter next to `c` on a QWERTY keyboard, keeping its case.
fn keyboard_neighbour<R: Rng + ?Sized>(rng: &mut R, c: char) -> char {
    const ROWS: [&[u8]; 3] = [b"qwertyuiop", b"asdfghjkl", b"zxcvbnm"];

    if !c.is_ascii() {
        return c;
    }
    let lower = c.to_ascii_lowercase() as u8;
    for row in ROWS {
        if let Some(i) = row.iter().position(|&k| k == lower) {
            let left = i.checked_sub(1).map(|j| row[j]);
            let right = row.get(i + 1).copied();
            let picked = match (left, right) {
                (Some(l), Some(r)) => {
                    if rng.gen_bool(0.5) {
                        l
                    } else {
                        r
                    }
                }
                (Some(k), None) | (None, Some(k)) => k,
                (None, None) => lower,
            };
            let picked = char::from(picked);
            return if c.is_ascii_uppercase() {
                picked.to_ascii_uppercase()
            } else {
                picked
            };
        }
    }
    c
}
