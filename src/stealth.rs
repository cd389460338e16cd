//! The stealth coordinator: risk-gated, paced execution of page operations.
//!
//! Every operation against the booking site goes through
//! [`StealthCoordinator::execute`]. It scores the current risk, refuses to
//! run the operation when the score is too high, and otherwise wraps it in
//! human-paced delays drawn from an [`IntervalSource`].
//!
//! Risk is an additive score capped at 100:
//!
//! | factor                         | default weight |
//! |--------------------------------|----------------|
//! | base detection risk            | from signals   |
//! | session older than 8h          | +10            |
//! | more than 20 ops in last hour  | +15            |
//! | success rate under 50%         | +20            |
//! | fingerprint inconsistency      | up to +20      |
//! | captcha on page                | +30            |
//! | rate-limit response            | +25            |
//! | emergency mode active          | +25            |
//!
//! Blocks and failures are results, not errors.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::model::{RiskAssessment, RiskLevel};
use crate::mouse::{MouseSimulator, Point};
use crate::timing::{ActionType, IntervalSource, TimingContext, TimingEngine};

const HOUR: Duration = Duration::from_secs(3600);

/// How cautious the pacing is overall.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StealthLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl StealthLevel {
    /// Multiplier applied to every pre- and post-operation delay.
    #[must_use]
    pub const fn delay_scale(self) -> f64 {
        match self {
            Self::Low => 0.7,
            Self::Medium => 1.0,
            Self::High => 1.4,
        }
    }
}

impl fmt::Display for StealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

impl FromStr for StealthLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown stealth level: {other}")),
        }
    }
}

/// Additive risk weights. Empirically tuned; override freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub long_session: u8,
    pub long_session_after: Duration,
    pub high_frequency: u8,
    pub high_frequency_ops: usize,
    pub low_success_rate: u8,
    pub low_success_below: f64,

    /// Operations needed before the success rate counts.
    pub min_ops_for_rate: u64,
    pub fingerprint_max: u8,
    pub captcha: u8,
    pub rate_limited: u8,
    pub emergency: u8,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            long_session: 10,
            long_session_after: 8 * HOUR,
            high_frequency: 15,
            high_frequency_ops: 20,
            low_success_rate: 20,
            low_success_below: 0.5,
            min_ops_for_rate: 5,
            fingerprint_max: 20,
            captcha: 30,
            rate_limited: 25,
            emergency: 25,
        }
    }
}

/// Coordinator thresholds and pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StealthConfig {
    pub level: StealthLevel,

    /// Operations scoring at least this are classed HIGH and blocked.
    pub max_risk_score: u8,

    /// A blocked score at least this high trips emergency mode.
    pub emergency_threshold: u8,

    /// Blocking threshold while emergency mode is active.
    pub emergency_max_risk_score: u8,
    pub emergency_pause: Duration,

    /// Whether high scores may trip emergency mode on their own.
    pub adaptive_mode: bool,
    pub weights: RiskWeights,
}

impl Default for StealthConfig {
    fn default() -> Self {
        Self {
            level: StealthLevel::Medium,
            max_risk_score: 60,
            emergency_threshold: 70,
            emergency_max_risk_score: 30,
            emergency_pause: Duration::from_secs(10),
            adaptive_mode: true,
            weights: RiskWeights::default(),
        }
    }
}

/// Signals about how the site currently perceives this browser session.
pub trait RiskSignals {
    /// Baseline detection risk, 0–100.
    fn base_risk_score(&self) -> u8;

    /// How consistent the browser fingerprint has been, 0.0–1.0.
    fn fingerprint_consistency(&self) -> f64;
}

/// Fixed signals, for when nothing better is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticRiskSignals {
    pub base: u8,
    pub consistency: f64,
}

impl Default for StaticRiskSignals {
    fn default() -> Self {
        Self {
            base: 10,
            consistency: 1.0,
        }
    }
}

impl RiskSignals for StaticRiskSignals {
    fn base_risk_score(&self) -> u8 {
        self.base
    }

    fn fingerprint_consistency(&self) -> f64 {
        self.consistency
    }
}

/// What the caller knows about the operation about to run.
#[derive(Debug, Clone, PartialEq)]
pub struct StealthContext {
    /// How much reading or deciding the step involves. 1.0 is ordinary.
    pub complexity: f64,

    /// How consequential the step is. 1.0 is ordinary.
    pub importance: f64,

    /// Where the pointer must end up before the operation, if anywhere.
    pub target: Option<Point>,
    pub captcha_detected: bool,
    pub rate_limited: bool,
}

impl Default for StealthContext {
    fn default() -> Self {
        Self {
            complexity: 1.0,
            importance: 1.0,
            target: None,
            captcha_detected: false,
            rate_limited: false,
        }
    }
}

/// How a protected operation went.
#[derive(Debug, Clone, PartialEq)]
pub enum StealthOutcome<T> {
    /// Refused on risk grounds; the operation never ran.
    Blocked {
        reason: String,
        risk_score: u8,
        factors: Vec<String>,
    },

    /// The operation ran and succeeded.
    Completed {
        result: T,
        risk_level: RiskLevel,
        risk_score: u8,
        stealth_measures: Vec<String>,
    },

    /// The operation ran and failed. Always reported as HIGH risk.
    Failed {
        error: String,
        risk_level: RiskLevel,
        risk_score: u8,
    },
}

impl<T> StealthOutcome<T> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// Rolling session figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StealthStatistics {
    pub active: bool,
    pub level: StealthLevel,
    pub session_age_secs: u64,
    pub total_operations: u64,
    pub successful_operations: u64,
    pub success_rate: f64,
    pub operations_last_hour: usize,
    pub emergency_mode: bool,
    pub risk_threshold: u8,
}

/// Scores, gates, and paces operations against the booking site.
pub struct StealthCoordinator<T = TimingEngine> {
    config: StealthConfig,
    timing: T,
    signals: Box<dyn RiskSignals + Send + Sync>,
    mouse: Box<dyn MouseSimulator + Send>,

    /// Set on the first operation.
    session_start: Option<Instant>,
    total_operations: u64,
    successful_operations: u64,
    recent_operations: VecDeque<Instant>,
    emergency: bool,
    risk_threshold: u8,
    pointer: Point,
}

impl<T> fmt::Debug for StealthCoordinator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StealthCoordinator")
            .field("config", &self.config)
            .field("session_start", &self.session_start)
            .field("total_operations", &self.total_operations)
            .field("successful_operations", &self.successful_operations)
            .field("emergency", &self.emergency)
            .field("risk_threshold", &self.risk_threshold)
            .finish_non_exhaustive()
    }
}

impl<T: IntervalSource> StealthCoordinator<T> {
    pub fn new(
        config: StealthConfig,
        timing: T,
        signals: Box<dyn RiskSignals + Send + Sync>,
        mouse: Box<dyn MouseSimulator + Send>,
    ) -> Self {
        let risk_threshold = config.max_risk_score;
        Self {
            config,
            timing,
            signals,
            mouse,
            session_start: None,
            total_operations: 0,
            successful_operations: 0,
            recent_operations: VecDeque::new(),
            emergency: false,
            risk_threshold,
            pointer: Point::default(),
        }
    }

    #[must_use]
    pub fn timing(&self) -> &T {
        &self.timing
    }

    #[must_use]
    pub fn is_emergency(&self) -> bool {
        self.emergency
    }

    /// Score the risk of running an operation now.
    #[must_use]
    pub fn assess_risk(&self, context: &StealthContext) -> RiskAssessment {
        let now = Instant::now();
        let weights = &self.config.weights;
        let mut score: u32 = 0;
        let mut factors = Vec::new();
        let mut add = |points: u8, factor: String| {
            if points > 0 {
                score += u32::from(points);
                factors.push(factor);
            }
        };

        let base = self.signals.base_risk_score();
        add(base, format!("base detection risk {base}"));

        if self
            .session_start
            .is_some_and(|start| now.duration_since(start) > weights.long_session_after)
        {
            add(weights.long_session, "long session".to_string());
        }

        let last_hour = self.operations_within_hour(now);
        if last_hour > weights.high_frequency_ops {
            add(
                weights.high_frequency,
                format!("high frequency: {last_hour} operations in the last hour"),
            );
        }

        if self.total_operations >= weights.min_ops_for_rate {
            let rate = self.success_rate();
            if rate < weights.low_success_below {
                add(
                    weights.low_success_rate,
                    format!("low success rate {:.0}%", rate * 100.0),
                );
            }
        }

        let inconsistency = (1.0 - self.signals.fingerprint_consistency()).clamp(0.0, 1.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let fingerprint = (inconsistency * f64::from(weights.fingerprint_max)).round() as u8;
        add(fingerprint, "fingerprint inconsistency".to_string());

        if context.captcha_detected {
            add(weights.captcha, "captcha on page".to_string());
        }
        if context.rate_limited {
            add(weights.rate_limited, "rate limited".to_string());
        }
        if self.emergency {
            add(weights.emergency, "emergency mode active".to_string());
        }

        let risk_score = u8::try_from(score.min(100)).unwrap_or(100);
        let risk_level = RiskLevel::from_score(risk_score, self.risk_threshold);
        RiskAssessment {
            risk_level,
            risk_score,
            should_block: risk_level == RiskLevel::High,
            factors,
        }
    }

    /// Run `operation` under risk gating and human pacing.
    ///
    /// The operation is not invoked at all when the assessment blocks. An
    /// `Err` from the operation becomes [`StealthOutcome::Failed`] and
    /// counts as a failed operation; nothing else about the session changes.
    pub async fn execute<F, Fut, V, E>(
        &mut self,
        kind: ActionType,
        context: &StealthContext,
        operation: F,
    ) -> StealthOutcome<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: fmt::Display,
    {
        self.ensure_active();
        let now = Instant::now();
        self.prune_recent(now);

        let assessment = self.assess_risk(context);
        if assessment.should_block {
            warn!(
                %kind,
                score = assessment.risk_score,
                factors = ?assessment.factors,
                "operation blocked"
            );
            let reason = format!(
                "risk score {} at or above threshold {}",
                assessment.risk_score, self.risk_threshold
            );
            if self.config.adaptive_mode
                && !self.emergency
                && assessment.risk_score >= self.config.emergency_threshold
            {
                self.activate_emergency_mode(&format!(
                    "risk score {} on {kind}",
                    assessment.risk_score
                ))
                .await;
            }
            return StealthOutcome::Blocked {
                reason,
                risk_score: assessment.risk_score,
                factors: assessment.factors,
            };
        }

        let timing_context = TimingContext {
            stress: false,
            careful: assessment.risk_level >= RiskLevel::Medium,
        };
        let scale = self.config.level.delay_scale();
        let mut measures = Vec::new();

        let weight = 0.5 + 0.25 * context.complexity.max(0.0) + 0.25 * context.importance.max(0.0);
        let thinking = scaled(self.timing.interval(kind, timing_context), weight * scale);
        sleep(Duration::from_millis(thinking)).await;
        measures.push(format!("thinking delay {thinking}ms"));

        if let Some(target) = context.target {
            let path = self.mouse.path(self.pointer, target);
            let travel: u64 = path.iter().map(|step| step.delay_ms).sum();
            sleep(Duration::from_millis(travel)).await;
            self.pointer = target;
            measures.push(format!("pointer path {} steps over {travel}ms", path.len()));
        }

        self.recent_operations.push_back(now);
        self.total_operations += 1;
        let result = operation().await;

        match result {
            Ok(result) => {
                self.successful_operations += 1;
                let settle = scaled(self.timing.interval(kind, timing_context), 0.5 * scale);
                sleep(Duration::from_millis(settle)).await;
                measures.push(format!("settle delay {settle}ms"));
                debug!(%kind, score = assessment.risk_score, "operation completed");

                StealthOutcome::Completed {
                    result,
                    risk_level: assessment.risk_level,
                    risk_score: assessment.risk_score,
                    stealth_measures: measures,
                }
            }
            Err(err) => {
                let recovery = scaled(
                    self.timing.interval(ActionType::Pause, TimingContext::careful()),
                    scale,
                );
                sleep(Duration::from_millis(recovery)).await;
                warn!(%kind, error = %err, recovery_ms = recovery, "operation failed");

                StealthOutcome::Failed {
                    error: err.to_string(),
                    risk_level: RiskLevel::High,
                    risk_score: assessment.risk_score,
                }
            }
        }
    }

    /// Trip the circuit breaker: lower the blocking threshold, add the
    /// emergency risk factor to every assessment, and pause.
    pub async fn activate_emergency_mode(&mut self, trigger: &str) {
        self.ensure_active();
        self.emergency = true;
        self.risk_threshold = self
            .risk_threshold
            .min(self.config.emergency_max_risk_score);
        warn!(
            trigger,
            threshold = self.risk_threshold,
            pause_ms = self.config.emergency_pause.as_millis(),
            total_operations = self.total_operations,
            "emergency mode activated"
        );
        sleep(self.config.emergency_pause).await;
    }

    /// Restore normal thresholds.
    pub fn deactivate_emergency_mode(&mut self) {
        if self.emergency {
            info!("emergency mode deactivated");
        }
        self.emergency = false;
        self.risk_threshold = self.config.max_risk_score;
    }

    #[must_use]
    pub fn stealth_statistics(&self) -> StealthStatistics {
        let now = Instant::now();
        StealthStatistics {
            active: self.session_start.is_some(),
            level: self.config.level,
            session_age_secs: self
                .session_start
                .map_or(0, |start| now.duration_since(start).as_secs()),
            total_operations: self.total_operations,
            successful_operations: self.successful_operations,
            success_rate: self.success_rate(),
            operations_last_hour: self.operations_within_hour(now),
            emergency_mode: self.emergency,
            risk_threshold: self.risk_threshold,
        }
    }

    fn ensure_active(&mut self) {
        if self.session_start.is_none() {
            info!(level = %self.config.level, "stealth session started");
            self.session_start = Some(Instant::now());
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            1.0
        } else {
            self.successful_operations as f64 / self.total_operations as f64
        }
    }

    fn operations_within_hour(&self, now: Instant) -> usize {
        self.recent_operations
            .iter()
            .filter(|&&at| now.duration_since(at) < HOUR)
            .count()
    }

    fn prune_recent(&mut self, now: Instant) {
        while self
            .recent_operations
            .front()
            .is_some_and(|&at| now.duration_since(at) >= HOUR)
        {
            self.recent_operations.pop_front();
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn scaled(ms: u64, factor: f64) -> u64 {
    (ms as f64 * factor).max(0.0).round() as u64
}
