use std::time::Duration;

use crate::error::{Error, Result};
use crate::thresholds::{ThresholdRule, ThresholdStat};

/// Default per-request timeout applied when a request does not set its own.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time drained virtual users get to finish their in-flight iteration.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// One staged-ramp step: ramp the active VU count to `target` over `duration`.
#[derive(Debug, Clone)]
pub struct Stage {
    pub target: u64,
    pub duration: Duration,
}

/// Pacing delay applied between iterations of one virtual user.
#[derive(Debug, Clone, Default)]
pub enum ThinkTime {
    #[default]
    None,
    Fixed(Duration),
    /// Sampled uniformly from `[min, max]` per iteration.
    Range { min: Duration, max: Duration },
}

impl ThinkTime {
    pub(crate) fn sample(&self, rng: &mut fastrand::Rng) -> Option<Duration> {
        match self {
            ThinkTime::None => None,
            ThinkTime::Fixed(d) => (!d.is_zero()).then_some(*d),
            ThinkTime::Range { min, max } => {
                let span = max.saturating_sub(*min);
                let delay = if span.is_zero() {
                    *min
                } else {
                    let span_ns = u64::try_from(span.as_nanos()).unwrap_or(u64::MAX);
                    min.saturating_add(Duration::from_nanos(rng.u64(0..=span_ns)))
                };
                (!delay.is_zero()).then_some(delay)
            }
        }
    }
}

/// Immutable run configuration. Validated once, before any virtual user starts.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub vus: u64,
    pub duration: Duration,

    /// Empty means all VUs start at once. Non-empty stages must fit within
    /// `duration` and end at `vus`.
    pub ramp: Vec<Stage>,

    pub think_time: ThinkTime,
    pub thresholds: Vec<ThresholdRule>,

    /// Default per-request timeout; overridable per request.
    pub http_timeout: Duration,

    /// How long Draining waits for in-flight iterations before force-stopping.
    pub grace_period: Duration,

    /// Seed for the per-VU random sources (think-time sampling).
    pub seed: u64,
}

impl TestConfig {
    pub fn new(vus: u64, duration: Duration) -> Self {
        Self {
            vus,
            duration,
            ramp: Vec::new(),
            think_time: ThinkTime::None,
            thresholds: Vec::new(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            seed: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.vus == 0 {
            return Err(Error::InvalidVus);
        }
        if self.duration.is_zero() {
            return Err(Error::InvalidDuration);
        }

        if let ThinkTime::Range { min, max } = &self.think_time
            && min > max
        {
            return Err(Error::InvalidThinkTime);
        }

        if !self.ramp.is_empty() {
            let total = ramp_total_duration(&self.ramp);
            if total.is_zero() {
                return Err(Error::InvalidStages);
            }
            if total > self.duration {
                return Err(Error::RampExceedsDuration);
            }
            if self.ramp.last().map(|s| s.target) != Some(self.vus) {
                return Err(Error::RampFinalTarget);
            }
        }

        for rule in &self.thresholds {
            if let ThresholdStat::P(p) = rule.expr.stat
                && p > 100
            {
                return Err(Error::InvalidThreshold {
                    metric: rule.metric.clone(),
                    error: format!("percentile out of range: p({p})"),
                });
            }
        }

        Ok(())
    }
}

pub(crate) fn ramp_total_duration(stages: &[Stage]) -> Duration {
    stages
        .iter()
        .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
}
