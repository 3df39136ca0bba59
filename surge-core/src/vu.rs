use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Barrier, Notify};

use surge_metrics::Registry;

use crate::config::ThinkTime;
use crate::executor::RequestExecutor;
use crate::schedule::RampSchedule;
use crate::stats::RunStats;

#[derive(Debug)]
pub struct StartSignal {
    started: AtomicBool,
    notify: Notify,
}

impl StartSignal {
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        while !self.started.load(Ordering::Acquire) {
            self.notify.notified().await;
        }
    }
}

impl Default for StartSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// The Draining broadcast: the single cancellation mechanism. Observed by
/// every virtual user at iteration boundaries.
#[derive(Debug)]
pub struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            stopped: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn signal(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        while !self.is_stopped() {
            self.notify.notified().await;
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A failure raised by a scenario callback.
///
/// `Failed` marks the iteration failed and the virtual user keeps looping.
/// `Fatal` is for setup failures that make further iterations pointless
/// (e.g. an auth bootstrap that cannot succeed); it ends that one virtual
/// user's loop and never affects the others.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("{0}")]
    Failed(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl ScenarioError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }
}

/// Everything one virtual user task needs. Cloned per VU by the orchestrator.
#[derive(Debug, Clone)]
pub struct VuContext {
    /// 1-based id, unique across the run.
    pub vu_id: u64,
    /// Total VUs spawned for the run.
    pub vus: u64,

    pub(crate) http: RequestExecutor,
    pub(crate) stats: Arc<RunStats>,
    pub(crate) think_time: ThinkTime,
    pub(crate) seed: u64,
    pub(crate) ramp: Option<Arc<RampSchedule>>,

    pub(crate) run_started: Arc<OnceLock<Instant>>,
    pub(crate) ready_barrier: Arc<Barrier>,
    pub(crate) start_signal: Arc<StartSignal>,
    pub(crate) stop: Arc<StopSignal>,
}

/// Capabilities handed to the scenario callback for one iteration.
#[derive(Debug, Clone)]
pub struct IterationContext {
    pub vu_id: u64,
    /// 1-based iteration number within this virtual user.
    pub iteration: u64,
    http: RequestExecutor,
    stats: Arc<RunStats>,
}

impl IterationContext {
    pub fn http(&self) -> &RequestExecutor {
        &self.http
    }

    /// Record a named pass/fail check. Returns `passed` so checks compose
    /// inline with scenario control flow.
    pub fn check(&self, name: &str, passed: bool) -> bool {
        self.stats.record_check(name, passed);
        passed
    }

    /// The run's metric registry, for registering custom metrics.
    pub fn metrics(&self) -> &Arc<Registry> {
        self.stats.metrics()
    }
}

pub(crate) async fn run_vu<F, Fut>(ctx: VuContext, scenario: F)
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ScenarioError>> + Send + 'static,
{
    // Park until every VU is spawned, then until the runner opens the gate.
    // This keeps startup cost out of the measured runtime and avoids per-VU
    // start skew.
    ctx.ready_barrier.wait().await;
    ctx.start_signal.wait().await;

    let started = ctx
        .run_started
        .get()
        .copied()
        .unwrap_or_else(Instant::now);

    let mut rng = fastrand::Rng::with_seed(ctx.seed ^ ctx.vu_id);
    let mut iteration: u64 = 0;

    loop {
        if ctx.stop.is_stopped() {
            break;
        }

        // Under a staged ramp, VUs above the current target wait their turn.
        if let Some(schedule) = &ctx.ramp {
            let elapsed = started.elapsed();
            if ctx.vu_id > schedule.target_at(elapsed) {
                let wait = schedule
                    .next_recheck_in(elapsed, ctx.vu_id)
                    .max(Duration::from_millis(1));
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = ctx.stop.wait() => break,
                }
                continue;
            }
        }

        iteration = iteration.saturating_add(1);
        let iter_started = Instant::now();
        let ictx = IterationContext {
            vu_id: ctx.vu_id,
            iteration,
            http: ctx.http.clone(),
            stats: ctx.stats.clone(),
        };

        match scenario(ictx).await {
            Ok(()) => ctx.stats.record_iteration(iter_started.elapsed(), true),
            Err(ScenarioError::Failed(reason)) => {
                ctx.stats.record_iteration(iter_started.elapsed(), false);
                tracing::warn!(vu_id = ctx.vu_id, iteration, %reason, "scenario iteration failed");
            }
            Err(ScenarioError::Fatal(reason)) => {
                ctx.stats.record_iteration(iter_started.elapsed(), false);
                tracing::error!(
                    vu_id = ctx.vu_id,
                    iteration,
                    %reason,
                    "fatal scenario failure, stopping this virtual user"
                );
                break;
            }
        }

        if ctx.stop.is_stopped() {
            break;
        }

        if let Some(delay) = ctx.think_time.sample(&mut rng) {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.stop.wait() => break,
            }
        }
    }
}
