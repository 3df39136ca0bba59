use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

use tokio::sync::Barrier;
use tokio::task::JoinSet;

use crate::config::{TestConfig, ramp_total_duration};
use crate::error::Result;
use crate::executor::RequestExecutor;
use crate::http::HttpClient;
use crate::schedule::RampSchedule;
use crate::stats::{RunStats, RunSummary};
use crate::thresholds::evaluate_thresholds;
use crate::vu::{IterationContext, ScenarioError, StartSignal, StopSignal, VuContext, run_vu};

/// Run lifecycle. Transitions are strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Ramping,
    Running,
    Draining,
    Completed,
}

pub type PhaseFn = Arc<dyn Fn(RunPhase) + Send + Sync + 'static>;

pub async fn run_test<F, Fut>(config: TestConfig, scenario: F) -> Result<RunSummary>
where
    F: Fn(IterationContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = std::result::Result<(), ScenarioError>> + Send + 'static,
{
    run_test_observed(config, scenario, None).await
}

/// Like [`run_test`], with a callback observing each phase transition.
pub async fn run_test_observed<F, Fut>(
    config: TestConfig,
    scenario: F,
    on_phase: Option<PhaseFn>,
) -> Result<RunSummary>
where
    F: Fn(IterationContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = std::result::Result<(), ScenarioError>> + Send + 'static,
{
    let set_phase = |phase: RunPhase| {
        if let Some(f) = &on_phase {
            f(phase);
        }
    };

    set_phase(RunPhase::Idle);

    // Only configuration errors escape; everything past this point is
    // recorded, never propagated.
    config.validate()?;

    let vus = usize::try_from(config.vus).unwrap_or(usize::MAX);

    let stats = Arc::new(RunStats::default());
    // The pool must be at least VU-sized so connection reuse never queues
    // and biases duration measurements.
    let client = Arc::new(HttpClient::with_pool_size(vus));
    let executor = RequestExecutor::new(client, stats.clone(), config.http_timeout);

    let ramp = (!config.ramp.is_empty())
        .then(|| Arc::new(RampSchedule::new(0, config.ramp.clone())));
    let ramp_total = ramp_total_duration(&config.ramp);

    let ready_barrier = Arc::new(Barrier::new(vus.saturating_add(1)));
    let start_signal = Arc::new(StartSignal::new());
    let stop = Arc::new(StopSignal::new());
    let run_started: Arc<OnceLock<Instant>> = Arc::new(OnceLock::new());

    set_phase(RunPhase::Ramping);

    let mut workers = JoinSet::new();
    for vu_id in 1..=config.vus {
        let ctx = VuContext {
            vu_id,
            vus: config.vus,
            http: executor.clone(),
            stats: stats.clone(),
            think_time: config.think_time.clone(),
            seed: config.seed,
            ramp: ramp.clone(),
            run_started: run_started.clone(),
            ready_barrier: ready_barrier.clone(),
            start_signal: start_signal.clone(),
            stop: stop.clone(),
        };
        workers.spawn(run_vu(ctx, scenario.clone()));
    }

    // Block until every VU is parked on the barrier, then start the clock.
    // Spawn cost stays out of the measured runtime.
    ready_barrier.wait().await;

    let started = Instant::now();
    let _ = run_started.set(started);
    start_signal.start();

    if !ramp_total.is_zero() {
        tokio::time::sleep(ramp_total).await;
    }
    set_phase(RunPhase::Running);

    tokio::time::sleep(config.duration.saturating_sub(started.elapsed())).await;

    set_phase(RunPhase::Draining);
    stop.signal();

    let drain = async {
        while let Some(res) = workers.join_next().await {
            if let Err(err) = res
                && err.is_panic()
            {
                tracing::error!(%err, "virtual user task panicked");
            }
        }
    };

    if tokio::time::timeout(config.grace_period, drain)
        .await
        .is_err()
    {
        // Stragglers lose their in-flight iteration; it stays uncounted.
        tracing::warn!(
            remaining = workers.len(),
            "grace period exceeded, force-stopping stalled virtual users"
        );
        workers.abort_all();
        while let Some(res) = workers.join_next().await {
            if let Err(err) = res
                && err.is_panic()
            {
                tracing::error!(%err, "virtual user task panicked");
            }
        }
    }

    stats.seal();
    set_phase(RunPhase::Completed);

    let metrics = stats.metrics().snapshot();
    let (thresholds, passed) = evaluate_thresholds(&config.thresholds, &metrics);
    Ok(stats.summarize(started.elapsed(), metrics, thresholds, passed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThinkTime;
    use crate::error::Error;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn invalid_config_aborts_before_ramping() {
        let config = TestConfig::new(0, Duration::from_secs(1));

        let phases: Arc<Mutex<Vec<RunPhase>>> = Arc::new(Mutex::new(Vec::new()));
        let observer: PhaseFn = {
            let phases = phases.clone();
            Arc::new(move |phase| {
                phases
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(phase);
            })
        };

        let result =
            run_test_observed(config, |_ctx| async { Ok(()) }, Some(observer)).await;
        assert!(matches!(result, Err(Error::InvalidVus)));

        let seen = phases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        assert_eq!(seen, vec![RunPhase::Idle]);
    }

    #[tokio::test]
    async fn phases_progress_in_order_and_draining_waits_for_the_deadline() {
        let mut config = TestConfig::new(2, Duration::from_millis(300));
        config.think_time = ThinkTime::Fixed(Duration::from_millis(5));

        let events: Arc<Mutex<Vec<(RunPhase, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
        let observer: PhaseFn = {
            let events = events.clone();
            Arc::new(move |phase| {
                events
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push((phase, Instant::now()));
            })
        };

        let launched = Instant::now();
        let summary = match run_test_observed(config, |_ctx| async { Ok(()) }, Some(observer))
            .await
        {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        };

        let seen = events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let order: Vec<RunPhase> = seen.iter().map(|(p, _)| *p).collect();
        assert_eq!(
            order,
            vec![
                RunPhase::Idle,
                RunPhase::Ramping,
                RunPhase::Running,
                RunPhase::Draining,
                RunPhase::Completed,
            ]
        );

        let draining_at = seen
            .iter()
            .find(|(p, _)| *p == RunPhase::Draining)
            .map(|(_, at)| *at)
            .unwrap_or_else(|| panic!("missing draining event"));
        assert!(draining_at.duration_since(launched) >= Duration::from_millis(300));

        assert!(summary.iterations_total > 0);
        assert!(summary.passed);
    }

    #[tokio::test]
    async fn failing_iterations_do_not_stop_the_run() {
        let mut config = TestConfig::new(1, Duration::from_millis(150));
        config.think_time = ThinkTime::Fixed(Duration::from_millis(2));

        let summary = match run_test(config, |ctx| async move {
            Err(ScenarioError::failed(format!(
                "iteration {} always fails",
                ctx.iteration
            )))
        })
        .await
        {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        };

        assert!(summary.iterations_total > 1);
        assert_eq!(summary.failed_iterations_total, summary.iterations_total);
    }

    #[tokio::test]
    async fn fatal_failure_stops_only_the_failing_vu() {
        let mut config = TestConfig::new(2, Duration::from_millis(200));
        config.think_time = ThinkTime::Fixed(Duration::from_millis(2));

        let summary = match run_test(config, |ctx| async move {
            if ctx.vu_id == 1 {
                Err(ScenarioError::fatal("cannot authenticate"))
            } else {
                Ok(())
            }
        })
        .await
        {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        };

        // VU 1 records exactly one (failed) iteration; VU 2 keeps going.
        assert_eq!(summary.failed_iterations_total, 1);
        assert!(summary.iterations_total > 2);
    }

    #[tokio::test]
    async fn stalled_vus_are_force_stopped_after_the_grace_period() {
        let mut config = TestConfig::new(1, Duration::from_millis(100));
        config.grace_period = Duration::from_millis(100);

        let launched = Instant::now();
        let summary = match run_test(config, |_ctx| async {
            // Never observes the stop signal within the grace period.
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await
        {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        };

        // The aborted in-flight iteration stays uncounted.
        assert_eq!(summary.iterations_total, 0);
        assert!(launched.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn staged_ramp_delays_late_vus() {
        let mut config = TestConfig::new(2, Duration::from_millis(400));
        config.ramp = vec![
            crate::config::Stage {
                target: 1,
                duration: Duration::from_millis(200),
            },
            crate::config::Stage {
                target: 2,
                duration: Duration::from_millis(100),
            },
        ];
        config.think_time = ThinkTime::Fixed(Duration::from_millis(5));

        let summary = match run_test(config, |_ctx| async { Ok(()) }).await {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        };

        assert!(summary.iterations_total > 0);
    }
}
