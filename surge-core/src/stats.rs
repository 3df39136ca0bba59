use hdrhistogram::Histogram;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use surge_metrics::{MetricHandle, MetricKind, MetricSeriesSummary, Registry};

use crate::executor::RequestResult;
use crate::thresholds::ThresholdOutcome;

#[derive(Debug, Default)]
struct CheckCounters {
    total: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct CheckSummary {
    pub name: String,
    pub total: u64,
    pub failed: u64,
    pub pass_rate: f64,
}

#[derive(Debug, Clone)]
pub struct LatencySnapshot {
    pub mean_ms: f64,
    pub stdev_ms: f64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p75_ms: u64,
    pub p90_ms: u64,
    pub p99_ms: u64,
}

/// Final run report. Created once at test end, read-only afterward.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub iterations_total: u64,
    pub failed_iterations_total: u64,
    pub requests_total: u64,
    /// Failed requests (transport errors and 4xx/5xx) over all requests.
    pub http_failure_rate: f64,
    pub run_duration: Duration,
    pub rps: f64,
    pub latency: Option<LatencySnapshot>,
    pub checks: Vec<CheckSummary>,
    pub metrics: Vec<MetricSeriesSummary>,
    pub thresholds: Vec<ThresholdOutcome>,
    pub passed: bool,
}

/// Shared run statistics: the engine's built-in metrics plus the registry
/// scenarios record custom metrics into. The sole synchronization point
/// between virtual users.
#[derive(Debug)]
pub struct RunStats {
    sealed: AtomicBool,

    iterations_total: AtomicU64,
    failed_iterations_total: AtomicU64,
    requests_total: AtomicU64,
    transport_errors_total: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    checks_total: AtomicU64,
    checks_failed: AtomicU64,
    checks_by_name: Mutex<HashMap<Arc<str>, Arc<CheckCounters>>>,
    latency_us: Mutex<Histogram<u64>>,

    metrics: Arc<Registry>,
    metric_http_reqs: MetricHandle,
    metric_http_req_duration: MetricHandle,
    metric_http_req_failed: MetricHandle,
    metric_http_req_errors: MetricHandle,
    metric_checks: MetricHandle,
    metric_iterations: MetricHandle,
    metric_iteration_duration: MetricHandle,
    metric_data_received: MetricHandle,
    metric_data_sent: MetricHandle,
}

impl Default for RunStats {
    fn default() -> Self {
        fn new_hist() -> Histogram<u64> {
            // Track up to 60s in microseconds (with 3 sigfigs).
            Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)
                .unwrap_or_else(|err| panic!("failed to init histogram: {err}"))
        }

        fn built_in(metrics: &Arc<Registry>, name: &str, kind: MetricKind) -> MetricHandle {
            // A fresh registry cannot conflict on distinct built-in names.
            match metrics.register_handle(name, kind) {
                Ok(h) => h,
                Err(err) => panic!("failed to register built-in metric: {err}"),
            }
        }

        let metrics: Arc<Registry> = Arc::new(Registry::default());
        let metric_http_reqs = built_in(&metrics, "http_reqs", MetricKind::Counter);
        let metric_http_req_duration = built_in(&metrics, "http_req_duration", MetricKind::Trend);
        let metric_http_req_failed = built_in(&metrics, "http_req_failed", MetricKind::Rate);
        let metric_http_req_errors = built_in(&metrics, "http_req_errors", MetricKind::Counter);
        let metric_checks = built_in(&metrics, "checks", MetricKind::Rate);
        let metric_iterations = built_in(&metrics, "iterations", MetricKind::Counter);
        let metric_iteration_duration = built_in(&metrics, "iteration_duration", MetricKind::Trend);
        let metric_data_received = built_in(&metrics, "data_received", MetricKind::Counter);
        let metric_data_sent = built_in(&metrics, "data_sent", MetricKind::Counter);

        Self {
            sealed: AtomicBool::new(false),
            iterations_total: AtomicU64::new(0),
            failed_iterations_total: AtomicU64::new(0),
            requests_total: AtomicU64::new(0),
            transport_errors_total: AtomicU64::new(0),
            status_4xx: AtomicU64::new(0),
            status_5xx: AtomicU64::new(0),
            checks_total: AtomicU64::new(0),
            checks_failed: AtomicU64::new(0),
            checks_by_name: Mutex::new(HashMap::new()),
            latency_us: Mutex::new(new_hist()),

            metrics,
            metric_http_reqs,
            metric_http_req_duration,
            metric_http_req_failed,
            metric_http_req_errors,
            metric_checks,
            metric_iterations,
            metric_iteration_duration,
            metric_data_received,
            metric_data_sent,
        }
    }
}

impl RunStats {
    pub fn metrics(&self) -> &Arc<Registry> {
        &self.metrics
    }

    /// No further mutation accepted; late-arriving samples are dropped.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn iterations_total(&self) -> u64 {
        self.iterations_total.load(Ordering::Relaxed)
    }

    pub fn failed_iterations_total(&self) -> u64 {
        self.failed_iterations_total.load(Ordering::Relaxed)
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn failed_requests_total(&self) -> u64 {
        self.transport_errors_total.load(Ordering::Relaxed)
            + self.status_4xx.load(Ordering::Relaxed)
            + self.status_5xx.load(Ordering::Relaxed)
    }

    pub fn checks_total(&self) -> u64 {
        self.checks_total.load(Ordering::Relaxed)
    }

    pub fn checks_failed_total(&self) -> u64 {
        self.checks_failed.load(Ordering::Relaxed)
    }

    pub fn http_failure_rate(&self) -> f64 {
        let total = self.requests_total();
        if total == 0 {
            return 0.0;
        }
        self.failed_requests_total() as f64 / total as f64
    }

    pub fn record_iteration(&self, elapsed: Duration, success: bool) {
        if self.is_sealed() {
            tracing::debug!("dropping late iteration sample after run completed");
            return;
        }

        self.iterations_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_iterations_total.fetch_add(1, Ordering::Relaxed);
        }

        self.metric_iterations.add(1.0);
        self.metric_iteration_duration
            .add(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn record_http_request(&self, result: &RequestResult, bytes_sent: u64) {
        if self.is_sealed() {
            tracing::debug!("dropping late request sample after run completed");
            return;
        }

        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if let Some(kind) = result.error {
            self.transport_errors_total.fetch_add(1, Ordering::Relaxed);
            self.metric_http_req_errors
                .add_with_tags(1.0, &[("error".to_string(), kind.to_string())]);
        } else if let Some(status) = result.status {
            match status {
                400..=499 => {
                    self.status_4xx.fetch_add(1, Ordering::Relaxed);
                }
                500..=599 => {
                    self.status_5xx.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
        }

        self.record_latency(result.duration);

        let bytes_received = result.body.len() as u64;
        if bytes_received != 0 {
            self.metric_data_received.add(bytes_received as f64);
        }
        if bytes_sent != 0 {
            self.metric_data_sent.add(bytes_sent as f64);
        }

        let duration_ms = result.duration.as_secs_f64() * 1000.0;
        self.metric_http_reqs.add_with_tags(1.0, &result.tags);
        self.metric_http_req_duration
            .add_with_tags(duration_ms, &result.tags);
        self.metric_http_req_failed
            .add_bool_with_tags(result.is_failed(), &result.tags);
    }

    pub fn record_check(&self, name: &str, passed: bool) {
        if self.is_sealed() {
            tracing::debug!(check = name, "dropping late check sample after run completed");
            return;
        }

        self.checks_total.fetch_add(1, Ordering::Relaxed);
        if !passed {
            self.checks_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.metric_checks.add_bool(passed);

        let counters = {
            let mut map = self
                .checks_by_name
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            map.entry(Arc::from(name)).or_default().clone()
        };
        counters.total.fetch_add(1, Ordering::Relaxed);
        if !passed {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_latency(&self, elapsed: Duration) {
        let us: u64 = elapsed.as_micros().try_into().unwrap_or(u64::MAX);
        let mut h = self
            .latency_us
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = h.record(us.max(1));
    }

    pub fn latency_snapshot(&self) -> Option<LatencySnapshot> {
        let h = self
            .latency_us
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        #[allow(clippy::len_zero)]
        if h.len() == 0 {
            return None;
        }

        Some(LatencySnapshot {
            mean_ms: h.mean() / 1000.0,
            stdev_ms: h.stdev() / 1000.0,
            max_ms: h.max() / 1000,
            p50_ms: h.value_at_quantile(0.50) / 1000,
            p75_ms: h.value_at_quantile(0.75) / 1000,
            p90_ms: h.value_at_quantile(0.90) / 1000,
            p99_ms: h.value_at_quantile(0.99) / 1000,
        })
    }

    pub fn checks_summary(&self) -> Vec<CheckSummary> {
        let map = self
            .checks_by_name
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut out: Vec<CheckSummary> = map
            .iter()
            .map(|(name, counters)| {
                let total = counters.total.load(Ordering::Relaxed);
                let failed = counters.failed.load(Ordering::Relaxed);
                let pass_rate = if total == 0 {
                    0.0
                } else {
                    (total - failed) as f64 / total as f64
                };
                CheckSummary {
                    name: name.to_string(),
                    total,
                    failed,
                    pass_rate,
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn summarize(
        &self,
        run_duration: Duration,
        metrics: Vec<MetricSeriesSummary>,
        thresholds: Vec<ThresholdOutcome>,
        passed: bool,
    ) -> RunSummary {
        let requests_total = self.requests_total();
        let rps = requests_total as f64 / run_duration.as_secs_f64().max(1e-9);

        RunSummary {
            iterations_total: self.iterations_total(),
            failed_iterations_total: self.failed_iterations_total(),
            requests_total,
            http_failure_rate: self.http_failure_rate(),
            run_duration,
            rps,
            latency: self.latency_snapshot(),
            checks: self.checks_summary(),
            metrics,
            thresholds,
            passed,
        }
    }
}
