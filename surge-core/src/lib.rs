mod config;
mod error;
mod executor;
mod http;
mod run;
mod schedule;
mod stats;
mod thresholds;
mod vu;

pub use config::{DEFAULT_GRACE_PERIOD, DEFAULT_HTTP_TIMEOUT, Stage, TestConfig, ThinkTime};
pub use error::{Error, Result};
pub use executor::{RequestExecutor, RequestResult};
pub use http::{
    Error as HttpError, HttpClient, HttpRequest, HttpResponse, Result as HttpResult,
    TransportErrorKind,
};
pub use run::{PhaseFn, RunPhase, run_test, run_test_observed};
pub use schedule::RampSchedule;
pub use stats::{CheckSummary, LatencySnapshot, RunStats, RunSummary};
pub use thresholds::{
    ThresholdExpr, ThresholdOp, ThresholdOutcome, ThresholdRule, ThresholdStat,
    evaluate_thresholds, parse_threshold_expr,
};
pub use vu::{IterationContext, ScenarioError, StartSignal, StopSignal, VuContext};

pub use surge_metrics::{
    MetricHandle, MetricKind, MetricSeriesSummary, MetricValue, Registry, TagSet, TrendSummary,
};
