pub mod metrics;
pub mod registry;
pub mod tags;

pub use metrics::{MetricHandle, MetricKind, MetricSeriesSummary, MetricValue, TrendSummary};
pub use registry::{Error, MetricId, Registry, Result};
pub use tags::TagSet;
