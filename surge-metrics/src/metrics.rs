use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::registry::{MetricId, Registry};
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum MetricKind {
    Trend,
    Counter,
    Rate,
}

#[derive(Debug, Clone)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub values: MetricValue,
}

#[derive(Debug, Clone)]
pub enum MetricValue {
    Trend(TrendSummary),
    Counter {
        value: f64,
    },
    Rate {
        total: u64,
        trues: u64,
        /// `None` means no samples were recorded ("no data"), not zero.
        rate: Option<f64>,
    },
}

#[derive(Debug, Clone)]
pub struct TrendSummary {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    sorted: Arc<[f64]>,
}

impl TrendSummary {
    fn empty() -> Self {
        Self {
            count: 0,
            min: None,
            max: None,
            avg: None,
            p50: None,
            p90: None,
            p95: None,
            p99: None,
            sorted: Arc::from([]),
        }
    }

    /// Percentile p over the recorded samples.
    ///
    /// Defined as the value at rank `ceil(p/100 * n)` (1-based, clamped to
    /// `[1, n]`) of the stable-sorted sample sequence, so `p(0)` is the
    /// minimum and `p(100)` the maximum. Ties keep input order.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.sorted.is_empty() || !(0.0..=100.0).contains(&p) {
            return None;
        }

        let n = self.sorted.len();
        let rank = ((p / 100.0) * n as f64).ceil() as usize;
        let rank = rank.clamp(1, n);
        Some(self.sorted[rank - 1])
    }
}

#[derive(Debug, Default)]
struct TrendAgg {
    samples: Mutex<Vec<f64>>,
}

impl TrendAgg {
    fn record(&self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.samples.lock().push(value);
    }

    fn summarize(&self) -> TrendSummary {
        // Clone under the lock: a concurrent snapshot sees a consistent
        // prefix of the sample sequence, never a torn state.
        let samples = self.samples.lock().clone();
        if samples.is_empty() {
            return TrendSummary::empty();
        }

        let count = samples.len() as u64;
        let sum: f64 = samples.iter().sum();

        let mut sorted = samples;
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let min = sorted.first().copied();
        let max = sorted.last().copied();

        let mut summary = TrendSummary {
            count,
            min,
            max,
            avg: Some(sum / count as f64),
            p50: None,
            p90: None,
            p95: None,
            p99: None,
            sorted: Arc::from(sorted.into_boxed_slice()),
        };
        summary.p50 = summary.percentile(50.0);
        summary.p90 = summary.percentile(90.0);
        summary.p95 = summary.percentile(95.0);
        summary.p99 = summary.percentile(99.0);
        summary
    }
}

#[derive(Debug, Default)]
struct CounterAgg {
    value: Mutex<f64>,
}

impl CounterAgg {
    fn add(&self, v: f64) {
        if !v.is_finite() {
            return;
        }
        let mut guard = self.value.lock();
        *guard += v;
    }

    fn get(&self) -> f64 {
        *self.value.lock()
    }
}

#[derive(Debug, Default)]
struct RateAgg {
    total: AtomicU64,
    trues: AtomicU64,
}

impl RateAgg {
    fn add(&self, v: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if v {
            self.trues.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn summarize(&self) -> MetricValue {
        let total = self.total.load(Ordering::Relaxed);
        let trues = self.trues.load(Ordering::Relaxed);
        let rate = if total == 0 {
            None
        } else {
            Some(trues as f64 / total as f64)
        };
        MetricValue::Rate { total, trues, rate }
    }
}

#[derive(Debug)]
enum MetricStorage {
    Trend(TrendAgg),
    Counter(CounterAgg),
    Rate(RateAgg),
}

#[derive(Debug)]
pub struct Metric {
    kind: MetricKind,
    name: Arc<str>,
    tags: TagSet,
    storage: MetricStorage,
}

impl Metric {
    pub(crate) fn new(kind: MetricKind, name: Arc<str>, tags: TagSet) -> Self {
        let storage = match kind {
            MetricKind::Trend => MetricStorage::Trend(TrendAgg::default()),
            MetricKind::Counter => MetricStorage::Counter(CounterAgg::default()),
            MetricKind::Rate => MetricStorage::Rate(RateAgg::default()),
        };
        Self {
            kind,
            name,
            tags,
            storage,
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn add(&self, value: f64) {
        match &self.storage {
            MetricStorage::Trend(t) => t.record(value),
            MetricStorage::Counter(c) => c.add(value),
            MetricStorage::Rate(_) => {
                // ignore; use add_bool
            }
        }
    }

    pub fn add_bool(&self, value: bool) {
        if let MetricStorage::Rate(r) = &self.storage {
            r.add(value);
        }
    }

    pub(crate) fn summarize(&self) -> MetricSeriesSummary {
        let values = match &self.storage {
            MetricStorage::Trend(t) => MetricValue::Trend(t.summarize()),
            MetricStorage::Counter(c) => MetricValue::Counter { value: c.get() },
            MetricStorage::Rate(r) => r.summarize(),
        };

        MetricSeriesSummary {
            name: self.name.to_string(),
            kind: self.kind,
            tags: self.tags.to_pairs(),
            values,
        }
    }
}

// Public handle for writing metrics
#[derive(Debug, Clone)]
pub struct MetricHandle {
    pub(crate) registry: Arc<Registry>,
    pub(crate) id: MetricId,
    pub(crate) base: Arc<Metric>,
}

impl MetricHandle {
    #[inline]
    pub fn add(&self, value: f64) {
        self.base.add(value);
    }

    #[inline]
    pub fn add_bool(&self, value: bool) {
        self.base.add_bool(value);
    }

    /// Record into the base series plus a series keyed by exactly `tags`.
    pub fn add_with_tags(&self, value: f64, tags: &[(String, String)]) {
        self.base.add(value);
        if tags.is_empty() {
            return;
        }
        self.registry
            .series(self.id, TagSet::normalize(tags))
            .add(value);
    }

    pub fn add_bool_with_tags(&self, value: bool, tags: &[(String, String)]) {
        self.base.add_bool(value);
        if tags.is_empty() {
            return;
        }
        self.registry
            .series(self.id, TagSet::normalize(tags))
            .add_bool(value);
    }

    pub fn kind(&self) -> MetricKind {
        self.base.kind
    }
}
