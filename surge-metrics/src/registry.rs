use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::metrics::{Metric, MetricHandle, MetricKind, MetricSeriesSummary};
use crate::tags::TagSet;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("metric `{name}` is already registered as {existing}, cannot register as {requested}")]
    KindConflict {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
struct MetricDef {
    name: Arc<str>,
    kind: MetricKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    id: MetricId,
    tags: TagSet,
}

#[derive(Debug, Default)]
pub struct Registry {
    defs: RwLock<Vec<MetricDef>>,
    series: DashMap<SeriesKey, Arc<Metric>>,
}

impl Registry {
    /// Register a metric by name.
    ///
    /// Idempotent for a matching kind: the existing id is returned.
    /// A conflicting kind for an already-registered name is a configuration
    /// error.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        let mut defs = self.defs.write();
        if let Some((idx, def)) = defs
            .iter()
            .enumerate()
            .find(|(_, d)| d.name.as_ref() == name)
        {
            if def.kind != kind {
                return Err(Error::KindConflict {
                    name: name.to_string(),
                    existing: def.kind,
                    requested: kind,
                });
            }
            return Ok(MetricId(idx as u32));
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: Arc::from(name),
            kind,
        });
        Ok(id)
    }

    /// Resolve the untagged base series of a registered metric.
    pub fn handle(self: &Arc<Self>, id: MetricId) -> MetricHandle {
        let base = self.series(id, TagSet::default());
        MetricHandle {
            registry: self.clone(),
            id,
            base,
        }
    }

    /// `register` + `handle` in one step.
    pub fn register_handle(self: &Arc<Self>, name: &str, kind: MetricKind) -> Result<MetricHandle> {
        let id = self.register(name, kind)?;
        Ok(self.handle(id))
    }

    pub(crate) fn series(self: &Arc<Self>, id: MetricId, tags: TagSet) -> Arc<Metric> {
        let key = SeriesKey {
            id,
            tags: tags.clone(),
        };
        if let Some(existing) = self.series.get(&key) {
            return existing.clone();
        }

        let (name, kind) = {
            let defs = self.defs.read();
            let def = &defs[id.0 as usize];
            (def.name.clone(), def.kind)
        };

        self.series
            .entry(key)
            .or_insert_with(|| Arc::new(Metric::new(kind, name, tags)))
            .clone()
    }

    /// Compute aggregates for every live series.
    ///
    /// Safe to call concurrently with adds; each series is summarized under
    /// its own lock and reflects a consistent prefix of its updates.
    pub fn snapshot(&self) -> Vec<MetricSeriesSummary> {
        let mut out = Vec::with_capacity(self.series.len());
        for entry in self.series.iter() {
            out.push(entry.value().summarize());
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        out
    }
}
