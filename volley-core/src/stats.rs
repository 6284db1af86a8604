use crate::{Aggregation, MetricKind, CHECKS, CHECK_TAG, TREND_RESOLUTION};
use hdrhistogram::Histogram;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

/// Frozen aggregate of one metric.
#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub kind: MetricKind,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    /// Samples with a non-zero value (the numerator of a rate)
    pub non_zero: u64,
    pub last: f64,
    /// Present for trends only
    pub histogram: Option<Histogram<u64>>,
}

impl MetricSnapshot {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn rate(&self) -> f64 {
        if self.count == 0 {
            0.
        } else {
            self.non_zero as f64 / self.count as f64
        }
    }

    /// Approximate percentile (`0..=100`) of a trend.
    pub fn percentile(&self, pct: f64) -> Option<f64> {
        let histogram = self.histogram.as_ref()?;
        if histogram.is_empty() {
            return None;
        }
        let raw = histogram.value_at_quantile(pct / 100.) as f64 / TREND_RESOLUTION;
        // The histogram works at bucket resolution, the exact extremes are known.
        Some(raw.clamp(self.min.max(0.), self.max.max(0.)))
    }

    /// Value of `aggregation` for this metric, `None` when it does not apply to the kind.
    pub fn aggregate(&self, aggregation: Aggregation, elapsed: Duration) -> Option<f64> {
        if !self.kind.supports(aggregation) {
            return None;
        }

        let value = match (self.kind, aggregation) {
            (MetricKind::Counter, Aggregation::Count) => self.sum,
            (MetricKind::Counter, Aggregation::Rate) => {
                let secs = elapsed.as_secs_f64();
                if secs > 0. {
                    self.sum / secs
                } else {
                    0.
                }
            }
            (MetricKind::Gauge, Aggregation::Value) => self.last,
            (MetricKind::Rate, Aggregation::Rate) => self.rate(),
            (MetricKind::Trend, Aggregation::Avg) => self.avg(),
            (MetricKind::Trend, Aggregation::Count) => self.count as f64,
            (MetricKind::Trend, Aggregation::Med) => self.percentile(50.)?,
            (MetricKind::Trend, Aggregation::Percentile(p)) => self.percentile(p)?,
            (_, Aggregation::Min) => self.min,
            (_, Aggregation::Max) => self.max,
            _ => return None,
        };
        Some(value)
    }

    /// The headline values shown in summaries, keyed by aggregation name.
    pub fn values(&self, elapsed: Duration) -> BTreeMap<String, f64> {
        let aggregations: &[Aggregation] = match self.kind {
            MetricKind::Counter => &[Aggregation::Count, Aggregation::Rate],
            MetricKind::Gauge => &[Aggregation::Value, Aggregation::Min, Aggregation::Max],
            MetricKind::Rate => &[Aggregation::Rate],
            MetricKind::Trend => &[
                Aggregation::Avg,
                Aggregation::Min,
                Aggregation::Med,
                Aggregation::Max,
                Aggregation::Percentile(90.),
                Aggregation::Percentile(95.),
                Aggregation::Percentile(99.),
            ],
        };

        let mut values: BTreeMap<String, f64> = aggregations
            .iter()
            .filter_map(|agg| Some((agg.to_string(), self.aggregate(*agg, elapsed)?)))
            .collect();

        if self.kind == MetricKind::Rate {
            values.insert("passes".to_string(), self.non_zero as f64);
            values.insert("fails".to_string(), (self.count - self.non_zero) as f64);
        }
        values
    }
}

/// Consistent read of every metric at one point of the run.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub elapsed: Duration,
    pub metrics: BTreeMap<String, MetricSnapshot>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.get(name)
    }

    /// Per-check sub-metrics as `(check name, snapshot)`.
    pub fn checks(&self) -> impl Iterator<Item = (&str, &MetricSnapshot)> {
        let prefix = format!("{CHECKS}{{{CHECK_TAG}:");
        self.metrics.iter().filter_map(move |(key, metric)| {
            let name = key.strip_prefix(prefix.as_str())?.strip_suffix('}')?;
            Some((name, metric))
        })
    }
}

impl Serialize for MetricSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MetricSnapshot", 5)?;
        state.serialize_field("type", &self.kind)?;
        state.serialize_field("count", &self.count)?;
        state.serialize_field("sum", &self.sum)?;
        state.serialize_field("min", &self.min)?;
        state.serialize_field("max", &self.max)?;
        state.end()
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Entry<'a> {
            #[serde(flatten)]
            metric: &'a MetricSnapshot,
            values: BTreeMap<String, f64>,
        }

        let metrics: BTreeMap<&str, Entry<'_>> = self
            .metrics
            .iter()
            .map(|(name, metric)| {
                (
                    name.as_str(),
                    Entry {
                        metric,
                        values: metric.values(self.elapsed),
                    },
                )
            })
            .collect();

        let mut state = serializer.serialize_struct("Snapshot", 2)?;
        state.serialize_field("elapsed_ms", &(self.elapsed.as_secs_f64() * 1_000.))?;
        state.serialize_field("metrics", &metrics)?;
        state.end()
    }
}
