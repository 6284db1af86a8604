//! Concurrent metric aggregation
use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use volley_core::{
    builtin_kind, MetricKind, MetricSample, MetricSelector, MetricSnapshot, Snapshot, CHECKS,
    CHECK_TAG, MAX_HISTOGRAM_PRECISION, TREND_RESOLUTION,
};

/// Folds samples from every virtual user into per-metric aggregates.
///
/// Lookups take the map's read lock; only the first sample of a new metric
/// takes the write lock. Each metric then has its own lock, so users recording
/// different metrics never contend.
pub struct Aggregator {
    start: Instant,
    precision: u8,
    submetrics: Vec<(MetricSelector, String)>,
    metrics: RwLock<HashMap<String, Arc<Mutex<MetricState>>>>,
}

impl Aggregator {
    pub fn new(precision: u8, submetrics: Vec<MetricSelector>) -> Self {
        let precision = precision.clamp(1, MAX_HISTOGRAM_PRECISION);

        let mut metrics = HashMap::new();
        // Sub-metrics of built-in metrics exist from the start so a threshold on
        // one that never matched reports "no samples" rather than "not found".
        for selector in &submetrics {
            if let Some(kind) = builtin_kind(&selector.metric) {
                metrics.insert(
                    selector.to_string(),
                    Arc::new(Mutex::new(MetricState::new(kind, precision))),
                );
            }
        }

        Self {
            start: Instant::now(),
            precision,
            submetrics: submetrics
                .into_iter()
                .map(|s| {
                    let key = s.to_string();
                    (s, key)
                })
                .collect(),
            metrics: RwLock::new(metrics),
        }
    }

    /// Time since the aggregator (and so the run) started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn record(&self, sample: MetricSample) {
        if !sample.value.is_finite() {
            warn!(
                "Dropping non-finite sample {} for metric {}",
                sample.value, sample.name
            );
            return;
        }

        self.record_into(&sample.name, &sample);

        let mut extra: Vec<&str> = self
            .submetrics
            .iter()
            .filter(|(selector, _)| selector.matches(&sample.name, &sample.tags))
            .map(|(_, key)| key.as_str())
            .collect();

        let check_key = check_key(&sample);
        if let Some(key) = &check_key {
            if !extra.contains(&key.as_str()) {
                extra.push(key);
            }
        }

        for key in extra {
            self.record_into(key, &sample);
        }

        #[cfg(feature = "metrics")]
        mirror(&sample);
    }

    fn record_into(&self, key: &str, sample: &MetricSample) {
        let existing = self.metrics.read().get(key).cloned();
        let state = match existing {
            Some(state) => state,
            None => self
                .metrics
                .write()
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(MetricState::new(sample.kind, self.precision))))
                .clone(),
        };

        let mut state = state.lock();
        if state.kind != sample.kind {
            warn!(
                "Dropping {} sample for {key}, metric is a {}",
                sample.kind, state.kind
            );
            return;
        }
        state.add(sample.value);
    }

    /// Freeze every metric. Each metric is copied under its own lock.
    pub fn snapshot(&self) -> Snapshot {
        let elapsed = self.elapsed();
        let states: Vec<(String, Arc<Mutex<MetricState>>)> = self
            .metrics
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let metrics = states
            .into_iter()
            .map(|(name, state)| (name, state.lock().freeze()))
            .collect();

        Snapshot { elapsed, metrics }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(volley_core::DEFAULT_HISTOGRAM_PRECISION, vec![])
    }
}

fn check_key(sample: &MetricSample) -> Option<String> {
    if sample.name != CHECKS {
        return None;
    }
    let check = sample.tags.get(CHECK_TAG)?;
    Some(
        MetricSelector::new(CHECKS)
            .with_tag(CHECK_TAG, check)
            .to_string(),
    )
}

struct MetricState {
    kind: MetricKind,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    non_zero: u64,
    last: f64,
    histogram: Option<Histogram<u64>>,
}

impl MetricState {
    fn new(kind: MetricKind, precision: u8) -> Self {
        let histogram = if kind == MetricKind::Trend {
            match Histogram::new(precision) {
                Ok(histogram) => Some(histogram),
                Err(err) => {
                    error!("Unable to create histogram with precision {precision}: {err}");
                    None
                }
            }
        } else {
            None
        };

        Self {
            kind,
            count: 0,
            sum: 0.,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            non_zero: 0,
            last: 0.,
            histogram,
        }
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last = value;
        if value != 0. {
            self.non_zero += 1;
        }
        if let Some(histogram) = &mut self.histogram {
            // Negative values only affect min/avg, the histogram is unsigned.
            histogram.saturating_record((value.max(0.) * TREND_RESOLUTION).round() as u64);
        }
    }

    fn freeze(&self) -> MetricSnapshot {
        let (min, max) = if self.count == 0 {
            (0., 0.)
        } else {
            (self.min, self.max)
        };
        MetricSnapshot {
            kind: self.kind,
            count: self.count,
            sum: self.sum,
            min,
            max,
            non_zero: self.non_zero,
            last: self.last,
            histogram: self.histogram.clone(),
        }
    }
}

#[cfg(feature = "metrics")]
fn mirror(sample: &MetricSample) {
    let labels: Vec<(String, String)> = sample
        .tags
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let name = format!("volley.{}", sample.name);

    match sample.kind {
        MetricKind::Counter => metrics::counter!(name, &labels).increment(sample.value as u64),
        MetricKind::Gauge => metrics::gauge!(name, &labels).set(sample.value),
        MetricKind::Rate | MetricKind::Trend => {
            metrics::histogram!(name, &labels).record(sample.value)
        }
    }
}
