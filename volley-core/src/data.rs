use crate::MetricKind;
use std::collections::BTreeMap;
use std::time::Duration;

pub type Tags = BTreeMap<String, String>;

/// A single observation handed to the aggregator.
///
/// Samples are consumed as soon as they are recorded; only the aggregates survive.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    /// Offset since the start of the run
    pub offset: Duration,
    pub tags: Tags,
}

impl MetricSample {
    pub fn new(name: &str, kind: MetricKind, value: f64, offset: Duration) -> Self {
        Self {
            name: name.to_string(),
            kind,
            value,
            offset,
            tags: Tags::new(),
        }
    }

    pub fn counter(name: &str, value: f64, offset: Duration) -> Self {
        Self::new(name, MetricKind::Counter, value, offset)
    }

    pub fn gauge(name: &str, value: f64, offset: Duration) -> Self {
        Self::new(name, MetricKind::Gauge, value, offset)
    }

    pub fn rate(name: &str, hit: bool, offset: Duration) -> Self {
        Self::new(name, MetricKind::Rate, if hit { 1. } else { 0. }, offset)
    }

    pub fn trend(name: &str, value: f64, offset: Duration) -> Self {
        Self::new(name, MetricKind::Trend, value, offset)
    }

    pub fn with_tag(mut self, key: &str, value: impl Into<String>) -> Self {
        self.tags.insert(key.to_string(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: &Tags) -> Self {
        self.tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}
