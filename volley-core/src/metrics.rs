use crate::Aggregation;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const DATA_SENT: &str = "data_sent";
pub const DATA_RECEIVED: &str = "data_received";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const ITERATION_FAILED: &str = "iteration_failed";
pub const INTERRUPTED_ITERATIONS: &str = "interrupted_iterations";
pub const CHECKS: &str = "checks";
pub const CHECK_FAULTS: &str = "check_faults";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";

/// Tag carried by every check sample, used for the per-check sub-metric
pub const CHECK_TAG: &str = "check";

/// How samples of a metric are folded together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Cumulative sum of values
    Counter,
    /// Last value seen, with min/max
    Gauge,
    /// Fraction of non-zero samples
    Rate,
    /// Distribution of values with percentiles
    Trend,
}

impl MetricKind {
    /// Whether a threshold aggregation has a meaning for this kind of metric.
    pub fn supports(self, aggregation: Aggregation) -> bool {
        use Aggregation::*;
        match self {
            MetricKind::Counter => matches!(aggregation, Count | Rate),
            MetricKind::Gauge => matches!(aggregation, Value | Min | Max),
            MetricKind::Rate => matches!(aggregation, Rate),
            MetricKind::Trend => matches!(
                aggregation,
                Avg | Min | Max | Med | Count | Percentile(_)
            ),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Rate => "rate",
            MetricKind::Trend => "trend",
        };
        f.write_str(s)
    }
}

/// Kind of each metric the engine records on its own.
pub fn builtin_kind(name: &str) -> Option<MetricKind> {
    let kind = match name {
        HTTP_REQS | DATA_SENT | DATA_RECEIVED | ITERATIONS | INTERRUPTED_ITERATIONS
        | CHECK_FAULTS => MetricKind::Counter,
        HTTP_REQ_DURATION | ITERATION_DURATION => MetricKind::Trend,
        HTTP_REQ_FAILED | ITERATION_FAILED | CHECKS => MetricKind::Rate,
        VUS | VUS_MAX => MetricKind::Gauge,
        _ => return None,
    };
    Some(kind)
}
