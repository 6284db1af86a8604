//! Threshold evaluation over a frozen snapshot
use volley_core::{
    Anomaly, IndeterminateReason, RunOutcome, Snapshot, Threshold, ThresholdResult,
    ThresholdStatus, VerdictReport,
};

/// Evaluate every threshold against `snapshot`, in configuration order.
pub fn evaluate(snapshot: &Snapshot, thresholds: &[Threshold]) -> Vec<ThresholdResult> {
    thresholds
        .iter()
        .map(|threshold| evaluate_one(snapshot, threshold))
        .collect()
}

fn evaluate_one(snapshot: &Snapshot, threshold: &Threshold) -> ThresholdResult {
    let aggregation = threshold.expression.aggregation;

    let (status, observed) = match snapshot.get(&threshold.metric_key()) {
        None => (
            ThresholdStatus::Indeterminate(IndeterminateReason::MetricNotFound),
            None,
        ),
        Some(metric) if !metric.kind.supports(aggregation) => (
            ThresholdStatus::Indeterminate(IndeterminateReason::UnsupportedAggregation {
                kind: metric.kind,
            }),
            None,
        ),
        Some(metric) if metric.is_empty() => (
            ThresholdStatus::Indeterminate(IndeterminateReason::NoSamples),
            None,
        ),
        Some(metric) => match metric.aggregate(aggregation, snapshot.elapsed) {
            Some(value) if threshold.expression.holds(value) => {
                (ThresholdStatus::Passed, Some(value))
            }
            Some(value) => (ThresholdStatus::Failed, Some(value)),
            None => (
                ThresholdStatus::Indeterminate(IndeterminateReason::NoSamples),
                None,
            ),
        },
    };

    ThresholdResult {
        metric: threshold.selector.clone(),
        expression: threshold.source.clone(),
        status,
        observed,
        abort_on_fail: threshold.abort_on_fail,
    }
}

/// First `abort_on_fail` threshold currently failing, if any.
pub fn abort_triggered<'a>(
    snapshot: &Snapshot,
    thresholds: &'a [Threshold],
) -> Option<&'a Threshold> {
    thresholds
        .iter()
        .filter(|t| t.abort_on_fail)
        .find(|t| evaluate_one(snapshot, t).status.is_failed())
}

/// Build the final report. The run passes unless a determinate threshold failed.
pub fn verdict(
    name: &str,
    snapshot: Snapshot,
    thresholds: &[Threshold],
    outcome: RunOutcome,
    anomalies: Vec<Anomaly>,
    vus_max: u64,
) -> VerdictReport {
    let results = evaluate(&snapshot, thresholds);
    let overall_pass = !results.iter().any(|r| r.status.is_failed());

    VerdictReport {
        name: name.to_string(),
        thresholds: results,
        overall_pass,
        outcome,
        anomalies,
        vus_max,
        snapshot,
    }
}
