use crate::{
    ConfigError, MetricKind, MetricSelector, Snapshot, EXIT_EXTERNAL_ABORT, EXIT_OK,
    EXIT_THRESHOLDS_FAILED,
};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Why a threshold could not be decided.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IndeterminateReason {
    /// No sample was ever recorded under this metric name
    MetricNotFound,
    /// The metric exists but holds no samples
    NoSamples,
    /// The aggregation has no meaning for this kind of metric
    UnsupportedAggregation { kind: MetricKind },
}

impl fmt::Display for IndeterminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndeterminateReason::MetricNotFound => f.write_str("metric not found"),
            IndeterminateReason::NoSamples => f.write_str("no samples"),
            IndeterminateReason::UnsupportedAggregation { kind } => {
                write!(f, "aggregation not supported by a {kind} metric")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ThresholdStatus {
    Passed,
    Failed,
    Indeterminate(IndeterminateReason),
}

impl ThresholdStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, ThresholdStatus::Failed)
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(self, ThresholdStatus::Indeterminate(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdResult {
    pub metric: MetricSelector,
    pub expression: String,
    #[serde(flatten)]
    pub status: ThresholdStatus,
    pub observed: Option<f64>,
    pub abort_on_fail: bool,
}

/// How the run came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The stage schedule ran to its end
    Completed,
    /// Stopped from outside (Ctrl-C or an interrupt future)
    Interrupted,
    /// An `abort_on_fail` threshold failed mid-run
    ThresholdAborted,
}

/// Non-fatal irregularities observed during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    DrainTimeoutExceeded {
        #[serde(serialize_with = "serialize_ms")]
        timeout: Duration,
        forced: usize,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::DrainTimeoutExceeded { timeout, forced } => write!(
                f,
                "drain timeout of {} exceeded, {forced} virtual user(s) force-stopped",
                humantime::format_duration(*timeout)
            ),
        }
    }
}

fn serialize_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1_000.)
}

/// What awaiting a scenario yields. Only an invalid configuration prevents a verdict.
pub type RunResult = Result<VerdictReport, ConfigError>;

/// Final, immutable result of a run handed to every renderer.
#[derive(Debug, Clone, Serialize)]
pub struct VerdictReport {
    pub name: String,
    pub thresholds: Vec<ThresholdResult>,
    pub overall_pass: bool,
    pub outcome: RunOutcome,
    pub anomalies: Vec<Anomaly>,
    pub vus_max: u64,
    pub snapshot: Snapshot,
}

impl VerdictReport {
    pub fn passed(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds
            .iter()
            .filter(|t| t.status == ThresholdStatus::Passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds.iter().filter(|t| t.status.is_failed())
    }

    pub fn indeterminate(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds
            .iter()
            .filter(|t| t.status.is_indeterminate())
    }

    /// Process exit code for this verdict.
    pub fn exit_code(&self) -> u8 {
        match self.outcome {
            RunOutcome::Interrupted => EXIT_EXTERNAL_ABORT,
            RunOutcome::ThresholdAborted => EXIT_THRESHOLDS_FAILED,
            RunOutcome::Completed if self.overall_pass => EXIT_OK,
            RunOutcome::Completed => EXIT_THRESHOLDS_FAILED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: ThresholdStatus) -> ThresholdResult {
        ThresholdResult {
            metric: MetricSelector::new("http_req_failed"),
            expression: "rate<0.01".to_string(),
            status,
            observed: Some(0.02),
            abort_on_fail: false,
        }
    }

    fn report(thresholds: Vec<ThresholdResult>, outcome: RunOutcome) -> VerdictReport {
        let overall_pass = !thresholds.iter().any(|t| t.status.is_failed());
        VerdictReport {
            name: "test".to_string(),
            thresholds,
            overall_pass,
            outcome,
            anomalies: vec![],
            vus_max: 5,
            snapshot: Snapshot::default(),
        }
    }

    #[test]
    fn exit_codes() {
        let pass = report(vec![result(ThresholdStatus::Passed)], RunOutcome::Completed);
        assert_eq!(pass.exit_code(), EXIT_OK);

        let fail = report(vec![result(ThresholdStatus::Failed)], RunOutcome::Completed);
        assert_eq!(fail.exit_code(), EXIT_THRESHOLDS_FAILED);

        let aborted = report(
            vec![result(ThresholdStatus::Failed)],
            RunOutcome::ThresholdAborted,
        );
        assert_eq!(aborted.exit_code(), EXIT_THRESHOLDS_FAILED);

        let interrupted = report(vec![], RunOutcome::Interrupted);
        assert_eq!(interrupted.exit_code(), EXIT_EXTERNAL_ABORT);
    }

    #[test]
    fn results_are_partitioned() {
        let report = report(
            vec![
                result(ThresholdStatus::Passed),
                result(ThresholdStatus::Failed),
                result(ThresholdStatus::Indeterminate(
                    IndeterminateReason::MetricNotFound,
                )),
            ],
            RunOutcome::Completed,
        );
        assert_eq!(report.passed().count(), 1);
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.indeterminate().count(), 1);
    }

    #[test]
    fn serializes_flat_status() {
        let json = serde_json::to_value(result(ThresholdStatus::Indeterminate(
            IndeterminateReason::NoSamples,
        )))
        .unwrap();
        assert_eq!(json["metric"], "http_req_failed");
        assert_eq!(json["status"], "indeterminate");
        assert_eq!(json["reason"], "no_samples");

        let anomaly = serde_json::to_value(Anomaly::DrainTimeoutExceeded {
            timeout: Duration::from_secs(2),
            forced: 3,
        })
        .unwrap();
        assert_eq!(anomaly["kind"], "drain_timeout_exceeded");
        assert_eq!(anomaly["timeout"], 2000.);
    }
}
